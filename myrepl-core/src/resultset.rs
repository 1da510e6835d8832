//! text protocol result set rows
use crate::col::ColumnDefinition;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::my::{LenEncStr, ReadMyEnc};
use myrepl_bytes::{ReadFromBytes, WriteToBytes};

/// a row of the text result set protocol: every cell is a
/// length-encoded string or NULL (0xfb)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextRow(pub Vec<Option<Bytes>>);

impl TextRow {
    pub fn cell_str(&self, idx: usize) -> Option<String> {
        self.0
            .get(idx)
            .and_then(|c| c.as_ref())
            .map(|bs| String::from_utf8_lossy(bs.as_ref()).into_owned())
    }
}

impl ReadFromBytes for TextRow {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let mut cells = Vec::new();
        while input.has_remaining() {
            match input.read_len_enc_str()? {
                LenEncStr::Null => cells.push(None),
                LenEncStr::Bytes(bs) => cells.push(Some(bs)),
                LenEncStr::Err => {
                    return Err(myrepl_bytes::error::Error::ConstraintError(
                        "invalid text row cell".to_owned(),
                    ))
                }
            }
        }
        Ok(TextRow(cells))
    }
}

impl WriteToBytes for TextRow {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        for cell in self.0 {
            let les = match cell {
                Some(bs) => LenEncStr::Bytes(bs),
                None => LenEncStr::Null,
            };
            len += les.write_to(out)?;
        }
        Ok(len)
    }
}

/// a fully buffered text result set
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub cols: Vec<ColumnDefinition>,
    pub rows: Vec<TextRow>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// the single cell of a single-row single-column result
    pub fn scalar(&self) -> Option<String> {
        match self.rows.as_slice() {
            [row] => row.cell_str(0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_row_roundtrip() {
        let row = TextRow(vec![
            Some(Bytes::from_static(b"1")),
            None,
            Some(Bytes::from_static(b"abc")),
        ]);
        let mut buf = BytesMut::new();
        row.clone().write_to(&mut buf).unwrap();
        let decoded = TextRow::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(row, decoded);
        assert_eq!(Some("1".to_owned()), decoded.cell_str(0));
        assert_eq!(None, decoded.cell_str(1));
    }

    #[test]
    fn test_scalar() {
        let rs = ResultSet {
            cols: vec![],
            rows: vec![TextRow(vec![Some(Bytes::from_static(b"100"))])],
        };
        assert_eq!(Some("100".to_owned()), rs.scalar());
    }
}
