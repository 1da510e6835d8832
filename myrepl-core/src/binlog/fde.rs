use bytes::{Buf, Bytes};
use myrepl_bytes::error::{Error, Result};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes};

/// type code of the format description event itself
const FDE_TYPE_CODE: u8 = 15;

/// byte length of the fixed fields before the post header lengths:
/// binlog version 2, server version 50, create timestamp 4, header length 1
const FDE_FIXED_LEN: u8 = 57;

/// checksum algorithm advertised by the format description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlg {
    Off,
    Crc32,
}

impl ChecksumAlg {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(ChecksumAlg::Off),
            0x01 => Ok(ChecksumAlg::Crc32),
            other => Err(Error::ConstraintError(format!(
                "unknown checksum algorithm {:#04x}",
                other
            ))),
        }
    }
}

/// FORMAT_DESCRIPTION_EVENT, the first event of every binlog file
///
/// reference: https://dev.mysql.com/doc/internals/en/format-description-event.html
#[derive(Debug, Clone)]
pub struct FormatDescriptionData {
    // always 4 for 5.0 and newer servers
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    pub header_len: u8,
    // indexed by type_code - 1
    pub post_header_lengths: Vec<u8>,
    pub checksum_alg: ChecksumAlg,
}

impl FormatDescriptionData {
    pub fn post_header_len(&self, type_code: u8) -> Option<u8> {
        if type_code == 0 {
            return None;
        }
        self.post_header_lengths.get(type_code as usize - 1).copied()
    }
}

impl ReadFromBytes for FormatDescriptionData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let binlog_version = input.read_le_u16()?;
        if binlog_version != 4 {
            return Err(Error::ConstraintError(format!(
                "unsupported binlog version {}",
                binlog_version
            )));
        }
        let server_version_raw = input.read_len(50)?;
        let end = server_version_raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(50);
        let server_version = String::from_utf8_lossy(&server_version_raw[..end]).into_owned();
        let create_timestamp = input.read_le_u32()?;
        let header_len = input.read_u8()?;
        // the FDE describes itself: its own entry in the post header
        // length table equals the fixed fields plus the table size, so
        // the table length can be recovered without knowing the server.
        // servers from 5.6.1 append a checksum algorithm byte and the
        // event's own crc behind the table; older ones end right there
        if input.remaining() < FDE_TYPE_CODE as usize {
            return Err(Error::ConstraintError(
                "format description too short".to_owned(),
            ));
        }
        let table_len = input[FDE_TYPE_CODE as usize - 1]
            .checked_sub(FDE_FIXED_LEN)
            .ok_or_else(|| {
                Error::ConstraintError("invalid format description post header length".to_owned())
            })? as usize;
        if input.remaining() < table_len {
            return Err(Error::ConstraintError(
                "format description shorter than its own post header length".to_owned(),
            ));
        }
        let post_header_lengths = Vec::from(input.read_len(table_len)?.as_ref());
        let checksum_alg = if input.has_remaining() {
            let alg = ChecksumAlg::from_byte(input.read_u8()?)?;
            // what remains is the event's own 4-byte crc
            input.advance(input.remaining());
            alg
        } else {
            ChecksumAlg::Off
        };
        Ok(FormatDescriptionData {
            binlog_version,
            server_version,
            create_timestamp,
            header_len,
            post_header_lengths,
            checksum_alg,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_fde_body(server_version: &str, checksum: bool) -> Bytes {
    use bytes::{BufMut, BytesMut};

    let mut buf = BytesMut::new();
    buf.put_u16_le(4);
    let mut ver = [0u8; 50];
    ver[..server_version.len()].copy_from_slice(server_version.as_bytes());
    buf.put_slice(&ver);
    buf.put_u32_le(0);
    buf.put_u8(19);
    // post header lengths for 38 event types
    let mut phl = vec![0u8; 38];
    phl[1] = 13; // query
    phl[3] = 8; // rotate
    phl[14] = 57 + 38; // the FDE entry describes the table itself
    phl[18] = 8; // table map
    phl[29] = 10; // write rows v2
    buf.put_slice(&phl);
    if checksum {
        buf.put_u8(0x01);
        buf.put_u32_le(0xdead_beef);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    #[test]
    fn test_fde_with_checksum() {
        let mut body = sample_fde_body("5.7.30-log", true);
        let fde = FormatDescriptionData::read_from(&mut body).unwrap();
        assert_eq!(4, fde.binlog_version);
        assert_eq!("5.7.30-log", fde.server_version);
        assert_eq!(ChecksumAlg::Crc32, fde.checksum_alg);
        assert_eq!(38, fde.post_header_lengths.len());
        assert_eq!(Some(13), fde.post_header_len(2));
        assert_eq!(Some(8), fde.post_header_len(19));
    }

    #[test]
    fn test_fde_without_checksum() {
        let mut body = sample_fde_body("5.5.50", false);
        let fde = FormatDescriptionData::read_from(&mut body).unwrap();
        assert_eq!(ChecksumAlg::Off, fde.checksum_alg);
        assert_eq!(38, fde.post_header_lengths.len());
    }

    // the detection keys off the event's own table entry, so an
    // unparseable vendor version string changes nothing
    #[test]
    fn test_fde_vendor_version_string() {
        let mut body = sample_fde_body("fork-edition", true);
        let fde = FormatDescriptionData::read_from(&mut body).unwrap();
        assert_eq!(ChecksumAlg::Crc32, fde.checksum_alg);
        assert_eq!("fork-edition", fde.server_version);
    }

    #[test]
    fn test_invalid_binlog_version() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(3);
        assert!(FormatDescriptionData::read_from(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_fde_truncated_table() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(4);
        buf.put_slice(&[0u8; 50]);
        buf.put_u32_le(0);
        buf.put_u8(19);
        // table claims more entries than the body carries
        let mut phl = vec![0u8; 20];
        phl[14] = 57 + 38;
        buf.put_slice(&phl);
        assert!(FormatDescriptionData::read_from(&mut buf.freeze()).is_err());
    }
}
