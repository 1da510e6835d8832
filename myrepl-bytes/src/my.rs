//! MySQL specific encodings: length-encoded integers and strings
use crate::error::{Error, Needed, Result};
use crate::number::{ReadBytesExt, WriteBytesExt};
use crate::{ReadFromBytes, WriteToBytes};
use bytes::{Buf, Bytes, BytesMut};

/// read MySQL encoded types off a byte cursor
pub trait ReadMyEnc {
    fn read_len_enc_int(&mut self) -> Result<LenEncInt>;

    fn read_len_enc_str(&mut self) -> Result<LenEncStr>;
}

impl ReadMyEnc for Bytes {
    fn read_len_enc_int(&mut self) -> Result<LenEncInt> {
        let len = self.read_u8()?;
        match len {
            0xfb => Ok(LenEncInt::Null),
            0xfc => Ok(LenEncInt::Len3(self.read_le_u16()?)),
            0xfd => Ok(LenEncInt::Len4(self.read_le_u24()?)),
            0xfe => Ok(LenEncInt::Len9(self.read_le_u64()?)),
            0xff => Ok(LenEncInt::Err),
            _ => Ok(LenEncInt::Len1(len)),
        }
    }

    fn read_len_enc_str(&mut self) -> Result<LenEncStr> {
        let lei = self.read_len_enc_int()?;
        match lei {
            LenEncInt::Null => Ok(LenEncStr::Null),
            LenEncInt::Err => Ok(LenEncStr::Err),
            _ => {
                // keyed ints always carry a value
                let len = lei.to_u64().unwrap() as usize;
                if self.remaining() < len {
                    return Err(Error::InputIncomplete(
                        Bytes::new(),
                        Needed::Size(len - self.remaining()),
                    ));
                }
                Ok(LenEncStr::Bytes(self.split_to(len)))
            }
        }
    }
}

/// MySQL length encoded integer
///
/// the first byte keys the width: values below 0xfb inline,
/// 0xfb null, 0xfc + 2 bytes, 0xfd + 3 bytes, 0xfe + 8 bytes
#[derive(Debug, Clone, PartialEq)]
pub enum LenEncInt {
    Null,
    Err,
    Len1(u8),
    Len3(u16),
    Len4(u32),
    Len9(u64),
}

impl LenEncInt {
    pub fn to_u64(&self) -> Option<u64> {
        match self {
            LenEncInt::Len1(n) => Some(*n as u64),
            LenEncInt::Len3(n) => Some(*n as u64),
            LenEncInt::Len4(n) => Some(*n as u64),
            LenEncInt::Len9(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_u32(&self) -> Option<u32> {
        match self {
            LenEncInt::Len9(n) if *n > u32::MAX as u64 => None,
            _ => self.to_u64().map(|n| n as u32),
        }
    }

    /// encoded byte length including the key byte
    pub fn bytes_len(&self) -> usize {
        match self {
            LenEncInt::Null | LenEncInt::Err | LenEncInt::Len1(_) => 1,
            LenEncInt::Len3(_) => 3,
            LenEncInt::Len4(_) => 4,
            LenEncInt::Len9(_) => 9,
        }
    }
}

impl ReadFromBytes for LenEncInt {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        input.read_len_enc_int()
    }
}

impl WriteToBytes for LenEncInt {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let len = match self {
            LenEncInt::Null => out.write_u8(0xfb)?,
            LenEncInt::Err => out.write_u8(0xff)?,
            LenEncInt::Len1(n) => out.write_u8(n)?,
            LenEncInt::Len3(n) => out.write_u8(0xfc)? + out.write_le_u16(n)?,
            LenEncInt::Len4(n) => out.write_u8(0xfd)? + out.write_le_u24(n)?,
            LenEncInt::Len9(n) => out.write_u8(0xfe)? + out.write_le_u64(n)?,
        };
        Ok(len)
    }
}

/// convert u64 to len-enc-int with minimal width
impl From<u64> for LenEncInt {
    fn from(src: u64) -> Self {
        if src < 0xfb {
            LenEncInt::Len1(src as u8)
        } else if src <= 0xffff {
            LenEncInt::Len3(src as u16)
        } else if src <= 0xff_ffff {
            LenEncInt::Len4(src as u32)
        } else {
            LenEncInt::Len9(src)
        }
    }
}

impl From<u32> for LenEncInt {
    fn from(src: u32) -> Self {
        Self::from(src as u64)
    }
}

impl From<u16> for LenEncInt {
    fn from(src: u16) -> Self {
        Self::from(src as u64)
    }
}

impl From<u8> for LenEncInt {
    fn from(src: u8) -> Self {
        Self::from(src as u64)
    }
}

/// MySQL length encoded string
#[derive(Debug, Clone, PartialEq)]
pub enum LenEncStr {
    Null,
    Err,
    Bytes(Bytes),
}

impl LenEncStr {
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Self::Bytes(bs) => Some(bs),
            _ => None,
        }
    }

    /// convert into owned string, empty if null or err
    pub fn into_string(self) -> std::result::Result<String, std::string::FromUtf8Error> {
        match self {
            Self::Bytes(bs) => String::from_utf8(Vec::from(bs.as_ref())),
            _ => Ok(String::new()),
        }
    }
}

impl From<Bytes> for LenEncStr {
    fn from(bs: Bytes) -> Self {
        LenEncStr::Bytes(bs)
    }
}

impl ReadFromBytes for LenEncStr {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        input.read_len_enc_str()
    }
}

impl WriteToBytes for LenEncStr {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let len = match self {
            LenEncStr::Null => out.write_u8(0xfb)?,
            LenEncStr::Err => out.write_u8(0xff)?,
            LenEncStr::Bytes(bs) => {
                let lei = LenEncInt::from(bs.len() as u64);
                lei.write_to(out)? + out.write_bytes(bs.as_ref())?
            }
        };
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(orig: &'static [u8], expected: LenEncInt) {
        let mut bs = Bytes::from_static(orig);
        let lei = bs.read_len_enc_int().unwrap();
        assert_eq!(expected, lei);
        let mut encoded = BytesMut::new();
        lei.write_to(&mut encoded).unwrap();
        assert_eq!(orig, encoded.as_ref());
    }

    #[test]
    fn test_len_enc_int_1() {
        roundtrip(&[0x0a], LenEncInt::Len1(0x0a));
        roundtrip(&[0xfa], LenEncInt::Len1(0xfa));
    }

    #[test]
    fn test_len_enc_int_3() {
        roundtrip(&[0xfc, 0x34, 0x12], LenEncInt::Len3(0x1234));
    }

    #[test]
    fn test_len_enc_int_4() {
        roundtrip(&[0xfd, 0xc2, 0xb2, 0xa2], LenEncInt::Len4(0xa2b2c2));
    }

    #[test]
    fn test_len_enc_int_9() {
        roundtrip(
            &[0xfe, 0x0d, 0x0c, 0x0b, 0x0a, 0x04, 0x03, 0x02, 0x01],
            LenEncInt::Len9(0x01020304_0a0b0c0d),
        );
    }

    #[test]
    fn test_len_enc_int_null_err() {
        roundtrip(&[0xfb], LenEncInt::Null);
        roundtrip(&[0xff], LenEncInt::Err);
    }

    #[test]
    fn test_len_enc_int_width_table() {
        // boundary widths per the protocol table
        assert_eq!(1, LenEncInt::from(0u64).bytes_len());
        assert_eq!(1, LenEncInt::from(0xfau64).bytes_len());
        assert_eq!(3, LenEncInt::from(0xfbu64).bytes_len());
        assert_eq!(3, LenEncInt::from(0xffffu64).bytes_len());
        assert_eq!(4, LenEncInt::from(0x1_0000u64).bytes_len());
        assert_eq!(4, LenEncInt::from(0xff_ffffu64).bytes_len());
        assert_eq!(9, LenEncInt::from(0x100_0000u64).bytes_len());
        assert_eq!(9, LenEncInt::from(u64::MAX).bytes_len());
    }

    #[test]
    fn test_len_enc_int_full_range_roundtrip() {
        let mut n = 1u64;
        while n < u64::MAX / 7 {
            let lei = LenEncInt::from(n);
            let mut encoded = BytesMut::new();
            lei.clone().write_to(&mut encoded).unwrap();
            assert_eq!(lei.bytes_len(), encoded.len());
            let decoded = encoded.freeze().read_len_enc_int().unwrap();
            assert_eq!(Some(n), decoded.to_u64());
            n = n.wrapping_mul(7).wrapping_add(3);
        }
    }

    #[test]
    fn test_len_enc_str() {
        let orig = b"\x05hello";
        let mut bs = Bytes::from_static(orig);
        let les = bs.read_len_enc_str().unwrap();
        assert_eq!(
            &b"hello"[..],
            les.clone().into_bytes().unwrap().as_ref()
        );
        let mut encoded = BytesMut::new();
        les.write_to(&mut encoded).unwrap();
        assert_eq!(&orig[..], encoded.as_ref());
    }

    #[test]
    fn test_len_enc_str_incomplete() {
        let mut bs = Bytes::from_static(b"\x05hell");
        assert!(bs.read_len_enc_str().is_err());
    }
}
