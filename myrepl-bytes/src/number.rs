use crate::error::{Error, Needed, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

macro_rules! check_remaining {
    ($input:expr, $n:expr) => {
        if $input.remaining() < $n {
            return Err(Error::InputIncomplete(
                Bytes::new(),
                Needed::Size($n - $input.remaining()),
            ));
        }
    };
}

/// read fixed-width numbers from a byte cursor
///
/// MySQL integers are little-endian except a handful of temporal and
/// decimal fields, which get explicit big-endian readers
pub trait ReadBytesExt {
    fn read_u8(&mut self) -> Result<u8>;

    fn read_le_u16(&mut self) -> Result<u16>;

    fn read_le_u24(&mut self) -> Result<u32>;

    fn read_le_u32(&mut self) -> Result<u32>;

    fn read_le_u48(&mut self) -> Result<u64>;

    fn read_le_u64(&mut self) -> Result<u64>;

    fn read_le_u128(&mut self) -> Result<u128>;

    fn read_be_u16(&mut self) -> Result<u16>;

    fn read_be_u24(&mut self) -> Result<u32>;

    fn read_be_u32(&mut self) -> Result<u32>;

    fn read_be_u40(&mut self) -> Result<u64>;

    fn read_be_u64(&mut self) -> Result<u64>;

    /// take n bytes off the cursor
    fn read_len(&mut self, n: usize) -> Result<Bytes>;

    /// take bytes until the given delimiter
    ///
    /// the delimiter is always consumed, and included in the result
    /// only if inclusive is set
    fn read_until(&mut self, b: u8, inclusive: bool) -> Result<Bytes>;

    #[inline]
    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    #[inline]
    fn read_le_i16(&mut self) -> Result<i16> {
        Ok(self.read_le_u16()? as i16)
    }

    #[inline]
    fn read_le_i24(&mut self) -> Result<i32> {
        let v = self.read_le_u24()?;
        if v & 0x80_0000 != 0 {
            Ok((v | 0xff00_0000) as i32)
        } else {
            Ok(v as i32)
        }
    }

    #[inline]
    fn read_le_i32(&mut self) -> Result<i32> {
        Ok(self.read_le_u32()? as i32)
    }

    #[inline]
    fn read_le_i48(&mut self) -> Result<i64> {
        let v = self.read_le_u48()?;
        if v & 0x8000_0000_0000 != 0 {
            Ok((v | 0xffff_0000_0000_0000) as i64)
        } else {
            Ok(v as i64)
        }
    }

    #[inline]
    fn read_le_i64(&mut self) -> Result<i64> {
        Ok(self.read_le_u64()? as i64)
    }

    #[inline]
    fn read_le_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_le_u32()?))
    }

    #[inline]
    fn read_le_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_le_u64()?))
    }
}

impl ReadBytesExt for Bytes {
    fn read_u8(&mut self) -> Result<u8> {
        check_remaining!(self, 1);
        Ok(self.get_u8())
    }

    fn read_le_u16(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16_le())
    }

    fn read_le_u24(&mut self) -> Result<u32> {
        check_remaining!(self, 3);
        let mut bs = [0u8; 4];
        self.copy_to_slice(&mut bs[..3]);
        Ok(u32::from_le_bytes(bs))
    }

    fn read_le_u32(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32_le())
    }

    fn read_le_u48(&mut self) -> Result<u64> {
        check_remaining!(self, 6);
        let mut bs = [0u8; 8];
        self.copy_to_slice(&mut bs[..6]);
        Ok(u64::from_le_bytes(bs))
    }

    fn read_le_u64(&mut self) -> Result<u64> {
        check_remaining!(self, 8);
        Ok(self.get_u64_le())
    }

    fn read_le_u128(&mut self) -> Result<u128> {
        check_remaining!(self, 16);
        Ok(self.get_u128_le())
    }

    fn read_be_u16(&mut self) -> Result<u16> {
        check_remaining!(self, 2);
        Ok(self.get_u16())
    }

    fn read_be_u24(&mut self) -> Result<u32> {
        check_remaining!(self, 3);
        let mut bs = [0u8; 4];
        self.copy_to_slice(&mut bs[1..]);
        Ok(u32::from_be_bytes(bs))
    }

    fn read_be_u32(&mut self) -> Result<u32> {
        check_remaining!(self, 4);
        Ok(self.get_u32())
    }

    fn read_be_u40(&mut self) -> Result<u64> {
        check_remaining!(self, 5);
        let mut bs = [0u8; 8];
        self.copy_to_slice(&mut bs[3..]);
        Ok(u64::from_be_bytes(bs))
    }

    fn read_be_u64(&mut self) -> Result<u64> {
        check_remaining!(self, 8);
        Ok(self.get_u64())
    }

    fn read_len(&mut self, n: usize) -> Result<Bytes> {
        check_remaining!(self, n);
        Ok(self.split_to(n))
    }

    fn read_until(&mut self, b: u8, inclusive: bool) -> Result<Bytes> {
        match self.iter().position(|&c| c == b) {
            Some(pos) => {
                let r = if inclusive {
                    self.split_to(pos + 1)
                } else {
                    let r = self.split_to(pos);
                    self.advance(1);
                    r
                };
                Ok(r)
            }
            None => Err(Error::InputIncomplete(Bytes::new(), Needed::Unknown)),
        }
    }
}

/// write fixed-width numbers to a byte buffer
pub trait WriteBytesExt {
    fn write_u8(&mut self, n: u8) -> Result<usize>;

    fn write_le_u16(&mut self, n: u16) -> Result<usize>;

    fn write_le_u24(&mut self, n: u32) -> Result<usize>;

    fn write_le_u32(&mut self, n: u32) -> Result<usize>;

    fn write_le_u48(&mut self, n: u64) -> Result<usize>;

    fn write_le_u64(&mut self, n: u64) -> Result<usize>;

    fn write_le_u128(&mut self, n: u128) -> Result<usize>;

    fn write_le_i64(&mut self, n: i64) -> Result<usize>;

    fn write_be_u16(&mut self, n: u16) -> Result<usize>;

    fn write_be_u24(&mut self, n: u32) -> Result<usize>;

    fn write_be_u32(&mut self, n: u32) -> Result<usize>;

    fn write_bytes(&mut self, bs: &[u8]) -> Result<usize>;
}

impl WriteBytesExt for BytesMut {
    fn write_u8(&mut self, n: u8) -> Result<usize> {
        self.put_u8(n);
        Ok(1)
    }

    fn write_le_u16(&mut self, n: u16) -> Result<usize> {
        self.put_u16_le(n);
        Ok(2)
    }

    fn write_le_u24(&mut self, n: u32) -> Result<usize> {
        debug_assert!(n <= 0xff_ffff);
        self.put_slice(&n.to_le_bytes()[..3]);
        Ok(3)
    }

    fn write_le_u32(&mut self, n: u32) -> Result<usize> {
        self.put_u32_le(n);
        Ok(4)
    }

    fn write_le_u48(&mut self, n: u64) -> Result<usize> {
        debug_assert!(n <= 0xffff_ffff_ffff);
        self.put_slice(&n.to_le_bytes()[..6]);
        Ok(6)
    }

    fn write_le_u64(&mut self, n: u64) -> Result<usize> {
        self.put_u64_le(n);
        Ok(8)
    }

    fn write_le_u128(&mut self, n: u128) -> Result<usize> {
        self.put_u128_le(n);
        Ok(16)
    }

    fn write_le_i64(&mut self, n: i64) -> Result<usize> {
        self.put_i64_le(n);
        Ok(8)
    }

    fn write_be_u16(&mut self, n: u16) -> Result<usize> {
        self.put_u16(n);
        Ok(2)
    }

    fn write_be_u24(&mut self, n: u32) -> Result<usize> {
        debug_assert!(n <= 0xff_ffff);
        self.put_slice(&n.to_be_bytes()[1..]);
        Ok(3)
    }

    fn write_be_u32(&mut self, n: u32) -> Result<usize> {
        self.put_u32(n);
        Ok(4)
    }

    fn write_bytes(&mut self, bs: &[u8]) -> Result<usize> {
        self.put_slice(bs);
        Ok(bs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_le_numbers() {
        let mut bs = Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(0x01, bs.read_u8().unwrap());
        assert_eq!(0x0302, bs.read_le_u16().unwrap());
        assert_eq!(0x060504, bs.read_le_u24().unwrap());
        assert!(bs.read_le_u32().is_err());
    }

    #[test]
    fn test_read_le_u48() {
        let mut bs = Bytes::from_static(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x80]);
        assert_eq!(0x8000_0000_0001, bs.read_le_u48().unwrap());
    }

    #[test]
    fn test_read_sign_extension() {
        let mut bs = Bytes::from_static(&[0xff, 0xff, 0xff]);
        assert_eq!(-1, bs.read_le_i24().unwrap());
        let mut bs = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(-1, bs.read_le_i48().unwrap());
    }

    #[test]
    fn test_read_be_numbers() {
        let mut bs = Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(0x0102, bs.read_be_u16().unwrap());
        assert_eq!(0x030405, bs.read_be_u24().unwrap());
    }

    #[test]
    fn test_read_until() {
        let mut bs = Bytes::from_static(b"abc\0def");
        let s = bs.read_until(0, false).unwrap();
        assert_eq!(&b"abc"[..], s.as_ref());
        assert_eq!(&b"def"[..], bs.as_ref());

        let mut bs = Bytes::from_static(b"abc");
        assert!(bs.read_until(0, false).is_err());
    }

    #[test]
    fn test_write_roundtrip() {
        let mut out = BytesMut::new();
        out.write_le_u24(0x030201).unwrap();
        out.write_le_u48(0x0605_0403_0201).unwrap();
        out.write_be_u24(0x010203).unwrap();
        let mut bs = out.freeze();
        assert_eq!(0x030201, bs.read_le_u24().unwrap());
        assert_eq!(0x0605_0403_0201, bs.read_le_u48().unwrap());
        assert_eq!(0x010203, bs.read_be_u24().unwrap());
    }
}
