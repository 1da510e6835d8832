//! MySQL packed decimal (DECIMAL/NUMERIC binlog and binary protocol form)
use bytes::Bytes;
use myrepl_bytes::error::{Error, Needed, Result};
use myrepl_bytes::ReadBytesExt;
use std::fmt;

const DIG_PER_DEC1: u8 = 9;
const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];
const POWERS_10: [u32; 10] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
];

/// a decoded decimal value
///
/// digits are stored in 9-digit words, the wire layout packs each word
/// big-endian into 4 bytes with shorter leading/trailing fragments
/// looked up in DIG_TO_BYTES; the sign lives in the high bit of the
/// first byte and every bit is inverted for negative values
#[derive(Debug, Clone, PartialEq)]
pub struct MyDecimal {
    // decimal digits before the point
    pub intg: u8,
    // decimal digits after the point
    pub frac: u8,
    pub negative: bool,
    // 9-digit words, integral part first
    pub buf: Vec<u32>,
}

impl MyDecimal {
    /// wire size of a decimal with the given precision and scale
    pub fn bin_size(precision: u8, scale: u8) -> usize {
        let intg = precision - scale;
        let intg0 = (intg / DIG_PER_DEC1) as usize;
        let frac0 = (scale / DIG_PER_DEC1) as usize;
        let intg0x = (intg % DIG_PER_DEC1) as usize;
        let frac0x = (scale % DIG_PER_DEC1) as usize;
        intg0 * 4 + DIG_TO_BYTES[intg0x] + frac0 * 4 + DIG_TO_BYTES[frac0x]
    }

    /// decode a decimal with metadata (precision, scale)
    pub fn read_from(input: &mut Bytes, precision: u8, scale: u8) -> Result<Self> {
        let intg = precision - scale;
        let frac = scale;
        let intg0 = intg / DIG_PER_DEC1;
        let frac0 = frac / DIG_PER_DEC1;
        let intg0x = intg - intg0 * DIG_PER_DEC1;
        let frac0x = frac - frac0 * DIG_PER_DEC1;
        let bin_size = Self::bin_size(precision, scale);
        if input.len() < bin_size {
            return Err(Error::InputIncomplete(
                Bytes::new(),
                Needed::Size(bin_size - input.len()),
            ));
        }
        // sign bit is stored inverted
        let negative = input[0] & 0x80 != 0x80;
        let mut buf = Vec::with_capacity((intg0 + frac0 + 2) as usize);
        if intg0x > 0 {
            let frag = read_extra_fragment(input, true, DIG_TO_BYTES[intg0x as usize], negative)?;
            buf.push(frag);
        }
        for i in 0..intg0 {
            // the sign bit sits in the very first byte of the value
            let frag = if intg0x == 0 && i == 0 {
                read_extra_fragment(input, true, 4, negative)?
            } else {
                read_fragment(input, negative)?
            };
            buf.push(frag);
        }
        for _ in 0..frac0 {
            let frag = read_fragment(input, negative)?;
            buf.push(frag);
        }
        if frac0x > 0 {
            let frag = read_extra_fragment(input, false, DIG_TO_BYTES[frac0x as usize], negative)?;
            // scale short fragments up to full 9-digit words
            buf.push(frag * POWERS_10[(DIG_PER_DEC1 - frac0x) as usize]);
        }
        Ok(MyDecimal {
            intg,
            frac,
            negative,
            buf,
        })
    }
}

impl fmt::Display for MyDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let intg0 = self.intg / DIG_PER_DEC1;
        let intg0x = self.intg % DIG_PER_DEC1;
        let n_int_words = intg0 as usize + (intg0x > 0) as usize;

        let mut int_str = String::new();
        for w in self.buf.iter().take(n_int_words) {
            int_str.push_str(&format!("{:09}", w));
        }
        let int_str = int_str.trim_start_matches('0');
        let int_str = if int_str.is_empty() { "0" } else { int_str };

        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{}", int_str)?;

        if self.frac == 0 {
            return Ok(());
        }
        let mut frac_str = String::new();
        for w in self.buf.iter().skip(n_int_words) {
            frac_str.push_str(&format!("{:09}", w));
        }
        while frac_str.len() < self.frac as usize {
            frac_str.push('0');
        }
        frac_str.truncate(self.frac as usize);
        write!(f, ".{}", frac_str)
    }
}

/// read a short fragment of 1 to 4 bytes
///
/// the leading fragment carries the sign bit which must be flipped back
fn read_extra_fragment(
    input: &mut Bytes,
    rev_first_bit: bool,
    len: usize,
    negative: bool,
) -> Result<u32> {
    let frag = match len {
        1 => {
            let mut n = input.read_u8()?;
            if rev_first_bit {
                n ^= 0x80;
            }
            if negative {
                n = !n;
            }
            n as u32
        }
        2 => {
            let mut n = input.read_be_u16()?;
            if rev_first_bit {
                n ^= 0x8000;
            }
            if negative {
                n = !n;
            }
            n as u32
        }
        3 => {
            let mut n = input.read_be_u24()?;
            if rev_first_bit {
                n ^= 0x80_0000;
            }
            if negative {
                n ^= 0xff_ffff;
            }
            n & 0x00ff_ffff
        }
        4 => {
            let mut n = input.read_be_u32()?;
            if rev_first_bit {
                n ^= 0x8000_0000;
            }
            if negative {
                n = !n;
            }
            n
        }
        _ => {
            return Err(Error::ConstraintError(format!(
                "unexpected decimal fragment length {}",
                len
            )))
        }
    };
    Ok(frag)
}

/// read a full 4-byte big-endian word
fn read_fragment(input: &mut Bytes, negative: bool) -> Result<u32> {
    let mut n = input.read_be_u32()?;
    if negative {
        n = !n;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_positive() {
        // 1 234567890 . 1234
        let mut bs = Bytes::from_static(&[0x81, 0x0d, 0xfb, 0x38, 0xd2, 0x04, 0xd2]);
        let d = MyDecimal::read_from(&mut bs, 14, 4).unwrap();
        assert!(!d.negative);
        assert_eq!(vec![1, 234567890, 123400000], d.buf);
        assert_eq!("1234567890.1234", d.to_string());
    }

    #[test]
    fn test_decimal_negative() {
        let mut bs = Bytes::from_static(&[0x7E, 0xF2, 0x04, 0xC7, 0x2D, 0xFB, 0x2D]);
        let d = MyDecimal::read_from(&mut bs, 14, 4).unwrap();
        assert!(d.negative);
        assert_eq!("-1234567890.1234", d.to_string());
    }

    #[test]
    fn test_decimal_trailing_zero_kept() {
        // precision 10 scale 2, value 3.10
        let mut bs = Bytes::from_static(&[0x80, 0x00, 0x00, 0x03, 0x0A]);
        let d = MyDecimal::read_from(&mut bs, 10, 2).unwrap();
        assert_eq!("3.10", d.to_string());
    }

    #[test]
    fn test_decimal_zero() {
        let mut bs = Bytes::from_static(&[0x80, 0x00, 0x00, 0x00, 0x00]);
        let d = MyDecimal::read_from(&mut bs, 10, 2).unwrap();
        assert_eq!("0.00", d.to_string());
    }

    #[test]
    fn test_bin_size_table() {
        assert_eq!(5, MyDecimal::bin_size(10, 2));
        assert_eq!(7, MyDecimal::bin_size(14, 4));
        assert_eq!(1, MyDecimal::bin_size(1, 0));
        assert_eq!(4, MyDecimal::bin_size(9, 0));
        assert_eq!(30, MyDecimal::bin_size(65, 30));
    }

    #[test]
    fn test_decimal_incomplete() {
        let mut bs = Bytes::from_static(&[0x80, 0x00]);
        assert!(MyDecimal::read_from(&mut bs, 10, 2).is_err());
    }
}
