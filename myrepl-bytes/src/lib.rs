//! essential byte parsing for the MySQL wire protocol
//!
//! all sync readers work on a `bytes::Bytes` cursor that is advanced
//! in place, all writers append to a `bytes::BytesMut`
pub mod error;
pub mod future;
pub mod my;
pub mod number;

pub use crate::error::{Error, Needed, Result};
pub use crate::number::{ReadBytesExt, WriteBytesExt};

use bytes::{Bytes, BytesMut};

/// read an object from a byte cursor
pub trait ReadFromBytes
where
    Self: Sized,
{
    fn read_from(input: &mut Bytes) -> Result<Self>;
}

/// read an object from a byte cursor with additional context
pub trait ReadFromBytesWithContext<'c>
where
    Self: Sized,
{
    type Context: 'c;

    fn read_with_ctx(input: &mut Bytes, ctx: Self::Context) -> Result<Self>;
}

/// write an object to a byte buffer, returning the written length
pub trait WriteToBytes {
    fn write_to(self, out: &mut BytesMut) -> Result<usize>;
}

impl WriteToBytes for Bytes {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let len = self.len();
        out.extend_from_slice(self.as_ref());
        Ok(len)
    }
}

impl WriteToBytes for &[u8] {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        out.extend_from_slice(self);
        Ok(self.len())
    }
}
