//! async counterparts of the fixed-width readers and writers
use crate::error::{Error, Needed, Result};
use bytes::{Bytes, BytesMut};
use futures::io::{AsyncRead, AsyncWrite};
use futures::ready;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::task::{Context, Poll};

macro_rules! read_number_future {
    ($future_name:ident, $ty:ty, $len:expr, $conv:expr) => {
        #[must_use = "futures do nothing unless you `.await` or poll them"]
        pub struct $future_name<'a, R: Unpin + ?Sized> {
            reader: &'a mut R,
            buf: [u8; $len],
            read: usize,
        }

        impl<'a, R: Unpin + ?Sized> $future_name<'a, R> {
            fn new(reader: &'a mut R) -> Self {
                Self {
                    reader,
                    buf: [0u8; $len],
                    read: 0,
                }
            }
        }

        impl<R: AsyncRead + Unpin + ?Sized> Future for $future_name<'_, R> {
            type Output = Result<$ty>;

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let Self { reader, buf, read } = &mut *self;
                let mut reader = Pin::new(reader);
                while *read < $len {
                    match ready!(reader.as_mut().poll_read(cx, &mut buf[*read..])) {
                        Ok(0) => {
                            return Poll::Ready(Err(Error::InputIncomplete(
                                Bytes::new(),
                                Needed::Size($len - *read),
                            )))
                        }
                        Ok(n) => *read += n,
                        Err(ref e) if e.kind() == ErrorKind::Interrupted => (),
                        Err(e) => return Poll::Ready(Err(Error::from(e))),
                    }
                }
                Poll::Ready(Ok($conv(&buf[..])))
            }
        }
    };
}

macro_rules! write_number_future {
    ($future_name:ident, $ty:ty, $len:expr, $conv:expr) => {
        #[must_use = "futures do nothing unless you `.await` or poll them"]
        pub struct $future_name<'a, W: Unpin + ?Sized> {
            writer: &'a mut W,
            buf: [u8; $len],
            written: usize,
        }

        impl<'a, W: Unpin + ?Sized> $future_name<'a, W> {
            fn new(writer: &'a mut W, n: $ty) -> Self {
                Self {
                    writer,
                    buf: $conv(n),
                    written: 0,
                }
            }
        }

        impl<W: AsyncWrite + Unpin + ?Sized> Future for $future_name<'_, W> {
            type Output = Result<()>;

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
                let Self {
                    writer,
                    buf,
                    written,
                } = &mut *self;
                let mut writer = Pin::new(writer);
                while *written < $len {
                    match ready!(writer.as_mut().poll_write(cx, &buf[*written..])) {
                        Ok(0) => return Poll::Ready(Err(Error::OutputUnavailable)),
                        Ok(n) => *written += n,
                        Err(ref e) if e.kind() == ErrorKind::Interrupted => (),
                        Err(e) => return Poll::Ready(Err(Error::from(e))),
                    }
                }
                Poll::Ready(Ok(()))
            }
        }
    };
}

pub trait AsyncReadBytesExt: AsyncRead {
    fn read_u8(&mut self) -> ReadU8Future<Self>
    where
        Self: Unpin,
    {
        ReadU8Future::new(self)
    }

    fn read_le_u16(&mut self) -> ReadLeU16Future<Self>
    where
        Self: Unpin,
    {
        ReadLeU16Future::new(self)
    }

    fn read_le_u24(&mut self) -> ReadLeU24Future<Self>
    where
        Self: Unpin,
    {
        ReadLeU24Future::new(self)
    }

    fn read_le_u32(&mut self) -> ReadLeU32Future<Self>
    where
        Self: Unpin,
    {
        ReadLeU32Future::new(self)
    }

    fn read_le_u64(&mut self) -> ReadLeU64Future<Self>
    where
        Self: Unpin,
    {
        ReadLeU64Future::new(self)
    }

    /// read exactly n bytes into a fresh buffer
    fn read_len(&mut self, n: usize) -> ReadLenFuture<Self>
    where
        Self: Unpin,
    {
        ReadLenFuture { reader: self, n }
    }

    /// read exactly n bytes, appending to out
    fn read_len_out<'a, 'b>(
        &'a mut self,
        n: usize,
        out: &'b mut BytesMut,
    ) -> ReadLenOutFuture<'a, 'b, Self>
    where
        Self: Unpin,
    {
        ReadLenOutFuture {
            reader: self,
            n,
            out,
        }
    }
}

impl<R: AsyncRead + ?Sized> AsyncReadBytesExt for R {}

read_number_future!(ReadU8Future, u8, 1, |bs: &[u8]| bs[0]);

read_number_future!(ReadLeU16Future, u16, 2, |bs: &[u8]| u16::from_le_bytes([
    bs[0], bs[1]
]));

read_number_future!(ReadLeU24Future, u32, 3, |bs: &[u8]| u32::from_le_bytes([
    bs[0], bs[1], bs[2], 0
]));

read_number_future!(ReadLeU32Future, u32, 4, |bs: &[u8]| u32::from_le_bytes([
    bs[0], bs[1], bs[2], bs[3]
]));

read_number_future!(ReadLeU64Future, u64, 8, |bs: &[u8]| {
    let mut b = [0u8; 8];
    b.copy_from_slice(bs);
    u64::from_le_bytes(b)
});

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ReadLenOutFuture<'a, 'b, T: Unpin + ?Sized> {
    reader: &'a mut T,
    n: usize,
    out: &'b mut BytesMut,
}

impl<R: AsyncRead + Unpin + ?Sized> Future for ReadLenOutFuture<'_, '_, R> {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Self { reader, n, out } = &mut *self;
        if *n == 0 {
            return Poll::Ready(Ok(()));
        }
        read_len_out_internal(reader, cx, *n, out)
    }
}

fn read_len_out_internal<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    cx: &mut Context<'_>,
    required: usize,
    out: &mut BytesMut,
) -> Poll<Result<()>> {
    // roll back the resize on pending or error
    struct Guard<'b> {
        out: &'b mut BytesMut,
        len: usize,
    }
    impl Drop for Guard<'_> {
        fn drop(&mut self) {
            self.out.resize(self.len, 0);
        }
    }
    let len = out.len();
    let mut g = Guard { out, len };
    let mut read = 0;
    g.out.resize(g.len + required, 0);
    let mut reader = Pin::new(reader);
    loop {
        match ready!(reader.as_mut().poll_read(cx, &mut g.out[g.len..])) {
            Ok(0) => {
                return Poll::Ready(Err(Error::InputIncomplete(
                    Bytes::new(),
                    Needed::Size(required - read),
                )))
            }
            Ok(n) if read + n == required => {
                g.len += n;
                return Poll::Ready(Ok(()));
            }
            Ok(n) => {
                read += n;
                g.len += n;
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => (),
            Err(e) => return Poll::Ready(Err(Error::from(e))),
        }
    }
}

#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ReadLenFuture<'a, T: Unpin + ?Sized> {
    reader: &'a mut T,
    n: usize,
}

impl<R: AsyncRead + Unpin + ?Sized> Future for ReadLenFuture<'_, R> {
    type Output = Result<Bytes>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Self { reader, n } = &mut *self;
        if *n == 0 {
            return Poll::Ready(Ok(Bytes::new()));
        }
        let mut out = BytesMut::new();
        match ready!(read_len_out_internal(reader, cx, *n, &mut out)) {
            Ok(..) => Poll::Ready(Ok(out.freeze())),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

pub trait AsyncWriteBytesExt: AsyncWrite {
    fn write_u8(&mut self, n: u8) -> WriteU8Future<Self>
    where
        Self: Unpin,
    {
        WriteU8Future::new(self, n)
    }

    fn write_le_u16(&mut self, n: u16) -> WriteLeU16Future<Self>
    where
        Self: Unpin,
    {
        WriteLeU16Future::new(self, n)
    }

    fn write_le_u24(&mut self, n: u32) -> WriteLeU24Future<Self>
    where
        Self: Unpin,
    {
        WriteLeU24Future::new(self, n)
    }

    fn write_le_u32(&mut self, n: u32) -> WriteLeU32Future<Self>
    where
        Self: Unpin,
    {
        WriteLeU32Future::new(self, n)
    }
}

impl<W: AsyncWrite + ?Sized> AsyncWriteBytesExt for W {}

write_number_future!(WriteU8Future, u8, 1, |n: u8| [n]);

write_number_future!(WriteLeU16Future, u16, 2, u16::to_le_bytes);

write_number_future!(WriteLeU24Future, u32, 3, |n: u32| {
    let b = n.to_le_bytes();
    [b[0], b[1], b[2]]
});

write_number_future!(WriteLeU32Future, u32, 4, u32::to_le_bytes);

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_read_numbers() {
        let bs = [0x01u8, 0x02, 0x01, 0x03, 0x02, 0x01];
        let mut reader = &bs[..];
        assert_eq!(0x01, reader.read_u8().await.unwrap());
        assert_eq!(0x0102, reader.read_le_u16().await.unwrap());
        assert_eq!(0x010203, reader.read_le_u24().await.unwrap());
    }

    #[smol_potat::test]
    async fn test_read_incomplete() {
        let bs = [0x01u8, 0x02];
        let mut reader = &bs[..];
        assert!(reader.read_le_u32().await.is_err());
    }

    #[smol_potat::test]
    async fn test_read_len() {
        let bs = [1u8, 2, 3, 4, 5];
        let mut reader = &bs[..];
        let out = reader.read_len(3).await.unwrap();
        assert_eq!(&[1u8, 2, 3][..], out.as_ref());
        let mut reader = &bs[..];
        assert!(reader.read_len(6).await.is_err());
    }

    #[smol_potat::test]
    async fn test_read_len_out() {
        let bs = [1u8, 2, 3, 4, 5];
        let mut reader = &bs[..];
        let mut out = BytesMut::new();
        reader.read_len_out(4, &mut out).await.unwrap();
        assert_eq!(&[1u8, 2, 3, 4][..], out.as_ref());
    }

    #[smol_potat::test]
    async fn test_write_numbers() {
        let mut bs = Vec::new();
        bs.write_u8(0x01).await.unwrap();
        bs.write_le_u16(0xf102).await.unwrap();
        bs.write_le_u24(0x20a133).await.unwrap();
        bs.write_le_u32(0x1324ffb0).await.unwrap();
        assert_eq!(
            vec![0x01, 0x02, 0xf1, 0x33, 0xa1, 0x20, 0xb0, 0xff, 0x24, 0x13],
            bs
        );
    }
}
