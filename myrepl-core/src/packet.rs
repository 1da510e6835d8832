use crate::error::{Error, Result};
use crate::flag::{CapabilityFlags, StatusFlags};
use crate::handshake::{AuthMoreData, AuthSwitchRequest};
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::my::{LenEncInt, ReadMyEnc};
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, ReadFromBytesWithContext, WriteBytesExt, WriteToBytes};

/// maximum payload of a single packet, larger messages are fragmented
pub const MAX_PAYLOAD_LEN: usize = 0xff_ffff;

/// MySQL packet frame: 3-byte little-endian length, 1-byte sequence, payload
///
/// reference: https://dev.mysql.com/doc/internals/en/mysql-packet.html
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload_len: u32,
    pub seq_id: u8,
    pub payload: Bytes,
}

impl ReadFromBytes for Packet {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let payload_len = input.read_le_u24()?;
        let seq_id = input.read_u8()?;
        let payload = input.read_len(payload_len as usize)?;
        Ok(Packet {
            payload_len,
            seq_id,
            payload,
        })
    }
}

impl WriteToBytes for Packet {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_le_u24(self.payload.len() as u32)?;
        len += out.write_u8(self.seq_id)?;
        len += out.write_bytes(self.payload.as_ref())?;
        Ok(len)
    }
}

/// Ok packet
///
/// reference: https://dev.mysql.com/doc/internals/en/packet-OK_Packet.html
#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub header: u8,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    // if PROTOCOL_41 or TRANSACTIONS enabled
    pub status_flags: StatusFlags,
    // if PROTOCOL_41 enabled
    pub warnings: u16,
    // len-enc-str if SESSION_TRACK, EOF-terminated otherwise
    pub info: Bytes,
    // if SESSION_TRACK and SESSION_STATE_CHANGED enabled
    pub session_state_changes: Bytes,
}

impl<'c> ReadFromBytesWithContext<'c> for OkPacket {
    type Context = &'c CapabilityFlags;

    fn read_with_ctx(input: &mut Bytes, cap_flags: Self::Context) -> myrepl_bytes::error::Result<Self> {
        use myrepl_bytes::error::Error as PError;

        let header = input.read_u8()?;
        let affected_rows = input
            .read_len_enc_int()?
            .to_u64()
            .ok_or_else(|| PError::ConstraintError("invalid affected rows".to_owned()))?;
        let last_insert_id = input
            .read_len_enc_int()?
            .to_u64()
            .ok_or_else(|| PError::ConstraintError("invalid last insert id".to_owned()))?;
        let status_flags = if cap_flags.contains(CapabilityFlags::PROTOCOL_41)
            || cap_flags.contains(CapabilityFlags::TRANSACTIONS)
        {
            StatusFlags::from_bits_truncate(input.read_le_u16()?)
        } else {
            StatusFlags::empty()
        };
        let warnings = if cap_flags.contains(CapabilityFlags::PROTOCOL_41) {
            input.read_le_u16()?
        } else {
            0
        };
        let info = if cap_flags.contains(CapabilityFlags::SESSION_TRACK) && input.has_remaining() {
            input
                .read_len_enc_str()?
                .into_bytes()
                .ok_or_else(|| PError::ConstraintError("invalid info".to_owned()))?
        } else {
            input.split_to(input.remaining())
        };
        let session_state_changes = if cap_flags.contains(CapabilityFlags::SESSION_TRACK)
            && status_flags.contains(StatusFlags::SESSION_STATE_CHANGED)
        {
            input
                .read_len_enc_str()?
                .into_bytes()
                .ok_or_else(|| PError::ConstraintError("invalid session state changes".to_owned()))?
        } else {
            Bytes::new()
        };
        Ok(OkPacket {
            header,
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
            session_state_changes,
        })
    }
}

impl<'c> WriteToBytesWithContext<'c> for OkPacket {
    type Context = &'c CapabilityFlags;

    fn write_with_ctx(self, out: &mut BytesMut, cap_flags: Self::Context) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.header)?;
        len += LenEncInt::from(self.affected_rows).write_to(out)?;
        len += LenEncInt::from(self.last_insert_id).write_to(out)?;
        if cap_flags.contains(CapabilityFlags::PROTOCOL_41)
            || cap_flags.contains(CapabilityFlags::TRANSACTIONS)
        {
            len += out.write_le_u16(self.status_flags.bits())?;
        }
        if cap_flags.contains(CapabilityFlags::PROTOCOL_41) {
            len += out.write_le_u16(self.warnings)?;
        }
        len += out.write_bytes(self.info.as_ref())?;
        Ok(len)
    }
}

/// write an object whose layout depends on negotiated capabilities
pub trait WriteToBytesWithContext<'c> {
    type Context: 'c;

    fn write_with_ctx(self, out: &mut BytesMut, ctx: Self::Context) -> myrepl_bytes::error::Result<usize>;
}

/// Err packet
///
/// reference: https://dev.mysql.com/doc/internals/en/packet-ERR_Packet.html
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub header: u8,
    pub error_code: u16,
    // if PROTOCOL_41 enabled: string[1]
    pub sql_state_marker: u8,
    // if PROTOCOL_41 enabled: string[5]
    pub sql_state: Bytes,
    // EOF-terminated string
    pub error_message: Bytes,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, error_message: String) -> Self {
        ErrPacket {
            header: 0xff,
            error_code,
            sql_state_marker: b'#',
            sql_state: Bytes::copy_from_slice(sql_state.as_bytes()),
            error_message: Bytes::from(error_message.into_bytes()),
        }
    }
}

impl<'c> ReadFromBytesWithContext<'c> for ErrPacket {
    // the bool tells whether the sql state is present (command phase)
    type Context = (&'c CapabilityFlags, bool);

    fn read_with_ctx(
        input: &mut Bytes,
        (cap_flags, sql): Self::Context,
    ) -> myrepl_bytes::error::Result<Self> {
        let header = input.read_u8()?;
        let error_code = input.read_le_u16()?;
        let (sql_state_marker, sql_state) =
            if sql && cap_flags.contains(CapabilityFlags::PROTOCOL_41) {
                (input.read_u8()?, input.read_len(5)?)
            } else {
                (0u8, Bytes::new())
            };
        let error_message = input.split_to(input.remaining());
        Ok(ErrPacket {
            header,
            error_code,
            sql_state_marker,
            sql_state,
            error_message,
        })
    }
}

impl<'c> WriteToBytesWithContext<'c> for ErrPacket {
    type Context = &'c CapabilityFlags;

    fn write_with_ctx(self, out: &mut BytesMut, cap_flags: Self::Context) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.header)?;
        len += out.write_le_u16(self.error_code)?;
        if cap_flags.contains(CapabilityFlags::PROTOCOL_41) {
            len += out.write_u8(self.sql_state_marker)?;
            len += out.write_bytes(self.sql_state.as_ref())?;
        }
        len += out.write_bytes(self.error_message.as_ref())?;
        Ok(len)
    }
}

impl From<&ErrPacket> for Error {
    fn from(err: &ErrPacket) -> Self {
        Error::Server {
            code: err.error_code,
            sqlstate: String::from_utf8_lossy(err.sql_state.as_ref()).into_owned(),
            message: String::from_utf8_lossy(err.error_message.as_ref()).into_owned(),
        }
    }
}

/// Eof packet, only sent when DEPRECATE_EOF is off
///
/// reference: https://dev.mysql.com/doc/internals/en/packet-EOF_Packet.html
#[derive(Debug, Clone)]
pub struct EofPacket {
    pub header: u8,
    pub warnings: u16,
    pub status_flags: StatusFlags,
}

impl EofPacket {
    pub fn new(status_flags: StatusFlags) -> Self {
        EofPacket {
            header: 0xfe,
            warnings: 0,
            status_flags,
        }
    }
}

impl<'c> ReadFromBytesWithContext<'c> for EofPacket {
    type Context = &'c CapabilityFlags;

    fn read_with_ctx(input: &mut Bytes, cap_flags: Self::Context) -> myrepl_bytes::error::Result<Self> {
        let header = input.read_u8()?;
        let (warnings, status_flags) = if cap_flags.contains(CapabilityFlags::PROTOCOL_41) {
            let warnings = input.read_le_u16()?;
            let status_flags = StatusFlags::from_bits_truncate(input.read_le_u16()?);
            (warnings, status_flags)
        } else {
            (0, StatusFlags::empty())
        };
        Ok(EofPacket {
            header,
            warnings,
            status_flags,
        })
    }
}

impl<'c> WriteToBytesWithContext<'c> for EofPacket {
    type Context = &'c CapabilityFlags;

    fn write_with_ctx(self, out: &mut BytesMut, cap_flags: Self::Context) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_u8(self.header)?;
        if cap_flags.contains(CapabilityFlags::PROTOCOL_41) {
            len += out.write_le_u16(self.warnings)?;
            len += out.write_le_u16(self.status_flags.bits())?;
        }
        Ok(len)
    }
}

/// a generic command response
#[derive(Debug, Clone)]
pub enum Message {
    Ok(OkPacket),
    Err(ErrPacket),
    Eof(EofPacket),
}

impl Message {
    /// convert ERR to the crate error, EOF is rejected
    pub fn into_ok(self) -> Result<OkPacket> {
        match self {
            Message::Ok(ok) => Ok(ok),
            Message::Err(err) => Err(Error::from(&err)),
            Message::Eof(_) => Err(Error::Protocol("unexpected EOF packet".to_owned())),
        }
    }
}

impl<'c> ReadFromBytesWithContext<'c> for Message {
    type Context = &'c CapabilityFlags;

    fn read_with_ctx(input: &mut Bytes, cap_flags: Self::Context) -> myrepl_bytes::error::Result<Self> {
        use myrepl_bytes::error::{Error as PError, Needed};

        if !input.has_remaining() {
            return Err(PError::InputIncomplete(Bytes::new(), Needed::Unknown));
        }
        match input[0] {
            0x00 => Ok(Message::Ok(OkPacket::read_with_ctx(input, cap_flags)?)),
            0xff => Ok(Message::Err(ErrPacket::read_with_ctx(
                input,
                (cap_flags, true),
            )?)),
            // EOF packets are at most 9 bytes, longer 0xfe payloads
            // are length-encoded integers or auth switch requests
            0xfe if input.remaining() < 9 => {
                Ok(Message::Eof(EofPacket::read_with_ctx(input, cap_flags)?))
            }
            c => Err(PError::ConstraintError(format!(
                "invalid message header {:#04x}",
                c
            ))),
        }
    }
}

/// a response during the connection phase
#[derive(Debug, Clone)]
pub enum HandshakeMessage {
    Ok(OkPacket),
    Err(ErrPacket),
    Switch(AuthSwitchRequest),
    More(AuthMoreData),
}

impl<'c> ReadFromBytesWithContext<'c> for HandshakeMessage {
    type Context = &'c CapabilityFlags;

    fn read_with_ctx(input: &mut Bytes, cap_flags: Self::Context) -> myrepl_bytes::error::Result<Self> {
        use myrepl_bytes::error::{Error as PError, Needed};

        if !input.has_remaining() {
            return Err(PError::InputIncomplete(Bytes::new(), Needed::Unknown));
        }
        match input[0] {
            0x00 => Ok(HandshakeMessage::Ok(OkPacket::read_with_ctx(
                input, cap_flags,
            )?)),
            0xff => Ok(HandshakeMessage::Err(ErrPacket::read_with_ctx(
                input,
                (cap_flags, false),
            )?)),
            0xfe => Ok(HandshakeMessage::Switch(AuthSwitchRequest::read_from(
                input,
            )?)),
            0x01 => Ok(HandshakeMessage::More(AuthMoreData::read_from(input)?)),
            c => Err(PError::ConstraintError(format!(
                "invalid handshake message header {:#04x}",
                c
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_roundtrip() {
        let pkt = Packet {
            payload_len: 5,
            seq_id: 2,
            payload: Bytes::from_static(b"hello"),
        };
        let mut buf = BytesMut::new();
        pkt.write_to(&mut buf).unwrap();
        assert_eq!(&[0x05, 0x00, 0x00, 0x02][..], &buf[..4]);
        let decoded = Packet::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(5, decoded.payload_len);
        assert_eq!(2, decoded.seq_id);
        assert_eq!(&b"hello"[..], decoded.payload.as_ref());
    }

    #[test]
    fn test_ok_packet() {
        let mut input = Bytes::from_static(&[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]);
        let ok = OkPacket::read_with_ctx(&mut input, &CapabilityFlags::PROTOCOL_41).unwrap();
        assert_eq!(0, ok.affected_rows);
        assert!(ok.status_flags.contains(StatusFlags::STATUS_AUTOCOMMIT));
    }

    #[test]
    fn test_err_packet() {
        let mut buf = BytesMut::new();
        let err = ErrPacket::new(1236, "HY000", "Could not find first log file name".to_owned());
        err.write_with_ctx(&mut buf, &CapabilityFlags::PROTOCOL_41)
            .unwrap();
        let decoded =
            ErrPacket::read_with_ctx(&mut buf.freeze(), (&CapabilityFlags::PROTOCOL_41, true))
                .unwrap();
        assert_eq!(1236, decoded.error_code);
        assert_eq!(&b"HY000"[..], decoded.sql_state.as_ref());
        let e = Error::from(&decoded);
        match e {
            Error::Server { code, .. } => assert_eq!(1236, code),
            _ => panic!("expected server error"),
        }
    }

    #[test]
    fn test_message_dispatch() {
        let mut input = Bytes::from_static(&[0xfe, 0x00, 0x00, 0x02, 0x00]);
        match Message::read_with_ctx(&mut input, &CapabilityFlags::PROTOCOL_41).unwrap() {
            Message::Eof(eof) => {
                assert!(eof.status_flags.contains(StatusFlags::STATUS_AUTOCOMMIT))
            }
            other => panic!("expected eof, got {:?}", other),
        }
    }
}
