use crate::flag::CapabilityFlags;
use bytes::{Buf, Bytes, BytesMut};
use myrepl_bytes::error::{Error, Result};
use myrepl_bytes::my::LenEncInt;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};

/// initial handshake sent by the server (Handshake10)
///
/// reference: https://dev.mysql.com/doc/internals/en/connection-phase-packets.html
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: Bytes,
    pub connection_id: u32,
    pub auth_plugin_data_1: Bytes,
    // filler 0x00
    pub charset: u8,
    pub status_flags: u16,
    // lower and upper halves combined
    pub capability_flags: u32,
    pub auth_plugin_data_length: u8,
    // reserved 10 bytes
    pub auth_plugin_data_2: Bytes,
    pub auth_plugin_name: Bytes,
}

impl InitialHandshake {
    /// the scramble is part 1 and part 2 concatenated, without the
    /// trailing NUL some servers append
    pub fn seed(&self) -> Vec<u8> {
        let mut seed = Vec::with_capacity(20);
        seed.extend_from_slice(self.auth_plugin_data_1.as_ref());
        seed.extend_from_slice(self.auth_plugin_data_2.as_ref());
        if let Some(0x00) = seed.last() {
            seed.pop();
        }
        seed
    }

    pub fn plugin_name(&self) -> String {
        String::from_utf8_lossy(self.auth_plugin_name.as_ref()).into_owned()
    }
}

impl ReadFromBytes for InitialHandshake {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let protocol_version = input.read_u8()?;
        let server_version = input.read_until(0, false)?;
        let connection_id = input.read_le_u32()?;
        let auth_plugin_data_1 = input.read_len(8)?;
        input.read_len(1)?;
        let capability_flags_lower = input.read_le_u16()?;
        let charset = input.read_u8()?;
        let status_flags = input.read_le_u16()?;
        let capability_flags_upper = input.read_le_u16()?;
        let auth_plugin_data_length = input.read_u8()?;
        input.read_len(10)?;
        let capability_flags =
            (capability_flags_lower as u32) | ((capability_flags_upper as u32) << 16);
        let cap_flags = CapabilityFlags::from_bits_truncate(capability_flags);
        let auth_plugin_data_2 = if cap_flags.contains(CapabilityFlags::SECURE_CONNECTION) {
            let len = std::cmp::max(13, auth_plugin_data_length.saturating_sub(8));
            input.read_len(len as usize)?
        } else {
            Bytes::new()
        };
        let auth_plugin_name = if cap_flags.contains(CapabilityFlags::PLUGIN_AUTH) {
            input.read_until(0, false)?
        } else {
            Bytes::new()
        };
        Ok(InitialHandshake {
            protocol_version,
            server_version,
            connection_id,
            auth_plugin_data_1,
            charset,
            status_flags,
            capability_flags,
            auth_plugin_data_length,
            auth_plugin_data_2,
            auth_plugin_name,
        })
    }
}

impl WriteToBytes for InitialHandshake {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let cap_flags = CapabilityFlags::from_bits_truncate(self.capability_flags);
        let mut len = 0;
        len += out.write_u8(self.protocol_version)?;
        len += out.write_bytes(self.server_version.as_ref())?;
        len += out.write_u8(0)?;
        len += out.write_le_u32(self.connection_id)?;
        len += out.write_bytes(self.auth_plugin_data_1.as_ref())?;
        len += out.write_u8(0)?;
        len += out.write_le_u16((self.capability_flags & 0xffff) as u16)?;
        len += out.write_u8(self.charset)?;
        len += out.write_le_u16(self.status_flags)?;
        len += out.write_le_u16((self.capability_flags >> 16) as u16)?;
        len += out.write_u8(self.auth_plugin_data_length)?;
        len += out.write_bytes(&[0u8; 10])?;
        if cap_flags.contains(CapabilityFlags::SECURE_CONNECTION) {
            len += out.write_bytes(self.auth_plugin_data_2.as_ref())?;
        }
        if cap_flags.contains(CapabilityFlags::PLUGIN_AUTH) {
            len += out.write_bytes(self.auth_plugin_name.as_ref())?;
            len += out.write_u8(0)?;
        }
        Ok(len)
    }
}

/// handshake response of client protocol 41
#[derive(Debug, Clone)]
pub struct HandshakeClientResponse41 {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    // 23 bytes of 0x00, reserved
    pub username: String,
    pub auth_response: Vec<u8>,
    // not empty if db is specified
    pub database: String,
    // not empty if plugin auth
    pub auth_plugin_name: String,
    pub connect_attrs: Vec<ConnectAttr>,
}

impl Default for HandshakeClientResponse41 {
    fn default() -> Self {
        HandshakeClientResponse41 {
            capability_flags: CapabilityFlags::default(),
            max_packet_size: 0xff_ffff,
            // utf8mb4_general_ci
            charset: 45,
            username: String::new(),
            auth_response: Vec::new(),
            database: String::new(),
            auth_plugin_name: String::new(),
            connect_attrs: Vec::new(),
        }
    }
}

impl WriteToBytes for HandshakeClientResponse41 {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let mut len = 0;
        len += out.write_le_u32(self.capability_flags.bits())?;
        len += out.write_le_u32(self.max_packet_size)?;
        len += out.write_u8(self.charset)?;
        len += out.write_bytes(&[0u8; 23])?;
        len += out.write_bytes(self.username.as_bytes())?;
        len += out.write_u8(0)?;
        if self
            .capability_flags
            .contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA)
        {
            len += LenEncInt::from(self.auth_response.len() as u64).write_to(out)?;
            len += out.write_bytes(&self.auth_response)?;
        } else {
            len += out.write_u8(self.auth_response.len() as u8)?;
            len += out.write_bytes(&self.auth_response)?;
        }
        if self
            .capability_flags
            .contains(CapabilityFlags::CONNECT_WITH_DB)
        {
            len += out.write_bytes(self.database.as_bytes())?;
            len += out.write_u8(0)?;
        }
        if self.capability_flags.contains(CapabilityFlags::PLUGIN_AUTH) {
            len += out.write_bytes(self.auth_plugin_name.as_bytes())?;
            len += out.write_u8(0)?;
        }
        if self
            .capability_flags
            .contains(CapabilityFlags::CONNECT_ATTRS)
        {
            let mut attrs = BytesMut::new();
            for attr in &self.connect_attrs {
                LenEncInt::from(attr.key.len() as u64).write_to(&mut attrs)?;
                attrs.write_bytes(attr.key.as_bytes())?;
                LenEncInt::from(attr.value.len() as u64).write_to(&mut attrs)?;
                attrs.write_bytes(attr.value.as_bytes())?;
            }
            len += LenEncInt::from(attrs.len() as u64).write_to(out)?;
            len += out.write_bytes(attrs.as_ref())?;
        }
        Ok(len)
    }
}

/// read side of the client response, used by the server endpoint
impl ReadFromBytes for HandshakeClientResponse41 {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        use myrepl_bytes::my::ReadMyEnc;

        let capability_flags = CapabilityFlags::from_bits_truncate(input.read_le_u32()?);
        let max_packet_size = input.read_le_u32()?;
        let charset = input.read_u8()?;
        input.read_len(23)?;
        let username = String::from_utf8(Vec::from(input.read_until(0, false)?.as_ref()))
            .map_err(|_| Error::ConstraintError("invalid username".to_owned()))?;
        let auth_response = if capability_flags
            .contains(CapabilityFlags::PLUGIN_AUTH_LENENC_CLIENT_DATA)
        {
            let resp = input.read_len_enc_str()?;
            Vec::from(
                resp.into_bytes()
                    .ok_or_else(|| Error::ConstraintError("invalid auth response".to_owned()))?
                    .as_ref(),
            )
        } else {
            let len = input.read_u8()?;
            Vec::from(input.read_len(len as usize)?.as_ref())
        };
        let database = if capability_flags.contains(CapabilityFlags::CONNECT_WITH_DB) {
            String::from_utf8(Vec::from(input.read_until(0, false)?.as_ref()))
                .map_err(|_| Error::ConstraintError("invalid database".to_owned()))?
        } else {
            String::new()
        };
        let auth_plugin_name =
            if capability_flags.contains(CapabilityFlags::PLUGIN_AUTH) && input.has_remaining() {
                String::from_utf8(Vec::from(input.read_until(0, false)?.as_ref()))
                    .map_err(|_| Error::ConstraintError("invalid plugin name".to_owned()))?
            } else {
                String::new()
            };
        Ok(HandshakeClientResponse41 {
            capability_flags,
            max_packet_size,
            charset,
            username,
            auth_response,
            database,
            auth_plugin_name,
            connect_attrs: Vec::new(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConnectAttr {
    pub key: String,
    pub value: String,
}

/// the truncated response sent before upgrading the socket to TLS
///
/// layout equals the first 32 bytes of HandshakeClientResponse41
/// with the SSL capability set
#[derive(Debug, Clone)]
pub struct SslRequest {
    pub capability_flags: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
}

impl SslRequest {
    pub fn new(mut capability_flags: CapabilityFlags, charset: u8) -> Self {
        capability_flags.insert(CapabilityFlags::SSL);
        SslRequest {
            capability_flags,
            max_packet_size: 0xff_ffff,
            charset,
        }
    }
}

impl WriteToBytes for SslRequest {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let mut len = 0;
        len += out.write_le_u32(self.capability_flags.bits())?;
        len += out.write_le_u32(self.max_packet_size)?;
        len += out.write_u8(self.charset)?;
        len += out.write_bytes(&[0u8; 23])?;
        Ok(len)
    }
}

/// server asks the client to redo auth with another plugin
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub header: u8,
    // null terminated string
    pub plugin_name: Bytes,
    // EOF terminated string
    pub auth_plugin_data: Bytes,
}

impl AuthSwitchRequest {
    pub fn plugin_name(&self) -> String {
        String::from_utf8_lossy(self.plugin_name.as_ref()).into_owned()
    }

    /// the fresh scramble, without the trailing NUL
    pub fn seed(&self) -> Vec<u8> {
        let mut seed = Vec::from(self.auth_plugin_data.as_ref());
        if let Some(0x00) = seed.last() {
            seed.pop();
        }
        seed
    }
}

impl ReadFromBytes for AuthSwitchRequest {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let header = input.read_u8()?;
        if header != 0xfe {
            return Err(Error::ConstraintError(format!(
                "message header mismatch: expected=0xfe, actual={:02x}",
                header
            )));
        }
        let plugin_name = input.read_until(0, false)?;
        let auth_plugin_data = input.split_to(input.remaining());
        Ok(AuthSwitchRequest {
            header,
            plugin_name,
            auth_plugin_data,
        })
    }
}

impl WriteToBytes for AuthSwitchRequest {
    fn write_to(self, out: &mut BytesMut) -> Result<usize> {
        let mut len = 0;
        len += out.write_u8(0xfe)?;
        len += out.write_bytes(self.plugin_name.as_ref())?;
        len += out.write_u8(0)?;
        len += out.write_bytes(self.auth_plugin_data.as_ref())?;
        Ok(len)
    }
}

/// extra auth payload, e.g. caching_sha2 state or the RSA public key
#[derive(Debug, Clone)]
pub struct AuthMoreData {
    pub header: u8,
    pub plugin_data: Bytes,
}

impl ReadFromBytes for AuthMoreData {
    fn read_from(input: &mut Bytes) -> Result<Self> {
        let header = input.read_u8()?;
        if header != 0x01 {
            return Err(Error::ConstraintError(format!(
                "message header mismatch: expected=0x01, actual={:02x}",
                header
            )));
        }
        let plugin_data = input.split_to(input.remaining());
        Ok(AuthMoreData {
            header,
            plugin_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_handshake() -> InitialHandshake {
        InitialHandshake {
            protocol_version: 10,
            server_version: Bytes::from_static(b"8.0.33"),
            connection_id: 7,
            auth_plugin_data_1: Bytes::from_static(b"abcdefgh"),
            charset: 45,
            status_flags: 0x0002,
            capability_flags: (CapabilityFlags::default()
                | CapabilityFlags::SECURE_CONNECTION
                | CapabilityFlags::PLUGIN_AUTH)
                .bits(),
            auth_plugin_data_length: 21,
            auth_plugin_data_2: Bytes::from_static(b"ijklmnopqrst\0"),
            auth_plugin_name: Bytes::from_static(b"mysql_native_password"),
        }
    }

    #[test]
    fn test_initial_handshake_roundtrip() {
        let mut buf = BytesMut::new();
        sample_handshake().write_to(&mut buf).unwrap();
        let decoded = InitialHandshake::read_from(&mut buf.freeze()).unwrap();
        assert_eq!(10, decoded.protocol_version);
        assert_eq!(&b"8.0.33"[..], decoded.server_version.as_ref());
        assert_eq!(7, decoded.connection_id);
        assert_eq!(b"abcdefghijklmnopqrst".to_vec(), decoded.seed());
        assert_eq!("mysql_native_password", decoded.plugin_name());
    }

    #[test]
    fn test_client_response_roundtrip() {
        let resp = HandshakeClientResponse41 {
            capability_flags: CapabilityFlags::default() | CapabilityFlags::CONNECT_WITH_DB,
            username: "repl".to_owned(),
            auth_response: vec![0x01, 0x02, 0x03],
            database: "test".to_owned(),
            auth_plugin_name: "mysql_native_password".to_owned(),
            ..Default::default()
        };
        let mut buf = BytesMut::new();
        resp.write_to(&mut buf).unwrap();
        let decoded = HandshakeClientResponse41::read_from(&mut buf.freeze()).unwrap();
        assert_eq!("repl", decoded.username);
        assert_eq!(vec![0x01, 0x02, 0x03], decoded.auth_response);
        assert_eq!("test", decoded.database);
        assert_eq!("mysql_native_password", decoded.auth_plugin_name);
    }

    #[test]
    fn test_auth_switch_roundtrip() {
        let req = AuthSwitchRequest {
            header: 0xfe,
            plugin_name: Bytes::from_static(b"caching_sha2_password"),
            auth_plugin_data: Bytes::from_static(b"01234567890123456789\0"),
        };
        let mut buf = BytesMut::new();
        req.write_to(&mut buf).unwrap();
        let decoded = AuthSwitchRequest::read_from(&mut buf.freeze()).unwrap();
        assert_eq!("caching_sha2_password", decoded.plugin_name());
        assert_eq!(b"01234567890123456789".to_vec(), decoded.seed());
    }

    #[test]
    fn test_ssl_request_is_32_bytes() {
        let req = SslRequest::new(CapabilityFlags::default(), 45);
        assert!(req.capability_flags.contains(CapabilityFlags::SSL));
        let mut buf = BytesMut::new();
        let len = req.write_to(&mut buf).unwrap();
        assert_eq!(32, len);
    }
}
