//! Client side of the MySQL connection phase
//!
//! Monitoring connections only ever act as a client, so this module parses the
//! server greeting, builds the handshake response and decodes ERR packets.

use bytes::{Buf, BufMut, BytesMut};
use sha1::{Digest, Sha1};

use super::packet::{capabilities::*, Packet};

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// MySQL initial handshake packet (server -> client)
#[derive(Debug, Clone)]
pub struct ServerGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capability_flags: u32,
    pub character_set: u8,
    pub scramble: Vec<u8>,
    pub auth_plugin_name: String,
}

impl ServerGreeting {
    /// Parse a protocol v10 greeting
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 32 {
            return None;
        }

        let mut buf = payload;
        let protocol_version = buf.get_u8();

        let nul = buf.iter().position(|&b| b == 0)?;
        let server_version = String::from_utf8_lossy(&buf[..nul]).into_owned();
        buf.advance(nul + 1);

        if buf.remaining() < 4 + 8 + 1 + 2 + 1 + 2 + 2 + 1 + 10 {
            return None;
        }

        let connection_id = buf.get_u32_le();
        let mut scramble = buf[..8].to_vec();
        buf.advance(8);
        buf.advance(1); // filler

        let lower = buf.get_u16_le() as u32;
        let character_set = buf.get_u8();
        let _status_flags = buf.get_u16_le();
        let upper = buf.get_u16_le() as u32;
        let capability_flags = lower | (upper << 16);

        let scramble_len = buf.get_u8() as usize;
        buf.advance(10); // reserved

        if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = std::cmp::max(13, scramble_len.saturating_sub(8)).min(buf.len());
            // Part 2 is NUL-terminated; the terminator is not part of the scramble
            let data_len = buf[..part2_len]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(part2_len);
            scramble.extend_from_slice(&buf[..data_len]);
            buf.advance(part2_len);
        }

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !buf.is_empty() {
            let nul = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            String::from_utf8_lossy(&buf[..nul]).into_owned()
        } else {
            NATIVE_PASSWORD_PLUGIN.to_string()
        };

        Some(Self {
            protocol_version,
            server_version,
            connection_id,
            capability_flags,
            character_set,
            scramble,
            auth_plugin_name,
        })
    }
}

/// Handshake response (client -> server)
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
}

impl HandshakeResponse {
    /// Encode as a protocol 4.1 handshake response using mysql_native_password
    pub fn encode(&self, sequence_id: u8) -> Packet {
        let mut buf = BytesMut::new();

        buf.put_u32_le(self.capability_flags);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.character_set);
        buf.extend_from_slice(&[0u8; 23]);

        buf.extend_from_slice(self.username.as_bytes());
        buf.put_u8(0);

        buf.put_u8(self.auth_response.len() as u8);
        buf.extend_from_slice(&self.auth_response);

        if self.capability_flags & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(db) = &self.database {
                buf.extend_from_slice(db.as_bytes());
            }
            buf.put_u8(0);
        }

        if self.capability_flags & CLIENT_PLUGIN_AUTH != 0 {
            buf.extend_from_slice(NATIVE_PASSWORD_PLUGIN.as_bytes());
            buf.put_u8(0);
        }

        Packet::new(sequence_id, buf.freeze())
    }
}

/// Compute the mysql_native_password scramble response
///
/// `SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))`
pub fn scramble_native_password(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

/// ERR packet sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: u16,
    pub sql_state: String,
    pub message: String,
}

impl ServerError {
    /// Parse an ERR payload (protocol 4.1 layout)
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 3 || payload[0] != 0xFF {
            return None;
        }

        let mut buf = &payload[1..];
        let code = buf.get_u16_le();

        let (sql_state, message) = if buf.first() == Some(&b'#') && buf.len() >= 6 {
            (
                String::from_utf8_lossy(&buf[1..6]).into_owned(),
                String::from_utf8_lossy(&buf[6..]).into_owned(),
            )
        } else {
            ("HY000".to_string(), String::from_utf8_lossy(buf).into_owned())
        };

        Some(Self {
            code,
            sql_state,
            message,
        })
    }

    /// Access-denied style errors (missing grants on the introspection views)
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.code, 1044 | 1045 | 1142 | 1143 | 1227 | 1370)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeting_payload() -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(10);
        buf.extend_from_slice(b"8.0.33\0");
        buf.put_u32_le(42);
        buf.extend_from_slice(b"abcdefgh");
        buf.put_u8(0);
        let caps = MONITOR_CAPABILITIES;
        buf.put_u16_le((caps & 0xFFFF) as u16);
        buf.put_u8(0x21);
        buf.put_u16_le(0x0002);
        buf.put_u16_le((caps >> 16) as u16);
        buf.put_u8(21);
        buf.extend_from_slice(&[0u8; 10]);
        buf.extend_from_slice(b"ijklmnopqrst\0");
        buf.extend_from_slice(b"mysql_native_password\0");
        buf.to_vec()
    }

    #[test]
    fn test_parse_greeting() {
        let greeting = ServerGreeting::parse(&greeting_payload()).unwrap();
        assert_eq!(greeting.protocol_version, 10);
        assert_eq!(greeting.server_version, "8.0.33");
        assert_eq!(greeting.connection_id, 42);
        assert_eq!(greeting.scramble, b"abcdefghijklmnopqrst".to_vec());
        assert_eq!(greeting.auth_plugin_name, NATIVE_PASSWORD_PLUGIN);
    }

    #[test]
    fn test_truncated_greeting_rejected() {
        assert!(ServerGreeting::parse(&greeting_payload()[..20]).is_none());
    }

    #[test]
    fn test_empty_password_sends_empty_response() {
        assert!(scramble_native_password("", b"01234567890123456789").is_empty());
        assert_eq!(
            scramble_native_password("secret", b"01234567890123456789").len(),
            20
        );
    }

    #[test]
    fn test_parse_server_error() {
        let mut payload = vec![0xFF];
        payload.extend_from_slice(&1142u16.to_le_bytes());
        payload.extend_from_slice(b"#42000SELECT command denied");
        let err = ServerError::parse(&payload).unwrap();
        assert_eq!(err.code, 1142);
        assert_eq!(err.sql_state, "42000");
        assert_eq!(err.message, "SELECT command denied");
        assert!(err.is_permission_denied());
    }
}
