//! Shared secret handling and AUTH response checks.

use std::fmt;
use std::str::FromStr;

use crate::core::protocol::device_type::DeviceType;
use crate::core::protocol::frame::Frame;
use crate::error::ProtocolError;

/// Length of the shared secret in hex characters.
pub const KEY_HEX_LEN: usize = 16;

/// Eight-byte pairing key sent in the AUTH request.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_HEX_LEN / 2]);

impl SecretKey {
    /// Parses exactly 16 ASCII hex characters.
    pub fn parse(hex: &str) -> Result<Self, ProtocolError> {
        let hex = hex.trim();
        if hex.len() != KEY_HEX_LEN {
            return Err(ProtocolError::InvalidKey(format!(
                "expected {KEY_HEX_LEN} hex characters, got {}",
                hex.len()
            )));
        }
        if !hex.bytes().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidKey(
                "key contains non-hex characters".into(),
            ));
        }

        let mut bytes = [0u8; KEY_HEX_LEN / 2];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for SecretKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Never print key material into logs.
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(********)")
    }
}

/// Reads the verdict out of an AUTH response for the given family.
pub fn auth_accepted(device_type: DeviceType, frame: &Frame) -> Result<bool, ProtocolError> {
    Ok(frame.token(3)? == device_type.auth_success_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::commands::opcode;

    fn auth_response(code: u8) -> Frame {
        Frame::new(0, opcode::AUTH, vec![code])
    }

    #[test]
    fn parses_sixteen_hex_chars() {
        let key = SecretKey::parse("0123456789abcdef").unwrap();
        assert_eq!(
            key.as_bytes(),
            &[0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]
        );
    }

    #[test]
    fn rejects_wrong_length_or_non_hex() {
        assert!(matches!(
            SecretKey::parse("0123"),
            Err(ProtocolError::InvalidKey(_))
        ));
        assert!(matches!(
            SecretKey::parse("0123456789abcdef00"),
            Err(ProtocolError::InvalidKey(_))
        ));
        assert!(matches!(
            SecretKey::parse("0123456789abcdeg"),
            Err(ProtocolError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_hides_key() {
        let key = SecretKey::parse("ffffffffffffffff").unwrap();
        assert_eq!(format!("{key:?}"), "SecretKey(********)");
    }

    #[test]
    fn auth_verdict_per_family() {
        for code in [0u8, 1, 3, 4, 5] {
            let device_type = DeviceType::from_code(code).unwrap();
            assert!(auth_accepted(device_type, &auth_response(0x01)).unwrap());
            assert!(!auth_accepted(device_type, &auth_response(0x02)).unwrap());
            assert!(!auth_accepted(device_type, &auth_response(0x00)).unwrap());
        }

        assert!(auth_accepted(DeviceType::BacklitKettleB, &auth_response(0x02)).unwrap());
        assert!(!auth_accepted(DeviceType::BacklitKettleB, &auth_response(0x01)).unwrap());
    }

    #[test]
    fn empty_auth_response_is_malformed() {
        let frame = Frame::new(0, opcode::AUTH, vec![]);
        assert!(matches!(
            auth_accepted(DeviceType::Kettle, &frame),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }
}
