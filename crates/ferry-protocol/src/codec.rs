//! Payload codec for the wire protocol.
//!
//! Every chat message, file payload, and acknowledgement travels as a
//! base64 token so it can cross the newline-delimited transport without
//! embedded line breaks. Encoding and decoding are exactly invertible:
//! `decode(encode(x)) == x` for every byte sequence, including empty and
//! binary input.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Errors produced when a token is not validly encoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The token is not valid base64.
    #[error("invalid encoded payload: {0}")]
    InvalidToken(#[from] base64::DecodeError),
}

/// Encodes raw bytes into a transport-safe token.
///
/// The result never contains `\n`, `\r`, or the frame delimiter `|`.
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes a token back into the original bytes.
pub fn decode(token: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(token)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_text() {
        let original = b"hello, relay";
        let token = encode(original);
        assert_eq!(decode(&token).unwrap(), original);
    }

    #[test]
    fn test_round_trip_empty() {
        let token = encode(b"");
        assert_eq!(token, "");
        assert_eq!(decode(&token).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let original: Vec<u8> = (0u8..=255).collect();
        assert_eq!(decode(&encode(&original)).unwrap(), original);
    }

    #[test]
    fn test_round_trip_multibyte_text() {
        let original = "服务器已收到: héllo ✓".as_bytes();
        assert_eq!(decode(&encode(original)).unwrap(), original);
    }

    #[test]
    fn test_encoded_token_is_line_safe() {
        // Large payloads must stay on one line and avoid the frame delimiter.
        let data = vec![0xABu8; 4096];
        let token = encode(&data);
        assert!(!token.contains('\n'));
        assert!(!token.contains('\r'));
        assert!(!token.contains('|'));
    }

    #[test]
    fn test_decode_rejects_invalid_token() {
        assert!(decode("not base64!!").is_err());
    }

    #[test]
    fn test_decode_rejects_truncated_token() {
        let token = encode(b"some payload");
        assert!(decode(&token[..token.len() - 1]).is_err());
    }
}
