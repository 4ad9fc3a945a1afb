//! Line framing: wire lines to and from typed requests, responses, pushes.
//!
//! Every transport line is either `TAG|field|...` or a bare encoded token
//! (the legacy chat form). Recognized client-to-server tags are
//! `VERSION_CHECK` and `FILE`; anything else is treated as a chat message
//! and decoded. `FILE|name|payload` splits on the first two `|` only, so
//! the encoded payload may contain arbitrary content; filenames must not
//! contain `|` (a protocol constraint the framer does not enforce).
//!
//! Parsing is pure: a line maps to `Result<Request, FrameError>` and never
//! panics. `FrameError::Decode` is answered on the wire with
//! `Response::DecodeError`; `FrameError::MalformedFrame` is logged by the
//! session and the request dropped.

use crate::codec::{self, DecodeError};
use thiserror::Error;

pub const TAG_VERSION_CHECK: &str = "VERSION_CHECK";
pub const TAG_FILE: &str = "FILE";
pub const TAG_NEED_UPDATE: &str = "NEED_UPDATE";
pub const TAG_CURRENT_VERSION: &str = "CURRENT_VERSION";

/// Field separator within a tagged line.
pub const DELIMITER: char = '|';

/// Ack text sent when a payload fails to decode.
pub const DECODE_ERROR_ACK: &str = "decode failed: payload is not valid base64";

/// A framed client-to-server request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `VERSION_CHECK|<version>` - the version string is passed through
    /// raw; negotiation parses it and fails closed on malformed input.
    VersionCheck { version: String },
    /// `FILE|<filename>|<encoded-payload>` with the payload decoded.
    FileUpload { filename: String, payload: Vec<u8> },
    /// A bare encoded token: chat text (decoded, lossy UTF-8).
    TextMessage { text: String },
}

/// A framed server-to-client response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `NEED_UPDATE|<version>|<url>` - the url is the opaque download
    /// location supplied by server configuration.
    UpdateAvailable {
        version: String,
        download_url: String,
    },
    /// `CURRENT_VERSION` - the client's release is new enough.
    UpToDate,
    /// An encoded acknowledgement or echo.
    Ack { text: String },
    /// An encoded "could not decode your payload" acknowledgement.
    DecodeError,
}

/// A server line as classified by the client's background reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    UpdateAvailable { version: String, url: String },
    UpToDate,
    /// Decoded chat text, acks, and broadcasts.
    Message { text: String },
    /// A line that matched no tag and did not decode; surfaced verbatim.
    Raw { line: String },
}

/// Errors surfaced while parsing an incoming line.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The payload token was not validly encoded. Answered with
    /// `Response::DecodeError`; the connection stays open.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The line had a recognized tag but the wrong field count. Logged
    /// and dropped; the connection stays open.
    #[error("malformed {tag} frame: missing field")]
    MalformedFrame { tag: &'static str },
}

/// Parses one transport line into a typed request.
pub fn parse_request(line: &str) -> Result<Request, FrameError> {
    if let Some(version) = line.strip_prefix(TAG_VERSION_CHECK) {
        if let Some(version) = version.strip_prefix(DELIMITER) {
            return Ok(Request::VersionCheck {
                version: version.to_string(),
            });
        }
    }

    if let Some(rest) = line.strip_prefix(TAG_FILE) {
        if let Some(rest) = rest.strip_prefix(DELIMITER) {
            let (filename, token) = rest
                .split_once(DELIMITER)
                .ok_or(FrameError::MalformedFrame { tag: TAG_FILE })?;
            let payload = codec::decode(token)?;
            return Ok(Request::FileUpload {
                filename: filename.to_string(),
                payload,
            });
        }
    }

    let bytes = codec::decode(line)?;
    Ok(Request::TextMessage {
        text: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

/// Renders a request into its wire line (no trailing newline).
pub fn render_request(request: &Request) -> String {
    match request {
        Request::VersionCheck { version } => {
            format!("{TAG_VERSION_CHECK}{DELIMITER}{version}")
        }
        Request::FileUpload { filename, payload } => {
            format!(
                "{TAG_FILE}{DELIMITER}{filename}{DELIMITER}{}",
                codec::encode(payload)
            )
        }
        Request::TextMessage { text } => codec::encode(text.as_bytes()),
    }
}

/// Renders a response into its wire line (no trailing newline).
pub fn render_response(response: &Response) -> String {
    match response {
        Response::UpdateAvailable {
            version,
            download_url,
        } => format!("{TAG_NEED_UPDATE}{DELIMITER}{version}{DELIMITER}{download_url}"),
        Response::UpToDate => TAG_CURRENT_VERSION.to_string(),
        Response::Ack { text } => codec::encode(text.as_bytes()),
        Response::DecodeError => codec::encode(DECODE_ERROR_ACK.as_bytes()),
    }
}

/// Classifies a server line on the client side.
///
/// Never fails: a line that matches no tag and does not decode comes back
/// as `Push::Raw` so the caller can still surface it.
pub fn parse_push(line: &str) -> Push {
    if let Some(rest) = line.strip_prefix(TAG_NEED_UPDATE) {
        if let Some(rest) = rest.strip_prefix(DELIMITER) {
            if let Some((version, url)) = rest.split_once(DELIMITER) {
                return Push::UpdateAvailable {
                    version: version.to_string(),
                    url: url.to_string(),
                };
            }
        }
        return Push::Raw {
            line: line.to_string(),
        };
    }

    if line == TAG_CURRENT_VERSION {
        return Push::UpToDate;
    }

    match codec::decode(line) {
        Ok(bytes) => Push::Message {
            text: String::from_utf8_lossy(&bytes).into_owned(),
        },
        Err(_) => Push::Raw {
            line: line.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_check() {
        let request = parse_request("VERSION_CHECK|1.0").unwrap();
        assert_eq!(
            request,
            Request::VersionCheck {
                version: "1.0".to_string()
            }
        );
    }

    #[test]
    fn test_parse_version_check_passes_junk_through() {
        // Malformed versions are the negotiator's problem, not the framer's.
        let request = parse_request("VERSION_CHECK|not-a-version").unwrap();
        assert_eq!(
            request,
            Request::VersionCheck {
                version: "not-a-version".to_string()
            }
        );
    }

    #[test]
    fn test_parse_file_upload() {
        let line = format!("FILE|report.txt|{}", codec::encode(b"hi"));
        let request = parse_request(&line).unwrap();
        assert_eq!(
            request,
            Request::FileUpload {
                filename: "report.txt".to_string(),
                payload: b"hi".to_vec(),
            }
        );
    }

    #[test]
    fn test_parse_file_splits_first_two_delimiters_only() {
        // A stray delimiter inside the payload field makes the token
        // invalid base64, which is a decode error, not a field miscount.
        let result = parse_request("FILE|a.txt|aGk=|trailing");
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_parse_file_missing_payload_is_malformed() {
        let result = parse_request("FILE|only-a-name");
        assert!(matches!(
            result,
            Err(FrameError::MalformedFrame { tag: "FILE" })
        ));
    }

    #[test]
    fn test_parse_file_empty_payload() {
        let request = parse_request("FILE|empty.bin|").unwrap();
        assert_eq!(
            request,
            Request::FileUpload {
                filename: "empty.bin".to_string(),
                payload: Vec::new(),
            }
        );
    }

    #[test]
    fn test_parse_file_bad_token_is_decode_error() {
        let result = parse_request("FILE|a.txt|###");
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_parse_bare_token_is_text() {
        let line = codec::encode("hello there".as_bytes());
        let request = parse_request(&line).unwrap();
        assert_eq!(
            request,
            Request::TextMessage {
                text: "hello there".to_string()
            }
        );
    }

    #[test]
    fn test_parse_unrecognized_garbage_is_decode_error() {
        let result = parse_request("definitely not base64 !!!");
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_tag_without_delimiter_falls_through_to_text() {
        // "FILE" alone has no delimiter, so it is tried as a chat token.
        // It happens to be four base64 alphabet characters, so it decodes.
        let result = parse_request("FILE");
        assert!(matches!(result, Ok(Request::TextMessage { .. })));

        // "VERSION_CHECK" contains '_', which no base64 standard-alphabet
        // token can, so the same fall-through ends in a decode error.
        let result = parse_request("VERSION_CHECK");
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }

    #[test]
    fn test_request_render_parse_round_trip() {
        let requests = vec![
            Request::VersionCheck {
                version: "2.7".to_string(),
            },
            Request::FileUpload {
                filename: "archive with spaces.tar".to_string(),
                payload: vec![0, 159, 146, 150],
            },
            Request::TextMessage {
                text: "多字节 text ✓".to_string(),
            },
        ];
        for request in requests {
            let line = render_request(&request);
            assert!(!line.contains('\n'));
            assert_eq!(parse_request(&line).unwrap(), request);
        }
    }

    #[test]
    fn test_render_update_available() {
        let response = Response::UpdateAvailable {
            version: "1.1".to_string(),
            download_url: "http://host/download/client.jar".to_string(),
        };
        assert_eq!(
            render_response(&response),
            "NEED_UPDATE|1.1|http://host/download/client.jar"
        );
    }

    #[test]
    fn test_render_up_to_date() {
        assert_eq!(render_response(&Response::UpToDate), "CURRENT_VERSION");
    }

    #[test]
    fn test_render_ack_is_encoded() {
        let rendered = render_response(&Response::Ack {
            text: "received: report.txt".to_string(),
        });
        assert_eq!(
            codec::decode(&rendered).unwrap(),
            b"received: report.txt".to_vec()
        );
    }

    #[test]
    fn test_render_decode_error_is_encoded_ack() {
        let rendered = render_response(&Response::DecodeError);
        let decoded = codec::decode(&rendered).unwrap();
        assert_eq!(String::from_utf8_lossy(&decoded), DECODE_ERROR_ACK);
    }

    #[test]
    fn test_push_update_available() {
        let push = parse_push("NEED_UPDATE|1.1|http://host/download/client.jar");
        assert_eq!(
            push,
            Push::UpdateAvailable {
                version: "1.1".to_string(),
                url: "http://host/download/client.jar".to_string(),
            }
        );
    }

    #[test]
    fn test_push_url_may_contain_delimiters_after_version() {
        // Only the first two delimiters split; the url keeps the rest.
        let push = parse_push("NEED_UPDATE|1.1|http://host/a|b");
        assert_eq!(
            push,
            Push::UpdateAvailable {
                version: "1.1".to_string(),
                url: "http://host/a|b".to_string(),
            }
        );
    }

    #[test]
    fn test_push_up_to_date() {
        assert_eq!(parse_push("CURRENT_VERSION"), Push::UpToDate);
    }

    #[test]
    fn test_push_message() {
        let line = codec::encode("broadcast from server".as_bytes());
        assert_eq!(
            parse_push(&line),
            Push::Message {
                text: "broadcast from server".to_string()
            }
        );
    }

    #[test]
    fn test_push_undecodable_line_is_raw() {
        assert_eq!(
            parse_push("%% nonsense %%"),
            Push::Raw {
                line: "%% nonsense %%".to_string()
            }
        );
    }

    #[test]
    fn test_push_truncated_need_update_is_raw() {
        assert_eq!(
            parse_push("NEED_UPDATE|1.1"),
            Push::Raw {
                line: "NEED_UPDATE|1.1".to_string()
            }
        );
    }
}
