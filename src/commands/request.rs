use crate::commands::CommandId;
use crate::framing::Frame;

/// The camera serves HTTP/CGI and the binary protocol on the same port
pub const DEFAULT_CAMERA_PORT: u16 = 88;

const USER_LEN: usize = 64;
const PASS_LEN: usize = 64;

/// Frames the client sends to the camera.
///
/// Layouts are the ones the official plugin uses. Strings are NUL padded to their slot,
/// and truncated if they don't fit (the last byte of a slot always stays NUL).
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Request {
    /// Start the video stream
    VideoOn {
        username: String,
        password: String,
        uid: u32,
    },
    Logoff {
        username: String,
        password: String,
    },
    AudioOn {
        username: String,
        password: String,
    },
    AudioOff {
        username: String,
        password: String,
    },
    /// Same layout as `VideoOn`, the camera accepts it but it's not clear what it does
    VideoOnAlt {
        username: String,
        password: String,
        uid: u32,
    },
    UserPass {
        username: String,
        password: String,
    },
    /// One chunk of raw audio for the camera speaker. This only partially works.
    AudioOut { data: Vec<u8> },
    Login {
        username: String,
        password: String,
        uid: u32,
    },
    /// Keep alive, the camera answers with a `LoginCheckReply`
    LoginCheck { uid: u32 },
}

fn push_padded(buf: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(width - 1);
    buf.extend_from_slice(&bytes[..len]);
    buf.resize(buf.len() + width - len, 0);
}

impl Request {
    pub fn command(&self) -> CommandId {
        match self {
            Request::VideoOn { .. } => CommandId::VideoOn,
            Request::Logoff { .. } => CommandId::Logoff,
            Request::AudioOn { .. } => CommandId::AudioOn,
            Request::AudioOff { .. } => CommandId::AudioOff,
            Request::VideoOnAlt { .. } => CommandId::VideoOnAlt,
            Request::UserPass { .. } => CommandId::UserPass5,
            Request::AudioOut { .. } => CommandId::AudioOut,
            Request::Login { .. } => CommandId::Login,
            Request::LoginCheck { .. } => CommandId::LoginCheck,
        }
    }

    pub(crate) fn to_payload(&self) -> Vec<u8> {
        let mut payload = vec![];
        match self {
            Request::VideoOn {
                username,
                password,
                uid,
            }
            | Request::VideoOnAlt {
                username,
                password,
                uid,
            } => {
                payload.push(0); // Main stream
                push_padded(&mut payload, username, USER_LEN);
                push_padded(&mut payload, password, PASS_LEN);
                payload.extend_from_slice(&uid.to_le_bytes());
                payload.resize(payload.len() + 28, 0);
            }
            Request::Logoff { username, password } => {
                payload.push(0);
                push_padded(&mut payload, username, USER_LEN);
                push_padded(&mut payload, password, PASS_LEN);
            }
            Request::AudioOn { username, password } | Request::AudioOff { username, password } => {
                payload.push(0);
                push_padded(&mut payload, username, USER_LEN);
                push_padded(&mut payload, password, PASS_LEN);
                payload.resize(payload.len() + 32, 0);
            }
            Request::UserPass { username, password } => {
                push_padded(&mut payload, username, USER_LEN);
                push_padded(&mut payload, password, PASS_LEN);
                payload.resize(payload.len() + 32, 0);
            }
            Request::AudioOut { data } => {
                payload.extend_from_slice(&(data.len() as u32).to_le_bytes());
                payload.extend_from_slice(data);
            }
            Request::Login {
                username,
                password,
                uid,
            } => {
                push_padded(&mut payload, username, USER_LEN);
                push_padded(&mut payload, password, PASS_LEN);
                payload.extend_from_slice(&uid.to_le_bytes());
                payload.resize(payload.len() + 32, 0);
            }
            Request::LoginCheck { uid } => payload.extend_from_slice(&uid.to_le_bytes()),
        }
        payload
    }

    /// Splits raw audio into `AudioOut` requests of at most `chunk_size` bytes
    pub fn audio_chunks(audio: &[u8], chunk_size: usize) -> Vec<Request> {
        audio
            .chunks(chunk_size.max(1))
            .map(|c| Request::AudioOut { data: c.to_vec() })
            .collect()
    }
}

impl From<Request> for Frame {
    fn from(req: Request) -> Self {
        Frame::new(req.command(), req.to_payload())
    }
}

impl From<&Request> for Frame {
    fn from(req: &Request) -> Self {
        Frame::new(req.command(), req.to_payload())
    }
}

/// HTTP request that switches the connection over to the binary protocol.
/// Everything the camera sends after this is FOSC frames.
pub fn serverpush_preamble(host: &str, port: u16) -> String {
    format!(
        "SERVERPUSH / HTTP/1.1\r\nHost: {}:{}\r\nAccept:*/*\r\nConnection: Close\r\n\r\n\r\n",
        host, port
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::commands::{CommandRegistry, FieldValue, Outcome};

    fn decoded(req: Request) -> crate::commands::DecodedFields {
        match CommandRegistry::default().dispatch_frame(&Frame::from(req)) {
            Outcome::Decoded(fields) => fields,
            other => panic!("Request didn't decode cleanly: {:?}", other),
        }
    }

    #[test_log::test]
    fn requests_pass_their_own_decoders() {
        let fields = decoded(Request::VideoOn {
            username: "testadmin".into(),
            password: "testpassword".into(),
            uid: 0x52a0_1234,
        });
        assert_eq!(fields.get("uid").and_then(FieldValue::as_int), Some(0x52a0_1234));

        decoded(Request::AudioOn {
            username: "testadmin".into(),
            password: "testpassword".into(),
        });
        decoded(Request::AudioOff {
            username: "a".into(),
            password: "b".into(),
        });
        decoded(Request::UserPass {
            username: "a".into(),
            password: "b".into(),
        });
        let fields = decoded(Request::LoginCheck { uid: 42 });
        assert_eq!(fields.get("uid").and_then(FieldValue::as_int), Some(42));
    }

    #[test]
    fn layout_sizes() {
        let up = |u: &str| (u.to_string(), "pw".to_string());
        let (username, password) = up("admin");
        assert_eq!(
            Frame::from(Request::Logoff {
                username: username.clone(),
                password: password.clone()
            })
            .body
            .len(),
            129
        );
        assert_eq!(
            Frame::from(Request::VideoOnAlt {
                username,
                password,
                uid: 1
            })
            .body
            .len(),
            161
        );
        let frame = Frame::from(Request::AudioOut {
            data: vec![1, 2, 3],
        });
        assert_eq!(frame.command, 6);
        assert_eq!(frame.body, vec![3, 0, 0, 0, 1, 2, 3]);
    }

    #[test]
    fn long_names_are_truncated() {
        let frame = Frame::from(Request::UserPass {
            username: "x".repeat(100),
            password: String::new(),
        });
        assert_eq!(frame.body.len(), 160);
        assert_eq!(frame.body[62], b'x');
        assert_eq!(frame.body[63], 0);
    }

    #[test]
    fn audio_chunking() {
        let chunks = Request::audio_chunks(&[0u8; 2500], 960);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], Request::AudioOut { data: vec![0; 580] });
    }

    #[test]
    fn preamble() {
        assert!(serverpush_preamble("192.168.0.102", DEFAULT_CAMERA_PORT)
            .starts_with("SERVERPUSH / HTTP/1.1\r\nHost: 192.168.0.102:88\r\n"));
    }
}
