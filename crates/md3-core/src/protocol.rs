use crate::value::{TypeTag, Value};
use thiserror::Error;

pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;
pub const DEVICE_NAME: &str = "MD";

const READ: &str = "READ ";
const WRTE: &str = "WRTE ";
const EXEC: &str = "EXEC ";
const LIST: &str = "LIST";
const NAME: &str = "NAME";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame does not start with STX")]
    MissingStart,
    #[error("frame does not end with ETX")]
    MissingEnd,
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame body is not utf-8")]
    InvalidUtf8,
    #[error("unexpected message '{0}'")]
    UnrecognizedMessage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Read { name: String },
    Write { name: String, value: String },
    Exec { command: String, args: Vec<String> },
    List,
    Name,
}

impl Request {
    pub fn parse(body: &str) -> Result<Self, FrameError> {
        if let Some(name) = body.strip_prefix(READ) {
            return Ok(Request::Read {
                name: name.to_string(),
            });
        }
        if let Some(slug) = body.strip_prefix(WRTE) {
            let (name, value) = slug.split_once(' ').unwrap_or((slug, ""));
            return Ok(Request::Write {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        if let Some(slug) = body.strip_prefix(EXEC) {
            let (command, raw_args) = match slug.find([' ', '\t']) {
                Some(idx) => (&slug[..idx], &slug[idx + 1..]),
                None => (slug, ""),
            };
            let raw_args = raw_args.trim();
            let args = if raw_args.is_empty() {
                Vec::new()
            } else {
                raw_args.split('\t').map(str::to_string).collect()
            };
            return Ok(Request::Exec {
                command: command.to_string(),
                args,
            });
        }
        if body.starts_with(LIST) {
            return Ok(Request::List);
        }
        if body.starts_with(NAME) {
            return Ok(Request::Name);
        }
        Err(FrameError::UnrecognizedMessage(body.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Read { .. } => "read",
            Request::Write { .. } => "write",
            Request::Exec { .. } => "exec",
            Request::List => "list",
            Request::Name => "name",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ret(Value),
    Null,
    Err(String),
}

impl Reply {
    pub fn body(&self) -> String {
        match self {
            Reply::Ret(value) => format!("RET:{}", value.encode()),
            Reply::Null => "NULL".to_string(),
            Reply::Err(message) => format!("ERR:{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub value: Value,
    pub timestamp: i64,
    pub type_tag: TypeTag,
}

impl Event {
    pub fn body(&self) -> String {
        format!(
            "EVT:{}\t{}\t{}\t{}",
            self.name,
            self.value.encode(),
            self.timestamp,
            self.type_tag.signature()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Reply(Reply),
    Event(Event),
}

impl Outbound {
    pub fn body(&self) -> String {
        match self {
            Outbound::Reply(reply) => reply.body(),
            Outbound::Event(event) => event.body(),
        }
    }

    pub fn frame(&self) -> Vec<u8> {
        encode_frame(&self.body())
    }
}

pub fn encode_frame(body: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.push(STX);
    frame.extend_from_slice(body.as_bytes());
    frame.push(ETX);
    frame
}

pub fn decode_frame(bytes: &[u8], max_frame_bytes: usize) -> Result<String, FrameError> {
    if bytes.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: bytes.len(),
            max: max_frame_bytes,
        });
    }
    let Some(rest) = bytes.strip_prefix(&[STX]) else {
        return Err(FrameError::MissingStart);
    };
    let Some(body) = rest.strip_suffix(&[ETX]) else {
        return Err(FrameError::MissingEnd);
    };
    String::from_utf8(body.to_vec()).map_err(|_| FrameError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_request_kind() {
        assert_eq!(
            Request::parse("READ OmegaPosition"),
            Ok(Request::Read {
                name: "OmegaPosition".to_string()
            })
        );
        assert_eq!(Request::parse("LIST"), Ok(Request::List));
        assert_eq!(Request::parse("NAME"), Ok(Request::Name));
        assert_eq!(
            Request::parse("EXEC abort "),
            Ok(Request::Exec {
                command: "abort".to_string(),
                args: Vec::new(),
            })
        );
    }

    #[test]
    fn write_splits_on_first_space_only() {
        assert_eq!(
            Request::parse("WRTE Status Moving to load"),
            Ok(Request::Write {
                name: "Status".to_string(),
                value: "Moving to load".to_string(),
            })
        );
        assert_eq!(
            Request::parse("WRTE FastShutterIsOpen"),
            Ok(Request::Write {
                name: "FastShutterIsOpen".to_string(),
                value: String::new(),
            })
        );
    }

    #[test]
    fn exec_arguments_are_tab_separated() {
        assert_eq!(
            Request::parse("EXEC startScanEx 1\t0.0\t6.0\t0.5\t1"),
            Ok(Request::Exec {
                command: "startScanEx".to_string(),
                args: vec!["1", "0.0", "6.0", "0.5", "1"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            })
        );
        assert_eq!(
            Request::parse("EXEC setBeamstopPosition\tBEAM"),
            Ok(Request::Exec {
                command: "setBeamstopPosition".to_string(),
                args: vec!["BEAM".to_string()],
            })
        );
        assert_eq!(
            Request::parse("EXEC abort"),
            Ok(Request::Exec {
                command: "abort".to_string(),
                args: Vec::new(),
            })
        );
    }

    #[test]
    fn unknown_prefix_is_a_classification_error() {
        assert_eq!(
            Request::parse("PING"),
            Err(FrameError::UnrecognizedMessage("PING".to_string()))
        );
        // prefixes are case sensitive and READ needs its trailing space
        assert!(Request::parse("READOmega").is_err());
        assert!(Request::parse("read Omega").is_err());
    }

    #[test]
    fn replies_and_events_render_bodies() {
        assert_eq!(Reply::Ret(Value::Int(3)).body(), "RET:3");
        assert_eq!(Reply::Null.body(), "NULL");
        assert_eq!(
            Reply::Err("Invalid value".to_string()).body(),
            "ERR:Invalid value"
        );

        let event = Event {
            name: "CoaxCamScaleX".to_string(),
            value: Value::Double(0.0012289635416666664),
            timestamp: 1_700_000_000,
            type_tag: TypeTag::Double,
        };
        assert_eq!(
            event.body(),
            "EVT:CoaxCamScaleX\t0.0012289635416666664\t1700000000\tjava.lang.Double"
        );
    }

    #[test]
    fn frames_are_wrapped_in_stx_etx() {
        let frame = encode_frame("RET:MD");
        assert_eq!(frame, b"\x02RET:MD\x03".to_vec());
        assert_eq!(
            decode_frame(&frame, DEFAULT_MAX_FRAME_BYTES),
            Ok("RET:MD".to_string())
        );
        assert_eq!(
            Outbound::Reply(Reply::Null).frame(),
            b"\x02NULL\x03".to_vec()
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert_eq!(
            decode_frame(b"READ State\x03", DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::MissingStart)
        );
        assert_eq!(
            decode_frame(b"\x02READ State", DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::MissingEnd)
        );
        assert_eq!(
            decode_frame(b"\x02\xff\xfe\x03", DEFAULT_MAX_FRAME_BYTES),
            Err(FrameError::InvalidUtf8)
        );
        assert!(matches!(
            decode_frame(b"\x02NAME\x03", 3),
            Err(FrameError::OversizedFrame { size: 6, max: 3 })
        ));
    }
}
