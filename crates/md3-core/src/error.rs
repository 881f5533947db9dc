use crate::value::CodecError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Get,
    Set,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Get => f.write_str("get"),
            Access::Set => f.write_str("set"),
        }
    }
}

// Display strings are sent verbatim as ERR: replies and follow the real device's wording.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeviceError {
    #[error("Undefined method: true.{access}{name}")]
    UnknownAttribute { name: String, access: Access },
    #[error("Undefined method: true.{0}")]
    UnknownCommand(String),
    #[error("{0}")]
    Command(String),
    #[error("{0}")]
    DisallowedState(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DeviceError {
    pub fn unknown_attribute(name: &str, access: Access) -> Self {
        DeviceError::UnknownAttribute {
            name: name.to_string(),
            access,
        }
    }

    pub fn bad_signature(command: &str) -> Self {
        DeviceError::Command(format!(
            "No method with the correct signature: true.{command}"
        ))
    }

    pub fn invalid_task(id: impl fmt::Display) -> Self {
        DeviceError::Command(format!("Invalid task: {id}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceError::UnknownAttribute { .. } => "unknown_attribute",
            DeviceError::UnknownCommand(_) => "unknown_command",
            DeviceError::Command(_) => "command_error",
            DeviceError::DisallowedState(_) => "disallowed_state",
            DeviceError::Codec(_) => "codec_error",
        }
    }
}
