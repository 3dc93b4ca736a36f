use std::fmt;

use crate::error::Error;

/// Status codes carried in replies of the message protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    InternalError = 1,
    EndOfStream = 2,
    NotFound = 3,
    RequestTooLarge = 4,
}

impl Status {
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::InternalError),
            2 => Some(Status::EndOfStream),
            3 => Some(Status::NotFound),
            4 => Some(Status::RequestTooLarge),
            _ => None,
        }
    }

    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Status reported back to a peer whose request failed with `err`.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::EndOfStream { .. } | Error::JunkAfterPacket { .. } => Status::EndOfStream,
            Error::MessageTooLarge { .. }
            | Error::FrameTooLarge { .. }
            | Error::ResponseTooLarge { .. } => Status::RequestTooLarge,
            _ => Status::InternalError,
        }
    }
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        Status::from_error(err)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::InternalError => "internal error",
            Status::EndOfStream => "end of stream",
            Status::NotFound => "not found",
            Status::RequestTooLarge => "request too large",
        };
        write!(f, "{name} ({})", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        for code in 0..5 {
            assert_eq!(Status::from_code(code).map(Status::code), Some(code));
        }
        assert_eq!(Status::from_code(5), None);
    }

    #[test]
    fn test_from_error() {
        let eos = Error::EndOfStream {
            message: "M".into(),
            field: "f".into(),
        };
        assert_eq!(Status::from(&eos), Status::EndOfStream);
        assert_eq!(
            Status::from_error(&Error::MessageTooLarge { size: 2, max: 1 }),
            Status::RequestTooLarge
        );
        assert_eq!(Status::from_error(&Error::Application("x".into())), Status::InternalError);
        assert_eq!(Status::NotFound.to_string(), "not found (3)");
    }
}
