use crate::error::{Error, Result};

/// Which end of the connection a session plays.
///
/// Decides masking per RFC 6455 section 5.1: clients mask everything they
/// send, servers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    #[inline]
    #[must_use]
    pub const fn masks_output(&self) -> bool {
        matches!(self, Role::Client)
    }

    #[inline]
    #[must_use]
    pub const fn expects_masked(&self) -> bool {
        matches!(self, Role::Server)
    }

    /// Check the mask bit of an incoming frame.
    ///
    /// `accept_unmasked` relaxes the server rule for non-compliant clients.
    ///
    /// # Errors
    ///
    /// [`Error::UnmaskedClientFrame`] on a server, [`Error::MaskedServerFrame`]
    /// on a client.
    pub fn check_incoming_mask(&self, masked: bool, accept_unmasked: bool) -> Result<()> {
        match self {
            Role::Server if !masked && !accept_unmasked => Err(Error::UnmaskedClientFrame),
            Role::Client if masked => Err(Error::MaskedServerFrame),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}
