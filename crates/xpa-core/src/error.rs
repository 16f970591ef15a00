//! Error taxonomy shared by every XPA crate.

use crate::wire;

/// Result alias for XPA operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the messaging layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The transport session could not be established, or was used after close.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The transport answered outside of its contract.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A server answered with an `XPA$ERROR` message.
    #[error("{message}")]
    Application {
        /// Answering server (`CLASS:name address`).
        server: String,
        /// Message with the error prefix removed.
        message: String,
    },

    /// A typed or shaped extraction needs more bytes than the buffer holds.
    #[error("size error: {needed} bytes required, {available} available")]
    Size { needed: usize, available: usize },

    /// A listing line or access string does not match the expected grammar.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Unknown configuration key, or a value of the wrong type.
    #[error("config error: {message}")]
    Config { message: String },

    /// Answer index outside of `0..count`.
    #[error("index {index} out of range for reply with {count} answers")]
    Index { index: usize, count: usize },

    /// No access point matches the pattern.
    #[error("no access point matches \"{pattern}\"")]
    NoMatch { pattern: String },

    /// Several access points match and the selection policy refused to pick one.
    #[error("ambiguous pattern \"{pattern}\": {count} access points match")]
    Ambiguous { pattern: String, count: usize },

    /// A typed request returned no answer at all.
    #[error("no answer received from \"{target}\"")]
    EmptyReply { target: String },

    /// The transport refused to register a server.
    #[error("cannot register server: {message}")]
    Registration { message: String },

    /// A callback could not be dispatched safely.
    #[error("callback error: {message}")]
    Callback { message: String },
}

impl Error {
    /// Build a [`Error::Parse`] from anything printable.
    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    /// Build a [`Error::Config`] from anything printable.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Build a [`Error::Protocol`] from anything printable.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// Build a [`Error::Connection`] from anything printable.
    pub fn connection(message: impl Into<String>) -> Self {
        Error::Connection {
            message: message.into(),
        }
    }

    /// Escalate a raw `XPA$ERROR ...` message into an [`Error::Application`].
    pub fn application(server: impl Into<String>, raw_message: &str) -> Self {
        Error::Application {
            server: server.into(),
            message: wire::strip_error_prefix(raw_message).to_string(),
        }
    }
}
