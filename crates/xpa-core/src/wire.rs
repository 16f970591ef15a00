//! Wire conventions shared with XPA peers.
//!
//! Messages attached to answers are plain byte strings. Two prefixes carry
//! meaning and must match byte for byte, trailing space included:
//!
//! - `XPA$ERROR ` marks an application error
//! - `XPA$MESSAGE ` marks an informational message
//!
//! The request structures below describe what a `Get` and a `Set` call hand
//! to the transport. The transport owns their actual encoding on the socket.

use std::borrow::Cow;
use std::fmt;

use bitflags::bitflags;

use crate::error::{Error, Result};

/// Prefix of an error message.
pub const ERROR_PREFIX: &str = "XPA$ERROR ";

/// Prefix of an informational message.
pub const MESSAGE_PREFIX: &str = "XPA$MESSAGE ";

/// Classification of an answer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Starts with [`ERROR_PREFIX`].
    Error,
    /// Starts with [`MESSAGE_PREFIX`].
    Info,
    /// Anything else, including the empty message.
    Plain,
}

impl MessageKind {
    /// Classify raw message bytes.
    pub fn of(message: &[u8]) -> Self {
        if is_error(message) {
            MessageKind::Error
        } else if is_message(message) {
            MessageKind::Info
        } else {
            MessageKind::Plain
        }
    }
}

/// True if `message` begins with the error prefix.
pub fn is_error(message: &[u8]) -> bool {
    message.starts_with(ERROR_PREFIX.as_bytes())
}

/// True if `message` begins with the informational prefix.
pub fn is_message(message: &[u8]) -> bool {
    message.starts_with(MESSAGE_PREFIX.as_bytes())
}

/// Remove the error prefix and any whitespace that follows it.
///
/// Messages without the prefix are returned unchanged.
pub fn strip_error_prefix(message: &str) -> &str {
    match message.strip_prefix(ERROR_PREFIX) {
        Some(rest) => rest.trim_start(),
        None => message,
    }
}

/// Format an error message the way servers send it.
pub fn format_error(text: &str, server: &str) -> String {
    format!("{ERROR_PREFIX}{text} ({server})\n")
}

/// Format an informational message the way servers send it.
pub fn format_message(text: &str, server: &str) -> String {
    format!("{MESSAGE_PREFIX}{text} ({server})\n")
}

/// Join command arguments with single spaces.
///
/// Zero or one argument is borrowed as is.
pub fn join_arguments<'a, S: AsRef<str>>(args: &'a [S]) -> Cow<'a, str> {
    match args {
        [] => Cow::Borrowed(""),
        [only] => Cow::Borrowed(only.as_ref()),
        _ => {
            let len = args.iter().map(|a| a.as_ref().len() + 1).sum::<usize>();
            let mut joined = String::with_capacity(len);
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    joined.push(' ');
                }
                joined.push_str(arg.as_ref());
            }
            Cow::Owned(joined)
        }
    }
}

bitflags! {
    /// Buffer-handling modes negotiated for a server callback.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ModeFlags: u32 {
        /// Deliver the payload in a buffer instead of a descriptor.
        const BUF = 1;
        /// Read the whole payload before invoking the callback.
        const FILLBUF = 2;
        /// The transport frees the buffer after use.
        const FREEBUF = 4;
        /// Enforce the access-control list.
        const ACL = 8;
    }
}

impl ModeFlags {
    /// Flags a send callback needs before it may publish a buffer.
    pub const SEND_REQUIRED: ModeFlags = ModeFlags::FREEBUF;

    /// Flags a receive callback needs before it may read a buffer.
    pub const RECEIVE_REQUIRED: ModeFlags = ModeFlags::BUF
        .union(ModeFlags::FILLBUF)
        .union(ModeFlags::FREEBUF);

    /// Parse the boolean entries of a mode string into flags.
    ///
    /// Keys that are not buffer modes are ignored. Unspecified flags take
    /// their value from `defaults`.
    pub fn from_mode(mode: &Mode, defaults: ModeFlags) -> Result<Self> {
        let mut flags = defaults;
        for (key, flag) in [
            ("buf", ModeFlags::BUF),
            ("fillbuf", ModeFlags::FILLBUF),
            ("freebuf", ModeFlags::FREEBUF),
            ("acl", ModeFlags::ACL),
        ] {
            if let Some(value) = mode.flag(key)? {
                flags.set(flag, value);
            }
        }
        Ok(flags)
    }
}

/// A parsed `key=value,key=value` option string.
///
/// The dispatcher passes mode strings through untouched; this type is for
/// transports and servers that need to look inside.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mode {
    entries: Vec<(String, String)>,
}

impl Mode {
    /// Parse a mode string. Empty items are skipped.
    pub fn parse(s: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| Error::parse(format!("mode entry \"{item}\" lacks '='")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::parse(format!("mode entry \"{item}\" has an empty key")));
            }
            entries.push((key.to_ascii_lowercase(), value.trim().to_string()));
        }
        Ok(Self { entries })
    }

    /// Build a mode from boolean flags.
    pub fn from_flags<'a>(flags: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        Self {
            entries: flags
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Last value given for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Boolean value of `key`, accepting `true/false`, `yes/no`, `1/0`.
    pub fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => parse_bool(value)
                .map(Some)
                .ok_or_else(|| Error::parse(format!("mode \"{key}\" expects a boolean, got \"{value}\""))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Byte order reported by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    Big,
    Little,
    /// Not reported.
    #[default]
    Unknown,
}

impl Endian {
    /// Byte order of this process.
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// Parse the textual form used by peers (`big`, `little`, `?`).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "big" => Endian::Big,
            "little" => Endian::Little,
            _ => Endian::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Endian::Big => "big",
            Endian::Little => "little",
            Endian::Unknown => "?",
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a `Get` call.
#[derive(Debug, Clone, Copy)]
pub struct GetRequest<'a> {
    /// Access point template, or a literal address.
    pub target: &'a str,
    /// Command string.
    pub params: &'a str,
    /// Opaque `k=v,k=v` option string.
    pub mode: &'a str,
    /// Maximum number of answers.
    pub nmax: usize,
}

/// Arguments of a `Set` call.
#[derive(Debug, Clone, Copy)]
pub struct SetRequest<'a> {
    /// Access point template, or a literal address.
    pub target: &'a str,
    /// Command string.
    pub params: &'a str,
    /// Opaque `k=v,k=v` option string.
    pub mode: &'a str,
    /// Maximum number of answers.
    pub nmax: usize,
    /// Payload delivered to every receiving server.
    pub data: &'a [u8],
}
