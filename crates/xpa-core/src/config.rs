//! Typed configuration backed by the process environment.
//!
//! Lookup order for a key: value set through [`Config::set`], then the
//! environment variable of the same name, then the built-in default. Each key
//! has a fixed kind and [`Config::set`] rejects values of another kind.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::wire::parse_bool;

/// Kind of a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Bool,
    Int,
    Text,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Bool => f.write_str("boolean"),
            Kind::Int => f.write_str("integer"),
            Kind::Text => f.write_str("string"),
        }
    }
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Text(_) => Kind::Text,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn parse(kind: Kind, raw: &str) -> Option<Value> {
        match kind {
            Kind::Bool => parse_bool(raw).map(Value::Bool),
            Kind::Int => raw.trim().parse().ok().map(Value::Int),
            Kind::Text => Some(Value::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Declaration of one configuration key.
#[derive(Debug)]
pub struct Key {
    pub name: &'static str,
    pub kind: Kind,
    default: Fallback,
}

#[derive(Debug)]
enum Fallback {
    Bool(bool),
    Int(i64),
    Text(&'static str),
}

impl Key {
    pub fn default_value(&self) -> Value {
        match self.default {
            Fallback::Bool(b) => Value::Bool(b),
            Fallback::Int(n) => Value::Int(n),
            Fallback::Text(s) => Value::Text(s.to_string()),
        }
    }
}

pub const MAXHOSTS: &str = "XPA_MAXHOSTS";
pub const SHORT_TIMEOUT: &str = "XPA_SHORT_TIMEOUT";
pub const LONG_TIMEOUT: &str = "XPA_LONG_TIMEOUT";
pub const CONNECT_TIMEOUT: &str = "XPA_CONNECT_TIMEOUT";
pub const TMPDIR: &str = "XPA_TMPDIR";
pub const VERBOSITY: &str = "XPA_VERBOSITY";
pub const IOCALLSXPA: &str = "XPA_IOCALLSXPA";

/// Every known key.
pub static KEYS: &[Key] = &[
    Key { name: MAXHOSTS, kind: Kind::Int, default: Fallback::Int(100) },
    Key { name: SHORT_TIMEOUT, kind: Kind::Int, default: Fallback::Int(15) },
    Key { name: LONG_TIMEOUT, kind: Kind::Int, default: Fallback::Int(180) },
    Key { name: CONNECT_TIMEOUT, kind: Kind::Int, default: Fallback::Int(10) },
    Key { name: TMPDIR, kind: Kind::Text, default: Fallback::Text("/tmp/.xpa") },
    Key { name: VERBOSITY, kind: Kind::Bool, default: Fallback::Bool(true) },
    Key { name: IOCALLSXPA, kind: Kind::Bool, default: Fallback::Bool(false) },
];

/// Look up a key declaration by name.
pub fn key(name: &str) -> Result<&'static Key> {
    KEYS.iter()
        .find(|k| k.name == name)
        .ok_or_else(|| Error::config(format!("unknown configuration key \"{name}\"")))
}

/// Configuration store.
#[derive(Debug)]
pub struct Config {
    overrides: RwLock<HashMap<&'static str, Value>>,
    use_env: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
            use_env: true,
        }
    }
}

impl Config {
    /// A store that reads the process environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that ignores the process environment.
    pub fn isolated() -> Self {
        Self {
            use_env: false,
            ..Self::default()
        }
    }

    /// The process-wide store.
    pub fn global() -> &'static Config {
        static GLOBAL: OnceLock<Config> = OnceLock::new();
        GLOBAL.get_or_init(Config::new)
    }

    /// Current value of `name`.
    pub fn get(&self, name: &str) -> Result<Value> {
        let key = key(name)?;
        if let Some(value) = self.overrides.read().get(key.name) {
            return Ok(value.clone());
        }
        if self.use_env
            && let Ok(raw) = std::env::var(key.name)
        {
            match Value::parse(key.kind, &raw) {
                Some(value) => return Ok(value),
                None => tracing::warn!(
                    "ignoring {}=\"{}\": expected a {} value",
                    key.name,
                    raw,
                    key.kind
                ),
            }
        }
        Ok(key.default_value())
    }

    /// Set `name` and return its previous value.
    ///
    /// A value of the wrong kind fails and leaves the store unchanged.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<Value> {
        let key = key(name)?;
        let value = value.into();
        if value.kind() != key.kind {
            return Err(Error::config(format!(
                "{} expects a {} value, got {} \"{}\"",
                key.name,
                key.kind,
                value.kind(),
                value
            )));
        }
        let previous = self.get(name)?;
        self.overrides.write().insert(key.name, value);
        Ok(previous)
    }

    /// Forget a value set through [`Config::set`] and return the previous value.
    pub fn unset(&self, name: &str) -> Result<Value> {
        let key = key(name)?;
        let previous = self.get(name)?;
        self.overrides.write().remove(key.name);
        Ok(previous)
    }

    fn int(&self, name: &str) -> i64 {
        self.get(name)
            .ok()
            .and_then(|v| v.as_int())
            .unwrap_or_default()
    }

    fn flag(&self, name: &str) -> bool {
        self.get(name)
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }

    fn seconds(&self, name: &str) -> Duration {
        Duration::from_secs(self.int(name).max(0) as u64)
    }

    /// Answer count used when a request asks for `nmax = -1`.
    pub fn max_hosts(&self) -> usize {
        self.int(MAXHOSTS).max(1) as usize
    }

    pub fn short_timeout(&self) -> Duration {
        self.seconds(SHORT_TIMEOUT)
    }

    pub fn long_timeout(&self) -> Duration {
        self.seconds(LONG_TIMEOUT)
    }

    pub fn connect_timeout(&self) -> Duration {
        self.seconds(CONNECT_TIMEOUT)
    }

    pub fn tmpdir(&self) -> PathBuf {
        match self.get(TMPDIR) {
            Ok(Value::Text(dir)) => PathBuf::from(dir),
            _ => PathBuf::from("/tmp/.xpa"),
        }
    }

    pub fn verbose(&self) -> bool {
        self.flag(VERBOSITY)
    }

    pub fn io_calls_xpa(&self) -> bool {
        self.flag(IOCALLSXPA)
    }
}
