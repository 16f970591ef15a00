//! `get` and `set` against one or more access points.

use std::borrow::Cow;
use std::fmt;

use xpa_core::access;
use xpa_core::data::{self, Element};
use xpa_core::wire::{self, GetRequest, SetRequest};
use xpa_core::{AccessPoint, Config, Data, Error, Reply, ReplyKind, Result, Shape};

use crate::connection::Connection;
use crate::directory::Select;

/// What a request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A known access point; its address is used.
    AccessPoint(AccessPoint),
    /// A literal `host:port` or socket path.
    Address(String),
    /// A `class:name` pattern that must resolve to exactly one access point
    /// through the directory.
    Pattern(String),
    /// A `class:name` template handed to the transport as is, reaching every
    /// matching access point.
    Template(String),
}

impl From<AccessPoint> for Target {
    fn from(apt: AccessPoint) -> Self {
        Target::AccessPoint(apt)
    }
}

impl From<&AccessPoint> for Target {
    fn from(apt: &AccessPoint) -> Self {
        Target::AccessPoint(apt.clone())
    }
}

/// Addresses stay literal, anything else is a pattern.
impl From<&str> for Target {
    fn from(s: &str) -> Self {
        if access::is_address(s) {
            Target::Address(s.to_string())
        } else {
            Target::Pattern(s.to_string())
        }
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::from(s.as_str())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::AccessPoint(apt) => write!(f, "{}", apt.id()),
            Target::Address(s) | Target::Pattern(s) | Target::Template(s) => f.write_str(s),
        }
    }
}

/// Options shared by `get` and `set`.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Opaque `k=v,k=v` string passed to the transport.
    pub mode: String,
    /// Maximum number of answers; negative means `XPA_MAXHOSTS`.
    pub nmax: i32,
    /// Raise the first application error found in the answers.
    pub throw_errors: bool,
    /// How a [`Target::Pattern`] matching several access points is resolved.
    pub select: Select,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            mode: String::new(),
            nmax: -1,
            throw_errors: false,
            select: Select::Error,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn nmax(mut self, nmax: i32) -> Self {
        self.nmax = nmax;
        self
    }

    pub fn throw_errors(mut self, throw_errors: bool) -> Self {
        self.throw_errors = throw_errors;
        self
    }

    pub fn select(mut self, select: Select) -> Self {
        self.select = select;
        self
    }

    /// Answer capacity under `config`.
    pub fn capacity(&self, config: &Config) -> usize {
        match usize::try_from(self.nmax) {
            Ok(n) => n,
            Err(_) => config.max_hosts(),
        }
    }
}

/// Payload of a `set`.
#[derive(Debug, Clone, Default)]
pub enum Payload<'a> {
    /// A zero-length payload.
    #[default]
    Empty,
    /// Borrowed and sent without a copy.
    Bytes(&'a [u8]),
    Text(&'a str),
    /// Values encoded in native byte order.
    Owned(Vec<u8>),
}

impl Payload<'_> {
    pub fn values<T: Element>(values: &[T]) -> Payload<'static> {
        Payload::Owned(data::encode(values))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Empty => &[],
            Payload::Bytes(bytes) => bytes,
            Payload::Text(text) => text.as_bytes(),
            Payload::Owned(bytes) => bytes,
        }
    }
}

impl<'a> From<&'a [u8]> for Payload<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Payload::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Payload<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Payload::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for Payload<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(text: &'a str) -> Self {
        Payload::Text(text)
    }
}

impl<'a> From<&'a String> for Payload<'a> {
    fn from(text: &'a String) -> Self {
        Payload::Text(text)
    }
}

impl Connection {
    /// Turn a target into the string the transport understands.
    fn resolve<'t>(&self, target: &'t Target, select: &Select) -> Result<Cow<'t, str>> {
        match target {
            Target::AccessPoint(apt) => Ok(Cow::Borrowed(apt.address())),
            Target::Address(address) | Target::Template(address) => Ok(Cow::Borrowed(address)),
            Target::Pattern(pattern) => {
                let apt = self.find(pattern, select)?.ok_or_else(|| Error::NoMatch {
                    pattern: pattern.clone(),
                })?;
                Ok(Cow::Owned(apt.address().to_string()))
            }
        }
    }

    /// Pull data from the servers behind `target`.
    ///
    /// `args` are joined with single spaces into the command string. A
    /// transport failure is always an error; application errors inside the
    /// answers only are when `throw_errors` is set.
    pub fn get<S: AsRef<str>>(
        &self,
        target: impl Into<Target>,
        args: &[S],
        options: &RequestOptions,
    ) -> Result<Reply> {
        let target = target.into();
        let address = self.resolve(&target, &options.select)?;
        let params = wire::join_arguments(args);
        let nmax = options.capacity(self.config());
        let client = self.client()?;

        let mut reply = Reply::new(ReplyKind::Get, nmax);
        let request = GetRequest {
            target: &address,
            params: &params,
            mode: &options.mode,
            nmax,
        };
        let count = self.transport().get(client, &request, reply.slots_mut());
        reply.seal(count)?;
        tracing::debug!(to = %address, nmax, answers = reply.len(), "get");
        if options.throw_errors {
            reply.verify()?;
        }
        Ok(reply)
    }

    /// Get a single answer converted to `shape`.
    ///
    /// Forces one answer and raises application errors. Fails if no server
    /// answered, or if the data is smaller than `shape` requires.
    pub fn get_as<T: Element, S: AsRef<str>>(
        &self,
        shape: &Shape,
        target: impl Into<Target>,
        args: &[S],
        options: &RequestOptions,
    ) -> Result<Data<T>> {
        let target = target.into();
        let options = options.clone().nmax(1).throw_errors(true);
        let mut reply = self.get(target.clone(), args, &options)?;
        if reply.is_empty() {
            return Err(Error::EmptyReply {
                target: target.to_string(),
            });
        }
        reply.entry(0)?.data(shape, shape.default_extraction())
    }

    /// Push `payload` to the servers behind `target`.
    ///
    /// Answers carry a server id and message only.
    pub fn set<'p, S: AsRef<str>>(
        &self,
        target: impl Into<Target>,
        args: &[S],
        payload: impl Into<Payload<'p>>,
        options: &RequestOptions,
    ) -> Result<Reply> {
        let target = target.into();
        let payload = payload.into();
        let address = self.resolve(&target, &options.select)?;
        let params = wire::join_arguments(args);
        let nmax = options.capacity(self.config());
        let client = self.client()?;

        let mut reply = Reply::new(ReplyKind::Set, nmax);
        let request = SetRequest {
            target: &address,
            params: &params,
            mode: &options.mode,
            nmax,
            data: payload.as_bytes(),
        };
        let count = self.transport().set(client, &request, reply.slots_mut());
        reply.seal(count)?;
        tracing::debug!(
            to = %address,
            nmax,
            bytes = request.data.len(),
            answers = reply.len(),
            "set"
        );
        if options.throw_errors {
            reply.verify()?;
        }
        Ok(reply)
    }
}
