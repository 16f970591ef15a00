//! The contract between this layer and the transport that moves bytes.
//!
//! The transport is an external collaborator: it connects, accepts, reads
//! and writes, and it talks to the name server. This module fixes only the
//! calls made across that boundary and who owns which buffer at each step.
//!
//! Client side: `get`/`set` fill the answer slots of a reply with buffers
//! allocated from the transport's [`Heap`] and return the answer count, or a
//! negative value on failure.
//!
//! Server side: the transport holds no closures. At registration it receives
//! plain [`ServerHandle`]s and, when a request arrives, hands the handle back
//! to one of the two [`Dispatch`] entry points so the engine can find the
//! callback registered under it.

use std::time::Duration;

use crate::buffer::{Heap, Slot};
use crate::error::Result;
use crate::reply::AnswerSlots;
use crate::wire::{Endian, GetRequest, ModeFlags, SetRequest};

/// Well-known access point of the name server.
pub const NAME_SERVER: &str = "XPA:xpans";

/// Native handle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientHandle(pub u64);

/// Native handle of a registered server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerHandle(pub u64);

/// Client half of the transport.
pub trait Transport: Send + Sync {
    /// Heap every reply buffer is allocated from.
    fn heap(&self) -> &Heap;

    /// Open a persistent session.
    fn open(&self) -> Result<ClientHandle>;

    /// Release a session. Unknown handles are ignored.
    fn close(&self, client: ClientHandle);

    /// Pull data from up to `answers.len()` servers.
    ///
    /// `client` is `None` for a one-shot session. Returns the number of
    /// answers written, or a negative value if the call failed as a whole.
    fn get(&self, client: Option<ClientHandle>, request: &GetRequest<'_>, answers: &mut [AnswerSlots]) -> i32;

    /// Push data to up to `answers.len()` servers.
    ///
    /// Same conventions as [`Transport::get`]; data slots are left empty.
    fn set(&self, client: Option<ClientHandle>, request: &SetRequest<'_>, answers: &mut [AnswerSlots]) -> i32;
}

/// Outcome of a callback, as reported to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

/// What a server asks for when it registers.
#[derive(Debug, Clone, Copy)]
pub struct Registration<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub help: &'a str,
    /// Mode string of the send callback; `None` if the server has none.
    pub send_mode: Option<&'a str>,
    /// Mode string of the receive callback; `None` if the server has none.
    pub recv_mode: Option<&'a str>,
}

/// Static facts about a registered server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub class: String,
    pub name: String,
    /// Address the server listens on.
    pub method: String,
    pub send_mode: ModeFlags,
    pub recv_mode: ModeFlags,
    pub server_endian: Endian,
}

/// Facts about the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub client_endian: Endian,
    /// Whether the client waits for an acknowledgement.
    pub ack: bool,
    pub status: i32,
    /// Command descriptor, `-1` if the transport has none.
    pub cmdfd: i32,
    /// Data descriptor, `-1` if the transport has none.
    pub datafd: i32,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self {
            client_endian: Endian::Unknown,
            ack: true,
            status: 0,
            cmdfd: -1,
            datafd: -1,
        }
    }
}

/// Entry points the transport calls when a request arrives.
pub trait Dispatch {
    /// Produce data for a `get`. The callback stores its result in `result`;
    /// the transport frees it after transmission.
    fn send(&mut self, server: ServerHandle, request: &RequestInfo, params: &str, result: &mut Slot) -> Status;

    /// Consume data of a `set`. `payload` is only valid during the call.
    fn receive(&mut self, server: ServerHandle, request: &RequestInfo, params: &str, payload: &[u8]) -> Status;
}

/// Server half of the transport.
pub trait ServerTransport: Send + Sync {
    /// Heap callback results are allocated from.
    fn heap(&self) -> &Heap;

    /// Register an access point with the name server.
    fn register(&self, registration: &Registration<'_>) -> Result<ServerHandle>;

    /// Unregister an access point. Unknown handles are ignored.
    fn unregister(&self, server: ServerHandle);

    fn info(&self, server: ServerHandle) -> Option<ServerInfo>;

    /// Serve pending requests, calling back into `dispatch`.
    ///
    /// `timeout` of `None` blocks until at least one request is pending.
    /// `max_requests < 0` only reports the pending count, `0` serves all
    /// pending requests, `n > 0` serves at most `n`. Returns the number of
    /// requests served (or pending), negative on failure.
    fn poll(&self, timeout: Option<Duration>, max_requests: i32, dispatch: &mut dyn Dispatch) -> i32;

    /// Attach an error message to the answer of the request being served.
    fn report_error(&self, server: ServerHandle, message: &str);

    /// Attach an informational message to the answer of the request being served.
    fn report_message(&self, server: ServerHandle, message: &str);
}
