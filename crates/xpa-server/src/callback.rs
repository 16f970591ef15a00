//! Send and receive callbacks.
//!
//! A callback is a closure plus whatever context it captured, together with
//! the mode flags it asks the transport for. The flags end up in the mode
//! string given at registration.

use std::cell::Cell;

use xpa_core::wire::Mode;
use xpa_core::{
    Endian, ModeFlags, RequestInfo, ServerHandle, ServerInfo, ServerTransport, Status,
};

use crate::buffer::{ReceiveBuffer, SendBuffer};

type SendFn = dyn FnMut(&ServerContext<'_>, &str, &mut SendBuffer<'_>) -> Status + Send;
type ReceiveFn = dyn FnMut(&ServerContext<'_>, &str, &ReceiveBuffer<'_>) -> Status + Send;

/// Produces the answer to a `get`.
pub struct SendCallback {
    func: Box<SendFn>,
    acl: bool,
    freebuf: bool,
}

impl SendCallback {
    /// Wrap `func` with its context `data`.
    pub fn new<D, F>(mut data: D, mut func: F) -> Self
    where
        D: Send + 'static,
        F: FnMut(&mut D, &ServerContext<'_>, &str, &mut SendBuffer<'_>) -> Status + Send + 'static,
    {
        Self::from_fn(move |server, params, buf| func(&mut data, server, params, buf))
    }

    /// Wrap a closure that carries its own context.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: FnMut(&ServerContext<'_>, &str, &mut SendBuffer<'_>) -> Status + Send + 'static,
    {
        Self {
            func: Box::new(func),
            acl: true,
            freebuf: true,
        }
    }

    pub fn acl(mut self, acl: bool) -> Self {
        self.acl = acl;
        self
    }

    /// Whether the transport frees the result after transmission.
    ///
    /// The engine refuses to dispatch without it.
    pub fn freebuf(mut self, freebuf: bool) -> Self {
        self.freebuf = freebuf;
        self
    }

    /// Mode string given to the transport at registration.
    pub fn mode(&self) -> String {
        Mode::from_flags([("acl", self.acl), ("freebuf", self.freebuf)]).to_string()
    }

    pub(crate) fn call(&mut self, server: &ServerContext<'_>, params: &str, buf: &mut SendBuffer<'_>) -> Status {
        (self.func)(server, params, buf)
    }
}

/// Consumes the payload of a `set`.
pub struct ReceiveCallback {
    func: Box<ReceiveFn>,
    acl: bool,
    buf: bool,
    fillbuf: bool,
    freebuf: bool,
}

impl ReceiveCallback {
    /// Wrap `func` with its context `data`.
    pub fn new<D, F>(mut data: D, mut func: F) -> Self
    where
        D: Send + 'static,
        F: FnMut(&mut D, &ServerContext<'_>, &str, &ReceiveBuffer<'_>) -> Status + Send + 'static,
    {
        Self::from_fn(move |server, params, buf| func(&mut data, server, params, buf))
    }

    /// Wrap a closure that carries its own context.
    pub fn from_fn<F>(func: F) -> Self
    where
        F: FnMut(&ServerContext<'_>, &str, &ReceiveBuffer<'_>) -> Status + Send + 'static,
    {
        Self {
            func: Box::new(func),
            acl: true,
            buf: true,
            fillbuf: true,
            freebuf: true,
        }
    }

    pub fn acl(mut self, acl: bool) -> Self {
        self.acl = acl;
        self
    }

    pub fn buf(mut self, buf: bool) -> Self {
        self.buf = buf;
        self
    }

    pub fn fillbuf(mut self, fillbuf: bool) -> Self {
        self.fillbuf = fillbuf;
        self
    }

    pub fn freebuf(mut self, freebuf: bool) -> Self {
        self.freebuf = freebuf;
        self
    }

    /// Mode string given to the transport at registration.
    pub fn mode(&self) -> String {
        Mode::from_flags([
            ("acl", self.acl),
            ("buf", self.buf),
            ("fillbuf", self.fillbuf),
            ("freebuf", self.freebuf),
        ])
        .to_string()
    }

    pub(crate) fn call(&mut self, server: &ServerContext<'_>, params: &str, buf: &ReceiveBuffer<'_>) -> Status {
        (self.func)(server, params, buf)
    }
}

/// The server as seen from inside a callback.
///
/// Only valid for the duration of one callback invocation.
pub struct ServerContext<'a> {
    handle: ServerHandle,
    transport: &'a dyn ServerTransport,
    server: &'a ServerInfo,
    request: &'a RequestInfo,
    reported: Cell<bool>,
}

impl<'a> ServerContext<'a> {
    pub(crate) fn new(
        handle: ServerHandle,
        transport: &'a dyn ServerTransport,
        server: &'a ServerInfo,
        request: &'a RequestInfo,
    ) -> Self {
        Self {
            handle,
            transport,
            server,
            request,
            reported: Cell::new(false),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle
    }

    pub fn class(&self) -> &str {
        &self.server.class
    }

    pub fn name(&self) -> &str {
        &self.server.name
    }

    /// Address the server listens on.
    pub fn method(&self) -> &str {
        &self.server.method
    }

    pub fn send_mode(&self) -> ModeFlags {
        self.server.send_mode
    }

    pub fn recv_mode(&self) -> ModeFlags {
        self.server.recv_mode
    }

    pub fn server_endian(&self) -> Endian {
        self.server.server_endian
    }

    pub fn client_endian(&self) -> Endian {
        self.request.client_endian
    }

    /// Whether the client waits for the answer.
    pub fn ack(&self) -> bool {
        self.request.ack
    }

    pub fn status(&self) -> i32 {
        self.request.status
    }

    pub fn cmdfd(&self) -> i32 {
        self.request.cmdfd
    }

    pub fn datafd(&self) -> i32 {
        self.request.datafd
    }

    /// Attach an error to the answer. The callback should then return
    /// [`Status::Failure`].
    pub fn error(&self, message: &str) {
        self.reported.set(true);
        self.transport.report_error(self.handle, message);
    }

    /// Attach an informational message to the answer.
    pub fn message(&self, message: &str) {
        self.transport.report_message(self.handle, message);
    }

    pub(crate) fn error_reported(&self) -> bool {
        self.reported.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_modes() {
        let send = SendCallback::from_fn(|_, _, _| Status::Success);
        assert_eq!(send.mode(), "acl=true,freebuf=true");
        let recv = ReceiveCallback::from_fn(|_, _, _| Status::Success).fillbuf(false);
        assert_eq!(recv.mode(), "acl=true,buf=true,fillbuf=false,freebuf=true");
    }

    #[test]
    fn mode_string_parses_back_to_flags() {
        let recv = ReceiveCallback::from_fn(|_, _, _| Status::Success).acl(false);
        let mode = Mode::parse(&recv.mode()).unwrap();
        let flags = ModeFlags::from_mode(&mode, ModeFlags::empty()).unwrap();
        assert_eq!(flags, ModeFlags::RECEIVE_REQUIRED);
    }
}
