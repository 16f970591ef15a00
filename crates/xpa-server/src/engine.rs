//! Servers, dispatch trampolines and the poll loop.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use xpa_core::{
    Dispatch, Endian, Error, ModeFlags, Registration, RequestInfo, Result, ServerHandle,
    ServerInfo, ServerTransport, Slot, Status,
};

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::callback::{ReceiveCallback, SendCallback, ServerContext};
use crate::registry::Registry;

/// Longest single wait of [`Engine::mainloop`] before it rechecks its stop
/// condition.
pub const POLL_SLICE: Duration = Duration::from_millis(100);

/// Asks a running [`Engine::mainloop_until`] to return.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct EngineInner {
    transport: Arc<dyn ServerTransport>,
    registry: Arc<Registry>,
    live: Mutex<HashSet<ServerHandle>>,
}

/// Creates servers on a transport and serves their requests.
///
/// Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// An engine using the process-wide registry.
    pub fn new(transport: Arc<dyn ServerTransport>) -> Self {
        Self::with_registry(transport, Registry::global())
    }

    pub fn with_registry(transport: Arc<dyn ServerTransport>, registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                transport,
                registry,
                live: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Register an access point.
    ///
    /// At least one callback is required.
    pub fn server(
        &self,
        class: &str,
        name: &str,
        help: &str,
        send: Option<SendCallback>,
        receive: Option<ReceiveCallback>,
    ) -> Result<Server> {
        if send.is_none() && receive.is_none() {
            return Err(Error::Registration {
                message: format!("{class}:{name} needs a send or a receive callback"),
            });
        }
        let send_mode = send.as_ref().map(SendCallback::mode);
        let recv_mode = receive.as_ref().map(ReceiveCallback::mode);
        let handle = self.inner.transport.register(&Registration {
            class,
            name,
            help,
            send_mode: send_mode.as_deref(),
            recv_mode: recv_mode.as_deref(),
        })?;
        let Some(info) = self.inner.transport.info(handle) else {
            self.inner.transport.unregister(handle);
            return Err(Error::Registration {
                message: format!("{class}:{name} vanished right after registering"),
            });
        };
        if let Err(err) = self.inner.registry.insert(handle, send, receive) {
            self.inner.transport.unregister(handle);
            return Err(err);
        }
        self.inner.live.lock().insert(handle);
        tracing::debug!(server = handle.0, "{}:{} created", class, name);
        Ok(Server {
            handle,
            info,
            engine: self.inner.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of servers created here and not yet closed.
    pub fn servers(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Serve pending requests once.
    ///
    /// A negative `timeout_secs`, or one too large for a [`Duration`], blocks
    /// until a request arrives. A negative
    /// `max_requests` only reports how many are pending, `0` serves every
    /// pending request and `n > 0` serves at most `n`. Returns the number of
    /// requests served (or pending).
    pub fn poll(&self, timeout_secs: f64, max_requests: i32) -> Result<usize> {
        let timeout = Duration::try_from_secs_f64(timeout_secs).ok();
        self.poll_for(timeout, max_requests)
    }

    fn poll_for(&self, timeout: Option<Duration>, max_requests: i32) -> Result<usize> {
        let transport = self.inner.transport.as_ref();
        let mut dispatch = Trampoline {
            registry: &self.inner.registry,
            transport,
        };
        let n = transport.poll(timeout, max_requests, &mut dispatch);
        if n < 0 {
            return Err(Error::protocol(format!("poll failed with status {n}")));
        }
        if n > 0 {
            tracing::trace!(requests = n, "poll");
        }
        Ok(n as usize)
    }

    /// Serve requests until every server of this engine is closed.
    pub fn mainloop(&self) -> Result<()> {
        self.mainloop_until(&StopToken::new())
    }

    /// Serve requests until `stop` is triggered or every server is closed.
    ///
    /// A callback that triggers `stop` makes this return after the poll
    /// iteration it ran in.
    pub fn mainloop_until(&self, stop: &StopToken) -> Result<()> {
        while !stop.is_stopped() && self.servers() > 0 {
            self.poll_for(Some(POLL_SLICE), 0)?;
        }
        tracing::debug!(stopped = stop.is_stopped(), "mainloop finished");
        Ok(())
    }
}

/// A registered access point.
///
/// Closing is idempotent and also happens on drop.
pub struct Server {
    handle: ServerHandle,
    info: ServerInfo,
    engine: Arc<EngineInner>,
    closed: AtomicBool,
}

impl Server {
    pub fn handle(&self) -> ServerHandle {
        self.handle
    }

    /// What the transport reported at registration; `None` once closed.
    pub fn info(&self) -> Option<&ServerInfo> {
        (!self.is_closed()).then_some(&self.info)
    }

    pub fn class(&self) -> Option<String> {
        self.info().map(|info| info.class.clone())
    }

    pub fn name(&self) -> Option<String> {
        self.info().map(|info| info.name.clone())
    }

    /// Address the server listens on.
    pub fn method(&self) -> Option<String> {
        self.info().map(|info| info.method.clone())
    }

    pub fn send_mode(&self) -> ModeFlags {
        self.info().map(|info| info.send_mode).unwrap_or_default()
    }

    pub fn recv_mode(&self) -> ModeFlags {
        self.info().map(|info| info.recv_mode).unwrap_or_default()
    }

    pub fn server_endian(&self) -> Endian {
        self.info().map(|info| info.server_endian).unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unregister from the transport and drop the callbacks.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.engine.transport.unregister(self.handle);
        self.engine.registry.remove(self.handle);
        self.engine.live.lock().remove(&self.handle);
        tracing::debug!(server = self.handle.0, "closed");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("handle", &self.handle)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Entry points handed to the transport for one poll.
struct Trampoline<'a> {
    registry: &'a Registry,
    transport: &'a dyn ServerTransport,
}

impl Trampoline<'_> {
    /// Server facts, or a reported failure if the server is gone or its
    /// negotiated mode lacks `required`.
    fn prepare(&self, server: ServerHandle, negotiated: fn(&ServerInfo) -> ModeFlags, required: ModeFlags) -> Option<ServerInfo> {
        let Some(info) = self.transport.info(server) else {
            self.fail(server, "server is not registered");
            return None;
        };
        let mode = negotiated(&info);
        if !mode.contains(required) {
            let err = Error::Callback {
                message: format!(
                    "{}:{} mode {:?} lacks required {:?}",
                    info.class, info.name, mode, required
                ),
            };
            self.fail(server, &err.to_string());
            return None;
        }
        Some(info)
    }

    fn fail(&self, server: ServerHandle, message: &str) {
        tracing::warn!(server = server.0, "{}", message);
        self.transport.report_error(server, message);
    }

    /// Turn the outcome of a callback into a status, reporting failures the
    /// callback did not report itself.
    fn finish(&self, context: &ServerContext<'_>, kind: &str, outcome: std::thread::Result<Status>) -> Status {
        match outcome {
            Ok(Status::Success) => Status::Success,
            Ok(Status::Failure) => {
                if !context.error_reported() {
                    self.fail(
                        context.handle(),
                        &format!("{}:{} {kind} callback failed", context.class(), context.name()),
                    );
                }
                Status::Failure
            }
            Err(payload) => {
                let what = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                self.fail(
                    context.handle(),
                    &format!("{}:{} {kind} callback panicked: {what}", context.class(), context.name()),
                );
                Status::Failure
            }
        }
    }
}

impl Dispatch for Trampoline<'_> {
    fn send(&mut self, server: ServerHandle, request: &RequestInfo, params: &str, result: &mut Slot) -> Status {
        let Some(callbacks) = self.registry.lookup(server) else {
            self.fail(server, "no callbacks registered for server");
            return Status::Failure;
        };
        let Some(callback) = callbacks.send.as_ref() else {
            self.fail(server, "server has no send callback");
            return Status::Failure;
        };
        let Some(info) = self.prepare(server, |info| info.send_mode, ModeFlags::SEND_REQUIRED) else {
            return Status::Failure;
        };

        let context = ServerContext::new(server, self.transport, &info, request);
        let heap = self.transport.heap();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut buf = SendBuffer::new(result, heap);
            callback.lock().call(&context, params, &mut buf)
        }));
        let status = self.finish(&context, "send", outcome);
        if status == Status::Failure {
            result.clear();
        }
        status
    }

    fn receive(&mut self, server: ServerHandle, request: &RequestInfo, params: &str, payload: &[u8]) -> Status {
        let Some(callbacks) = self.registry.lookup(server) else {
            self.fail(server, "no callbacks registered for server");
            return Status::Failure;
        };
        let Some(callback) = callbacks.receive.as_ref() else {
            self.fail(server, "server has no receive callback");
            return Status::Failure;
        };
        let Some(info) = self.prepare(server, |info| info.recv_mode, ModeFlags::RECEIVE_REQUIRED) else {
            return Status::Failure;
        };

        let context = ServerContext::new(server, self.transport, &info, request);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            callback.lock().call(&context, params, &ReceiveBuffer::new(payload))
        }));
        self.finish(&context, "receive", outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use xpa_core::reply::AnswerSlots;
    use xpa_core::wire::{self, GetRequest, SetRequest};
    use xpa_core::{Config, Transport};
    use xpa_transport_local::LocalBus;

    fn setup() -> (LocalBus, Engine) {
        let bus = LocalBus::builder().config(Arc::new(Config::isolated())).build();
        let engine = Engine::with_registry(Arc::new(bus.endpoint()), Arc::new(Registry::new()));
        (bus, engine)
    }

    /// Issue a get from another thread while the engine polls here.
    fn get(bus: &LocalBus, engine: &Engine, target: &str, params: &str) -> AnswerSlots {
        let client = {
            let bus = bus.clone();
            let (target, params) = (target.to_string(), params.to_string());
            std::thread::spawn(move || {
                let mut answers = vec![AnswerSlots::default()];
                let request = GetRequest {
                    target: &target,
                    params: &params,
                    mode: "",
                    nmax: 1,
                };
                assert_eq!(bus.get(None, &request, &mut answers), 1);
                answers.pop().unwrap()
            })
        };
        assert_eq!(engine.poll(5.0, 1).unwrap(), 1);
        client.join().unwrap()
    }

    fn set(bus: &LocalBus, engine: &Engine, target: &str, params: &str, data: &[u8]) -> AnswerSlots {
        let client = {
            let bus = bus.clone();
            let (target, params, data) = (target.to_string(), params.to_string(), data.to_vec());
            std::thread::spawn(move || {
                let mut answers = vec![AnswerSlots::default()];
                let request = SetRequest {
                    target: &target,
                    params: &params,
                    mode: "",
                    nmax: 1,
                    data: &data,
                };
                assert_eq!(bus.set(None, &request, &mut answers), 1);
                answers.pop().unwrap()
            })
        };
        assert_eq!(engine.poll(5.0, 1).unwrap(), 1);
        client.join().unwrap()
    }

    #[test]
    fn server_needs_a_callback() {
        let (_, engine) = setup();
        let err = engine.server("T", "x", "", None, None).unwrap_err();
        assert!(matches!(err, Error::Registration { .. }));
        assert_eq!(engine.servers(), 0);
    }

    #[test]
    fn send_callback_result_reaches_client() {
        let (bus, engine) = setup();
        let send = SendCallback::new(41i32, |n, server, params, buf| {
            *n += 1;
            assert_eq!(params, "version");
            assert_eq!(server.class(), "TEST");
            buf.store_value(*n);
            Status::Success
        });
        let server = engine.server("TEST", "test1", "help", Some(send), None).unwrap();
        assert_eq!(server.class().as_deref(), Some("TEST"));
        assert!(server.send_mode().contains(ModeFlags::FREEBUF));

        let answer = get(&bus, &engine, "TEST:test1", "version");
        assert_eq!(xpa_core::data::decode::<i32>(answer.data.bytes()), vec![42]);
        drop(answer);
        assert_eq!(bus.heap().outstanding(), 0);
    }

    #[test]
    fn receive_callback_sees_payload() {
        let (bus, engine) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recv = ReceiveCallback::new(seen.clone(), |seen, _, params, buf| {
            seen.lock().push((params.to_string(), buf.text().into_owned()));
            Status::Success
        });
        let _server = engine.server("T", "x", "", None, Some(recv)).unwrap();
        let answer = set(&bus, &engine, "T:x", "load", b"data");
        assert!(answer.message.bytes().is_empty());
        assert_eq!(*seen.lock(), vec![("load".to_string(), "data".to_string())]);
    }

    #[test]
    fn failure_is_reported_as_error() {
        let (bus, engine) = setup();
        let send = SendCallback::from_fn(|server, _, buf| {
            buf.store_text("partial");
            server.error("disk full");
            Status::Failure
        });
        let _server = engine.server("T", "x", "", Some(send), None).unwrap();
        let answer = get(&bus, &engine, "T:x", "");
        let message = String::from_utf8_lossy(answer.message.bytes()).into_owned();
        assert!(message.starts_with("XPA$ERROR disk full ("), "{message}");
        assert!(!answer.data.is_owned());
    }

    #[test]
    fn unreported_failure_gets_a_diagnostic() {
        let (bus, engine) = setup();
        let send = SendCallback::from_fn(|_, _, _| Status::Failure);
        let _server = engine.server("T", "x", "", Some(send), None).unwrap();
        let answer = get(&bus, &engine, "T:x", "");
        let message = String::from_utf8_lossy(answer.message.bytes()).into_owned();
        assert!(message.contains("T:x send callback failed"), "{message}");
    }

    #[test]
    fn panic_is_caught() {
        let (bus, engine) = setup();
        let send = SendCallback::from_fn(|_, _, _| panic!("boom"));
        let _server = engine.server("T", "x", "", Some(send), None).unwrap();
        let answer = get(&bus, &engine, "T:x", "");
        assert!(wire::is_error(answer.message.bytes()));
        assert!(String::from_utf8_lossy(answer.message.bytes()).contains("boom"));
    }

    #[test]
    fn informational_message_is_attached() {
        let (bus, engine) = setup();
        let send = SendCallback::from_fn(|server, _, buf| {
            server.message("hello");
            buf.store_text("x");
            Status::Success
        });
        let _server = engine.server("T", "x", "", Some(send), None).unwrap();
        let answer = get(&bus, &engine, "T:x", "");
        assert!(wire::is_message(answer.message.bytes()));
        assert_eq!(answer.data.bytes(), b"x");
    }

    #[test]
    fn missing_required_mode_is_refused() {
        let (bus, engine) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let send = SendCallback::from_fn(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Status::Success
        })
        .freebuf(false);
        let _server = engine.server("T", "x", "", Some(send), None).unwrap();
        let answer = get(&bus, &engine, "T:x", "");
        assert!(wire::is_error(answer.message.bytes()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn close_is_idempotent_and_unregisters() {
        let (bus, engine) = setup();
        let send = SendCallback::from_fn(|_, _, _| Status::Success);
        let server = engine.server("T", "x", "", Some(send), None).unwrap();
        assert_eq!(bus.listing().lines().count(), 1);
        server.close();
        server.close();
        assert!(server.is_closed());
        assert!(server.info().is_none());
        assert!(bus.listing().is_empty());
        assert_eq!(engine.servers(), 0);
    }

    #[test]
    fn poll_reports_pending_count() {
        let (_, engine) = setup();
        let send = SendCallback::from_fn(|_, _, _| Status::Success);
        let _server = engine.server("T", "x", "", Some(send), None).unwrap();
        assert_eq!(engine.poll(0.0, -1).unwrap(), 0);
        assert_eq!(engine.poll(0.0, 0).unwrap(), 0);
    }

    #[test]
    fn unrepresentable_timeout_only_counts_when_max_is_negative() {
        let (bus, engine) = setup();
        let send = SendCallback::from_fn(|_, _, _| Status::Success);
        let _server = engine.server("T", "x", "", Some(send), None).unwrap();
        assert_eq!(engine.poll(f64::INFINITY, -1).unwrap(), 0);
        assert_eq!(engine.poll(f64::NAN, -1).unwrap(), 0);
        assert_eq!(engine.poll(1e300, -1).unwrap(), 0);

        // Any of them blocks like a negative timeout until a request lands.
        let client = std::thread::spawn(move || {
            let mut answers = vec![AnswerSlots::default()];
            let request = SetRequest {
                target: "T:x",
                params: "",
                mode: "",
                nmax: 1,
                data: b"",
            };
            bus.set(None, &request, &mut answers)
        });
        assert_eq!(engine.poll(f64::INFINITY, 0).unwrap(), 1);
        client.join().unwrap();
    }

    #[test]
    fn accessors_answer_from_registration() {
        let (bus, engine) = setup();
        let send = SendCallback::from_fn(|_, _, _| Status::Success);
        let server = engine.server("T", "x", "", Some(send), None).unwrap();
        let info = server.info().cloned().unwrap();
        assert_eq!(server.class().as_deref(), Some("T"));
        assert_eq!(server.name().as_deref(), Some("x"));
        assert_eq!(server.method(), Some(info.method.clone()));
        assert_eq!(server.send_mode(), info.send_mode);
        server.close();
        assert_eq!(server.class(), None);
        assert_eq!(server.send_mode(), ModeFlags::default());
    }

    #[test]
    fn mainloop_returns_when_stopped_by_callback() {
        let (bus, engine) = setup();
        let stop = StopToken::new();
        let recv = ReceiveCallback::new(stop.clone(), |stop, _, params, _| {
            if params == "quit" {
                stop.stop();
            }
            Status::Success
        });
        let _server = engine.server("T", "x", "", None, Some(recv)).unwrap();
        let client = std::thread::spawn(move || {
            let mut answers = vec![AnswerSlots::default()];
            let request = SetRequest {
                target: "T:x",
                params: "quit",
                mode: "",
                nmax: 1,
                data: b"",
            };
            bus.set(None, &request, &mut answers)
        });
        engine.mainloop_until(&stop).unwrap();
        assert!(stop.is_stopped());
        assert_eq!(client.join().unwrap(), 1);
    }

    #[test]
    fn mainloop_without_servers_returns() {
        let (_, engine) = setup();
        engine.mainloop().unwrap();
    }
}
