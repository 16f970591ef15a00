//! Server side of the bus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use xpa_core::wire::{self, Mode};
use xpa_core::{
    Access, AccessPoint, Dispatch, Endian, Error, Heap, ModeFlags, Registration, Result,
    ServerHandle, ServerInfo, ServerTransport, Slot, Status,
};

use crate::bus::{BusInner, ServerEntry, next_server_handle};
use crate::queue::{Job, JobKind, Outcome, Queue};

/// Send mode flags a server gets unless its mode string says otherwise.
pub const DEFAULT_SEND_MODE: ModeFlags = ModeFlags::ACL.union(ModeFlags::FREEBUF);

/// Receive mode flags a server gets unless its mode string says otherwise.
pub const DEFAULT_RECEIVE_MODE: ModeFlags = ModeFlags::all();

/// Parameter answered by the endpoint itself with the server's help text.
const HELP_PARAM: &str = "-help";

#[derive(Default)]
struct Report {
    error: Option<String>,
    message: Option<String>,
}

/// Requests for every server registered through one endpoint arrive on the
/// same queue and are served by [`ServerTransport::poll`].
pub struct LocalEndpoint {
    bus: Arc<BusInner>,
    queue: Arc<Queue>,
    servers: Mutex<HashSet<ServerHandle>>,
    reports: Mutex<HashMap<ServerHandle, Report>>,
}

/// Marks the queue as polled by this thread while alive.
struct PollerGuard<'a>(&'a Queue);

impl<'a> PollerGuard<'a> {
    fn enter(queue: &'a Queue) -> Self {
        queue.set_poller(Some(std::thread::current().id()));
        Self(queue)
    }
}

impl Drop for PollerGuard<'_> {
    fn drop(&mut self) {
        self.0.set_poller(None);
    }
}

fn modes(mode: Option<&str>, defaults: ModeFlags) -> Result<ModeFlags> {
    match mode {
        None => Ok(ModeFlags::empty()),
        Some(mode) => ModeFlags::from_mode(&Mode::parse(mode)?, defaults),
    }
}

impl LocalEndpoint {
    pub(crate) fn new(bus: Arc<BusInner>) -> Self {
        Self {
            bus,
            queue: Arc::new(Queue::default()),
            servers: Mutex::new(HashSet::new()),
            reports: Mutex::new(HashMap::new()),
        }
    }

    /// Requests waiting to be served.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Servers registered through this endpoint.
    pub fn servers(&self) -> usize {
        self.servers.lock().len()
    }

    fn serve(&self, job: Job, dispatch: &mut dyn Dispatch) {
        let Some(entry) = self.bus.server(job.server) else {
            let _ = job.reply.send(Outcome {
                message: wire::format_error("no such server", "?"),
                data: None,
            });
            return;
        };
        let id = entry.id();
        let handle = job.server;

        if matches!(job.kind, JobKind::Get) && job.params.trim() == HELP_PARAM {
            let help = format!("{}\n", entry.help);
            let _ = job.reply.send(Outcome {
                message: String::new(),
                data: Some(self.bus.heap.adopt(help.into_bytes())),
            });
            return;
        }

        self.reports.lock().remove(&handle);
        let (status, data) = match job.kind {
            JobKind::Get => {
                let mut result = Slot::default();
                let status = dispatch.send(handle, &job.info, &job.params, &mut result);
                (status, result.take())
            }
            JobKind::Set { data } => {
                let status = dispatch.receive(handle, &job.info, &job.params, data.as_slice());
                (status, None)
            }
        };
        let report = self.reports.lock().remove(&handle).unwrap_or_default();

        let outcome = match (report.error, status) {
            (Some(error), _) => Outcome {
                message: wire::format_error(&error, &id),
                data: None,
            },
            (None, Status::Failure) => Outcome {
                message: wire::format_error("callback failed", &id),
                data: None,
            },
            (None, Status::Success) => Outcome {
                message: report
                    .message
                    .map(|text| wire::format_message(&text, &id))
                    .unwrap_or_default(),
                data,
            },
        };
        if job.reply.send(outcome).is_err() {
            tracing::trace!(server = %id, "client stopped waiting");
        }
    }
}

impl ServerTransport for LocalEndpoint {
    fn heap(&self) -> &Heap {
        &self.bus.heap
    }

    fn register(&self, registration: &Registration<'_>) -> Result<ServerHandle> {
        if registration.send_mode.is_none() && registration.recv_mode.is_none() {
            return Err(Error::Registration {
                message: format!(
                    "{}:{} has neither a send nor a receive callback",
                    registration.class, registration.name
                ),
            });
        }
        let send_mode = modes(registration.send_mode, DEFAULT_SEND_MODE)?;
        let recv_mode = modes(registration.recv_mode, DEFAULT_RECEIVE_MODE)?;
        let mut access = Access::INFO;
        access.set(Access::GET, registration.send_mode.is_some());
        access.set(Access::SET, registration.recv_mode.is_some());

        let seq = self.bus.next_id();
        let address = self.bus.address_for(seq, registration.class, registration.name);
        // Validates class and name as listing tokens.
        AccessPoint::new(registration.class, registration.name, address.as_str(), "-", access)
            .map_err(|err| Error::Registration {
                message: err.to_string(),
            })?;

        let handle = next_server_handle();
        let info = ServerInfo {
            class: registration.class.to_string(),
            name: registration.name.to_string(),
            method: address,
            send_mode,
            recv_mode,
            server_endian: Endian::native(),
        };
        tracing::info!(
            server = %format_args!("{}:{}", info.class, info.name),
            address = %info.method,
            access = %access,
            "registered"
        );
        self.bus.insert_server(
            handle,
            ServerEntry {
                handle,
                info,
                access,
                help: registration.help.to_string(),
                queue: self.queue.clone(),
            },
        );
        self.servers.lock().insert(handle);
        Ok(handle)
    }

    fn unregister(&self, server: ServerHandle) {
        if !self.servers.lock().remove(&server) {
            return;
        }
        let Some(entry) = self.bus.remove_server(server) else {
            return;
        };
        let id = entry.id();
        for job in self.queue.drain_server(server) {
            let _ = job.reply.send(Outcome {
                message: wire::format_error("server was unregistered", &id),
                data: None,
            });
        }
        self.reports.lock().remove(&server);
        tracing::info!(server = %id, "unregistered");
    }

    fn info(&self, server: ServerHandle) -> Option<ServerInfo> {
        self.bus.server(server).map(|entry| entry.info.clone())
    }

    fn poll(&self, timeout: Option<Duration>, max_requests: i32, dispatch: &mut dyn Dispatch) -> i32 {
        if max_requests < 0 {
            return self.queue.len() as i32;
        }
        let _guard = PollerGuard::enter(&self.queue);
        if !self.queue.wait(timeout) {
            return 0;
        }
        let limit = match max_requests {
            0 => self.queue.len(),
            n => n as usize,
        };
        let mut served = 0;
        while served < limit {
            let Some(job) = self.queue.pop() else {
                break;
            };
            self.serve(job, dispatch);
            served += 1;
        }
        served as i32
    }

    fn report_error(&self, server: ServerHandle, message: &str) {
        self.reports.lock().entry(server).or_default().error = Some(message.to_string());
    }

    fn report_message(&self, server: ServerHandle, message: &str) {
        self.reports.lock().entry(server).or_default().message = Some(message.to_string());
    }
}

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        let servers: Vec<ServerHandle> = self.servers.lock().iter().copied().collect();
        for server in servers {
            self.unregister(server);
        }
    }
}
