//! The shared fabric: name server, client sessions and request routing.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};

use parking_lot::{Mutex, RwLock};
use xpa_core::access::{self, template_matches};
use xpa_core::reply::AnswerSlots;
use xpa_core::wire::{self, GetRequest, Mode, SetRequest};
use xpa_core::{
    Access, AccessPoint, ClientHandle, Config, Endian, Heap, Method, NAME_SERVER,
    RequestInfo, Result, ServerHandle, ServerInfo, Transport,
};

use crate::endpoint::LocalEndpoint;
use crate::queue::{Job, JobKind, Outcome, Queue};

/// Port of the name server; servers get the ports above it.
pub const NAME_SERVER_PORT: u16 = 14285;

const LOOPBACK_HOST: &str = "127.0.0.1";

/// Server handles are unique across every bus of the process, so one
/// callback registry can serve several buses.
static NEXT_SERVER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_server_handle() -> ServerHandle {
    ServerHandle(NEXT_SERVER.fetch_add(1, Ordering::Relaxed))
}

/// An in-process transport shared by every client and server of a process.
///
/// Cloning is cheap and yields a handle to the same bus.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

pub(crate) struct BusInner {
    pub heap: Heap,
    pub config: Arc<Config>,
    method: Method,
    owner: String,
    next_id: AtomicU64,
    clients: Mutex<HashSet<u64>>,
    servers: RwLock<BTreeMap<ServerHandle, Arc<ServerEntry>>>,
}

/// A registered access point.
pub(crate) struct ServerEntry {
    pub handle: ServerHandle,
    pub info: ServerInfo,
    pub access: Access,
    pub help: String,
    pub queue: Arc<Queue>,
}

impl ServerEntry {
    /// `CLASS:name address`, the id clients see in answers.
    pub fn id(&self) -> String {
        format!("{}:{} {}", self.info.class, self.info.name, self.info.method)
    }

    fn access_point(&self, owner: &str) -> Option<AccessPoint> {
        AccessPoint::new(
            self.info.class.as_str(),
            self.info.name.as_str(),
            self.info.method.as_str(),
            owner,
            self.access,
        )
        .ok()
    }
}

/// Builder for [`LocalBus`].
#[derive(Default)]
pub struct LocalBusBuilder {
    config: Option<Arc<Config>>,
    heap: Option<Heap>,
    method: Option<Method>,
    owner: Option<String>,
}

impl LocalBusBuilder {
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn heap(mut self, heap: Heap) -> Self {
        self.heap = Some(heap);
        self
    }

    /// Address form given to servers.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn build(self) -> LocalBus {
        let owner = self
            .owner
            .or_else(|| std::env::var("USER").ok())
            .filter(|o| !o.is_empty() && !o.contains(char::is_whitespace))
            .unwrap_or_else(|| "unknown".to_string());
        LocalBus {
            inner: Arc::new(BusInner {
                heap: self.heap.unwrap_or_default(),
                config: self.config.unwrap_or_else(|| Arc::new(Config::new())),
                method: self.method.unwrap_or(Method::Inet),
                owner,
                next_id: AtomicU64::new(1),
                clients: Mutex::new(HashSet::new()),
                servers: RwLock::new(BTreeMap::new()),
            }),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> LocalBusBuilder {
        LocalBusBuilder::default()
    }

    /// A server-side endpoint with its own request queue.
    ///
    /// Each endpoint stands for one serving process: requests for servers it
    /// registered are only served by polling it.
    pub fn endpoint(&self) -> LocalEndpoint {
        LocalEndpoint::new(self.inner.clone())
    }

    pub fn heap(&self) -> &Heap {
        &self.inner.heap
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.inner.config
    }

    /// Address of the embedded name server.
    pub fn name_server_address(&self) -> String {
        self.inner.address_for(0, "", "")
    }

    /// The name-server listing, one access point per line.
    pub fn listing(&self) -> String {
        self.inner.listing()
    }

    /// Number of open client sessions.
    pub fn open_sessions(&self) -> usize {
        self.inner.clients.lock().len()
    }
}

impl BusInner {
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Address of server `id`; id 0 is the name server.
    pub fn address_for(&self, id: u64, class: &str, name: &str) -> String {
        match self.method {
            Method::Inet => format!("{LOOPBACK_HOST}:{}", u64::from(NAME_SERVER_PORT) + id),
            Method::Local if id == 0 => self.config.tmpdir().join("xpans").display().to_string(),
            Method::Local => self
                .config
                .tmpdir()
                .join(format!("{class}_{name}.{id}"))
                .display()
                .to_string(),
        }
    }

    pub fn insert_server(&self, handle: ServerHandle, entry: ServerEntry) {
        self.servers.write().insert(handle, Arc::new(entry));
    }

    pub fn remove_server(&self, handle: ServerHandle) -> Option<Arc<ServerEntry>> {
        self.servers.write().remove(&handle)
    }

    pub fn server(&self, handle: ServerHandle) -> Option<Arc<ServerEntry>> {
        self.servers.read().get(&handle).cloned()
    }

    fn listing(&self) -> String {
        let servers = self.servers.read();
        let mut out = String::new();
        for apt in servers.values().filter_map(|s| s.access_point(&self.owner)) {
            out.push_str(&apt.to_string());
            out.push('\n');
        }
        out
    }

    fn check_client(&self, client: Option<ClientHandle>) -> bool {
        match client {
            None => true,
            Some(handle) => self.clients.lock().contains(&handle.0),
        }
    }

    fn is_name_server(&self, target: &str) -> bool {
        if access::is_address(target) {
            target == self.address_for(0, "", "")
        } else {
            target.eq_ignore_ascii_case(NAME_SERVER)
        }
    }

    /// Servers a request reaches, in registration order.
    ///
    /// A literal address reaches its server whatever its access; the caller
    /// turns a missing access bit into an error answer. Templates only reach
    /// servers granting `needed`.
    fn targets(&self, target: &str, needed: Access, limit: usize) -> Vec<Arc<ServerEntry>> {
        let servers = self.servers.read();
        let literal = access::is_address(target);
        servers
            .values()
            .filter(|s| {
                if literal {
                    s.info.method == target
                } else {
                    s.access.contains(needed)
                        && template_matches(target, &s.info.class, &s.info.name)
                }
            })
            .take(limit)
            .cloned()
            .collect()
    }

    fn answer_listing(&self, answers: &mut [AnswerSlots]) -> i32 {
        let Some(slots) = answers.first_mut() else {
            return 0;
        };
        let id = format!("{NAME_SERVER} {}", self.address_for(0, "", ""));
        slots.server.store(self.heap.alloc(id.as_bytes()));
        slots.message.store(self.heap.alloc(b""));
        slots.data.store(self.heap.adopt(self.listing().into_bytes()));
        1
    }

    /// Queue one request per target and collect the outcomes in order.
    fn exchange(
        &self,
        target: &str,
        mode: &str,
        params: &str,
        needed: Access,
        data: Option<&[u8]>,
        answers: &mut [AnswerSlots],
    ) -> i32 {
        let mode = match Mode::parse(mode) {
            Ok(mode) => mode,
            Err(err) => {
                tracing::warn!("rejecting request to {}: {}", target, err);
                return -1;
            }
        };
        let ack = mode.flag("ack").ok().flatten().unwrap_or(true);
        let servers = self.targets(target, needed, answers.len());
        let info = RequestInfo {
            client_endian: Endian::native(),
            ack,
            ..RequestInfo::default()
        };

        let mut waiting = Vec::with_capacity(servers.len());
        for server in &servers {
            if !server.access.contains(needed) {
                let verb = if needed == Access::GET { "xpaget" } else { "xpaset" };
                waiting.push(Err(format!("no '{verb}' access")));
                continue;
            }
            if server.queue.polled_by_current_thread() {
                waiting.push(Err("request would block its own server loop".to_string()));
                continue;
            }
            let (tx, rx) = mpsc::sync_channel(1);
            let kind = match data {
                Some(bytes) => JobKind::Set {
                    data: self.heap.alloc(bytes),
                },
                None => JobKind::Get,
            };
            server.queue.push(Job {
                server: server.handle,
                kind,
                params: params.to_string(),
                info: info.clone(),
                reply: tx,
            });
            waiting.push(Ok(rx));
        }

        let timeout = self.config.long_timeout();
        for ((server, pending), slots) in servers.iter().zip(waiting).zip(answers.iter_mut()) {
            let id = server.id();
            let outcome = match pending {
                Err(text) => Outcome {
                    message: wire::format_error(&text, &id),
                    data: None,
                },
                Ok(_) if !ack => Outcome {
                    message: String::new(),
                    data: None,
                },
                Ok(rx) => match rx.recv_timeout(timeout) {
                    Ok(outcome) => outcome,
                    Err(RecvTimeoutError::Timeout) => Outcome {
                        message: wire::format_error("timeout waiting for server", &id),
                        data: None,
                    },
                    Err(RecvTimeoutError::Disconnected) => Outcome {
                        message: wire::format_error("server went away", &id),
                        data: None,
                    },
                },
            };
            slots.server.store(self.heap.alloc(id.as_bytes()));
            slots.message.store(self.heap.adopt(outcome.message.into_bytes()));
            if let Some(buffer) = outcome.data {
                // The server's buffer is freed here, after the client got its copy.
                slots.data.store(self.heap.alloc(buffer.as_slice()));
            }
        }
        tracing::debug!(to = target, answers = servers.len(), "request served");
        servers.len() as i32
    }
}

impl Transport for LocalBus {
    fn heap(&self) -> &Heap {
        &self.inner.heap
    }

    fn open(&self) -> Result<ClientHandle> {
        let id = self.inner.next_id();
        self.inner.clients.lock().insert(id);
        tracing::debug!(client = id, "session opened");
        Ok(ClientHandle(id))
    }

    fn close(&self, client: ClientHandle) {
        if self.inner.clients.lock().remove(&client.0) {
            tracing::debug!(client = client.0, "session closed");
        }
    }

    fn get(&self, client: Option<ClientHandle>, request: &GetRequest<'_>, answers: &mut [AnswerSlots]) -> i32 {
        if !self.inner.check_client(client) {
            tracing::warn!("get on unknown session {:?}", client);
            return -1;
        }
        if self.inner.is_name_server(request.target) {
            return self.inner.answer_listing(answers);
        }
        self.inner.exchange(
            request.target,
            request.mode,
            request.params,
            Access::GET,
            None,
            answers,
        )
    }

    fn set(&self, client: Option<ClientHandle>, request: &SetRequest<'_>, answers: &mut [AnswerSlots]) -> i32 {
        if !self.inner.check_client(client) {
            tracing::warn!("set on unknown session {:?}", client);
            return -1;
        }
        self.inner.exchange(
            request.target,
            request.mode,
            request.params,
            Access::SET,
            Some(request.data),
            answers,
        )
    }
}
