//! Client sessions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use xpa_core::{ClientHandle, Config, Error, Result, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open(ClientHandle),
    /// Every request opens and closes its own session.
    Temporary,
    Closed,
}

struct Session {
    transport: Arc<dyn Transport>,
    config: Option<Arc<Config>>,
    state: Mutex<State>,
}

impl Session {
    fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Closed);
        if let State::Open(handle) = previous {
            self.transport.close(handle);
            tracing::debug!(client = handle.0, "connection closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// A client session with a transport.
///
/// Clones share the session; it is closed by [`Connection::close`] or when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    session: Arc<Session>,
}

thread_local! {
    static PER_THREAD: RefCell<HashMap<usize, Connection>> = RefCell::new(HashMap::new());
}

impl Connection {
    /// Open a persistent session.
    pub fn open(transport: Arc<dyn Transport>) -> Result<Self> {
        let handle = transport.open().map_err(|err| match err {
            Error::Connection { .. } => err,
            other => Error::connection(other.to_string()),
        })?;
        tracing::debug!(client = handle.0, "connection opened");
        Ok(Self::with_state(transport, State::Open(handle)))
    }

    /// A connection that uses a fresh session for every request.
    ///
    /// Cheaper for processes that only issue a handful of requests.
    pub fn temporary(transport: Arc<dyn Transport>) -> Self {
        Self::with_state(transport, State::Temporary)
    }

    /// The calling thread's cached connection to `transport`.
    ///
    /// The connection is opened on first use and reopened if it was closed
    /// since. It is closed when the thread exits.
    pub fn per_thread(transport: Arc<dyn Transport>) -> Result<Self> {
        let key = Arc::as_ptr(&transport) as *const () as usize;
        PER_THREAD.with(|cache| {
            if let Some(conn) = cache.borrow().get(&key)
                && conn.is_open()
            {
                return Ok(conn.clone());
            }
            let conn = Connection::open(transport)?;
            cache.borrow_mut().insert(key, conn.clone());
            Ok(conn)
        })
    }

    fn with_state(transport: Arc<dyn Transport>, state: State) -> Self {
        Self {
            session: Arc::new(Session {
                transport,
                config: None,
                state: Mutex::new(state),
            }),
        }
    }

    /// Read settings such as `XPA_MAXHOSTS` from `config` instead of the
    /// process-wide store.
    ///
    /// Only affects a connection whose session is not shared yet.
    pub fn with_config(mut self, config: Arc<Config>) -> Self {
        if let Some(session) = Arc::get_mut(&mut self.session) {
            session.config = Some(config);
        }
        self
    }

    /// Release the session. Later calls are no-ops; requests on a closed
    /// connection fail with a connection error.
    pub fn close(&self) {
        self.session.close();
    }

    pub fn is_open(&self) -> bool {
        *self.session.state.lock() != State::Closed
    }

    pub fn is_temporary(&self) -> bool {
        *self.session.state.lock() == State::Temporary
    }

    pub fn config(&self) -> &Config {
        self.session.config.as_deref().unwrap_or_else(|| Config::global())
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.session.transport.as_ref()
    }

    /// Handle to pass to the transport; `None` for a temporary connection.
    pub(crate) fn client(&self) -> Result<Option<ClientHandle>> {
        match *self.session.state.lock() {
            State::Open(handle) => Ok(Some(handle)),
            State::Temporary => Ok(None),
            State::Closed => Err(Error::connection("connection used after close")),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &*self.session.state.lock())
            .finish()
    }
}
