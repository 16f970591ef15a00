//! Side table from server handles to their callbacks.
//!
//! The transport only knows [`ServerHandle`]s. When a request arrives it
//! hands the handle back to the engine, which looks the callbacks up here.
//! Entries are inserted when a server is created and removed when it is
//! closed; lookups clone an `Arc` out of a read lock so that a running
//! callback never holds the table.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use xpa_core::{Error, Result, ServerHandle};

use crate::callback::{ReceiveCallback, SendCallback};

/// Callbacks of one server.
pub(crate) struct Callbacks {
    pub send: Option<Mutex<SendCallback>>,
    pub receive: Option<Mutex<ReceiveCallback>>,
}

/// Process-wide table of live servers.
///
/// Tests create their own with [`Registry::new`] so that several engines can
/// run in one binary without sharing entries.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<ServerHandle, Arc<Callbacks>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every engine that was not given its own.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Registry::new())).clone()
    }

    pub(crate) fn insert(
        &self,
        server: ServerHandle,
        send: Option<SendCallback>,
        receive: Option<ReceiveCallback>,
    ) -> Result<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(&server) {
            return Err(Error::Registration {
                message: format!("server handle {} is already registered", server.0),
            });
        }
        entries.insert(
            server,
            Arc::new(Callbacks {
                send: send.map(Mutex::new),
                receive: receive.map(Mutex::new),
            }),
        );
        Ok(())
    }

    pub(crate) fn remove(&self, server: ServerHandle) -> bool {
        self.entries.write().remove(&server).is_some()
    }

    pub(crate) fn lookup(&self, server: ServerHandle) -> Option<Arc<Callbacks>> {
        self.entries.read().get(&server).cloned()
    }

    pub fn contains(&self, server: ServerHandle) -> bool {
        self.entries.read().contains_key(&server)
    }

    /// Number of live servers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
