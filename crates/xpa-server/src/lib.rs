//! XPA server callback engine.
//!
//! An [`Engine`] registers access points on a [`ServerTransport`] and serves
//! their requests from [`Engine::poll`] or [`Engine::mainloop`]. Callbacks run
//! to completion on the polling thread, one at a time.
//!
//! ```no_run
//! use std::sync::Arc;
//! use xpa_core::Status;
//! use xpa_server::{Engine, SendCallback};
//! use xpa_transport_local::LocalBus;
//!
//! let bus = LocalBus::new();
//! let engine = Engine::new(Arc::new(bus.endpoint()));
//! let version = SendCallback::from_fn(|_, _, buf| {
//!     buf.store_text("1.0");
//!     Status::Success
//! });
//! let _server = engine.server("DEMO", "version", "reports a version", Some(version), None)?;
//! engine.mainloop()?;
//! # Ok::<(), xpa_core::Error>(())
//! ```
//!
//! [`ServerTransport`]: xpa_core::ServerTransport

mod buffer;
mod callback;
mod engine;
mod registry;

pub use buffer::{ReceiveBuffer, SendBuffer};
pub use callback::{ReceiveCallback, SendCallback, ServerContext};
pub use engine::{Engine, POLL_SLICE, Server, StopToken};
pub use registry::Registry;
pub use xpa_core::Status;
