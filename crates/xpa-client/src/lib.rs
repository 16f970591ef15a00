//! XPA client.
//!
//! A [`Connection`] talks to a [`Transport`](xpa_core::Transport). Requests
//! name their target as a [`Target`]: an access point, a literal address, a
//! pattern resolved through the name server, or a template fanned out by the
//! transport. Answers come back as a [`Reply`](xpa_core::Reply) that owns its
//! buffers until they are extracted.
//!
//! ```no_run
//! use std::sync::Arc;
//! use xpa_client::{Connection, RequestOptions};
//! use xpa_core::Shape;
//! use xpa_transport_local::LocalBus;
//!
//! let conn = Connection::open(Arc::new(LocalBus::new()))?;
//! let version = conn
//!     .get_as::<u8, _>(&Shape::Text, "DS9:*", &["version"], &RequestOptions::new())?
//!     .into_text();
//! println!("{version:?}");
//! # Ok::<(), xpa_core::Error>(())
//! ```

mod connection;
mod directory;
mod request;

pub use connection::Connection;
pub use directory::{ListOptions, OnMalformed, Select, choose, parse_listing};
pub use request::{Payload, RequestOptions, Target};

/// Empty argument list.
pub const NO_ARGS: &[&str] = &[];
