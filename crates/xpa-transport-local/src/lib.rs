//! In-process XPA transport.
//!
//! A [`LocalBus`] plays the part of the name server and the network: clients
//! call it through [`Transport`](xpa_core::Transport), servers register on a
//! [`LocalEndpoint`] and serve requests by polling it from their own thread.
//! Addresses are synthesised per server (`127.0.0.1:<port>` or a socket path
//! under `XPA_TMPDIR`) so that listings look like the real thing.

mod bus;
mod endpoint;
mod queue;

pub use bus::{LocalBus, LocalBusBuilder, NAME_SERVER_PORT};
pub use endpoint::{DEFAULT_RECEIVE_MODE, DEFAULT_SEND_MODE, LocalEndpoint};
