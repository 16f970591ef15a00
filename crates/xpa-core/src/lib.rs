//! Core types for the XPA messaging layer.
//!
//! Processes find each other by `class:name` through a name server, then
//! exchange short commands and binary payloads: `get` pulls data from every
//! matching server, `set` pushes data to them. This crate holds what both
//! sides share: the wire conventions, access-point records, replies and the
//! ownership rules for buffers crossing the transport boundary.

pub mod access;
pub mod buffer;
pub mod config;
pub mod data;
mod error;
pub mod reply;
pub mod transport;
pub mod wire;

pub use access::{Access, AccessPoint, Method};
pub use buffer::{ForeignBuffer, Heap, Slot};
pub use config::{Config, Value};
pub use data::{Array, Data, Element, Extraction, Shape};
pub use error::{Error, Result};
pub use reply::{Entry, Reply, ReplyKind};
pub use transport::{
    ClientHandle, Dispatch, NAME_SERVER, Registration, RequestInfo, ServerHandle, ServerInfo,
    ServerTransport, Status, Transport,
};
pub use wire::{Endian, ModeFlags};
