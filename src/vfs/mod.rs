//! Filesystem operations on top of the mailbox
//!
//! Design:
//! - One operation, one call: lock, compose, send, wait, decompose, unlock
//! - Negative status words become [`HostError`]; the rest pass through
//! - Transfers larger than `max_data` are split, never sent oversized
//!
//! Modules:
//! - `client`: the call machinery and one method per host operation
//! - `chunked`: file reads and writes split into `max_data` chunks
//! - `attr`: attribute block packing
//! - `types`, `opcode`, `error`: wire-level enumerations

mod attr;
mod chunked;
mod client;
mod error;
mod opcode;
mod types;

pub use attr::{AttrError, Attributes};
pub use client::{CallState, Vfs, MESSAGE_ID};
pub use error::{check_status, HostError};
pub use opcode::Opcode;
pub use types::{AttrMask, Handle, ObjectType, OpenFlags};
