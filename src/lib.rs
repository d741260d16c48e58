//! VMFS - guest-side client for a host filesystem over a message box
//!
//! Layers:
//! - `protocol`: tagged, word-aligned binary messages (Composer/Decomposer)
//! - `mailbox`: exclusive blocking transport (loopback, shared memory, TCP)
//! - `vfs`: one RPC per filesystem operation, chunked file transfer
//!
//! ```no_run
//! use vmfs::mailbox::SocketMailbox;
//! use vmfs::{AttrMask, Vfs};
//!
//! # fn main() -> vmfs::Result<()> {
//! let mailbox = SocketMailbox::connect("127.0.0.1:7070".parse().unwrap(), 8192)?;
//! let vfs = Vfs::new(mailbox);
//! for entry in vfs.read_dir_all("/", AttrMask::NAME | AttrMask::SIZE)? {
//!     println!("{:?} {:?}", entry.name, entry.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod mailbox;
pub mod protocol;
pub mod vfs;

pub use config::VfsConfig;
pub use error::{Error, Result};
pub use vfs::{AttrMask, Attributes, Handle, HostError, ObjectType, OpenFlags, Vfs};
