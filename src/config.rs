//! Client limits

use std::env;

use crate::error::{Error, Result};

/// Largest message in either direction
pub const DEFAULT_MAX_MESSAGE: usize = 8192;
/// Largest data block per read or write call
pub const DEFAULT_MAX_DATA: usize = 4096;

/// Room a request or reply needs besides its data block: envelope,
/// handle, offset, tags.
pub const MESSAGE_OVERHEAD: usize = 64;

pub const ENV_MAX_MESSAGE: &str = "VMFS_MAX_MESSAGE";
pub const ENV_MAX_DATA: &str = "VMFS_MAX_DATA";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsConfig {
    /// Send and receive buffer size
    pub max_message: usize,
    /// Chunk size for file reads and writes
    pub max_data: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            max_message: DEFAULT_MAX_MESSAGE,
            max_data: DEFAULT_MAX_DATA,
        }
    }
}

impl VfsConfig {
    /// Defaults overridden by `VMFS_MAX_MESSAGE` / `VMFS_MAX_DATA`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = read_env(ENV_MAX_MESSAGE)? {
            config.max_message = v;
        }
        if let Some(v) = read_env(ENV_MAX_DATA)? {
            config.max_data = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_data(mut self, max_data: usize) -> Self {
        self.max_data = max_data;
        self
    }

    /// Shrink the limits so a message fits a mailbox of `capacity` bytes.
    ///
    /// `max_data` stays at least 1 so chunking always makes progress; on a
    /// mailbox smaller than [`MESSAGE_OVERHEAD`] data calls then fail with a
    /// codec overflow.
    pub fn fit_to(mut self, capacity: usize) -> Self {
        self.max_message = self.max_message.min(capacity);
        self.max_data = self
            .max_data
            .min(self.max_message.saturating_sub(MESSAGE_OVERHEAD))
            .max(1);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_data == 0 {
            return Err(Error::Config("max_data must be non-zero".into()));
        }
        if self.max_data + MESSAGE_OVERHEAD > self.max_message {
            return Err(Error::Config(format!(
                "max_data {} leaves no room for the envelope in max_message {}",
                self.max_data, self.max_message
            )));
        }
        if self.max_data > crate::protocol::MAX_PAYLOAD_LEN {
            return Err(Error::Config(format!(
                "max_data {} exceeds the tag length field",
                self.max_data
            )));
        }
        Ok(())
    }
}

fn read_env(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{}={:?} is not a size", key, v))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => {
            Err(Error::Config(format!("{} is not valid unicode", key)))
        }
    }
}
