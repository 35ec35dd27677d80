//! Device placement for shard backends.

use serde::{Deserialize, Serialize};

/// Where a shard's data lives while it is searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    #[default]
    Cpu,
    Accelerator,
}

impl Placement {
    /// Resolves the requested placement against what this build supports.
    ///
    /// No accelerator backend is compiled into this crate, so a request for
    /// one falls back to [`Placement::Cpu`].
    pub fn resolve(use_accelerator: bool) -> Self {
        if use_accelerator && !accelerator_available() {
            tracing::warn!(
                "Accelerator placement requested but no accelerator backend is available; using CPU"
            );
            return Self::Cpu;
        }
        if use_accelerator {
            Self::Accelerator
        } else {
            Self::Cpu
        }
    }
}

/// Whether an accelerator backend can host shards in this build.
pub fn accelerator_available() -> bool {
    false
}
