//! Capability store configuration.

use std::time::Duration;

use grainkeeper_core::SECRET_LEN;

/// Configuration for minting and redeeming sturdy refs.
#[derive(Debug, Clone)]
pub struct CapsConfig {
    /// Calls made into a grain before a disconnect is given up on.
    /// The default of 2 is the first call plus one retry after a restart.
    pub restore_attempts: u32,
    /// Random bytes per freshly minted secret.
    pub secret_len: usize,
    /// Lifetime of minted tokens. `None` means they never expire.
    pub token_ttl: Option<Duration>,
}

impl Default for CapsConfig {
    fn default() -> Self {
        Self {
            restore_attempts: 2,
            secret_len: SECRET_LEN,
            token_ttl: None,
        }
    }
}
