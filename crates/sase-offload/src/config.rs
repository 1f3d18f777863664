//! Offload Configuration

use crate::error::{OffloadError, Result};
use sase_shm::{DrainerConfig, GeneralConfig, PollConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Offload control plane configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Boot handshake poll interval (ms)
    pub boot_poll_interval_ms: u64,
    /// Boot handshake timeout per step (ms)
    pub boot_timeout_ms: u64,
    /// Debug bridge poll interval (ms)
    pub bridge_poll_interval_ms: u64,
    /// Debug bridge timeout (ms)
    pub bridge_timeout_ms: u64,
    /// Wait between disabling an SA and clearing its records (ms)
    pub disable_grace_ms: u64,
    /// Debug ring drain interval while messages are pending (ms)
    pub debug_drain_interval_ms: u64,
    /// Drain without a kick every this many ms; 0 waits for kicks only
    pub debug_idle_poll_ms: u64,
    /// Firmware debug channel enabled
    pub debug_enabled: bool,
    /// Firmware debug verbosity
    pub debug_level: u32,
    /// Ring the doorbell after flag changes
    pub doorbell_enabled: bool,
    /// Command descriptor ring bus address
    pub cdr_base: u64,
    /// Result descriptor ring bus address
    pub rdr_base: u64,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            boot_poll_interval_ms: 1,
            boot_timeout_ms: 50,
            bridge_poll_interval_ms: 1,
            bridge_timeout_ms: 20,
            disable_grace_ms: 1,
            debug_drain_interval_ms: 10,
            debug_idle_poll_ms: 0,
            debug_enabled: true,
            debug_level: 2,
            doorbell_enabled: true,
            cdr_base: 0,
            rdr_base: 0,
        }
    }
}

impl OffloadConfig {
    /// Read a JSON config file and validate it. Missing keys keep their
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| OffloadError::InvalidConfig(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| OffloadError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
    }

    /// Reject zero timeouts and intervals longer than their timeout
    pub fn validate(&self) -> Result<()> {
        let pairs = [
            ("boot", self.boot_poll_interval_ms, self.boot_timeout_ms),
            ("bridge", self.bridge_poll_interval_ms, self.bridge_timeout_ms),
        ];
        for (what, interval, timeout) in pairs {
            if timeout == 0 {
                return Err(OffloadError::InvalidConfig(format!("{what} timeout is zero")));
            }
            if interval > timeout {
                return Err(OffloadError::InvalidConfig(format!(
                    "{what} poll interval {interval}ms exceeds timeout {timeout}ms"
                )));
            }
        }
        if self.debug_drain_interval_ms == 0 {
            return Err(OffloadError::InvalidConfig("debug drain interval is zero".into()));
        }
        Ok(())
    }

    /// Boot handshake polling
    pub fn boot_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.boot_poll_interval_ms),
            Duration::from_millis(self.boot_timeout_ms),
        )
    }

    /// Debug bridge polling
    pub fn bridge_poll(&self) -> PollConfig {
        PollConfig::new(
            Duration::from_millis(self.bridge_poll_interval_ms),
            Duration::from_millis(self.bridge_timeout_ms),
        )
    }

    /// Disable grace period
    pub fn disable_grace(&self) -> Duration {
        Duration::from_millis(self.disable_grace_ms)
    }

    /// Debug drainer settings
    pub fn drainer(&self) -> DrainerConfig {
        DrainerConfig {
            interval: Duration::from_millis(self.debug_drain_interval_ms),
            idle_poll: (self.debug_idle_poll_ms > 0).then(|| Duration::from_millis(self.debug_idle_poll_ms)),
        }
    }

    /// General section written at boot
    pub fn general(&self) -> GeneralConfig {
        GeneralConfig {
            cdr_base: self.cdr_base,
            rdr_base: self.rdr_base,
            debug_level: self.debug_level,
            debug_enabled: self.debug_enabled,
            doorbell: self.doorbell_enabled,
            ..GeneralConfig::default()
        }
    }
}
