//! Boot Handshake
//!
//! `load_stat` only moves forward:
//!
//! ```text
//! NOT_LOADED ──fw──► LOADED_IN_CCM ──host──► GENCONF_SET ──fw──► STARTS
//! ```
//!
//! Each step is a distinct type. The general configuration writer exists
//! only on [`Loaded`], which is obtained by observing `LOADED_IN_CCM`, and
//! the tunnel table writers exist only on [`Running`]. A host that has not
//! seen the firmware come up has no way to write configuration.

use crate::bridge::DebugBridge;
use crate::debug::DebugChannel;
use crate::descriptors::RingView;
use crate::flags::HostFlags;
use crate::layout::*;
use crate::platform::PlatformStatus;
use crate::poll::{poll_until, PollConfig};
use crate::region::SharedMemory;
use crate::tables::TunnelTables;
use crate::{Result, ShmError};

/// Boot load state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum LoadStat {
    /// Image not relocated yet
    NotLoaded = 0,
    /// Firmware is in core-coupled memory, waiting for configuration
    LoadedInCcm = 1,
    /// Host finished the general configuration
    GenconfSet = 2,
    /// Firmware main loop running
    Starts = 3,
}

impl LoadStat {
    /// Decode the `load_stat` word
    pub fn from_word(word: u32) -> Result<Self> {
        Ok(match word {
            0 => LoadStat::NotLoaded,
            1 => LoadStat::LoadedInCcm,
            2 => LoadStat::GenconfSet,
            3 => LoadStat::Starts,
            other => return Err(ShmError::InvalidLoadStat(other)),
        })
    }
}

fn read_load_stat<M: SharedMemory>(region: &M) -> Result<LoadStat> {
    LoadStat::from_word(region.read_word(LOAD_STAT))
}

/// Static configuration written once between `LOADED_IN_CCM` and `GENCONF_SET`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneralConfig {
    /// Command descriptor ring bus address
    pub cdr_base: u64,
    /// Result descriptor ring bus address
    pub rdr_base: u64,
    /// Command ring entries
    pub cdr_entries: u16,
    /// Result ring entries
    pub rdr_entries: u16,
    /// Firmware debug verbosity
    pub debug_level: u32,
    /// Debug channel enabled
    pub debug_enabled: bool,
    /// Host rings the doorbell on flag changes
    pub doorbell: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cdr_base: 0,
            rdr_base: 0,
            cdr_entries: RING_ENTRIES as u16,
            rdr_entries: RING_ENTRIES as u16,
            debug_level: 2,
            debug_enabled: true,
            doorbell: false,
        }
    }
}

impl GeneralConfig {
    fn flags(&self) -> u32 {
        let mut f = 0;
        if self.debug_enabled {
            f |= GEN_FLAG_DEBUG;
        }
        if self.doorbell {
            f |= GEN_FLAG_DOORBELL;
        }
        f
    }

    /// Read a configuration back out of a region
    pub fn read<M: SharedMemory>(region: &M) -> Self {
        let flags = region.read_word(GEN_FLAGS);
        let sizes = region.read_word(GEN_RING_SIZES);
        let wide = |lo, hi| region.read_word(lo) as u64 | (region.read_word(hi) as u64) << 32;
        Self {
            cdr_base: wide(GEN_CDR_BASE_LO, GEN_CDR_BASE_HI),
            rdr_base: wide(GEN_RDR_BASE_LO, GEN_RDR_BASE_HI),
            cdr_entries: sizes as u16,
            rdr_entries: (sizes >> 16) as u16,
            debug_level: region.read_word(GEN_DEBUG_LEVEL),
            debug_enabled: flags & GEN_FLAG_DEBUG != 0,
            doorbell: flags & GEN_FLAG_DOORBELL != 0,
        }
    }
}

/// Firmware status reader
pub struct FwStatus<'a, M: SharedMemory> {
    region: &'a M,
}

impl<M: SharedMemory> FwStatus<'_, M> {
    /// `(major, minor)`
    pub fn version(&self) -> (u8, u8) {
        let v = self.region.read_word(FW_VERSION);
        ((v >> 8) as u8, v as u8)
    }

    /// Main-loop heartbeat counter
    pub fn heartbeat(&self) -> u32 {
        self.region.read_word(FW_HEARTBEAT)
    }

    /// Layout compat id the firmware was built with
    pub fn compat_id(&self) -> u32 {
        self.region.read_word(FW_COMPAT_ECHO)
    }
}

/// Region before `LOADED_IN_CCM` has been observed
pub struct Boot<M: SharedMemory> {
    region: M,
}

impl<M: SharedMemory> Boot<M> {
    /// Take the region; fails if it cannot hold the compiled layout
    pub fn new(region: M) -> Result<Self> {
        if region.size() < SHM_SIZE {
            return Err(ShmError::RegionTooSmall {
                needed: SHM_SIZE,
                actual: region.size(),
            });
        }
        Ok(Self { region })
    }

    /// Current load state
    pub fn state(&self) -> Result<LoadStat> {
        read_load_stat(&self.region)
    }

    /// Wait for the firmware to report it is loaded
    pub fn await_loaded(self, poll: PollConfig) -> Result<Loaded<M>> {
        poll_until(poll, "LOADED_IN_CCM", || match read_load_stat(&self.region)? {
            LoadStat::NotLoaded => Ok(None),
            LoadStat::LoadedInCcm => Ok(Some(())),
            found => Err(ShmError::BootState {
                expected: LoadStat::LoadedInCcm,
                found,
            }),
        })?;
        tracing::debug!("firmware loaded in CCM");
        Ok(Loaded { region: self.region })
    }
}

/// Region after `LOADED_IN_CCM`: general configuration may be written
pub struct Loaded<M: SharedMemory> {
    region: M,
}

impl<M: SharedMemory> Loaded<M> {
    /// Write the static configuration; tunnel flags start disabled
    pub fn write_general(&self, cfg: &GeneralConfig) {
        let r = &self.region;
        r.write_word(GEN_CDR_BASE_LO, cfg.cdr_base as u32);
        r.write_word(GEN_CDR_BASE_HI, (cfg.cdr_base >> 32) as u32);
        r.write_word(GEN_RDR_BASE_LO, cfg.rdr_base as u32);
        r.write_word(GEN_RDR_BASE_HI, (cfg.rdr_base >> 32) as u32);
        r.write_word(GEN_RING_SIZES, cfg.cdr_entries as u32 | (cfg.rdr_entries as u32) << 16);
        r.write_word(GEN_DEBUG_LEVEL, cfg.debug_level);
        r.write_word(GEN_TUNNEL_FLAGS_OUT, 0);
        r.write_word(GEN_TUNNEL_FLAGS_IN, 0);
        r.write_word(GEN_COMPAT_ID, SHM_COMPAT_ID);
        r.write_word(GEN_FLAGS, cfg.flags());
    }

    /// Firmware status
    pub fn fw_status(&self) -> FwStatus<'_, M> {
        FwStatus { region: &self.region }
    }

    /// Hand the configuration to firmware
    pub fn publish(self) -> Configured<M> {
        self.region.fence();
        self.region.write_word(LOAD_STAT, LoadStat::GenconfSet as u32);
        tracing::debug!("general configuration published");
        Configured { region: self.region }
    }
}

/// Region after `GENCONF_SET`, waiting for firmware to start
pub struct Configured<M: SharedMemory> {
    region: M,
}

impl<M: SharedMemory> Configured<M> {
    /// Wait for `STARTS` and platform run state
    pub fn await_started<P: PlatformStatus + ?Sized>(self, platform: &P, poll: PollConfig) -> Result<Running<M>> {
        poll_until(poll, "STARTS", || match read_load_stat(&self.region)? {
            LoadStat::Starts if platform.is_running() => Ok(Some(())),
            LoadStat::Starts | LoadStat::GenconfSet => Ok(None),
            found => Err(ShmError::BootState {
                expected: LoadStat::Starts,
                found,
            }),
        })?;
        let running = Running { region: self.region };
        let (major, minor) = running.fw_status().version();
        tracing::info!(major, minor, "firmware started");
        Ok(running)
    }
}

/// Region with live firmware: the host-side table and flag writers
pub struct Running<M: SharedMemory> {
    region: M,
}

impl<M: SharedMemory> Running<M> {
    /// Tunnel flag writer
    pub fn flags(&self) -> HostFlags<'_, M> {
        HostFlags::new(&self.region)
    }

    /// Tunnel table writer
    pub fn tables(&self) -> TunnelTables<'_, M> {
        TunnelTables::new(&self.region)
    }

    /// Firmware status
    pub fn fw_status(&self) -> FwStatus<'_, M> {
        FwStatus { region: &self.region }
    }

    /// Read-only view of the engine rings
    pub fn rings(&self) -> RingView<'_, M> {
        RingView::new(&self.region)
    }

    /// Current load state
    pub fn state(&self) -> Result<LoadStat> {
        read_load_stat(&self.region)
    }

    /// Static configuration as written at boot
    pub fn general(&self) -> GeneralConfig {
        GeneralConfig::read(&self.region)
    }

    /// Underlying region
    pub fn region(&self) -> &M {
        &self.region
    }
}

impl<M: SharedMemory + Clone> Running<M> {
    /// Host end of the debug ring
    pub fn debug_channel(&self) -> DebugChannel<M> {
        DebugChannel::new(self.region.clone())
    }

    /// Debug register bridge
    pub fn bridge(&self, poll: PollConfig) -> DebugBridge<M> {
        DebugBridge::new(self.region.clone(), poll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NoPlatformStatus;
    use crate::region::{HeapRegion, RecordingRegion};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn quick() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_millis(20))
    }

    struct Flag(AtomicBool);

    impl PlatformStatus for Flag {
        fn is_running(&self) -> bool {
            self.0.load(Ordering::Acquire)
        }
    }

    #[test]
    fn test_load_stat_order() {
        assert!(LoadStat::NotLoaded < LoadStat::LoadedInCcm);
        assert!(LoadStat::LoadedInCcm < LoadStat::GenconfSet);
        assert!(LoadStat::GenconfSet < LoadStat::Starts);
        assert_eq!(LoadStat::from_word(4), Err(ShmError::InvalidLoadStat(4)));
    }

    #[test]
    fn test_rejects_small_region() {
        assert!(matches!(
            Boot::new(HeapRegion::new(SHM_SIZE - 4)),
            Err(ShmError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn test_no_config_write_before_loaded() {
        let region = Arc::new(RecordingRegion::new(HeapRegion::new(SHM_SIZE)));
        let err = Boot::new(Arc::clone(&region)).unwrap().await_loaded(quick()).err().unwrap();
        assert!(err.is_timeout());
        assert!(region.accesses().is_empty());
    }

    #[test]
    fn test_full_boot_sequence() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        region.write_word(LOAD_STAT, LoadStat::LoadedInCcm as u32);
        region.write_word(FW_VERSION, 0x0104);

        let loaded = Boot::new(Arc::clone(&region)).unwrap().await_loaded(quick()).unwrap();
        let cfg = GeneralConfig {
            cdr_base: 0x1_2000_0000,
            rdr_base: 0x1_2000_1000,
            doorbell: true,
            ..Default::default()
        };
        loaded.write_general(&cfg);
        assert_eq!(region.read_word(LOAD_STAT), LoadStat::LoadedInCcm as u32);
        let configured = loaded.publish();
        assert_eq!(region.read_word(LOAD_STAT), LoadStat::GenconfSet as u32);

        // firmware starts and the platform reports run state
        region.write_word(LOAD_STAT, LoadStat::Starts as u32);
        let platform = Flag(AtomicBool::new(true));
        let running = configured.await_started(&platform, quick()).unwrap();

        assert_eq!(running.general(), cfg);
        assert_eq!(running.fw_status().version(), (1, 4));
        assert_eq!(region.read_word(GEN_COMPAT_ID), SHM_COMPAT_ID);
    }

    #[test]
    fn test_backwards_state_is_violation() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        region.write_word(LOAD_STAT, LoadStat::LoadedInCcm as u32);
        let configured = Boot::new(Arc::clone(&region))
            .unwrap()
            .await_loaded(quick())
            .unwrap()
            .publish();
        region.write_word(LOAD_STAT, LoadStat::NotLoaded as u32);
        let err = configured.await_started(&NoPlatformStatus, quick()).err().unwrap();
        assert_eq!(
            err,
            ShmError::BootState {
                expected: LoadStat::Starts,
                found: LoadStat::NotLoaded
            }
        );
    }

    #[test]
    fn test_skipped_host_step_is_violation() {
        let region = HeapRegion::new(SHM_SIZE);
        region.write_word(LOAD_STAT, LoadStat::Starts as u32);
        let err = Boot::new(region).unwrap().await_loaded(quick()).err().unwrap();
        assert!(matches!(err, ShmError::BootState { found: LoadStat::Starts, .. }));
    }

    #[test]
    fn test_start_timeout_without_run_state() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        region.write_word(LOAD_STAT, LoadStat::LoadedInCcm as u32);
        let configured = Boot::new(Arc::clone(&region)).unwrap().await_loaded(quick()).unwrap().publish();
        region.write_word(LOAD_STAT, LoadStat::Starts as u32);
        let platform = Flag(AtomicBool::new(false));
        assert!(configured.await_started(&platform, quick()).err().unwrap().is_timeout());
    }
}
