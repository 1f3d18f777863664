//! Firmware Simulator
//!
//! Plays the firmware side of the region: boot steps, debug producer,
//! register bridge responder and table readers. Only built for tests or
//! with the `sim` feature.

use crate::boot::{Boot, GeneralConfig, LoadStat, Running};
use crate::bridge::{CMD_READ, CMD_WRITE, OWNER_DRV, OWNER_FW, STATUS_OK};
use crate::debug::{encode_slot, DebugLevel};
use crate::flags::{flag_of, TunnelFlag};
use crate::layout::*;
use crate::platform::NoPlatformStatus;
use crate::poll::PollConfig;
use crate::region::SharedMemory;
use crate::tables::{InfoRecord, TunnelTables};
use crate::{Result, ShmError};
use sase_ctx::{Direction, ACD_WORDS, CTX_WORDS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Bridge status reported for an unknown register
pub const STATUS_BAD_ADDR: u32 = 1;

const SERVE_INTERVAL: Duration = Duration::from_micros(100);

/// Firmware end of a shared region
#[derive(Clone)]
pub struct FirmwareSim<M: SharedMemory> {
    region: M,
}

impl<M: SharedMemory> FirmwareSim<M> {
    /// Attach to `region`
    pub fn new(region: M) -> Self {
        Self { region }
    }

    /// Region
    pub fn region(&self) -> &M {
        &self.region
    }

    // --- boot -------------------------------------------------------

    /// Current load state
    pub fn state(&self) -> Result<LoadStat> {
        LoadStat::from_word(self.region.read_word(LOAD_STAT))
    }

    /// Publish version and compat id
    pub fn set_version(&self, major: u8, minor: u8, compat_id: u32) {
        self.region.write_word(FW_VERSION, (major as u32) << 8 | minor as u32);
        self.region.write_word(FW_COMPAT_ECHO, compat_id);
    }

    /// Image relocated: `LOADED_IN_CCM`
    pub fn load(&self) {
        self.region.fence();
        self.region.write_word(LOAD_STAT, LoadStat::LoadedInCcm as u32);
    }

    /// Main loop entered: `STARTS`
    pub fn start(&self) {
        self.region.fence();
        self.region.write_word(LOAD_STAT, LoadStat::Starts as u32);
    }

    /// One main-loop pass
    pub fn beat(&self) {
        let hb = self.region.read_word(FW_HEARTBEAT);
        self.region.write_word(FW_HEARTBEAT, hb.wrapping_add(1));
    }

    /// General configuration as the host wrote it
    pub fn general(&self) -> GeneralConfig {
        GeneralConfig::read(&self.region)
    }

    // --- debug producer ---------------------------------------------

    /// Append one message to the debug ring, overwriting the oldest
    pub fn write_debug(&self, level: DebugLevel, text: &str) {
        let wr = self.region.read_word(DEBUG_WR_CNT);
        self.region.write_words(debug_slot_offset(wr as usize), &encode_slot(level, text));
        let next = wr.wrapping_add(1);
        self.region.fence();
        self.region.write_word(DEBUG_WR_IDX, next % DEBUG_SLOTS as u32);
        self.region.write_word(DEBUG_WR_CNT, next);
    }

    /// Force the write count (wrap tests)
    pub fn set_write_count(&self, count: u32) {
        self.region.write_word(DEBUG_WR_IDX, count % DEBUG_SLOTS as u32);
        self.region.write_word(DEBUG_WR_CNT, count);
    }

    // --- bridge responder -------------------------------------------

    /// Answer one pending bridge request; false if none was pending
    pub fn serve_bridge(&self, mut handler: impl FnMut(u32, u32, u32) -> (u32, u32)) -> bool {
        let r = &self.region;
        if r.read_word(BRIDGE_OWNER) != OWNER_FW {
            return false;
        }
        let (status, rdata) = handler(r.read_word(BRIDGE_CMD), r.read_word(BRIDGE_ADDR), r.read_word(BRIDGE_WDATA));
        r.write_word(BRIDGE_RDATA, rdata);
        r.write_word(BRIDGE_STATUS, status);
        r.fence();
        r.write_word(BRIDGE_OWNER, OWNER_DRV);
        true
    }

    // --- table readers ----------------------------------------------

    /// Flag of one tunnel direction
    pub fn flag(&self, dir: Direction, tunnel: usize) -> TunnelFlag {
        flag_of(self.region.read_word(tunnel_flags_offset(dir)), tunnel)
    }

    /// Info record
    pub fn info(&self, tunnel: usize, dir: Direction) -> Result<InfoRecord> {
        TunnelTables::new(&self.region).info(tunnel, dir)
    }

    /// Context record
    pub fn context(&self, tunnel: usize, dir: Direction) -> Result<[u32; CTX_WORDS]> {
        TunnelTables::new(&self.region).context(tunnel, dir)
    }

    /// Token buffer
    pub fn token(&self, tunnel: usize, dir: Direction) -> Result<[u32; ACD_WORDS]> {
        TunnelTables::new(&self.region).token(tunnel, dir)
    }

    /// Default action template
    pub fn default_action(&self, tunnel: usize, dir: Direction) -> Result<[u32; ACTION_WORDS]> {
        TunnelTables::new(&self.region).default_action(tunnel, dir)
    }

    /// Session action record
    pub fn session_action(&self, tunnel: usize, session: usize) -> Result<[u32; ACTION_WORDS]> {
        TunnelTables::new(&self.region).session_action(tunnel, session)
    }

    /// Session-on bitmap
    pub fn session_map(&self, tunnel: usize) -> Result<u8> {
        TunnelTables::new(&self.region).session_map(tunnel)
    }
}

impl<M: SharedMemory + Clone + 'static> FirmwareSim<M> {
    /// Run the firmware boot sequence on a thread, then beat until stopped
    pub fn spawn_boot(self, major: u8, minor: u8) -> Result<SimHandle> {
        self.spawn("sase-fw-sim-boot", move |sim, running| {
            sim.set_version(major, minor, SHM_COMPAT_ID);
            sim.load();
            while running.load(Ordering::Acquire) {
                if matches!(sim.state(), Ok(LoadStat::GenconfSet)) {
                    sim.start();
                    break;
                }
                thread::sleep(SERVE_INTERVAL);
            }
            while running.load(Ordering::Acquire) {
                sim.beat();
                thread::sleep(SERVE_INTERVAL);
            }
        })
    }

    /// Serve bridge requests against `regs` registers of zeroed storage
    pub fn spawn_register_file(self, regs: usize) -> Result<SimHandle> {
        self.spawn("sase-fw-sim-bridge", move |sim, running| {
            let mut file = vec![0u32; regs];
            while running.load(Ordering::Acquire) {
                let served = sim.serve_bridge(|cmd, addr, wdata| match file.get_mut(addr as usize) {
                    Some(reg) if cmd == CMD_READ => (STATUS_OK, *reg),
                    Some(reg) if cmd == CMD_WRITE => {
                        *reg = wdata;
                        (STATUS_OK, 0)
                    }
                    _ => (STATUS_BAD_ADDR, 0),
                });
                if !served {
                    thread::sleep(SERVE_INTERVAL);
                }
            }
        })
    }

    fn spawn(
        self,
        name: &str,
        body: impl FnOnce(FirmwareSim<M>, Arc<AtomicBool>) + Send + 'static,
    ) -> Result<SimHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(self, flag))
            .map_err(|e| ShmError::Spawn(e.to_string()))?;
        Ok(SimHandle {
            running,
            handle: Some(handle),
        })
    }
}

/// Background simulator thread
pub struct SimHandle {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SimHandle {
    /// Stop and join
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Walk the whole boot handshake in-line, firmware steps included
pub fn boot<M: SharedMemory + Clone>(region: M, cfg: &GeneralConfig) -> Result<Running<M>> {
    let sim = FirmwareSim::new(region.clone());
    sim.set_version(1, 0, SHM_COMPAT_ID);
    sim.load();
    let loaded = Boot::new(region)?.await_loaded(PollConfig::default())?;
    loaded.write_general(cfg);
    let configured = loaded.publish();
    sim.start();
    configured.await_started(&NoPlatformStatus, PollConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    #[test]
    fn test_inline_boot() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let running = boot(Arc::clone(&region), &GeneralConfig::default()).unwrap();
        assert_eq!(running.state().unwrap(), LoadStat::Starts);
        assert_eq!(running.fw_status().compat_id(), SHM_COMPAT_ID);
        assert_eq!(FirmwareSim::new(region).general(), GeneralConfig::default());
    }

    #[test]
    fn test_threaded_boot() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let fw = FirmwareSim::new(Arc::clone(&region)).spawn_boot(2, 7).unwrap();
        let poll = PollConfig::new(Duration::from_millis(1), Duration::from_secs(2));
        let loaded = Boot::new(Arc::clone(&region)).unwrap().await_loaded(poll).unwrap();
        loaded.write_general(&GeneralConfig::default());
        let running = loaded.publish().await_started(&NoPlatformStatus, poll).unwrap();
        assert_eq!(running.fw_status().version(), (2, 7));

        let hb = running.fw_status().heartbeat();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while running.fw_status().heartbeat() == hb && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_ne!(running.fw_status().heartbeat(), hb);
        fw.stop();
    }

    #[test]
    fn test_flag_reader_sees_host_writes() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let running = boot(Arc::clone(&region), &GeneralConfig::default()).unwrap();
        let sim = FirmwareSim::new(region);
        running.flags().set(Direction::Outbound, 4, TunnelFlag::Update).unwrap();
        assert_eq!(sim.flag(Direction::Outbound, 4), TunnelFlag::Update);
        assert_eq!(sim.flag(Direction::Inbound, 4), TunnelFlag::Disabled);
    }
}
