//! Debug Register Bridge
//!
//! Two-phase handshake on the owner tag:
//!
//! ```text
//! host: cmd/addr/wdata, fence, owner = FW
//! fw:   sees FW, performs access, rdata/status, owner = DRV
//! host: sees DRV, reads rdata/status, owner = NONE
//! ```
//!
//! Only the current owner writes the tag. A timeout leaves it at `FW`: the
//! host cannot know whether firmware is still working on the request, so
//! later requests fail with `Busy` instead of racing it. Once firmware
//! answers the abandoned request the tag reads `DRV`; the next request
//! discards that response and reclaims the bridge.

use crate::layout::{BRIDGE_ADDR, BRIDGE_CMD, BRIDGE_OWNER, BRIDGE_RDATA, BRIDGE_STATUS, BRIDGE_WDATA};
use crate::poll::{poll_until, PollConfig};
use crate::region::SharedMemory;
use crate::{Result, ShmError};
use parking_lot::Mutex;

/// Owner tag: idle
pub const OWNER_NONE: u32 = 0;
/// Owner tag: request handed to firmware
pub const OWNER_FW: u32 = 1;
/// Owner tag: result handed back to the host
pub const OWNER_DRV: u32 = 2;

/// Bridge command: register read
pub const CMD_READ: u32 = 1;
/// Bridge command: register write
pub const CMD_WRITE: u32 = 2;

/// Status word for a completed access
pub const STATUS_OK: u32 = 0;

/// Host end of the register bridge
pub struct DebugBridge<M: SharedMemory> {
    region: M,
    poll: PollConfig,
    // one request in flight per host
    lock: Mutex<()>,
}

impl<M: SharedMemory> DebugBridge<M> {
    pub(crate) fn new(region: M, poll: PollConfig) -> Self {
        Self {
            region,
            poll,
            lock: Mutex::new(()),
        }
    }

    /// Current owner tag
    pub fn owner(&self) -> u32 {
        self.region.read_word(BRIDGE_OWNER)
    }

    /// Read a firmware-side register
    pub fn read_reg(&self, addr: u32) -> Result<u32> {
        self.transact(CMD_READ, addr, 0)
    }

    /// Write a firmware-side register
    pub fn write_reg(&self, addr: u32, value: u32) -> Result<()> {
        self.transact(CMD_WRITE, addr, value).map(|_| ())
    }

    fn transact(&self, cmd: u32, addr: u32, wdata: u32) -> Result<u32> {
        let _guard = self.lock.lock();
        let r = &self.region;

        match r.read_word(BRIDGE_OWNER) {
            OWNER_NONE => {}
            OWNER_DRV => {
                let stale = r.read_word(BRIDGE_RDATA);
                tracing::debug!(stale, "discarding late debug bridge response");
                r.fence();
                r.write_word(BRIDGE_OWNER, OWNER_NONE);
            }
            owner => {
                tracing::warn!(owner, addr, "debug bridge busy");
                return Err(ShmError::Busy { owner });
            }
        }

        r.write_word(BRIDGE_CMD, cmd);
        r.write_word(BRIDGE_ADDR, addr);
        r.write_word(BRIDGE_WDATA, wdata);
        r.fence();
        r.write_word(BRIDGE_OWNER, OWNER_FW);

        if let Err(e) = poll_until(self.poll, "debug bridge response", || {
            Ok((r.read_word(BRIDGE_OWNER) == OWNER_DRV).then_some(()))
        }) {
            tracing::warn!(addr, cmd, "debug bridge timed out");
            return Err(e);
        }

        let status = r.read_word(BRIDGE_STATUS);
        let rdata = r.read_word(BRIDGE_RDATA);
        r.fence();
        r.write_word(BRIDGE_OWNER, OWNER_NONE);

        if status != STATUS_OK {
            return Err(ShmError::BridgeFault { status });
        }
        tracing::trace!(cmd, addr, rdata, "debug bridge access");
        Ok(rdata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SHM_SIZE;
    use crate::region::HeapRegion;
    use crate::sim::FirmwareSim;
    use std::sync::Arc;
    use std::time::Duration;

    fn quick() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    #[test]
    fn test_read_and_write_round_trip() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let server = FirmwareSim::new(Arc::clone(&region)).spawn_register_file(16).unwrap();
        let bridge = DebugBridge::new(Arc::clone(&region), quick());

        bridge.write_reg(3, 0xABCD).unwrap();
        assert_eq!(bridge.read_reg(3).unwrap(), 0xABCD);
        assert_eq!(bridge.owner(), OWNER_NONE);

        // out of range register reports a fault status
        assert!(matches!(bridge.read_reg(99), Err(ShmError::BridgeFault { .. })));
        assert_eq!(bridge.owner(), OWNER_NONE);
        server.stop();
    }

    #[test]
    fn test_timeout_leaves_request_owned() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let impatient = PollConfig::new(Duration::from_millis(1), Duration::from_millis(5));
        let bridge = DebugBridge::new(Arc::clone(&region), impatient);
        let err = bridge.read_reg(0).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(bridge.owner(), OWNER_FW);
        assert_eq!(bridge.read_reg(0).unwrap_err(), ShmError::Busy { owner: OWNER_FW });
    }

    #[test]
    fn test_late_response_is_discarded() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let sim = FirmwareSim::new(Arc::clone(&region));
        let impatient = PollConfig::new(Duration::from_millis(1), Duration::from_millis(5));
        let bridge = DebugBridge::new(Arc::clone(&region), impatient);

        assert!(bridge.read_reg(4).unwrap_err().is_timeout());
        // firmware gets round to the abandoned read
        assert!(sim.serve_bridge(|_, _, _| (STATUS_OK, 0xDEAD)));
        assert_eq!(bridge.owner(), OWNER_DRV);

        let server = sim.spawn_register_file(8).unwrap();
        let bridge = DebugBridge::new(Arc::clone(&region), quick());
        bridge.write_reg(4, 0x55).unwrap();
        assert_eq!(bridge.read_reg(4).unwrap(), 0x55);
        assert_eq!(bridge.owner(), OWNER_NONE);
        server.stop();
    }
}
