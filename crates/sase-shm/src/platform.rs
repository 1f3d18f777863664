//! Platform Signalling
//!
//! The doorbell and the run-state register live outside the shared region,
//! in the firmware core's control block. Both are modelled as traits so
//! polling-only platforms plug in no-op implementations.

use crate::region::SharedMemory;
use sase_ctx::Direction;

/// Interrupt trigger towards the firmware core
pub trait Doorbell: Send + Sync {
    /// Notify firmware that a flag word of `dir` changed
    fn ring(&self, dir: Direction);

    /// False on platforms where firmware polls the flags on its own
    fn is_supported(&self) -> bool {
        true
    }
}

/// Platform without a doorbell
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDoorbell;

impl Doorbell for NoDoorbell {
    fn ring(&self, _dir: Direction) {}

    fn is_supported(&self) -> bool {
        false
    }
}

/// Doorbell register: writing bit `dir` raises the firmware interrupt
pub struct RegisterDoorbell<R: SharedMemory> {
    regs: R,
    offset: usize,
}

impl<R: SharedMemory> RegisterDoorbell<R> {
    /// Doorbell at byte `offset` of the control block `regs`
    pub fn new(regs: R, offset: usize) -> Self {
        Self { regs, offset }
    }
}

impl<R: SharedMemory> Doorbell for RegisterDoorbell<R> {
    fn ring(&self, dir: Direction) {
        self.regs.fence();
        self.regs.write_word(self.offset, 1 << dir.index());
    }
}

/// Firmware core run state as reported by the platform
pub trait PlatformStatus: Send + Sync {
    /// True once the core is out of reset and executing
    fn is_running(&self) -> bool;
}

/// Platform without a status register: the load-state handshake is the
/// only liveness signal
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlatformStatus;

impl PlatformStatus for NoPlatformStatus {
    fn is_running(&self) -> bool {
        true
    }
}

/// Run-state bit in a control block register
pub struct RegisterPlatformStatus<R: SharedMemory> {
    regs: R,
    offset: usize,
    mask: u32,
}

impl<R: SharedMemory> RegisterPlatformStatus<R> {
    /// Core is running while `regs[offset] & mask != 0`
    pub fn new(regs: R, offset: usize, mask: u32) -> Self {
        Self { regs, offset, mask }
    }
}

impl<R: SharedMemory> PlatformStatus for RegisterPlatformStatus<R> {
    fn is_running(&self) -> bool {
        self.regs.read_word(self.offset) & self.mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{Access, HeapRegion, RecordingRegion};

    #[test]
    fn test_register_doorbell_bits() {
        let regs = RecordingRegion::new(HeapRegion::new(16));
        let bell = RegisterDoorbell::new(&regs, 8);
        bell.ring(Direction::Inbound);
        assert!(bell.is_supported());
        assert_eq!(
            regs.accesses(),
            vec![Access::Fence, Access::Write { offset: 8, value: 0b10 }]
        );
        assert!(!NoDoorbell.is_supported());
    }

    #[test]
    fn test_register_platform_status() {
        let regs = HeapRegion::new(16);
        let status = RegisterPlatformStatus::new(&regs, 4, 1 << 3);
        assert!(!status.is_running());
        regs.write_word(4, 1 << 3);
        assert!(status.is_running());
        assert!(NoPlatformStatus.is_running());
    }
}
