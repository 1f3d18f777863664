//! Controller Bring-Up
//!
//! Validates configuration and the firmware image, walks the boot
//! handshake, then hands the running region to the manager and starts the
//! debug drainer. `region` is the host mapping of the image's shared
//! section (`shm_offset .. shm_offset + shm_size`).

use crate::config::OffloadConfig;
use crate::error::{OffloadError, Result};
use crate::image::{ImageError, ImageHeader};
use crate::manager::OffloadManager;
use sase_shm::debug::DrainStats;
use sase_shm::{
    Boot, DebugBridge, DebugChannel, DebugDrainer, Doorbell, PlatformStatus, SharedMemory, SHM_COMPAT_ID, SHM_SIZE,
};
use std::sync::Arc;

/// Live offload control plane
pub struct OffloadController<M: SharedMemory + Clone + 'static, D: Doorbell> {
    manager: Arc<OffloadManager<M, D>>,
    debug: Arc<DebugChannel<M>>,
    drainer: Option<DebugDrainer>,
    bridge: DebugBridge<M>,
    image: ImageHeader,
}

impl<M: SharedMemory + Clone + 'static, D: Doorbell> OffloadController<M, D> {
    /// Bring the firmware up and build the manager.
    ///
    /// Configuration is written only after firmware reports
    /// `LOADED_IN_CCM`; the manager exists only after `STARTS` and the
    /// platform run state. Every failure here is fatal to initialization.
    pub fn start<P: PlatformStatus + ?Sized>(
        config: OffloadConfig,
        image: &[u8],
        region: M,
        platform: &P,
        doorbell: D,
    ) -> Result<Self> {
        config.validate()?;

        let header = ImageHeader::parse(image)?;
        header.check_compat(SHM_COMPAT_ID, SHM_SIZE)?;
        tracing::info!(
            family = header.family,
            major = header.version_major,
            minor = header.version_minor,
            compat = header.compat_id,
            "firmware image accepted"
        );

        let loaded = Boot::new(region)
            .and_then(|boot| boot.await_loaded(config.boot_poll()))
            .map_err(OffloadError::Boot)?;

        // The image header can lie; trust what the loaded firmware reports
        let echo = loaded.fw_status().compat_id();
        if echo != SHM_COMPAT_ID {
            tracing::error!(expected = SHM_COMPAT_ID, found = echo, "firmware layout mismatch");
            return Err(ImageError::CompatMismatch {
                expected: SHM_COMPAT_ID,
                found: echo,
            }
            .into());
        }

        loaded.write_general(&config.general());
        let running = loaded
            .publish()
            .await_started(platform, config.boot_poll())
            .map_err(OffloadError::Boot)?;

        let version = running.fw_status().version();
        let image_version = (header.version_major, header.version_minor);
        if version != image_version {
            tracing::warn!(
                running = ?version,
                image = ?image_version,
                "firmware version differs from image header"
            );
        }

        let debug = Arc::new(running.debug_channel());
        let drainer = if config.debug_enabled {
            Some(DebugDrainer::spawn(Arc::clone(&debug), config.drainer())?)
        } else {
            None
        };
        let bridge = running.bridge(config.bridge_poll());
        let manager = Arc::new(OffloadManager::new(running, doorbell, config));

        Ok(Self {
            manager,
            debug,
            drainer,
            bridge,
            image: header,
        })
    }

    /// Tunnel/session manager
    pub fn manager(&self) -> &Arc<OffloadManager<M, D>> {
        &self.manager
    }

    /// Debug register bridge
    pub fn bridge(&self) -> &DebugBridge<M> {
        &self.bridge
    }

    /// Host end of the debug ring
    pub fn debug_channel(&self) -> &Arc<DebugChannel<M>> {
        &self.debug
    }

    /// Firmware debug interrupt: schedule a drain pass
    pub fn debug_interrupt(&self) {
        if let Some(drainer) = &self.drainer {
            drainer.kick();
        }
    }

    /// Drainer counters, when the debug channel is enabled
    pub fn drain_stats(&self) -> Option<&DrainStats> {
        self.drainer.as_ref().map(|d| d.stats())
    }

    /// Firmware main-loop heartbeat
    pub fn heartbeat(&self) -> u32 {
        self.manager.running().fw_status().heartbeat()
    }

    /// Accepted image header
    pub fn image(&self) -> &ImageHeader {
        &self.image
    }

    /// Stop the drainer; the manager stays usable through other handles
    pub fn shutdown(mut self) {
        if let Some(mut drainer) = self.drainer.take() {
            drainer.stop();
        }
        tracing::info!("offload controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::image::{Endian, IMAGE_HEADER_LEN};
    use crate::tunnel::{AddressFamily, EncapMode, SaParams};
    use sase_ctx::Direction;
    use sase_shm::debug::DebugLevel;
    use sase_shm::sim::FirmwareSim;
    use sase_shm::{HeapRegion, NoDoorbell, NoPlatformStatus, RecordingRegion};
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    fn image(compat_id: u32) -> Vec<u8> {
        let header = ImageHeader {
            endian: Endian::Little,
            family: 0x0197,
            version_major: 1,
            version_minor: 2,
            compat_id,
            shm_offset: 0x1000,
            shm_size: SHM_SIZE as u32,
            image_len: 0x1000 + SHM_SIZE as u32,
        };
        let mut bytes = vec![0u8; header.image_len as usize];
        bytes[..IMAGE_HEADER_LEN].copy_from_slice(&header.encode());
        bytes
    }

    fn patient() -> OffloadConfig {
        OffloadConfig {
            boot_timeout_ms: 2000,
            disable_grace_ms: 0,
            debug_drain_interval_ms: 1,
            ..Default::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn test_start_brings_up_firmware() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let sim = FirmwareSim::new(Arc::clone(&region));
        let fw = sim.clone().spawn_boot(1, 2).unwrap();

        let ctl = OffloadController::start(patient(), &image(SHM_COMPAT_ID), Arc::clone(&region), &NoPlatformStatus, NoDoorbell)
            .unwrap();
        assert_eq!(ctl.image().version_major, 1);
        assert!(sim.general().debug_enabled);
        assert!(sim.general().doorbell);

        let params = SaParams {
            cipher: "cbc(aes)".into(),
            cipher_key: vec![1; 32],
            auth: "hmac(sha512)".into(),
            auth_key: vec![2; 64],
            mode: EncapMode::Tunnel,
            family: AddressFamily::Ipv6,
            egress_ifindex: 4,
        };
        let t = ctl.manager().add_sa(0x77, Direction::Outbound, &params).unwrap();
        assert_eq!(sim.info(t, Direction::Outbound).unwrap().icv_size, 32);

        sim.write_debug(DebugLevel::Info, "tunnel 0 up");
        ctl.debug_interrupt();
        let stats = ctl.drain_stats().unwrap();
        assert!(wait_for(|| stats.delivered.load(Ordering::Relaxed) == 1));

        let hb = ctl.heartbeat();
        assert!(wait_for(|| ctl.heartbeat() != hb));
        ctl.shutdown();
        fw.stop();
    }

    #[test]
    fn test_bridge_after_start() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let fw = FirmwareSim::new(Arc::clone(&region)).spawn_boot(1, 2).unwrap();
        let cfg = OffloadConfig {
            bridge_timeout_ms: 500,
            debug_enabled: false,
            ..patient()
        };
        let ctl = OffloadController::start(cfg, &image(SHM_COMPAT_ID), Arc::clone(&region), &NoPlatformStatus, NoDoorbell)
            .unwrap();
        assert!(ctl.drain_stats().is_none());
        assert!(!ctl.debug_channel().is_enabled());

        let regs = FirmwareSim::new(Arc::clone(&region)).spawn_register_file(8).unwrap();
        ctl.bridge().write_reg(2, 0x1234).unwrap();
        assert_eq!(ctl.bridge().read_reg(2).unwrap(), 0x1234);
        regs.stop();
        fw.stop();
    }

    #[test]
    fn test_boot_timeout_is_liveness_failure() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let cfg = OffloadConfig {
            boot_timeout_ms: 10,
            ..Default::default()
        };
        let err = OffloadController::start(cfg, &image(SHM_COMPAT_ID), region, &NoPlatformStatus, NoDoorbell)
            .err()
            .unwrap();
        assert_eq!(err.class(), ErrorClass::FirmwareLiveness);
        assert!(matches!(err, OffloadError::Boot(e) if e.is_timeout()));
    }

    #[test]
    fn test_incompatible_image_touches_nothing() {
        let region = Arc::new(RecordingRegion::new(HeapRegion::new(SHM_SIZE)));
        let err = OffloadController::start(
            OffloadConfig::default(),
            &image(SHM_COMPAT_ID + 1),
            Arc::clone(&region),
            &NoPlatformStatus,
            NoDoorbell,
        )
        .err()
        .unwrap();
        assert_eq!(err.class(), ErrorClass::FirmwareIncompatible);
        assert!(region.accesses().is_empty());
    }

    #[test]
    fn test_loaded_firmware_compat_checked() {
        let region = Arc::new(RecordingRegion::new(HeapRegion::new(SHM_SIZE)));
        let sim = FirmwareSim::new(Arc::clone(&region));
        sim.set_version(1, 2, 0x0002_0000);
        sim.load();
        region.clear();

        let err = OffloadController::start(patient(), &image(SHM_COMPAT_ID), Arc::clone(&region), &NoPlatformStatus, NoDoorbell)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            OffloadError::Image(ImageError::CompatMismatch { found: 0x0002_0000, .. })
        ));
        // no general configuration written
        assert!(region.accesses().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected_first() {
        let cfg = OffloadConfig {
            boot_timeout_ms: 0,
            ..Default::default()
        };
        let err = OffloadController::start(cfg, &[], Arc::new(HeapRegion::new(SHM_SIZE)), &NoPlatformStatus, NoDoorbell)
            .err()
            .unwrap();
        assert!(matches!(err, OffloadError::InvalidConfig(_)));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }
}
