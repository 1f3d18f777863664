//! Packet-Path API
//!
//! What the packet redirector sees of the manager. It tags traffic with
//! tunnel ids and programs per-flow actions; it never installs SAs.

use crate::action::Action;
use crate::error::Result;
use crate::manager::OffloadManager;
use crate::tunnel::SessionDelete;
use crate::{SessionId, TunnelId};
use sase_ctx::Direction;
use sase_shm::{Doorbell, SharedMemory};

/// Upward interface for the packet-path collaborator
pub trait PacketPathApi: Send + Sync {
    /// Tunnel carrying `spi`, if any
    fn lookup_tunnel_by_spi(&self, spi: u32) -> Option<TunnelId>;

    /// Replace the default action template of one direction
    fn update_direction_action(&self, tunnel: TunnelId, dir: Direction, action: &Action) -> Result<()>;

    /// Admit (or find) a session on an outbound tunnel
    fn add_session(&self, tunnel: TunnelId, action: &Action) -> Result<SessionId>;

    /// Replace a session's action
    fn update_session(&self, tunnel: TunnelId, session: SessionId, action: &Action) -> Result<()>;

    /// Switch a session off
    fn delete_session(&self, tunnel: TunnelId, session: SessionId) -> Result<SessionDelete>;

    /// Bind the tunnel to its ingress interface
    fn bind_ingress_netdev(&self, tunnel: TunnelId, ifindex: u32) -> Result<()>;
}

impl<M: SharedMemory, D: Doorbell> PacketPathApi for OffloadManager<M, D> {
    fn lookup_tunnel_by_spi(&self, spi: u32) -> Option<TunnelId> {
        OffloadManager::lookup_tunnel_by_spi(self, spi)
    }

    fn update_direction_action(&self, tunnel: TunnelId, dir: Direction, action: &Action) -> Result<()> {
        self.update_tunnel_action(tunnel, dir, action)
    }

    fn add_session(&self, tunnel: TunnelId, action: &Action) -> Result<SessionId> {
        OffloadManager::add_session(self, tunnel, action)
    }

    fn update_session(&self, tunnel: TunnelId, session: SessionId, action: &Action) -> Result<()> {
        OffloadManager::update_session(self, tunnel, session, action)
    }

    fn delete_session(&self, tunnel: TunnelId, session: SessionId) -> Result<SessionDelete> {
        OffloadManager::delete_session(self, tunnel, session)
    }

    fn bind_ingress_netdev(&self, tunnel: TunnelId, ifindex: u32) -> Result<()> {
        OffloadManager::bind_ingress_netdev(self, tunnel, ifindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OffloadConfig;
    use crate::tunnel::{AddressFamily, EncapMode, SaParams};
    use sase_shm::layout::SHM_SIZE;
    use sase_shm::{sim, GeneralConfig, HeapRegion, NoDoorbell};
    use std::sync::Arc;

    fn redirector_flow(api: &dyn PacketPathApi, spi: u32) -> Result<SessionId> {
        let tunnel = api.lookup_tunnel_by_spi(spi).ok_or(crate::OffloadError::NoSuchTunnel(usize::MAX))?;
        api.bind_ingress_netdev(tunnel, 2)?;
        api.update_direction_action(tunnel, Direction::Outbound, &Action::forward())?;
        api.add_session(tunnel, &Action::redirect(8))
    }

    #[test]
    fn test_manager_behind_trait_object() {
        let region = Arc::new(HeapRegion::new(SHM_SIZE));
        let running = sim::boot(region, &GeneralConfig::default()).unwrap();
        let mgr = OffloadManager::new(running, NoDoorbell, OffloadConfig::default());
        let params = SaParams {
            cipher: "rfc3686(ctr(aes))".into(),
            cipher_key: vec![0x5A; 20],
            auth: "hmac(sha1)".into(),
            auth_key: vec![0x3C; 20],
            mode: EncapMode::Transport,
            family: AddressFamily::Ipv4,
            egress_ifindex: 1,
        };
        let t = mgr.add_sa(0xAB, Direction::Outbound, &params).unwrap();

        let s = redirector_flow(&mgr, 0xAB).unwrap();
        assert_eq!(PacketPathApi::add_session(&mgr, t, &Action::redirect(8)).unwrap(), s);
        assert_eq!(PacketPathApi::delete_session(&mgr, t, s).unwrap(), SessionDelete::Deleted);
        assert!(redirector_flow(&mgr, 0xCD).is_err());
    }
}
