//! Tunnel/Session Manager
//!
//! Owns the host view of the tunnel and session tables and is the only
//! host-side writer of their shared-memory mirror. Every state transition
//! runs under one manager-wide lock: free-slot search and SPI uniqueness
//! span all tunnels.
//!
//! Publication order for any tunnel change is fixed: tables first, then a
//! barrier and the flag write (done by [`sase_shm::HostFlags`]), then the
//! optional doorbell.

use crate::action::Action;
use crate::arena::SlotArena;
use crate::config::OffloadConfig;
use crate::error::{OffloadError, Result};
use crate::stats::{OffloadStats, OffloadStatsSnapshot};
use crate::tunnel::{
    DirectionSlot, DirectionState, SaParams, SessionDelete, TunnelRecord, TunnelSnapshot,
};
use crate::{SessionId, TunnelId};
use parking_lot::Mutex;
use sase_ctx::{build_context, build_token, ContextBlob, Direction, TokenSequence};
use sase_shm::{Doorbell, InfoRecord, Running, SharedMemory, TunnelFlag, MAX_SESSIONS, MAX_TUNNELS};
use std::thread;

#[derive(Default)]
struct ManagerState {
    tunnels: [TunnelRecord; MAX_TUNNELS],
    used: SlotArena<MAX_TUNNELS>,
}

impl ManagerState {
    fn find_spi(&self, spi: u32) -> Option<TunnelId> {
        self.used.iter().find(|&t| self.tunnels[t].spi == spi)
    }

    fn tunnel_mut(&mut self, tunnel: TunnelId) -> Result<&mut TunnelRecord> {
        if !self.used.is_used(tunnel) {
            return Err(OffloadError::NoSuchTunnel(tunnel));
        }
        Ok(&mut self.tunnels[tunnel])
    }

    fn tunnel(&self, tunnel: TunnelId) -> Option<&TunnelRecord> {
        self.used.is_used(tunnel).then(|| &self.tunnels[tunnel])
    }

    fn release(&mut self, tunnel: TunnelId) {
        self.tunnels[tunnel] = TunnelRecord::default();
        self.used.release(tunnel);
    }
}

fn hex_words(words: &[u32]) -> String {
    hex::encode(words.iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>())
}

fn check_session(tunnel: TunnelId, session: SessionId) -> Result<()> {
    if session < MAX_SESSIONS {
        Ok(())
    } else {
        Err(OffloadError::NoSuchSession { tunnel, session })
    }
}

/// Tunnel/session manager over a running firmware region
pub struct OffloadManager<M: SharedMemory, D: Doorbell> {
    running: Running<M>,
    doorbell: D,
    config: OffloadConfig,
    state: Mutex<ManagerState>,
    stats: OffloadStats,
}

impl<M: SharedMemory, D: Doorbell> OffloadManager<M, D> {
    /// Take over a region whose firmware reached `STARTS`
    pub fn new(running: Running<M>, doorbell: D, config: OffloadConfig) -> Self {
        Self {
            running,
            doorbell,
            config,
            state: Mutex::new(ManagerState::default()),
            stats: OffloadStats::default(),
        }
    }

    /// Running region
    pub fn running(&self) -> &Running<M> {
        &self.running
    }

    /// Configuration in effect
    pub fn config(&self) -> &OffloadConfig {
        &self.config
    }

    /// Counter snapshot
    pub fn stats(&self) -> OffloadStatsSnapshot {
        self.stats.snapshot()
    }

    fn track<T>(&self, op: &'static str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            OffloadStats::bump(&self.stats.rejected);
            tracing::warn!(op, error = %e, class = %e.class(), "offload request rejected");
        }
        result
    }

    fn notify(&self, dir: Direction) {
        if self.config.doorbell_enabled && self.doorbell.is_supported() {
            self.doorbell.ring(dir);
            OffloadStats::bump(&self.stats.doorbells);
        }
    }

    fn raise(&self, tunnel: TunnelId, dir: Direction) -> Result<()> {
        self.running.flags().raise(dir, tunnel)?;
        OffloadStats::bump(&self.stats.flag_raises);
        self.notify(dir);
        Ok(())
    }

    // --- SAs ----------------------------------------------------------

    /// Install one SA direction.
    ///
    /// Binds to the tunnel already carrying `spi` when the other direction
    /// exists, otherwise claims a free tunnel. Context and token are built
    /// before anything is touched; a build failure leaves no trace.
    pub fn add_sa(&self, spi: u32, dir: Direction, params: &SaParams) -> Result<TunnelId> {
        let result = self.try_add_sa(spi, dir, params);
        self.track("add_sa", result)
    }

    fn try_add_sa(&self, spi: u32, dir: Direction, params: &SaParams) -> Result<TunnelId> {
        let ctx = build_context(dir, &params.cipher, &params.cipher_key, &params.auth, &params.auth_key, spi)?;
        let geometry = ctx.geometry();
        let token = build_token(dir, geometry.icv_size, geometry.iv_size)?;

        let mut state = self.state.lock();
        let (tunnel, claimed) = match state.find_spi(spi) {
            Some(t) => {
                let rec = &state.tunnels[t];
                if rec.dir(dir).state.is_present() {
                    return Err(OffloadError::DuplicateDirection { spi, direction: dir });
                }
                if rec.mode != Some(params.mode) {
                    return Err(OffloadError::AttributeMismatch { spi, what: "encapsulation mode" });
                }
                if rec.family != Some(params.family) {
                    return Err(OffloadError::AttributeMismatch { spi, what: "address family" });
                }
                (t, false)
            }
            None => {
                let t = state.used.alloc().ok_or(OffloadError::NoFreeTunnel)?;
                state.tunnels[t] = TunnelRecord {
                    spi,
                    mode: Some(params.mode),
                    family: Some(params.family),
                    ..Default::default()
                };
                (t, true)
            }
        };

        let rec = &mut state.tunnels[tunnel];
        if dir == Direction::Outbound {
            rec.egress_ifindex = params.egress_ifindex;
        }
        rec.dir_mut(dir).state = DirectionState::Creating;
        let pad_insn = token.pad_index().map_or(0, |i| i as u8);
        let info = rec.build_info(spi, geometry, ctx.as_words().len(), token.len(), pad_insn);

        if let Err(e) = self.publish_sa(tunnel, dir, &info, &ctx, &token) {
            self.abandon_sa(&mut state, tunnel, dir, claimed);
            return Err(e);
        }

        *state.tunnels[tunnel].dir_mut(dir) = DirectionSlot {
            state: DirectionState::Active,
            geometry: Some(geometry),
            info,
        };
        if dir == Direction::Outbound {
            self.republish_egress(&mut state.tunnels[tunnel], tunnel)?;
        }
        OffloadStats::bump(&self.stats.sas_added);
        tracing::info!(
            tunnel,
            spi,
            direction = %dir,
            cipher = %params.cipher,
            auth = %params.auth,
            "SA installed"
        );
        Ok(tunnel)
    }

    fn publish_sa(
        &self,
        tunnel: TunnelId,
        dir: Direction,
        info: &InfoRecord,
        ctx: &ContextBlob,
        token: &TokenSequence,
    ) -> Result<()> {
        let tables = self.running.tables();
        tables.write_info(tunnel, dir, info)?;
        tables.write_context(tunnel, dir, ctx.words())?;
        tables.write_token(tunnel, dir, token.words())?;
        tracing::debug!(
            tunnel,
            direction = %dir,
            ctx_words = info.ctx_words,
            token_words = info.token_words,
            "SA tables published"
        );
        tracing::trace!(tunnel, direction = %dir, token = %hex_words(token.as_words()), "token words");
        self.raise(tunnel, dir)
    }

    /// Undo a half-published direction in both views
    fn abandon_sa(&self, state: &mut ManagerState, tunnel: TunnelId, dir: Direction, claimed: bool) {
        if let Err(e) = self.running.tables().clear_sa(tunnel, dir) {
            tracing::warn!(tunnel, direction = %dir, error = %e, "could not clear abandoned SA");
        }
        if claimed {
            state.release(tunnel);
        } else {
            *state.tunnels[tunnel].dir_mut(dir) = DirectionSlot::default();
        }
    }

    /// Inbound installed first learns the egress interface from outbound
    fn republish_egress(&self, rec: &mut TunnelRecord, tunnel: TunnelId) -> Result<()> {
        let egress = rec.egress_ifindex;
        if !rec.is_active(Direction::Inbound) || rec.dir(Direction::Inbound).info.egress_ifindex == egress {
            return Ok(());
        }
        let slot = rec.dir_mut(Direction::Inbound);
        slot.info.egress_ifindex = egress;
        self.running.tables().write_info(tunnel, Direction::Inbound, &slot.info)?;
        self.raise(tunnel, Direction::Inbound)
    }

    /// Remove one SA direction.
    ///
    /// The flag goes to `DISABLED` first; the records are zeroed only after
    /// the grace period, so firmware never reads a half-cleared SA. The
    /// lock is not held while waiting. Removing the last direction frees
    /// the tunnel and all of its sessions.
    pub fn delete_sa(&self, spi: u32, dir: Direction) -> Result<()> {
        let result = self.try_delete_sa(spi, dir);
        self.track("delete_sa", result)
    }

    fn try_delete_sa(&self, spi: u32, dir: Direction) -> Result<()> {
        let tunnel = {
            let mut state = self.state.lock();
            let tunnel = state
                .find_spi(spi)
                .filter(|&t| state.tunnels[t].is_active(dir))
                .ok_or(OffloadError::NoSuchSa { spi, direction: dir })?;
            self.running.flags().set(dir, tunnel, TunnelFlag::Disabled)?;
            // Deleting keeps the direction claimed until the records are gone
            state.tunnels[tunnel].dir_mut(dir).state = DirectionState::Deleting;
            self.notify(dir);
            tunnel
        };

        thread::sleep(self.config.disable_grace());

        let mut state = self.state.lock();
        let tables = self.running.tables();
        tables.clear_sa(tunnel, dir)?;
        *state.tunnels[tunnel].dir_mut(dir) = DirectionSlot::default();
        OffloadStats::bump(&self.stats.sas_deleted);

        if state.tunnels[tunnel].is_free() {
            tables.set_session_map(tunnel, 0)?;
            tables.clear_actions(tunnel)?;
            state.release(tunnel);
            tracing::info!(tunnel, spi, direction = %dir, "SA removed, tunnel freed");
        } else {
            tracing::info!(tunnel, spi, direction = %dir, "SA removed");
        }
        Ok(())
    }

    /// Tunnel carrying `spi`
    pub fn lookup_tunnel_by_spi(&self, spi: u32) -> Option<TunnelId> {
        self.state.lock().find_spi(spi)
    }

    /// Point the tunnel at an ingress interface; republished to every
    /// active direction
    pub fn bind_ingress_netdev(&self, tunnel: TunnelId, ifindex: u32) -> Result<()> {
        let result = self.try_bind_ingress(tunnel, ifindex);
        self.track("bind_ingress_netdev", result)
    }

    fn try_bind_ingress(&self, tunnel: TunnelId, ifindex: u32) -> Result<()> {
        let mut state = self.state.lock();
        let rec = state.tunnel_mut(tunnel)?;
        rec.ingress_ifindex = ifindex;
        for dir in Direction::ALL {
            if !rec.is_active(dir) {
                continue;
            }
            let slot = rec.dir_mut(dir);
            slot.info.ingress_ifindex = ifindex;
            self.running.tables().write_info(tunnel, dir, &slot.info)?;
            self.raise(tunnel, dir)?;
        }
        tracing::debug!(tunnel, ifindex, "ingress interface bound");
        Ok(())
    }

    // --- actions & sessions -------------------------------------------

    /// Overwrite the default action template of a direction
    pub fn update_tunnel_action(&self, tunnel: TunnelId, dir: Direction, action: &Action) -> Result<()> {
        let result = self.try_update_tunnel_action(tunnel, dir, action);
        self.track("update_tunnel_action", result)
    }

    fn try_update_tunnel_action(&self, tunnel: TunnelId, dir: Direction, action: &Action) -> Result<()> {
        let words = action.pack()?;
        let state = self.state.lock();
        let rec = state.tunnel(tunnel).ok_or(OffloadError::NoSuchTunnel(tunnel))?;
        self.running.tables().write_default_action(tunnel, dir, &words)?;
        tracing::trace!(tunnel, direction = %dir, action = %hex_words(&words), "default action words");
        // A disabled direction picks the template up when it is installed
        if rec.is_active(dir) {
            self.raise(tunnel, dir)?;
        }
        tracing::debug!(tunnel, direction = %dir, kind = ?action.kind, "default action updated");
        Ok(())
    }

    /// Admit a session on an outbound tunnel.
    ///
    /// An action identical to one already on returns that session instead
    /// of taking a new slot.
    pub fn add_session(&self, tunnel: TunnelId, action: &Action) -> Result<SessionId> {
        let result = self.try_add_session(tunnel, action);
        self.track("add_session", result)
    }

    fn try_add_session(&self, tunnel: TunnelId, action: &Action) -> Result<SessionId> {
        let words = action.pack()?;
        let mut state = self.state.lock();
        let rec = state.tunnel_mut(tunnel)?;
        if !rec.is_active(Direction::Outbound) {
            return Err(OffloadError::NoSuchTunnel(tunnel));
        }

        if let Some(session) = rec.sessions.iter().find(|&s| rec.session_actions[s] == Some(words)) {
            OffloadStats::bump(&self.stats.sessions_deduplicated);
            tracing::debug!(tunnel, session, "session deduplicated");
            return Ok(session);
        }

        let mut sessions = rec.sessions;
        let session = sessions.alloc().ok_or(OffloadError::NoFreeSession(tunnel))?;
        let tables = self.running.tables();
        tables.write_session_action(tunnel, session, &words)?;
        tables.set_session_map(tunnel, sessions.bits() as u8)?;
        rec.sessions = sessions;
        rec.session_actions[session] = Some(words);
        tracing::trace!(tunnel, session, action = %hex_words(&words), "session action words");

        self.raise(tunnel, Direction::Outbound)?;
        OffloadStats::bump(&self.stats.sessions_added);
        tracing::debug!(tunnel, session, kind = ?action.kind, "session added");
        Ok(session)
    }

    /// Replace the action of a session that is on
    pub fn update_session(&self, tunnel: TunnelId, session: SessionId, action: &Action) -> Result<()> {
        let result = self.try_update_session(tunnel, session, action);
        self.track("update_session", result)
    }

    fn try_update_session(&self, tunnel: TunnelId, session: SessionId, action: &Action) -> Result<()> {
        let words = action.pack()?;
        let mut state = self.state.lock();
        let rec = state.tunnel_mut(tunnel)?;
        check_session(tunnel, session)?;
        if !rec.sessions.is_used(session) {
            return Err(OffloadError::NoSuchSession { tunnel, session });
        }
        self.running.tables().write_session_action(tunnel, session, &words)?;
        rec.session_actions[session] = Some(words);
        if rec.is_active(Direction::Outbound) {
            self.raise(tunnel, Direction::Outbound)?;
        }
        tracing::debug!(tunnel, session, kind = ?action.kind, "session updated");
        Ok(())
    }

    /// Switch a session off; its action record is left in place
    pub fn delete_session(&self, tunnel: TunnelId, session: SessionId) -> Result<SessionDelete> {
        let result = self.try_delete_session(tunnel, session);
        self.track("delete_session", result)
    }

    fn try_delete_session(&self, tunnel: TunnelId, session: SessionId) -> Result<SessionDelete> {
        let mut state = self.state.lock();
        let rec = state.tunnel_mut(tunnel)?;
        check_session(tunnel, session)?;
        if !rec.sessions.is_used(session) {
            tracing::debug!(tunnel, session, "session already off");
            return Ok(SessionDelete::AlreadyOff);
        }

        let mut sessions = rec.sessions;
        sessions.release(session);
        self.running.tables().set_session_map(tunnel, sessions.bits() as u8)?;
        rec.sessions = sessions;
        rec.session_actions[session] = None;
        if rec.is_active(Direction::Outbound) {
            self.raise(tunnel, Direction::Outbound)?;
        }
        OffloadStats::bump(&self.stats.sessions_deleted);
        tracing::debug!(tunnel, session, "session deleted");
        Ok(SessionDelete::Deleted)
    }

    // --- observation --------------------------------------------------

    /// Copy of a tunnel in use
    pub fn tunnel_snapshot(&self, tunnel: TunnelId) -> Option<TunnelSnapshot> {
        self.state.lock().tunnel(tunnel).map(|rec| rec.snapshot(tunnel))
    }

    /// Sessions on of a tunnel in use
    pub fn active_sessions(&self, tunnel: TunnelId) -> Result<Vec<SessionId>> {
        let state = self.state.lock();
        let rec = state.tunnel(tunnel).ok_or(OffloadError::NoSuchTunnel(tunnel))?;
        Ok(rec.sessions.iter().collect())
    }

    /// Tunnels in use
    pub fn tunnels(&self) -> Vec<TunnelId> {
        self.state.lock().used.iter().collect()
    }
}
