//! OpenSASE ESP Offload - Control Plane
//!
//! Host side of the inline ESP engine: firmware bring-up, the tunnel and
//! session manager, and the API the packet redirector uses.
//!
//! ```text
//!   OffloadController::start
//!     │  config.validate, ImageHeader::parse / check_compat
//!     │  Boot ─► Loaded ─► (write general) ─► Configured ─► Running
//!     ▼
//!   OffloadManager ──── add_sa / delete_sa ───► info, context, token, flags
//!     ▲                 sessions, actions ────► action tables, session map
//!     │
//!   PacketPathApi (redirector)
//! ```
//!
//! All manager state changes go through one lock. The manager is the only
//! host-side writer of tunnel tables; firmware learns about every change
//! through the per-tunnel flag words, optionally followed by a doorbell.

pub mod action;
pub mod api;
pub mod arena;
pub mod config;
pub mod controller;
pub mod error;
pub mod image;
pub mod manager;
pub mod stats;
pub mod tunnel;

/// Tunnel slot index, `0..MAX_TUNNELS`
pub type TunnelId = usize;

/// Session slot index within a tunnel, `0..MAX_SESSIONS`
pub type SessionId = usize;

pub use action::{Action, ActionKind, FieldUpdate};
pub use api::PacketPathApi;
pub use config::OffloadConfig;
pub use controller::OffloadController;
pub use error::{ErrorClass, OffloadError, Result};
pub use image::{ImageError, ImageHeader};
pub use manager::OffloadManager;
pub use stats::{OffloadStats, OffloadStatsSnapshot};
pub use tunnel::{AddressFamily, DirectionState, EncapMode, SaParams, SessionDelete, TunnelSnapshot};

pub use sase_ctx::Direction;
pub use sase_shm::{MAX_SESSIONS, MAX_TUNNELS};
