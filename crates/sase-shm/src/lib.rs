//! OpenSASE ESP Offload - Shared-Memory Protocol
//!
//! One statically laid-out region is shared between the host and the
//! firmware core driving the crypto engine:
//!
//! ```text
//!        host                                        firmware
//!  ┌───────────────┐   general / tables / flags  ┌───────────────┐
//!  │  Running<M>   │ ──────────────────────────► │   main loop   │
//!  │               │ ◄────────────────────────── │               │
//!  │ DebugChannel  │   status / debug ring       │  debug writer │
//!  │ DebugBridge   │ ◄─────── owner tag ───────► │  reg access   │
//!  └───────────────┘                             └───────────────┘
//! ```
//!
//! Access is capability typed: [`boot::Boot`] yields [`boot::Loaded`] only
//! after firmware reports `LOADED_IN_CCM`, and only [`boot::Running`] hands
//! out the tunnel table and flag writers.

#![warn(missing_docs)]

pub mod boot;
pub mod bridge;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod flags;
pub mod layout;
pub mod platform;
pub mod poll;
pub mod region;
pub mod tables;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use boot::{Boot, Configured, FwStatus, GeneralConfig, LoadStat, Loaded, Running};
pub use bridge::DebugBridge;
pub use debug::{DebugChannel, DebugDrainer, DebugLevel, DebugMessage, DrainReport, DrainerConfig};
pub use descriptors::{CommandDescriptor, ResultDescriptor, RingView};
pub use error::{Result, ShmError};
pub use flags::{HostFlags, TunnelFlag};
pub use layout::{MAX_SESSIONS, MAX_TUNNELS, SHM_COMPAT_ID, SHM_SIZE};
pub use platform::{
    Doorbell, NoDoorbell, NoPlatformStatus, PlatformStatus, RegisterDoorbell, RegisterPlatformStatus,
};
pub use poll::PollConfig;
pub use region::{Access, HeapRegion, MmioRegion, RecordingRegion, SharedMemory};
pub use tables::{InfoRecord, TunnelTables};
