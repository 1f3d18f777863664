//! Post-Processing Actions
//!
//! A 16-word record firmware applies to a packet after the engine is done
//! with it. Used both as a per-direction default template and as a session
//! action.
//!
//! ```text
//! w0      kind | update count << 8 | valid << 31
//! w1      egress port
//! w2..w13 up to 4 x (offset, mask, value)
//! w14..15 reserved
//! ```

use crate::error::{OffloadError, Result};
use sase_shm::layout::ACTION_WORDS;
use serde::{Deserialize, Serialize};

/// Field updates per action
pub const MAX_FIELD_UPDATES: usize = 4;

/// Updates reach at most this many bytes into the packet
pub const MAX_UPDATE_OFFSET: u16 = 128;

const VALID: u32 = 1 << 31;

/// What firmware does with the packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActionKind {
    /// Continue on the normal path
    Forward = 1,
    /// Send out of another port
    Redirect = 2,
    /// Discard
    Drop = 3,
}

/// Masked 32-bit rewrite at a word-aligned packet offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldUpdate {
    /// Byte offset from the packet start
    pub offset: u16,
    /// Bits to replace
    pub mask: u32,
    /// Replacement bits
    pub value: u32,
}

/// Action record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Action {
    /// Disposition
    pub kind: ActionKind,
    /// Egress port for `Redirect`
    pub port: u32,
    /// Masked rewrites applied in order
    pub updates: Vec<FieldUpdate>,
}

impl Action {
    /// Plain forward, no rewrites
    pub fn forward() -> Self {
        Self {
            kind: ActionKind::Forward,
            port: 0,
            updates: Vec::new(),
        }
    }

    /// Redirect to `port`
    pub fn redirect(port: u32) -> Self {
        Self {
            kind: ActionKind::Redirect,
            port,
            updates: Vec::new(),
        }
    }

    /// Add a rewrite
    pub fn with_update(mut self, offset: u16, mask: u32, value: u32) -> Self {
        self.updates.push(FieldUpdate { offset, mask, value });
        self
    }

    /// Check the record can be encoded
    pub fn validate(&self) -> Result<()> {
        if self.updates.len() > MAX_FIELD_UPDATES {
            return Err(OffloadError::MalformedAction(format!(
                "{} field updates, at most {MAX_FIELD_UPDATES}",
                self.updates.len()
            )));
        }
        for u in &self.updates {
            if u.offset % 4 != 0 || u.offset >= MAX_UPDATE_OFFSET {
                return Err(OffloadError::MalformedAction(format!("update offset {}", u.offset)));
            }
            if u.mask == 0 {
                return Err(OffloadError::MalformedAction(format!("empty mask at offset {}", u.offset)));
            }
            if u.value & !u.mask != 0 {
                return Err(OffloadError::MalformedAction(format!(
                    "value {:#x} outside mask {:#x}",
                    u.value, u.mask
                )));
            }
        }
        Ok(())
    }

    /// Encode the shared-memory record
    pub fn pack(&self) -> Result<[u32; ACTION_WORDS]> {
        self.validate()?;
        let mut w = [0u32; ACTION_WORDS];
        w[0] = self.kind as u32 | (self.updates.len() as u32) << 8 | VALID;
        w[1] = self.port;
        for (i, u) in self.updates.iter().enumerate() {
            let at = 2 + i * 3;
            w[at] = u.offset as u32;
            w[at + 1] = u.mask;
            w[at + 2] = u.value;
        }
        Ok(w)
    }
}
