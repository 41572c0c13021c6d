//! Identity registry: read cursors and log lengths per identity.
//!
//! The registry is an owned value handed to the aggregator and the
//! reassociation service by reference; nothing here touches the store.
//! Lookups return `Option` so a removed identity is never resurrected by a
//! read.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::RegistryError;

/// Per-identity bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IdentityState {
    /// Samples already included in a previous emission
    pub cursor: u64,
    /// Samples ever appended under this identity
    pub length: u64,
    /// Whether the producer is currently connected
    pub live: bool,
}

impl IdentityState {
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.length.saturating_sub(self.cursor)
    }
}

/// One identity with unread samples, as seen when a cycle starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWindow {
    pub identity: String,
    pub cursor: u64,
    pub length: u64,
}

impl PendingWindow {
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.length - self.cursor
    }
}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: BTreeMap<String, IdentityState>,
}

fn check_name(identity: &str) -> Result<(), RegistryError> {
    if identity.is_empty() {
        Err(RegistryError::EmptyIdentity)
    } else {
        Ok(())
    }
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` with cursor 0. Returns `true` if it was new.
    pub fn register(&mut self, identity: &str) -> Result<bool, RegistryError> {
        check_name(identity)?;
        if self.identities.contains_key(identity) {
            return Ok(false);
        }
        self.identities
            .insert(identity.to_string(), IdentityState::default());
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.identities.contains_key(identity)
    }

    /// Known identities in name order.
    pub fn all_identities(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    #[must_use]
    pub fn state_of(&self, identity: &str) -> Option<IdentityState> {
        self.identities.get(identity).copied()
    }

    #[must_use]
    pub fn cursor_of(&self, identity: &str) -> Option<u64> {
        self.identities.get(identity).map(|s| s.cursor)
    }

    #[must_use]
    pub fn length_of(&self, identity: &str) -> Option<u64> {
        self.identities.get(identity).map(|s| s.length)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    fn get_mut(&mut self, identity: &str) -> Result<&mut IdentityState, RegistryError> {
        self.identities
            .get_mut(identity)
            .ok_or_else(|| RegistryError::UnknownIdentity(identity.to_string()))
    }

    /// Set the read cursor. Refuses to move it past the known log length.
    pub fn set_cursor(&mut self, identity: &str, cursor: u64) -> Result<(), RegistryError> {
        let state = self.get_mut(identity)?;
        if cursor > state.length {
            return Err(RegistryError::CursorBeyondLength {
                identity: identity.to_string(),
                cursor,
                length: state.length,
            });
        }
        state.cursor = cursor;
        Ok(())
    }

    /// Record the log length reported by the store.
    ///
    /// Appends can complete out of order relative to each other, so a
    /// smaller length than the one already recorded is ignored.
    pub fn set_length(&mut self, identity: &str, length: u64) -> Result<(), RegistryError> {
        let state = self.get_mut(identity)?;
        state.length = state.length.max(length);
        Ok(())
    }

    /// Move the cursor forward by `by`, clamped to the log length.
    pub fn advance_cursor(&mut self, identity: &str, by: u64) -> Result<u64, RegistryError> {
        let state = self.get_mut(identity)?;
        state.cursor = state.cursor.saturating_add(by).min(state.length);
        Ok(state.cursor)
    }

    pub fn set_live(&mut self, identity: &str, live: bool) -> Result<(), RegistryError> {
        self.get_mut(identity)?.live = live;
        Ok(())
    }

    pub fn live_identities(&self) -> impl Iterator<Item = &str> {
        self.identities
            .iter()
            .filter(|(_, s)| s.live)
            .map(|(name, _)| name.as_str())
    }

    pub fn remove(&mut self, identity: &str) -> Option<IdentityState> {
        self.identities.remove(identity)
    }

    /// Move `old`'s state under `new`.
    ///
    /// An existing destination keeps its own cursor and length; an absent
    /// one inherits `old`'s. The destination is always marked live and
    /// `old` is removed.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<(), RegistryError> {
        check_name(old)?;
        check_name(new)?;
        if old == new {
            self.register(new)?;
            return self.set_live(new, true);
        }
        let moved = self.identities.remove(old).unwrap_or_default();
        let dest = self
            .identities
            .entry(new.to_string())
            .or_insert(moved);
        dest.live = true;
        Ok(())
    }

    /// Identities with unread samples, in name order.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingWindow> {
        self.identities
            .iter()
            .filter(|(_, s)| s.pending() > 0)
            .map(|(name, s)| PendingWindow {
                identity: name.clone(),
                cursor: s.cursor,
                length: s.length,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.identities.clear();
    }
}
