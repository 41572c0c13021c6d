//! Identity reassociation: move one identity's history under a new name.
//!
//! The store migration runs first. If it fails the registry is not
//! touched, so a failed rename leaves both names exactly as they were.
//! Callers sequence this against ingestion on either name; see
//! [`Hub::rename`](crate::hub::Hub::rename).

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{Error, RegistryError};
use crate::registry::IdentityRegistry;
use crate::store::SampleLogStore;

/// Registry state of the destination after a rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassociation {
    pub old_identity: String,
    pub new_identity: String,
    /// Destination log length after the merge
    pub length: u64,
    /// Destination cursor after the merge
    pub cursor: u64,
    /// Whether the destination already existed before the rename
    pub merged: bool,
}

/// Migrate `old`'s log, cursor and length to `new`.
///
/// The destination log receives `old`'s samples after its own. A
/// pre-existing destination keeps its cursor; its length becomes the merged
/// log length reported by the store.
pub async fn reassociate<S: SampleLogStore>(
    store: &S,
    registry: &Mutex<IdentityRegistry>,
    old: &str,
    new: &str,
) -> Result<Reassociation, Error> {
    if old.is_empty() || new.is_empty() {
        return Err(RegistryError::EmptyIdentity.into());
    }

    let length = store.rename(old, new).await?;

    let mut registry = registry.lock().await;
    let merged = old != new && registry.contains(new);
    registry.rename(old, new)?;
    registry.set_length(new, length)?;
    let cursor = registry.cursor_of(new).unwrap_or_default();

    info!(
        old_identity = %old,
        new_identity = %new,
        length,
        cursor,
        merged,
        "identity reassociated"
    );

    Ok(Reassociation {
        old_identity: old.to_string(),
        new_identity: new.to_string(),
        length,
        cursor,
        merged,
    })
}
