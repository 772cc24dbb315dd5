//! Collision registry
//!
//! One document per hashed collection identifier, keyed by the identifier
//! itself and carrying the original key fields the active data model folded
//! into it. Registration is a single atomic insert-if-absent against the
//! store, so two concurrent first-writers cannot both believe they own a
//! hash.

use tracing::warn;

use crate::backend::{DocumentBackend, Namespace, RegistryOutcome};
use crate::error::{Error, Result};
use crate::metrics;
use crate::types::RegistryEntry;

/// Claim a hashed identifier for `entry`, or report the colliding owner
///
/// Returns `None` when the identifier was free or already registered from
/// the same logical key (an idempotent re-registration). Returns the stored
/// entry when a *different* key owns the identifier — the caller still keeps
/// the physical collection; the registry only makes the ambiguity
/// observable and queryable.
pub async fn record_or_verify(
    backend: &dyn DocumentBackend,
    registry: &Namespace,
    entry: RegistryEntry,
) -> Result<Option<RegistryEntry>> {
    let identifier = entry.id.clone();
    match backend
        .register_name(registry, entry.clone())
        .await
        .map_err(Error::write)?
    {
        RegistryOutcome::Registered => Ok(None),
        RegistryOutcome::Existing(existing) if existing == entry => Ok(None),
        RegistryOutcome::Existing(existing) => {
            warn!(
                identifier = %identifier,
                registered_service_path = %existing.service_path,
                colliding_service_path = %entry.service_path,
                "collection name hash collision"
            );
            metrics::NAME_COLLISIONS_TOTAL.inc();
            Ok(Some(existing))
        }
    }
}
