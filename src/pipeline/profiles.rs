//! Lazy profile cache refresh
//!
//! Profiles are fetched on demand only. An account the network reports as
//! deleted is purged from the mirror. Deactivated or taken-down accounts keep
//! their rows and are only marked refreshed.

use super::db::Store;
use super::social::{ActionError, SocialActions};
use super::types::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// Account no longer exists; `rows` mirrored rows were removed
    Purged { rows: usize },
    /// Account is deactivated or taken down; cached data kept
    Inactive,
}

/// Fetch `did` from the network and upsert it into the cache.
pub async fn refresh_profile(
    store: &Store,
    social: &dyn SocialActions,
    did: &str,
    now: i64,
) -> Result<RefreshOutcome, Box<dyn std::error::Error + Send + Sync>> {
    match social.get_profile(did).await {
        Ok(view) => {
            store.save_profile(&Profile {
                did: view.did,
                handle: Some(view.handle),
                display_name: view.display_name,
                avatar: view.avatar,
                description: view.description,
                indexed_at: now,
                updated_at: Some(now),
            })?;
            Ok(RefreshOutcome::Updated)
        }
        Err(ActionError::NotFound(_)) => {
            let rows = store.purge_account(did)?;
            log::info!("🗑️  Account {} is gone, purged {} rows", did, rows);
            Ok(RefreshOutcome::Purged { rows })
        }
        Err(ActionError::AccountInactive(reason)) => {
            store.touch_profile(did, now)?;
            log::info!("💤 Account {} is inactive ({}), keeping its rows", did, reason);
            Ok(RefreshOutcome::Inactive)
        }
        Err(e) => Err(e.into()),
    }
}

/// Refresh up to `limit` never-refreshed profiles among `dids`. Failures
/// are logged per account. Returns (updated, purged).
pub async fn refresh_stale_profiles(
    store: &Store,
    social: &dyn SocialActions,
    dids: &[String],
    limit: usize,
    now: i64,
) -> Result<(usize, usize), Box<dyn std::error::Error + Send + Sync>> {
    if limit == 0 || dids.is_empty() {
        return Ok((0, 0));
    }

    let stale = store.profiles_needing_refresh(dids, limit)?;
    let mut updated = 0;
    let mut purged = 0;

    for did in &stale {
        match refresh_profile(store, social, did, now).await {
            Ok(RefreshOutcome::Updated) => updated += 1,
            Ok(RefreshOutcome::Purged { .. }) => purged += 1,
            Ok(RefreshOutcome::Inactive) => {}
            Err(e) => log::warn!("⚠️  Profile refresh failed for {}: {}", did, e),
        }
    }

    if !stale.is_empty() {
        log::debug!("👤 Refreshed {} profiles ({} purged)", updated, purged);
    }
    Ok((updated, purged))
}
