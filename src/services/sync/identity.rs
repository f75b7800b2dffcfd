//! Identity cross-reference

use std::collections::HashSet;

use tracing::debug;

use super::error::SyncError;
use crate::services::stores::IdentityStore;
use crate::types::normalize_email;

/// Normalized emails of activated identities. A store failure is fatal:
/// claim status cannot be assumed.
pub async fn activated_emails(store: &dyn IdentityStore) -> Result<HashSet<String>, SyncError> {
    let raw = store.fetch_activated_emails().await.map_err(SyncError::Identity)?;
    let emails: HashSet<String> = raw.iter().filter_map(|e| normalize_email(e)).collect();
    debug!(count = emails.len(), "Loaded activated identities");
    Ok(emails)
}
