//! Linked-account ownership resolution.
//!
//! A registry user may be a satellite of another account: other accounts
//! declare it as their primary (`linked_account_ids` backlinks), and an
//! explicit `owner_override` can select one of them (or the user itself)
//! as the authoritative source for synced attributes. Resolution is a pure
//! function over the already-fetched records; every violated invariant is a
//! conflict that skips the record.

use std::collections::HashMap;

use dirsync_registry::{RegistryUser, UserId};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// Resolve the account whose properties feed synchronization for `user`.
///
/// `accounts` must contain the records behind `user.linked_account_ids`.
/// Invariants:
/// - an `owner_override` must point at the user itself or a declared
///   backlink;
/// - without an override, at most one account may claim ownership;
/// - the resolved account's login domain must admit the directory entry's
///   DN suffix, unless the resolved account is the user itself.
pub fn resolve_source_account<'a>(
    user: &'a RegistryUser,
    accounts: &'a HashMap<UserId, RegistryUser>,
    entry_dn: &str,
    config: &SyncConfig,
) -> SyncResult<&'a RegistryUser> {
    if user.linked_account_ids.is_empty() {
        return Ok(user);
    }

    let source: &RegistryUser = if let Some(override_id) = user.owner_override {
        if override_id != user.id && !user.linked_account_ids.contains(&override_id) {
            return Err(SyncError::conflict(
                &user.username,
                format!("owner override {override_id} is outside the declared links"),
            ));
        }
        if override_id == user.id {
            user
        } else {
            accounts.get(&override_id).ok_or_else(|| {
                SyncError::conflict(
                    &user.username,
                    format!("owner override {override_id} could not be resolved"),
                )
            })?
        }
    } else if user.linked_account_ids.len() > 1 {
        return Err(SyncError::conflict(
            &user.username,
            format!(
                "{} accounts claim ownership of this user",
                user.linked_account_ids.len()
            ),
        ));
    } else {
        let id = user.linked_account_ids[0];
        accounts.get(&id).ok_or_else(|| {
            SyncError::conflict(&user.username, format!("linked account {id} could not be resolved"))
        })?
    };

    // The linked account's domain must admit this entry's DN suffix.
    let domain = source
        .domain
        .clone()
        .or_else(|| source.username.split_once('@').map(|(_, d)| d.to_string()))
        .unwrap_or_default();
    if config.dn_suffix_allowed(&domain, entry_dn) {
        return Ok(source);
    }

    if source.username == user.username {
        // The override refers back to the user itself; nothing external is
        // writing, so the sync may continue.
        return Ok(user);
    }

    Err(SyncError::conflict(
        &user.username,
        format!("entry '{entry_dn}' has no allowed DN suffix for domain '{domain}'"),
    ))
}
