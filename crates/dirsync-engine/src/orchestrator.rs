//! Sync orchestration.
//!
//! Single-record and full-population synchronization in both directions.
//! Full sweeps process users in sorted username order so repeated dry runs
//! are reproducible; per-record failures are converted to counters and log
//! entries at the sweep boundary and never abort the remaining population.
//! A configured change budget turns a sweep into a forced dry run first and
//! aborts, without writes, when the would-change count exceeds the budget.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use dirsync_registry::{PropertyValue, RegistryUser, UserId, UserPatch};

use crate::contacts::{ContactPlan, plan_inbound_contacts, plan_outbound_contacts};
use crate::error::{SyncError, SyncResult};
use crate::linked::resolve_source_account;
use crate::mapping::{GUID_ATTRIBUTE, PRINCIPAL_NAME_ATTRIBUTE};
use crate::session::{RunSummary, SyncDirection, SyncSession};

impl SyncSession {
    /// Verify a user's directory credentials (login-time check).
    pub async fn bind_as_user(&mut self, username: &str, password: &str) -> SyncResult<bool> {
        let Some(entry) = self.directory.find_user(username).await? else {
            return Ok(false);
        };
        let bound = self.directory.rebind(entry.dn(), password).await?;
        if bound {
            debug!(dn = %entry.dn(), "Successful user bind");
        } else {
            self.record_error();
            error!(user = %username, dn = %entry.dn(), "Directory rejected user credentials");
        }
        Ok(bound)
    }

    /// Synchronize one user from the directory into the registry.
    ///
    /// Matches the directory entry by username, then by stored GUID (so
    /// directory-side renames find their registry account); derives
    /// eligibility from group membership; retires users that dropped out of
    /// every configured group; creates users that exist only in the
    /// directory.
    pub async fn sync_user_from_directory(&mut self, username: &str) -> SyncResult<()> {
        let dry = self.registry_dry();
        debug!(user = %username, dry_run = dry, "Processing user for sync from directory");

        let mut entry = self.directory.find_user(username).await?;

        // Find the registry account: GUID match first (catches renames),
        // then the username with and without its domain.
        let mut user_id: Option<UserId> = None;
        if let Some(ref found) = entry {
            if let Some(guid) = found.guid_hex(GUID_ATTRIBUTE) {
                user_id = self.registry.find_by_guid(&guid).await?;
            }
        }
        if user_id.is_none() {
            let short = username.split('@').next().unwrap_or(username);
            for candidate in [username, short] {
                match self.registry.lookup_username(candidate).await {
                    Ok(id) => {
                        user_id = Some(id);
                        break;
                    }
                    Err(e) if e.is_not_found() => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        let user = match user_id {
            Some(id) => Some(self.registry.user(id).await?),
            None => None,
        };

        // A registry user whose directory entry was renamed away from its
        // username is still reachable through the stored GUID.
        if entry.is_none() {
            if let Some(ref u) = user {
                if let Some(ref guid) = u.guid {
                    entry = self.directory.find_by_guid(guid).await?;
                }
            }
        }

        if self.config.is_reserved(username)
            || user
                .as_ref()
                .is_some_and(|u| !self.sync_statuses.contains(&u.status))
        {
            info!(user = %username, "Skipping reserved registry user");
            return Ok(());
        }

        let obsolete = match entry {
            Some(ref e) => self.groups.is_obsolete(e.dn()),
            None => true,
        };
        if user.is_none() && obsolete {
            info!(user = %username, "Not syncing: not in directory or obsolete");
            return Ok(());
        }

        self.config.check_domain(username, true)?;

        let mut wrote = false;
        if obsolete {
            // Either gone from the directory or in no role-bearing group.
            if let Some(user) = user {
                if user.status != self.status_obsolete {
                    info!(
                        user = %username,
                        "{}Retiring registry user: no longer eligible",
                        self.registry_prefix()
                    );
                    let mut patch = UserPatch::new();
                    patch.status = Some(self.status_obsolete);
                    self.changed_registry_users.insert(user.username.clone(), 1);
                    if !dry {
                        self.registry.update_user(user.id, patch).await?;
                        wrote = true;
                    }
                } else {
                    debug!(user = %username, "User is already obsolete");
                }
            }
        } else {
            // Obsolescence above covers the no-entry case, so an entry is
            // present here.
            let Some(entry) = entry.as_ref() else {
                return Ok(());
            };

            let source = match &user {
                Some(u) => match self.resolve_source(u, entry.dn()).await {
                    Ok(resolved) => Some(resolved),
                    Err(e @ SyncError::Conflict { .. }) => {
                        self.record_error();
                        error!(user = %username, error = %e, "Skipping conflicting record");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                },
                None => None,
            };
            let source_id = source.as_ref().map(|s| s.id);

            let (create_patch, mut live_patch) = self
                .compute_inbound_patch(user.as_ref(), source_id, entry)
                .await?;

            let contact_plan = if self.mapping.contacts.is_empty() {
                ContactPlan::default()
            } else {
                self.plan_contacts_inbound(user.as_ref(), entry).await?
            };

            let Some(group) = self.groups.status_for(entry.dn()) else {
                return Err(SyncError::configuration(format!(
                    "user '{username}' is eligible but matches no configured group"
                )));
            };
            let new_status = group.status;
            let roles = group.roles.clone();

            match user {
                Some(user) => {
                    // Drop values that would not change anything.
                    let names: Vec<String> = live_patch
                        .property_names()
                        .iter()
                        .map(|n| (*n).to_string())
                        .collect();
                    for name in names {
                        if user.property(&name) == live_patch.get(&name).cloned() {
                            live_patch.unset(&name);
                        }
                    }
                    if user.status != new_status {
                        // Roles follow the status transition.
                        live_patch.status = Some(new_status);
                        live_patch.roles = Some(roles);
                    }

                    if contact_plan.changes_anything() {
                        self.changed_registry_users
                            .entry(user.username.clone())
                            .or_insert(0);
                        if self.apply_contact_plan(&user.username, user.id, &contact_plan).await? {
                            wrote = true;
                        }
                    }

                    if !live_patch.is_empty() {
                        info!(
                            user = %username,
                            properties = ?live_patch.property_names(),
                            "{}Updating registry user",
                            self.registry_prefix()
                        );
                        *self
                            .changed_registry_users
                            .entry(user.username.clone())
                            .or_insert(0) += live_patch.len().max(1);
                        if !dry {
                            self.registry.update_user(user.id, live_patch).await?;
                            wrote = true;
                        }
                    } else {
                        debug!(user = %username, "{}No registry changes", self.registry_prefix());
                    }
                }
                None => {
                    let mut patch = create_patch;
                    patch.merge(live_patch);
                    patch.status = Some(new_status);
                    patch.roles = Some(roles);
                    if patch.get("username").is_none() {
                        patch.set("username", PropertyValue::Text(username.to_string()));
                    }
                    let has_name = ["first_name", "last_name", "display_name"]
                        .iter()
                        .any(|p| patch.get(p).is_some_and(|v| !v.is_empty()));
                    if !has_name {
                        self.record_warning();
                        warn!(user = %username, "Not creating user without any name attribute");
                        return Ok(());
                    }

                    info!(
                        user = %username,
                        properties = ?patch.property_names(),
                        "{}Creating registry user",
                        self.registry_prefix()
                    );
                    self.changed_registry_users
                        .insert(username.to_string(), patch.len());
                    if !dry {
                        let new_id = self.registry.create_user(patch).await?;
                        wrote = true;
                        self.apply_contact_plan(username, new_id, &contact_plan).await?;
                    }
                }
            }
        }

        if wrote {
            self.registry.commit().await?;
        }
        Ok(())
    }

    /// Synchronize one user from the registry into the directory.
    pub async fn sync_user_to_directory(&mut self, username: &str) -> SyncResult<()> {
        let dry = self.directory_dry();
        debug!(user = %username, dry_run = dry, "Processing user for sync to directory");

        let allow_missing_domain = !self.config.update_directory;
        if !self.config.check_domain(username, allow_missing_domain)? {
            info!(user = %username, "Not syncing user without a domain");
            return Ok(());
        }

        let user_id = match self.registry.lookup_username(username).await {
            Ok(id) => id,
            Err(e) if e.is_not_found() => {
                debug!(user = %username, "Skipping user absent from the registry");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let user = self.registry.user(user_id).await?;

        let Some(mut entry) = self.directory.find_user(&user.username).await? else {
            info!(user = %username, "Directory user not found");
            return Ok(());
        };

        let source = match self.resolve_source(&user, entry.dn()).await {
            Ok(resolved) => resolved,
            Err(e @ SyncError::Conflict { .. }) => {
                self.record_error();
                error!(user = %username, error = %e, "Skipping conflicting record");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !self.sync_statuses.contains(&user.status) {
            info!(user = %username, "Skipping user outside the sync statuses");
            return Ok(());
        }
        if user.status == self.status_obsolete {
            if !self.groups.is_obsolete(entry.dn()) {
                info!(user = %username, "Registry user is obsolete but still grouped");
            }
            return Ok(());
        }
        if self.groups.is_obsolete(entry.dn()) {
            info!(user = %username, "Obsolete directory user");
            return Ok(());
        }

        // Keep the matched account aligned with its linked source before
        // comparing against the directory.
        if user.id != source.id {
            let mut align = UserPatch::new();
            if user.first_name != source.first_name {
                align.set("first_name", PropertyValue::from_text(source.first_name.clone()));
            }
            if user.last_name != source.last_name {
                align.set("last_name", PropertyValue::from_text(source.last_name.clone()));
            }
            if user.display_name != source.display_name {
                align.set(
                    "display_name",
                    PropertyValue::from_text(source.display_name.clone()),
                );
            }
            if !align.is_empty() {
                debug!(
                    user = %user.username,
                    properties = ?align.property_names(),
                    "Aligning account with its linked source"
                );
                if !self.registry_dry() {
                    self.registry.update_user(user.id, align).await?;
                    self.registry.commit().await?;
                }
            }
        }

        let mut plan = self.compute_outbound_plan(&user, &source, &entry).await?;

        if !self.mapping.contacts.is_empty() {
            let single = self.contact_multiplicity().await?;
            let mut by_kind: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for contact in self.registry.contacts(source.id).await? {
                by_kind.entry(contact.kind).or_default().push(contact.value);
            }
            let contact_plan = plan_outbound_contacts(
                &by_kind,
                source.primary_account.is_some(),
                &entry,
                &self.mapping.contacts,
                &single,
            );
            for message in &contact_plan.errors {
                self.record_error();
                error!(user = %username, "{message}");
            }
            plan.changes.extend(contact_plan.changes);
        }

        if plan.is_empty() {
            debug!(user = %username, "{}No directory changes", self.directory_prefix());
            return Ok(());
        }

        let change_count = plan.changes.len() + usize::from(plan.rename.is_some());
        self.changed_directory_users
            .insert(user.username.clone(), change_count);

        if dry {
            info!(
                user = %username,
                changes = change_count,
                "{}Directory changes computed but not applied",
                self.directory_prefix()
            );
            debug!(user = %username, changes = ?plan.changes, "Suppressed modification list");
            return Ok(());
        }

        if let Some(rename) = plan.rename.take() {
            info!(user = %username, new_rdn = %rename.new_rdn, "Renaming directory entry");
            match self.directory.rename(&rename).await {
                Ok(()) => {
                    // Later operations in this run must target the new DN.
                    if let Err(e) = entry.replace_rdn(&rename.new_rdn) {
                        self.record_error();
                        error!(user = %username, error = %e, "Could not rewrite DN after rename");
                    }
                }
                Err(e) => {
                    // A failed rename (permissions, most likely) must not
                    // block the remaining attribute updates.
                    self.record_error();
                    error!(
                        user = %username,
                        error = %e,
                        "Rename failed; continuing with remaining updates"
                    );
                }
            }
        }

        if !plan.changes.is_empty() {
            info!(
                user = %username,
                changes = plan.changes.len(),
                "Applying collected modifications"
            );
            if let Err(e) = self.directory.modify(entry.dn(), plan.changes).await {
                self.record_error();
                error!(user = %username, error = %e, "Directory modify failed");
            }
        }

        Ok(())
    }

    /// Synchronize the whole population from the directory.
    ///
    /// With a change budget, the population is first swept in forced
    /// dry-run mode; when more records would change than the budget allows,
    /// the run aborts with zero writes and a
    /// [`BudgetExceeded`](SyncError::BudgetExceeded) error. The probe's
    /// change map is preserved for inspection.
    pub async fn sync_all_from_directory(
        &mut self,
        max_changes: Option<usize>,
    ) -> SyncResult<RunSummary> {
        let started_at = Utc::now();
        self.changed_registry_users.clear();

        if let Some(max) = max_changes {
            if !self.dry_run_registry {
                self.dry_run_registry = true;
                self.sweep_from_directory().await?;
                let would_change = self.changed_registry_users.len();
                self.counters = Default::default();
                if would_change > max {
                    self.record_error();
                    error!(
                        would_change,
                        max_changes = max,
                        "Inbound change budget exceeded, aborting with no writes"
                    );
                    return Err(SyncError::BudgetExceeded {
                        direction: SyncDirection::Inbound,
                        would_change,
                        max_changes: max,
                    });
                }
                self.changed_registry_users.clear();
                self.dry_run_registry = false;
            }
        }

        self.sweep_from_directory().await?;
        Ok(self.finish_sweep(SyncDirection::Inbound, started_at))
    }

    /// Synchronize the whole population into the directory, with the same
    /// change-budget contract as [`sync_all_from_directory`](Self::sync_all_from_directory).
    pub async fn sync_all_to_directory(
        &mut self,
        max_changes: Option<usize>,
    ) -> SyncResult<RunSummary> {
        let started_at = Utc::now();
        self.changed_directory_users.clear();

        if let Some(max) = max_changes {
            if !self.dry_run_directory {
                self.dry_run_directory = true;
                self.sweep_to_directory().await?;
                let would_change = self.changed_directory_users.len();
                self.counters = Default::default();
                if would_change > max {
                    self.record_error();
                    error!(
                        would_change,
                        max_changes = max,
                        "Outbound change budget exceeded, aborting with no writes"
                    );
                    return Err(SyncError::BudgetExceeded {
                        direction: SyncDirection::Outbound,
                        would_change,
                        max_changes: max,
                    });
                }
                self.changed_directory_users.clear();
                self.dry_run_directory = false;
            }
        }

        self.sweep_to_directory().await?;
        Ok(self.finish_sweep(SyncDirection::Outbound, started_at))
    }

    /// Inbound sweep: directory users first (rename catch via GUID), then
    /// registry users absent from the directory set (removal catch), each
    /// phase in sorted username order without duplication.
    async fn sweep_from_directory(&mut self) -> SyncResult<()> {
        let mut directory_usernames: BTreeSet<String> = BTreeSet::new();
        let mut pages = self
            .directory
            .all_users(&[PRINCIPAL_NAME_ATTRIBUTE.to_string()])
            .await?;
        while let Some(page) = pages.next_page().await? {
            for entry in page {
                let Some(name) = entry.value(PRINCIPAL_NAME_ATTRIBUTE) else {
                    continue;
                };
                // Users outside every configured group are not enumerated
                // here; the registry-side pass below retires them.
                if self.groups.status_for(entry.dn()).is_none() {
                    continue;
                }
                directory_usernames.insert(name.to_string());
            }
        }
        drop(pages);

        let names: Vec<String> = directory_usernames.iter().cloned().collect();
        for username in &names {
            if !self.config.domain_allowed(username) {
                continue;
            }
            if let Err(e) = self.sync_user_from_directory(username).await {
                self.record_error();
                error!(user = %username, error = %e, "Error synchronizing user");
            }
        }

        let registry_usernames = self.registry.all_usernames().await?;
        for username in registry_usernames {
            if directory_usernames.contains(&username) {
                continue;
            }
            // A user without a domain is probably obsolete and must still
            // be swept; only foreign domains are filtered out.
            if username.contains('@') && !self.config.domain_allowed(&username) {
                continue;
            }
            if let Err(e) = self.sync_user_from_directory(&username).await {
                self.record_error();
                error!(user = %username, error = %e, "Error synchronizing user");
            }
        }

        Ok(())
    }

    /// Outbound sweep over all users in group-bearing statuses.
    async fn sweep_to_directory(&mut self) -> SyncResult<()> {
        let eligible = self.eligible_statuses.clone();
        let usernames = self.registry.usernames_with_status(&eligible).await?;
        for username in usernames {
            if !self.config.domain_allowed(&username) {
                continue;
            }
            if let Err(e) = self.sync_user_to_directory(&username).await {
                self.record_error();
                error!(user = %username, error = %e, "Error synchronizing user to directory");
            }
        }
        Ok(())
    }

    fn finish_sweep(
        &mut self,
        direction: SyncDirection,
        started_at: chrono::DateTime<Utc>,
    ) -> RunSummary {
        let (dry_run, users_changed) = match direction {
            SyncDirection::Inbound => (self.registry_dry(), self.changed_registry_users.len()),
            SyncDirection::Outbound => (self.directory_dry(), self.changed_directory_users.len()),
        };
        let summary = RunSummary {
            direction,
            dry_run,
            users_changed,
            errors: self.counters.errors,
            warnings: self.counters.warnings,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            direction = %direction,
            dry_run,
            users_changed,
            errors = summary.errors,
            warnings = summary.warnings,
            "Sync sweep complete"
        );
        // A finished sweep starts the next one from clean counters.
        self.counters = Default::default();
        match direction {
            SyncDirection::Inbound => self.changed_registry_users.clear(),
            SyncDirection::Outbound => self.changed_directory_users.clear(),
        }
        summary
    }

    /// Fetch linked records and resolve the authoritative source account.
    async fn resolve_source(
        &mut self,
        user: &RegistryUser,
        entry_dn: &str,
    ) -> SyncResult<RegistryUser> {
        if user.linked_account_ids.is_empty() {
            return Ok(user.clone());
        }
        let mut accounts: HashMap<UserId, RegistryUser> = HashMap::new();
        for id in &user.linked_account_ids {
            accounts.insert(*id, self.registry.user(*id).await?);
        }
        resolve_source_account(user, &accounts, entry_dn, &self.config).cloned()
    }

    /// Plan the inbound contact reconciliation for one user, honoring
    /// keep-flag downgrades accumulated earlier in the run.
    async fn plan_contacts_inbound(
        &mut self,
        user: Option<&RegistryUser>,
        entry: &dirsync_connector::DirectoryEntry,
    ) -> SyncResult<ContactPlan> {
        let existing = match user {
            Some(u) => self.registry.contacts(u.id).await?,
            None => Vec::new(),
        };
        let single = self.contact_multiplicity().await?;

        let mut mappings = self.mapping.contacts.clone();
        for kind in &self.downgraded_contact_kinds {
            if let Some(mapping) = mappings.get_mut(kind) {
                mapping.keep_unmatched = false;
            }
        }

        let has_linked = user.is_some_and(|u| !u.linked_account_ids.is_empty());
        let plan = plan_inbound_contacts(&existing, entry, &mappings, &single, has_linked);

        for message in &plan.warnings {
            self.record_warning();
            warn!(user = ?user.map(|u| u.username.as_str()), "{message}");
        }
        for message in &plan.errors {
            self.record_error();
            error!(user = ?user.map(|u| u.username.as_str()), "{message}");
        }
        for kind in &plan.downgraded_kinds {
            self.downgraded_contact_kinds.insert(kind.clone());
        }

        Ok(plan)
    }

    /// Apply a contact plan through the store; returns whether anything was
    /// written.
    async fn apply_contact_plan(
        &mut self,
        username: &str,
        user: UserId,
        plan: &ContactPlan,
    ) -> SyncResult<bool> {
        let dry = self.registry_dry();
        for (id, order) in &plan.reorders {
            info!(
                user = %username,
                contact = %id,
                order,
                "{}Rewriting contact order",
                self.registry_prefix()
            );
            if !dry {
                self.registry.set_contact_order(*id, *order).await?;
            }
        }
        for draft in &plan.creates {
            info!(
                user = %username,
                kind = %draft.kind,
                value = %draft.value,
                order = draft.order,
                "{}Creating contact",
                self.registry_prefix()
            );
            if !dry {
                let mut draft = draft.clone();
                draft.user = Some(user);
                self.registry.create_contact(draft).await?;
            }
        }
        for id in &plan.retires {
            info!(
                user = %username,
                contact = %id,
                "{}Retiring contact",
                self.registry_prefix()
            );
            if !dry {
                self.registry.retire_contact(*id).await?;
            }
        }
        Ok(!dry && plan.changes_anything())
    }
}
