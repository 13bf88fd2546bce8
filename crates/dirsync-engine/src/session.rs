//! Sync session state.
//!
//! A [`SyncSession`] is created per invocation and discarded at the end of
//! the run. It owns the two store handles, the mapping registry, the group
//! eligibility table, the dry-run flags and the per-run counters; nothing is
//! persisted between sessions beyond the two stores themselves.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use dirsync_connector::traits::Directory;
use dirsync_registry::{RegistryStore, StatusId};

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::groups::GroupTable;
use crate::mapping::MappingRegistry;

/// Direction of a synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Directory to registry.
    Inbound,
    /// Registry to directory.
    Outbound,
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Inbound => write!(f, "from-directory"),
            SyncDirection::Outbound => write!(f, "to-directory"),
        }
    }
}

/// Warning and error counters accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub errors: u32,
    pub warnings: u32,
}

/// Summary of one full-population sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub direction: SyncDirection,
    /// Whether the pass computed changes without applying them.
    pub dry_run: bool,
    /// Number of records that changed (or would change in a dry run).
    pub users_changed: usize,
    pub errors: u32,
    pub warnings: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Process-scoped state for one synchronization run.
pub struct SyncSession {
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) registry: Arc<dyn RegistryStore>,
    pub(crate) config: SyncConfig,
    pub(crate) mapping: MappingRegistry,
    pub(crate) groups: GroupTable,

    /// The status marking retired users.
    pub(crate) status_obsolete: StatusId,
    /// Statuses whose users participate in synchronization at all.
    pub(crate) sync_statuses: Vec<StatusId>,
    /// Group-bearing statuses, enumerated for the outbound sweep.
    pub(crate) eligible_statuses: Vec<StatusId>,

    /// Compute-only mode per direction.
    pub(crate) dry_run_registry: bool,
    pub(crate) dry_run_directory: bool,

    pub(crate) counters: RunCounters,
    /// Users changed (or that would change) this run, with change counts.
    pub(crate) changed_registry_users: BTreeMap<String, usize>,
    pub(crate) changed_directory_users: BTreeMap<String, usize>,

    /// Cached attribute multiplicity for contact attributes.
    pub(crate) contact_attr_multiplicity: Option<HashMap<String, bool>>,
    /// Contact kinds whose keep-flag was downgraded this run.
    pub(crate) downgraded_contact_kinds: std::collections::BTreeSet<String>,
}

impl SyncSession {
    /// Construct a session: validate configuration, bind to the directory,
    /// read the status table, resolve the group eligibility table and build
    /// the mapping registry.
    ///
    /// Failures here (bad credentials, unreachable directory, missing
    /// obsolete status, unknown configured group) are fatal; everything
    /// after construction is handled per record.
    pub async fn connect(
        directory: Arc<dyn Directory>,
        registry: Arc<dyn RegistryStore>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        config.validate()?;

        info!(directory = %directory.display_name(), "Starting user sync session");
        directory.bind().await?;

        let statuses = registry.statuses().await?;
        let status_obsolete = registry.lookup_status("obsolete").await?;

        let mut sync_statuses = vec![status_obsolete];
        let mut eligible_statuses = Vec::new();
        for status in &statuses {
            if status.directory_group.is_some() {
                sync_statuses.push(status.id);
                eligible_statuses.push(status.id);
            }
        }

        let groups = GroupTable::load(directory.as_ref(), &statuses).await?;
        let contact_kinds = registry.contact_kinds().await?;
        let mapping = MappingRegistry::build(&config, &registry.properties(), &contact_kinds);

        let mut counters = RunCounters::default();
        if config.update_directory && config.allowed_dn_suffixes.is_empty() {
            error!(
                "No allowed DN suffix configured for linked accounts; \
                 outbound writes for linked users will be rejected"
            );
            counters.errors += 1;
        }

        info!(
            mapped_properties = mapping.entries.len(),
            mapped_contact_kinds = mapping.contacts.len(),
            groups = groups.groups().len(),
            "Sync session ready"
        );

        Ok(Self {
            directory,
            registry,
            config,
            mapping,
            groups,
            status_obsolete,
            sync_statuses,
            eligible_statuses,
            dry_run_registry: false,
            dry_run_directory: false,
            counters,
            changed_registry_users: BTreeMap::new(),
            changed_directory_users: BTreeMap::new(),
            contact_attr_multiplicity: None,
            downgraded_contact_kinds: std::collections::BTreeSet::new(),
        })
    }

    /// Switch both directions into compute-only mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run_registry = dry_run;
        self.dry_run_directory = dry_run;
    }

    /// Builder-style dry-run toggle.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.set_dry_run(dry_run);
        self
    }

    /// The counters accumulated so far.
    pub fn counters(&self) -> RunCounters {
        self.counters
    }

    /// Users changed (or that would change) on the registry side this run.
    pub fn changed_registry_users(&self) -> &BTreeMap<String, usize> {
        &self.changed_registry_users
    }

    /// Users changed (or that would change) on the directory side this run.
    pub fn changed_directory_users(&self) -> &BTreeMap<String, usize> {
        &self.changed_directory_users
    }

    /// The mapping registry built for this session.
    pub fn mapping(&self) -> &MappingRegistry {
        &self.mapping
    }

    /// The group eligibility table built for this session.
    pub fn groups(&self) -> &GroupTable {
        &self.groups
    }

    pub(crate) fn record_error(&mut self) {
        self.counters.errors += 1;
    }

    pub(crate) fn record_warning(&mut self) {
        self.counters.warnings += 1;
    }

    /// Whether registry writes are suppressed (direction disabled or dry run).
    pub(crate) fn registry_dry(&self) -> bool {
        !self.config.update_registry || self.dry_run_registry
    }

    /// Whether directory writes are suppressed (direction disabled or dry run).
    pub(crate) fn directory_dry(&self) -> bool {
        !self.config.update_directory || self.dry_run_directory
    }

    /// Log prefix distinguishing dry runs, per direction.
    pub(crate) fn registry_prefix(&self) -> &'static str {
        if self.registry_dry() { "(dry run) " } else { "" }
    }

    pub(crate) fn directory_prefix(&self) -> &'static str {
        if self.directory_dry() { "(dry run) " } else { "" }
    }

    /// Attribute multiplicity of all contact-mapped attributes, queried
    /// once per session from the directory schema.
    pub(crate) async fn contact_multiplicity(&mut self) -> SyncResult<HashMap<String, bool>> {
        if let Some(ref cached) = self.contact_attr_multiplicity {
            return Ok(cached.clone());
        }
        let mut map = HashMap::new();
        for attribute in self.mapping.contact_attributes() {
            let single = self.directory.is_single_valued(&attribute).await?;
            map.insert(attribute.to_lowercase(), single);
        }
        self.contact_attr_multiplicity = Some(map.clone());
        Ok(map)
    }
}
