//! Group membership resolution.
//!
//! Builds the per-session eligibility table: for every status record that
//! names a directory group, the transitive membership of that group is
//! collected once by an explicit breadth-first traversal over the
//! connector's group-expansion capability, with a visited set guarding
//! against membership cycles. Lookups afterwards are in-memory.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info};

use dirsync_connector::traits::Directory;
use dirsync_registry::{StatusId, StatusRecord};

use crate::error::{SyncError, SyncResult};

/// One configured group with its derived eligibility data.
#[derive(Debug, Clone)]
pub struct EligibilityGroup {
    /// Directory group account name.
    pub name: String,
    /// Priority rank; lower ranks win.
    pub priority: i32,
    /// Registry status carried by members of this group.
    pub status: StatusId,
    /// Roles granted to members.
    pub roles: Vec<String>,
    /// Lowercased DNs of all transitively contained person entries.
    pub member_dns: HashSet<String>,
    /// Lowercased DNs of the group itself and all transitive subgroups.
    pub member_groups: HashSet<String>,
}

impl EligibilityGroup {
    /// Whether the person DN is a transitive member.
    pub fn contains(&self, dn: &str) -> bool {
        self.member_dns.contains(&dn.to_lowercase())
    }
}

/// Priority-ordered eligibility table, built once per session.
#[derive(Debug, Clone, Default)]
pub struct GroupTable {
    groups: Vec<EligibilityGroup>,
}

impl GroupTable {
    /// Build a table from pre-resolved groups (tests, replays).
    pub fn from_groups(mut groups: Vec<EligibilityGroup>) -> Self {
        groups.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Self { groups }
    }

    /// Resolve every configured group against the directory.
    ///
    /// A status record participates when it names a directory group. A
    /// configured group that does not exist in the directory is a fatal
    /// session-construction error.
    pub async fn load(directory: &dyn Directory, statuses: &[StatusRecord]) -> SyncResult<Self> {
        let mut groups = Vec::new();

        for status in statuses {
            let Some(ref name) = status.directory_group else {
                continue;
            };
            let root = directory.find_group(name).await?.ok_or_else(|| {
                SyncError::configuration(format!("configured directory group '{name}' not found"))
            })?;

            let group = expand(directory, name, root.dn(), status).await?;
            info!(
                group = %name,
                priority = group.priority,
                users = group.member_dns.len(),
                subgroups = group.member_groups.len() - 1,
                "Resolved directory group for user lookup"
            );
            groups.push(group);
        }

        Ok(Self::from_groups(groups))
    }

    /// The groups, in ascending priority order.
    pub fn groups(&self) -> &[EligibilityGroup] {
        &self.groups
    }

    /// Whether no groups are configured at all.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Eligibility of a person DN: the matching group with the lowest
    /// priority rank, or `None` when the user is in no configured group.
    pub fn status_for(&self, dn: &str) -> Option<&EligibilityGroup> {
        let dn = dn.to_lowercase();
        self.groups.iter().find(|g| g.member_dns.contains(&dn))
    }

    /// Whether the person DN must be treated as obsolete: in no configured
    /// group, or only in a group that grants no roles.
    pub fn is_obsolete(&self, dn: &str) -> bool {
        match self.status_for(dn) {
            Some(group) => group.roles.is_empty(),
            None => true,
        }
    }
}

/// Breadth-first membership expansion with a visited-set cycle guard.
async fn expand(
    directory: &dyn Directory,
    name: &str,
    root_dn: &str,
    status: &StatusRecord,
) -> SyncResult<EligibilityGroup> {
    let mut member_dns: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(root_dn.to_string());

    while let Some(dn) = queue.pop_front() {
        let key = dn.to_lowercase();
        if !visited.insert(key) {
            continue;
        }

        let members = directory.expand_group(&dn).await?;
        debug!(
            group = %name,
            dn = %dn,
            users = members.users.len(),
            subgroups = members.groups.len(),
            "Expanded group"
        );
        for user_dn in members.users {
            member_dns.insert(user_dn.to_lowercase());
        }
        for group_dn in members.groups {
            if !visited.contains(&group_dn.to_lowercase()) {
                queue.push_back(group_dn);
            }
        }
    }

    Ok(EligibilityGroup {
        name: name.to_string(),
        priority: status.group_priority,
        status: status.id,
        roles: status.roles.clone(),
        member_dns,
        member_groups: visited,
    })
}
