//! Contact list reconciliation.
//!
//! Reconciles the registry's ordered contact rows against the directory's
//! single- and multi-valued contact attributes. Both directions are
//! computed as pure plans over already-fetched data; the orchestrator
//! applies them through the store and connector boundaries.

use std::collections::{BTreeMap, HashMap, HashSet};

use dirsync_connector::{AttributeChange, DirectoryEntry};
use dirsync_registry::{ContactDraft, ContactEntry, ContactId};

use crate::mapping::ContactMapping;

/// Kept orphan rows are renumbered densely from this order per kind. The
/// absolute offset is a convention; only relative order and density are
/// contractual.
const KEPT_ORPHAN_START_ORDER: u32 = 2;

/// Planned registry-side contact changes for one user.
#[derive(Debug, Clone, Default)]
pub struct ContactPlan {
    /// Rows whose order drifted and must be rewritten.
    pub reorders: Vec<(ContactId, u32)>,
    /// Rows to create.
    pub creates: Vec<ContactDraft>,
    /// Rows to retire.
    pub retires: Vec<ContactId>,
    /// Contact kinds whose keep-flag was downgraded due to a multi-valued
    /// attribute (configuration error, recovered).
    pub downgraded_kinds: Vec<String>,
    /// Non-fatal oddities worth a warning log.
    pub warnings: Vec<String>,
    /// Per-value errors (duplicates).
    pub errors: Vec<String>,
}

impl ContactPlan {
    /// Whether applying this plan would change the registry.
    pub fn changes_anything(&self) -> bool {
        !self.reorders.is_empty() || !self.creates.is_empty() || !self.retires.is_empty()
    }
}

/// Compute the registry-side reconciliation of one user's contact rows
/// against the directory entry.
///
/// Directory-sourced values are assigned a dense 1-based order per kind, in
/// attribute order (primary first, then overflow). Matched rows keep their
/// id; unmatched configured-kind rows are retired unless the kind keeps
/// orphans, in which case they are renumbered densely after the
/// directory-sourced rows. Rows of kinds outside the mapping are never
/// touched.
pub fn plan_inbound_contacts(
    existing: &[ContactEntry],
    entry: &DirectoryEntry,
    mappings: &BTreeMap<String, ContactMapping>,
    single_valued: &HashMap<String, bool>,
    user_has_linked: bool,
) -> ContactPlan {
    let mut plan = ContactPlan::default();

    let is_single =
        |attr: &str| single_valued.get(&attr.to_lowercase()).copied().unwrap_or(false);

    let mut unmatched: BTreeMap<(String, String), &ContactEntry> = existing
        .iter()
        .map(|c| ((c.kind.clone(), c.value.clone()), c))
        .collect();
    let mut matched: HashSet<(String, String)> = HashSet::new();

    for (kind, mapping) in mappings {
        let mut order: u32 = 1;
        let attribute_count = mapping.attributes.len();
        for (position, attribute) in mapping.attributes.iter().enumerate() {
            if !entry.has(attribute) {
                continue;
            }
            if is_single(attribute) {
                if position == attribute_count - 1 && attribute_count > 1 {
                    plan.warnings
                        .push(format!("single-valued attribute is last: {attribute}"));
                }
            } else if position < attribute_count - 1 {
                plan.warnings
                    .push(format!("multi-valued attribute is not last: {attribute}"));
            }

            for value in entry.values(attribute).unwrap_or_default() {
                let key = (kind.clone(), value.clone());
                if let Some(row) = unmatched.remove(&key) {
                    if row.order != order {
                        plan.reorders.push((row.id, order));
                    }
                    matched.insert(key);
                } else if matched.contains(&key) {
                    plan.errors.push(format!("duplicate contact {kind}:{value}"));
                    continue;
                } else {
                    plan.creates.push(ContactDraft {
                        user: None,
                        kind: kind.clone(),
                        value: value.clone(),
                        order,
                    });
                }
                order += 1;
            }
        }
    }

    // Orphans: registry rows no directory value matched, in stable order.
    let mut orphans: Vec<&ContactEntry> = unmatched.values().copied().collect();
    orphans.sort_by_key(|c| (c.order, c.id));

    let mut downgraded: HashSet<String> = HashSet::new();
    let mut next_kept_order: BTreeMap<String, u32> = BTreeMap::new();

    for row in orphans {
        let Some(mapping) = mappings.get(&row.kind) else {
            // Kinds outside the mapping registry pass through untouched.
            continue;
        };
        if user_has_linked && mapping.linked_only {
            plan.retires.push(row.id);
            continue;
        }
        if !mapping.keep_unmatched || downgraded.contains(&row.kind) {
            plan.retires.push(row.id);
            continue;
        }
        if let Some(multi) = mapping.attributes.iter().find(|a| !is_single(a)) {
            // Keep-semantics declared over a multi-valued attribute is a
            // configuration error; recover by dropping the keep flag for
            // the remainder of the run.
            plan.warnings.push(format!(
                "contact kind '{}' keeps unmatched rows but maps multi-valued attribute {multi}",
                row.kind
            ));
            plan.downgraded_kinds.push(row.kind.clone());
            downgraded.insert(row.kind.clone());
            plan.retires.push(row.id);
            continue;
        }

        let order = next_kept_order
            .entry(row.kind.clone())
            .or_insert(KEPT_ORPHAN_START_ORDER);
        if row.order != *order {
            plan.reorders.push((row.id, *order));
        }
        *order += 1;
    }

    plan
}

/// Planned directory-side contact changes for one user.
#[derive(Debug, Clone, Default)]
pub struct OutboundContactPlan {
    pub changes: Vec<AttributeChange>,
    pub errors: Vec<String>,
}

/// Compute the directory-side modification list for one user's contacts.
///
/// Only kinds flagged for directory sync participate, and only for users
/// with a linked primary account (satellite accounts are the ones allowed
/// to write their contact data outward). The primary attribute carries the
/// first row's value; the overflow attribute, when mapped, carries the
/// remaining rows in order. Mapped kinds with no registry rows get their
/// present attributes deleted.
pub fn plan_outbound_contacts(
    contacts_by_kind: &BTreeMap<String, Vec<String>>,
    has_primary_account: bool,
    entry: &DirectoryEntry,
    mappings: &BTreeMap<String, ContactMapping>,
    single_valued: &HashMap<String, bool>,
) -> OutboundContactPlan {
    let mut plan = OutboundContactPlan::default();

    let is_single =
        |attr: &str| single_valued.get(&attr.to_lowercase()).copied().unwrap_or(false);

    for (kind, values) in contacts_by_kind {
        let Some(mapping) = mappings.get(kind) else {
            continue;
        };
        if !mapping.sync_to_directory || !mapping.linked_only {
            continue;
        }
        if !has_primary_account {
            continue;
        }
        if values.is_empty() {
            continue;
        }

        let primary = &mapping.attributes[0];
        let overflow = mapping.attributes.get(1);

        if !entry.has(primary) {
            if overflow.is_none() && !is_single(primary) {
                plan.changes
                    .push(AttributeChange::add_all(primary.clone(), values.clone()));
            } else {
                plan.changes
                    .push(AttributeChange::add(primary.clone(), values[0].clone()));
            }
        } else if overflow.is_none() && !is_single(primary) {
            let current = entry.values(primary).unwrap_or_default();
            if current != values.as_slice() {
                plan.changes
                    .push(AttributeChange::replace_all(primary.clone(), values.clone()));
            }
        } else {
            if is_single(primary) && entry.values(primary).is_some_and(|v| v.len() != 1) {
                plan.errors
                    .push(format!("invalid value count for single-valued {primary}"));
            }
            if entry.value(primary) != Some(values[0].as_str()) {
                plan.changes
                    .push(AttributeChange::replace(primary.clone(), values[0].clone()));
            }
        }

        if let Some(overflow) = overflow {
            let rest = &values[1..];
            if !entry.has(overflow) {
                if !rest.is_empty() {
                    plan.changes
                        .push(AttributeChange::add_all(overflow.clone(), rest.to_vec()));
                }
            } else if entry.values(overflow).unwrap_or_default() != rest {
                if rest.is_empty() {
                    plan.changes.push(AttributeChange::delete(overflow.clone()));
                } else {
                    plan.changes
                        .push(AttributeChange::replace_all(overflow.clone(), rest.to_vec()));
                }
            }
        }
    }

    // Kinds with no registry rows at all: clear their directory attributes.
    for (kind, mapping) in mappings {
        if !mapping.sync_to_directory {
            continue;
        }
        if contacts_by_kind.contains_key(kind) {
            continue;
        }
        for attribute in &mapping.attributes {
            if entry.has(attribute) {
                plan.changes.push(AttributeChange::delete(attribute.clone()));
            }
        }
    }

    plan
}
