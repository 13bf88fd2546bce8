//! Record comparator.
//!
//! Computes, for one (registry user, directory entry) pair, the attribute
//! changes needed in each direction. Inbound changes are routed into a
//! create-time patch and a live-update patch; outbound changes become a
//! modification list plus, for the DN-embedded presentation name, a queued
//! rename. Converters are dispatched by mapping-entry variant; when both a
//! value converter and a raw push could apply, the converter wins by
//! construction (an entry carries exactly one rule).

use tracing::{debug, error, info, warn};

use dirsync_connector::{AttributeChange, DirectoryEntry, RenameRequest, WriteValue};
use dirsync_registry::{PropertyValue, RegistryUser, UserId, UserPatch};

use crate::error::SyncResult;
use crate::mapping::{
    DISPLAY_NAME_ATTRIBUTE, InboundConverter, MappingEntry, OutboundRule,
    PRESENTATION_NAME_ATTRIBUTE, PRINCIPAL_NAME_ATTRIBUTE,
};
use crate::photo::fit_photo;
use crate::session::SyncSession;

/// Directory-imposed length limit for the department attribute.
const MAX_DEPARTMENT_LENGTH: usize = 64;

/// Outbound changes for one user.
#[derive(Debug, Default)]
pub(crate) struct OutboundPlan {
    /// Attribute modifications, including the presentation-name mirror.
    pub changes: Vec<AttributeChange>,
    /// Rename queued for the DN-embedded presentation name.
    pub rename: Option<RenameRequest>,
}

impl OutboundPlan {
    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.rename.is_none()
    }
}

/// The presentation name pushed to the directory: real name with a marker
/// suffix for externally-contracted accounts.
pub(crate) fn display_name_for(user: &RegistryUser) -> Option<String> {
    let mut name = user.realname()?;
    if user.external_contract {
        name.push_str(" (External)");
    }
    Some(name)
}

/// Truncate a department value to the directory's limit.
///
/// Returns the value and whether truncation happened.
pub(crate) fn truncated_department(value: &str) -> (String, bool) {
    if value.chars().count() <= MAX_DEPARTMENT_LENGTH {
        return (value.to_string(), false);
    }
    (value.chars().take(MAX_DEPARTMENT_LENGTH).collect(), true)
}

impl SyncSession {
    /// Apply an inbound converter to the directory entry.
    async fn inbound_value(
        &mut self,
        converter: InboundConverter,
        cfg: &MappingEntry,
        entry: &DirectoryEntry,
    ) -> SyncResult<Option<PropertyValue>> {
        let text = |value: Option<&str>| value.map(|v| PropertyValue::Text(v.to_string()));
        Ok(match converter {
            InboundConverter::Text => text(entry.value(&cfg.attribute)),
            InboundConverter::Lowercase => entry
                .value(&cfg.attribute)
                .map(|v| PropertyValue::Text(v.to_lowercase())),
            InboundConverter::RealnameFromParts => {
                let first = entry.value("givenName").unwrap_or_default();
                let last = entry.value("sn").unwrap_or_default();
                let joined = match (first.is_empty(), last.is_empty()) {
                    (false, false) => format!("{first} {last}"),
                    (false, true) => first.to_string(),
                    _ => last.to_string(),
                };
                text(Some(&joined).filter(|v| !v.is_empty()).map(|v| v.as_str()))
            }
            InboundConverter::DomainFromUpn => text(
                entry
                    .value(&cfg.attribute)
                    .and_then(|v| v.split_once('@'))
                    .map(|(_, domain)| domain),
            ),
            InboundConverter::GuidHex => entry.guid_hex(&cfg.attribute).map(PropertyValue::Text),
            InboundConverter::UserFromDnAttr => {
                self.user_from_dn_attribute(entry, &cfg.attribute).await?
            }
        })
    }

    /// Resolve a DN-valued attribute (manager, secretary) to a registry link.
    async fn user_from_dn_attribute(
        &mut self,
        entry: &DirectoryEntry,
        attribute: &str,
    ) -> SyncResult<Option<PropertyValue>> {
        let Some(dn) = entry.value(attribute) else {
            return Ok(None);
        };
        let Some(target) = self.directory.entry_by_dn(dn).await? else {
            info!(dn = %dn, "DN-valued attribute points at a missing entry");
            return Ok(None);
        };
        // Legacy entries may still be stored without a domain, so both the
        // principal name and the short account name are tried.
        for key in [PRINCIPAL_NAME_ATTRIBUTE, "uid"] {
            let Some(username) = target.value(key) else {
                continue;
            };
            match self.registry.lookup_username(username).await {
                Ok(id) => return Ok(Some(PropertyValue::Link(id))),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Compute the inbound patches for one pair.
    ///
    /// Returns `(create_time, live_update)` patches. Creation-only fields go
    /// into the create-time patch unless the field writes to the linked
    /// account and the matched user is not itself the resolved source.
    pub(crate) async fn compute_inbound_patch(
        &mut self,
        user: Option<&RegistryUser>,
        source_id: Option<UserId>,
        entry: &DirectoryEntry,
    ) -> SyncResult<(UserPatch, UserPatch)> {
        let mut create = UserPatch::new();
        let mut live = UserPatch::new();

        let entries: Vec<MappingEntry> = self
            .mapping
            .entries
            .iter()
            .filter(|e| e.inbound.is_some())
            .cloned()
            .collect();

        for cfg in entries {
            let Some(converter) = cfg.inbound else {
                continue;
            };
            let computed = self.inbound_value(converter, &cfg, entry).await?;
            let value = match computed {
                Some(PropertyValue::Text(s)) if s.is_empty() => None,
                Some(other) => Some(other),
                None => None,
            };
            let value = match value {
                Some(v) => v,
                None if cfg.empty_allowed => PropertyValue::Empty,
                None => continue,
            };

            let user_is_source = match (user, source_id) {
                (Some(u), Some(source)) => u.id == source,
                _ => false,
            };
            let create_time =
                cfg.creation_only && (!cfg.write_linked || user.is_none() || user_is_source);
            if create_time {
                create.set(cfg.property.clone(), value);
            } else {
                live.set(cfg.property.clone(), value);
            }
        }

        Ok((create, live))
    }

    /// Resolve the outbound value for one mapping entry.
    async fn outbound_value(
        &mut self,
        cfg: &MappingEntry,
        user: &RegistryUser,
    ) -> SyncResult<Option<WriteValue>> {
        let text_property = |name: &str| {
            user.property(name)
                .and_then(|v| v.as_text().map(str::to_string))
        };
        Ok(match cfg.outbound {
            OutboundRule::Never => None,
            OutboundRule::Raw => text_property(&cfg.property).map(WriteValue::Text),
            OutboundRule::DisplayName => {
                let name = display_name_for(user);
                if name.is_none() {
                    self.record_warning();
                    warn!(user = %user.username, "User has no usable presentation name");
                }
                name.map(WriteValue::Text)
            }
            OutboundRule::UpperInitials => user
                .nickname
                .as_ref()
                .filter(|n| !n.is_empty())
                .map(|n| WriteValue::Text(n.to_uppercase())),
            OutboundRule::TruncatedDepartment => match user.department.as_deref() {
                Some(value) if !value.is_empty() => {
                    let (truncated, was_truncated) = truncated_department(value);
                    if was_truncated {
                        self.record_warning();
                        warn!(
                            user = %user.username,
                            limit = MAX_DEPARTMENT_LENGTH,
                            "Cutting department value to fit the directory"
                        );
                    }
                    Some(WriteValue::Text(truncated))
                }
                _ => None,
            },
            OutboundRule::PhotoFit => {
                let photos = self.registry.photos(user.id).await?;
                match photos.first() {
                    Some(photo) => Some(WriteValue::Binary(fit_photo(
                        &photo.content,
                        self.config.photo_max_bytes,
                        self.config.photo_quality,
                    )?)),
                    None => None,
                }
            }
            OutboundRule::UserDnFromLink => {
                let Some(linked) = user.property(&cfg.property).and_then(|v| v.as_link()) else {
                    return Ok(None);
                };
                let mut target = self.registry.user(linked).await?;
                if let Some(primary) = target.primary_account {
                    target = self.registry.user(primary).await?;
                }
                self.directory
                    .find_user(&target.username)
                    .await?
                    .map(|e| WriteValue::Text(e.dn().to_string()))
            }
        })
    }

    /// Compute the outbound plan for one pair.
    ///
    /// `user` is the directory-matched account, `source` the resolved
    /// authoritative account for linked indirection.
    pub(crate) async fn compute_outbound_plan(
        &mut self,
        user: &RegistryUser,
        source: &RegistryUser,
        entry: &DirectoryEntry,
    ) -> SyncResult<OutboundPlan> {
        let mut plan = OutboundPlan::default();

        for cfg in self.mapping.sorted_entries() {
            let subject = if cfg.from_linked { source } else { user };

            if !cfg.outbound.pushes() {
                // Not pushed; still worth a diff note while debugging.
                if let (Some(local), Some(remote)) = (
                    subject.property(&cfg.property).and_then(|v| match v {
                        PropertyValue::Text(s) => Some(s),
                        _ => None,
                    }),
                    entry.value(&cfg.attribute),
                ) {
                    if local != remote {
                        debug!(
                            user = %user.username,
                            property = %cfg.property,
                            attribute = %cfg.attribute,
                            "Attribute differs but is not pushed"
                        );
                    }
                }
                continue;
            }

            let value = self.outbound_value(&cfg, subject).await?;

            if !entry.has(&cfg.attribute) {
                if let Some(value) = value {
                    info!(
                        user = %user.username,
                        attribute = %cfg.attribute,
                        "Queueing attribute insertion"
                    );
                    plan.changes.push(AttributeChange::add(cfg.attribute.clone(), value));
                }
                continue;
            }

            if entry.values(&cfg.attribute).is_some_and(|v| v.len() != 1) {
                self.record_error();
                error!(
                    user = %user.username,
                    attribute = %cfg.attribute,
                    "Unexpected value count on single-valued attribute"
                );
                continue;
            }

            match value {
                Some(value) => {
                    let differs = match &value {
                        WriteValue::Text(s) => entry.value(&cfg.attribute) != Some(s.as_str()),
                        WriteValue::Binary(b) => entry.raw(&cfg.attribute) != Some(b.as_slice()),
                    };
                    if !differs {
                        continue;
                    }
                    if cfg
                        .attribute
                        .eq_ignore_ascii_case(PRESENTATION_NAME_ATTRIBUTE)
                    {
                        // The presentation name lives in the DN: mirror it
                        // into the display attribute and queue a rename.
                        let Some(name) = value.as_text().map(str::to_string) else {
                            continue;
                        };
                        info!(
                            user = %user.username,
                            from = %entry.value(&cfg.attribute).unwrap_or_default(),
                            to = %name,
                            "Queueing presentation name change and rename"
                        );
                        plan.changes.push(AttributeChange::replace(
                            DISPLAY_NAME_ATTRIBUTE,
                            name.clone(),
                        ));
                        plan.rename = Some(RenameRequest::new(
                            entry.dn(),
                            format!("CN={name}"),
                        ));
                    } else {
                        info!(
                            user = %user.username,
                            property = %cfg.property,
                            attribute = %cfg.attribute,
                            "Queueing attribute update"
                        );
                        plan.changes
                            .push(AttributeChange::replace(cfg.attribute.clone(), value));
                    }
                }
                None => {
                    info!(
                        user = %user.username,
                        attribute = %cfg.attribute,
                        "Queueing attribute deletion"
                    );
                    plan.changes.push(AttributeChange::delete(cfg.attribute.clone()));
                }
            }
        }

        Ok(plan)
    }
}
