//! Attribute mapping registry.
//!
//! Declarative per-field map between registry properties and directory
//! attributes, built once per session from the exclusion configuration and
//! introspection of which registry properties exist. Converters are fixed
//! tagged variants dispatched by the comparator, never arbitrary closures,
//! so a mapping table is printable, serializable and testable.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::SyncConfig;

/// Directory attribute carrying the domain-qualified username.
pub(crate) const PRINCIPAL_NAME_ATTRIBUTE: &str = "userPrincipalName";

/// Directory attribute carrying the stable binary identifier.
pub(crate) const GUID_ATTRIBUTE: &str = "objectGUID";

/// Directory attribute embedded in the DN; changing it is a rename.
pub(crate) const PRESENTATION_NAME_ATTRIBUTE: &str = "cn";

/// Directory attribute mirroring the presentation name.
pub(crate) const DISPLAY_NAME_ATTRIBUTE: &str = "displayName";

/// Converter applied in the directory-to-registry direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundConverter {
    /// Take the attribute text as-is.
    Text,
    /// Lowercased attribute text.
    Lowercase,
    /// Join the directory's given-name and surname attributes.
    RealnameFromParts,
    /// The domain part of the principal name.
    DomainFromUpn,
    /// Hex rendering of the binary identifier.
    GuidHex,
    /// Resolve a DN-valued attribute to a registry user link.
    UserFromDnAttr,
}

/// Rule applied in the registry-to-directory direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundRule {
    /// Never push this property.
    Never,
    /// Push the raw property text.
    Raw,
    /// Build the presentation name (first/last name, external suffix).
    DisplayName,
    /// Uppercased nickname.
    UpperInitials,
    /// Current photo, shrunk to the configured byte budget.
    PhotoFit,
    /// Department, truncated to the directory's length limit.
    TruncatedDepartment,
    /// DN of the directory entry behind a user-link property.
    UserDnFromLink,
}

impl OutboundRule {
    /// Whether this rule pushes anything at all.
    pub fn pushes(&self) -> bool {
        !matches!(self, OutboundRule::Never)
    }
}

/// Declarative mapping of one registry property to one directory attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Registry property name.
    pub property: String,
    /// Paired directory attribute name.
    pub attribute: String,
    /// Registry-to-directory rule.
    pub outbound: OutboundRule,
    /// Directory-to-registry converter; `None` disables inbound sync.
    pub inbound: Option<InboundConverter>,
    /// Whether empty inbound values may clear the registry property.
    pub empty_allowed: bool,
    /// Whether the source of truth is the linked source account rather than
    /// the matched user itself.
    pub from_linked: bool,
    /// Whether the property may only be set at creation time.
    pub creation_only: bool,
    /// Whether inbound writes also apply to the linked source account.
    pub write_linked: bool,
}

/// Mapping of one contact kind onto one or two directory attributes.
///
/// The first attribute is single-valued (or the primary); an optional second
/// is multi-valued and receives overflow values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactMapping {
    /// Contact kind name in the registry.
    pub kind: String,
    /// Directory attributes, primary first.
    pub attributes: Vec<String>,
    /// Whether this kind is pushed to the directory.
    pub sync_to_directory: bool,
    /// Whether directory writes are restricted to linked source accounts.
    pub linked_only: bool,
    /// Whether registry rows absent from the directory are preserved.
    ///
    /// Only honored while every mapped attribute is single-valued; a
    /// multi-valued attribute downgrades the flag for the rest of the run.
    pub keep_unmatched: bool,
}

/// The per-session mapping table.
#[derive(Debug, Clone, Default)]
pub struct MappingRegistry {
    /// User property mappings, in build order.
    pub entries: Vec<MappingEntry>,
    /// Contact kind mappings, keyed by kind name.
    pub contacts: BTreeMap<String, ContactMapping>,
}

impl MappingRegistry {
    /// Build the mapping table.
    ///
    /// A property mapping is appended only if the property exists in the
    /// registry schema and neither side is excluded by configuration. An
    /// outbound-enabled session forces several inbound mappings to
    /// creation-only so the directory stays authoritative for them.
    pub fn build(config: &SyncConfig, properties: &[String], contact_kinds: &[String]) -> Self {
        let props: BTreeSet<&str> = properties.iter().map(String::as_str).collect();
        let outbound = config.update_directory;

        let allow = |property: &str, attribute: Option<&str>| -> bool {
            if !props.contains(property) {
                return false;
            }
            if config.exclude_registry_properties.contains(property) {
                return false;
            }
            if let Some(attribute) = attribute {
                if config.exclude_directory_attributes.contains(attribute) {
                    return false;
                }
            }
            true
        };

        let mut entries = Vec::new();

        // The registry id doubles as the directory employee number.
        entries.push(MappingEntry {
            property: "id".to_string(),
            attribute: "employeeNumber".to_string(),
            outbound: OutboundRule::Raw,
            inbound: None,
            empty_allowed: false,
            from_linked: false,
            creation_only: true,
            write_linked: false,
        });

        if props.contains("first_name") {
            entries.push(MappingEntry {
                property: "first_name".to_string(),
                attribute: "givenName".to_string(),
                outbound: OutboundRule::Raw,
                inbound: Some(InboundConverter::Text),
                empty_allowed: false,
                from_linked: true,
                creation_only: outbound || !allow("first_name", Some("givenName")),
                write_linked: false,
            });
        }

        if outbound && allow("display_name", Some(PRESENTATION_NAME_ATTRIBUTE)) {
            // The presentation name is part of the DN; pushing it goes
            // through a rename, not an ordinary attribute update.
            entries.push(MappingEntry {
                property: "display_name".to_string(),
                attribute: PRESENTATION_NAME_ATTRIBUTE.to_string(),
                outbound: OutboundRule::DisplayName,
                inbound: None,
                empty_allowed: false,
                from_linked: true,
                creation_only: true,
                write_linked: false,
            });
        }

        if props.contains("last_name") {
            entries.push(MappingEntry {
                property: "last_name".to_string(),
                attribute: "sn".to_string(),
                outbound: OutboundRule::Raw,
                inbound: Some(InboundConverter::Text),
                empty_allowed: false,
                from_linked: true,
                creation_only: outbound || !allow("last_name", Some("sn")),
                write_linked: false,
            });
        }

        if allow("nickname", Some("initials")) {
            entries.push(MappingEntry {
                property: "nickname".to_string(),
                attribute: "initials".to_string(),
                outbound: OutboundRule::UpperInitials,
                inbound: Some(InboundConverter::Lowercase),
                empty_allowed: true,
                from_linked: false,
                creation_only: outbound,
                write_linked: false,
            });
        }

        if allow("domain", Some(PRINCIPAL_NAME_ATTRIBUTE)) {
            entries.push(MappingEntry {
                property: "domain".to_string(),
                attribute: PRINCIPAL_NAME_ATTRIBUTE.to_string(),
                outbound: OutboundRule::Never,
                inbound: Some(InboundConverter::DomainFromUpn),
                empty_allowed: false,
                from_linked: false,
                creation_only: false,
                write_linked: false,
            });
        }

        if props.contains("username") {
            entries.push(MappingEntry {
                property: "username".to_string(),
                attribute: PRINCIPAL_NAME_ATTRIBUTE.to_string(),
                outbound: OutboundRule::Never,
                inbound: Some(InboundConverter::Text),
                empty_allowed: false,
                from_linked: false,
                creation_only: !allow("username", Some(PRINCIPAL_NAME_ATTRIBUTE)),
                write_linked: false,
            });
        }

        if allow("photos", Some("thumbnailPhoto")) {
            entries.push(MappingEntry {
                property: "photos".to_string(),
                attribute: "thumbnailPhoto".to_string(),
                outbound: OutboundRule::PhotoFit,
                inbound: None,
                empty_allowed: false,
                from_linked: true,
                creation_only: true,
                write_linked: true,
            });
        }

        if allow("title", Some("title")) {
            entries.push(MappingEntry {
                property: "title".to_string(),
                attribute: "title".to_string(),
                outbound: OutboundRule::Raw,
                inbound: None,
                empty_allowed: false,
                from_linked: true,
                creation_only: true,
                write_linked: true,
            });
        }

        if allow("display_name", Some(PRESENTATION_NAME_ATTRIBUTE)) && !props.contains("first_name")
        {
            // Registries without split name fields take the whole realname
            // from the directory instead.
            entries.push(MappingEntry {
                property: "display_name".to_string(),
                attribute: PRESENTATION_NAME_ATTRIBUTE.to_string(),
                outbound: OutboundRule::Never,
                inbound: Some(InboundConverter::RealnameFromParts),
                empty_allowed: false,
                from_linked: false,
                creation_only: false,
                write_linked: false,
            });
        }

        if allow("room", Some("physicalDeliveryOfficeName")) {
            entries.push(MappingEntry {
                property: "room".to_string(),
                attribute: "physicalDeliveryOfficeName".to_string(),
                outbound: OutboundRule::Raw,
                inbound: Some(InboundConverter::Text),
                empty_allowed: true,
                from_linked: true,
                creation_only: outbound,
                write_linked: true,
            });
        }

        if allow("substitute", Some("secretary")) {
            entries.push(MappingEntry {
                property: "substitute".to_string(),
                attribute: "secretary".to_string(),
                outbound: OutboundRule::UserDnFromLink,
                inbound: Some(InboundConverter::UserFromDnAttr),
                empty_allowed: false,
                from_linked: true,
                creation_only: outbound,
                write_linked: true,
            });
        }

        if allow("supervisor", Some("manager")) {
            entries.push(MappingEntry {
                property: "supervisor".to_string(),
                attribute: "manager".to_string(),
                outbound: OutboundRule::UserDnFromLink,
                inbound: Some(InboundConverter::UserFromDnAttr),
                empty_allowed: false,
                from_linked: true,
                creation_only: outbound,
                write_linked: true,
            });
        }

        // The guid is the key to matching users across renames; excluding it
        // breaks rename detection, but the exclusion lists still apply.
        if allow("guid", Some(GUID_ATTRIBUTE)) {
            entries.push(MappingEntry {
                property: "guid".to_string(),
                attribute: GUID_ATTRIBUTE.to_string(),
                outbound: OutboundRule::Never,
                inbound: Some(InboundConverter::GuidHex),
                empty_allowed: false,
                from_linked: false,
                creation_only: true,
                write_linked: false,
            });
        }

        if allow("department", Some("department")) {
            entries.push(MappingEntry {
                property: "department".to_string(),
                attribute: "department".to_string(),
                outbound: OutboundRule::TruncatedDepartment,
                inbound: None,
                empty_allowed: false,
                from_linked: true,
                creation_only: true,
                write_linked: false,
            });
        }

        let mut contacts = BTreeMap::new();
        let kind_known = |kind: &str| contact_kinds.iter().any(|k| k == kind);

        let contact_table: &[(&str, &[&str], bool, bool, bool)] = &[
            // kind, attributes, sync_to_directory, linked_only, keep_unmatched
            //
            // The directory has a single mail attribute; additional registry
            // email rows are preserved rather than dropped.
            ("email", &["mail"], false, false, true),
            ("phone", &["telephoneNumber"], true, true, false),
            ("internal_phone", &["otherTelephone"], true, true, false),
            ("mobile", &["mobile", "otherMobile"], true, true, false),
            ("pager", &["pager", "otherPager"], true, true, false),
        ];
        for (kind, attributes, sync_to_directory, linked_only, keep_unmatched) in contact_table {
            if !kind_known(kind) {
                continue;
            }
            contacts.insert(
                (*kind).to_string(),
                ContactMapping {
                    kind: (*kind).to_string(),
                    attributes: attributes.iter().map(|a| (*a).to_string()).collect(),
                    sync_to_directory: *sync_to_directory,
                    linked_only: *linked_only,
                    keep_unmatched: *keep_unmatched,
                },
            );
        }

        Self { entries, contacts }
    }

    /// Entries in deterministic property order, for the outbound pass.
    pub fn sorted_entries(&self) -> Vec<MappingEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.property.cmp(&b.property).then(a.attribute.cmp(&b.attribute)));
        entries
    }

    /// All directory attributes referenced by contact mappings.
    pub fn contact_attributes(&self) -> Vec<String> {
        let mut attrs: Vec<String> = self
            .contacts
            .values()
            .flat_map(|m| m.attributes.iter().cloned())
            .collect();
        attrs.sort();
        attrs.dedup();
        attrs
    }
}
