//! Registry user record and patch model.
//!
//! `RegistryUser` is a typed record, but the mapping layer addresses its
//! synchronizable fields by property name, so the record also offers a
//! name-keyed read (`property`) and the store applies name-keyed patches
//! (`UserPatch`). The set of addressable names is [`RegistryUser::PROPERTIES`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{StatusId, UserId};

/// A single property value in patches and name-keyed reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Text property.
    Text(String),
    /// Link to another user record.
    Link(UserId),
    /// Property present but unset; in a patch, clears the property.
    Empty,
}

impl PropertyValue {
    /// Build a text value, mapping `None` and empty strings to `Empty`.
    pub fn from_text(value: Option<String>) -> Self {
        match value {
            Some(s) if !s.is_empty() => PropertyValue::Text(s),
            _ => PropertyValue::Empty,
        }
    }

    /// Text view of the value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Link view of the value.
    pub fn as_link(&self) -> Option<UserId> {
        match self {
            PropertyValue::Link(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether the value carries nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, PropertyValue::Empty)
    }
}

/// A user record in the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryUser {
    pub id: UserId,
    /// Unique login name; domain-qualified for directory-managed accounts.
    pub username: String,
    pub status: StatusId,
    pub roles: Vec<String>,
    /// Hex-rendered directory GUID, set at creation and stable afterwards.
    pub guid: Option<String>,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Presentation name; mirrors the directory's DN-embedded name.
    pub display_name: Option<String>,
    pub nickname: Option<String>,
    /// Login domain of the account.
    pub domain: Option<String>,
    pub title: Option<String>,
    pub department: Option<String>,
    pub room: Option<String>,
    pub supervisor: Option<UserId>,
    pub substitute: Option<UserId>,

    /// Set when the user works under an external contract; the directory
    /// presentation name is suffixed accordingly.
    pub external_contract: bool,

    /// Forward link: the account this (satellite) account belongs to.
    pub primary_account: Option<UserId>,
    /// Backlinks: accounts declaring this record as their primary.
    pub linked_account_ids: Vec<UserId>,
    /// Explicit owner override; must be self or one of the backlinks.
    pub owner_override: Option<UserId>,
}

impl RegistryUser {
    /// Property names addressable through [`RegistryUser::property`] and
    /// [`UserPatch`]. `photos` is listed for mapping introspection although
    /// photo content flows through the store's photo interface.
    pub const PROPERTIES: &'static [&'static str] = &[
        "id",
        "username",
        "first_name",
        "last_name",
        "display_name",
        "nickname",
        "domain",
        "title",
        "department",
        "room",
        "supervisor",
        "substitute",
        "guid",
        "photos",
    ];

    /// Read a property by name.
    ///
    /// Returns `None` for names outside [`RegistryUser::PROPERTIES`];
    /// known-but-unset properties read as [`PropertyValue::Empty`].
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        let text = |v: &Option<String>| PropertyValue::from_text(v.clone());
        let link = |v: &Option<UserId>| match v {
            Some(id) => PropertyValue::Link(*id),
            None => PropertyValue::Empty,
        };
        match name {
            "id" => Some(PropertyValue::Text(self.id.0.to_string())),
            "username" => Some(PropertyValue::Text(self.username.clone())),
            "first_name" => Some(text(&self.first_name)),
            "last_name" => Some(text(&self.last_name)),
            "display_name" => Some(text(&self.display_name)),
            "nickname" => Some(text(&self.nickname)),
            "domain" => Some(text(&self.domain)),
            "title" => Some(text(&self.title)),
            "department" => Some(text(&self.department)),
            "room" => Some(text(&self.room)),
            "supervisor" => Some(link(&self.supervisor)),
            "substitute" => Some(link(&self.substitute)),
            "guid" => Some(text(&self.guid)),
            "photos" => Some(PropertyValue::Empty),
            _ => None,
        }
    }

    /// The user's real name: first and last name joined, falling back to
    /// whichever part exists, then to the stored presentation name.
    pub fn realname(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => self.display_name.clone(),
        }
    }
}

/// A name-keyed set of property changes plus lifecycle fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPatch {
    properties: BTreeMap<String, PropertyValue>,
    pub status: Option<StatusId>,
    pub roles: Option<Vec<String>>,
}

impl UserPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property change.
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    /// Set a property change using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.set(name, value);
        self
    }

    /// Get a pending property change.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Remove a pending property change.
    pub fn unset(&mut self, name: &str) {
        self.properties.remove(name);
    }

    /// Iterate pending property changes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.properties.iter()
    }

    /// Names of all pending property changes.
    pub fn property_names(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    /// Number of pending property changes.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the patch changes anything at all.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.status.is_none() && self.roles.is_none()
    }

    /// Fold another patch into this one; the other patch wins on conflicts.
    pub fn merge(&mut self, other: UserPatch) {
        self.properties.extend(other.properties);
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.roles.is_some() {
            self.roles = other.roles;
        }
    }
}
