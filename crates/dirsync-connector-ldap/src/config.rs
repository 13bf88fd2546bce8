//! LDAP connector configuration
//!
//! Connection and naming configuration for the directory side of a sync
//! session. All knobs are plain key/value settings read once at session
//! construction.

use serde::{Deserialize, Serialize};

use dirsync_connector::error::{DirectoryError, DirectoryResult};

/// Configuration for the LDAP directory connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Directory URI, e.g. `ldap://dc01.example.com` or `ldaps://...`.
    pub uri: String,

    /// Bind DN for the service account.
    pub bind_dn: String,

    /// Bind password for the service account.
    pub bind_password: String,

    /// Base DN for all searches (e.g. `dc=example,dc=com`).
    pub base_dn: String,

    /// Object class identifying person entries.
    #[serde(default = "default_object_class")]
    pub object_class: String,

    /// Object class identifying group entries.
    #[serde(default = "default_group_object_class")]
    pub group_object_class: String,

    /// Attribute carrying the domain-qualified username.
    #[serde(default = "default_username_attribute")]
    pub username_attribute: String,

    /// Attribute carrying the legacy short username (no domain).
    #[serde(default = "default_account_name_attribute")]
    pub account_name_attribute: String,

    /// Attribute used to locate groups by name.
    #[serde(default = "default_group_name_attribute")]
    pub group_name_attribute: String,

    /// Attribute carrying the stable binary identifier of an entry.
    #[serde(default = "default_guid_attribute")]
    pub guid_attribute: String,

    /// Page size for paged searches.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Disable the StartTLS upgrade on plain connections.
    ///
    /// The default is to negotiate StartTLS whenever the URI is not already
    /// `ldaps`.
    #[serde(default)]
    pub no_starttls: bool,

    /// Connection timeout in seconds.
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
}

impl std::fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapConfig")
            .field("uri", &self.uri)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &"***REDACTED***")
            .field("base_dn", &self.base_dn)
            .field("object_class", &self.object_class)
            .field("group_object_class", &self.group_object_class)
            .field("username_attribute", &self.username_attribute)
            .field("account_name_attribute", &self.account_name_attribute)
            .field("group_name_attribute", &self.group_name_attribute)
            .field("guid_attribute", &self.guid_attribute)
            .field("page_size", &self.page_size)
            .field("no_starttls", &self.no_starttls)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .finish()
    }
}

fn default_object_class() -> String {
    "person".to_string()
}

fn default_group_object_class() -> String {
    "group".to_string()
}

fn default_username_attribute() -> String {
    "userPrincipalName".to_string()
}

fn default_account_name_attribute() -> String {
    "uid".to_string()
}

fn default_group_name_attribute() -> String {
    "sAMAccountName".to_string()
}

fn default_guid_attribute() -> String {
    "objectGUID".to_string()
}

fn default_page_size() -> u32 {
    50
}

fn default_connection_timeout_secs() -> u64 {
    30
}

impl LdapConfig {
    /// Create a new configuration with required fields and default naming.
    pub fn new(
        uri: impl Into<String>,
        bind_dn: impl Into<String>,
        bind_password: impl Into<String>,
        base_dn: impl Into<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            bind_dn: bind_dn.into(),
            bind_password: bind_password.into(),
            base_dn: base_dn.into(),
            object_class: default_object_class(),
            group_object_class: default_group_object_class(),
            username_attribute: default_username_attribute(),
            account_name_attribute: default_account_name_attribute(),
            group_name_attribute: default_group_name_attribute(),
            guid_attribute: default_guid_attribute(),
            page_size: default_page_size(),
            no_starttls: false,
            connection_timeout_secs: default_connection_timeout_secs(),
        }
    }

    /// Whether the URI selects an implicitly encrypted connection.
    pub fn uses_ldaps(&self) -> bool {
        self.uri.starts_with("ldaps://")
    }

    /// Whether the connection should negotiate StartTLS after connecting.
    pub fn wants_starttls(&self) -> bool {
        !self.uses_ldaps() && !self.no_starttls
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DirectoryResult<()> {
        if !self.uri.starts_with("ldap://") && !self.uri.starts_with("ldaps://") {
            return Err(DirectoryError::InvalidConfiguration {
                message: format!("directory URI must be ldap:// or ldaps://, got '{}'", self.uri),
            });
        }
        if self.bind_dn.is_empty() {
            return Err(DirectoryError::InvalidConfiguration {
                message: "bind DN must not be empty".to_string(),
            });
        }
        if self.base_dn.is_empty() {
            return Err(DirectoryError::InvalidConfiguration {
                message: "base DN must not be empty".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(DirectoryError::InvalidConfiguration {
                message: "page size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
