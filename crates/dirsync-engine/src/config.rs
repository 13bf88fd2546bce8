//! Sync session configuration.
//!
//! A plain key/value surface read once at session construction. The
//! directory connection itself is configured on the connector side; this
//! struct only carries what the reconciliation core decides with.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{SyncError, SyncResult};

/// Configuration for one sync session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Registry property names excluded from mapping on the registry side.
    #[serde(default)]
    pub exclude_registry_properties: BTreeSet<String>,

    /// Directory attribute names excluded from mapping on the directory side.
    #[serde(default)]
    pub exclude_directory_attributes: BTreeSet<String>,

    /// Login domains accepted for synchronized usernames. Empty means any.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// Per-domain DN suffixes (lowercase) a linked source account must match
    /// for its writes to be accepted.
    #[serde(default)]
    pub allowed_dn_suffixes: HashMap<String, Vec<String>>,

    /// Enable writes to the registry (inbound direction).
    #[serde(default = "default_true")]
    pub update_registry: bool,

    /// Enable writes to the directory (outbound direction).
    #[serde(default = "default_true")]
    pub update_directory: bool,

    /// Byte budget for synchronized photos; `None` disables shrinking.
    #[serde(default = "default_photo_max_bytes")]
    pub photo_max_bytes: Option<usize>,

    /// JPEG quality used when re-encoding photos.
    #[serde(default = "default_photo_quality")]
    pub photo_quality: u8,

    /// Identities that synchronization must never touch.
    #[serde(default = "default_reserved_usernames")]
    pub reserved_usernames: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_photo_max_bytes() -> Option<usize> {
    Some(10_240)
}

fn default_photo_quality() -> u8 {
    80
}

fn default_reserved_usernames() -> Vec<String> {
    vec!["admin".to_string(), "anonymous".to_string()]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            exclude_registry_properties: BTreeSet::new(),
            exclude_directory_attributes: BTreeSet::new(),
            allowed_domains: Vec::new(),
            allowed_dn_suffixes: HashMap::new(),
            update_registry: true,
            update_directory: true,
            photo_max_bytes: default_photo_max_bytes(),
            photo_quality: default_photo_quality(),
            reserved_usernames: default_reserved_usernames(),
        }
    }
}

impl SyncConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.photo_quality == 0 || self.photo_quality > 100 {
            return Err(SyncError::configuration(format!(
                "photo quality must be between 1 and 100, got {}",
                self.photo_quality
            )));
        }
        Ok(())
    }

    /// Whether a username belongs to an identity that must never be touched.
    pub fn is_reserved(&self, username: &str) -> bool {
        self.reserved_usernames
            .iter()
            .any(|r| r.eq_ignore_ascii_case(username))
    }

    /// Validate a username against the allowed login domains.
    ///
    /// Returns `Ok(true)` when the name carries an accepted domain,
    /// `Ok(false)` when it carries none and `allow_missing` permits that,
    /// and an error otherwise.
    pub fn check_domain(&self, username: &str, allow_missing: bool) -> SyncResult<bool> {
        if self.allowed_domains.is_empty() {
            return Ok(true);
        }
        match username.split_once('@') {
            None if allow_missing => Ok(false),
            None => Err(SyncError::InvalidUsername {
                username: username.to_string(),
                reason: "username has no domain".to_string(),
            }),
            Some((_, domain)) => {
                if self
                    .allowed_domains
                    .iter()
                    .any(|d| d.eq_ignore_ascii_case(domain))
                {
                    Ok(true)
                } else {
                    Err(SyncError::InvalidUsername {
                        username: username.to_string(),
                        reason: format!("domain '{domain}' is not allowed"),
                    })
                }
            }
        }
    }

    /// Strict variant of [`check_domain`](Self::check_domain) for sweep
    /// enumeration: a name passes only with an accepted domain.
    pub fn domain_allowed(&self, username: &str) -> bool {
        if self.allowed_domains.is_empty() {
            return true;
        }
        match username.split_once('@') {
            Some((_, domain)) => self
                .allowed_domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(domain)),
            None => false,
        }
    }

    /// Whether a linked account in `domain` may own the entry at `dn`.
    pub fn dn_suffix_allowed(&self, domain: &str, dn: &str) -> bool {
        let dn = dn.to_lowercase();
        self.allowed_dn_suffixes
            .get(&domain.to_lowercase())
            .is_some_and(|suffixes| suffixes.iter().any(|s| dn.ends_with(s.as_str())))
    }
}
