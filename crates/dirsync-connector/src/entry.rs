//! Directory entry read view.
//!
//! Wraps one directory search result behind an explicit interface: `value`
//! returns an optional text value, `raw` an optional byte value, `has` a
//! presence check. Attribute names are matched case-insensitively, as the
//! directory schema treats them.

use std::collections::HashMap;

use crate::error::{DirectoryError, DirectoryResult};

/// One directory entry: a distinguished name plus its attributes.
///
/// Text and binary attributes are kept separately, mirroring how the wire
/// protocol delivers them. A missing attribute returns `None`, which is
/// distinguishable from a present attribute with an empty value.
#[derive(Debug, Clone, Default)]
pub struct DirectoryEntry {
    dn: String,
    /// Text attributes, keyed by lowercased attribute name.
    attrs: HashMap<String, Vec<String>>,
    /// Binary attributes, keyed by lowercased attribute name.
    bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    /// Create an empty entry with the given DN.
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        }
    }

    /// Get the distinguished name.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Set a text attribute, replacing any previous values.
    pub fn set_text<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs.insert(
            name.to_lowercase(),
            values.into_iter().map(Into::into).collect(),
        );
    }

    /// Set a text attribute using builder pattern.
    pub fn with_text<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_text(name, values);
        self
    }

    /// Set a binary attribute, replacing any previous values.
    pub fn set_binary(&mut self, name: &str, values: Vec<Vec<u8>>) {
        self.bin_attrs.insert(name.to_lowercase(), values);
    }

    /// Set a binary attribute using builder pattern.
    pub fn with_binary(mut self, name: &str, values: Vec<Vec<u8>>) -> Self {
        self.set_binary(name, values);
        self
    }

    /// Remove an attribute entirely.
    pub fn remove(&mut self, name: &str) {
        let key = name.to_lowercase();
        self.attrs.remove(&key);
        self.bin_attrs.remove(&key);
    }

    /// Check whether the entry carries the attribute at all.
    pub fn has(&self, name: &str) -> bool {
        let key = name.to_lowercase();
        self.attrs.contains_key(&key) || self.bin_attrs.contains_key(&key)
    }

    /// Get the first text value of an attribute.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(&name.to_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Get all text values of an attribute, in server order.
    pub fn values(&self, name: &str) -> Option<&[String]> {
        self.attrs.get(&name.to_lowercase()).map(Vec::as_slice)
    }

    /// Get the first text value, failing with a distinguishable not-found
    /// condition when the attribute is absent.
    pub fn require(&self, name: &str) -> DirectoryResult<&str> {
        self.value(name).ok_or_else(|| DirectoryError::AttributeMissing {
            attribute: name.to_string(),
        })
    }

    /// Get the first raw byte value of an attribute.
    ///
    /// Falls back to the text representation for attributes the server
    /// delivered as text only.
    pub fn raw(&self, name: &str) -> Option<&[u8]> {
        let key = name.to_lowercase();
        if let Some(v) = self.bin_attrs.get(&key).and_then(|v| v.first()) {
            return Some(v.as_slice());
        }
        self.attrs
            .get(&key)
            .and_then(|v| v.first())
            .map(|s| s.as_bytes())
    }

    /// Render a binary identifier attribute as lowercase hex.
    pub fn guid_hex(&self, name: &str) -> Option<String> {
        self.raw(name).map(hex::encode)
    }

    /// The organizational-unit components of the DN, in path order.
    pub fn organizational_units(&self) -> Vec<String> {
        parse_dn(&self.dn)
            .into_iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("ou"))
            .map(|(_, v)| v.to_lowercase())
            .collect()
    }

    /// Replace the relative distinguished name (the first DN component),
    /// keeping the remainder of the path. Used after a successful rename so
    /// later operations in the same run target the new DN.
    pub fn replace_rdn(&mut self, new_rdn: &str) -> DirectoryResult<()> {
        match self.dn.split_once(',') {
            Some((_, rest)) => {
                self.dn = format!("{new_rdn},{rest}");
                Ok(())
            }
            None => Err(DirectoryError::InvalidDn {
                dn: self.dn.clone(),
                message: "single-component DN cannot be renamed in place".into(),
            }),
        }
    }
}

/// Split a DN into (attribute, value) components.
///
/// Handles the common unescaped form; escaped separators inside values are
/// not interpreted (the engine only inspects `ou` components and RDN keys).
pub fn parse_dn(dn: &str) -> Vec<(String, String)> {
    dn.split(',')
        .filter_map(|part| {
            let (k, v) = part.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}
