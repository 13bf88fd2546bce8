//! Directory write operations.
//!
//! The engine computes per-entry modification lists (`add`/`replace`/`delete`
//! per attribute) and, for the DN-embedded presentation name, a separate
//! rename request. Values may be text or binary (photos); binary values are
//! redacted from Debug output so a modification list is always loggable.

use std::fmt;

/// Modification kind for one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    /// Add values to an attribute that is absent on the entry.
    Add,
    /// Replace all values of an attribute.
    Replace,
    /// Remove the attribute (all values).
    Delete,
}

impl fmt::Display for ModifyOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModifyOp::Add => write!(f, "add"),
            ModifyOp::Replace => write!(f, "replace"),
            ModifyOp::Delete => write!(f, "delete"),
        }
    }
}

/// A value carried by a modification.
#[derive(Clone, PartialEq, Eq)]
pub enum WriteValue {
    /// UTF-8 text value.
    Text(String),
    /// Opaque bytes (photo payloads).
    Binary(Vec<u8>),
}

impl WriteValue {
    /// The wire bytes of this value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WriteValue::Text(s) => s.as_bytes(),
            WriteValue::Binary(b) => b.as_slice(),
        }
    }

    /// Text view, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WriteValue::Text(s) => Some(s),
            WriteValue::Binary(_) => None,
        }
    }
}

impl fmt::Debug for WriteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteValue::Text(s) => write!(f, "{s:?}"),
            WriteValue::Binary(b) => write!(f, "<binary {} bytes>", b.len()),
        }
    }
}

impl From<String> for WriteValue {
    fn from(s: String) -> Self {
        WriteValue::Text(s)
    }
}

impl From<&str> for WriteValue {
    fn from(s: &str) -> Self {
        WriteValue::Text(s.to_string())
    }
}

impl From<Vec<u8>> for WriteValue {
    fn from(b: Vec<u8>) -> Self {
        WriteValue::Binary(b)
    }
}

/// One attribute modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub op: ModifyOp,
    pub attribute: String,
    pub values: Vec<WriteValue>,
}

impl AttributeChange {
    /// Add a single value.
    pub fn add(attribute: impl Into<String>, value: impl Into<WriteValue>) -> Self {
        Self {
            op: ModifyOp::Add,
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }

    /// Add several values at once.
    pub fn add_all<I, V>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<WriteValue>,
    {
        Self {
            op: ModifyOp::Add,
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Replace with a single value.
    pub fn replace(attribute: impl Into<String>, value: impl Into<WriteValue>) -> Self {
        Self {
            op: ModifyOp::Replace,
            attribute: attribute.into(),
            values: vec![value.into()],
        }
    }

    /// Replace with several values at once.
    pub fn replace_all<I, V>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<WriteValue>,
    {
        Self {
            op: ModifyOp::Replace,
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Remove the attribute entirely.
    pub fn delete(attribute: impl Into<String>) -> Self {
        Self {
            op: ModifyOp::Delete,
            attribute: attribute.into(),
            values: Vec::new(),
        }
    }
}

/// Request to change the relative distinguished name of an entry.
///
/// Issued against the old DN; on success the caller rewrites its in-memory
/// DN so subsequent operations in the same run use the new path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameRequest {
    /// DN of the entry as currently known.
    pub dn: String,
    /// New relative DN, e.g. `cn=New Name`.
    pub new_rdn: String,
}

impl RenameRequest {
    pub fn new(dn: impl Into<String>, new_rdn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            new_rdn: new_rdn.into(),
        }
    }
}
