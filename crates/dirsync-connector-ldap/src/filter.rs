//! LDAP search filter construction.
//!
//! Filter values are escaped per RFC 4515; binary identifiers (GUIDs) are
//! rendered as backslash-hex byte sequences so they can be matched inside a
//! text filter.

/// Escape special characters in an LDAP filter value (RFC 4515).
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\5c"),
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\0' => out.push_str("\\00"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape a binary value for use in a filter, one `\xx` pair per byte.
pub fn escape_binary(value: &[u8]) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value {
        out.push('\\');
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Build an equality assertion with an escaped text value.
pub fn eq(attribute: &str, value: &str) -> String {
    format!("({}={})", attribute, escape_value(value))
}

/// Combine assertions with logical AND.
pub fn and(parts: &[String]) -> String {
    format!("(&{})", parts.concat())
}
