//! Port identifier grammar and the composite `panelId:portId` value type.
//!
//! Grammar:
//!   simple    = letter (letter | digit | '-' | '_')*      (at most 256 characters)
//!   composite = simple | simple ':' simple                (at most 512 characters)
//!
//! Labels are user-editable and find their way into generated identifiers, so every id that
//! later takes part in a lookup or a persisted reference must pass [`is_valid_port_id`] or
//! [`is_valid_composite_port_id`] first. [`sanitize_port_id`] exists for rendering fallbacks only.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_PORT_ID_LEN: usize = 256;
pub const MAX_COMPOSITE_PORT_ID_LEN: usize = 512;
pub const COMPOSITE_SEPARATOR: char = ':';
pub const INVALID_PORT_ID: &str = "invalid-port";
const SANITIZED_PREFIX: &str = "port-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortIdError {
    #[error("port id is empty")]
    Empty,
    #[error("port id exceeds {max} characters")]
    TooLong { max: usize },
    #[error("port id must start with a letter, found {found:?}")]
    BadLeadingChar { found: char },
    #[error("port id contains forbidden character {found:?}")]
    ForbiddenChar { found: char },
    #[error("composite port id is missing the ':' separator")]
    MissingSeparator,
    #[error("composite port id may contain only one ':' (found {count})")]
    TooManySeparators { count: usize },
}

fn is_body_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Check `id` against the simple-id grammar, reporting the first violation.
pub fn check_port_id(id: &str) -> Result<(), PortIdError> {
    let mut chars = id.chars();
    let first = chars.next().ok_or(PortIdError::Empty)?;
    if id.chars().count() > MAX_PORT_ID_LEN {
        return Err(PortIdError::TooLong {
            max: MAX_PORT_ID_LEN,
        });
    }
    if !first.is_ascii_alphabetic() {
        return Err(PortIdError::BadLeadingChar { found: first });
    }
    match chars.find(|c| !is_body_char(*c)) {
        Some(found) => Err(PortIdError::ForbiddenChar { found }),
        None => Ok(()),
    }
}

/// Check `id` against the composite grammar. Simple ids are accepted as well.
pub fn check_composite_port_id(id: &str) -> Result<(), PortIdError> {
    if id.chars().count() > MAX_COMPOSITE_PORT_ID_LEN {
        return Err(PortIdError::TooLong {
            max: MAX_COMPOSITE_PORT_ID_LEN,
        });
    }
    let count = id.matches(COMPOSITE_SEPARATOR).count();
    match count {
        0 => check_port_id(id),
        1 => {
            let (panel, port) = id
                .split_once(COMPOSITE_SEPARATOR)
                .ok_or(PortIdError::MissingSeparator)?;
            check_port_id(panel)?;
            check_port_id(port)
        }
        _ => Err(PortIdError::TooManySeparators { count }),
    }
}

pub fn is_valid_port_id(id: &str) -> bool {
    check_port_id(id).is_ok()
}

pub fn is_valid_composite_port_id(id: &str) -> bool {
    check_composite_port_id(id).is_ok()
}

/// Best-effort repair of `id` for display. Never feed the result back into a lookup.
pub fn sanitize_port_id(id: &str) -> String {
    let cleaned: String = id.chars().filter(|c| is_body_char(*c)).collect();
    if cleaned.is_empty() {
        return INVALID_PORT_ID.to_string();
    }
    let prefixed = match cleaned.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => cleaned,
        _ => format!("{SANITIZED_PREFIX}{cleaned}"),
    };
    prefixed.chars().take(MAX_PORT_ID_LEN).collect()
}

/// A parent-level port that projects one row of a panel child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositePortId {
    pub panel_id: String,
    pub port_id: String,
}

impl CompositePortId {
    /// Build from parts, validating both halves.
    pub fn new(
        panel_id: impl Into<String>,
        port_id: impl Into<String>,
    ) -> Result<Self, PortIdError> {
        let panel_id = panel_id.into();
        let port_id = port_id.into();
        check_port_id(&panel_id)?;
        check_port_id(&port_id)?;
        Ok(Self { panel_id, port_id })
    }

    /// Parse `panelId:portId`. Plain ids are rejected with [`PortIdError::MissingSeparator`].
    pub fn parse(s: &str) -> Result<Self, PortIdError> {
        check_composite_port_id(s)?;
        let (panel, port) = s
            .split_once(COMPOSITE_SEPARATOR)
            .ok_or(PortIdError::MissingSeparator)?;
        Ok(Self {
            panel_id: panel.to_string(),
            port_id: port.to_string(),
        })
    }
}

impl fmt::Display for CompositePortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.panel_id, COMPOSITE_SEPARATOR, self.port_id)
    }
}

impl FromStr for CompositePortId {
    type Err = PortIdError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompositePortId::parse(s)
    }
}

impl Serialize for CompositePortId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CompositePortId {
    fn deserialize<D>(deserializer: D) -> Result<CompositePortId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        CompositePortId::parse(&s).map_err(de::Error::custom)
    }
}
