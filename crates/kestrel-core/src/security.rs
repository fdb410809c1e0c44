use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A permission token for one class of privileged action, e.g. `db:write`.
///
/// Stored as colon-separated segments so that wildcard grants compare
/// whole segments instead of raw string prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability {
    segments: Vec<String>,
}

impl Capability {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Leading segment, e.g. `db` for `db:delete`.
    pub fn namespace(&self) -> &str {
        &self.segments[0]
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(":"))
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let segments = parse_segments(s)?;
        if segments.iter().any(|seg| seg == "*") {
            return Err(format!("capability cannot contain a wildcard: {}", s));
        }
        Ok(Self { segments })
    }
}

impl TryFrom<String> for Capability {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.to_string()
    }
}

/// Role-side form of a capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Grant {
    /// `*`: authorizes every capability.
    Everything,
    /// `ns:*`: authorizes every capability whose leading segments equal the prefix.
    Prefix(Vec<String>),
    /// Exact capability match.
    Exact(Capability),
}

impl Grant {
    pub fn covers(&self, capability: &Capability) -> bool {
        match self {
            Self::Everything => true,
            Self::Prefix(prefix) => {
                capability.segments.len() > prefix.len()
                    && capability.segments[..prefix.len()] == prefix[..]
            }
            Self::Exact(exact) => exact == capability,
        }
    }
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everything => write!(f, "*"),
            Self::Prefix(prefix) => write!(f, "{}:*", prefix.join(":")),
            Self::Exact(cap) => write!(f, "{}", cap),
        }
    }
}

impl std::str::FromStr for Grant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.trim() == "*" {
            return Ok(Self::Everything);
        }
        let mut segments = parse_segments(s)?;
        match segments.iter().position(|seg| seg == "*") {
            None => Ok(Self::Exact(Capability { segments })),
            Some(idx) if idx == segments.len() - 1 => {
                segments.pop();
                Ok(Self::Prefix(segments))
            }
            Some(_) => Err(format!("wildcard must be the last segment: {}", s)),
        }
    }
}

impl TryFrom<String> for Grant {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Grant> for String {
    fn from(value: Grant) -> Self {
        value.to_string()
    }
}

fn parse_segments(s: &str) -> std::result::Result<Vec<String>, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("empty capability".to_string());
    }
    let segments: Vec<String> = trimmed.split(':').map(|seg| seg.trim().to_string()).collect();
    if segments.iter().any(|seg| seg.is_empty()) {
        return Err(format!("empty capability segment: {}", s));
    }
    Ok(segments)
}

/// Role name → ordered grants. An absent role holds nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMap {
    roles: HashMap<String, Vec<Grant>>,
}

impl RoleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in roles used when the config declares none.
    pub fn defaults() -> Self {
        let mut map = Self::new();
        map.insert("admin", vec![Grant::Everything]);
        map.insert(
            "staff",
            ["browser:basic", "logic:*", "data:local"]
                .iter()
                .filter_map(|g| g.parse().ok())
                .collect(),
        );
        map.insert("viewer", vec![]);
        map
    }

    pub fn insert(&mut self, role: impl Into<String>, grants: Vec<Grant>) {
        self.roles.insert(role.into(), grants);
    }

    pub fn grants(&self, role: &str) -> &[Grant] {
        self.roles.get(role).map(|g| g.as_slice()).unwrap_or(&[])
    }

    pub fn contains_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    pub fn roles(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.roles.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Whether any grant of `role` covers `capability`.
    pub fn covers(&self, role: &str, capability: &Capability) -> bool {
        self.grants(role).iter().any(|g| g.covers(capability))
    }

    /// First capability in `required` that `role` does not hold.
    pub fn first_missing<'a>(
        &self,
        role: &str,
        required: &'a [Capability],
    ) -> Option<&'a Capability> {
        required.iter().find(|cap| !self.covers(role, cap))
    }
}
