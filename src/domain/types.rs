//! Shared domain identifiers and enumerations for upstream resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

const MAX_SITE_ID_LEN: usize = 64;
const MAX_RESOURCE_ID_LEN: usize = 128;
const RESERVED_RESOURCE_ID: &str = "list";
const CURRENT_USER_ID: &str = "me";
const SITE_SETTINGS_ID: &str = "site";

/// Identifier of one configured site (tenant).
///
/// Restricted to `[A-Za-z0-9_-]` so it can never contain the key separator
/// or the pattern wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SiteId(String);

impl SiteId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::validation("site id must not be empty"));
        }
        if value.len() > MAX_SITE_ID_LEN {
            return Err(DomainError::validation(format!(
                "site id exceeds {MAX_SITE_ID_LEN} characters"
            )));
        }
        if !is_identifier(&value) {
            return Err(DomainError::validation(format!(
                "site id `{value}` contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SiteId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SiteId> for String {
    fn from(value: SiteId) -> Self {
        value.0
    }
}

/// Identifier of a single upstream resource (`42`, `me`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::validation("resource id must not be empty"));
        }
        if value.len() > MAX_RESOURCE_ID_LEN {
            return Err(DomainError::validation(format!(
                "resource id exceeds {MAX_RESOURCE_ID_LEN} characters"
            )));
        }
        if value == RESERVED_RESOURCE_ID {
            return Err(DomainError::validation(format!(
                "resource id `{RESERVED_RESOURCE_ID}` is reserved"
            )));
        }
        if !is_identifier(&value) {
            return Err(DomainError::validation(format!(
                "resource id `{value}` contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(value))
    }

    /// The authenticated user (`me`).
    pub fn current_user() -> Self {
        Self(CURRENT_USER_ID.to_string())
    }

    /// The single settings object of a site (`site`).
    pub fn site_settings() -> Self {
        Self(SITE_SETTINGS_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for ResourceId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

fn is_identifier(value: &str) -> bool {
    value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Upstream resource families exposed through the tool layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Post,
    Page,
    Media,
    User,
    Comment,
    Category,
    Tag,
    Settings,
}

impl ResourceType {
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Post,
        ResourceType::Page,
        ResourceType::Media,
        ResourceType::User,
        ResourceType::Comment,
        ResourceType::Category,
        ResourceType::Tag,
        ResourceType::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Post => "post",
            ResourceType::Page => "page",
            ResourceType::Media => "media",
            ResourceType::User => "user",
            ResourceType::Comment => "comment",
            ResourceType::Category => "category",
            ResourceType::Tag => "tag",
            ResourceType::Settings => "settings",
        }
    }

    /// Singleton resources have exactly one instance per site.
    pub fn is_singleton(self) -> bool {
        matches!(self, ResourceType::Settings)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| DomainError::validation(format!("unknown resource type `{value}`")))
    }
}

/// Write operations accepted by the upstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read shape: one item by id, or a collection query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Single,
    List,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Single => "single",
            Variant::List => "list",
        }
    }
}
