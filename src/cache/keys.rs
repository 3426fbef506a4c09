//! Cache key definitions.
//!
//! `CacheKey` is the canonical storage key of one read, `PatternKey` the
//! coarse family of list reads, and `Purge` a single invalidation target.
//! Every one of them carries its `SiteId` so no match can cross sites.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::types::{ResourceId, ResourceType, SiteId};
use crate::upstream::Query;

const SEPARATOR: char = ':';
const PARAMS_MARKER: char = '?';
const LIST_SEGMENT: &str = "list";
const EMPTY_PARAMS: &str = "{}";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("query parameters must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },
    #[error("failed to encode query parameters: {0}")]
    Encode(String),
}

/// Canonical key of one cached read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    site: SiteId,
    resource: ResourceType,
    encoded: String,
}

impl CacheKey {
    /// Key of a single item: `{site}:{type}:{id}` plus `?{params}` when any remain.
    pub fn single(
        site: &SiteId,
        resource: ResourceType,
        id: &ResourceId,
        params: &Value,
    ) -> Result<Self, KeyError> {
        let mut encoded = item_base(site, resource, id);
        if let Some(params) = canonical_params(params)? {
            encoded.push(PARAMS_MARKER);
            encoded.push_str(&params);
        }
        Ok(Self {
            site: site.clone(),
            resource,
            encoded,
        })
    }

    /// Key of a collection query: `{site}:{type}:list:{params}`.
    pub fn list(site: &SiteId, resource: ResourceType, params: &Value) -> Result<Self, KeyError> {
        let params = canonical_params(params)?;
        let mut encoded = PatternKey::collection(site, resource).prefix();
        encoded.push_str(params.as_deref().unwrap_or(EMPTY_PARAMS));
        Ok(Self {
            site: site.clone(),
            resource,
            encoded,
        })
    }

    pub fn for_query(
        site: &SiteId,
        resource: ResourceType,
        query: &Query,
    ) -> Result<Self, KeyError> {
        match query {
            Query::Single { id, params } => Self::single(site, resource, id, params),
            Query::List { params } => Self::list(site, resource, params),
        }
    }

    pub fn site(&self) -> &SiteId {
        &self.site
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// All list variants of one resource type on one site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternKey {
    site: SiteId,
    resource: ResourceType,
}

impl PatternKey {
    pub fn collection(site: &SiteId, resource: ResourceType) -> Self {
        Self {
            site: site.clone(),
            resource,
        }
    }

    pub fn site(&self) -> &SiteId {
        &self.site
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    fn prefix(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{LIST_SEGMENT}{SEPARATOR}",
            self.site, self.resource
        )
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix())
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.prefix())
    }
}

/// One invalidation target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Purge {
    /// Exactly one stored key.
    Key(String, SiteId),
    /// An item and every parameterised read of it.
    Item {
        site: SiteId,
        resource: ResourceType,
        id: ResourceId,
    },
    /// Every list read of a resource type.
    Pattern(PatternKey),
    /// Every read of a resource type, single or list.
    Resource { site: SiteId, resource: ResourceType },
    /// Everything cached for a site.
    Site(SiteId),
}

impl Purge {
    pub fn key(key: &CacheKey) -> Self {
        Self::Key(key.as_str().to_string(), key.site().clone())
    }

    pub fn item(site: &SiteId, resource: ResourceType, id: &ResourceId) -> Self {
        Self::Item {
            site: site.clone(),
            resource,
            id: id.clone(),
        }
    }

    pub fn collection(site: &SiteId, resource: ResourceType) -> Self {
        Self::Pattern(PatternKey::collection(site, resource))
    }

    pub fn resource(site: &SiteId, resource: ResourceType) -> Self {
        Self::Resource {
            site: site.clone(),
            resource,
        }
    }

    pub fn site(&self) -> &SiteId {
        match self {
            Self::Key(_, site) | Self::Site(site) => site,
            Self::Item { site, .. } | Self::Resource { site, .. } => site,
            Self::Pattern(pattern) => pattern.site(),
        }
    }

    /// Whether an encoded storage key falls under this target.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Key(exact, _) => key == exact,
            Self::Item { site, resource, id } => {
                let base = item_base(site, *resource, id);
                match key.strip_prefix(base.as_str()) {
                    Some(rest) => rest.is_empty() || rest.starts_with(PARAMS_MARKER),
                    None => false,
                }
            }
            Self::Pattern(pattern) => pattern.matches(key),
            Self::Resource { site, resource } => {
                key.starts_with(&format!("{site}{SEPARATOR}{resource}{SEPARATOR}"))
            }
            Self::Site(site) => key.starts_with(&format!("{site}{SEPARATOR}")),
        }
    }
}

impl fmt::Display for Purge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key, _) => f.write_str(key),
            Self::Item { site, resource, id } => f.write_str(&item_base(site, *resource, id)),
            Self::Pattern(pattern) => fmt::Display::fmt(pattern, f),
            Self::Resource { site, resource } => write!(f, "{site}{SEPARATOR}{resource}:*"),
            Self::Site(site) => write!(f, "{site}{SEPARATOR}*"),
        }
    }
}

fn item_base(site: &SiteId, resource: ResourceType, id: &ResourceId) -> String {
    format!("{site}{SEPARATOR}{resource}{SEPARATOR}{id}")
}

/// Convert any serializable parameter set into a JSON value for key building.
pub fn encode_params<T: Serialize + ?Sized>(params: &T) -> Result<Value, KeyError> {
    serde_json::to_value(params).map_err(|err| KeyError::Encode(err.to_string()))
}

/// Canonical text of a parameter object, or `None` when nothing remains.
///
/// Object keys are sorted recursively and `null` members are dropped, so
/// construction order never changes the result.
pub fn canonical_params(params: &Value) -> Result<Option<String>, KeyError> {
    let object = match params {
        Value::Null => return Ok(None),
        Value::Object(object) => object,
        other => {
            return Err(KeyError::NotAnObject {
                kind: json_kind(other),
            });
        }
    };

    let canonical = canonical_object(object);
    if canonical.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&Value::Object(canonical))
        .map(Some)
        .map_err(|err| KeyError::Encode(err.to_string()))
}

fn canonical_object(object: &Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(&String, &Value)> = object
        .iter()
        .filter(|(_, value)| !value.is_null())
        .collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    let mut canonical = Map::new();
    for (name, value) in entries {
        canonical.insert(name.clone(), canonical_value(value));
    }
    canonical
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(canonical_object(object)),
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn site(name: &str) -> SiteId {
        SiteId::new(name).expect("valid site")
    }

    #[test]
    fn parameter_order_does_not_change_the_key() {
        let blog = site("blog");
        let first = json!({"per_page": 10, "status": "publish", "filter": {"b": 1, "a": 2}});
        let second = json!({"filter": {"a": 2, "b": 1}, "status": "publish", "per_page": 10});

        let k1 = CacheKey::list(&blog, ResourceType::Post, &first).expect("key");
        let k2 = CacheKey::list(&blog, ResourceType::Post, &second).expect("key");
        assert_eq!(k1, k2);
        assert_eq!(
            k1.as_str(),
            r#"blog:post:list:{"filter":{"a":2,"b":1},"per_page":10,"status":"publish"}"#
        );
    }

    #[test]
    fn null_members_are_dropped_recursively() {
        let blog = site("blog");
        let with_nulls = json!({"search": null, "page": 1, "nested": {"x": null, "y": true}});
        let without = json!({"page": 1, "nested": {"y": true}});

        let k1 = CacheKey::list(&blog, ResourceType::Tag, &with_nulls).expect("key");
        let k2 = CacheKey::list(&blog, ResourceType::Tag, &without).expect("key");
        assert_eq!(k1, k2);
    }

    #[test]
    fn empty_params_collapse_to_the_bare_key() {
        let blog = site("blog");
        let id = ResourceId::from(42);

        let bare = CacheKey::single(&blog, ResourceType::Post, &id, &Value::Null).expect("key");
        let empty = CacheKey::single(&blog, ResourceType::Post, &id, &json!({"x": null}))
            .expect("key");
        assert_eq!(bare.as_str(), "blog:post:42");
        assert_eq!(bare, empty);

        let list = CacheKey::list(&blog, ResourceType::Post, &Value::Null).expect("key");
        assert_eq!(list.as_str(), "blog:post:list:{}");
    }

    #[test]
    fn distinct_requests_produce_distinct_keys() {
        let blog = site("blog");
        let a = CacheKey::list(&blog, ResourceType::Post, &json!({"page": 1})).expect("key");
        let b = CacheKey::list(&blog, ResourceType::Post, &json!({"page": 2})).expect("key");
        let c = CacheKey::list(&blog, ResourceType::Page, &json!({"page": 1})).expect("key");
        let d = CacheKey::list(&site("shop"), ResourceType::Post, &json!({"page": 1}))
            .expect("key");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn non_object_params_are_rejected() {
        let blog = site("blog");
        let err = CacheKey::list(&blog, ResourceType::Post, &json!([1, 2])).unwrap_err();
        assert_eq!(err, KeyError::NotAnObject { kind: "array" });
    }

    #[test]
    fn encode_params_accepts_serializable_maps() {
        let mut params = HashMap::new();
        params.insert("orderby", "date");
        params.insert("order", "desc");
        let value = encode_params(&params).expect("serializable");
        assert_eq!(
            canonical_params(&value).expect("canonical"),
            Some(r#"{"order":"desc","orderby":"date"}"#.to_string())
        );
    }

    #[test]
    fn pattern_matches_lists_but_not_items() {
        let blog = site("blog");
        let pattern = Purge::collection(&blog, ResourceType::Post);
        assert_eq!(pattern.to_string(), "blog:post:list:*");

        let list = CacheKey::list(&blog, ResourceType::Post, &json!({"page": 3})).expect("key");
        let item = CacheKey::single(&blog, ResourceType::Post, &ResourceId::from(42), &Value::Null)
            .expect("key");
        assert!(pattern.matches(list.as_str()));
        assert!(!pattern.matches(item.as_str()));
    }

    #[test]
    fn item_purge_covers_parameterised_reads_only_for_that_id() {
        let blog = site("blog");
        let purge = Purge::item(&blog, ResourceType::Post, &ResourceId::from(42));

        assert!(purge.matches("blog:post:42"));
        assert!(purge.matches(r#"blog:post:42?{"context":"edit"}"#));
        assert!(!purge.matches("blog:post:421"));
        assert!(!purge.matches("blog:post:list:{}"));
        assert!(!purge.matches("shop:post:42"));
    }

    #[test]
    fn site_and_resource_purges_stay_within_their_prefix() {
        let blog = site("blog");
        assert!(Purge::Site(blog.clone()).matches("blog:post:1"));
        assert!(!Purge::Site(blog.clone()).matches("blog2:post:1"));

        let resource = Purge::resource(&blog, ResourceType::Post);
        assert!(resource.matches("blog:post:1"));
        assert!(resource.matches("blog:post:list:{}"));
        assert!(!resource.matches("blog:page:1"));
        assert_eq!(resource.to_string(), "blog:post:*");
    }
}
