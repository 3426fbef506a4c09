//! Interface of the upstream resource client the cache wraps.
//!
//! The HTTP transport and authentication live behind [`ResourceClient`]; this
//! crate only consumes the trait.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::types::{Operation, ResourceId, ResourceType, SiteId, Variant};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("resource not found")]
    NotFound,
    #[error("upstream rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream request aborted: {0}")]
    Aborted(String),
}

impl UpstreamError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A read against one resource type.
///
/// `params` is any JSON object of query parameters; `Value::Null` means none.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Single { id: ResourceId, params: Value },
    List { params: Value },
}

impl Query {
    pub fn single(id: impl Into<ResourceId>) -> Self {
        Self::Single {
            id: id.into(),
            params: Value::Null,
        }
    }

    pub fn list() -> Self {
        Self::List {
            params: Value::Null,
        }
    }

    pub fn with_params(self, params: Value) -> Self {
        match self {
            Self::Single { id, .. } => Self::Single { id, params },
            Self::List { .. } => Self::List { params },
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::Single { .. } => Variant::Single,
            Self::List { .. } => Variant::List,
        }
    }

    pub fn params(&self) -> &Value {
        match self {
            Self::Single { params, .. } | Self::List { params } => params,
        }
    }
}

/// A write against one resource type.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub operation: Operation,
    pub id: Option<ResourceId>,
    pub payload: Value,
}

impl Mutation {
    pub fn create(payload: Value) -> Self {
        Self {
            operation: Operation::Create,
            id: None,
            payload,
        }
    }

    pub fn update(id: impl Into<ResourceId>, payload: Value) -> Self {
        Self {
            operation: Operation::Update,
            id: Some(id.into()),
            payload,
        }
    }

    pub fn delete(id: impl Into<ResourceId>) -> Self {
        Self {
            operation: Operation::Delete,
            id: Some(id.into()),
            payload: Value::Null,
        }
    }
}

/// Upstream REST client for the configured sites.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn fetch(
        &self,
        site: &SiteId,
        resource: ResourceType,
        query: &Query,
    ) -> Result<Value, UpstreamError>;

    async fn mutate(
        &self,
        site: &SiteId,
        resource: ResourceType,
        mutation: &Mutation,
    ) -> Result<Value, UpstreamError>;
}
