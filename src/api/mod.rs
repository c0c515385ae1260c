//! Remote Content API
//!
//! The engine only sees the destination/source platform through
//! [`ContentApi`]. Clients are passed explicitly to every component and are
//! scoped to one branch; [`ContentApi::with_branch`] derives a sibling
//! client for another branch.
//!
//! Implementations:
//! - [`InMemoryContentApi`]: full in-process platform, used by tests and the
//!   simulation binary
//! - [`SimulatedContentApi`]: wraps any client and injects seeded failures

pub mod memory;
pub mod simulated;

use crate::batch::PageQuery;
use crate::record::Record;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use memory::{DerivedRule, InMemoryContentApi};
pub use simulated::{SimulatedApiConfig, SimulatedApiStats, SimulatedContentApi};

/// Future returned by every API call
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Errors reported by the remote platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Object does not exist
    NotFound { content_type: String, uid: String },
    /// Request was understood and refused (validation, duplicates)
    Rejected { status: u16, message: String },
    /// Network failure, timeout or server error; may succeed on retry
    Transient(String),
}

impl ApiError {
    pub fn not_found(content_type: &str, uid: &str) -> Self {
        ApiError::NotFound {
            content_type: content_type.to_string(),
            uid: uid.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound { content_type, uid } => {
                write!(f, "{} {} not found", content_type, uid)
            }
            ApiError::Rejected { status, message } => {
                write!(f, "Request rejected ({}): {}", status, message)
            }
            ApiError::Transient(msg) => write!(f, "Transient API failure: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// Paginated listing request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub skip: u64,
    pub limit: u64,
    /// Restrict to one locale
    pub locale: Option<String>,
    /// Field equality filters
    pub filters: BTreeMap<String, Value>,
}

impl ListQuery {
    pub fn new() -> Self {
        ListQuery::default()
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    /// Count-only probe: no items, just the total
    pub fn count_only(mut self) -> Self {
        self.skip = 0;
        self.limit = 0;
        self
    }

    /// True when `record` satisfies the locale and field filters
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(locale) = &self.locale {
            if record.get_str(LOCALE_FIELD) != Some(locale.as_str()) {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(field, value)| record.get(field) == Some(value))
    }
}

impl PageQuery for ListQuery {
    fn at_page(&self, skip: u64, limit: u64) -> Self {
        ListQuery {
            skip,
            limit,
            ..self.clone()
        }
    }
}

/// Field carrying a record's locale
pub const LOCALE_FIELD: &str = "locale";

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResponse {
    pub items: Vec<Record>,
    /// Total matching objects, independent of skip/limit
    pub count: u64,
}

/// The remote content platform, scoped to one branch
pub trait ContentApi: Send + Sync + 'static {
    /// Branch this client talks to
    fn branch(&self) -> &str;

    /// Sibling client for another branch
    fn with_branch(&self, branch: &str) -> Arc<dyn ContentApi>;

    /// Paginated listing with a total count
    fn list<'a>(&'a self, content_type: &'a str, query: ListQuery) -> ApiFuture<'a, ListResponse>;

    /// Create one object; returns it with its destination uid
    fn create<'a>(&'a self, content_type: &'a str, payload: Record) -> ApiFuture<'a, Record>;

    /// Update one object (or add a localized version of it)
    fn update<'a>(
        &'a self,
        content_type: &'a str,
        uid: &'a str,
        payload: Record,
    ) -> ApiFuture<'a, Record>;

    /// Fetch a binary by URL
    fn download<'a>(&'a self, url: &'a str) -> ApiFuture<'a, Bytes>;
}
