//! Record transforms applied on import
//!
//! Field-level rewriting is pluggable: each rule is a [`RecordTransformer`]
//! tagged with the stage it belongs to. A [`TransformChain`] always runs
//! stages in the same order, whatever order transformers were registered:
//!
//! ```text
//! Assets → References → PublishDetails
//! ```
//!
//! Transformers read destination identifiers from [`LookupTables`]; a
//! transformer whose table is absent fails the record instead of guessing.

use crate::mapper::UidMapper;
use crate::record::{Record, UID_FIELD, VERSION_FIELD};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Lookup table holding `source url -> destination url` for assets
pub const ASSET_URL_TABLE: &str = "asset-urls";

/// Lookup table holding the entry uid map of one content type
pub fn entries_table(content_type: &str) -> String {
    format!("entries/{}", content_type)
}

/// Transform stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransformStage {
    /// Asset uid and url fixups
    Assets,
    /// Entry-to-entry relational fixups
    References,
    /// Publish details and environment cleanup
    PublishDetails,
}

/// Transform errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A lookup table the transformer needs was not provided
    MissingTable { transformer: String, table: String },
    /// The record cannot be transformed
    Invalid { transformer: String, reason: String },
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::MissingTable { transformer, table } => {
                write!(f, "{} needs lookup table '{}'", transformer, table)
            }
            TransformError::Invalid { transformer, reason } => {
                write!(f, "{} rejected record: {}", transformer, reason)
            }
        }
    }
}

impl std::error::Error for TransformError {}

/// Named uid tables available to transformers
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    tables: HashMap<String, UidMapper>,
}

impl LookupTables {
    pub fn new() -> Self {
        LookupTables::default()
    }

    pub fn with(mut self, name: impl Into<String>, mapper: UidMapper) -> Self {
        self.insert(name, mapper);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, mapper: UidMapper) {
        self.tables.insert(name.into(), mapper);
    }

    pub fn get(&self, name: &str) -> Option<&UidMapper> {
        self.tables.get(name)
    }

    fn require(&self, transformer: &str, name: &str) -> Result<&UidMapper, TransformError> {
        self.get(name).ok_or_else(|| TransformError::MissingTable {
            transformer: transformer.to_string(),
            table: name.to_string(),
        })
    }
}

/// A field-rewriting rule
pub trait RecordTransformer: Send + Sync {
    fn name(&self) -> &str;

    fn stage(&self) -> TransformStage;

    fn transform(&self, record: Record, tables: &LookupTables) -> Result<Record, TransformError>;
}

/// Transformers ordered by stage; registration order within a stage
#[derive(Clone, Default)]
pub struct TransformChain {
    transformers: Vec<Arc<dyn RecordTransformer>>,
}

impl TransformChain {
    pub fn new() -> Self {
        TransformChain::default()
    }

    /// Asset fixups, entry reference fixups, publish-detail cleanup
    pub fn standard() -> Self {
        TransformChain::new()
            .with(ReferenceRemapper::assets())
            .with(ReferenceRemapper::entries())
            .with(PublishDetailsStripper::default())
    }

    pub fn with<T: RecordTransformer + 'static>(mut self, transformer: T) -> Self {
        self.push(Arc::new(transformer));
        self
    }

    pub fn push(&mut self, transformer: Arc<dyn RecordTransformer>) {
        self.transformers.push(transformer);
        // stable: keeps registration order inside a stage
        self.transformers.sort_by_key(|t| t.stage());
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn has_stage(&self, stage: TransformStage) -> bool {
        self.transformers.iter().any(|t| t.stage() == stage)
    }

    /// Sub-chain with only the transformers of `stages`
    pub fn restricted_to(&self, stages: &[TransformStage]) -> TransformChain {
        TransformChain {
            transformers: self
                .transformers
                .iter()
                .filter(|t| stages.contains(&t.stage()))
                .cloned()
                .collect(),
        }
    }

    /// Names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub fn apply(&self, record: Record, tables: &LookupTables) -> Result<Record, TransformError> {
        debug_assert!(
            self.transformers.windows(2).all(|w| w[0].stage() <= w[1].stage()),
            "Invariant violated: transform stages out of order"
        );
        self.transformers
            .iter()
            .try_fold(record, |record, t| t.transform(record, tables))
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Rewrites embedded references through a uid table.
///
/// An embedded reference is any nested JSON object carrying both `uid` and
/// the marker field. The record's own top-level `uid` is never touched.
/// References with no mapping are left as they are.
///
/// A scoped remapper picks the table per reference: `<table>/<marker value>`.
/// Entry uids are only unique within their content type, so entry
/// references resolve through the table of the content type they name.
#[derive(Debug, Clone)]
pub struct ReferenceRemapper {
    name: String,
    stage: TransformStage,
    table: String,
    marker: String,
    scoped: bool,
    /// Table used to rewrite a `url` field next to the uid
    url_table: Option<String>,
}

impl ReferenceRemapper {
    pub fn new(
        name: impl Into<String>,
        stage: TransformStage,
        table: impl Into<String>,
        marker: impl Into<String>,
    ) -> Self {
        ReferenceRemapper {
            name: name.into(),
            stage,
            table: table.into(),
            marker: marker.into(),
            scoped: false,
            url_table: None,
        }
    }

    /// Embedded assets: `{uid, url, filename}` objects
    pub fn assets() -> Self {
        let mut remapper = Self::new("asset-references", TransformStage::Assets, "assets", "filename");
        remapper.url_table = Some(ASSET_URL_TABLE.to_string());
        remapper
    }

    /// Entry references: `{uid, _content_type_uid}` objects, resolved
    /// through [`entries_table`] of the referenced content type
    pub fn entries() -> Self {
        let mut remapper = Self::new(
            "entry-references",
            TransformStage::References,
            "entries",
            "_content_type_uid",
        );
        remapper.scoped = true;
        remapper
    }
}

impl RecordTransformer for ReferenceRemapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> TransformStage {
        self.stage
    }

    fn transform(&self, mut record: Record, tables: &LookupTables) -> Result<Record, TransformError> {
        let unscoped = if self.scoped {
            None
        } else {
            Some(tables.require(&self.name, &self.table)?)
        };
        let urls = match &self.url_table {
            Some(table) => Some(tables.require(&self.name, table)?),
            None => None,
        };

        let mut remapped = 0usize;
        // Explicit stack over nested values; top-level fields are containers only
        let mut stack: Vec<&mut Value> = record.fields_mut().values_mut().collect();
        while let Some(value) = stack.pop() {
            match value {
                Value::Object(map) => {
                    if let Some(marker) = map.get(&self.marker) {
                        let uids = match (unscoped, marker.as_str()) {
                            (Some(uids), _) => Some(uids),
                            (None, Some(scope)) => tables.get(&format!("{}/{}", self.table, scope)),
                            (None, None) => None,
                        };
                        if let (Some(uids), Some(Value::String(uid))) = (uids, map.get_mut(UID_FIELD)) {
                            if let Some(destination) = uids.get(uid) {
                                *uid = destination;
                                remapped += 1;
                            }
                        }
                        if let (Some(urls), Some(Value::String(url))) = (urls, map.get_mut("url")) {
                            if let Some(destination) = urls.get(url) {
                                *url = destination;
                            }
                        }
                    }
                    stack.extend(map.values_mut());
                }
                Value::Array(items) => stack.extend(items.iter_mut()),
                _ => {}
            }
        }

        if remapped > 0 {
            debug!(
                "{} remapped {} references in {}",
                self.name,
                remapped,
                record.uid().unwrap_or("?")
            );
        }
        Ok(record)
    }
}

/// Drops fields the destination assigns itself
#[derive(Debug, Clone)]
pub struct PublishDetailsStripper {
    fields: Vec<String>,
}

impl Default for PublishDetailsStripper {
    fn default() -> Self {
        PublishDetailsStripper {
            fields: [
                "publish_details",
                "created_at",
                "updated_at",
                "created_by",
                "updated_by",
                VERSION_FIELD,
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl PublishDetailsStripper {
    pub fn with_fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        PublishDetailsStripper {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl RecordTransformer for PublishDetailsStripper {
    fn name(&self) -> &str {
        "publish-details"
    }

    fn stage(&self) -> TransformStage {
        TransformStage::PublishDetails
    }

    fn transform(&self, mut record: Record, _tables: &LookupTables) -> Result<Record, TransformError> {
        for field in &self.fields {
            record.remove(field);
        }
        Ok(record)
    }
}
