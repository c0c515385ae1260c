//! In-memory content platform
//!
//! Holds collections per branch and per content type, assigns destination
//! uids on create, and can model server-side derivation: creating a parent
//! (an experience) schedules children (its variants) that only become
//! visible after a number of listings of the child type.

use crate::api::{ApiError, ApiFuture, ContentApi, ListQuery, ListResponse, LOCALE_FIELD};
use crate::record::{Record, UID_FIELD};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Default branch of a fresh platform
pub const MAIN_BRANCH: &str = "main";

/// Server-side derivation of child objects after a parent create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedRule {
    pub parent_type: String,
    pub child_type: String,
    /// Array field of the parent payload; one child per element
    pub source_field: String,
    /// Field on each child pointing at the parent's uid
    pub link_field: String,
    /// Child listings before the children appear; `None` never materializes
    pub visible_after_lists: Option<u32>,
}

impl DerivedRule {
    /// Experiences derive their variants
    pub fn variants(visible_after_lists: Option<u32>) -> Self {
        DerivedRule {
            parent_type: "experiences".to_string(),
            child_type: "variants".to_string(),
            source_field: "variants".to_string(),
            link_field: "experience_uid".to_string(),
            visible_after_lists,
        }
    }
}

struct PendingDerivation {
    child_type: String,
    children: Vec<Record>,
    remaining: Option<u32>,
}

#[derive(Default)]
struct BranchState {
    collections: BTreeMap<String, Vec<Record>>,
    binaries: HashMap<String, Bytes>,
    pending: Vec<PendingDerivation>,
    creates: HashMap<String, u64>,
    updates: HashMap<String, u64>,
}

struct PlatformState {
    branches: HashMap<String, BranchState>,
    rules: Vec<DerivedRule>,
    next_uid: u64,
}

/// In-process implementation of [`ContentApi`]
#[derive(Clone)]
pub struct InMemoryContentApi {
    branch: String,
    uid_prefix: String,
    state: Arc<Mutex<PlatformState>>,
}

impl InMemoryContentApi {
    /// Empty platform; created uids look like `<prefix>_00000001`
    pub fn new(uid_prefix: impl Into<String>) -> Self {
        InMemoryContentApi {
            branch: MAIN_BRANCH.to_string(),
            uid_prefix: uid_prefix.into(),
            state: Arc::new(Mutex::new(PlatformState {
                branches: HashMap::new(),
                rules: Vec::new(),
                next_uid: 0,
            })),
        }
    }

    pub fn with_rule(self, rule: DerivedRule) -> Self {
        self.state.lock().rules.push(rule);
        self
    }

    /// Same platform, another branch
    pub fn on_branch(&self, branch: &str) -> Self {
        InMemoryContentApi {
            branch: branch.to_string(),
            uid_prefix: self.uid_prefix.clone(),
            state: self.state.clone(),
        }
    }

    /// Insert records as-is (source fixtures)
    pub fn seed(&self, content_type: &str, records: impl IntoIterator<Item = Record>) {
        let mut state = self.state.lock();
        let branch = state.branches.entry(self.branch.clone()).or_default();
        branch
            .collections
            .entry(content_type.to_string())
            .or_default()
            .extend(records);
    }

    /// Register a downloadable binary
    pub fn seed_binary(&self, url: &str, data: impl Into<Bytes>) {
        let mut state = self.state.lock();
        let branch = state.branches.entry(self.branch.clone()).or_default();
        branch.binaries.insert(url.to_string(), data.into());
    }

    /// Everything stored for a content type
    pub fn records(&self, content_type: &str) -> Vec<Record> {
        let state = self.state.lock();
        state
            .branches
            .get(&self.branch)
            .and_then(|b| b.collections.get(content_type))
            .cloned()
            .unwrap_or_default()
    }

    pub fn create_count(&self, content_type: &str) -> u64 {
        self.counter(content_type, |b| &b.creates)
    }

    pub fn update_count(&self, content_type: &str) -> u64 {
        self.counter(content_type, |b| &b.updates)
    }

    fn counter(&self, content_type: &str, pick: impl Fn(&BranchState) -> &HashMap<String, u64>) -> u64 {
        let state = self.state.lock();
        state
            .branches
            .get(&self.branch)
            .and_then(|b| pick(b).get(content_type).copied())
            .unwrap_or(0)
    }

    fn list_now(&self, content_type: &str, query: &ListQuery) -> ListResponse {
        let mut state = self.state.lock();
        let branch = state.branches.entry(self.branch.clone()).or_default();
        tick_derivations(branch, content_type);

        let matching: Vec<&Record> = branch
            .collections
            .get(content_type)
            .map(|records| records.iter().filter(|r| query.matches(r)).collect())
            .unwrap_or_default();

        ListResponse {
            count: matching.len() as u64,
            items: matching
                .into_iter()
                .skip(query.skip as usize)
                .take(query.limit as usize)
                .cloned()
                .collect(),
        }
    }

    fn create_now(&self, content_type: &str, payload: Record) -> Result<Record, ApiError> {
        let mut state = self.state.lock();
        let uid = next_uid(&mut state, &self.uid_prefix);

        let mut record = payload;
        record.set(UID_FIELD, uid.as_str());
        if record.contains("url") {
            let file = record.get_str("filename").unwrap_or(uid.as_str()).to_string();
            record.set("url", format!("https://{}.cdn/{}/{}", self.uid_prefix, uid, file));
        }

        let mut derivations = Vec::new();
        for rule in state.rules.iter().filter(|r| r.parent_type == content_type) {
            let specs = record
                .get(&rule.source_field)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            derivations.push((rule.clone(), specs));
        }

        let mut pending = Vec::new();
        for (rule, specs) in derivations {
            let mut children = Vec::with_capacity(specs.len());
            for spec in specs {
                let child_uid = next_uid(&mut state, &self.uid_prefix);
                let mut child = Record::new(child_uid).with(&rule.link_field, uid.as_str());
                if let Some(name) = spec.get("name") {
                    child.set("name", name.clone());
                }
                children.push(child);
            }
            pending.push(PendingDerivation {
                child_type: rule.child_type,
                children,
                remaining: rule.visible_after_lists,
            });
        }

        let branch = state.branches.entry(self.branch.clone()).or_default();
        branch
            .collections
            .entry(content_type.to_string())
            .or_default()
            .push(record.clone());
        *branch.creates.entry(content_type.to_string()).or_default() += 1;
        for derivation in pending {
            if derivation.remaining == Some(0) {
                materialize(branch, derivation);
            } else {
                branch.pending.push(derivation);
            }
        }

        debug!("Created {} {} on {}", content_type, uid, self.branch);
        Ok(record)
    }

    fn update_now(&self, content_type: &str, uid: &str, payload: Record) -> Result<Record, ApiError> {
        let mut state = self.state.lock();
        let branch = state.branches.entry(self.branch.clone()).or_default();
        let collection = branch
            .collections
            .get_mut(content_type)
            .filter(|records| records.iter().any(|r| r.uid() == Some(uid)))
            .ok_or_else(|| ApiError::not_found(content_type, uid))?;

        let mut record = payload;
        record.set(UID_FIELD, uid);
        let locale = record.get_str(LOCALE_FIELD).map(str::to_string);
        match collection
            .iter()
            .position(|r| r.uid() == Some(uid) && r.get_str(LOCALE_FIELD) == locale.as_deref())
        {
            Some(position) => collection[position] = record.clone(),
            None => collection.push(record.clone()),
        }
        *branch.updates.entry(content_type.to_string()).or_default() += 1;
        Ok(record)
    }

    fn download_now(&self, url: &str) -> Result<Bytes, ApiError> {
        let state = self.state.lock();
        state
            .branches
            .get(&self.branch)
            .and_then(|b| b.binaries.get(url).cloned())
            .ok_or_else(|| ApiError::not_found("assets", url))
    }
}

fn next_uid(state: &mut PlatformState, prefix: &str) -> String {
    state.next_uid += 1;
    format!("{}_{:08}", prefix, state.next_uid)
}

/// One listing of `content_type` has happened: advance derivations of it
fn tick_derivations(branch: &mut BranchState, content_type: &str) {
    let mut ready = Vec::new();
    let mut waiting = Vec::new();
    for mut derivation in std::mem::take(&mut branch.pending) {
        if derivation.child_type != content_type {
            waiting.push(derivation);
            continue;
        }
        match derivation.remaining {
            Some(n) if n <= 1 => ready.push(derivation),
            Some(n) => {
                derivation.remaining = Some(n - 1);
                waiting.push(derivation);
            }
            None => waiting.push(derivation),
        }
    }
    branch.pending = waiting;
    for derivation in ready {
        materialize(branch, derivation);
    }
}

fn materialize(branch: &mut BranchState, derivation: PendingDerivation) {
    branch
        .collections
        .entry(derivation.child_type)
        .or_default()
        .extend(derivation.children);
}

impl ContentApi for InMemoryContentApi {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn with_branch(&self, branch: &str) -> Arc<dyn ContentApi> {
        Arc::new(self.on_branch(branch))
    }

    fn list<'a>(&'a self, content_type: &'a str, query: ListQuery) -> ApiFuture<'a, ListResponse> {
        Box::pin(async move { Ok(self.list_now(content_type, &query)) })
    }

    fn create<'a>(&'a self, content_type: &'a str, payload: Record) -> ApiFuture<'a, Record> {
        Box::pin(async move { self.create_now(content_type, payload) })
    }

    fn update<'a>(
        &'a self,
        content_type: &'a str,
        uid: &'a str,
        payload: Record,
    ) -> ApiFuture<'a, Record> {
        Box::pin(async move { self.update_now(content_type, uid, payload) })
    }

    fn download<'a>(&'a self, url: &'a str) -> ApiFuture<'a, Bytes> {
        Box::pin(async move { self.download_now(url) })
    }
}
