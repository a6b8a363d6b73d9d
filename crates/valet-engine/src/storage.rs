//! Per-service record storage.
//!
//! Each service declares named storage collections; an installed service
//! instance holds them as ordered lists of JSON records. A
//! [`StorageHandle`] scopes every operation to one
//! `(chat, service, collection)` triple — records are owned by the
//! declaring service and never read across services. Records get a
//! uuid `_id` on insert; user-visible indices are 1-based.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use valet_types::{ChatId, ValetError};

use crate::state::StateManager;

/// Aggregation operators over a numeric record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl FromStr for AggregateOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateOp::Sum),
            "avg" => Ok(AggregateOp::Avg),
            "min" => Ok(AggregateOp::Min),
            "max" => Ok(AggregateOp::Max),
            "count" => Ok(AggregateOp::Count),
            other => Err(format!("unknown aggregate op '{other}'")),
        }
    }
}

/// One page of records.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

/// CRUD over one storage collection of one installed service.
#[derive(Clone)]
pub struct StorageHandle {
    state: Arc<StateManager>,
    chat_id: ChatId,
    service: String,
    name: String,
}

impl StorageHandle {
    pub fn new(
        state: Arc<StateManager>,
        chat_id: ChatId,
        service: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            state,
            chat_id,
            service: service.into(),
            name: name.into(),
        }
    }

    /// Run a closure over the collection's record list.
    async fn with_records<R>(
        &self,
        f: impl FnOnce(&[Value]) -> R,
    ) -> Result<R, ValetError> {
        let service = self.service.clone();
        let name = self.name.clone();
        let chat = self.chat_id.clone();
        self.state
            .read(move |s| {
                let records = s
                    .chats
                    .get(chat.as_str())
                    .and_then(|c| c.services.get(&service))
                    .ok_or_else(|| {
                        ValetError::Handler(format!("service '{service}' is not installed"))
                    })?
                    .storage
                    .get(&name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                Ok(f(records))
            })
            .await
    }

    /// Run a closure over the mutable record list and persist.
    async fn with_records_mut<R>(
        &self,
        f: impl FnOnce(&mut Vec<Value>) -> R,
    ) -> Result<R, ValetError> {
        let service = self.service.clone();
        let name = self.name.clone();
        let chat = self.chat_id.clone();
        self.state
            .mutate(move |s| {
                let instance = s
                    .chats
                    .get_mut(chat.as_str())
                    .and_then(|c| c.services.get_mut(&service))
                    .ok_or_else(|| {
                        ValetError::Handler(format!("service '{service}' is not installed"))
                    })?;
                Ok(f(instance.storage.entry(name).or_default()))
            })
            .await?
    }

    /// Append a record, assigning a unique `_id`. Returns the stored
    /// record.
    pub async fn add(&self, item: Map<String, Value>) -> Result<Value, ValetError> {
        let mut record = item;
        record.insert("_id".into(), Value::String(Uuid::new_v4().to_string()));
        let stored = Value::Object(record);
        let cloned = stored.clone();
        self.with_records_mut(move |records| records.push(cloned)).await?;
        Ok(stored)
    }

    /// Fetch a record by `_id`.
    pub async fn get(&self, id: &str) -> Result<Option<Value>, ValetError> {
        let id = id.to_string();
        self.with_records(move |records| {
            records.iter().find(|r| record_id(r) == Some(&id)).cloned()
        })
        .await
    }

    /// Fetch a record by 1-based index.
    pub async fn get_by_index(&self, index: usize) -> Result<Option<Value>, ValetError> {
        self.with_records(move |records| {
            index
                .checked_sub(1)
                .and_then(|i| records.get(i))
                .cloned()
        })
        .await
    }

    /// Shallow-merge a patch into the record with `_id`; returns the new
    /// record or `None` when absent. The `_id` field cannot be patched.
    pub async fn update(
        &self,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, ValetError> {
        let id = id.to_string();
        self.with_records_mut(move |records| {
            let record = records
                .iter_mut()
                .find(|r| record_id(r) == Some(&id))?;
            apply_patch(record, patch);
            Some(record.clone())
        })
        .await
    }

    /// Shallow-merge a patch into the record at a 1-based index.
    pub async fn update_by_index(
        &self,
        index: usize,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, ValetError> {
        self.with_records_mut(move |records| {
            let record = index.checked_sub(1).and_then(|i| records.get_mut(i))?;
            apply_patch(record, patch);
            Some(record.clone())
        })
        .await
    }

    /// Delete a record by `_id`; `false` when absent.
    pub async fn delete(&self, id: &str) -> Result<bool, ValetError> {
        let id = id.to_string();
        self.with_records_mut(move |records| {
            let before = records.len();
            records.retain(|r| record_id(r) != Some(&id));
            before != records.len()
        })
        .await
    }

    /// Delete a record by 1-based index; `false` when out of range.
    pub async fn delete_by_index(&self, index: usize) -> Result<bool, ValetError> {
        self.with_records_mut(move |records| {
            match index.checked_sub(1) {
                Some(i) if i < records.len() => {
                    records.remove(i);
                    true
                }
                _ => false,
            }
        })
        .await
    }

    /// Remove every record.
    pub async fn clear(&self) -> Result<(), ValetError> {
        self.with_records_mut(|records| records.clear()).await
    }

    /// Records matching an equality filter, in storage order.
    pub async fn query(&self, filter: &Map<String, Value>) -> Result<Vec<Value>, ValetError> {
        let filter = filter.clone();
        self.with_records(move |records| {
            records
                .iter()
                .filter(|r| matches_filter(r, &filter))
                .cloned()
                .collect()
        })
        .await
    }

    /// Number of records matching the filter (all records when `None`).
    pub async fn count(&self, filter: Option<&Map<String, Value>>) -> Result<usize, ValetError> {
        let filter = filter.cloned();
        self.with_records(move |records| {
            records
                .iter()
                .filter(|r| filter.as_ref().is_none_or(|f| matches_filter(r, f)))
                .count()
        })
        .await
    }

    /// Aggregate a numeric field over the (optionally filtered) records.
    ///
    /// `count` ignores the field. The other operators consider only
    /// records whose field is numeric; with no such records they yield
    /// `0.0`.
    pub async fn aggregate(
        &self,
        field: &str,
        op: AggregateOp,
        filter: Option<&Map<String, Value>>,
    ) -> Result<f64, ValetError> {
        let field = field.to_string();
        let filter = filter.cloned();
        self.with_records(move |records| {
            let matching = records
                .iter()
                .filter(|r| filter.as_ref().is_none_or(|f| matches_filter(r, f)));
            if op == AggregateOp::Count {
                return matching.count() as f64;
            }
            let values: Vec<f64> = matching
                .filter_map(|r| r.get(&field).and_then(Value::as_f64))
                .collect();
            if values.is_empty() {
                return 0.0;
            }
            match op {
                AggregateOp::Sum => values.iter().sum(),
                AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
                AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                AggregateOp::Count => unreachable!("handled above"),
            }
        })
        .await
    }

    /// One 1-based page of records.
    pub async fn paginate(&self, page: usize, limit: usize) -> Result<Page, ValetError> {
        self.with_records(move |records| {
            let total = records.len();
            let limit = limit.max(1);
            let pages = total.div_ceil(limit);
            let page = page.max(1);
            let start = (page - 1).saturating_mul(limit);
            let items = records
                .iter()
                .skip(start)
                .take(limit)
                .cloned()
                .collect();
            Page {
                items,
                total,
                page,
                pages,
            }
        })
        .await
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("_id").and_then(Value::as_str)
}

fn matches_filter(record: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(key, expected)| record.get(key) == Some(expected))
}

fn apply_patch(record: &mut Value, patch: Map<String, Value>) {
    if let Value::Object(fields) = record {
        for (key, value) in patch {
            if key != "_id" {
                fields.insert(key, value);
            }
        }
    }
}
