//! Knowledge store: structured key-value entries with partial-match query.
//!
//! Entries are keyed by `(category, key)` and hold arbitrary JSON payloads.
//! The whole store is one JSON document, `{category → {key → entry}}`, with
//! insertion-ordered maps so `list` and `query` walk entries in the order
//! they were created.

use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::storage::{DocumentStore, StorageResult};

/// Store filename under the workspace root.
pub const KNOWLEDGE_FILE: &str = ".knowledge-store.json";

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

type Categories = IndexMap<String, IndexMap<String, KnowledgeEntry>>;

/// Request record for the `knowledge` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeRequest {
    #[schemars(description = "One of: set, get, delete, list, query, categories")]
    pub action: String,
    #[schemars(description = "Entry category (set, get, delete, list, query)")]
    pub category: Option<String>,
    #[schemars(description = "Entry key (set, get, delete)")]
    pub key: Option<String>,
    #[schemars(description = "JSON payload to store (set)")]
    pub data: Option<Value>,
    #[schemars(description = "Free-form tags (set)")]
    pub tags: Option<Vec<String>>,
    #[schemars(
        description = "Field filters (query): string values match as case-insensitive \
                       substrings, anything else must be strictly equal"
    )]
    pub filter: Option<Map<String, Value>>,
    #[schemars(description = "Maximum entries returned (list, query; default 50)")]
    pub limit: Option<usize>,
}

pub struct KnowledgeStore {
    doc: DocumentStore<Categories>,
}

impl KnowledgeStore {
    pub fn new(workspace: &Path) -> Self {
        Self {
            doc: DocumentStore::new(workspace.join(KNOWLEDGE_FILE)),
        }
    }

    pub async fn execute(&self, req: KnowledgeRequest) -> StorageResult<Value> {
        match req.action.as_str() {
            "set" => self.set(req).await,
            "get" => Ok(self.get(req).await),
            "delete" => self.delete(req).await,
            "list" => Ok(self.list(req).await),
            "query" => Ok(self.query(req).await),
            "categories" => Ok(self.categories().await),
            other => Ok(json!({ "status": "error", "error": format!("unknown action: {other}") })),
        }
    }

    async fn set(&self, req: KnowledgeRequest) -> StorageResult<Value> {
        let (Some(category), Some(key)) = (req.category, req.key) else {
            return Ok(json!({ "status": "error", "error": "set requires category and key" }));
        };
        let Some(data) = req.data.filter(|d| !d.is_null()) else {
            return Ok(json!({ "status": "error", "error": "set requires data" }));
        };
        let tags = req.tags;

        self.doc
            .update(|categories| {
                let now = Utc::now();
                let entries = categories.entry(category.clone()).or_default();
                let status = match entries.get_mut(&key) {
                    Some(entry) => {
                        entry.data = data;
                        // Monotone even under clock adjustment.
                        entry.updated_at = entry.updated_at.max(now);
                        if tags.is_some() {
                            entry.tags = tags;
                        }
                        "updated"
                    }
                    None => {
                        entries.insert(
                            key.clone(),
                            KnowledgeEntry {
                                data,
                                created_at: now,
                                updated_at: now,
                                tags,
                            },
                        );
                        "created"
                    }
                };
                json!({ "status": status, "category": category, "key": key })
            })
            .await
    }

    async fn get(&self, req: KnowledgeRequest) -> Value {
        let (Some(category), Some(key)) = (req.category, req.key) else {
            return json!({ "status": "error", "error": "get requires category and key" });
        };
        let categories = self.doc.read().await;
        match categories.get(&category).and_then(|c| c.get(&key)) {
            Some(entry) => json!({
                "status": "ok",
                "category": category,
                "key": key,
                "data": entry.data,
                "createdAt": entry.created_at.to_rfc3339(),
                "updatedAt": entry.updated_at.to_rfc3339(),
                "tags": entry.tags,
            }),
            None => json!({ "status": "not_found", "category": category, "key": key }),
        }
    }

    async fn delete(&self, req: KnowledgeRequest) -> StorageResult<Value> {
        let (Some(category), Some(key)) = (req.category, req.key) else {
            return Ok(json!({ "status": "error", "error": "delete requires category and key" }));
        };
        self.doc
            .update(|categories| {
                let removed = match categories.get_mut(&category) {
                    Some(entries) => entries.shift_remove(&key).is_some(),
                    None => false,
                };
                if removed && categories.get(&category).is_some_and(|c| c.is_empty()) {
                    categories.shift_remove(&category);
                }
                let status = if removed { "deleted" } else { "not_found" };
                json!({ "status": status, "category": category, "key": key })
            })
            .await
    }

    async fn list(&self, req: KnowledgeRequest) -> Value {
        let Some(category) = req.category else {
            return json!({ "status": "error", "error": "list requires a category" });
        };
        let limit = req.limit.unwrap_or(DEFAULT_LIMIT);
        let categories = self.doc.read().await;
        let keys: Vec<Value> = categories
            .get(&category)
            .map(|entries| {
                entries
                    .iter()
                    .take(limit)
                    .map(|(key, entry)| {
                        json!({ "key": key, "updatedAt": entry.updated_at.to_rfc3339() })
                    })
                    .collect()
            })
            .unwrap_or_default();
        json!({ "status": "ok", "category": category, "count": keys.len(), "keys": keys })
    }

    /// Entries whose `data` object satisfies every filter pair. Traversal
    /// stops once `limit` matches have been collected.
    async fn query(&self, req: KnowledgeRequest) -> Value {
        let Some(category) = req.category else {
            return json!({ "status": "error", "error": "query requires a category" });
        };
        let filter = req.filter.unwrap_or_default();
        let limit = req.limit.unwrap_or(DEFAULT_LIMIT);

        let categories = self.doc.read().await;
        let mut results = Vec::new();
        if let Some(entries) = categories.get(&category) {
            for (key, entry) in entries {
                if results.len() >= limit {
                    break;
                }
                if matches_filter(&entry.data, &filter) {
                    results.push(json!({
                        "key": key,
                        "data": entry.data,
                        "createdAt": entry.created_at.to_rfc3339(),
                        "updatedAt": entry.updated_at.to_rfc3339(),
                    }));
                }
            }
        }
        json!({ "status": "ok", "category": category, "count": results.len(), "results": results })
    }

    async fn categories(&self) -> Value {
        let categories = self.doc.read().await;
        let listing: Vec<Value> = categories
            .iter()
            .map(|(name, entries)| json!({ "name": name, "count": entries.len() }))
            .collect();
        json!({ "status": "ok", "categories": listing })
    }
}

fn matches_filter(data: &Value, filter: &Map<String, Value>) -> bool {
    let Some(fields) = data.as_object() else {
        return false;
    };
    filter.iter().all(|(name, expected)| {
        let actual = fields.get(name);
        match expected.as_str() {
            Some(needle) => actual.is_some_and(|v| {
                string_form(v)
                    .to_lowercase()
                    .contains(&needle.to_lowercase())
            }),
            None => actual == Some(expected),
        }
    })
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
