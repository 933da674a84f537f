//! Per-model generation parameters
//!
//! The store keeps one [`ParameterSet`] per known model. Sets are created with
//! compiled defaults the first time a model is referenced, mutated by
//! validated all-or-nothing updates, and restored by reset. When a directory
//! is configured, every committed change is written through to
//! `<model-id>.json` before it becomes visible.

mod schema;
mod set;

pub use schema::{lookup, FieldKind, FieldSpec, FIELDS};
pub use set::{GenerationParams, ParameterSet};

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// On-disk layout of a persisted parameter set
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredParams {
    parameters: GenerationParams,
    last_updated: DateTime<Utc>,
}

/// Thread-safe parameter store
///
/// Each model's set sits in its own map shard, so updates for one model never
/// wait on reads of another.
pub struct ParameterStore {
    sets: DashMap<String, ParameterSet>,
    dir: Option<PathBuf>,
}

impl ParameterStore {
    /// Store without persistence
    pub fn in_memory() -> Self {
        Self {
            sets: DashMap::new(),
            dir: None,
        }
    }

    /// Store that writes through to `dir`
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            sets: DashMap::new(),
            dir: Some(dir),
        })
    }

    /// Build from an optional directory
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::persistent(dir),
            None => Ok(Self::in_memory()),
        }
    }

    /// Make sure `model_id` has a parameter set, creating defaults on first use
    ///
    /// A previously persisted set is restored instead of the defaults.
    pub fn register(&self, model_id: &str) -> Result<ParameterSet> {
        if let Some(existing) = self.sets.get(model_id) {
            return Ok(existing.value().clone());
        }
        let restored = self.restore(model_id)?;
        let entry = self.sets.entry(model_id.to_string()).or_insert(restored);
        Ok(entry.value().clone())
    }

    /// Is `model_id` known to the store
    pub fn contains(&self, model_id: &str) -> bool {
        self.sets.contains_key(model_id)
    }

    /// Current parameter set for `model_id`
    pub fn get(&self, model_id: &str) -> Result<ParameterSet> {
        self.sets
            .get(model_id)
            .map(|set| set.value().clone())
            .ok_or_else(|| Error::NotFound(model_id.to_string()))
    }

    /// Merge `patch` into the stored set
    ///
    /// Every field is validated before anything changes; the first invalid
    /// or unknown field rejects the whole batch.
    pub fn update(&self, model_id: &str, patch: &Map<String, Value>) -> Result<ParameterSet> {
        let mut entry = self
            .sets
            .get_mut(model_id)
            .ok_or_else(|| Error::NotFound(model_id.to_string()))?;

        let parameters = entry.parameters.patched(patch)?;
        let next = ParameterSet {
            model_id: model_id.to_string(),
            parameters,
            last_updated: Utc::now(),
        };
        self.persist(&next)?;
        *entry = next.clone();

        tracing::info!(
            model_id,
            fields = ?patch.keys().collect::<Vec<_>>(),
            "parameters updated"
        );
        Ok(next)
    }

    /// Replace the stored set with compiled defaults
    pub fn reset(&self, model_id: &str) -> Result<ParameterSet> {
        let mut entry = self
            .sets
            .get_mut(model_id)
            .ok_or_else(|| Error::NotFound(model_id.to_string()))?;

        let next = ParameterSet::defaults(model_id);
        self.persist(&next)?;
        *entry = next.clone();

        tracing::info!(model_id, "parameters reset to defaults");
        Ok(next)
    }

    /// Parameters for a single call: the stored set plus per-request overrides
    ///
    /// Overrides are validated like an update but never stored.
    pub fn effective(
        &self,
        model_id: &str,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<GenerationParams> {
        let stored = self.get(model_id)?.parameters;
        match overrides {
            Some(patch) if !patch.is_empty() => stored.patched(patch),
            _ => Ok(stored),
        }
    }

    fn path_for(&self, model_id: &str) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if model_id.is_empty()
            || model_id.contains(['/', '\\'])
            || model_id == "."
            || model_id == ".."
        {
            return Err(Error::validation("modelId", "not usable as a file name"));
        }
        Ok(Some(dir.join(format!("{model_id}.json"))))
    }

    fn restore(&self, model_id: &str) -> Result<ParameterSet> {
        let Some(path) = self.path_for(model_id)? else {
            return Ok(ParameterSet::defaults(model_id));
        };
        if !path.exists() {
            return Ok(ParameterSet::defaults(model_id));
        }

        let content = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<StoredParams>(&content) {
            Ok(stored) if stored.parameters.validate().is_ok() => Ok(ParameterSet {
                model_id: model_id.to_string(),
                parameters: stored.parameters,
                last_updated: stored.last_updated,
            }),
            Ok(_) => {
                tracing::warn!(
                    "persisted parameters for {} are out of range, using defaults",
                    model_id
                );
                Ok(ParameterSet::defaults(model_id))
            }
            Err(e) => {
                tracing::warn!(
                    "unreadable parameters file {}: {}, using defaults",
                    path.display(),
                    e
                );
                Ok(ParameterSet::defaults(model_id))
            }
        }
    }

    fn persist(&self, set: &ParameterSet) -> Result<()> {
        let Some(path) = self.path_for(&set.model_id)? else {
            return Ok(());
        };
        let stored = StoredParams {
            parameters: set.parameters.clone(),
            last_updated: set.last_updated,
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&stored)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("patch must be an object"),
        }
    }

    #[test]
    fn test_get_unknown_model_is_not_found() {
        let store = ParameterStore::in_memory();
        assert!(matches!(store.get("ghost"), Err(Error::NotFound(_))));
        assert!(matches!(
            store.update("ghost", &patch(json!({"temperature": 0.5}))),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.reset("ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_register_creates_defaults_once() {
        let store = ParameterStore::in_memory();
        let first = store.register("m").unwrap();
        assert_eq!(first.parameters, GenerationParams::default());

        store.update("m", &patch(json!({"topK": 7}))).unwrap();
        let again = store.register("m").unwrap();
        assert_eq!(again.parameters.top_k, 7);
    }

    #[test]
    fn test_update_with_one_invalid_field_changes_nothing() {
        let store = ParameterStore::in_memory();
        let before = store.register("m").unwrap();

        let err = store
            .update(
                "m",
                &patch(json!({"temperature": 0.3, "topK": 500, "doSample": false})),
            )
            .unwrap_err();
        match err {
            Error::Validation { field, .. } => assert_eq!(field, "topK"),
            other => panic!("unexpected error: {other:?}"),
        }

        let after = store.get("m").unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_update_touches_last_updated() {
        let store = ParameterStore::in_memory();
        let before = store.register("m").unwrap();
        let after = store
            .update("m", &patch(json!({"maxLength": 256})))
            .unwrap();
        assert!(after.last_updated >= before.last_updated);
        assert_eq!(after.parameters.max_length, 256);
    }

    #[test]
    fn test_reset_always_yields_defaults() {
        let store = ParameterStore::in_memory();
        store.register("m").unwrap();
        store
            .update("m", &patch(json!({"temperature": 1.9, "numBeams": 4})))
            .unwrap();
        store
            .update("m", &patch(json!({"eosTokenId": 2, "earlyStopping": true})))
            .unwrap();

        let first = store.reset("m").unwrap();
        assert_eq!(first.parameters, GenerationParams::default());
        let second = store.reset("m").unwrap();
        assert_eq!(second.parameters, GenerationParams::default());
    }

    #[test]
    fn test_overrides_are_not_persisted() {
        let store = ParameterStore::in_memory();
        store.register("m").unwrap();
        let effective = store
            .effective("m", Some(&patch(json!({"temperature": 0.1}))))
            .unwrap();
        assert_eq!(effective.temperature, 0.1);
        assert_eq!(store.get("m").unwrap().parameters.temperature, 1.0);
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let store = ParameterStore::in_memory();
        store.register("m").unwrap();
        assert!(matches!(
            store.effective("m", Some(&patch(json!({"topP": 3.0})))),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_persistent_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ParameterStore::persistent(dir.path()).unwrap();
            store.register("mistral").unwrap();
            store
                .update("mistral", &patch(json!({"top_p": 0.5})))
                .unwrap();
        }
        assert!(dir.path().join("mistral.json").exists());

        let reopened = ParameterStore::persistent(dir.path()).unwrap();
        let restored = reopened.register("mistral").unwrap();
        assert_eq!(restored.parameters.top_p, 0.5);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let store = ParameterStore::persistent(dir.path()).unwrap();
        let set = store.register("broken").unwrap();
        assert_eq!(set.parameters, GenerationParams::default());
    }

    #[test]
    fn test_path_like_model_ids_are_rejected_when_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let store = ParameterStore::persistent(dir.path()).unwrap();
        assert!(matches!(
            store.register("../escape"),
            Err(Error::Validation { .. })
        ));
    }
}
