//! Generation parameters and the per-model parameter set

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::schema::{self, FieldValue, FIELDS};
use crate::error::{Error, Result};

/// Effective generation parameters handed to the inference engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    /// Sampling temperature (higher = more random)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Top-k sampling cutoff
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Top-p nucleus sampling threshold
    #[serde(default = "default_top_p")]
    pub top_p: f64,

    /// Maximum number of tokens to generate
    #[serde(default = "default_max_length")]
    pub max_length: u32,

    /// Repetition penalty (1.0 = no penalty)
    #[serde(default = "default_penalty")]
    pub repetition_penalty: f64,

    #[serde(default = "default_do_sample")]
    pub do_sample: bool,

    #[serde(default = "default_num_beams")]
    pub num_beams: u32,

    #[serde(default = "default_penalty")]
    pub length_penalty: f64,

    #[serde(default)]
    pub early_stopping: bool,

    #[serde(default)]
    pub pad_token_id: Option<u32>,

    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

fn default_temperature() -> f64 {
    1.0
}

fn default_top_k() -> u32 {
    50
}

fn default_top_p() -> f64 {
    0.9
}

fn default_max_length() -> u32 {
    100
}

fn default_penalty() -> f64 {
    1.0
}

fn default_do_sample() -> bool {
    true
}

fn default_num_beams() -> u32 {
    1
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_k: default_top_k(),
            top_p: default_top_p(),
            max_length: default_max_length(),
            repetition_penalty: default_penalty(),
            do_sample: default_do_sample(),
            num_beams: default_num_beams(),
            length_penalty: default_penalty(),
            early_stopping: false,
            pad_token_id: None,
            eos_token_id: None,
        }
    }
}

impl GenerationParams {
    /// Return a copy with `patch` merged in, or the first invalid field
    ///
    /// `self` is never modified, so a failed patch leaves no trace.
    pub fn patched(&self, patch: &Map<String, Value>) -> Result<Self> {
        let mut next = self.clone();
        for (key, value) in patch {
            let spec = schema::lookup(key)
                .ok_or_else(|| Error::validation(key.as_str(), "unknown parameter"))?;
            let parsed = spec.parse(key, value)?;
            next.assign(spec.name, parsed);
        }
        Ok(next)
    }

    /// Check every field against the declared table
    pub fn validate(&self) -> Result<()> {
        let value = serde_json::to_value(self)?;
        let Value::Object(fields) = value else {
            return Err(Error::Serialization(
                "parameters did not serialize to an object".to_string(),
            ));
        };
        for spec in FIELDS {
            let field = fields.get(spec.name).unwrap_or(&Value::Null);
            spec.parse(spec.name, field)?;
        }
        Ok(())
    }

    /// Is greedy decoding requested
    pub fn is_greedy(&self) -> bool {
        !self.do_sample || self.temperature == 0.0
    }

    fn assign(&mut self, name: &str, value: FieldValue) {
        match (name, value) {
            ("temperature", FieldValue::Float(v)) => self.temperature = v,
            ("topK", FieldValue::Integer(v)) => self.top_k = v,
            ("topP", FieldValue::Float(v)) => self.top_p = v,
            ("maxLength", FieldValue::Integer(v)) => self.max_length = v,
            ("repetitionPenalty", FieldValue::Float(v)) => self.repetition_penalty = v,
            ("doSample", FieldValue::Bool(v)) => self.do_sample = v,
            ("numBeams", FieldValue::Integer(v)) => self.num_beams = v,
            ("lengthPenalty", FieldValue::Float(v)) => self.length_penalty = v,
            ("earlyStopping", FieldValue::Bool(v)) => self.early_stopping = v,
            ("padTokenId", FieldValue::OptionalInteger(v)) => self.pad_token_id = v,
            ("eosTokenId", FieldValue::OptionalInteger(v)) => self.eos_token_id = v,
            (name, value) => {
                // The schema table and this match are kept in lockstep.
                tracing::error!("parameter table mismatch for {}: {:?}", name, value);
            }
        }
    }
}

/// Parameters owned by one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    pub model_id: String,
    pub parameters: GenerationParams,
    pub last_updated: DateTime<Utc>,
}

impl ParameterSet {
    /// Compiled defaults for `model_id`, stamped now
    pub fn defaults(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            parameters: GenerationParams::default(),
            last_updated: Utc::now(),
        }
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
    fn test_defaults_are_valid() {
        GenerationParams::default().validate().unwrap();
    }

    #[test]
    fn test_patch_merges_only_supplied_fields() {
        let base = GenerationParams::default();
        let next = base
            .patched(&patch(json!({"temperature": 0.2, "top_k": 10})))
            .unwrap();
        assert_eq!(next.temperature, 0.2);
        assert_eq!(next.top_k, 10);
        assert_eq!(next.top_p, base.top_p);
        assert_eq!(next.max_length, base.max_length);
    }

    #[test]
    fn test_patch_with_unknown_field_fails() {
        let err = GenerationParams::default()
            .patched(&patch(json!({"beamWidth": 4})))
            .unwrap_err();
        match err {
            Error::Validation { field, .. } => assert_eq!(field, "beamWidth"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_catches_out_of_range_values() {
        let params = GenerationParams {
            top_p: 1.5,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(GenerationParams::default()).unwrap();
        assert!(value.get("repetitionPenalty").is_some());
        assert!(value.get("padTokenId").is_some());
    }

    #[test]
    fn test_greedy_detection() {
        let params = GenerationParams {
            do_sample: false,
            ..Default::default()
        };
        assert!(params.is_greedy());
        assert!(!GenerationParams::default().is_greedy());
    }
}
