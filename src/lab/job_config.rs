//! Job configuration and enumeration of its selectable variants.
//!
//! A [`JobConfig`] is a closed parameter map plus an ordered list of
//! [`SelectableField`]s. Only selectable fields are varied when exploring
//! alternative configurations; every other parameter is copied as is.
//!
//! Typed configurations implement [`TypedJobConfig`] and convert to and from
//! the parameter map through serde:
//!
//! ```
//! use convolab::lab::{JobConfig, SelectableField, TypedJobConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! #[serde(deny_unknown_fields)]
//! struct SentimentConfig {
//!     model: String,
//!     language: String,
//! }
//!
//! impl TypedJobConfig for SentimentConfig {
//!     fn selectable_fields() -> Vec<SelectableField> {
//!         vec![SelectableField::new("model", ["gpt-4o", "gpt-4o-mini"])]
//!     }
//! }
//!
//! let config = JobConfig::from_typed(&SentimentConfig {
//!     model: "gpt-4o".into(),
//!     language: "en".into(),
//! })
//! .unwrap();
//! assert_eq!(config.generate_configurations(true).len(), 1);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LabError;

/// A parameter whose value is drawn from a small closed set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectableField {
    pub name: String,
    /// Possible values in declaration order.
    pub options: Vec<Value>,
}

impl SelectableField {
    /// Creates a selectable field from any list of JSON-convertible options.
    pub fn new<I, V>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            name: name.into(),
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

/// A strongly-typed configuration that can be turned into a [`JobConfig`].
pub trait TypedJobConfig: Serialize + DeserializeOwned {
    /// Fields explored by [`JobConfig::generate_configurations`].
    fn selectable_fields() -> Vec<SelectableField> {
        Vec::new()
    }
}

/// Parameters handed to a job function on every invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    selectable: Vec<SelectableField>,
}

impl JobConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from a parameter map.
    pub fn from_params(params: Map<String, Value>) -> Self {
        Self {
            params,
            selectable: Vec::new(),
        }
    }

    /// Builds a configuration from a typed config and validates it.
    pub fn from_typed<T: TypedJobConfig>(config: &T) -> Result<Self, LabError> {
        let params = match serde_json::to_value(config)? {
            Value::Object(map) => map,
            other => {
                return Err(LabError::InvalidConfig(format!(
                    "typed config must serialize to an object, got {}",
                    other
                )))
            }
        };
        let config = Self {
            params,
            selectable: T::selectable_fields(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Deserializes the parameters back into a typed config.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, LabError> {
        Ok(serde_json::from_value(Value::Object(self.params.clone()))?)
    }

    /// Sets a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Declares a selectable field. If the parameter is not set yet it takes
    /// the first option.
    pub fn with_selectable(mut self, field: SelectableField) -> Self {
        if !self.params.contains_key(&field.name) {
            if let Some(first) = field.options.first() {
                self.params.insert(field.name.clone(), first.clone());
            }
        }
        self.selectable.retain(|f| f.name != field.name);
        self.selectable.push(field);
        self
    }

    /// Returns all parameters.
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Returns the selectable field declarations in order.
    pub fn selectable(&self) -> &[SelectableField] {
        &self.selectable
    }

    /// Returns a parameter.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Returns a string parameter.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Returns a required string parameter.
    pub fn require_str(&self, key: &str) -> Result<&str, LabError> {
        self.get_str(key)
            .ok_or_else(|| LabError::InvalidConfig(format!("missing string parameter '{}'", key)))
    }

    /// Deserializes a single parameter.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LabError> {
        match self.params.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Checks the selectable declarations against the parameters.
    ///
    /// # Errors
    ///
    /// Returns `LabError::InvalidConfig` if a field is declared twice, has no
    /// options, or its current value is not one of its options.
    pub fn validate(&self) -> Result<(), LabError> {
        for (i, field) in self.selectable.iter().enumerate() {
            if self.selectable[..i].iter().any(|f| f.name == field.name) {
                return Err(LabError::InvalidConfig(format!(
                    "selectable field '{}' declared twice",
                    field.name
                )));
            }
            if field.options.is_empty() {
                return Err(LabError::InvalidConfig(format!(
                    "selectable field '{}' has no options",
                    field.name
                )));
            }
            match self.params.get(&field.name) {
                Some(value) if field.options.contains(value) => {}
                Some(value) => {
                    return Err(LabError::InvalidConfig(format!(
                        "value {} of '{}' is not one of its options",
                        value, field.name
                    )))
                }
                None => {
                    return Err(LabError::InvalidConfig(format!(
                        "selectable field '{}' has no value",
                        field.name
                    )))
                }
            }
        }
        Ok(())
    }

    /// Current values of the selectable fields, in declaration order.
    pub fn combination(&self) -> Vec<Option<&Value>> {
        self.selectable
            .iter()
            .map(|f| self.params.get(&f.name))
            .collect()
    }

    /// Enumerates every combination of the selectable fields.
    ///
    /// Combinations are produced in lexicographic order over the declared
    /// field order and each field's option order, so the first field varies
    /// slowest. With `exclude_default` the current combination is skipped.
    /// Returns an empty list when there is at most one combination.
    pub fn generate_configurations(&self, exclude_default: bool) -> Vec<JobConfig> {
        if self.selectable.is_empty() || self.selectable.iter().any(|f| f.options.is_empty()) {
            return Vec::new();
        }
        let total: usize = self.selectable.iter().map(|f| f.options.len()).product();
        if total <= 1 {
            return Vec::new();
        }

        let current = self.combination();
        let mut configs = Vec::with_capacity(total);
        let mut indices = vec![0usize; self.selectable.len()];

        for _ in 0..total {
            let values: Vec<&Value> = self
                .selectable
                .iter()
                .zip(&indices)
                .map(|(field, &i)| &field.options[i])
                .collect();

            let is_default = values
                .iter()
                .zip(&current)
                .all(|(value, current)| Some(*value) == *current);

            if !(exclude_default && is_default) {
                let mut config = self.clone();
                for (field, value) in self.selectable.iter().zip(values) {
                    config.params.insert(field.name.clone(), value.clone());
                }
                configs.push(config);
            }

            // Advance the odometer, last field fastest.
            for pos in (0..indices.len()).rev() {
                indices[pos] += 1;
                if indices[pos] < self.selectable[pos].options.len() {
                    break;
                }
                indices[pos] = 0;
            }
        }

        configs
    }
}
