//! Output schemas and the label registry used by graph nodes.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A structured output a provider can be asked to produce.
///
/// Deserialization covers the shape of the output. [`check`](Self::check)
/// covers the rules a JSON schema cannot express well, such as numeric
/// ranges or cross-field consistency.
///
/// Put an open-ended `reasoning` field first in implementing structs: the
/// generated instruction keeps declaration order, and models that write
/// their reasoning before the answer produce better answers.
pub trait OutputSchema: DeserializeOwned + JsonSchema + Send + 'static {
    /// Applies semantic rules after deserialization.
    ///
    /// # Errors
    ///
    /// Returns a description of the violated rule. The text is shown to the
    /// provider verbatim on the next attempt.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Renders the JSON schema of `T` as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the schema cannot be serialized.
pub fn schema_json<T: JsonSchema>() -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&schemars::schema_for!(T))
}

/// Parses and checks a candidate JSON object.
///
/// # Errors
///
/// Returns the deserialization or [`OutputSchema::check`] error text.
pub fn parse_output<T: OutputSchema>(candidate: &str) -> Result<T, String> {
    let value: T = serde_json::from_str(candidate).map_err(|e| e.to_string())?;
    value.check()?;
    Ok(value)
}

/// Checks an already-parsed value against `T`.
///
/// # Errors
///
/// Returns the deserialization or [`OutputSchema::check`] error text.
pub fn validate_value<T: OutputSchema>(value: &serde_json::Value) -> Result<(), String> {
    let parsed: T = serde::Deserialize::deserialize(value).map_err(|e| e.to_string())?;
    parsed.check()
}

type Validator = Arc<dyn Fn(&serde_json::Value) -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
struct Entry {
    validator: Validator,
    type_name: &'static str,
}

/// Maps `output_schema` labels to validators.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    entries: BTreeMap<String, Entry>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `label`, replacing any previous entry.
    pub fn register<T: OutputSchema>(&mut self, label: impl Into<String>) -> &mut Self {
        self.entries.insert(
            label.into(),
            Entry {
                validator: Arc::new(validate_value::<T>),
                type_name: std::any::type_name::<T>(),
            },
        );
        self
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_schema<T: OutputSchema>(mut self, label: impl Into<String>) -> Self {
        self.register::<T>(label);
        self
    }

    /// Returns true if `label` is registered.
    #[must_use]
    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    /// Returns the registered labels in sorted order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns the number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no schemas are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validates a node output against the schema registered under `label`.
    ///
    /// # Errors
    ///
    /// Returns the validation error text, or a message naming the label if
    /// it is not registered.
    pub fn validate(&self, label: &str, value: &serde_json::Value) -> Result<(), String> {
        let entry = self
            .entries
            .get(label)
            .ok_or_else(|| format!("output schema '{label}' is not registered"))?;
        (entry.validator)(value)
            .map_err(|e| format!("output does not match schema '{label}': {e}"))
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(label, e)| (label, e.type_name)))
            .finish()
    }
}
