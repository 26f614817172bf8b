//! Rewrite Rules
//!
//! The per-value transformation a [`Fixer`](super::Fixer) applies to every
//! sub-value of its target type. All rewrite kinds share one contract: take a
//! value, return the rewritten value, or fail instead of dropping data.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Why a rewrite refused a value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct RewriteError(String);

impl RewriteError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A value transformation bound into a fixer
pub trait Rewrite: Send + Sync {
    /// Rewrite one matched sub-value
    fn rewrite(&self, value: Value) -> Result<Value, RewriteError>;

    /// One-line description for logs and `Debug` output
    fn describe(&self) -> String;
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

fn expect_map(value: Value, rule: &str) -> Result<Map<String, Value>, RewriteError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RewriteError::new(format!(
            "{} expects a map, found {}",
            rule,
            kind_of(&other)
        ))),
    }
}

// =============================================================================
// Rename by table
// =============================================================================

/// Renames a discriminator through an exact-match lookup table.
///
/// Values missing from the table are left untouched, so applying the same
/// rename twice is the same as applying it once. Bare strings are renamed
/// directly; maps have their discriminator field renamed.
#[derive(Debug, Clone)]
pub struct RenameByTable {
    field: String,
    table: HashMap<String, String>,
}

impl RenameByTable {
    /// Rename the `id` discriminator
    pub fn new<K, V, I>(table: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            field: "id".to_string(),
            table: table.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Rename a different discriminator field
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Table lookup with identity fallback
    pub fn rename<'a>(&'a self, discriminator: &'a str) -> &'a str {
        self.table
            .get(discriminator)
            .map(String::as_str)
            .unwrap_or(discriminator)
    }
}

impl Rewrite for RenameByTable {
    fn rewrite(&self, value: Value) -> Result<Value, RewriteError> {
        match value {
            Value::String(s) => Ok(Value::String(self.rename(&s).to_string())),
            Value::Object(mut map) => {
                match map.get_mut(&self.field) {
                    Some(Value::String(s)) => {
                        if let Some(renamed) = self.table.get(s.as_str()) {
                            *s = renamed.clone();
                        }
                    }
                    Some(other) => {
                        return Err(RewriteError::new(format!(
                            "discriminator '{}' is {}, not a string",
                            self.field,
                            kind_of(other)
                        )))
                    }
                    None => {}
                }
                Ok(Value::Object(map))
            }
            other => Err(RewriteError::new(format!(
                "rename expects a string or a map, found {}",
                kind_of(&other)
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("rename '{}' ({} entries)", self.field, self.table.len())
    }
}

// =============================================================================
// Field edits
// =============================================================================

/// Adds a field with a default value when it is absent
#[derive(Debug, Clone)]
pub struct AddField {
    field: String,
    default: Value,
}

impl AddField {
    pub fn new(field: impl Into<String>, default: Value) -> Self {
        Self {
            field: field.into(),
            default,
        }
    }
}

impl Rewrite for AddField {
    fn rewrite(&self, value: Value) -> Result<Value, RewriteError> {
        let mut map = expect_map(value, "add field")?;
        map.entry(self.field.clone())
            .or_insert_with(|| self.default.clone());
        Ok(Value::Object(map))
    }

    fn describe(&self) -> String {
        format!("add '{}' = {}", self.field, self.default)
    }
}

/// Removes a field
#[derive(Debug, Clone)]
pub struct RemoveField {
    field: String,
}

impl RemoveField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Rewrite for RemoveField {
    fn rewrite(&self, value: Value) -> Result<Value, RewriteError> {
        let mut map = expect_map(value, "remove field")?;
        map.shift_remove(&self.field);
        Ok(Value::Object(map))
    }

    fn describe(&self) -> String {
        format!("remove '{}'", self.field)
    }
}

/// Renames a field in place, keeping its position
#[derive(Debug, Clone)]
pub struct RenameField {
    from: String,
    to: String,
}

impl RenameField {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl Rewrite for RenameField {
    fn rewrite(&self, value: Value) -> Result<Value, RewriteError> {
        let map = expect_map(value, "rename field")?;
        if !map.contains_key(&self.from) || self.from == self.to {
            return Ok(Value::Object(map));
        }
        if map.contains_key(&self.to) {
            return Err(RewriteError::new(format!(
                "cannot rename '{}' to '{}': target field already exists",
                self.from, self.to
            )));
        }
        let renamed = map
            .into_iter()
            .map(|(k, v)| if k == self.from { (self.to.clone(), v) } else { (k, v) })
            .collect();
        Ok(Value::Object(renamed))
    }

    fn describe(&self) -> String {
        format!("rename field '{}' -> '{}'", self.from, self.to)
    }
}

// =============================================================================
// Closures
// =============================================================================

/// Arbitrary transformation written as a closure
pub struct FnRewrite<F> {
    description: String,
    f: F,
}

impl<F> FnRewrite<F>
where
    F: Fn(Value) -> Result<Value, RewriteError> + Send + Sync,
{
    pub fn new(description: impl Into<String>, f: F) -> Self {
        Self {
            description: description.into(),
            f,
        }
    }
}

impl<F> Rewrite for FnRewrite<F>
where
    F: Fn(Value) -> Result<Value, RewriteError> + Send + Sync,
{
    fn rewrite(&self, value: Value) -> Result<Value, RewriteError> {
        (self.f)(value)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl<F> fmt::Debug for FnRewrite<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRewrite")
            .field("description", &self.description)
            .finish()
    }
}
