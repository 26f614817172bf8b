//! Fixer Chains
//!
//! The ordered fixers of one namespace, grouped by the logical type they walk.
//! Applying a chain folds the fixers whose output version lies in
//! `(from, to]` over a value, oldest first.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use super::{FixOptions, Fixer};
use crate::error::{FixerError, Result};
use crate::schema::SchemaChain;
use crate::version::DataVersion;

// =============================================================================
// Record paths
// =============================================================================

/// Where a logical type lives inside a top-level record.
///
/// Written as dotted field names (`Level.Entities`); `$` or an empty string
/// is the record itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordPath(Vec<String>);

impl RecordPath {
    /// The record root
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new<S, I>(segments: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = S>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn get<'v>(&self, record: &'v Value) -> Option<&'v Value> {
        self.0.iter().try_fold(record, |value, seg| value.get(seg))
    }

    pub fn get_mut<'v>(&self, record: &'v mut Value) -> Option<&'v mut Value> {
        self.0.iter().try_fold(record, |value, seg| value.get_mut(seg))
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "$")
        } else {
            write!(f, "{}", self.0.join("."))
        }
    }
}

impl FromStr for RecordPath {
    type Err = FixerError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "$" {
            return Ok(Self::root());
        }
        let segments: Vec<&str> = s.split('.').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(FixerError::InvalidPlan(format!("invalid record path '{}'", s)));
        }
        Ok(Self::new(segments))
    }
}

impl TryFrom<String> for RecordPath {
    type Error = FixerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<RecordPath> for String {
    fn from(path: RecordPath) -> Self {
        path.to_string()
    }
}

// =============================================================================
// Fixer Chain
// =============================================================================

struct Lane {
    logical_type: String,
    path: RecordPath,
    /// Sorted by output version; equal versions keep insertion order
    fixers: Vec<(DataVersion, Fixer)>,
}

/// Ordered fixers of one namespace
pub struct FixerChain {
    schemas: Arc<SchemaChain>,
    lanes: Vec<Lane>,
    options: FixOptions,
}

impl FixerChain {
    pub fn new(schemas: Arc<SchemaChain>) -> Self {
        Self {
            schemas,
            lanes: Vec::new(),
            options: FixOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FixOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &FixOptions {
        &self.options
    }

    pub fn schemas(&self) -> &Arc<SchemaChain> {
        &self.schemas
    }

    /// Bind a logical type to the part of the record it describes
    pub fn bind(&mut self, logical_type: impl Into<String>, path: RecordPath) -> &mut Self {
        let logical_type = logical_type.into();
        self.lane_mut(&logical_type).path = path;
        self
    }

    /// Append a fixer.
    ///
    /// Its output schema must belong to this chain's schemas and both its
    /// walked and target types must resolve in its input schema.
    pub fn add_fixer(&mut self, fixer: Fixer) -> Result<&mut Self> {
        let output = self.schemas.schema(fixer.output())?;
        let input = fixer.input_schema(&self.schemas)?;
        input.resolve_type(fixer.logical_type())?;
        input.resolve_type(fixer.target())?;

        let version = output.version_key();
        debug!(
            fixer = %fixer.name(),
            logical_type = %fixer.logical_type(),
            version,
            "added fixer"
        );
        let lane = self.lane_mut(fixer.logical_type());
        let at = lane.fixers.partition_point(|(v, _)| *v <= version);
        lane.fixers.insert(at, (version, fixer));
        Ok(self)
    }

    /// Builder form of [`FixerChain::add_fixer`]
    pub fn with_fixer(mut self, fixer: Fixer) -> Result<Self> {
        self.add_fixer(fixer)?;
        Ok(self)
    }

    /// Logical types in the order they were first bound or given a fixer
    pub fn logical_types(&self) -> impl Iterator<Item = &str> {
        self.lanes.iter().map(|l| l.logical_type.as_str())
    }

    pub fn binding(&self, logical_type: &str) -> Option<&RecordPath> {
        self.lane(logical_type).map(|l| &l.path)
    }

    /// Types with their bindings, in application order
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &RecordPath)> {
        self.lanes.iter().map(|l| (l.logical_type.as_str(), &l.path))
    }

    pub fn fixers(&self, logical_type: &str) -> impl Iterator<Item = &Fixer> {
        self.lane(logical_type)
            .into_iter()
            .flat_map(|l| l.fixers.iter().map(|(_, f)| f))
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(|l| l.fixers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest output version of any fixer
    pub fn latest_version(&self) -> Option<DataVersion> {
        self.lanes
            .iter()
            .filter_map(|l| l.fixers.last().map(|(v, _)| *v))
            .max()
    }

    /// Upgrade one value of `logical_type` from version `from` to `to`.
    ///
    /// Returns the value unchanged when `from >= to` or no fixer applies.
    pub fn apply(
        &self,
        logical_type: &str,
        value: Value,
        from: DataVersion,
        to: DataVersion,
    ) -> Result<Value> {
        if from >= to {
            return Ok(value);
        }
        let Some(lane) = self.lane(logical_type) else {
            return Ok(value);
        };

        lane.fixers
            .iter()
            .filter(|(version, _)| *version > from && *version <= to)
            .try_fold(value, |value, (_, fixer)| {
                let input = fixer.input_schema(&self.schemas)?;
                let output = self.schemas.schema(fixer.output())?;
                fixer.apply_with(value, input, output, &self.options)
            })
    }

    fn lane(&self, logical_type: &str) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.logical_type == logical_type)
    }

    fn lane_mut(&mut self, logical_type: &str) -> &mut Lane {
        let index = match self.lanes.iter().position(|l| l.logical_type == logical_type) {
            Some(index) => index,
            None => {
                self.lanes.push(Lane {
                    logical_type: logical_type.to_string(),
                    path: RecordPath::root(),
                    fixers: Vec::new(),
                });
                self.lanes.len() - 1
            }
        };
        &mut self.lanes[index]
    }
}

impl fmt::Debug for FixerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for lane in &self.lanes {
            let names: Vec<_> = lane
                .fixers
                .iter()
                .map(|(v, fixer)| format!("v{} {}", v, fixer.name()))
                .collect();
            map.entry(&format!("{} @ {}", lane.logical_type, lane.path), &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::{AddField, RenameByTable};
    use crate::schema::{ChoiceKind, SchemaId};
    use crate::template::TypeTemplate;
    use serde_json::json;

    fn schemas() -> (Arc<SchemaChain>, [SchemaId; 3]) {
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(10, None).unwrap();
        let v2 = chain.define_schema(20, Some(v1)).unwrap();
        let v3 = chain.define_schema(30, Some(v2)).unwrap();
        chain.register_choice_type(v1, "entity", "id", ChoiceKind::Entities).unwrap();
        chain.register_choice(v1, ChoiceKind::Entities, "Zombie", TypeTemplate::remainder).unwrap();
        chain.rename_choice(v2, ChoiceKind::Entities, "Zombie", "minecraft:zombie").unwrap();
        (chain.into_shared(), [v1, v2, v3])
    }

    fn chain() -> FixerChain {
        let (schemas, [_, v2, v3]) = schemas();
        let mut chain = FixerChain::new(schemas);
        chain
            .add_fixer(Fixer::new("age", v3, "entity", AddField::new("Age", json!(0))))
            .unwrap()
            .add_fixer(Fixer::new(
                "rename",
                v2,
                "entity",
                RenameByTable::new([("Zombie", "minecraft:zombie")]),
            ))
            .unwrap();
        chain
    }

    #[test]
    fn test_fixers_sorted_by_version() {
        let chain = chain();
        let names: Vec<_> = chain.fixers("entity").map(|f| f.name()).collect();
        assert_eq!(names, vec!["rename", "age"]);
        assert_eq!(chain.latest_version(), Some(30));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_apply_window() {
        let chain = chain();
        let record = json!({"id": "Zombie"});

        let full = chain.apply("entity", record.clone(), 10, 30).unwrap();
        assert_eq!(full, json!({"id": "minecraft:zombie", "Age": 0}));

        let partial = chain.apply("entity", record.clone(), 10, 20).unwrap();
        assert_eq!(partial, json!({"id": "minecraft:zombie"}));

        assert_eq!(chain.apply("entity", record.clone(), 30, 30).unwrap(), record);
        assert_eq!(chain.apply("entity", record.clone(), 40, 10).unwrap(), record);
        assert_eq!(chain.apply("chunk", record.clone(), 0, 30).unwrap(), record);
    }

    #[test]
    fn test_apply_composes() {
        let chain = chain();
        let record = json!({"id": "Zombie", "Health": 20});
        let stepwise = chain
            .apply("entity", record.clone(), 10, 20)
            .and_then(|v| chain.apply("entity", v, 20, 30))
            .unwrap();
        assert_eq!(stepwise, chain.apply("entity", record, 10, 30).unwrap());
    }

    #[test]
    fn test_add_fixer_validates_types() {
        let (schemas, [_, v2, _]) = schemas();
        let mut chain = FixerChain::new(schemas);
        let err = chain
            .add_fixer(Fixer::new("bad", v2, "chunk", AddField::new("x", json!(1))))
            .unwrap_err();
        assert!(matches!(err, FixerError::UnknownLogicalType { version: 10, .. }));
    }

    #[test]
    fn test_record_paths() {
        let path: RecordPath = "Level.Entities".parse().unwrap();
        assert_eq!(path.segments(), ["Level", "Entities"]);
        assert_eq!(path.to_string(), "Level.Entities");
        assert!("$".parse::<RecordPath>().unwrap().is_root());
        assert!("Level..Entities".parse::<RecordPath>().is_err());

        let mut record = json!({"Level": {"Entities": [1]}});
        assert_eq!(path.get(&record), Some(&json!([1])));
        *path.get_mut(&mut record).unwrap() = json!([]);
        assert_eq!(record, json!({"Level": {"Entities": []}}));
        assert!(RecordPath::new(["Missing"]).get(&record).is_none());
    }

    #[test]
    fn test_bindings_keep_order() {
        let mut chain = chain();
        chain.bind("chunk", "Level".parse().unwrap());
        chain.bind("entity", RecordPath::new(["Level", "Entities"]));
        let bound: Vec<_> = chain.bindings().map(|(t, p)| format!("{t}={p}")).collect();
        assert_eq!(bound, vec!["entity=Level.Entities", "chunk=Level"]);
    }
}
