//! Fixers
//!
//! A fixer upgrades one logical type across one schema step. It walks a value
//! using the *input* schema's templates, finds every sub-value of its target
//! type (the whole value, list elements, compound-list entries, tagged-choice
//! branches, sub-values reached through references) and rewrites each one
//! bottom-up. The same walk first checks that the value actually has the
//! input schema's shape, so a mismatch aborts before anything is rewritten.
//! Walks keep their own work stacks; `max_depth` bounds template nesting, not
//! the thread's stack.

pub mod chain;
pub mod rewrite;

pub use chain::{FixerChain, RecordPath};
pub use rewrite::{
    AddField, FnRewrite, RemoveField, RenameByTable, RenameField, Rewrite, RewriteError,
};

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::{FixerError, Result};
use crate::schema::{Schema, SchemaChain, SchemaId};
use crate::template::{format_path, PathSegment, TypeTemplate};
use crate::version::DataVersion;
use rewrite::kind_of;

/// Default limit on template nesting while walking a value
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Traversal options shared by every fixer of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixOptions {
    /// Deepest template nesting a walk may reach before it is a mismatch
    pub max_depth: usize,
    /// Re-check the rewritten value against the output schema
    pub verify_output: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            verify_output: false,
        }
    }
}

// =============================================================================
// Fixer
// =============================================================================

/// A schema-aware transformation bound to one output schema version
#[derive(Clone)]
pub struct Fixer {
    name: String,
    output: SchemaId,
    logical_type: String,
    target: String,
    rewrite: Arc<dyn Rewrite>,
}

impl Fixer {
    /// A fixer producing `output` that rewrites every `logical_type` sub-value
    pub fn new<R>(
        name: impl Into<String>,
        output: SchemaId,
        logical_type: impl Into<String>,
        rewrite: R,
    ) -> Self
    where
        R: Rewrite + 'static,
    {
        Self::from_shared(name, output, logical_type, Arc::new(rewrite))
    }

    pub fn from_shared(
        name: impl Into<String>,
        output: SchemaId,
        logical_type: impl Into<String>,
        rewrite: Arc<dyn Rewrite>,
    ) -> Self {
        let logical_type = logical_type.into();
        Self {
            name: name.into(),
            output,
            target: logical_type.clone(),
            logical_type,
            rewrite,
        }
    }

    /// Walk values as `logical_type` but rewrite the sub-values of `target`.
    ///
    /// A chunk fixer renaming entity ids walks the chunk and rewrites every
    /// entity inside it.
    pub fn targeting(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> SchemaId {
        self.output
    }

    /// The type values are walked as
    pub fn logical_type(&self) -> &str {
        &self.logical_type
    }

    /// The type whose sub-values are rewritten
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The schema values are read with: the output schema's parent, or the
    /// output schema itself at the root of the chain
    pub fn input_schema<'a>(&self, chain: &'a SchemaChain) -> Result<Schema<'a>> {
        let output = chain.schema(self.output)?;
        Ok(output.parent().unwrap_or(output))
    }

    /// Check `value` against `input` and rewrite every target sub-value
    pub fn apply(&self, value: Value, input: Schema<'_>, output: Schema<'_>) -> Result<Value> {
        self.apply_with(value, input, output, &FixOptions::default())
    }

    pub fn apply_with(
        &self,
        value: Value,
        input: Schema<'_>,
        output: Schema<'_>,
        options: &FixOptions,
    ) -> Result<Value> {
        let types = reachable_types(input, &self.logical_type);
        let root = TypeTemplate::Reference(self.logical_type.clone());
        let mut walker = Walker::new(self, input, &types, output.version_key(), options.max_depth);
        walker.check(&root, &value)?;
        let fixed = walker.rewrite(&root, value)?;

        if options.verify_output {
            let output_types = reachable_types(output, &self.logical_type);
            let mut verifier = Walker::new(
                self,
                output,
                &output_types,
                output.version_key(),
                options.max_depth,
            );
            verifier.check(&root, &fixed)?;
        }

        trace!(
            fixer = %self.name,
            logical_type = %self.logical_type,
            from = input.version_key(),
            to = output.version_key(),
            "applied fixer"
        );
        Ok(fixed)
    }
}

impl fmt::Debug for Fixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixer")
            .field("name", &self.name)
            .field("output", &self.output)
            .field("logical_type", &self.logical_type)
            .field("target", &self.target)
            .field("rewrite", &self.rewrite.describe())
            .finish()
    }
}

// =============================================================================
// Walker
// =============================================================================

/// Templates reachable from one logical type, resolved before a walk starts
type TypeTable = HashMap<String, Arc<TypeTemplate>>;

fn reachable_types(schema: Schema<'_>, root: &str) -> TypeTable {
    let mut types = TypeTable::new();
    let mut pending = vec![root.to_string()];
    while let Some(name) = pending.pop() {
        if types.contains_key(&name) {
            continue;
        }
        // Unresolvable names fail once a value actually reaches them
        let Ok(template) = schema.resolve_type(&name) else {
            continue;
        };
        pending.extend(
            template
                .references()
                .into_iter()
                .filter(|r| !types.contains_key(*r))
                .map(str::to_string),
        );
        types.insert(name, template);
    }
    types
}

/// `Or` node and the value position it was tried at
type BranchKey = (usize, Vec<PathSegment>);

/// Which side of an `Or` matched at one position
#[derive(Debug, Clone)]
enum Branch {
    First,
    Second,
    Neither { path: String, reason: String },
}

enum CheckTask<'f, 'v> {
    Visit {
        template: &'f TypeTemplate,
        value: &'v Value,
        base: usize,
        segment: Option<PathSegment>,
        depth: usize,
    },
    /// Popped once the first branch of an `Or` matched completely
    First {
        key: BranchKey,
        second: &'f TypeTemplate,
        value: &'v Value,
        depth: usize,
    },
    /// Popped once the second branch matched completely
    Second { key: BranchKey },
}

enum RewriteTask<'f> {
    Visit {
        template: &'f TypeTemplate,
        value: Value,
        base: usize,
        segment: Option<PathSegment>,
        depth: usize,
    },
    /// Put rewritten children back into their fields
    Fields {
        map: Map<String, Value>,
        names: Vec<String>,
    },
    List { items: usize },
    /// Rebuild a compound list from rewritten `(key, value)` pairs
    Compound { entries: usize, len: usize },
    /// Hand a finished target value to the fixer's rewrite
    Target { len: usize },
}

/// Split off the last `n` finished values, in order
fn take_last(done: &mut Vec<Value>, n: usize) -> Vec<Value> {
    let at = done.len().saturating_sub(n);
    done.split_off(at)
}

/// One traversal of one value.
///
/// Both passes run on explicit work stacks, so nesting depth costs heap
/// rather than thread stack. `Or` outcomes found while checking are kept per
/// position and reused by the rewrite pass.
struct Walker<'s, 'f> {
    fixer: &'f Fixer,
    schema: Schema<'s>,
    types: &'f TypeTable,
    output_version: DataVersion,
    max_depth: usize,
    path: Vec<PathSegment>,
    branches: HashMap<BranchKey, Branch>,
}

impl<'s, 'f> Walker<'s, 'f> {
    fn new(
        fixer: &'f Fixer,
        schema: Schema<'s>,
        types: &'f TypeTable,
        output_version: DataVersion,
        max_depth: usize,
    ) -> Self {
        Self {
            fixer,
            schema,
            types,
            output_version,
            max_depth,
            path: Vec::new(),
            branches: HashMap::new(),
        }
    }

    fn mismatch(&self, reason: impl Into<String>) -> FixerError {
        self.mismatch_at(format_path(&self.path), reason.into())
    }

    fn mismatch_at(&self, path: String, reason: String) -> FixerError {
        FixerError::StructuralMismatch {
            fixer: self.fixer.name.clone(),
            logical_type: self.fixer.logical_type.clone(),
            input_version: self.schema.version_key(),
            output_version: self.output_version,
            path,
            reason,
        }
    }

    fn enter(&self, depth: usize) -> Result<usize> {
        if depth >= self.max_depth {
            return Err(self.mismatch(format!(
                "value nests deeper than {} template levels",
                self.max_depth
            )));
        }
        Ok(depth + 1)
    }

    fn lookup(&self, name: &str) -> Result<&'f TypeTemplate> {
        let types: &'f TypeTable = self.types;
        match types.get(name) {
            Some(template) => Ok(template.as_ref()),
            None => Err(FixerError::UnknownLogicalType {
                name: name.to_string(),
                version: self.schema.version_key(),
            }),
        }
    }

    fn branch_key(&self, template: &TypeTemplate) -> BranchKey {
        (template as *const TypeTemplate as usize, self.path.clone())
    }

    fn expect_map<'v>(
        &self,
        value: &'v Value,
        template: &TypeTemplate,
    ) -> Result<&'v Map<String, Value>> {
        value.as_object().ok_or_else(|| {
            self.mismatch(format!(
                "{} expects a map, found {}",
                template.kind_name(),
                kind_of(value)
            ))
        })
    }

    fn expect_list<'v>(&self, value: &'v Value) -> Result<&'v Vec<Value>> {
        value
            .as_array()
            .ok_or_else(|| self.mismatch(format!("list expects a list, found {}", kind_of(value))))
    }

    fn tag_of<'v>(&self, map: &'v Map<String, Value>, field: &str) -> Result<&'v str> {
        match map.get(field) {
            Some(Value::String(tag)) => Ok(tag),
            Some(other) => Err(self.mismatch(format!(
                "discriminator '{}' is {}, not a string",
                field,
                kind_of(other)
            ))),
            None => Err(self.mismatch(format!("missing discriminator field '{}'", field))),
        }
    }

    /// Verify that `value` has the shape `template` describes
    fn check(&mut self, template: &'f TypeTemplate, value: &Value) -> Result<()> {
        let base = self.path.len();
        let mut stack = vec![CheckTask::Visit {
            template,
            value,
            base,
            segment: None,
            depth: 0,
        }];
        while let Some(task) = stack.pop() {
            let outcome = match task {
                CheckTask::Visit {
                    template,
                    value,
                    base,
                    segment,
                    depth,
                } => {
                    self.path.truncate(base);
                    self.path.extend(segment);
                    self.check_node(template, value, depth, &mut stack)
                }
                CheckTask::First { key, .. } => {
                    self.branches.insert(key, Branch::First);
                    Ok(())
                }
                CheckTask::Second { key } => {
                    self.branches.insert(key, Branch::Second);
                    Ok(())
                }
            };
            if let Err(err) = outcome {
                self.backtrack(&mut stack, err)?;
            }
        }
        self.path.truncate(base);
        Ok(())
    }

    /// Unwind to the innermost `Or` that can still try its second branch
    fn backtrack<'v>(
        &mut self,
        stack: &mut Vec<CheckTask<'f, 'v>>,
        err: FixerError,
    ) -> Result<()> {
        let (path, reason) = match err {
            FixerError::StructuralMismatch {
                ref path,
                ref reason,
                ..
            } => (path.clone(), reason.clone()),
            other => return Err(other),
        };
        while let Some(task) = stack.pop() {
            match task {
                CheckTask::First {
                    key,
                    second,
                    value,
                    depth,
                } => {
                    self.path.truncate(key.1.len());
                    let base = self.path.len();
                    stack.push(CheckTask::Second { key });
                    stack.push(CheckTask::Visit {
                        template: second,
                        value,
                        base,
                        segment: None,
                        depth,
                    });
                    return Ok(());
                }
                CheckTask::Second { key } => {
                    let failed = Branch::Neither {
                        path: path.clone(),
                        reason: reason.clone(),
                    };
                    self.branches.insert(key, failed);
                }
                CheckTask::Visit { .. } => {}
            }
        }
        Err(err)
    }

    fn check_node<'v>(
        &mut self,
        template: &'f TypeTemplate,
        value: &'v Value,
        depth: usize,
        stack: &mut Vec<CheckTask<'f, 'v>>,
    ) -> Result<()> {
        let depth = self.enter(depth)?;
        let base = self.path.len();
        match template {
            TypeTemplate::Remainder => {}
            TypeTemplate::Fields(fields) | TypeTemplate::OptionalFields(fields) => {
                let map = self.expect_map(value, template)?;
                if matches!(template, TypeTemplate::Fields(_)) {
                    if let Some(name) = fields.keys().find(|name| !map.contains_key(*name)) {
                        return Err(self.mismatch(format!("missing required field '{}'", name)));
                    }
                }
                for (name, field_template) in fields.iter().rev() {
                    if let Some(child) = map.get(name) {
                        stack.push(CheckTask::Visit {
                            template: field_template,
                            value: child,
                            base,
                            segment: Some(PathSegment::Field(name.clone())),
                            depth,
                        });
                    }
                }
            }
            TypeTemplate::List(element) => {
                for (i, child) in self.expect_list(value)?.iter().enumerate().rev() {
                    stack.push(CheckTask::Visit {
                        template: element.as_ref(),
                        value: child,
                        base,
                        segment: Some(PathSegment::Index(i)),
                        depth,
                    });
                }
            }
            TypeTemplate::CompoundList(key_template, value_template) => {
                let map = self.expect_map(value, template)?;
                for key in map.keys() {
                    self.path.push(PathSegment::Key(key.clone()));
                    self.check(key_template.as_ref(), &Value::String(key.clone()))?;
                    self.path.truncate(base);
                }
                for (key, child) in map.iter().rev() {
                    stack.push(CheckTask::Visit {
                        template: value_template.as_ref(),
                        value: child,
                        base,
                        segment: Some(PathSegment::Key(key.clone())),
                        depth,
                    });
                }
            }
            TypeTemplate::TaggedChoice { field, choices } => {
                let map = self.expect_map(value, template)?;
                let tag = self.tag_of(map, field)?;
                // Discriminators unknown to this schema pass through untouched
                if let Some(branch) = choices.get(tag) {
                    stack.push(CheckTask::Visit {
                        template: branch,
                        value,
                        base,
                        segment: Some(PathSegment::Tag(tag.to_string())),
                        depth,
                    });
                }
            }
            TypeTemplate::Reference(name) => {
                let resolved = self.lookup(name)?;
                stack.push(CheckTask::Visit {
                    template: resolved,
                    value,
                    base,
                    segment: None,
                    depth,
                });
            }
            TypeTemplate::Or(first, second) => {
                let key = self.branch_key(template);
                match self.branches.get(&key).cloned() {
                    Some(Branch::First | Branch::Second) => {}
                    Some(Branch::Neither { path, reason }) => {
                        return Err(self.mismatch_at(path, reason));
                    }
                    None => {
                        stack.push(CheckTask::First {
                            key,
                            second: second.as_ref(),
                            value,
                            depth,
                        });
                        stack.push(CheckTask::Visit {
                            template: first.as_ref(),
                            value,
                            base,
                            segment: None,
                            depth,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether `value` has the shape of `template`; other errors still propagate
    fn matches(&mut self, template: &'f TypeTemplate, value: &Value) -> Result<bool> {
        let len = self.path.len();
        let outcome = match self.check(template, value) {
            Ok(()) => Ok(true),
            Err(e) if e.is_structural_mismatch() => Ok(false),
            Err(e) => Err(e),
        };
        self.path.truncate(len);
        outcome
    }

    /// Rewrite every target sub-value, children before parents
    fn rewrite(&mut self, template: &'f TypeTemplate, value: Value) -> Result<Value> {
        let base = self.path.len();
        let mut tasks = vec![RewriteTask::Visit {
            template,
            value,
            base,
            segment: None,
            depth: 0,
        }];
        let mut done: Vec<Value> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                RewriteTask::Visit {
                    template,
                    value,
                    base,
                    segment,
                    depth,
                } => {
                    self.path.truncate(base);
                    self.path.extend(segment);
                    self.rewrite_node(template, value, depth, &mut tasks, &mut done)?;
                }
                RewriteTask::Fields { mut map, names } => {
                    let children = take_last(&mut done, names.len());
                    for (name, child) in names.into_iter().zip(children) {
                        if let Some(slot) = map.get_mut(&name) {
                            *slot = child;
                        }
                    }
                    done.push(Value::Object(map));
                }
                RewriteTask::List { items } => {
                    let items = take_last(&mut done, items);
                    done.push(Value::Array(items));
                }
                RewriteTask::Compound { entries, len } => {
                    self.path.truncate(len);
                    let mut pairs = take_last(&mut done, entries * 2).into_iter();
                    let mut rebuilt = Map::new();
                    while let (Some(key), Some(child)) = (pairs.next(), pairs.next()) {
                        let key = match key {
                            Value::String(key) => key,
                            other => {
                                return Err(self
                                    .mismatch(format!("key rewritten to {}", kind_of(&other))))
                            }
                        };
                        if rebuilt.contains_key(&key) {
                            return Err(self.mismatch(format!(
                                "rewritten key '{}' collides with another entry",
                                key
                            )));
                        }
                        rebuilt.insert(key, child);
                    }
                    done.push(Value::Object(rebuilt));
                }
                RewriteTask::Target { len } => {
                    self.path.truncate(len);
                    let inner = done.pop().unwrap_or_default();
                    let fixed = self
                        .fixer
                        .rewrite
                        .rewrite(inner)
                        .map_err(|e| self.mismatch(e.to_string()))?;
                    done.push(fixed);
                }
            }
        }
        self.path.truncate(base);
        Ok(done.pop().unwrap_or_default())
    }

    fn rewrite_node(
        &mut self,
        template: &'f TypeTemplate,
        value: Value,
        depth: usize,
        tasks: &mut Vec<RewriteTask<'f>>,
        done: &mut Vec<Value>,
    ) -> Result<()> {
        let depth = self.enter(depth)?;
        let base = self.path.len();
        match template {
            TypeTemplate::Remainder => done.push(value),
            TypeTemplate::Fields(fields) | TypeTemplate::OptionalFields(fields) => {
                let mut map = match value {
                    Value::Object(map) => map,
                    other => {
                        return Err(self.mismatch(format!(
                            "{} expects a map, found {}",
                            template.kind_name(),
                            kind_of(&other)
                        )))
                    }
                };
                let mut names = Vec::new();
                let mut children = Vec::new();
                for (name, field_template) in fields {
                    if let Some(slot) = map.get_mut(name) {
                        names.push(name.clone());
                        children.push(RewriteTask::Visit {
                            template: field_template,
                            value: std::mem::take(slot),
                            base,
                            segment: Some(PathSegment::Field(name.clone())),
                            depth,
                        });
                    }
                }
                tasks.push(RewriteTask::Fields { map, names });
                tasks.extend(children.into_iter().rev());
            }
            TypeTemplate::List(element) => {
                let items = match value {
                    Value::Array(items) => items,
                    other => {
                        return Err(
                            self.mismatch(format!("list expects a list, found {}", kind_of(&other)))
                        )
                    }
                };
                tasks.push(RewriteTask::List { items: items.len() });
                tasks.extend(items.into_iter().enumerate().rev().map(|(i, child)| {
                    RewriteTask::Visit {
                        template: element.as_ref(),
                        value: child,
                        base,
                        segment: Some(PathSegment::Index(i)),
                        depth,
                    }
                }));
            }
            TypeTemplate::CompoundList(key_template, value_template) => {
                let map = match value {
                    Value::Object(map) => map,
                    other => {
                        return Err(self.mismatch(format!(
                            "compound_list expects a map, found {}",
                            kind_of(&other)
                        )))
                    }
                };
                tasks.push(RewriteTask::Compound {
                    entries: map.len(),
                    len: base,
                });
                let mut children = Vec::with_capacity(map.len() * 2);
                for (key, child) in map {
                    let segment = PathSegment::Key(key.clone());
                    children.push(RewriteTask::Visit {
                        template: key_template.as_ref(),
                        value: Value::String(key),
                        base,
                        segment: Some(segment.clone()),
                        depth,
                    });
                    children.push(RewriteTask::Visit {
                        template: value_template.as_ref(),
                        value: child,
                        base,
                        segment: Some(segment),
                        depth,
                    });
                }
                tasks.extend(children.into_iter().rev());
            }
            TypeTemplate::TaggedChoice { field, choices } => {
                let tag = self.tag_of(self.expect_map(&value, template)?, field)?.to_string();
                match choices.get(&tag) {
                    Some(branch) => tasks.push(RewriteTask::Visit {
                        template: branch,
                        value,
                        base,
                        segment: Some(PathSegment::Tag(tag)),
                        depth,
                    }),
                    None => done.push(value),
                }
            }
            TypeTemplate::Reference(name) => {
                let resolved = self.lookup(name)?;
                if *name == self.fixer.target {
                    tasks.push(RewriteTask::Target { len: base });
                }
                tasks.push(RewriteTask::Visit {
                    template: resolved,
                    value,
                    base,
                    segment: None,
                    depth,
                });
            }
            TypeTemplate::Or(first, second) => {
                let key = self.branch_key(template);
                let branch = match self.branches.get(&key).cloned() {
                    Some(Branch::First) => first,
                    Some(Branch::Second) => second,
                    Some(Branch::Neither { path, reason }) => {
                        return Err(self.mismatch_at(path, reason))
                    }
                    None => {
                        if self.matches(first.as_ref(), &value)? {
                            first
                        } else {
                            second
                        }
                    }
                };
                tasks.push(RewriteTask::Visit {
                    template: branch.as_ref(),
                    value,
                    base,
                    segment: None,
                    depth,
                });
            }
        }
        Ok(())
    }
}
