//! Reference Analysis
//!
//! Builds the graph of `Reference` links between the logical types visible
//! from one schema and computes strongly connected components. Cycles are
//! expected (entities ride entities) but must be declared recursive, and a
//! cycle whose links never descend into a child value would make traversal
//! re-enter the same value forever.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::Schema;
use crate::error::Result;
use crate::version::DataVersion;

// =============================================================================
// Diagnostics
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// `Reference` to a type no ancestor defines
    UnresolvedReference,
    /// Cycle that re-enters the same value without descending
    UnguardedRecursion,
    /// Cyclic type registered without the recursive flag
    UnflaggedRecursion,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnresolvedReference => "E001",
            Self::UnguardedRecursion => "E002",
            Self::UnflaggedRecursion => "W001",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::UnresolvedReference | Self::UnguardedRecursion => Severity::Error,
            Self::UnflaggedRecursion => Severity::Warning,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single diagnostic item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticItem {
    pub version: DataVersion,
    pub logical_type: String,
    pub code: DiagnosticCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] v{} {}: {}",
            self.code.severity(),
            self.code,
            self.version,
            self.logical_type,
            self.message
        )?;
        if !self.context.is_empty() {
            write!(f, " ({})", self.context.join(" -> "))?;
        }
        Ok(())
    }
}

/// Collected diagnostics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|d| d.code.severity() == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|d| d.code.severity() == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

// =============================================================================
// Analysis
// =============================================================================

/// A group of logical types that reference each other
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleGroup {
    pub members: Vec<String>,
    /// Single type referencing itself
    pub is_self_referential: bool,
}

/// Result of analyzing one schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceAnalysis {
    pub version: DataVersion,
    pub cycles: Vec<CycleGroup>,
    pub diagnostics: Diagnostics,
}

impl ReferenceAnalysis {
    /// Whether `name` takes part in any cycle
    pub fn is_cyclic(&self, name: &str) -> bool {
        self.cycles.iter().any(|c| c.members.iter().any(|m| m == name))
    }
}

/// Analyze the `Reference` graph of every type visible from `schema`
pub fn analyze_references(schema: Schema<'_>) -> Result<ReferenceAnalysis> {
    let version = schema.version_key();
    let names = schema.type_names();

    let mut graph: DiGraph<&str, ()> = DiGraph::with_capacity(names.len(), names.len() * 2);
    let mut unguarded: DiGraph<&str, ()> = DiGraph::with_capacity(names.len(), names.len());
    let mut indices: HashMap<&str, (NodeIndex, NodeIndex)> = HashMap::with_capacity(names.len());
    for &name in &names {
        indices.insert(name, (graph.add_node(name), unguarded.add_node(name)));
    }

    let mut diagnostics = Diagnostics::default();
    for &name in &names {
        let template = schema.resolve_type(name)?;
        let Some(&(from, from_unguarded)) = indices.get(name) else {
            continue;
        };
        let direct = template.unguarded_references();

        for target in template.references() {
            match indices.get(target) {
                Some(&(to, to_unguarded)) => {
                    graph.update_edge(from, to, ());
                    if direct.contains(target) {
                        unguarded.update_edge(from_unguarded, to_unguarded, ());
                    }
                }
                None => diagnostics.push(DiagnosticItem {
                    version,
                    logical_type: name.to_string(),
                    code: DiagnosticCode::UnresolvedReference,
                    message: format!("references undefined type '{}'", target),
                    context: Vec::new(),
                }),
            }
        }
    }

    let cycles = find_cycles(&graph);
    for cycle in &cycles {
        for member in &cycle.members {
            if !schema.is_recursive(member) {
                diagnostics.push(DiagnosticItem {
                    version,
                    logical_type: member.clone(),
                    code: DiagnosticCode::UnflaggedRecursion,
                    message: "type is cyclic but not registered as recursive".to_string(),
                    context: cycle.members.clone(),
                });
            }
        }
    }

    for cycle in find_cycles(&unguarded) {
        let Some(first) = cycle.members.first() else {
            continue;
        };
        diagnostics.push(DiagnosticItem {
            version,
            logical_type: first.clone(),
            code: DiagnosticCode::UnguardedRecursion,
            message: "cycle never descends into a child value".to_string(),
            context: cycle.members.clone(),
        });
    }

    Ok(ReferenceAnalysis {
        version,
        cycles,
        diagnostics,
    })
}

fn find_cycles(graph: &DiGraph<&str, ()>) -> Vec<CycleGroup> {
    let mut cycles: Vec<CycleGroup> = kosaraju_scc(graph)
        .into_iter()
        .filter_map(|scc| {
            let is_self_referential = match scc.as_slice() {
                [single] => graph.find_edge(*single, *single).is_some(),
                _ => false,
            };
            if scc.len() < 2 && !is_self_referential {
                return None;
            }
            let mut members: Vec<String> = scc
                .iter()
                .filter_map(|idx| graph.node_weight(*idx).map(|n| n.to_string()))
                .collect();
            members.sort();
            Some(CycleGroup {
                members,
                is_self_referential,
            })
        })
        .collect();
    cycles.sort_by(|a, b| a.members.cmp(&b.members));
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ChoiceKind, SchemaChain};
    use crate::template::TypeTemplate;

    fn passenger_chain(flag_recursive: bool) -> SchemaChain {
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(1, None).unwrap();
        chain.register_choice_type(v1, "entity", "id", ChoiceKind::Entities).unwrap();
        chain
            .register_choice(v1, ChoiceKind::Entities, "minecraft:pig", || {
                TypeTemplate::optional_fields([(
                    "Passengers",
                    TypeTemplate::list(TypeTemplate::reference("entity")),
                )])
            })
            .unwrap();
        chain
            .register_type(v1, flag_recursive, "item_stack", || {
                TypeTemplate::optional_fields([(
                    "tag",
                    TypeTemplate::optional_fields([(
                        "EntityTag",
                        TypeTemplate::reference("item_stack"),
                    )]),
                )])
            })
            .unwrap();
        chain
    }

    #[test]
    fn test_detects_cycles() {
        let chain = passenger_chain(true);
        let analysis = analyze_references(chain.latest().unwrap()).unwrap();

        assert_eq!(analysis.cycles.len(), 2);
        assert!(analysis.is_cyclic("entity"));
        assert!(analysis.cycles.iter().all(|c| c.is_self_referential));
        assert!(analysis.diagnostics.is_empty());
    }

    #[test]
    fn test_unflagged_recursion_is_warning() {
        let chain = passenger_chain(false);
        let diagnostics = chain.validate().unwrap();

        let warnings: Vec<_> = diagnostics.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, DiagnosticCode::UnflaggedRecursion);
        assert_eq!(warnings[0].logical_type, "item_stack");
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn test_unresolved_reference() {
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(1, None).unwrap();
        chain
            .register_type(v1, false, "chunk", || {
                TypeTemplate::fields([(
                    "Entities",
                    TypeTemplate::list(TypeTemplate::reference("entity")),
                )])
            })
            .unwrap();

        let diagnostics = chain.validate().unwrap();
        let errors: Vec<_> = diagnostics.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, DiagnosticCode::UnresolvedReference);
        assert!(errors[0].to_string().starts_with("error[E001] v1 chunk"));
    }

    #[test]
    fn test_unguarded_cycle() {
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(1, None).unwrap();
        chain
            .register_type(v1, true, "a", || {
                TypeTemplate::or(TypeTemplate::reference("b"), TypeTemplate::Remainder)
            })
            .unwrap();
        chain
            .register_type(v1, true, "b", || TypeTemplate::reference("a"))
            .unwrap();

        let diagnostics = chain.validate().unwrap();
        let errors: Vec<_> = diagnostics.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, DiagnosticCode::UnguardedRecursion);
        assert_eq!(errors[0].context, vec!["a".to_string(), "b".to_string()]);
    }
}
