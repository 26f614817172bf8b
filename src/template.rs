//! Type Templates
//!
//! Structural descriptors of a logical type's shape. Templates describe where
//! typed sub-values live inside a record; they never describe scalars, which
//! are covered by [`TypeTemplate::Remainder`].
//!
//! Templates refer to other logical types only through
//! [`TypeTemplate::Reference`], which is resolved lazily against the schema
//! being traversed. That is what lets an entity carry passengers that are
//! entities themselves without the template being infinitely large.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// Type Template
// =============================================================================

/// Structural description of one logical type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTemplate {
    /// Opaque passthrough; matches any value
    Remainder,
    /// A map whose named fields must all be present
    Fields(BTreeMap<String, TypeTemplate>),
    /// A map whose named fields are typed when present
    OptionalFields(BTreeMap<String, TypeTemplate>),
    /// A homogeneous list
    List(Box<TypeTemplate>),
    /// A homogeneous map: every key matches the first template, every value the second
    CompoundList(Box<TypeTemplate>, Box<TypeTemplate>),
    /// A union dispatched on the string value of `field`
    TaggedChoice {
        field: String,
        choices: BTreeMap<String, TypeTemplate>,
    },
    /// Lazy link to another logical type of the same schema
    Reference(String),
    /// Either shape; the first that matches wins
    Or(Box<TypeTemplate>, Box<TypeTemplate>),
}

impl TypeTemplate {
    pub fn remainder() -> Self {
        Self::Remainder
    }

    pub fn fields<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TypeTemplate)>,
    {
        Self::Fields(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn optional_fields<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TypeTemplate)>,
    {
        Self::OptionalFields(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(element: TypeTemplate) -> Self {
        Self::List(Box::new(element))
    }

    pub fn compound_list(key: TypeTemplate, value: TypeTemplate) -> Self {
        Self::CompoundList(Box::new(key), Box::new(value))
    }

    pub fn tagged_choice<K, I>(field: impl Into<String>, choices: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, TypeTemplate)>,
    {
        Self::TaggedChoice {
            field: field.into(),
            choices: choices.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    pub fn or(first: TypeTemplate, second: TypeTemplate) -> Self {
        Self::Or(Box::new(first), Box::new(second))
    }

    /// Short name of the variant, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Remainder => "remainder",
            Self::Fields(_) => "fields",
            Self::OptionalFields(_) => "optional_fields",
            Self::List(_) => "list",
            Self::CompoundList(..) => "compound_list",
            Self::TaggedChoice { .. } => "tagged_choice",
            Self::Reference(_) => "reference",
            Self::Or(..) => "or",
        }
    }

    /// All logical type names this template links to
    pub fn references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out, false);
        out
    }

    /// Logical types reachable without descending into a child value.
    ///
    /// A cycle made only of these links would re-enter the same value forever,
    /// so reference analysis reports it.
    pub fn unguarded_references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_references(&mut out, true);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut BTreeSet<&'a str>, unguarded_only: bool) {
        match self {
            Self::Remainder => {}
            Self::Reference(name) => {
                out.insert(name.as_str());
            }
            Self::Fields(fields) | Self::OptionalFields(fields) => {
                if !unguarded_only {
                    for t in fields.values() {
                        t.collect_references(out, false);
                    }
                }
            }
            Self::List(element) => {
                if !unguarded_only {
                    element.collect_references(out, false);
                }
            }
            Self::CompoundList(key, value) => {
                if !unguarded_only {
                    key.collect_references(out, false);
                    value.collect_references(out, false);
                }
            }
            // A choice branch describes the same value as the choice itself
            Self::TaggedChoice { choices, .. } => {
                for t in choices.values() {
                    t.collect_references(out, unguarded_only);
                }
            }
            Self::Or(first, second) => {
                first.collect_references(out, unguarded_only);
                second.collect_references(out, unguarded_only);
            }
        }
    }
}

impl Default for TypeTemplate {
    fn default() -> Self {
        Self::Remainder
    }
}

impl fmt::Display for TypeTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remainder => write!(f, "_"),
            Self::Fields(fields) => write_fields(f, "", fields),
            Self::OptionalFields(fields) => write_fields(f, "?", fields),
            Self::List(element) => write!(f, "[{}]", element),
            Self::CompoundList(key, value) => write!(f, "{{{} => {}}}", key, value),
            Self::TaggedChoice { field, choices } => {
                write!(f, "choice({}: ", field)?;
                for (i, tag) in choices.keys().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", tag)?;
                }
                write!(f, ")")
            }
            Self::Reference(name) => write!(f, "@{}", name),
            Self::Or(first, second) => write!(f, "({} | {})", first, second),
        }
    }
}

fn write_fields(
    f: &mut fmt::Formatter<'_>,
    marker: &str,
    fields: &BTreeMap<String, TypeTemplate>,
) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (name, t)) in fields.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}{}: {}", name, marker, t)?;
    }
    write!(f, "}}")
}

// =============================================================================
// Value Paths
// =============================================================================

/// A step from a value to one of its typed sub-values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A named field of a map
    Field(String),
    /// A list element
    Index(usize),
    /// An entry of a compound list
    Key(String),
    /// The branch selected by a tagged choice
    Tag(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, ".{}", name),
            Self::Index(i) => write!(f, "[{}]", i),
            Self::Key(key) => write!(f, "{{{}}}", key),
            Self::Tag(tag) => write!(f, "<{}>", tag),
        }
    }
}

/// Format a path as a string
pub fn format_path(path: &[PathSegment]) -> String {
    if path.is_empty() {
        return String::from("<root>");
    }
    path.iter().map(|s| s.to_string()).collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> TypeTemplate {
        TypeTemplate::tagged_choice(
            "id",
            [
                (
                    "minecraft:pig",
                    TypeTemplate::optional_fields([(
                        "Passengers",
                        TypeTemplate::list(TypeTemplate::reference("entity")),
                    )]),
                ),
                (
                    "minecraft:witch",
                    TypeTemplate::fields([("HandItem", TypeTemplate::reference("item_stack"))]),
                ),
            ],
        )
    }

    #[test]
    fn test_references() {
        let entity = entity();
        let refs = entity.references();
        assert_eq!(refs.into_iter().collect::<Vec<_>>(), vec!["entity", "item_stack"]);
    }

    #[test]
    fn test_unguarded_references() {
        assert!(entity().unguarded_references().is_empty());

        let looping = TypeTemplate::or(TypeTemplate::reference("a"), TypeTemplate::remainder());
        assert_eq!(looping.unguarded_references().into_iter().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn test_serde_shape() {
        let template = TypeTemplate::fields([("Potion", TypeTemplate::reference("item_stack"))]);
        let json = serde_json::to_value(&template).unwrap();
        assert_eq!(json, serde_json::json!({"fields": {"Potion": {"reference": "item_stack"}}}));

        let back: TypeTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(back, template);

        let remainder: TypeTemplate = serde_json::from_str("\"remainder\"").unwrap();
        assert_eq!(remainder, TypeTemplate::Remainder);
    }

    #[test]
    fn test_display() {
        let t =
            TypeTemplate::fields([("Items", TypeTemplate::list(TypeTemplate::reference("item")))]);
        assert_eq!(t.to_string(), "{Items: [@item]}");
    }

    #[test]
    fn test_format_path() {
        assert_eq!(format_path(&[]), "<root>");
        let path = vec![
            PathSegment::Field("Passengers".into()),
            PathSegment::Index(0),
            PathSegment::Tag("minecraft:pig".into()),
        ];
        assert_eq!(format_path(&path), ".Passengers[0]<minecraft:pig>");
    }
}
