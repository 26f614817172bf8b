//! Migration Plans
//!
//! A declarative description of schema versions and namespace fixer chains,
//! loaded from JSON or TOML. Plans let the CLI (and hosts that prefer data
//! over code) build a [`SchemaChain`] and a [`Registry`] without writing Rust.
//!
//! ```json
//! {
//!   "schemas": [
//!     {"version": 1, "types": {"entity": {"kind": "choice", "choice": "entities"}},
//!      "choices": [{"kind": "entities", "register": {"Zombie": "remainder"}}]},
//!     {"version": 2, "parent": 1,
//!      "choices": [{"kind": "entities", "rename": [{"from": "Zombie", "to": "minecraft:zombie"}]}]}
//!   ],
//!   "namespaces": [
//!     {"name": "example", "target_version": 2,
//!      "fixers": [{"name": "rename", "version": 2, "type": "entity",
//!                  "rewrite": {"kind": "rename_by_table", "table": {"Zombie": "minecraft:zombie"}}}]}
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::config::FixerConfig;
use crate::error::{FixerError, Result};
use crate::fixer::{
    AddField, Fixer, FixerChain, RecordPath, RemoveField, RenameByTable, RenameField, Rewrite,
};
use crate::registry::Registry;
use crate::schema::{ChoiceKind, SchemaChain, SchemaId};
use crate::template::TypeTemplate;
use crate::version::DataVersion;

/// A complete migration plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationPlan {
    /// Schema versions in strictly increasing order
    #[serde(default)]
    pub schemas: Vec<SchemaDecl>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDecl {
    pub version: DataVersion,
    #[serde(default)]
    pub parent: Option<DataVersion>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeDecl>,
    #[serde(default)]
    pub choices: Vec<ChoiceDecl>,
}

/// How a schema version defines one logical type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDecl {
    Template {
        template: TypeTemplate,
        #[serde(default)]
        recursive: bool,
    },
    /// Tagged choice over a discriminator map
    Choice {
        choice: ChoiceKind,
        #[serde(default = "default_discriminator")]
        field: String,
    },
}

/// One version's changes to a discriminator map
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChoiceDecl {
    pub kind: ChoiceKind,
    /// Registered in declaration order
    #[serde(default, with = "ordered_templates")]
    pub register: Vec<(String, TypeTemplate)>,
    /// Applied in order, after registrations
    #[serde(default)]
    pub rename: Vec<RenameDecl>,
    /// Applied last
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameDecl {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NamespaceDecl {
    pub name: String,
    pub target_version: DataVersion,
    /// Record locations of logical types; unbound types live at the root
    #[serde(default)]
    pub bindings: Vec<BindingDecl>,
    #[serde(default)]
    pub fixers: Vec<FixerDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingDecl {
    #[serde(rename = "type")]
    pub logical_type: String,
    #[serde(default)]
    pub path: RecordPath,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixerDecl {
    pub name: String,
    /// Version key of the fixer's output schema
    pub version: DataVersion,
    #[serde(rename = "type")]
    pub logical_type: String,
    #[serde(default)]
    pub target: Option<String>,
    pub rewrite: RewriteDecl,
}

/// Declarative rewrite kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewriteDecl {
    RenameByTable {
        #[serde(default = "default_discriminator")]
        field: String,
        table: BTreeMap<String, String>,
    },
    AddField {
        field: String,
        value: Value,
    },
    RemoveField {
        field: String,
    },
    RenameField {
        from: String,
        to: String,
    },
}

fn default_discriminator() -> String {
    "id".to_string()
}

/// A `name -> template` table kept in declaration order
mod ordered_templates {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    use crate::template::TypeTemplate;

    pub fn serialize<S>(
        entries: &[(String, TypeTemplate)],
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (name, template) in entries {
            map.serialize_entry(name, template)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, TypeTemplate)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<(String, TypeTemplate)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of discriminators to templates")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, TypeTemplate>()? {
                    entries.push(entry);
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

impl RewriteDecl {
    fn build(&self) -> Arc<dyn Rewrite> {
        match self {
            Self::RenameByTable { field, table } => {
                Arc::new(RenameByTable::new(table.clone()).on_field(field.clone()))
            }
            Self::AddField { field, value } => {
                Arc::new(AddField::new(field.clone(), value.clone()))
            }
            Self::RemoveField { field } => Arc::new(RemoveField::new(field.clone())),
            Self::RenameField { from, to } => Arc::new(RenameField::new(from.clone(), to.clone())),
        }
    }
}

impl MigrationPlan {
    /// Load a plan; `.toml` files are read as TOML, everything else as JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Define every declared schema version and register its types and choices
    pub fn build_chain(&self) -> Result<SchemaChain> {
        let mut chain = SchemaChain::new();
        let mut ids: HashMap<DataVersion, SchemaId> = HashMap::new();

        for decl in &self.schemas {
            let parent = match decl.parent {
                Some(version) => Some(*ids.get(&version).ok_or_else(|| {
                    FixerError::InvalidPlan(format!(
                        "schema v{} names undeclared parent v{}",
                        decl.version, version
                    ))
                })?),
                None => None,
            };
            let id = chain.define_schema(decl.version, parent)?;
            ids.insert(decl.version, id);

            for (name, type_decl) in &decl.types {
                match type_decl {
                    TypeDecl::Template {
                        template,
                        recursive,
                    } => {
                        let template = template.clone();
                        chain.register_type(id, *recursive, name.clone(), move || {
                            template.clone()
                        })?;
                    }
                    TypeDecl::Choice { choice, field } => {
                        chain.register_choice_type(id, name.clone(), field.clone(), *choice)?;
                    }
                }
            }

            for deltas in &decl.choices {
                for (discriminator, template) in &deltas.register {
                    let template = template.clone();
                    chain.register_choice(id, deltas.kind, discriminator.clone(), move || {
                        template.clone()
                    })?;
                }
                for rename in &deltas.rename {
                    chain.rename_choice(id, deltas.kind, rename.from.clone(), rename.to.clone())?;
                }
                for discriminator in &deltas.remove {
                    chain.remove_choice(id, deltas.kind, discriminator.clone())?;
                }
            }
        }

        debug!(schemas = chain.len(), "built schema chain from plan");
        Ok(chain)
    }

    /// Build a registry holding every declared namespace.
    ///
    /// The schema chain must be free of reference errors. The registry is
    /// returned unlocked so hosts can add namespaces of their own.
    pub fn build_registry(&self, config: FixerConfig) -> Result<Registry> {
        let schemas = self.build_chain()?.into_shared();
        let diagnostics = schemas.validate()?;
        if let Some(first) = diagnostics.errors().next() {
            return Err(FixerError::InvalidPlan(format!(
                "schema chain has {} error(s), first: {}",
                diagnostics.errors().count(),
                first
            )));
        }

        let options = config.fix_options();
        let mut registry = Registry::with_config(config);
        for ns in &self.namespaces {
            let mut chain = FixerChain::new(schemas.clone()).with_options(options);
            for binding in &ns.bindings {
                chain.bind(binding.logical_type.clone(), binding.path.clone());
            }
            for decl in &ns.fixers {
                let output = schemas.by_version(decl.version).ok_or_else(|| {
                    FixerError::InvalidPlan(format!(
                        "fixer '{}' in namespace '{}' targets undeclared schema v{}",
                        decl.name, ns.name, decl.version
                    ))
                })?;
                let mut fixer = Fixer::from_shared(
                    decl.name.clone(),
                    output.id(),
                    decl.logical_type.clone(),
                    decl.rewrite.build(),
                );
                if let Some(target) = &decl.target {
                    fixer = fixer.targeting(target.clone());
                }
                chain.add_fixer(fixer)?;
            }
            registry.register_fixer(ns.name.clone(), ns.target_version, chain)?;
        }
        Ok(registry)
    }
}
