//! Schema Chain
//!
//! An arena of schema versions. Each version holds the type overrides and
//! discriminator deltas it introduces plus a link to its parent; everything
//! else is inherited by walking the parent chain. Versions are created at
//! startup in strictly increasing key order and are read-only once the chain
//! is shared with fixers ([`SchemaChain::into_shared`]).
//!
//! ```text
//! v1 (root)  entity = choice(id), Zombie → {…}
//!   └─ v2    rename Zombie → minecraft:zombie
//!        └─ v3  item_stack = {…}            resolve(v3, entity) → v1's override,
//!                                             choices from v3's map
//! ```
//!
//! Materialized templates and discriminator maps are cached per schema, so
//! every lookup after the first is a map read.

pub mod analysis;
pub mod choice;

pub use analysis::{
    analyze_references, CycleGroup, DiagnosticCode, DiagnosticItem, Diagnostics,
    ReferenceAnalysis, Severity,
};
pub use choice::{ChoiceKind, DiscriminatorMap};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::error::{FixerError, Result};
use crate::template::TypeTemplate;
use crate::version::DataVersion;
use choice::ChoiceDeltas;

/// Deferred template constructor
pub type TemplateFn = Arc<dyn Fn() -> TypeTemplate + Send + Sync>;

/// Handle to a schema version inside a [`SchemaChain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(usize);

impl SchemaId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a logical type's template comes from
#[derive(Clone)]
enum TypeSource {
    Thunk(TemplateFn),
    /// A tagged choice over the resolving schema's discriminator map
    Choice { field: String, kind: ChoiceKind },
}

#[derive(Clone)]
struct TypeEntry {
    source: TypeSource,
    recursive: bool,
}

struct SchemaNode {
    version_key: DataVersion,
    parent: Option<SchemaId>,
    types: BTreeMap<String, TypeEntry>,
    choices: [ChoiceDeltas; 2],
    type_cache: RwLock<HashMap<String, Arc<TypeTemplate>>>,
    choice_cache: [OnceLock<Arc<DiscriminatorMap>>; 2],
}

impl SchemaNode {
    fn new(version_key: DataVersion, parent: Option<SchemaId>) -> Self {
        Self {
            version_key,
            parent,
            types: BTreeMap::new(),
            choices: Default::default(),
            type_cache: RwLock::new(HashMap::new()),
            choice_cache: Default::default(),
        }
    }

    fn clear_caches(&mut self) {
        self.type_cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.choice_cache = Default::default();
    }
}

// =============================================================================
// Schema Chain
// =============================================================================

/// All schema versions known to a set of producers
#[derive(Default)]
pub struct SchemaChain {
    nodes: Vec<SchemaNode>,
    sealed: bool,
}

impl SchemaChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new schema version.
    ///
    /// `version_key` must be greater than every key already defined.
    pub fn define_schema(
        &mut self,
        version_key: DataVersion,
        parent: Option<SchemaId>,
    ) -> Result<SchemaId> {
        self.ensure_open(&format!("schema v{}", version_key))?;
        if let Some(last) = self.nodes.last() {
            if version_key <= last.version_key {
                return Err(FixerError::InvalidSchemaOrder {
                    version: version_key,
                    latest: last.version_key,
                });
            }
        }
        if let Some(parent) = parent {
            self.node(parent)?;
        }

        let id = SchemaId(self.nodes.len());
        self.nodes.push(SchemaNode::new(version_key, parent));
        debug!(version = version_key, parent = ?parent.map(|p| p.0), "defined schema");
        Ok(id)
    }

    /// Register (or override) a logical type in one schema version.
    ///
    /// `recursive` marks a type whose template reaches itself through
    /// [`TypeTemplate::Reference`]; reference analysis reports cycles that are
    /// not marked.
    pub fn register_type<F>(
        &mut self,
        schema: SchemaId,
        recursive: bool,
        name: impl Into<String>,
        thunk: F,
    ) -> Result<()>
    where
        F: Fn() -> TypeTemplate + Send + Sync + 'static,
    {
        let source = TypeSource::Thunk(Arc::new(thunk));
        self.insert_type(schema, name.into(), TypeEntry { source, recursive })
    }

    /// Register a logical type that is a tagged choice over a discriminator map.
    ///
    /// The choices are taken from the map of whichever schema resolves the
    /// type, so descendants that register new discriminators see them without
    /// re-registering the type.
    pub fn register_choice_type(
        &mut self,
        schema: SchemaId,
        name: impl Into<String>,
        field: impl Into<String>,
        kind: ChoiceKind,
    ) -> Result<()> {
        let source = TypeSource::Choice {
            field: field.into(),
            kind,
        };
        // Choice types are recursive whenever a branch refers back to the choice
        self.insert_type(
            schema,
            name.into(),
            TypeEntry {
                source,
                recursive: true,
            },
        )
    }

    /// Register a discriminator (or replace its template) in one version
    pub fn register_choice<F>(
        &mut self,
        schema: SchemaId,
        kind: ChoiceKind,
        discriminator: impl Into<String>,
        thunk: F,
    ) -> Result<()>
    where
        F: Fn() -> TypeTemplate + Send + Sync + 'static,
    {
        let discriminator = discriminator.into();
        self.ensure_open(&discriminator)?;
        if discriminator.is_empty() {
            return Err(FixerError::registration(kind.as_str(), "empty discriminator"));
        }
        let node = self.node_mut(schema)?;
        debug!(version = node.version_key, %kind, %discriminator, "registered choice");
        node.choices[kind.index()]
            .registrations
            .push((discriminator, Arc::new(thunk)));
        self.clear_caches();
        Ok(())
    }

    /// Rename a discriminator in one version; its template is untouched
    pub fn rename_choice(
        &mut self,
        schema: SchemaId,
        kind: ChoiceKind,
        old: impl Into<String>,
        new: impl Into<String>,
    ) -> Result<()> {
        let (old, new) = (old.into(), new.into());
        self.ensure_open(&old)?;
        if new.is_empty() {
            return Err(FixerError::registration(old, "empty rename target"));
        }
        let node = self.node_mut(schema)?;
        debug!(version = node.version_key, %kind, %old, %new, "renamed choice");
        node.choices[kind.index()].renames.push((old, new));
        self.clear_caches();
        Ok(())
    }

    /// Remove a discriminator from one version onwards
    pub fn remove_choice(
        &mut self,
        schema: SchemaId,
        kind: ChoiceKind,
        discriminator: impl Into<String>,
    ) -> Result<()> {
        let discriminator = discriminator.into();
        self.ensure_open(&discriminator)?;
        let node = self.node_mut(schema)?;
        debug!(version = node.version_key, %kind, %discriminator, "removed choice");
        node.choices[kind.index()].removals.push(discriminator);
        self.clear_caches();
        Ok(())
    }

    /// Refuse further registrations
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Seal the chain and share it with fixers
    pub fn into_shared(mut self) -> Arc<Self> {
        self.seal();
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// View of one schema version
    pub fn schema(&self, id: SchemaId) -> Result<Schema<'_>> {
        let node = self.node(id)?;
        Ok(Schema {
            chain: self,
            id,
            node,
        })
    }

    /// Find the schema defined with exactly this version key
    pub fn by_version(&self, version_key: DataVersion) -> Option<Schema<'_>> {
        let index = self
            .nodes
            .binary_search_by_key(&version_key, |n| n.version_key)
            .ok()?;
        self.schema(SchemaId(index)).ok()
    }

    /// The newest schema
    pub fn latest(&self) -> Option<Schema<'_>> {
        self.iter().last()
    }

    /// All schemas in version order
    pub fn iter(&self) -> impl Iterator<Item = Schema<'_>> {
        self.nodes.iter().enumerate().map(move |(i, node)| Schema {
            chain: self,
            id: SchemaId(i),
            node,
        })
    }

    /// Run reference analysis on every schema
    pub fn validate(&self) -> Result<Diagnostics> {
        let mut diagnostics = Diagnostics::default();
        for schema in self.iter() {
            diagnostics.extend(analyze_references(schema)?.diagnostics);
        }
        Ok(diagnostics)
    }

    fn insert_type(&mut self, schema: SchemaId, name: String, entry: TypeEntry) -> Result<()> {
        self.ensure_open(&name)?;
        if name.is_empty() {
            return Err(FixerError::registration(name, "empty logical type name"));
        }
        let node = self.node_mut(schema)?;
        debug!(
            version = node.version_key,
            logical_type = %name,
            recursive = entry.recursive,
            "registered type"
        );
        node.types.insert(name, entry);
        self.clear_caches();
        Ok(())
    }

    fn ensure_open(&self, what: &str) -> Result<()> {
        if self.sealed {
            return Err(FixerError::registration(what, "schema chain is sealed"));
        }
        Ok(())
    }

    fn node(&self, id: SchemaId) -> Result<&SchemaNode> {
        self.nodes.get(id.0).ok_or(FixerError::UnknownSchema(id.0))
    }

    fn node_mut(&mut self, id: SchemaId) -> Result<&mut SchemaNode> {
        self.nodes.get_mut(id.0).ok_or(FixerError::UnknownSchema(id.0))
    }

    // Lookups made before a registration may have cached inherited state
    fn clear_caches(&mut self) {
        for node in &mut self.nodes {
            node.clear_caches();
        }
    }
}

impl fmt::Debug for SchemaChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaChain")
            .field("versions", &self.nodes.iter().map(|n| n.version_key).collect::<Vec<_>>())
            .field("sealed", &self.sealed)
            .finish()
    }
}

// =============================================================================
// Schema view
// =============================================================================

/// Read-only view of one schema version
#[derive(Clone, Copy)]
pub struct Schema<'a> {
    chain: &'a SchemaChain,
    id: SchemaId,
    node: &'a SchemaNode,
}

impl<'a> Schema<'a> {
    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn version_key(&self) -> DataVersion {
        self.node.version_key
    }

    pub fn chain(&self) -> &'a SchemaChain {
        self.chain
    }

    pub fn parent(&self) -> Option<Schema<'a>> {
        self.node.parent.and_then(|p| self.chain.schema(p).ok())
    }

    /// This schema followed by its ancestors, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = Schema<'a>> {
        std::iter::successors(Some(*self), |s| s.parent())
    }

    /// Whether this version itself overrides `name`
    pub fn defines(&self, name: &str) -> bool {
        self.node.types.contains_key(name)
    }

    /// Whether `name` is registered as self-referential where it is defined
    pub fn is_recursive(&self, name: &str) -> bool {
        self.find_entry(name).map(|(_, e)| e.recursive).unwrap_or(false)
    }

    /// The schema whose override supplies `name`
    pub fn defining_schema(&self, name: &str) -> Option<Schema<'a>> {
        self.find_entry(name).map(|(s, _)| s)
    }

    /// Every logical type visible from this schema
    pub fn type_names(&self) -> BTreeSet<&'a str> {
        self.ancestors()
            .flat_map(|s| s.node.types.keys().map(String::as_str))
            .collect()
    }

    /// Resolve a logical type to its template.
    ///
    /// Walks `self → parent → …` to the nearest override, materializes it
    /// once and caches the result on this schema.
    pub fn resolve_type(&self, name: &str) -> Result<Arc<TypeTemplate>> {
        if let Some(hit) = self
            .node
            .type_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(hit.clone());
        }

        let (_, entry) = self
            .find_entry(name)
            .ok_or_else(|| FixerError::UnknownLogicalType {
                name: name.to_string(),
                version: self.version_key(),
            })?;

        let template = Arc::new(match &entry.source {
            TypeSource::Thunk(thunk) => thunk(),
            TypeSource::Choice { field, kind } => TypeTemplate::TaggedChoice {
                field: field.clone(),
                choices: self.build_discriminator_map(*kind).materialize(),
            },
        });

        let mut cache = self
            .node
            .type_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(name.to_string()).or_insert(template).clone())
    }

    /// Cumulative discriminator map of this version.
    ///
    /// Starts from the nearest ancestor with a cached map (or empty at the
    /// root) and applies each version's deltas going forward.
    pub fn build_discriminator_map(&self, kind: ChoiceKind) -> Arc<DiscriminatorMap> {
        let k = kind.index();
        let mut pending = Vec::new();
        let mut base: Option<Arc<DiscriminatorMap>> = None;

        for schema in self.ancestors() {
            if let Some(map) = schema.node.choice_cache[k].get() {
                base = Some(map.clone());
                break;
            }
            pending.push(schema);
        }

        let mut current = base.unwrap_or_default();
        for schema in pending.into_iter().rev() {
            let deltas = &schema.node.choices[k];
            let built = if deltas.is_empty() {
                current.clone()
            } else {
                let mut map = (*current).clone();
                for key in map.apply(deltas) {
                    warn!(
                        version = schema.version_key(),
                        %kind,
                        discriminator = %key,
                        "choice delta names an unknown discriminator"
                    );
                }
                Arc::new(map)
            };
            current = schema.node.choice_cache[k].get_or_init(|| built).clone();
        }
        current
    }

    fn find_entry(&self, name: &str) -> Option<(Schema<'a>, &'a TypeEntry)> {
        self.ancestors()
            .find_map(|s| s.node.types.get(name).map(|e| (s, e)))
    }
}

impl fmt::Debug for Schema<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("id", &self.id)
            .field("version_key", &self.node.version_key)
            .field("parent", &self.node.parent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zombie() -> TypeTemplate {
        TypeTemplate::optional_fields([(
            "HandItems",
            TypeTemplate::list(TypeTemplate::reference("item_stack")),
        )])
    }

    /// v1 registers Zombie, v2 renames it, v3 changes nothing
    fn lifecycle_chain() -> (SchemaChain, [SchemaId; 3]) {
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(1, None).unwrap();
        let v2 = chain.define_schema(2, Some(v1)).unwrap();
        let v3 = chain.define_schema(3, Some(v2)).unwrap();
        chain.register_choice_type(v1, "entity", "id", ChoiceKind::Entities).unwrap();
        chain.register_choice(v1, ChoiceKind::Entities, "Zombie", zombie).unwrap();
        chain
            .rename_choice(v2, ChoiceKind::Entities, "Zombie", "minecraft:zombie")
            .unwrap();
        (chain, [v1, v2, v3])
    }

    #[test]
    fn test_monotonic_versions() {
        let mut chain = SchemaChain::new();
        let v10 = chain.define_schema(10, None).unwrap();
        assert!(matches!(
            chain.define_schema(10, Some(v10)),
            Err(FixerError::InvalidSchemaOrder { version: 10, latest: 10 })
        ));
        assert!(matches!(
            chain.define_schema(5, None),
            Err(FixerError::InvalidSchemaOrder { .. })
        ));
        assert!(chain.define_schema(11, Some(v10)).is_ok());
    }

    #[test]
    fn test_unknown_parent() {
        let mut chain = SchemaChain::new();
        assert!(matches!(
            chain.define_schema(1, Some(SchemaId(3))),
            Err(FixerError::UnknownSchema(3))
        ));
    }

    #[test]
    fn test_resolve_inherits_and_overrides() {
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(1, None).unwrap();
        let v2 = chain.define_schema(2, Some(v1)).unwrap();
        let v3 = chain.define_schema(3, Some(v2)).unwrap();
        chain.register_type(v1, false, "item_stack", TypeTemplate::remainder).unwrap();
        chain
            .register_type(v3, false, "item_stack", || {
                TypeTemplate::optional_fields([("tag", TypeTemplate::Remainder)])
            })
            .unwrap();

        let s2 = chain.schema(v2).unwrap();
        let s3 = chain.schema(v3).unwrap();
        assert_eq!(*s2.resolve_type("item_stack").unwrap(), TypeTemplate::Remainder);
        assert_eq!(s2.defining_schema("item_stack").unwrap().version_key(), 1);
        assert_eq!(
            *s3.resolve_type("item_stack").unwrap(),
            TypeTemplate::optional_fields([("tag", TypeTemplate::Remainder)])
        );
    }

    #[test]
    fn test_unknown_logical_type() {
        let (chain, [_, v2, _]) = lifecycle_chain();
        let err = chain.schema(v2).unwrap().resolve_type("chunk").unwrap_err();
        assert!(matches!(
            err,
            FixerError::UnknownLogicalType { ref name, version: 2 } if name == "chunk"
        ));
    }

    #[test]
    fn test_thunk_materialized_once_per_schema() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(1, None).unwrap();
        chain
            .register_type(v1, false, "block", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                TypeTemplate::Remainder
            })
            .unwrap();

        let schema = chain.schema(v1).unwrap();
        schema.resolve_type("block").unwrap();
        schema.resolve_type("block").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_discriminator_lifecycle() {
        let (chain, [v1, v2, v3]) = lifecycle_chain();

        let m1 = chain.schema(v1).unwrap().build_discriminator_map(ChoiceKind::Entities);
        assert!(m1.contains("Zombie"));

        for id in [v2, v3] {
            let map = chain.schema(id).unwrap().build_discriminator_map(ChoiceKind::Entities);
            assert!(map.contains("minecraft:zombie"));
            assert!(!map.contains("Zombie"));
            assert_eq!(map.template("minecraft:zombie"), Some(zombie()));
        }

        let blocks = chain.schema(v3).unwrap().build_discriminator_map(ChoiceKind::BlockEntities);
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_removed_key_stays_removed() {
        let (mut chain, [_, v2, v3]) = lifecycle_chain();
        let v4 = chain.define_schema(4, Some(v3)).unwrap();
        let v5 = chain.define_schema(5, Some(v4)).unwrap();
        chain.remove_choice(v3, ChoiceKind::Entities, "minecraft:zombie").unwrap();
        chain
            .register_choice(v5, ChoiceKind::Entities, "minecraft:zombie", TypeTemplate::remainder)
            .unwrap();

        let has = |id| {
            chain
                .schema(id)
                .unwrap()
                .build_discriminator_map(ChoiceKind::Entities)
                .contains("minecraft:zombie")
        };
        assert!(has(v2));
        assert!(!has(v3));
        assert!(!has(v4));
        assert!(has(v5));
    }

    #[test]
    fn test_choice_type_sees_descendant_choices() {
        let (mut chain, [v1, _, v3]) = lifecycle_chain();
        chain
            .register_choice(v3, ChoiceKind::Entities, "minecraft:pig", TypeTemplate::remainder)
            .unwrap();

        let TypeTemplate::TaggedChoice { field, choices } =
            (*chain.schema(v3).unwrap().resolve_type("entity").unwrap()).clone()
        else {
            panic!("entity should be a tagged choice");
        };
        assert_eq!(field, "id");
        assert_eq!(
            choices.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["minecraft:pig", "minecraft:zombie"]
        );

        let root = chain.schema(v1).unwrap().resolve_type("entity").unwrap();
        assert_eq!(root.references().len(), 1);
    }

    #[test]
    fn test_registration_invalidates_cache() {
        let mut chain = SchemaChain::new();
        let v1 = chain.define_schema(1, None).unwrap();
        let v2 = chain.define_schema(2, Some(v1)).unwrap();
        chain.register_choice_type(v1, "entity", "id", ChoiceKind::Entities).unwrap();
        assert!(chain.schema(v2).unwrap().build_discriminator_map(ChoiceKind::Entities).is_empty());

        chain
            .register_choice(v1, ChoiceKind::Entities, "Zombie", TypeTemplate::remainder)
            .unwrap();
        assert!(chain
            .schema(v2)
            .unwrap()
            .build_discriminator_map(ChoiceKind::Entities)
            .contains("Zombie"));
    }

    #[test]
    fn test_sealed_chain_refuses_registration() {
        let (chain, [v1, _, _]) = lifecycle_chain();
        let mut shared = chain.into_shared();
        let chain = Arc::get_mut(&mut shared).unwrap();

        assert!(matches!(
            chain.define_schema(99, None),
            Err(FixerError::InvalidRegistration { .. })
        ));
        assert!(matches!(
            chain.register_type(v1, false, "chunk", TypeTemplate::remainder),
            Err(FixerError::InvalidRegistration { .. })
        ));
    }

    #[test]
    fn test_by_version_and_type_names() {
        let (chain, _) = lifecycle_chain();
        assert_eq!(chain.by_version(2).unwrap().version_key(), 2);
        assert!(chain.by_version(7).is_none());
        assert_eq!(chain.latest().unwrap().version_key(), 3);
        let names: Vec<_> = chain.by_version(3).unwrap().type_names().into_iter().collect();
        assert_eq!(names, vec!["entity"]);
    }
}
