//! Property-based tests for fixer chains and the registry.
//!
//! Random entity trees (passengers riding passengers, some with ids no schema
//! knows) are pushed through a three-version chain.

use datafixers::fixer::{AddField, Rewrite, RenameByTable};
use datafixers::{ChoiceKind, Fixer, FixerChain, Registry, SchemaChain, TypeTemplate};
use proptest::prelude::*;
use serde_json::{json, Value};

const LEGACY_IDS: [&str; 3] = ["Zombie", "Pig", "Skeleton"];

fn rideable() -> TypeTemplate {
    TypeTemplate::optional_fields([(
        "Passengers",
        TypeTemplate::list(TypeTemplate::reference("entity")),
    )])
}

fn chain() -> FixerChain {
    let mut schemas = SchemaChain::new();
    let v1 = schemas.define_schema(1, None).unwrap();
    let v2 = schemas.define_schema(2, Some(v1)).unwrap();
    let v3 = schemas.define_schema(3, Some(v2)).unwrap();
    schemas.register_choice_type(v1, "entity", "id", ChoiceKind::Entities).unwrap();
    for id in LEGACY_IDS {
        schemas.register_choice(v1, ChoiceKind::Entities, id, rideable).unwrap();
        schemas
            .rename_choice(v2, ChoiceKind::Entities, id, format!("minecraft:{}", id.to_lowercase()))
            .unwrap();
    }

    let table = LEGACY_IDS.map(|id| (id, format!("minecraft:{}", id.to_lowercase())));
    FixerChain::new(schemas.into_shared())
        .with_fixer(Fixer::new("rename", v2, "entity", RenameByTable::new(table)))
        .unwrap()
        .with_fixer(Fixer::new("variant", v3, "entity", AddField::new("variant", json!(0))))
        .unwrap()
}

/// Ids at v1: the three known ones plus one no schema registers
fn entity_id() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("Zombie"),
        Just("Pig"),
        Just("Skeleton"),
        Just("Creeper"),
    ]
}

fn entity() -> impl Strategy<Value = Value> {
    let leaf = (entity_id(), any::<u8>()).prop_map(|(id, health)| json!({"id": id, "Health": health}));
    leaf.prop_recursive(4, 32, 3, |inner| {
        (entity_id(), any::<u8>(), prop::collection::vec(inner, 0..3)).prop_map(
            |(id, health, passengers)| json!({"id": id, "Health": health, "Passengers": passengers}),
        )
    })
}

proptest! {
    #[test]
    fn chain_application_composes(record in entity()) {
        let chain = chain();
        let direct = chain.apply("entity", record.clone(), 1, 3).unwrap();
        let stepwise = chain
            .apply("entity", record.clone(), 1, 2)
            .and_then(|v| chain.apply("entity", v, 2, 3))
            .unwrap();
        prop_assert_eq!(direct, stepwise);
    }

    #[test]
    fn chain_is_identity_on_empty_window(record in entity(), v in 0i64..5) {
        let chain = chain();
        prop_assert_eq!(chain.apply("entity", record.clone(), v, v).unwrap(), record);
    }

    #[test]
    fn migration_is_idempotent(record in entity()) {
        let mut registry = Registry::new();
        registry.register_fixer("example", 3, chain()).unwrap();
        registry.lock();

        let once = registry.migrate(&record).unwrap();
        let twice = registry.migrate(&once).unwrap();
        prop_assert_eq!(&once["example_DataVersion"], &json!(3));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn locked_registry_refuses_every_registration(ns in "[a-z_]{1,12}", version in 0i64..10_000) {
        let mut registry = Registry::new();
        registry.lock();
        prop_assert!(registry.register_fixer(ns, version, chain()).is_err());
        prop_assert!(registry.is_empty());
    }

    #[test]
    fn rename_table_is_idempotent(
        table in prop::collection::hash_map("old_[a-z]{1,6}", "new_[a-z]{1,6}", 0..8),
        input in "(old|new)_[a-z]{1,6}",
    ) {
        let rename = RenameByTable::new(table);
        let once = rename.rename(&input).to_string();
        prop_assert_eq!(rename.rename(&once), once.as_str());

        let value = rename.rewrite(json!({"id": input})).unwrap();
        prop_assert_eq!(rename.rewrite(value.clone()).unwrap(), value);
    }
}
