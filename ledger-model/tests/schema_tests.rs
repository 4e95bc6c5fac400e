use ledger_model::{CollectionKind, CollectionSchema, Schemas};
use pretty_assertions::assert_eq;

#[test]
fn budget_registry_has_three_collections() {
    let schemas = Schemas::budget();
    let keys: Vec<&str> = schemas.keys().collect();
    assert_eq!(keys, vec!["categories", "incomes", "transactions"]);
}

#[test]
fn transactions_are_a_record_list() {
    let schema = CollectionSchema::transactions();
    assert_eq!(schema.kind, CollectionKind::RecordList);
    assert_eq!(schema.dedup_fields, vec!["id", "date", "amount"]);
}

#[test]
fn categories_and_incomes_are_keyed() {
    assert_eq!(CollectionSchema::categories().kind, CollectionKind::Keyed);
    assert_eq!(CollectionSchema::incomes().kind, CollectionKind::Keyed);
    assert_eq!(CollectionSchema::incomes().modified_field, "lastModified");
}

#[test]
fn unknown_collection_has_no_schema() {
    assert!(Schemas::budget().get("settings").is_none());
    assert!(Schemas::empty().get("transactions").is_none());
}

#[test]
fn register_replaces_existing() {
    let mut schemas = Schemas::budget();
    let mut custom = CollectionSchema::categories();
    custom.non_empty_fields.clear();
    schemas.register(custom.clone());
    assert_eq!(schemas.get("categories"), Some(&custom));
}

#[test]
fn schema_deserializes_with_defaults() {
    let json = r#"{"key":"goals","kind":"keyed","id_field":"goalId"}"#;
    let schema: CollectionSchema = serde_json::from_str(json).unwrap();
    assert_eq!(schema.kind, CollectionKind::Keyed);
    assert_eq!(schema.modified_field, "lastModified");
    assert!(schema.positive_fields.is_empty());
}
