use ledger_types::keys;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the records of a collection relate to each other during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Independent, append-mostly records (transactions). Merged as a union
    /// deduplicated by a composite key.
    RecordList,
    /// Records with a stable identity (categories, incomes). Merged per id,
    /// newer modification time wins.
    Keyed,
}

/// Describes one collection's merge kind and minimal validation rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub key: String,
    pub kind: CollectionKind,
    /// Field holding the record identity. Required on every record.
    pub id_field: String,
    /// Fields forming the dedup key of a record list.
    #[serde(default)]
    pub dedup_fields: Vec<String>,
    /// Field holding the modification time of a keyed record.
    #[serde(default = "default_modified_field")]
    pub modified_field: String,
    /// Fields that must be strictly positive numbers.
    #[serde(default)]
    pub positive_fields: Vec<String>,
    /// Fields that must be non-blank strings.
    #[serde(default)]
    pub non_empty_fields: Vec<String>,
}

fn default_modified_field() -> String {
    "lastModified".to_string()
}

impl CollectionSchema {
    fn new(key: &str, kind: CollectionKind) -> Self {
        Self {
            key: key.into(),
            kind,
            id_field: "id".into(),
            dedup_fields: Vec::new(),
            modified_field: default_modified_field(),
            positive_fields: Vec::new(),
            non_empty_fields: Vec::new(),
        }
    }

    /// Transactions: a record list deduplicated by id, date and amount.
    pub fn transactions() -> Self {
        Self {
            dedup_fields: vec!["id".into(), "date".into(), "amount".into()],
            positive_fields: vec!["amount".into()],
            ..Self::new(keys::TRANSACTIONS, CollectionKind::RecordList)
        }
    }

    /// Categories: keyed records that must carry a name.
    pub fn categories() -> Self {
        Self {
            non_empty_fields: vec!["name".into()],
            ..Self::new(keys::CATEGORIES, CollectionKind::Keyed)
        }
    }

    /// Recurring incomes: keyed records with a name and a positive amount.
    pub fn incomes() -> Self {
        Self {
            positive_fields: vec!["amount".into()],
            non_empty_fields: vec!["name".into()],
            ..Self::new(keys::INCOMES, CollectionKind::Keyed)
        }
    }
}

/// Registry of known collection schemas, by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schemas {
    by_key: BTreeMap<String, CollectionSchema>,
}

impl Schemas {
    /// An empty registry: every collection is opaque.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The budgeting collections.
    pub fn budget() -> Self {
        let mut schemas = Self::empty();
        schemas.register(CollectionSchema::transactions());
        schemas.register(CollectionSchema::categories());
        schemas.register(CollectionSchema::incomes());
        schemas
    }

    /// Adds or replaces a schema.
    pub fn register(&mut self, schema: CollectionSchema) {
        self.by_key.insert(schema.key.clone(), schema);
    }

    pub fn get(&self, key: &str) -> Option<&CollectionSchema> {
        self.by_key.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }
}
