pub mod catalog;
pub mod error;
pub mod filter;
pub mod manager;
pub mod model;
pub mod parser;
pub mod server;
pub mod storage;
pub mod validate;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::info;

use crate::catalog::Catalog;
use crate::error::{ShelfError, StorageError};
use crate::filter::FilterSet;
use crate::model::{record_id, render, CollectionSpec, IdStrategy, Operation, Record, ID_FIELD};
use crate::storage::{Document, DocumentStore, JsonFileStore};

/// A request body as it arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Record),
    /// URL-encoded or multipart text pairs.
    Form(Vec<(String, String)>),
}

impl Body {
    pub fn into_record(self, spec: &CollectionSpec) -> Record {
        match self {
            Body::Json(record) => record,
            Body::Form(pairs) => validate::coerce_form(spec, pairs),
        }
    }
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    pub id: Option<i64>,
    pub message: String,
}

pub struct ShelfDb {
    catalog: Catalog,
    store: Box<dyn DocumentStore>,
}

impl fmt::Debug for ShelfDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShelfDb")
            .field("collections", &self.catalog.collections.len())
            .field("views", &self.catalog.views.len())
            .finish()
    }
}

impl ShelfDb {
    pub fn new(catalog: Catalog, store: impl DocumentStore + 'static) -> Self {
        Self { catalog, store: Box::new(store) }
    }

    /// Collections live as JSON files under `data_dir`.
    pub fn open(data_dir: &Path, catalog: Catalog, strict_durability: bool) -> Self {
        Self::new(catalog, JsonFileStore::new(data_dir, strict_durability))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn spec(&self, collection: &str, op: Operation) -> Result<&CollectionSpec, ShelfError> {
        let spec = self
            .catalog
            .collection(collection)
            .ok_or_else(|| ShelfError::UnknownCollection(collection.to_string()))?;
        if !spec.allows(op) {
            return Err(ShelfError::Unsupported);
        }
        if matches!(op, Operation::Get | Operation::Update | Operation::Delete) && !spec.has_ids() {
            return Err(ShelfError::Unsupported);
        }
        Ok(spec)
    }

    pub fn list(&self, collection: &str, query: &HashMap<String, String>) -> Result<Vec<Record>, ShelfError> {
        let spec = self.spec(collection, Operation::List)?;
        let filters = FilterSet::from_query(spec, query);
        let doc = self.store.load(spec)?;
        Ok(filters.apply(doc.records))
    }

    /// Records of a view's source collection that pass the view's predicate.
    pub fn view(&self, name: &str) -> Result<Vec<Record>, ShelfError> {
        let view = self
            .catalog
            .view(name)
            .ok_or_else(|| ShelfError::UnknownCollection(name.to_string()))?;
        let spec = self
            .catalog
            .collection(&view.source)
            .ok_or_else(|| ShelfError::UnknownCollection(view.source.clone()))?;
        let doc = self.store.load(spec)?;
        Ok(FilterSet::for_view(view).apply(doc.records))
    }

    pub fn get_by_id(&self, collection: &str, id: &str) -> Result<Record, ShelfError> {
        let spec = self.spec(collection, Operation::Get)?;
        let doc = self.store.load(spec)?;
        let pos = locate(spec, &doc, id)?;
        Ok(doc.records[pos].clone())
    }

    pub fn create(&self, collection: &str, body: Body) -> Result<Ack, ShelfError> {
        let spec = self.spec(collection, Operation::Create)?;
        let fields = validate::validate_create(spec, &body.into_record(spec))?;

        let mut doc = self.store.load(spec)?;
        let id = next_id(spec, &doc.records)?;

        let mut record = Record::new();
        if let Some(id) = id {
            record.insert(ID_FIELD.to_string(), Value::from(id));
        }
        record.extend(fields);

        let message = render(&spec.messages.created, &record);
        doc.records.push(record);
        self.store.save(spec, doc)?;

        info!(collection = %spec.name, id = ?id, "record created");
        Ok(Ack { id, message })
    }

    /// Overwrite the fields present in `body`. An empty body still rewrites the document.
    pub fn update(&self, collection: &str, id: &str, body: Body) -> Result<Ack, ShelfError> {
        let spec = self.spec(collection, Operation::Update)?;
        let changes = validate::validate_update(spec, &body.into_record(spec))?;

        let mut doc = self.store.load(spec)?;
        let pos = locate(spec, &doc, id)?;

        let record = &mut doc.records[pos];
        let changed = changes.len();
        for (field, value) in changes {
            record.insert(field, value);
        }
        let ack = Ack { id: record_id(record), message: render(&spec.messages.updated, record) };
        self.store.save(spec, doc)?;

        info!(collection = %spec.name, id = ?ack.id, fields = changed, "record updated");
        Ok(ack)
    }

    pub fn delete(&self, collection: &str, id: &str) -> Result<Ack, ShelfError> {
        let spec = self.spec(collection, Operation::Delete)?;
        let mut doc = self.store.load(spec)?;
        let pos = locate(spec, &doc, id)?;

        let removed = doc.records.remove(pos);
        let ack = Ack { id: record_id(&removed), message: render(&spec.messages.deleted, &removed) };
        self.store.save(spec, doc)?;

        info!(collection = %spec.name, id = ?ack.id, "record deleted");
        Ok(ack)
    }
}

/// Index of the record with the given path id. A non-integer id never matches.
fn locate(spec: &CollectionSpec, doc: &Document, id: &str) -> Result<usize, ShelfError> {
    let not_found = || ShelfError::NotFound(spec.messages.not_found.clone());
    let wanted = id.trim().parse::<i64>().map_err(|_| not_found())?;
    doc.records
        .iter()
        .position(|r| record_id(r) == Some(wanted))
        .ok_or_else(not_found)
}

fn next_id(spec: &CollectionSpec, records: &[Record]) -> Result<Option<i64>, StorageError> {
    let max = records.iter().filter_map(record_id).max();
    let after = |max: i64| {
        max.checked_add(1).ok_or_else(|| StorageError::IdsExhausted {
            collection: spec.name.clone(),
            max,
        })
    };
    let id = match spec.id {
        IdStrategy::None => return Ok(None),
        IdStrategy::Sequential => after(max.unwrap_or(0))?,
        IdStrategy::Timestamp => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or_default();
            match max {
                Some(max) if max >= now => after(max)?,
                _ => now,
            }
        }
    };
    Ok(Some(id))
}
