use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::StorageError;
use crate::model::{CollectionSpec, Layout, Record};

/// Full in-memory state of one collection document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub records: Vec<Record>,
    /// For wrapped layouts: the surrounding object, with the array slot left as null.
    envelope: Option<(String, Map<String, Value>)>,
}

impl Document {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records, envelope: None }
    }

    pub fn from_value(layout: &Layout, value: Value) -> Result<Self, String> {
        match layout {
            Layout::Array => Ok(Self::new(records_from(value)?)),
            Layout::Wrapped { field } => {
                let mut envelope = match value {
                    Value::Object(map) => map,
                    _ => return Err(format!("expected an object with a '{}' array", field)),
                };
                let slot = envelope
                    .get_mut(field)
                    .ok_or_else(|| format!("missing '{}' array", field))?;
                let records = records_from(std::mem::take(slot))?;
                Ok(Self { records, envelope: Some((field.clone(), envelope)) })
            }
        }
    }

    pub fn into_value(self, layout: &Layout) -> Value {
        let array = Value::Array(self.records.into_iter().map(Value::Object).collect());
        match (layout, self.envelope) {
            (Layout::Array, _) => array,
            (Layout::Wrapped { .. }, Some((field, mut envelope))) => {
                envelope.insert(field, array);
                Value::Object(envelope)
            }
            (Layout::Wrapped { field }, None) => {
                let mut envelope = Map::new();
                envelope.insert(field.clone(), array);
                Value::Object(envelope)
            }
        }
    }
}

fn records_from(value: Value) -> Result<Vec<Record>, String> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err("expected an array of records".to_string()),
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(record) => Ok(record),
            _ => Err(format!("element {} is not an object", i)),
        })
        .collect()
}

/// Serialize with a fixed indent width.
pub fn to_pretty(value: &Value, indent: usize) -> Result<Vec<u8>, serde_json::Error> {
    let indent = vec![b' '; indent];
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(&indent));
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Wholesale load/save of collection documents.
pub trait DocumentStore: Send + Sync {
    fn load(&self, spec: &CollectionSpec) -> Result<Document, StorageError>;
    fn save(&self, spec: &CollectionSpec, doc: Document) -> Result<(), StorageError>;
}

/// One pretty-printed JSON file per collection under `dir`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    strict: bool,
}

impl JsonFileStore {
    /// `strict` fsyncs every rewrite before it replaces the old document.
    pub fn new(dir: &Path, strict: bool) -> Self {
        Self { dir: dir.to_path_buf(), strict }
    }

    pub fn path_of(&self, spec: &CollectionSpec) -> PathBuf {
        self.dir.join(&spec.file)
    }
}

impl DocumentStore for JsonFileStore {
    fn load(&self, spec: &CollectionSpec) -> Result<Document, StorageError> {
        let path = self.path_of(spec);
        let text = fs::read_to_string(&path).map_err(|source| StorageError::Io { path: path.clone(), source })?;

        let value: Value = serde_json::from_str(&text).map_err(|e| StorageError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let doc = Document::from_value(&spec.layout, value).map_err(|reason| StorageError::Parse { path, reason })?;
        debug!(collection = %spec.name, records = doc.records.len(), "loaded document");
        Ok(doc)
    }

    fn save(&self, spec: &CollectionSpec, doc: Document) -> Result<(), StorageError> {
        let path = self.path_of(spec);
        let count = doc.records.len();
        let bytes = to_pretty(&doc.into_value(&spec.layout), spec.indent)
            .map_err(|source| StorageError::Encode { path: path.clone(), source })?;

        // Each writer gets its own sibling temp file, renamed over the target
        let dir = path.parent().unwrap_or(self.dir.as_path());
        let mut prefix = OsString::from(".");
        prefix.push(path.file_name().unwrap_or_default());
        prefix.push(".");

        let io_err = |p: &Path| {
            let p = p.to_path_buf();
            move |source| StorageError::Io { path: p, source }
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(io_err(dir))?;
        tmp.write_all(&bytes).map_err(io_err(tmp.path()))?;
        if self.strict {
            tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;
        }
        // A failed persist hands the temp file back; dropping it removes it
        tmp.persist(&path).map_err(|e| io_err(&path)(e.error))?;

        debug!(collection = %spec.name, records = count, "rewrote document");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, FieldSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn spec(layout: Layout, indent: usize) -> CollectionSpec {
        CollectionSpec {
            name: "things".into(),
            file: "things.json".into(),
            layout,
            indent,
            id: Default::default(),
            fields: vec![FieldSpec::new("name", FieldKind::Text)],
            operations: crate::model::Operation::ALL.to_vec(),
            messages: Default::default(),
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn round_trip_array() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path(), false);
        let spec = spec(Layout::Array, 2);
        fs::write(store.path_of(&spec), r#"[{"id":1,"name":"a"},{"id":2,"name":null}]"#).unwrap();

        let doc = store.load(&spec).unwrap();
        assert_eq!(doc.records.len(), 2);
        store.save(&spec, doc.clone()).unwrap();

        let again = store.load(&spec).unwrap();
        assert_eq!(doc, again);

        let text = fs::read_to_string(store.path_of(&spec)).unwrap();
        assert!(text.starts_with("[\n  {\n    \"id\": 1,"));
    }

    #[test]
    fn wrapped_keeps_other_keys_and_indent() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path(), true);
        let spec = spec(Layout::Wrapped { field: "reviews".into() }, 4);
        fs::write(store.path_of(&spec), r#"{"title":"Shop","reviews":[{"name":"x"}],"version":2}"#).unwrap();

        let mut doc = store.load(&spec).unwrap();
        doc.records.push(json!({"name": "y"}).as_object().cloned().unwrap());
        store.save(&spec, doc).unwrap();

        let text = fs::read_to_string(store.path_of(&spec)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"title": "Shop", "reviews": [{"name": "x"}, {"name": "y"}], "version": 2}));
        assert!(text.contains("\n    \"reviews\": [\n        {"));
        assert_eq!(entries(tmp.path()), vec!["things.json".to_string()]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path(), false);
        assert!(matches!(store.load(&spec(Layout::Array, 2)), Err(StorageError::Io { .. })));
    }

    #[test]
    fn wrong_shape_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path(), false);
        let array = spec(Layout::Array, 2);

        fs::write(store.path_of(&array), "not json").unwrap();
        assert!(matches!(store.load(&array), Err(StorageError::Parse { .. })));

        fs::write(store.path_of(&array), "[1, 2]").unwrap();
        assert!(matches!(store.load(&array), Err(StorageError::Parse { .. })));

        let wrapped = spec(Layout::Wrapped { field: "reviews".into() }, 4);
        fs::write(store.path_of(&wrapped), "[]").unwrap();
        assert!(matches!(store.load(&wrapped), Err(StorageError::Parse { .. })));
    }

    #[test]
    fn failed_save_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path(), true);
        let spec = spec(Layout::Array, 2);
        let path = store.path_of(&spec);
        fs::write(&path, r#"[{"id":1,"name":"a"}]"#).unwrap();
        let doc = store.load(&spec).unwrap();

        // A non-empty directory in the target's place makes the final rename fail
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "x").unwrap();

        assert!(matches!(store.save(&spec, doc), Err(StorageError::Io { .. })));
        assert_eq!(entries(tmp.path()), vec!["things.json".to_string()]);
        assert!(path.join("keep").exists());
    }

    #[test]
    fn concurrent_saves_never_interleave() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path(), false);
        let spec = spec(Layout::Array, 2);
        fs::write(store.path_of(&spec), "[]").unwrap();

        std::thread::scope(|s| {
            for n in 0..8usize {
                let (store, spec) = (&store, &spec);
                s.spawn(move || {
                    for round in 0..20 {
                        let records = (0..(n + round) % 7 + 1)
                            .map(|i| json!({"id": i, "name": "x".repeat(n * 13)}).as_object().cloned().unwrap())
                            .collect();
                        store.save(spec, Document::new(records)).unwrap();
                    }
                });
            }
        });

        let doc = store.load(&spec).unwrap();
        assert!(!doc.records.is_empty());
        assert_eq!(entries(tmp.path()), vec!["things.json".to_string()]);
    }
}
