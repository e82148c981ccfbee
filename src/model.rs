use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One addressable entity of a collection.
pub type Record = Map<String, Value>;

/// Name of the identity field on every record of a collection with ids.
pub const ID_FIELD: &str = "id";

/// Value type a field accepts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Number,
    Boolean,
    #[default]
    Any,
}

impl FieldKind {
    /// Human name used in validation messages.
    pub fn describe(&self) -> &'static str {
        match self {
            FieldKind::Text => "a string",
            FieldKind::Integer => "an integer",
            FieldKind::Number => "a number",
            FieldKind::Boolean => "a boolean",
            FieldKind::Any => "a value",
        }
    }
}

/// What counts as "supplied" on create.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// The key has to exist with a non-null value.
    #[default]
    Present,
    /// Empty strings, 0, false and null count as missing.
    NonEmpty,
    /// The key has to exist; an explicit null is stored as is.
    Nullable,
}

/// How a list filter compares the query value with the record value.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    /// Case-insensitive substring containment.
    Contains,
    /// Equality after normalizing the query string to the record's JSON type.
    Exact,
    /// Case-insensitive string equality.
    ExactIgnoreCase,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub presence: Presence,
    #[serde(default)]
    pub min: Option<i64>,
    #[serde(default)]
    pub max: Option<i64>,
    #[serde(default, rename = "match")]
    pub match_rule: Option<MatchRule>,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            presence: Presence::Present,
            min: None,
            max: None,
            match_rule: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn non_empty(mut self) -> Self {
        self.presence = Presence::NonEmpty;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.presence = Presence::Nullable;
        self
    }

    pub fn accepts_null(&self) -> bool {
        !self.required || self.presence == Presence::Nullable
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn filter(mut self, rule: MatchRule) -> Self {
        self.match_rule = Some(rule);
        self
    }

    pub fn has_range(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// How new ids are minted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// max existing id + 1
    #[default]
    Sequential,
    /// Milliseconds since the Unix epoch, kept above the current max.
    Timestamp,
    /// Records carry no identity field.
    None,
}

/// Shape of the document on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Layout {
    /// `[ {...}, {...} ]`
    #[default]
    Array,
    /// `{ "<field>": [ {...} ], ... }`
    Wrapped { field: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Update,
        Operation::Delete,
    ];
}

/// Response texts. `{field}` placeholders are filled from the affected record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Messages {
    pub created: String,
    #[serde(default = "default_updated")]
    pub updated: String,
    #[serde(default = "default_deleted")]
    pub deleted: String,
    #[serde(default = "default_not_found")]
    pub not_found: String,
    #[serde(default = "default_missing")]
    pub missing: String,
}

fn default_updated() -> String {
    "Successfully updated the record!".to_string()
}

fn default_deleted() -> String {
    "Successfully deleted the record!".to_string()
}

fn default_not_found() -> String {
    "Record ID not found.".to_string()
}

fn default_missing() -> String {
    "Missing required parameter: {field}.".to_string()
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            created: "Successfully created the record!".to_string(),
            updated: default_updated(),
            deleted: default_deleted(),
            not_found: default_not_found(),
            missing: default_missing(),
        }
    }
}

/// Schema of one collection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default = "default_indent")]
    pub indent: usize,
    #[serde(default)]
    pub id: IdStrategy,
    pub fields: Vec<FieldSpec>,
    #[serde(default = "default_operations")]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub messages: Messages,
}

fn default_indent() -> usize {
    2
}

fn default_operations() -> Vec<Operation> {
    Operation::ALL.to_vec()
}

impl CollectionSpec {
    pub fn allows(&self, op: Operation) -> bool {
        self.operations.contains(&op)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_ids(&self) -> bool {
        self.id != IdStrategy::None
    }
}

/// Read-only projection: records of `source` whose `non_null` field is set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ViewSpec {
    pub name: String,
    pub source: String,
    pub non_null: String,
}

/// Fill `{field}` placeholders from the record. Unknown placeholders are left as-is.
pub fn render(template: &str, record: &Record) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        match tail.find('}') {
            Some(close) => {
                let key = &tail[..close];
                match record.get(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Null) | None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                    Some(other) => out.push_str(&other.to_string()),
                }
                rest = &tail[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Integer id of a record, if it has one.
pub fn record_id(record: &Record) -> Option<i64> {
    record.get(ID_FIELD).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn render_fills_placeholders() {
        let r = rec(json!({"name": "Blue Eyes", "level": 8}));
        assert_eq!(render("Successfully created the card {name}!", &r), "Successfully created the card Blue Eyes!");
        assert_eq!(render("lvl {level}", &r), "lvl 8");
        assert_eq!(render("no {missing} here", &r), "no {missing} here");
        assert_eq!(render("dangling {name", &r), "dangling {name");
    }

    #[test]
    fn spec_defaults_from_json() {
        let spec: CollectionSpec = serde_json::from_value(json!({
            "name": "notes",
            "file": "notes.json",
            "fields": [{"name": "body", "kind": "text", "match": "contains"}]
        }))
        .unwrap();

        assert_eq!(spec.layout, Layout::Array);
        assert_eq!(spec.indent, 2);
        assert_eq!(spec.id, IdStrategy::Sequential);
        assert!(spec.allows(Operation::Delete));
        let body = spec.field("body").unwrap();
        assert!(body.required);
        assert_eq!(body.match_rule, Some(MatchRule::Contains));
        assert_eq!(spec.messages.missing, "Missing required parameter: {field}.");
    }

    #[test]
    fn wrapped_layout_from_json() {
        let layout: Layout = serde_json::from_value(json!({"type": "wrapped", "field": "reviews"})).unwrap();
        assert_eq!(layout, Layout::Wrapped { field: "reviews".into() });
    }

    #[test]
    fn record_id_reads_integers_only() {
        assert_eq!(record_id(&rec(json!({"id": 3}))), Some(3));
        assert_eq!(record_id(&rec(json!({"id": "3"}))), None);
        assert_eq!(record_id(&rec(json!({}))), None);
    }
}
