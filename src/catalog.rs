use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CatalogError;
use crate::model::{
    CollectionSpec, FieldKind, FieldSpec, IdStrategy, Layout, MatchRule, Messages, Operation, ViewSpec,
};

/// The collections and views a server exposes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Catalog {
    pub collections: Vec<CollectionSpec>,
    #[serde(default)]
    pub views: Vec<ViewSpec>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog: Catalog = serde_json::from_str(&text).map_err(|source| CatalogError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        catalog.check()?;
        info!(path = %path.display(), collections = catalog.collections.len(), views = catalog.views.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Reject catalogs whose names collide or whose views point nowhere.
    pub fn check(&self) -> Result<(), CatalogError> {
        let mut names = HashSet::new();
        for name in self.collections.iter().map(|c| &c.name).chain(self.views.iter().map(|v| &v.name)) {
            if name.is_empty() || name.contains('/') {
                return Err(CatalogError::Invalid(format!("bad name '{}'", name)));
            }
            if !names.insert(name) {
                return Err(CatalogError::Invalid(format!("duplicate name '{}'", name)));
            }
        }

        for spec in &self.collections {
            let mut fields = HashSet::new();
            for field in &spec.fields {
                if !fields.insert(&field.name) {
                    return Err(CatalogError::Invalid(format!("{}: duplicate field '{}'", spec.name, field.name)));
                }
                if field.has_range() && field.kind != FieldKind::Integer {
                    return Err(CatalogError::Invalid(format!(
                        "{}: range on non-integer field '{}'",
                        spec.name, field.name
                    )));
                }
            }
            if let Layout::Wrapped { field } = &spec.layout {
                if field.is_empty() {
                    return Err(CatalogError::Invalid(format!("{}: empty wrapper field", spec.name)));
                }
            }
        }

        for view in &self.views {
            let source = self
                .collection(&view.source)
                .ok_or_else(|| CatalogError::Invalid(format!("view '{}' has unknown source '{}'", view.name, view.source)))?;
            if source.field(&view.non_null).is_none() {
                return Err(CatalogError::Invalid(format!(
                    "view '{}' filters on unknown field '{}'",
                    view.name, view.non_null
                )));
            }
        }
        Ok(())
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    pub fn view(&self, name: &str) -> Option<&ViewSpec> {
        self.views.iter().find(|v| v.name == name)
    }

    /// The storefront and review collections the service was built for.
    pub fn builtin() -> Self {
        let cards = CollectionSpec {
            name: "cards".into(),
            file: "cards.json".into(),
            layout: Layout::Array,
            indent: 2,
            id: IdStrategy::Sequential,
            fields: vec![
                FieldSpec::new("name", FieldKind::Text).filter(MatchRule::Contains),
                FieldSpec::new("type", FieldKind::Text).filter(MatchRule::Exact),
                FieldSpec::new("level", FieldKind::Integer).nullable().filter(MatchRule::Exact),
                FieldSpec::new("attribute", FieldKind::Text).nullable().filter(MatchRule::ExactIgnoreCase),
                FieldSpec::new("archetype", FieldKind::Text).nullable().filter(MatchRule::Contains),
                FieldSpec::new("price", FieldKind::Number),
                FieldSpec::new("sale_price", FieldKind::Number).optional(),
                FieldSpec::new("image_url", FieldKind::Text),
                FieldSpec::new("gen", FieldKind::Any),
            ],
            operations: Operation::ALL.to_vec(),
            messages: Messages {
                created: "Successfully created the card {name}!".into(),
                updated: "Successfully updated the card {name}!".into(),
                deleted: "Successfully deleted the card {name}!".into(),
                not_found: "Card ID not found.".into(),
                missing: "Missing required parameter: {field}.".into(),
            },
        };

        let feedback = CollectionSpec {
            name: "feedback".into(),
            file: "feedback.json".into(),
            layout: Layout::Array,
            indent: 2,
            id: IdStrategy::Timestamp,
            fields: vec![
                FieldSpec::new("name", FieldKind::Text).non_empty(),
                FieldSpec::new("email", FieldKind::Text).non_empty(),
                FieldSpec::new("message", FieldKind::Text).non_empty(),
            ],
            operations: vec![Operation::Create],
            messages: Messages {
                created: "Successfully submitted feedback by {name}!".into(),
                not_found: "Feedback ID not found.".into(),
                missing: "Please provide a valid {field}.".into(),
                ..Messages::default()
            },
        };

        let faq = CollectionSpec {
            name: "faq".into(),
            file: "faq.json".into(),
            layout: Layout::Array,
            indent: 2,
            id: IdStrategy::Sequential,
            fields: vec![
                FieldSpec::new("question", FieldKind::Text).filter(MatchRule::Contains),
                FieldSpec::new("answer", FieldKind::Text),
            ],
            operations: vec![Operation::List],
            messages: Messages {
                not_found: "FAQ ID not found.".into(),
                ..Messages::default()
            },
        };

        let reviews = CollectionSpec {
            name: "reviews".into(),
            file: "reviews.json".into(),
            layout: Layout::Wrapped { field: "reviews".into() },
            indent: 4,
            id: IdStrategy::None,
            fields: vec![
                FieldSpec::new("name", FieldKind::Text).non_empty().filter(MatchRule::Contains),
                FieldSpec::new("review", FieldKind::Text).non_empty().filter(MatchRule::Contains),
                FieldSpec::new("stars", FieldKind::Integer).non_empty().range(1, 5).filter(MatchRule::Exact),
                FieldSpec::new("recommended", FieldKind::Any).non_empty().filter(MatchRule::Exact),
            ],
            operations: vec![Operation::List, Operation::Create],
            messages: Messages {
                created: "Successfully submitted review!".into(),
                ..Messages::default()
            },
        };

        let promos = ViewSpec {
            name: "promos".into(),
            source: "cards".into(),
            non_null: "sale_price".into(),
        };

        Self {
            collections: vec![cards, feedback, faq, reviews],
            views: vec![promos],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtin_is_consistent() {
        let catalog = Catalog::builtin();
        catalog.check().unwrap();
        assert!(catalog.collection("cards").unwrap().allows(Operation::Delete));
        assert!(!catalog.collection("reviews").unwrap().has_ids());
        assert_eq!(catalog.view("promos").unwrap().source, "cards");
    }

    #[test]
    fn load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("catalog.json");
        fs::write(
            &path,
            r#"{
                "collections": [{
                    "name": "books",
                    "file": "books.json",
                    "fields": [
                        {"name": "title", "kind": "text", "match": "contains"},
                        {"name": "rating", "kind": "integer", "min": 1, "max": 10}
                    ],
                    "messages": {"created": "Added {title}.", "not_found": "Book ID not found."}
                }]
            }"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path).unwrap();
        let books = catalog.collection("books").unwrap();
        assert_eq!(books.messages.not_found, "Book ID not found.");
        assert_eq!(books.field("rating").unwrap().max, Some(10));
        assert!(catalog.views.is_empty());
    }

    #[test]
    fn rejects_bad_catalogs() {
        let mut dup = Catalog::builtin();
        dup.views.push(ViewSpec { name: "cards".into(), source: "cards".into(), non_null: "price".into() });
        assert!(matches!(dup.check(), Err(CatalogError::Invalid(_))));

        let mut dangling = Catalog::builtin();
        dangling.views[0].non_null = "discount".into();
        assert!(matches!(dangling.check(), Err(CatalogError::Invalid(_))));

        let mut ranged = Catalog::builtin();
        ranged.collections[0].fields[0].min = Some(1);
        assert!(matches!(ranged.check(), Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn unreadable_catalog() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(Catalog::load(&tmp.path().join("none.json")), Err(CatalogError::Read { .. })));

        let path = tmp.path().join("bad.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(Catalog::load(&path), Err(CatalogError::Parse { .. })));
    }
}
