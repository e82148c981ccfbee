use std::collections::HashMap;

use serde_json::Value;

use crate::model::{CollectionSpec, MatchRule, Record, ViewSpec};

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Match { rule: MatchRule, needle: String },
    NonNull,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    field: String,
    predicate: Predicate,
}

/// AND-composed predicates over record fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    clauses: Vec<Clause>,
}

impl FilterSet {
    /// Build from query-string parameters. Only filterable fields count, and
    /// empty values mean "no constraint".
    pub fn from_query(spec: &CollectionSpec, query: &HashMap<String, String>) -> Self {
        let clauses = spec
            .fields
            .iter()
            .filter_map(|field| {
                let rule = field.match_rule?;
                let needle = query.get(&field.name).filter(|v| !v.is_empty())?;
                Some(Clause {
                    field: field.name.clone(),
                    predicate: Predicate::Match { rule, needle: needle.clone() },
                })
            })
            .collect();
        Self { clauses }
    }

    pub fn for_view(view: &ViewSpec) -> Self {
        Self {
            clauses: vec![Clause { field: view.non_null.clone(), predicate: Predicate::NonNull }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| {
            let value = record.get(&clause.field).unwrap_or(&Value::Null);
            match &clause.predicate {
                Predicate::NonNull => !value.is_null(),
                Predicate::Match { rule, needle } => matches_rule(*rule, value, needle),
            }
        })
    }

    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        if self.is_empty() {
            return records;
        }
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

fn matches_rule(rule: MatchRule, value: &Value, needle: &str) -> bool {
    match (rule, value) {
        (_, Value::Null) => false,
        (MatchRule::Contains, Value::String(s)) => s.to_lowercase().contains(&needle.to_lowercase()),
        (MatchRule::Contains, Value::Number(n)) => n.to_string().contains(needle),
        (MatchRule::ExactIgnoreCase, Value::String(s)) => s.to_lowercase() == needle.to_lowercase(),
        (MatchRule::Exact, Value::String(s)) => s == needle,
        (MatchRule::Exact | MatchRule::ExactIgnoreCase, Value::Number(n)) => {
            match (n.as_f64(), needle.trim().parse::<f64>()) {
                (Some(have), Ok(want)) => have == want,
                _ => false,
            }
        }
        (MatchRule::Exact | MatchRule::ExactIgnoreCase, Value::Bool(b)) => match needle.trim() {
            "true" => *b,
            "false" => !*b,
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use serde_json::json;

    fn cards() -> Vec<Record> {
        let v = json!([
            {"id": 1, "name": "Blue-Eyes White Dragon", "type": "Monster", "level": 8, "attribute": "LIGHT", "archetype": "Blue-Eyes", "sale_price": null},
            {"id": 2, "name": "Dark Magician", "type": "Monster", "level": 7, "attribute": "DARK", "archetype": "Dark Magician", "sale_price": 3.0},
            {"id": 3, "name": "Pot of Greed", "type": "Spell", "level": null, "attribute": null, "archetype": null, "sale_price": 1.5}
        ]);
        v.as_array().unwrap().iter().map(|r| r.as_object().cloned().unwrap()).collect()
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().filter_map(|r| r["id"].as_i64()).collect()
    }

    #[test]
    fn no_filters_returns_everything() {
        let catalog = Catalog::builtin();
        let spec = catalog.collection("cards").unwrap();
        let set = FilterSet::from_query(spec, &query(&[("name", ""), ("unknown", "x")]));
        assert!(set.is_empty());
        assert_eq!(set.apply(cards()).len(), 3);
    }

    #[test]
    fn text_is_case_insensitive_substring() {
        let catalog = Catalog::builtin();
        let spec = catalog.collection("cards").unwrap();
        let set = FilterSet::from_query(spec, &query(&[("name", "DRAGON")]));
        assert_eq!(ids(&set.apply(cards())), vec![1]);

        let set = FilterSet::from_query(spec, &query(&[("archetype", "magic")]));
        assert_eq!(ids(&set.apply(cards())), vec![2]);
    }

    #[test]
    fn numeric_query_is_normalized() {
        let catalog = Catalog::builtin();
        let spec = catalog.collection("cards").unwrap();
        assert_eq!(ids(&FilterSet::from_query(spec, &query(&[("level", "8")])).apply(cards())), vec![1]);
        assert_eq!(ids(&FilterSet::from_query(spec, &query(&[("level", "8.0")])).apply(cards())), vec![1]);
        assert!(FilterSet::from_query(spec, &query(&[("level", "eight")])).apply(cards()).is_empty());
    }

    #[test]
    fn exact_type_and_case_insensitive_attribute() {
        let catalog = Catalog::builtin();
        let spec = catalog.collection("cards").unwrap();
        assert!(FilterSet::from_query(spec, &query(&[("type", "monster")])).apply(cards()).is_empty());
        assert_eq!(ids(&FilterSet::from_query(spec, &query(&[("attribute", "dark")])).apply(cards())), vec![2]);
    }

    #[test]
    fn filters_compose_with_and() {
        let catalog = Catalog::builtin();
        let spec = catalog.collection("cards").unwrap();
        let both = FilterSet::from_query(spec, &query(&[("type", "Monster"), ("level", "7")]));
        assert_eq!(ids(&both.apply(cards())), vec![2]);

        // Same result as narrowing one filter's output by the other
        let one = FilterSet::from_query(spec, &query(&[("type", "Monster")]));
        let two = FilterSet::from_query(spec, &query(&[("level", "7")]));
        assert_eq!(two.apply(one.apply(cards())), both.apply(cards()));
    }

    #[test]
    fn view_keeps_non_null_only() {
        let catalog = Catalog::builtin();
        let set = FilterSet::for_view(catalog.view("promos").unwrap());
        assert_eq!(ids(&set.apply(cards())), vec![2, 3]);
    }

    #[test]
    fn booleans_match_literal_text() {
        let rec = json!({"recommended": true}).as_object().cloned().unwrap();
        assert!(matches_rule(MatchRule::Exact, &rec["recommended"], "true"));
        assert!(!matches_rule(MatchRule::Exact, &rec["recommended"], "yes"));
    }
}
