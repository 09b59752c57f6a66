//! Field whitelist sanitizer for lookup filters.
//!
//! Callers hand in an arbitrary JSON filter (often derived from untrusted
//! input). Only the literal `key` field and fields on the Allowed-Fields list
//! survive; everything else is dropped without telling the caller. Dropped
//! fields are reported on this module's tracing target only.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

/// Field name addressing the document key rather than the value payload.
pub const KEY_FIELD: &str = "key";

/// Fields of a stored value that lookups may match on by default.
pub const DEFAULT_ALLOWED_FIELDS: &[&str] = &["username", "email", "roles"];

/// What a condition compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The document key.
    Key,
    /// A top-level field of the stored value (`value.<field>`).
    Value(String),
}

impl Target {
    /// Storage path of this target, e.g. `key` or `value.username`.
    pub fn path(&self) -> String {
        match self {
            Target::Key => KEY_FIELD.to_string(),
            Target::Value(field) => format!("value.{field}"),
        }
    }
}

/// A single exact-match condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub target: Target,
    pub expected: Value,
}

impl Condition {
    /// Evaluate this condition against a document.
    ///
    /// Value fields match by JSON equality; an array field also matches a
    /// scalar it contains.
    pub fn matches(&self, key: &str, value: &Value) -> bool {
        match &self.target {
            Target::Key => self.expected.as_str() == Some(key),
            Target::Value(field) => match value.get(field) {
                None => false,
                Some(actual) if actual == &self.expected => true,
                Some(Value::Array(items)) => {
                    !self.expected.is_array() && items.contains(&self.expected)
                }
                Some(_) => false,
            },
        }
    }
}

/// A filter that has passed the whitelist. Conditions are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SanitizedFilter {
    conditions: Vec<Condition>,
}

impl SanitizedFilter {
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether every condition holds. An empty filter matches nothing.
    pub fn matches(&self, key: &str, value: &Value) -> bool {
        !self.is_empty() && self.conditions.iter().all(|c| c.matches(key, value))
    }
}

/// The Allowed-Fields list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldWhitelist {
    allowed: BTreeSet<String>,
}

impl Default for FieldWhitelist {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_FIELDS.iter().copied())
    }
}

impl FieldWhitelist {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, field: &str) -> bool {
        self.allowed.contains(field)
    }

    /// Map a caller-supplied filter onto a safe, prefixed filter.
    ///
    /// Anything that is not a flat object of `field → scalar|array` (operator
    /// objects, `$`-prefixed combinators) rejects the whole filter.
    pub fn sanitize(&self, filter: &Value) -> SanitizedFilter {
        let Some(map) = filter.as_object() else {
            debug!(kind = json_kind(filter), "rejecting non-object filter");
            return SanitizedFilter::default();
        };

        if let Some((field, _)) = map
            .iter()
            .find(|(field, val)| field.starts_with('$') || val.is_object())
        {
            debug!(field = %field, "rejecting non-flat filter");
            return SanitizedFilter::default();
        }

        let mut conditions = Vec::with_capacity(map.len());
        for (field, val) in map {
            let target = if field == KEY_FIELD {
                if !val.is_string() {
                    debug!("dropping non-string key condition");
                    continue;
                }
                Target::Key
            } else if self.allows(field) {
                Target::Value(field.clone())
            } else {
                debug!(field = %field, "dropping field not on whitelist");
                continue;
            };
            debug!(path = %target.path(), "allowing filter field");
            conditions.push(Condition {
                target,
                expected: val.clone(),
            });
        }
        SanitizedFilter { conditions }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn drops_unknown_fields() {
        let wl = FieldWhitelist::default();
        let out = wl.sanitize(&json!({"password_hash": "x", "username": "bob"}));
        assert_eq!(
            out.conditions(),
            &[Condition {
                target: Target::Value("username".into()),
                expected: json!("bob"),
            }]
        );
    }

    #[test]
    fn only_unknown_fields_sanitize_to_empty() {
        let wl = FieldWhitelist::default();
        assert!(wl.sanitize(&json!({"password_hash": "x"})).is_empty());
    }

    #[test]
    fn key_passes_through_unprefixed() {
        let wl = FieldWhitelist::new(["username"]);
        let out = wl.sanitize(&json!({"key": "abc"}));
        assert_eq!(out.conditions()[0].target, Target::Key);
        assert_eq!(out.conditions()[0].target.path(), "key");
    }

    #[test]
    fn allowed_fields_are_prefixed() {
        let wl = FieldWhitelist::new(["roles"]);
        let out = wl.sanitize(&json!({"roles": "admin"}));
        assert_eq!(out.conditions()[0].target.path(), "value.roles");
    }

    #[test]
    fn non_object_filters_fail_closed() {
        let wl = FieldWhitelist::default();
        assert!(wl.sanitize(&json!("bob")).is_empty());
        assert!(wl.sanitize(&json!(["username", "bob"])).is_empty());
        assert!(wl.sanitize(&Value::Null).is_empty());
    }

    #[test]
    fn operator_objects_fail_closed() {
        let wl = FieldWhitelist::default();
        assert!(wl.sanitize(&json!({"username": {"$ne": ""}})).is_empty());
        assert!(
            wl.sanitize(&json!({"$or": [{"username": "a"}], "username": "b"}))
                .is_empty()
        );
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = SanitizedFilter::default();
        assert!(!filter.matches("k", &json!({"username": "bob"})));
    }

    #[test]
    fn array_field_matches_contained_scalar() {
        let wl = FieldWhitelist::default();
        let filter = wl.sanitize(&json!({"roles": "admin"}));
        assert!(filter.matches("k", &json!({"roles": ["user", "admin"]})));
        assert!(!filter.matches("k", &json!({"roles": ["user"]})));
    }

    #[test]
    fn conditions_are_anded() {
        let wl = FieldWhitelist::default();
        let filter = wl.sanitize(&json!({"key": "k1", "username": "bob"}));
        assert!(filter.matches("k1", &json!({"username": "bob"})));
        assert!(!filter.matches("k2", &json!({"username": "bob"})));
        assert!(!filter.matches("k1", &json!({"username": "alice"})));
    }
}
