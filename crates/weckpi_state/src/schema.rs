//! Declared field set of the state tree.

use crate::error::{StateError, StateResult};
use crate::path::FieldPath;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// The JSON kind a field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// `true` or `false`.
    Bool,
    /// Any JSON number.
    Number,
    /// A JSON string.
    String,
    /// A JSON object, replaced as a whole.
    Record,
    /// A JSON array, replaced as a whole.
    Sequence,
    /// Any JSON value, including `null`.
    Any,
}

impl FieldKind {
    /// Returns true if `value` is acceptable for a field of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Number => value.is_number(),
            FieldKind::String => value.is_string(),
            FieldKind::Record => value.is_object(),
            FieldKind::Sequence => value.is_array(),
            FieldKind::Any => true,
        }
    }

    /// Describes the JSON kind of an arbitrary value.
    pub fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "sequence",
            Value::Object(_) => "record",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Bool => "bool",
            FieldKind::Number => "number",
            FieldKind::String => "string",
            FieldKind::Record => "record",
            FieldKind::Sequence => "sequence",
            FieldKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// A named rule a field value must satisfy on top of its kind.
///
/// Constraints are plain functions so schemas stay cheap to clone and
/// compare; two constraints are equal when their names are.
#[derive(Clone, Copy)]
pub struct Constraint {
    name: &'static str,
    check: fn(&Value) -> Result<(), String>,
}

impl Constraint {
    /// Creates a constraint from a name and a check returning the reason
    /// for a rejection.
    pub const fn new(name: &'static str, check: fn(&Value) -> Result<(), String>) -> Self {
        Self { name, check }
    }

    /// Name reported in errors and schema listings.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Runs the check.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        (self.check)(value)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Constraint").field(&self.name).finish()
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Serialize for Constraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name)
    }
}

/// Declaration of a single field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    /// Address of the field.
    pub path: FieldPath,
    /// Kind of value the field holds.
    pub kind: FieldKind,
    /// Value the field holds before any snapshot arrives.
    pub default: Value,
    /// Additional rule the value must satisfy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Constraint>,
}

impl FieldSpec {
    /// Checks `value` against the declared kind, then the constraint.
    pub fn check(&self, value: &Value) -> StateResult<()> {
        if !self.kind.accepts(value) {
            return Err(StateError::TypeMismatch {
                path: self.path.to_dotted(),
                expected: self.kind,
                actual: FieldKind::describe(value).to_string(),
            });
        }
        if let Some(constraint) = &self.constraint {
            constraint
                .check(value)
                .map_err(|reason| StateError::InvalidValue {
                    path: self.path.to_dotted(),
                    constraint: constraint.name(),
                    reason,
                })?;
        }
        Ok(())
    }
}

/// The fixed, ordered field set of a state tree.
///
/// No declared path may be an ancestor of another: a field is either a
/// leaf of the tree or a structured value replaced wholesale, never both.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<FieldSpec>,
    index: HashMap<FieldPath, usize>,
}

impl Schema {
    /// Starts a new schema declaration.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Returns the position of a field in declaration order.
    pub fn position(&self, path: &FieldPath) -> Option<usize> {
        self.index.get(path).copied()
    }

    /// Returns the declaration of a field.
    pub fn field(&self, path: &FieldPath) -> Option<&FieldSpec> {
        self.position(path).map(|i| &self.fields[i])
    }

    /// Returns the field at a declaration position.
    pub fn field_at(&self, position: usize) -> Option<&FieldSpec> {
        self.fields.get(position)
    }

    /// Iterates over all fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    /// Returns true if `path` is a strict ancestor of some declared field.
    pub fn is_group(&self, path: &FieldPath) -> bool {
        self.fields.iter().any(|f| f.path.is_descendant_of(path))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no field is declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builds the nested JSON object holding every field's default.
    pub fn defaults(&self) -> Value {
        let mut root = Value::Object(Default::default());
        for field in &self.fields {
            field.path.insert_into(&mut root, field.default.clone());
        }
        root
    }
}

/// Builder for [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entries: Vec<(String, FieldKind, Value)>,
    constraints: Vec<(String, Constraint)>,
}

impl SchemaBuilder {
    /// Declares a field.
    pub fn field(mut self, path: impl Into<String>, kind: FieldKind, default: Value) -> Self {
        self.entries.push((path.into(), kind, default));
        self
    }

    /// Declares a group of fields sharing a common prefix.
    pub fn group<I>(mut self, prefix: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, FieldKind, Value)>,
    {
        for (name, kind, default) in fields {
            self.entries.push((format!("{prefix}.{name}"), kind, default));
        }
        self
    }

    /// Attaches a constraint to a field declared anywhere in the builder.
    pub fn constrain(mut self, path: impl Into<String>, constraint: Constraint) -> Self {
        self.constraints.push((path.into(), constraint));
        self
    }

    /// Validates the declaration and builds the schema.
    pub fn build(self) -> StateResult<Schema> {
        let mut fields = Vec::with_capacity(self.entries.len());
        let mut index = HashMap::with_capacity(self.entries.len());

        for (raw, kind, default) in self.entries {
            let path = FieldPath::parse(&raw)?;
            if index.insert(path.clone(), fields.len()).is_some() {
                return Err(StateError::invalid_schema(format!(
                    "field {raw} declared twice"
                )));
            }
            fields.push(FieldSpec {
                path,
                kind,
                default,
                constraint: None,
            });
        }

        for (raw, constraint) in self.constraints {
            let path = FieldPath::parse(&raw)?;
            let spec = index
                .get(&path)
                .and_then(|&i| fields.get_mut(i))
                .ok_or_else(|| {
                    StateError::invalid_schema(format!("constraint on undeclared field {raw}"))
                })?;
            if spec.constraint.replace(constraint).is_some() {
                return Err(StateError::invalid_schema(format!(
                    "field {raw} constrained twice"
                )));
            }
        }

        for spec in &fields {
            spec.check(&spec.default)?;
        }

        for a in &fields {
            if let Some(b) = fields.iter().find(|b| b.path.is_descendant_of(&a.path)) {
                return Err(StateError::invalid_schema(format!(
                    "field {} is nested inside field {}",
                    b.path, a.path
                )));
            }
        }

        Ok(Schema { fields, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn music_schema() -> Schema {
        Schema::builder()
            .group(
                "music",
                [
                    ("volume", FieldKind::Number, json!(100)),
                    ("isPlaying", FieldKind::Bool, json!(false)),
                    ("queue", FieldKind::Sequence, json!([])),
                ],
            )
            .field("initialized", FieldKind::Bool, json!(false))
            .build()
            .unwrap()
    }

    #[test]
    fn kind_acceptance() {
        assert!(FieldKind::Bool.accepts(&json!(true)));
        assert!(!FieldKind::Bool.accepts(&json!(1)));
        assert!(FieldKind::Number.accepts(&json!(1.5)));
        assert!(FieldKind::Sequence.accepts(&json!([1, 2])));
        assert!(FieldKind::Record.accepts(&json!({"a": 1})));
        assert!(FieldKind::Any.accepts(&Value::Null));
        assert!(!FieldKind::String.accepts(&Value::Null));
    }

    #[test]
    fn declaration_order_is_kept() {
        let schema = music_schema();
        let names: Vec<String> = schema.fields().map(|f| f.path.to_dotted()).collect();
        assert_eq!(
            names,
            ["music.volume", "music.isPlaying", "music.queue", "initialized"]
        );
        assert_eq!(schema.len(), 4);
    }

    #[test]
    fn groups_are_not_fields() {
        let schema = music_schema();
        let music = FieldPath::parse("music").unwrap();
        assert!(schema.field(&music).is_none());
        assert!(schema.is_group(&music));
        assert!(!schema.is_group(&FieldPath::parse("music.volume").unwrap()));
    }

    #[test]
    fn defaults_tree() {
        assert_eq!(
            music_schema().defaults(),
            json!({
                "music": {"volume": 100, "isPlaying": false, "queue": []},
                "initialized": false
            })
        );
    }

    #[test]
    fn rejects_duplicates() {
        let err = Schema::builder()
            .field("a", FieldKind::Bool, json!(true))
            .field("/a", FieldKind::Bool, json!(true))
            .build()
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidSchema { .. }));
    }

    #[test]
    fn rejects_nested_fields() {
        let err = Schema::builder()
            .field("music", FieldKind::Record, json!({}))
            .field("music.volume", FieldKind::Number, json!(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidSchema { .. }));
    }

    #[test]
    fn rejects_bad_default() {
        let err = Schema::builder()
            .field("music.volume", FieldKind::Number, json!("loud"))
            .build()
            .unwrap_err();
        assert!(matches!(err, StateError::TypeMismatch { .. }));
    }

    fn whole_hour(value: &Value) -> Result<(), String> {
        match value.as_str() {
            Some(s) if s.ends_with(":00") => Ok(()),
            _ => Err("not a whole hour".into()),
        }
    }

    const WHOLE_HOUR: Constraint = Constraint::new("whole-hour", whole_hour);

    #[test]
    fn constraint_runs_after_kind_check() {
        let schema = Schema::builder()
            .field("alarm", FieldKind::String, json!("08:00"))
            .constrain("alarm", WHOLE_HOUR)
            .build()
            .unwrap();
        let spec = schema.field(&FieldPath::parse("alarm").unwrap()).unwrap();

        assert!(spec.check(&json!("09:00")).is_ok());
        assert!(matches!(
            spec.check(&json!(9)),
            Err(StateError::TypeMismatch { .. })
        ));
        let err = spec.check(&json!("09:30")).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidValue {
                path: "alarm".into(),
                constraint: "whole-hour",
                reason: "not a whole hour".into(),
            }
        );
    }

    #[test]
    fn constraint_applies_to_default_and_declared_fields_only() {
        let err = Schema::builder()
            .field("alarm", FieldKind::String, json!("08:15"))
            .constrain("alarm", WHOLE_HOUR)
            .build()
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidValue { .. }));

        let err = Schema::builder()
            .field("alarm", FieldKind::String, json!("08:00"))
            .constrain("snooze", WHOLE_HOUR)
            .build()
            .unwrap_err();
        assert!(matches!(err, StateError::InvalidSchema { .. }));
    }

    #[test]
    fn constraint_is_listed_by_name() {
        let schema = Schema::builder()
            .field("alarm", FieldKind::String, json!("08:00"))
            .constrain("alarm", WHOLE_HOUR)
            .field("snooze", FieldKind::Bool, json!(false))
            .build()
            .unwrap();
        let listed = serde_json::to_value(schema.fields().collect::<Vec<_>>()).unwrap();
        assert_eq!(listed[0]["constraint"], "whole-hour");
        assert!(listed[1].get("constraint").is_none());
    }
}
