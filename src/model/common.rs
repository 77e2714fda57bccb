use chrono::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Field kind: either a scalar attribute kind or one of the four relation
/// kinds. The relation kinds come in fixed pairs — see [`FieldKind::paired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Date,
    ManyToOne,
    OneToMany,
    OneToOne,
    ManyToMany,
}

impl FieldKind {
    pub fn is_relation(&self) -> bool {
        matches!(
            self,
            FieldKind::ManyToOne
                | FieldKind::OneToMany
                | FieldKind::OneToOne
                | FieldKind::ManyToMany
        )
    }

    /// Single-cardinality relation kinds keep at most one outgoing edge per
    /// source instance; reconciliation replaces instead of appending.
    pub fn is_single_cardinality(&self) -> bool {
        matches!(self, FieldKind::ManyToOne | FieldKind::OneToOne)
    }

    /// The kind the paired field on the other side of the relation must
    /// have. Returns `None` for scalar kinds.
    pub fn paired(&self) -> Option<FieldKind> {
        match self {
            FieldKind::ManyToOne => Some(FieldKind::OneToMany),
            FieldKind::OneToMany => Some(FieldKind::ManyToOne),
            FieldKind::OneToOne => Some(FieldKind::OneToOne),
            FieldKind::ManyToMany => Some(FieldKind::ManyToMany),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::ManyToOne => "manyToOne",
            FieldKind::OneToMany => "oneToMany",
            FieldKind::OneToOne => "oneToOne",
            FieldKind::ManyToMany => "manyToMany",
        }
    }
}

/// Navigation grouping for entity definitions. Has no effect on storage or
/// query behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTier {
    Primary,
    Secondary,
    Tertiary,
}

impl Default for TypeTier {
    fn default() -> Self {
        TypeTier::Primary
    }
}

/// A scalar attribute value, validated against the owning field's kind at
/// the write boundary. Dates are carried as RFC 3339 strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl AttributeValue {
    /// Convert a raw JSON value into an attribute value. Arrays and objects
    /// have no scalar representation and are rejected.
    pub fn from_json(value: &serde_json::Value) -> Option<AttributeValue> {
        match value {
            serde_json::Value::Null => Some(AttributeValue::Null),
            serde_json::Value::Bool(b) => Some(AttributeValue::Boolean(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(AttributeValue::Number),
            serde_json::Value::String(s) => Some(AttributeValue::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttributeValue::Null => serde_json::Value::Null,
            AttributeValue::Boolean(b) => serde_json::Value::Bool(*b),
            AttributeValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn matches_kind(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (AttributeValue::Null, _) => true,
            (AttributeValue::String(_), FieldKind::String) => true,
            (AttributeValue::String(s), FieldKind::Date) => {
                DateTime::parse_from_rfc3339(s).is_ok()
            }
            (AttributeValue::Number(_), FieldKind::Number) => true,
            (AttributeValue::Boolean(_), FieldKind::Boolean) => true,
            _ => false,
        }
    }

    /// Human-readable rendition, used for display titles and substring
    /// search. Null renders as the empty string.
    pub fn render(&self) -> String {
        match self {
            AttributeValue::Null => String::new(),
            AttributeValue::Boolean(b) => b.to_string(),
            AttributeValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            AttributeValue::String(s) => s.clone(),
        }
    }
}
