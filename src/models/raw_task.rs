use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Dynamically-typed custom field value as returned by the tracker.
///
/// Anything that is not one of the five shapes the pipeline understands is
/// kept as `Unsupported` so a single odd field never fails a whole page.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(into = "Value")]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    String(String),
    StringList(Vec<String>),
    #[default]
    Null,
    Unsupported(&'static str),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Integer(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::String(_) => "string",
            FieldValue::StringList(_) => "string list",
            FieldValue::Null => "null",
            FieldValue::Unsupported(kind) => kind,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => n
                    .as_f64()
                    .map(FieldValue::Float)
                    .unwrap_or(FieldValue::Unsupported("number")),
            },
            Value::String(s) => FieldValue::String(s),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s),
                        _ => return FieldValue::Unsupported("array"),
                    }
                }
                FieldValue::StringList(out)
            }
            Value::Bool(_) => FieldValue::Unsupported("bool"),
            Value::Object(_) => FieldValue::Unsupported("object"),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(FieldValue::from)
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Integer(i) => Value::from(i),
            FieldValue::Float(f) => Value::from(f),
            FieldValue::String(s) => Value::String(s),
            FieldValue::StringList(items) => Value::from(items),
            FieldValue::Null | FieldValue::Unsupported(_) => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldOption {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub orderindex: Option<Value>,
}

impl FieldOption {
    /// Dropdown options carry `name`, label options carry `label`.
    pub fn display(&self) -> &str {
        self.label
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeConfig {
    #[serde(default)]
    pub options: Vec<FieldOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomField {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub value: FieldValue,
    #[serde(default)]
    pub type_config: Option<TypeConfig>,
}

impl CustomField {
    pub fn options(&self) -> &[FieldOption] {
        self.type_config
            .as_ref()
            .map(|config| config.options.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Assignee {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTask {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date_done: FieldValue,
    #[serde(default)]
    pub assignees: Vec<Assignee>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListRef {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPage {
    #[serde(default)]
    pub tasks: Vec<RawTask>,
    #[serde(default)]
    pub last_page: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListsResponse {
    #[serde(default)]
    pub lists: Vec<ListRef>,
}
