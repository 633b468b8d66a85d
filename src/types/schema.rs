use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// 基础类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    String,
    Integer,
    Number,
    Boolean,
}

impl Primitive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Integer => "integer",
            Primitive::Number => "number",
            Primitive::Boolean => "boolean",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(Primitive::String),
            "integer" => Some(Primitive::Integer),
            "number" => Some(Primitive::Number),
            "boolean" => Some(Primitive::Boolean),
            _ => None,
        }
    }
}

/// 参数描述（递归）：基础类型，或带字段表与必填集合的 object
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Primitive {
        kind: Primitive,
        description: Option<String>,
    },
    Object {
        properties: BTreeMap<String, Schema>,
        required: BTreeSet<String>,
        description: Option<String>,
    },
}

impl Schema {
    pub fn primitive(kind: Primitive) -> Self {
        Schema::Primitive {
            kind,
            description: None,
        }
    }

    pub fn object(properties: BTreeMap<String, Schema>, required: BTreeSet<String>) -> Self {
        Schema::Object {
            properties,
            required,
            description: None,
        }
    }

    /// 替换描述；`None` 时保留原描述
    pub fn with_description(mut self, text: Option<String>) -> Self {
        if let Some(text) = text {
            match &mut self {
                Schema::Primitive { description, .. } | Schema::Object { description, .. } => {
                    *description = Some(text)
                }
            }
        }
        self
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Schema::Primitive { description, .. } | Schema::Object { description, .. } => {
                description.as_deref()
            }
        }
    }

    pub fn properties(&self) -> Option<&BTreeMap<String, Schema>> {
        match self {
            Schema::Object { properties, .. } => Some(properties),
            Schema::Primitive { .. } => None,
        }
    }

    pub fn is_required(&self, field: &str) -> bool {
        matches!(self, Schema::Object { required, .. } if required.contains(field))
    }

    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        match self {
            Schema::Primitive { kind, .. } => {
                map.insert("type".into(), json!(kind.as_str()));
            }
            Schema::Object {
                properties,
                required,
                ..
            } => {
                let props: Map<String, Value> = properties
                    .iter()
                    .map(|(name, schema)| (name.clone(), schema.to_json()))
                    .collect();
                map.insert("type".into(), json!("object"));
                map.insert("properties".into(), Value::Object(props));
                map.insert("required".into(), json!(required));
            }
        }
        if let Some(description) = self.description() {
            map.insert("description".into(), json!(description));
        }
        Value::Object(map)
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// 暴露给模型的工具描述，注册时生成一次，之后不可变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "parameters")]
    pub parameter_schema: Schema,
}

impl ToolSpec {
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameter_schema.to_json(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_schema_renders_properties_and_required() {
        let mut properties = BTreeMap::new();
        properties.insert("query".to_string(), Schema::primitive(Primitive::String));
        properties.insert("count".to_string(), Schema::primitive(Primitive::Integer));
        let required = BTreeSet::from(["query".to_string()]);

        let rendered = Schema::object(properties, required).to_json();

        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["query"]["type"], "string");
        assert_eq!(rendered["properties"]["count"]["type"], "integer");
        assert_eq!(rendered["required"], json!(["query"]));
    }

    #[test]
    fn empty_object_still_carries_required_array() {
        let rendered = Schema::object(BTreeMap::new(), BTreeSet::new()).to_json();
        assert_eq!(rendered["required"], json!([]));
        assert_eq!(rendered["properties"], json!({}));
    }

    #[test]
    fn description_is_kept_when_none_is_given() {
        let schema = Schema::primitive(Primitive::Boolean)
            .with_description(Some("flag".to_string()))
            .with_description(None);
        assert_eq!(schema.description(), Some("flag"));
        assert_eq!(schema.to_json()["description"], "flag");
    }

    #[test]
    fn tool_spec_serializes_in_function_calling_shape() {
        let spec = ToolSpec {
            name: "echo".to_string(),
            description: "Echo text".to_string(),
            parameter_schema: Schema::object(BTreeMap::new(), BTreeSet::new()),
        };

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value, spec.to_json());
        assert_eq!(value["parameters"]["type"], "object");
    }
}
