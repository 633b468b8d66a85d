//! 从参数类型的 JSON Schema（schemars 生成）推导工具描述。
//!
//! 只接受一个逻辑参数：record 类型展开为 object，基础类型包在参数名下，
//! 无约束的 map 原样透传。无法识别的字段类型降级为 string 并附带说明。

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::SchemaDerivationError;
use crate::types::{Primitive, Schema, ToolSpec};

const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// 嵌套展开的最大深度，防止递归类型无限展开
const MAX_DEPTH: usize = 8;

/// 函数名约束（与主流 function calling 协议一致）
static TOOL_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("tool name regex"));

static EMPTY_DEFINITIONS: Lazy<Map<String, Value>> = Lazy::new(Map::new);

/// 参数在调用时的传递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// record 类型：原始键值表转换为该类型
    Structured,
    /// 基础类型：取唯一的值
    Primitive,
    /// 无约束 map：原样透传
    Mapping,
    /// 无参数（`()`）
    Unit,
}

enum ArgShape<'a> {
    Unit,
    Tuple(usize),
    Record(&'a Value),
    Mapping,
    Primitive(Primitive),
    Opaque(String),
}

/// 推导工具描述
pub fn derive_tool_spec(
    name: &str,
    description: Option<&str>,
    param_name: &str,
    root: &Value,
) -> Result<ToolSpec, SchemaDerivationError> {
    if !TOOL_NAME_REGEX.is_match(name) {
        return Err(SchemaDerivationError::InvalidName {
            name: name.to_string(),
        });
    }

    let defs = definitions(root);
    let parameter_schema = match arg_shape(root, defs) {
        ArgShape::Unit => {
            return Err(SchemaDerivationError::Arity {
                name: name.to_string(),
                found: 0,
            })
        }
        ArgShape::Tuple(found) => {
            return Err(SchemaDerivationError::Arity {
                name: name.to_string(),
                found,
            })
        }
        ArgShape::Record(node) => record_schema(node, defs, 0),
        ArgShape::Mapping => Schema::object(BTreeMap::new(), BTreeSet::new()),
        ArgShape::Primitive(kind) => wrap_param(param_name, Schema::primitive(kind)),
        ArgShape::Opaque(label) => wrap_param(param_name, opaque(param_name, &label)),
    };

    // 描述优先级：注册时给定 > 参数类型的文档注释 > 默认
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .or_else(|| text_of(root, "description"))
        .unwrap_or_else(|| format!("{} function", name));

    Ok(ToolSpec {
        name: name.to_string(),
        description,
        parameter_schema,
    })
}

/// 判断参数传递方式，不会失败（推导失败的工具仍可被直接调用）
pub fn param_kind(root: &Value) -> ParamKind {
    match arg_shape(root, definitions(root)) {
        ArgShape::Record(_) => ParamKind::Structured,
        ArgShape::Mapping => ParamKind::Mapping,
        ArgShape::Unit => ParamKind::Unit,
        ArgShape::Tuple(_) | ArgShape::Primitive(_) | ArgShape::Opaque(_) => ParamKind::Primitive,
    }
}

fn definitions(root: &Value) -> &Map<String, Value> {
    root.get("definitions")
        .and_then(Value::as_object)
        .unwrap_or(&EMPTY_DEFINITIONS)
}

fn arg_shape<'a>(root: &'a Value, defs: &'a Map<String, Value>) -> ArgShape<'a> {
    let node = unwrap_node(root, defs);

    match type_name(node) {
        Some("null") => ArgShape::Unit,
        Some("array") => match node.get("items") {
            Some(Value::Array(items)) if items.len() != 1 => ArgShape::Tuple(items.len()),
            _ => ArgShape::Opaque("array".to_string()),
        },
        Some("object") if node.get("properties").is_some() => ArgShape::Record(node),
        Some("object") => ArgShape::Mapping,
        Some(other) => match Primitive::from_type_name(other) {
            Some(kind) => ArgShape::Primitive(kind),
            None => ArgShape::Opaque(other.to_string()),
        },
        None if is_unconstrained(node) => ArgShape::Mapping,
        None => ArgShape::Opaque("any".to_string()),
    }
}

/// 解开 `$ref`、单元素 `allOf` 以及可空包装（`anyOf`/`oneOf` 中去掉 null 后只剩一项）
fn unwrap_node<'a>(mut node: &'a Value, defs: &'a Map<String, Value>) -> &'a Value {
    for _ in 0..MAX_DEPTH {
        if let Some(target) = node.get("$ref").and_then(Value::as_str) {
            match target
                .strip_prefix(DEFINITIONS_PREFIX)
                .and_then(|key| defs.get(key))
            {
                Some(resolved) => {
                    node = resolved;
                    continue;
                }
                None => return node,
            }
        }

        let inner = ["allOf", "anyOf", "oneOf"]
            .iter()
            .find_map(|key| single_non_null(node.get(*key)));
        match inner {
            Some(inner) => node = inner,
            None => return node,
        }
    }
    node
}

fn single_non_null(variants: Option<&Value>) -> Option<&Value> {
    let variants = variants?.as_array()?;
    let mut rest = variants.iter().filter(|v| type_name(v) != Some("null") || has_ref(v));
    let first = rest.next()?;
    match rest.next() {
        Some(_) => None,
        None => Some(first),
    }
}

fn has_ref(node: &Value) -> bool {
    node.get("$ref").is_some()
}

/// `type` 为字符串，或去掉 "null" 后只剩一项的数组
fn type_name(node: &Value) -> Option<&str> {
    match node.get("type")? {
        Value::String(name) => Some(name),
        Value::Array(names) => {
            let mut rest = names
                .iter()
                .filter_map(Value::as_str)
                .filter(|name| *name != "null");
            let first = rest.next();
            match (first, rest.next()) {
                (Some(name), None) => Some(name),
                (None, None) => Some("null"),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_unconstrained(node: &Value) -> bool {
    match node {
        Value::Bool(accept) => *accept,
        Value::Object(map) => !["$ref", "allOf", "anyOf", "oneOf", "enum", "const", "not"]
            .iter()
            .any(|key| map.contains_key(*key)),
        _ => false,
    }
}

fn text_of(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn record_schema(node: &Value, defs: &Map<String, Value>, depth: usize) -> Schema {
    let mut properties = BTreeMap::new();
    if let Some(fields) = node.get("properties").and_then(Value::as_object) {
        for (field, field_node) in fields {
            properties.insert(field.clone(), field_schema(field, field_node, defs, depth));
        }
    }

    let required: BTreeSet<String> = node
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .filter(|name| properties.contains_key(*name))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Schema::object(properties, required)
}

fn field_schema(field: &str, node: &Value, defs: &Map<String, Value>, depth: usize) -> Schema {
    let inner = unwrap_node(node, defs);
    let description = text_of(node, "description").or_else(|| text_of(inner, "description"));

    let schema = match type_name(inner) {
        Some("object") if inner.get("properties").is_some() && depth + 1 < MAX_DEPTH => {
            record_schema(inner, defs, depth + 1)
        }
        Some(name) => match Primitive::from_type_name(name) {
            Some(kind) => Schema::primitive(kind),
            None => return opaque(field, name),
        },
        None => return opaque(field, "any"),
    };
    schema.with_description(description)
}

/// 无法识别的类型降级为 string，并在描述中标注原类型
fn opaque(field: &str, label: &str) -> Schema {
    Schema::primitive(Primitive::String).with_description(Some(format!("{} ({})", field, label)))
}

fn wrap_param(param_name: &str, schema: Schema) -> Schema {
    let mut properties = BTreeMap::new();
    properties.insert(param_name.to_string(), schema);
    Schema::object(properties, BTreeSet::from([param_name.to_string()]))
}
