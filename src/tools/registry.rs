use anyhow::Context;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{AgentError, Result, SchemaDerivationError};
use crate::types::ToolSpec;

use super::schema::{derive_tool_spec, param_kind, ParamKind};

type Handler = Box<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// 宿主函数：名称、参数名、参数类型的 schema，以及类型擦除后的调用入口
pub struct HostFunction {
    name: String,
    description: Option<String>,
    param_name: String,
    param_schema: Value,
    handler: Handler,
}

impl HostFunction {
    /// 包装一个只接收一个参数的函数
    pub fn new<A, R, F>(name: impl Into<String>, param_name: impl Into<String>, func: F) -> Self
    where
        A: DeserializeOwned + JsonSchema,
        R: Serialize,
        F: Fn(A) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let handler = move |raw: Value| -> anyhow::Result<Value> {
            let arg: A = serde_json::from_value(raw).context("参数转换失败")?;
            let output = func(arg)?;
            serde_json::to_value(output).context("结果序列化失败")
        };

        HostFunction {
            name: name.into(),
            description: None,
            param_name: param_name.into(),
            param_schema: serde_json::to_value(schemars::schema_for!(A)).unwrap_or_else(|_| json!({})),
            handler: Box::new(handler),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    /// 推导工具描述
    pub fn derive_spec(&self) -> std::result::Result<ToolSpec, SchemaDerivationError> {
        derive_tool_spec(
            &self.name,
            self.description.as_deref(),
            &self.param_name,
            &self.param_schema,
        )
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("param_name", &self.param_name)
            .finish_non_exhaustive()
    }
}

struct Entry {
    function: HostFunction,
    kind: ParamKind,
}

/// 工具注册表：构建后只读，可在多个会话间共享
#[derive(Default)]
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    specs: Vec<ToolSpec>,
    rejected: Vec<SchemaDerivationError>,
}

impl ToolRegistry {
    /// 逐个注册；单个函数推导失败只记录日志，不影响其他函数
    pub fn new(functions: impl IntoIterator<Item = HostFunction>) -> Self {
        let mut registry = ToolRegistry::default();

        for function in functions {
            let name = function.name().to_string();
            if registry.entries.contains_key(&name) {
                let err = SchemaDerivationError::DuplicateName { name };
                warn!(error = %err, "跳过工具");
                registry.rejected.push(err);
                continue;
            }

            match function.derive_spec() {
                Ok(spec) => {
                    debug!(tool = %spec.name, "注册工具");
                    registry.specs.push(spec);
                }
                Err(err) => {
                    // 不暴露给模型，但仍可直接调用
                    warn!(tool = %name, error = %err, "工具 schema 推导失败，已从工具列表中省略");
                    registry.rejected.push(err);
                }
            }

            let kind = param_kind(&function.param_schema);
            registry.entries.insert(name, Entry { function, kind });
        }

        registry
    }

    /// 暴露给模型的工具描述（注册顺序）
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    /// 注册时被拒绝的函数
    pub fn rejected(&self) -> &[SchemaDerivationError] {
        &self.rejected
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按名称调用工具
    pub fn invoke(&self, name: &str, raw_arguments: &Map<String, Value>) -> Result<Value> {
        let entry = self.entries.get(name).ok_or_else(|| AgentError::UnknownTool {
            name: name.to_string(),
        })?;

        let argument = prepare_argument(entry.kind, entry.function.param_name(), raw_arguments);
        debug!(tool = %name, "调用工具");

        (entry.function.handler)(argument).map_err(|err| AgentError::ToolInvocation {
            name: name.to_string(),
            message: format!("{:#}", err),
        })
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .field("rejected", &self.rejected.len())
            .finish()
    }
}

/// 把模型给出的键值表转换成参数值
fn prepare_argument(kind: ParamKind, param_name: &str, raw: &Map<String, Value>) -> Value {
    match kind {
        ParamKind::Structured => match sole_entry(raw) {
            // 模型有时会多包一层参数名
            Some((key, inner @ Value::Object(_))) if key == param_name => inner.clone(),
            _ => Value::Object(raw.clone()),
        },
        ParamKind::Primitive => match sole_entry(raw) {
            Some((_, value)) => value.clone(),
            None => raw
                .get(param_name)
                .cloned()
                .unwrap_or_else(|| Value::Object(raw.clone())),
        },
        ParamKind::Mapping => Value::Object(raw.clone()),
        ParamKind::Unit => Value::Null,
    }
}

fn sole_entry(raw: &Map<String, Value>) -> Option<(&String, &Value)> {
    if raw.len() == 1 {
        raw.iter().next()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoRequest {
        text: String,
        #[serde(default)]
        times: u32,
    }

    fn echo() -> HostFunction {
        HostFunction::new("echo", "request", |req: EchoRequest| {
            Ok(req.text.repeat(req.times.max(1) as usize))
        })
        .with_description("Echo text back")
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn structured_arguments_are_converted() {
        let registry = ToolRegistry::new(vec![echo()]);
        let out = registry.invoke("echo", &args(json!({"text": "hi", "times": 2}))).unwrap();
        assert_eq!(out, json!("hihi"));
    }

    #[test]
    fn one_level_of_param_name_wrapping_is_stripped() {
        let registry = ToolRegistry::new(vec![echo()]);
        let out = registry
            .invoke("echo", &args(json!({"request": {"text": "hi"}})))
            .unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[test]
    fn primitive_argument_takes_sole_value() {
        let shout = HostFunction::new("shout", "text", |text: String| Ok(text.to_uppercase()));
        let registry = ToolRegistry::new(vec![shout]);

        let out = registry.invoke("shout", &args(json!({"text": "hi"}))).unwrap();
        assert_eq!(out, json!("HI"));
        let out = registry.invoke("shout", &args(json!({"whatever": "yo"}))).unwrap();
        assert_eq!(out, json!("YO"));
    }

    #[test]
    fn mapping_argument_is_passed_through() {
        let keys = HostFunction::new("keys", "args", |map: Map<String, Value>| {
            Ok(map.keys().cloned().collect::<Vec<_>>())
        });
        let registry = ToolRegistry::new(vec![keys]);

        let out = registry.invoke("keys", &args(json!({"a": 1, "b": 2}))).unwrap();
        assert_eq!(out, json!(["a", "b"]));
    }

    #[test]
    fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new(vec![echo()]);
        let err = registry.invoke("missing", &Map::new()).unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { name } if name == "missing"));
    }

    #[test]
    fn callable_failure_becomes_invocation_error() {
        let failing = HostFunction::new("fail", "text", |_: String| -> anyhow::Result<String> {
            anyhow::bail!("boom")
        });
        let registry = ToolRegistry::new(vec![failing]);

        let err = registry.invoke("fail", &args(json!({"text": "x"}))).unwrap_err();
        match err {
            AgentError::ToolInvocation { name, message } => {
                assert_eq!(name, "fail");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bad_arguments_become_invocation_error() {
        let registry = ToolRegistry::new(vec![echo()]);
        let err = registry.invoke("echo", &args(json!({"times": 2}))).unwrap_err();
        assert!(matches!(err, AgentError::ToolInvocation { .. }));
    }

    #[test]
    fn derivation_failure_does_not_block_other_tools() {
        let noop = HostFunction::new("noop", "args", |_: ()| Ok("done"));
        let bad_name = HostFunction::new("bad name", "text", |text: String| Ok(text));
        let registry = ToolRegistry::new(vec![noop, echo(), bad_name]);

        let names: Vec<&str> = registry.specs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo"]);
        assert_eq!(registry.rejected().len(), 2);

        // 未暴露的工具仍可直接调用
        assert_eq!(registry.invoke("noop", &Map::new()).unwrap(), json!("done"));
    }

    #[test]
    fn duplicate_names_keep_the_first_registration() {
        let second = HostFunction::new("echo", "text", |_: String| Ok("second"));
        let registry = ToolRegistry::new(vec![echo(), second]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs().len(), 1);
        assert!(matches!(
            registry.rejected()[0],
            SchemaDerivationError::DuplicateName { .. }
        ));
        let out = registry.invoke("echo", &args(json!({"text": "first"}))).unwrap();
        assert_eq!(out, json!("first"));
    }

    #[test]
    fn explicit_description_wins() {
        let registry = ToolRegistry::new(vec![echo()]);
        assert_eq!(registry.spec("echo").unwrap().description, "Echo text back");
        assert!(registry.spec("echo").unwrap().parameter_schema.is_required("text"));
        assert!(!registry.spec("echo").unwrap().parameter_schema.is_required("times"));
    }
}
