pub mod directory;
pub mod prompt_user;
pub mod slack;
pub mod time;

use std::sync::Arc;

pub use directory::UserDirectory;
pub use slack::{SlackApi, SlackApiError, SlackTools};

use super::registry::HostFunction;

/// 不依赖外部服务的内置工具
pub fn default_functions() -> Vec<HostFunction> {
    vec![
        HostFunction::new("prompt_user", "request", prompt_user::prompt_user),
        HostFunction::new("get_time", "request", time::get_time),
    ]
}

/// Slack 工具，三个函数共享同一个用户名缓存
pub fn slack_functions(api: Arc<dyn SlackApi>, directory: Arc<UserDirectory>) -> Vec<HostFunction> {
    let tools = SlackTools::new(api, directory);

    let channels = tools.clone();
    let search = tools.clone();
    let threads = tools;

    vec![
        HostFunction::new("get_slack_channels", "request", move |request: slack::GetChannelsRequest| {
            channels.get_channels(request)
        }),
        HostFunction::new("search_slack", "request", move |request: slack::SlackSearchRequest| {
            search.search(request)
        }),
        HostFunction::new("get_thread_messages", "params", move |input: slack::ThreadInput| {
            threads.thread_messages(input)
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use serde_json::{json, Map, Value};
    use super::slack::testing::MemorySlack;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> ToolRegistry {
        let slack: Arc<dyn SlackApi> = Arc::new(MemorySlack::default());
        let directory = Arc::new(UserDirectory::new(slack.clone()));
        let mut functions = default_functions();
        functions.extend(slack_functions(slack, directory));
        ToolRegistry::new(functions)
    }

    #[test]
    fn every_builtin_gets_a_schema() {
        let registry = registry();
        let names: Vec<&str> = registry.specs().iter().map(|s| s.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "prompt_user",
                "get_time",
                "get_slack_channels",
                "search_slack",
                "get_thread_messages"
            ]
        );
        assert!(registry.rejected().is_empty());

        let search = registry.spec("search_slack").unwrap();
        assert_eq!(search.description, "Search Slack messages across channels.");
        assert!(search.parameter_schema.is_required("query"));
        assert!(!search.parameter_schema.is_required("count"));
        assert!(!search.parameter_schema.is_required("channels"));
    }

    #[test]
    fn builtins_are_dispatchable_through_the_registry() {
        let registry = registry();

        let out = registry
            .invoke("prompt_user", &args(json!({"q": "Which channel?"})))
            .unwrap();
        assert_eq!(out, json!("Awaiting user response: Which channel?"));

        let out = registry.invoke("get_time", &Map::new()).unwrap();
        assert!(out.as_str().is_some());

        let out = registry
            .invoke("search_slack", &args(json!({"request": {"query": "deploy"}})))
            .unwrap();
        assert_eq!(out, json!("No messages found for query: 'deploy'"));

        let out = registry.invoke("get_slack_channels", &Map::new()).unwrap();
        assert_eq!(out, json!([]));
    }

    #[test]
    fn invalid_thread_url_is_a_tool_failure() {
        let registry = registry();
        let err = registry
            .invoke("get_thread_messages", &args(json!({"thread_url": "nope"})))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::AgentError::ToolInvocation { ref name, .. } if name == "get_thread_messages"
        ));
    }
}
