use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::slack::SlackApi;

/// Slack 用户名缓存：把用户 id 解析为可读名称，失败时缓存原始 id
pub struct UserDirectory {
    api: Arc<dyn SlackApi>,
    cache: Mutex<HashMap<String, String>>,
}

impl UserDirectory {
    pub fn new(api: Arc<dyn SlackApi>) -> Self {
        UserDirectory {
            api,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 优先 display name，其次 real name、用户名，最后原始 id
    ///
    /// Slack Connect 用户需要带上 team 才能查到远端资料。
    pub fn resolve(&self, user_id: &str, team_id: Option<&str>) -> String {
        if user_id.is_empty() {
            return "Unknown".to_string();
        }

        let key = match team_id {
            Some(team) => format!("{}:{}", team, user_id),
            None => user_id.to_string(),
        };

        if let Some(name) = self.lock().get(&key) {
            return name.clone();
        }

        let name = match self.api.user_info(user_id, team_id) {
            Ok(user) => user.preferred_name().unwrap_or(user_id).to_string(),
            Err(err) => {
                debug!(user = %user_id, error = %err, "查询用户失败，使用原始 id");
                user_id.to_string()
            }
        };

        self.lock().insert(key, name.clone());
        name
    }

    pub fn cached(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // 缓存内容始终完整，中毒后继续使用
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtins::slack::testing::MemorySlack;
    use crate::tools::builtins::slack::{SlackProfile, SlackUser};

    fn user(name: &str, real: &str, display: &str) -> SlackUser {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        SlackUser {
            name: non_empty(name),
            profile: SlackProfile {
                display_name: non_empty(display),
                real_name: non_empty(real),
            },
        }
    }

    #[test]
    fn prefers_display_then_real_then_user_name() {
        let slack = MemorySlack::default()
            .with_user("U1", user("ann", "Ann Lee", "annie"))
            .with_user("U2", user("bob", "Bob Roe", ""))
            .with_user("U3", user("cat", "", ""));
        let directory = UserDirectory::new(Arc::new(slack));

        assert_eq!(directory.resolve("U1", None), "annie");
        assert_eq!(directory.resolve("U2", None), "Bob Roe");
        assert_eq!(directory.resolve("U3", None), "cat");
        assert_eq!(directory.resolve("", None), "Unknown");
    }

    #[test]
    fn failures_cache_the_raw_id() {
        let slack = Arc::new(MemorySlack::default());
        let directory = UserDirectory::new(slack.clone());

        assert_eq!(directory.resolve("U404", None), "U404");
        assert_eq!(directory.resolve("U404", None), "U404");
        assert_eq!(slack.user_lookups(), 1);
        assert_eq!(directory.cached(), 1);
    }

    #[test]
    fn team_is_part_of_the_cache_key() {
        let slack = Arc::new(MemorySlack::default().with_user("U1", user("ann", "", "")));
        let directory = UserDirectory::new(slack.clone());

        directory.resolve("U1", None);
        directory.resolve("U1", Some("T9"));
        directory.resolve("U1", Some("T9"));

        assert_eq!(slack.user_lookups(), 2);
        assert_eq!(directory.cached(), 2);
    }
}
