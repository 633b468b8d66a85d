//! Slack 工具：频道列表、消息搜索、线程读取。
//!
//! 网络访问通过 [`SlackApi`] 注入，这里只负责参数校验、查询拼装和结果整理。

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::directory::UserDirectory;

/// 搜索结果中单条消息的最大展示长度（字符）
const PREVIEW_CHARS: usize = 200;

/// 线程链接最后一段：p + 时间戳数字
static MESSAGE_SEGMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^p(\d+)$").expect("message segment regex"));

/// Slack Web API 返回的错误码，例如 `thread_not_found`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Slack API error: {code}")]
pub struct SlackApiError {
    pub code: String,
}

impl SlackApiError {
    pub fn new(code: impl Into<String>) -> Self {
        SlackApiError { code: code.into() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_archived: bool,
    pub num_members: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelRef {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reaction {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
}

/// 消息（搜索结果与线程回复共用）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackMessage {
    #[serde(default)]
    pub text: String,
    pub user: Option<String>,
    pub team: Option<String>,
    pub user_team: Option<String>,
    pub ts: Option<String>,
    pub channel: Option<ChannelRef>,
    pub permalink: Option<String>,
    #[serde(default)]
    pub reply_count: u64,
    #[serde(default)]
    pub reply_users_count: u64,
    #[serde(default)]
    pub reply_users: Vec<String>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl SlackMessage {
    /// Slack Connect 消息的用户来自其他 team
    fn team_id(&self) -> Option<&str> {
        self.team.as_deref().or(self.user_team.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub matches: Vec<SlackMessage>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackProfile {
    pub display_name: Option<String>,
    pub real_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackUser {
    pub name: Option<String>,
    #[serde(default)]
    pub profile: SlackProfile,
}

impl SlackUser {
    pub fn preferred_name(&self) -> Option<&str> {
        [
            &self.profile.display_name,
            &self.profile.real_name,
            &self.name,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|s| !s.is_empty())
    }
}

/// Slack Web API 的最小接口
pub trait SlackApi: Send + Sync {
    /// conversations.list
    fn list_channels(
        &self,
        exclude_archived: bool,
        types: &str,
    ) -> std::result::Result<Vec<SlackChannel>, SlackApiError>;

    /// search.messages
    fn search_messages(
        &self,
        query: &str,
        sort: &str,
        count: u32,
    ) -> std::result::Result<SearchPage, SlackApiError>;

    /// conversations.replies
    fn conversation_replies(
        &self,
        channel: &str,
        ts: &str,
    ) -> std::result::Result<Vec<SlackMessage>, SlackApiError>;

    /// users.info
    fn user_info(
        &self,
        user: &str,
        team: Option<&str>,
    ) -> std::result::Result<SlackUser, SlackApiError>;
}

/// Get a list of public Slack channels in the workspace.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GetChannelsRequest {
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default)]
    pub include_private: bool,
}

/// Search Slack messages across channels.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SlackSearchRequest {
    /// Search text
    pub query: String,
    /// Comma separated channel names to search in
    pub channels: Option<String>,
    /// Either "timestamp" or "score"
    #[serde(default = "default_sort")]
    pub sort: String,
    /// Number of results, 1 to 100
    #[serde(default = "default_count")]
    pub count: u32,
    /// ISO 8601 start of the time range
    pub start_time: Option<String>,
    /// ISO 8601 end of the time range
    pub end_time: Option<String>,
}

fn default_sort() -> String {
    "timestamp".to_string()
}

fn default_count() -> u32 {
    40
}

/// Get all messages from a Slack thread, e.g.
/// https://your-workspace.slack.com/archives/ABCDEF123/p1717518829123456
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThreadInput {
    /// Full URL of the Slack thread
    pub thread_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadMessage {
    pub text: String,
    pub user: Option<String>,
    pub timestamp: Option<String>,
    pub reply_count: u64,
    pub reply_users_count: u64,
    pub reply_users: Vec<String>,
}

/// Slack 工具集合，共享同一个 API 客户端与用户名缓存
#[derive(Clone)]
pub struct SlackTools {
    api: Arc<dyn SlackApi>,
    directory: Arc<UserDirectory>,
}

impl SlackTools {
    pub fn new(api: Arc<dyn SlackApi>, directory: Arc<UserDirectory>) -> Self {
        SlackTools { api, directory }
    }

    /// 只返回公开频道（不支持私有频道）
    pub fn get_channels(&self, request: GetChannelsRequest) -> Result<Vec<ChannelSummary>> {
        if request.include_private {
            debug!("私有频道不在查询范围内");
        }

        let channels = self
            .api
            .list_channels(!request.include_archived, "public_channel")
            .map_err(|err| {
                error!(error = %err, "获取频道列表失败");
                err
            })?;

        debug!(count = channels.len(), "获取到 Slack 频道");
        Ok(channels
            .into_iter()
            .map(|channel| ChannelSummary { name: channel.name })
            .collect())
    }

    /// 搜索消息；参数错误与 API 错误都以文本返回给模型
    pub fn search(&self, request: SlackSearchRequest) -> Result<String> {
        if let Some(problem) = validate_search(&request) {
            return Ok(problem.to_string());
        }

        let query = build_search_query(&request);
        debug!(query = %query, sort = %request.sort, count = request.count, "执行 Slack 搜索");

        let mut page = match self.api.search_messages(&query, &request.sort, request.count) {
            Ok(page) => page,
            Err(err) => {
                error!(error = %err, "Slack 搜索失败");
                return Ok(err.to_string());
            }
        };

        for message in &mut page.matches {
            self.resolve_users(message);
        }

        debug!(total = page.total, returned = page.matches.len(), "Slack 搜索完成");
        Ok(format_search_results(&query, &page))
    }

    /// 读取线程；链接无效视为工具失败，线程不存在返回空列表
    pub fn thread_messages(&self, input: ThreadInput) -> Result<Vec<ThreadMessage>> {
        let (channel, ts) = parse_thread_url(&input.thread_url)?;

        let mut messages = match self.api.conversation_replies(&channel, &ts) {
            Ok(messages) => messages,
            Err(err) if err.code == "thread_not_found" => {
                warn!(channel = %channel, ts = %ts, "线程不存在");
                return Ok(Vec::new());
            }
            Err(err) => {
                error!(error = %err, "读取线程失败");
                return Err(err.into());
            }
        };

        debug!(count = messages.len(), "读取到线程消息");
        Ok(messages
            .iter_mut()
            .map(|message| {
                self.resolve_users(message);
                ThreadMessage {
                    text: std::mem::take(&mut message.text),
                    user: message.user.take(),
                    timestamp: message.ts.take(),
                    reply_count: message.reply_count,
                    reply_users_count: message.reply_users_count,
                    reply_users: std::mem::take(&mut message.reply_users),
                }
            })
            .collect())
    }

    /// 把消息中的用户 id（作者、回复者、表情回应者）替换为可读名称
    fn resolve_users(&self, message: &mut SlackMessage) {
        let team = message.team_id().map(str::to_string);
        let team = team.as_deref();

        if let Some(user) = message.user.as_mut() {
            *user = self.directory.resolve(user, team);
        }
        for user in &mut message.reply_users {
            *user = self.directory.resolve(user, team);
        }
        for reaction in &mut message.reactions {
            for user in &mut reaction.users {
                *user = self.directory.resolve(user, team);
            }
        }
    }
}

fn validate_search(request: &SlackSearchRequest) -> Option<&'static str> {
    if request.query.trim().is_empty() {
        return Some("Query parameter is required and cannot be empty");
    }
    if !(1..=100).contains(&request.count) {
        return Some("Count must be between 1 and 100");
    }
    if request.sort != "timestamp" && request.sort != "score" {
        return Some("Sort must be either 'timestamp' or 'score'");
    }
    None
}

/// 拼接搜索语句：频道过滤 `in:#name`，时间过滤 `after:`/`before:`
pub fn build_search_query(request: &SlackSearchRequest) -> String {
    let mut query = request.query.trim().to_string();

    if let Some(channels) = &request.channels {
        let filters: Vec<String> = channels
            .split(',')
            .map(str::trim)
            .filter(|channel| !channel.is_empty())
            .map(|channel| {
                if channel.starts_with('#') {
                    format!("in:{}", channel)
                } else {
                    format!("in:#{}", channel)
                }
            })
            .collect();
        if !filters.is_empty() {
            query = format!("{} {}", query, filters.join(" "));
        }
    }

    for (value, operator) in [(&request.start_time, "after"), (&request.end_time, "before")] {
        let Some(value) = value else { continue };
        match parse_iso_date(value) {
            Some(date) => query = format!("{} {}:{}", query, operator, date.format("%Y-%m-%d")),
            None => warn!(value = %value, "时间格式无效，忽略该过滤条件"),
        }
    }

    query
}

/// 接受带时区或不带时区的时间，以及纯日期
fn parse_iso_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// 搜索结果整理为给模型阅读的文本
pub fn format_search_results(query: &str, page: &SearchPage) -> String {
    if page.total == 0 {
        return format!("No messages found for query: '{}'", query);
    }

    let mut lines = vec![
        format!("Found {} messages for query: '{}'", page.total, query),
        format!("Showing top {} results:\n", page.matches.len()),
    ];

    for (index, message) in page.matches.iter().enumerate() {
        let channel = message
            .channel
            .as_ref()
            .and_then(|c| c.name.as_deref())
            .unwrap_or("unknown-channel");
        let user = message.user.as_deref().unwrap_or("Unknown");

        let mut entry = format!("{}. #{} - @{}", index + 1, channel, user);
        if let Some(when) = message.ts.as_deref().and_then(format_timestamp) {
            entry.push_str(&format!(" ({})", when));
        }
        entry.push_str(&format!("\n   {}", preview(&message.text)));
        if let Some(link) = message.permalink.as_deref().filter(|l| !l.is_empty()) {
            entry.push_str(&format!("\n   Link: {}", link));
        }
        entry.push('\n');
        lines.push(entry);
    }

    let shown = page.matches.len() as u64;
    let has_more = page
        .pagination
        .as_ref()
        .map(|p| p.total_count > shown)
        .unwrap_or(false);
    if has_more {
        lines.push(format!(
            "... and {} more results",
            page.total.saturating_sub(shown)
        ));
    }

    lines.join("\n")
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Slack 时间戳（秒.微秒）格式化为 UTC 分钟精度
fn format_timestamp(ts: &str) -> Option<String> {
    let seconds: f64 = ts.parse().ok()?;
    let millis = (seconds * 1000.0) as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

/// 解析线程链接，返回（频道 id，父消息时间戳）
///
/// `.../archives/C123/p1717518829123456` 的时间戳为 `1717518829.123456`，
/// 链接带 `thread_ts` 参数时以参数为准。
pub fn parse_thread_url(thread_url: &str) -> Result<(String, String)> {
    let url = Url::parse(thread_url)
        .with_context(|| format!("Invalid Slack thread URL format: {}", thread_url))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|segment| !segment.is_empty()).collect())
        .unwrap_or_default();
    if segments.len() < 3 {
        bail!("Invalid Slack thread URL format: {}", thread_url);
    }

    let channel = segments[segments.len() - 2].to_string();
    let digits = MESSAGE_SEGMENT_REGEX
        .captures(segments[segments.len() - 1])
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .with_context(|| format!("Invalid Slack thread URL format: {}", thread_url))?;

    let split = digits.len().min(10);
    let base_ts = format!("{}.{}", &digits[..split], &digits[split..]);

    let ts = url
        .query_pairs()
        .find(|(key, _)| key == "thread_ts")
        .map(|(_, value)| value.into_owned())
        .unwrap_or(base_ts);

    Ok((channel, ts))
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySlack;
    use super::*;

    fn search_request(query: &str) -> SlackSearchRequest {
        SlackSearchRequest {
            query: query.to_string(),
            channels: None,
            sort: default_sort(),
            count: default_count(),
            start_time: None,
            end_time: None,
        }
    }

    fn slack_tools(slack: MemorySlack) -> (SlackTools, Arc<MemorySlack>) {
        let slack = Arc::new(slack);
        let directory = Arc::new(UserDirectory::new(slack.clone()));
        (SlackTools::new(slack.clone(), directory), slack)
    }

    fn ann() -> SlackUser {
        SlackUser {
            name: Some("ann".to_string()),
            profile: SlackProfile {
                display_name: Some("annie".to_string()),
                real_name: None,
            },
        }
    }

    fn message(text: &str, user: &str, ts: &str) -> SlackMessage {
        SlackMessage {
            text: text.to_string(),
            user: Some(user.to_string()),
            ts: Some(ts.to_string()),
            channel: Some(ChannelRef {
                name: Some("deploys".to_string()),
            }),
            ..SlackMessage::default()
        }
    }

    #[test]
    fn query_gets_channel_and_date_filters() {
        let mut request = search_request("  release  ");
        request.channels = Some("general, #eng,".to_string());
        request.start_time = Some("2024-06-01T10:00:00Z".to_string());
        request.end_time = Some("2024-06-30".to_string());

        assert_eq!(
            build_search_query(&request),
            "release in:#general in:#eng after:2024-06-01 before:2024-06-30"
        );
    }

    #[test]
    fn invalid_times_are_ignored() {
        let mut request = search_request("release");
        request.start_time = Some("last tuesday".to_string());
        request.end_time = Some("2024-06-30T08:00:00+09:00".to_string());
        assert_eq!(build_search_query(&request), "release before:2024-06-30");
    }

    #[test]
    fn validation_problems_come_back_as_text() {
        let (tools, slack) = slack_tools(MemorySlack::default());

        let out = tools.search(search_request(" ")).unwrap();
        assert_eq!(out, "Query parameter is required and cannot be empty");

        let mut request = search_request("x");
        request.count = 0;
        assert_eq!(tools.search(request).unwrap(), "Count must be between 1 and 100");

        let mut request = search_request("x");
        request.sort = "newest".to_string();
        assert_eq!(
            tools.search(request).unwrap(),
            "Sort must be either 'timestamp' or 'score'"
        );

        assert!(slack.queries.lock().unwrap().is_empty());
    }

    #[test]
    fn search_formats_matches_with_resolved_users() {
        let long = "x".repeat(250);
        let mut first = message("deployed v2", "U1", "1717518829.123456");
        first.permalink = Some("https://acme.slack.com/archives/C1/p1717518829123456".to_string());
        let page = SearchPage {
            total: 5,
            matches: vec![first, message(&long, "U2", "not-a-ts")],
            pagination: Some(Pagination { total_count: 5 }),
        };
        let slack = MemorySlack {
            search: Some(Ok(page)),
            ..MemorySlack::default()
        }
        .with_user("U1", ann());
        let (tools, _) = slack_tools(slack);

        let out = tools.search(search_request("deploy")).unwrap();

        assert!(out.starts_with("Found 5 messages for query: 'deploy'\nShowing top 2 results:\n"));
        assert!(out.contains("1. #deploys - @annie (2024-06-04 16:33)\n   deployed v2\n   Link: https://acme.slack.com/archives/C1/p1717518829123456"));
        assert!(out.contains(&format!("2. #deploys - @U2\n   {}...", "x".repeat(200))));
        assert!(out.ends_with("... and 3 more results"));
    }

    #[test]
    fn empty_search_and_api_errors_are_text() {
        let (tools, _) = slack_tools(MemorySlack::default());
        assert_eq!(
            tools.search(search_request("nothing")).unwrap(),
            "No messages found for query: 'nothing'"
        );

        let slack = MemorySlack {
            search: Some(Err(SlackApiError::new("invalid_auth"))),
            ..MemorySlack::default()
        };
        let (tools, _) = slack_tools(slack);
        assert_eq!(
            tools.search(search_request("x")).unwrap(),
            "Slack API error: invalid_auth"
        );
    }

    #[test]
    fn channels_are_public_names_only() {
        let slack = MemorySlack {
            channels: vec![
                SlackChannel {
                    id: "C1".to_string(),
                    name: "general".to_string(),
                    ..SlackChannel::default()
                },
                SlackChannel {
                    id: "C2".to_string(),
                    name: "old".to_string(),
                    is_archived: true,
                    ..SlackChannel::default()
                },
            ],
            ..MemorySlack::default()
        };
        let (tools, slack) = slack_tools(slack);

        let channels = tools.get_channels(GetChannelsRequest::default()).unwrap();

        assert_eq!(
            channels,
            vec![ChannelSummary {
                name: "general".to_string()
            }]
        );
        assert_eq!(
            slack.list_calls.lock().unwrap()[0],
            (true, "public_channel".to_string())
        );
    }

    #[test]
    fn thread_url_is_split_into_channel_and_ts() {
        let (channel, ts) =
            parse_thread_url("https://acme.slack.com/archives/C123/p1717518829123456").unwrap();
        assert_eq!(channel, "C123");
        assert_eq!(ts, "1717518829.123456");

        let (_, ts) = parse_thread_url(
            "https://acme.slack.com/archives/C123/p1717518829123456?thread_ts=1717500000.000100&cid=C123",
        )
        .unwrap();
        assert_eq!(ts, "1717500000.000100");
    }

    #[test]
    fn malformed_thread_urls_fail() {
        assert!(parse_thread_url("not a url").is_err());
        assert!(parse_thread_url("https://acme.slack.com/C123/p1").is_err());
        assert!(parse_thread_url("https://acme.slack.com/archives/C123/x1717518829").is_err());
    }

    #[test]
    fn thread_messages_resolve_users_and_missing_threads_are_empty() {
        let mut parent = message("question", "U1", "1717518829.123456");
        parent.reply_count = 1;
        parent.reply_users_count = 1;
        parent.reply_users = vec!["U1".to_string()];

        let mut slack = MemorySlack::default().with_user("U1", ann());
        slack.replies.insert(
            ("C123".to_string(), "1717518829.123456".to_string()),
            vec![parent],
        );
        let (tools, slack) = slack_tools(slack);

        let messages = tools
            .thread_messages(ThreadInput {
                thread_url: "https://acme.slack.com/archives/C123/p1717518829123456".to_string(),
            })
            .unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "question");
        assert_eq!(messages[0].user.as_deref(), Some("annie"));
        assert_eq!(messages[0].reply_users, vec!["annie"]);
        assert_eq!(messages[0].reply_count, 1);
        assert_eq!(slack.user_lookups(), 1);

        let missing = tools
            .thread_messages(ThreadInput {
                thread_url: "https://acme.slack.com/archives/C999/p1717518829123456".to_string(),
            })
            .unwrap();
        assert!(missing.is_empty());
    }
}
