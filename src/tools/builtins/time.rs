use anyhow::Result;
use chrono::{Local, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::Deserialize;

/// Get the current date and time as an RFC 3339 timestamp.
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct TimeRequest {
    /// Return UTC instead of the local time zone
    #[serde(default)]
    pub utc: bool,
}

pub fn get_time(request: TimeRequest) -> Result<String> {
    let now = if request.utc {
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    } else {
        Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
    };
    Ok(now)
}
