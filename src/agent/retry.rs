use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{AgentError, ModelError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// 限流重试：指数退避加随机抖动，其他错误立即返回
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, unit: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            unit,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 attempt 次（从 0 计）失败后的固定退避：2^attempt 个时间单位
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.unit.saturating_mul(1u32 << attempt.min(31))
    }

    /// 固定退避加抖动，jitter 取 [0, 1) 个时间单位
    pub fn delay(&self, attempt: u32, jitter: f64) -> Duration {
        self.base_delay(attempt) + self.unit.mul_f64(jitter.clamp(0.0, 1.0))
    }

    pub async fn run<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ModelError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(AgentError::RateLimitExceeded {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let delay = self.delay(attempt - 1, rand::thread_rng().gen::<f64>());
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "模型服务限流，稍后重试"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
