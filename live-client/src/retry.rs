use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 重连延迟策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed,
    /// 指数退避
    Exponential,
}

/// 摄像头会话的自动重连策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大连续重试次数
    pub max_retries: u32,
    /// 重试策略
    pub strategy: RetryStrategy,
    /// 基础延迟
    pub delay: Duration,
    /// 最大延迟（仅指数退避）
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: RetryStrategy::Fixed,
            delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            strategy: RetryStrategy::Fixed,
            delay,
            max_delay: delay,
        }
    }

    /// 计算第 `attempt` 次重试（从0开始）前的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Fixed => self.delay,
            RetryStrategy::Exponential => {
                let multiplier = 2u32.saturating_pow(attempt);
                self.delay.saturating_mul(multiplier).min(self.max_delay)
            }
        }
    }

    /// 已经重试 `retry_count` 次后是否还能再试
    pub fn allows(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_policy() {
        let policy = RetryPolicy {
            max_retries: 5,
            strategy: RetryStrategy::Exponential,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        // 应该被限制在最大值
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(40), Duration::from_secs(1));
    }

    #[test]
    fn test_allows() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }
}
