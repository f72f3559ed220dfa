//! 超时策略
//!
//! 自适应超时（基础值 × 环境倍率 × 上下文倍率）、递进超时、带全局截止时间的重试

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// 全局截止时间
///
/// 在每个步骤之前检查，到期即以 `TimeoutExceeded` 中止
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    /// 无截止时间
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    /// 从现在起 `budget` 后到期
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    /// 由可选毫秒数构造（None 表示无截止时间）
    pub fn from_millis(budget_ms: Option<u64>) -> Self {
        match budget_ms {
            Some(ms) => Self::after(Duration::from_millis(ms)),
            None => Self::unbounded(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 剩余时间（无截止时间返回 None）
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.elapsed()))
    }

    pub fn is_expired(&self) -> bool {
        self.budget.is_some_and(|b| self.elapsed() >= b)
    }

    /// 检查是否到期
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_expired() {
            tracing::warn!(
                "timeout: {} 超出全局截止时间（已用 {:?}）",
                operation,
                self.elapsed()
            );
            return Err(self.exceeded(operation));
        }
        Ok(())
    }

    pub fn exceeded(&self, operation: &str) -> LinkError {
        LinkError::TimeoutExceeded {
            operation: operation.to_string(),
            budget_ms: self.budget.map(|b| b.as_millis() as u64).unwrap_or(0),
        }
    }
}

/// 运行环境档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentProfile {
    Fast,
    #[default]
    Normal,
    Slow,
}

impl EnvironmentProfile {
    /// 环境倍率
    pub fn multiplier(&self) -> f64 {
        match self {
            EnvironmentProfile::Fast => 0.6,
            EnvironmentProfile::Normal => 1.0,
            EnvironmentProfile::Slow => 2.0,
        }
    }
}

/// 超时类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutCategory {
    /// 元素可见性等待
    Visibility,
    /// 元素查询
    Query,
    /// 控件操作
    Action,
    /// 关联表扫描
    Scan,
    /// 展开面板后的稳定等待
    Expansion,
}

/// 超时配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub profile: EnvironmentProfile,
    pub visibility_ms: u64,
    pub query_ms: u64,
    pub action_ms: u64,
    pub scan_ms: u64,
    pub expansion_ms: u64,
    /// 每次重试的超时增长倍数
    pub growth_factor: f64,
    /// 递进超时上限
    pub max_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            profile: EnvironmentProfile::Normal,
            visibility_ms: 2000,
            query_ms: 3000,
            action_ms: 5000,
            scan_ms: 10000,
            expansion_ms: 800,
            growth_factor: 1.5,
            max_timeout_ms: 30000,
        }
    }
}

impl TimeoutConfig {
    fn base_ms(&self, category: TimeoutCategory) -> u64 {
        match category {
            TimeoutCategory::Visibility => self.visibility_ms,
            TimeoutCategory::Query => self.query_ms,
            TimeoutCategory::Action => self.action_ms,
            TimeoutCategory::Scan => self.scan_ms,
            TimeoutCategory::Expansion => self.expansion_ms,
        }
    }
}

/// 重试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// 重试间隔增长倍数（1.0 表示固定间隔）
    pub backoff: f64,
    pub max_delay_ms: u64,
    /// 整个定位/重试序列的全局截止时间（None 表示不限）
    pub global_deadline_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            backoff: 1.5,
            max_delay_ms: 5000,
            global_deadline_ms: Some(30000),
        }
    }
}

/// 超时策略
#[derive(Debug, Clone, Default)]
pub struct TimeoutPolicy {
    config: TimeoutConfig,
}

impl TimeoutPolicy {
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// 自适应超时：类别基础值 × 环境倍率 × 上下文倍率
    pub fn adaptive_timeout(&self, category: TimeoutCategory, context_multiplier: f64) -> Duration {
        let base = self.config.base_ms(category) as f64;
        let factor = self.config.profile.multiplier() * context_multiplier.max(0.0);
        Duration::from_millis((base * factor).round() as u64)
    }

    /// 按环境倍率缩放任意时长
    pub fn scaled(&self, duration: Duration) -> Duration {
        duration.mul_f64(self.config.profile.multiplier())
    }

    /// 递进超时：随尝试次数（从 1 开始）按倍数增长，封顶于 max_timeout_ms
    pub fn progressive_timeout(&self, base: Duration, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = self.config.growth_factor.max(1.0).powi(exponent as i32);
        let cap = Duration::from_millis(self.config.max_timeout_ms);
        let grown = base.mul_f64(factor);
        if grown > cap && base <= cap {
            cap
        } else {
            grown.max(base)
        }
    }

    /// 第 `attempt` 次失败后的等待间隔
    fn retry_delay(&self, retry: &RetryConfig, attempt: u32) -> Duration {
        let factor = retry.backoff.max(1.0).powi(attempt.max(1) as i32 - 1);
        let delay = Duration::from_millis(retry.base_delay_ms).mul_f64(factor);
        delay.min(Duration::from_millis(retry.max_delay_ms.max(retry.base_delay_ms)))
    }

    /// 带重试执行
    ///
    /// - 每次尝试前检查截止时间，尝试本身也受剩余时间约束
    /// - 超时与歧义等不可重试的错误立即返回
    /// - 次数耗尽后返回最后一次的错误
    ///
    /// # Arguments
    /// * `operation_name` - 用于日志与超时错误
    /// * `operation` - 接收尝试序号（从 1 开始）
    /// * `on_attempt` - 每次尝试开始前回调
    pub async fn run_with_retry<T, F, Fut, A>(
        &self,
        operation_name: &str,
        mut operation: F,
        retry: &RetryConfig,
        deadline: &Deadline,
        mut on_attempt: Option<A>,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        A: FnMut(u32),
    {
        let max_attempts = retry.max_attempts.max(1);
        let mut last_error: Option<LinkError> = None;

        for attempt in 1..=max_attempts {
            deadline.check(operation_name)?;
            if let Some(callback) = on_attempt.as_mut() {
                callback(attempt);
            }

            let outcome = match deadline.remaining() {
                Some(remaining) => match tokio::time::timeout(remaining, operation(attempt)).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(deadline.exceeded(operation_name)),
                },
                None => operation(attempt).await,
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("retry: {} 第 {} 次尝试成功", operation_name, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "retry: {} 第 {}/{} 次尝试失败: {}",
                        operation_name,
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }

            if attempt < max_attempts {
                let delay = self.retry_delay(retry, attempt);
                if deadline.remaining().is_some_and(|r| r <= delay) {
                    // 等待期间必然到期，立即中止
                    return Err(deadline.exceeded(operation_name));
                }
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| deadline.exceeded(operation_name)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 5,
            backoff: 1.0,
            max_delay_ms: 5,
            global_deadline_ms: None,
        }
    }

    fn exhausted() -> LinkError {
        LinkError::ResolverExhausted {
            target: "addButton".to_string(),
            attempted: vec![],
        }
    }

    #[test]
    fn test_adaptive_timeout_profiles() {
        let normal = TimeoutPolicy::default();
        assert_eq!(
            normal.adaptive_timeout(TimeoutCategory::Visibility, 1.0),
            Duration::from_millis(2000)
        );
        assert_eq!(
            normal.adaptive_timeout(TimeoutCategory::Visibility, 1.5),
            Duration::from_millis(3000)
        );

        let slow = TimeoutPolicy::new(TimeoutConfig {
            profile: EnvironmentProfile::Slow,
            ..Default::default()
        });
        assert_eq!(
            slow.adaptive_timeout(TimeoutCategory::Query, 1.0),
            Duration::from_millis(6000)
        );
    }

    #[test]
    fn test_progressive_timeout_monotonic_and_capped() {
        let policy = TimeoutPolicy::new(TimeoutConfig {
            growth_factor: 2.0,
            max_timeout_ms: 5000,
            ..Default::default()
        });
        let base = Duration::from_millis(1000);
        let mut previous = Duration::ZERO;
        for attempt in 1..=6 {
            let t = policy.progressive_timeout(base, attempt);
            assert!(t >= previous);
            assert!(t <= Duration::from_millis(5000));
            previous = t;
        }
        assert_eq!(policy.progressive_timeout(base, 1), base);
        assert_eq!(policy.progressive_timeout(base, 2), Duration::from_millis(2000));
        assert_eq!(policy.progressive_timeout(base, 6), Duration::from_millis(5000));
    }

    #[test]
    fn test_deadline() {
        assert!(!Deadline::unbounded().is_expired());
        assert!(Deadline::unbounded().remaining().is_none());
        assert!(Deadline::after(Duration::ZERO).is_expired());
        assert!(Deadline::after(Duration::from_secs(60)).check("op").is_ok());
        assert!(matches!(
            Deadline::after(Duration::ZERO).check("op"),
            Err(LinkError::TimeoutExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let policy = TimeoutPolicy::default();
        let calls = AtomicU32::new(0);
        let mut attempts_seen = Vec::new();

        let value = policy
            .run_with_retry(
                "flaky",
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(exhausted())
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                &fast_retry(5),
                &Deadline::unbounded(),
                Some(|attempt: u32| attempts_seen.push(attempt)),
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(attempts_seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_retry_rethrows_last_error() {
        let policy = TimeoutPolicy::default();
        let calls = AtomicU32::new(0);
        let err = policy
            .run_with_retry(
                "always_fails",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(exhausted()) }
                },
                &fast_retry(3),
                &Deadline::unbounded(),
                None::<fn(u32)>,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::ResolverExhausted { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_propagate_immediately() {
        let policy = TimeoutPolicy::default();
        let calls = AtomicU32::new(0);
        let err = policy
            .run_with_retry(
                "ambiguous",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err::<(), _>(LinkError::AmbiguousMatch {
                            target: "t".to_string(),
                            candidates: vec![],
                        })
                    }
                },
                &fast_retry(3),
                &Deadline::unbounded(),
                None::<fn(u32)>,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::AmbiguousMatch { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_aborts_mid_retry() {
        let policy = TimeoutPolicy::default();
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 50,
            backoff: 1.0,
            max_delay_ms: 50,
            global_deadline_ms: None,
        };
        let deadline = Deadline::after(Duration::from_millis(120));
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let err = policy
            .run_with_retry(
                "slow",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(exhausted()) }
                },
                &retry,
                &deadline,
                None::<fn(u32)>,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, LinkError::TimeoutExceeded { .. }));
        assert!(calls.load(Ordering::SeqCst) < 10);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_deadline_bounds_a_hanging_attempt() {
        let policy = TimeoutPolicy::default();
        let deadline = Deadline::after(Duration::from_millis(30));
        let err = policy
            .run_with_retry(
                "hang",
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<(), LinkError>(())
                },
                &fast_retry(3),
                &deadline,
                None::<fn(u32)>,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::TimeoutExceeded { .. }));
    }
}
