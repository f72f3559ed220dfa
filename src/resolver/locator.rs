//! 分层元素定位器
//!
//! 按 具体 → 上下文 → 通用 的顺序逐层尝试，第一个可见且通过上下文校验的元素胜出。
//! 全部层级失败时，若目标位于可折叠区域，则展开一次并重走整条阶梯。
//! 整个过程受重试策略与全局截止时间约束。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::canon::Canonicalizer;
use crate::collaborators::{ActionKind, QueryCollaborator};
use crate::error::{LinkError, Result};
use crate::resolver::tiers::{Expansion, LocatorCatalog, LocatorStrategy, PatternDescriptor, TargetSpec, TierLevel};
use crate::resolver::timeout::{Deadline, RetryConfig, TimeoutCategory, TimeoutPolicy};

/// 定位结果
#[derive(Debug, Clone)]
pub struct Resolved<H> {
    pub handle: H,
    /// 命中的层级
    pub tier: TierLevel,
    pub strategy_id: String,
    pub pattern: PatternDescriptor,
    /// 第几次尝试命中（从 1 开始）
    pub attempt: u32,
    /// 是否经过展开
    pub expanded: bool,
}

/// 整个定位序列（跨重试）的共享状态
struct AttemptState {
    attempted: Mutex<Vec<String>>,
    expanded: AtomicBool,
}

impl AttemptState {
    fn new() -> Self {
        Self {
            attempted: Mutex::new(Vec::new()),
            expanded: AtomicBool::new(false),
        }
    }

    fn note(&self, strategy: &LocatorStrategy, level: TierLevel) {
        let entry = format!("{}:{} ({})", level, strategy.id, strategy.pattern);
        let mut attempted = self.attempted.lock().unwrap_or_else(|e| e.into_inner());
        if !attempted.contains(&entry) {
            attempted.push(entry);
        }
    }

    fn attempted(&self) -> Vec<String> {
        self.attempted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// 分层定位器
pub struct Resolver<Q: QueryCollaborator> {
    query: Q,
    catalog: LocatorCatalog,
    policy: TimeoutPolicy,
    retry: RetryConfig,
    canon: Arc<Canonicalizer>,
    label: String,
}

impl<Q: QueryCollaborator> Resolver<Q> {
    pub fn new(query: Q, canon: Arc<Canonicalizer>) -> Self {
        Self {
            query,
            catalog: LocatorCatalog::builtin(),
            policy: TimeoutPolicy::default(),
            retry: RetryConfig::default(),
            canon,
            label: "-".to_string(),
        }
    }

    pub fn with_catalog(mut self, catalog: LocatorCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_policy(mut self, policy: TimeoutPolicy, retry: RetryConfig) -> Self {
        self.policy = policy;
        self.retry = retry;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn catalog(&self) -> &LocatorCatalog {
        &self.catalog
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    /// 定位目标（使用配置中的全局截止时间）
    pub async fn resolve(&self, kind: &str) -> Result<Resolved<Q::Handle>> {
        let deadline = Deadline::from_millis(self.retry.global_deadline_ms);
        self.resolve_with_deadline(kind, None, &deadline).await
    }

    /// 定位目标，并要求匹配元素提到期望值（如单位名）
    pub async fn resolve_for(&self, kind: &str, expected: &str) -> Result<Resolved<Q::Handle>> {
        let deadline = Deadline::from_millis(self.retry.global_deadline_ms);
        self.resolve_with_deadline(kind, Some(expected), &deadline).await
    }

    /// 在给定截止时间内定位目标
    pub async fn resolve_with_deadline(
        &self,
        kind: &str,
        expected: Option<&str>,
        deadline: &Deadline,
    ) -> Result<Resolved<Q::Handle>> {
        let spec = self
            .catalog
            .get(kind)
            .ok_or_else(|| LinkError::UnknownTarget(kind.to_string()))?;

        let state = AttemptState::new();
        let operation = format!("resolve {}", kind);
        let label = &self.label;

        let resolved = self
            .policy
            .run_with_retry(
                &operation,
                |attempt| self.attempt(kind, spec, expected, attempt, deadline, &state),
                &self.retry,
                deadline,
                Some(|attempt: u32| {
                    tracing::debug!("Resolver [{}]: {} 第 {} 次尝试", label, kind, attempt);
                }),
            )
            .await
            .inspect_err(|e| tracing::warn!("Resolver [{}]: {} 定位失败: {}", self.label, kind, e))?;

        tracing::info!(
            "Resolver [{}]: {} → {} 层 {} ({})，第 {} 次尝试{}",
            self.label,
            kind,
            resolved.tier,
            resolved.strategy_id,
            resolved.pattern,
            resolved.attempt,
            if resolved.expanded { "，已展开" } else { "" }
        );
        Ok(resolved)
    }

    /// 单次尝试：走一遍阶梯，失败则展开一次后再走一遍
    async fn attempt(
        &self,
        kind: &str,
        spec: &TargetSpec,
        expected: Option<&str>,
        attempt: u32,
        deadline: &Deadline,
        state: &AttemptState,
    ) -> Result<Resolved<Q::Handle>> {
        if let Some(found) = self.run_ladder(spec, expected, attempt, deadline, state).await? {
            return Ok(found);
        }

        if let Some(expansion) = &spec.expansion {
            // 整个序列只成功展开一次；触发元素尚未渲染时留给下一次尝试
            if !state.expanded.load(Ordering::SeqCst)
                && self.expand(kind, expansion, attempt, deadline).await?
            {
                state.expanded.store(true, Ordering::SeqCst);
                if let Some(mut found) = self.run_ladder(spec, expected, attempt, deadline, state).await? {
                    found.expanded = true;
                    return Ok(found);
                }
            }
        }

        tracing::debug!(
            "Resolver [{}]: {} 第 {} 次尝试所有层级均未命中",
            self.label,
            kind,
            attempt
        );
        Err(LinkError::ResolverExhausted {
            target: kind.to_string(),
            attempted: state.attempted(),
        })
    }

    /// 逐层尝试
    async fn run_ladder(
        &self,
        spec: &TargetSpec,
        expected: Option<&str>,
        attempt: u32,
        deadline: &Deadline,
        state: &AttemptState,
    ) -> Result<Option<Resolved<Q::Handle>>> {
        for tier in spec.ordered_tiers() {
            for strategy in &tier.strategies {
                deadline.check("resolve")?;
                state.note(strategy, tier.level);

                if let Some(handle) = self.try_strategy(strategy, expected, attempt).await {
                    return Ok(Some(Resolved {
                        handle,
                        tier: tier.level,
                        strategy_id: strategy.id.clone(),
                        pattern: strategy.pattern.clone(),
                        attempt,
                        expanded: false,
                    }));
                }
            }
            tracing::debug!("Resolver [{}]: {} 层未命中，降级", self.label, tier.level);
        }
        Ok(None)
    }

    /// 单个策略：查询 → 可见性 → 上下文校验
    ///
    /// 协作方的任何失败都视为该策略未命中
    async fn try_strategy(
        &self,
        strategy: &LocatorStrategy,
        expected: Option<&str>,
        attempt: u32,
    ) -> Option<Q::Handle> {
        let query_timeout = self.policy.progressive_timeout(
            self.policy.adaptive_timeout(TimeoutCategory::Query, 1.0),
            attempt,
        );
        let visible_timeout = self.policy.progressive_timeout(
            self.policy.adaptive_timeout(TimeoutCategory::Visibility, 1.0),
            attempt,
        );

        let handles = match tokio::time::timeout(query_timeout, self.query.query(&strategy.pattern)).await {
            Ok(Ok(handles)) => handles,
            Ok(Err(e)) => {
                tracing::debug!("Resolver [{}]: {} 查询失败: {}", self.label, strategy.pattern, e);
                return None;
            }
            Err(_) => {
                tracing::debug!("Resolver [{}]: {} 查询超时", self.label, strategy.pattern);
                return None;
            }
        };

        for handle in handles {
            if !self.query.is_visible(&handle, visible_timeout).await {
                continue;
            }
            if strategy.validator.is_any() && expected.is_none() {
                return Some(handle);
            }
            match self.query.context(&handle).await {
                Ok(context) => {
                    if strategy.validator.accepts(&self.canon, &context, expected) {
                        return Some(handle);
                    }
                    tracing::debug!(
                        "Resolver [{}]: {} 命中元素未通过上下文校验: \"{}\"",
                        self.label,
                        strategy.id,
                        context.text
                    );
                }
                Err(e) => {
                    tracing::debug!("Resolver [{}]: 读取元素上下文失败: {}", self.label, e);
                }
            }
        }
        None
    }

    /// 展开折叠区域，成功返回 true
    async fn expand(
        &self,
        kind: &str,
        expansion: &Expansion,
        attempt: u32,
        deadline: &Deadline,
    ) -> Result<bool> {
        deadline.check("expand")?;

        let query_timeout = self.policy.progressive_timeout(
            self.policy.adaptive_timeout(TimeoutCategory::Query, 1.0),
            attempt,
        );
        let action_timeout = self.policy.adaptive_timeout(TimeoutCategory::Action, 1.0);
        let visible_timeout = self.policy.progressive_timeout(
            self.policy.adaptive_timeout(TimeoutCategory::Visibility, 1.0),
            attempt,
        );

        let handles = match tokio::time::timeout(query_timeout, self.query.query(&expansion.pattern)).await {
            Ok(Ok(handles)) => handles,
            Ok(Err(e)) => {
                tracing::warn!("Resolver [{}]: 查找展开触发元素失败: {}", self.label, e);
                return Ok(false);
            }
            Err(_) => {
                tracing::warn!("Resolver [{}]: 查找展开触发元素超时（{:?}）", self.label, query_timeout);
                return Ok(false);
            }
        };

        for handle in handles {
            if !self.query.is_visible(&handle, visible_timeout).await {
                continue;
            }
            match tokio::time::timeout(action_timeout, self.query.act(&handle, ActionKind::Expand)).await {
                Ok(Ok(())) => {
                    let settle = match expansion.settle_ms {
                        Some(ms) => self.policy.scaled(Duration::from_millis(ms)),
                        None => self.policy.adaptive_timeout(TimeoutCategory::Expansion, 1.0),
                    };
                    let settle = deadline.remaining().map_or(settle, |r| settle.min(r));
                    tracing::info!(
                        "Resolver [{}]: {} 未找到，已展开 {}，等待 {:?}",
                        self.label,
                        kind,
                        expansion.pattern,
                        settle
                    );
                    tokio::time::sleep(settle).await;
                    return Ok(true);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Resolver [{}]: 展开操作失败: {}", self.label, e);
                }
                Err(_) => {
                    tracing::warn!("Resolver [{}]: 展开操作超时（{:?}）", self.label, action_timeout);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::collaborators::ElementContext;
    use crate::resolver::tiers::{ContextValidator, LocatorTier};
    use crate::resolver::timeout::TimeoutConfig;

    /// 模拟页面元素
    #[derive(Debug, Clone, Default)]
    pub(crate) struct FakeElement {
        pub text: String,
        pub container: String,
        pub visible: bool,
        /// 位于折叠区域内，展开前不可见
        pub collapsed: bool,
        /// 前 N 次可见性检查返回不可见（模拟延迟渲染）
        pub hidden_for_checks: usize,
    }

    /// 模拟页面：模式（Display 形式）→ 元素列表
    #[derive(Default)]
    pub(crate) struct FakeSurface {
        pub elements: HashMap<String, Vec<FakeElement>>,
        pub expanded: AtomicBool,
        pub queries: AtomicUsize,
        pub expansions: AtomicUsize,
        pub query_delay: Option<Duration>,
        /// 查询这些模式时挂起
        pub stalled: Vec<String>,
        /// 元素文本 → 已做的可见性检查次数
        pub checks: Mutex<HashMap<String, usize>>,
    }

    impl FakeSurface {
        pub(crate) fn with(mut self, pattern: &PatternDescriptor, element: FakeElement) -> Self {
            self.elements.entry(pattern.to_string()).or_default().push(element);
            self
        }
    }

    pub(crate) fn element(text: &str, container: &str) -> FakeElement {
        FakeElement {
            text: text.to_string(),
            container: container.to_string(),
            visible: true,
            ..Default::default()
        }
    }

    impl QueryCollaborator for FakeSurface {
        type Handle = FakeElement;

        async fn query(&self, pattern: &PatternDescriptor) -> anyhow::Result<Vec<FakeElement>> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.query_delay {
                tokio::time::sleep(delay).await;
            }
            if self.stalled.contains(&pattern.to_string()) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(self.elements.get(&pattern.to_string()).cloned().unwrap_or_default())
        }

        async fn is_visible(&self, handle: &FakeElement, _timeout: Duration) -> bool {
            if handle.hidden_for_checks > 0 {
                let mut checks = self.checks.lock().unwrap();
                let seen = checks.entry(handle.text.clone()).or_default();
                *seen += 1;
                if *seen <= handle.hidden_for_checks {
                    return false;
                }
            }
            handle.visible && (!handle.collapsed || self.expanded.load(Ordering::SeqCst))
        }

        async fn text(&self, handle: &FakeElement) -> anyhow::Result<String> {
            Ok(handle.text.clone())
        }

        async fn act(&self, _handle: &FakeElement, action: ActionKind) -> anyhow::Result<()> {
            if action == ActionKind::Expand {
                self.expansions.fetch_add(1, Ordering::SeqCst);
                self.expanded.store(true, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn context(&self, handle: &FakeElement) -> anyhow::Result<ElementContext> {
            Ok(ElementContext {
                text: handle.text.clone(),
                container_text: handle.container.clone(),
                attributes: HashMap::new(),
            })
        }
    }

    fn quick_resolver(surface: FakeSurface) -> Resolver<FakeSurface> {
        let policy = TimeoutPolicy::new(TimeoutConfig {
            visibility_ms: 20,
            query_ms: 50,
            action_ms: 50,
            expansion_ms: 5,
            ..Default::default()
        });
        let retry = RetryConfig {
            max_attempts: 2,
            base_delay_ms: 5,
            backoff: 1.0,
            max_delay_ms: 5,
            global_deadline_ms: Some(5000),
        };
        Resolver::new(surface, Arc::new(Canonicalizer::default()))
            .with_policy(policy, retry)
            .with_label("test")
    }

    #[tokio::test]
    async fn test_specific_tier_wins() {
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("button#btnAdicionarLotacao"), element("Adicionar", ""))
            .with(&PatternDescriptor::css("button"), element("Adicionar", ""));
        let resolver = quick_resolver(surface);

        let resolved = resolver.resolve("addButton").await.unwrap();
        assert_eq!(resolved.tier, TierLevel::Specific);
        assert_eq!(resolved.strategy_id, "add-by-id");
        assert_eq!(resolved.attempt, 1);
    }

    #[tokio::test]
    async fn test_falls_back_to_generic_tier() {
        // 只有通用模式能匹配到
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("button"), element("Cancelar", ""))
            .with(&PatternDescriptor::css("button"), element("Adicionar lotação", ""));
        let resolver = quick_resolver(surface);

        let resolved = resolver.resolve("addButton").await.unwrap();
        assert_eq!(resolved.tier.as_str(), "generic");
        assert_eq!(resolved.handle.text, "Adicionar lotação");
    }

    #[tokio::test]
    async fn test_exhausted_lists_attempted_patterns() {
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("button"), element("Cancelar", ""));
        let resolver = quick_resolver(surface);

        match resolver.resolve("confirmButton").await {
            Err(LinkError::ResolverExhausted { target, attempted }) => {
                assert_eq!(target, "confirmButton");
                assert_eq!(attempted.len(), 3);
                assert!(attempted[0].starts_with("specific:confirm-by-id"));
                assert!(attempted[2].starts_with("generic:any-button"));
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.strategy_id)),
        }
        // 两次尝试各走一遍阶梯
        assert_eq!(resolver.query().queries.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_invisible_elements_are_skipped() {
        let mut hidden = element("Salvar", "");
        hidden.visible = false;
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("button#btnSalvarLotacao"), hidden)
            .with(&PatternDescriptor::css(".modal-footer button"), element("Salvar", ""));
        let resolver = quick_resolver(surface);

        let resolved = resolver.resolve("confirmButton").await.unwrap();
        assert_eq!(resolved.tier, TierLevel::Contextual);
    }

    #[tokio::test]
    async fn test_expands_collapsed_panel_once() {
        let mut select = element("", "Órgão Julgador");
        select.collapsed = true;
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("#painelLotacoes .panel-heading"), element("Lotações", ""))
            .with(&PatternDescriptor::css("select#orgaoJulgador"), select);
        let resolver = quick_resolver(surface);

        let resolved = resolver.resolve("unitSelector").await.unwrap();
        assert!(resolved.expanded);
        assert_eq!(resolved.tier, TierLevel::Specific);
        assert_eq!(resolver.query().expansions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expansion_not_repeated_across_attempts() {
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("#painelLotacoes .panel-heading"), element("Lotações", ""));
        let resolver = quick_resolver(surface);

        assert!(resolver.resolve("roleSelector").await.is_err());
        assert_eq!(resolver.query().expansions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_toggle_is_expanded_on_retry() {
        let mut toggle = element("Lotações", "");
        toggle.hidden_for_checks = 1;
        let mut select = element("", "Papel");
        select.collapsed = true;
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("#painelLotacoes .panel-heading"), toggle)
            .with(&PatternDescriptor::css("select#papel"), select);
        let resolver = quick_resolver(surface);

        let resolved = resolver.resolve("roleSelector").await.unwrap();
        assert!(resolved.expanded);
        assert_eq!(resolved.attempt, 2);
        assert_eq!(resolver.query().expansions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_toggle_query_is_bounded() {
        let surface = FakeSurface {
            stalled: vec![PatternDescriptor::css("#painelLotacoes .panel-heading").to_string()],
            ..Default::default()
        };
        let resolver = quick_resolver(surface);

        let started = std::time::Instant::now();
        let err = resolver.resolve("roleSelector").await.unwrap_err();
        assert!(matches!(err, LinkError::ResolverExhausted { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(resolver.query().expansions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resolve_for_requires_expected_mention() {
        let catalog = LocatorCatalog {
            targets: [(
                "unitRow".to_string(),
                TargetSpec {
                    tiers: vec![LocatorTier {
                        level: TierLevel::Generic,
                        strategies: vec![LocatorStrategy::new("row", PatternDescriptor::css("tr"))
                            .validated(ContextValidator::MentionsExpected)],
                    }],
                    expansion: None,
                },
            )]
            .into_iter()
            .collect(),
        };
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("tr"), element("2ª Vara Cível", ""))
            .with(&PatternDescriptor::css("tr"), element("1ª Vara Cível", ""));
        let resolver = quick_resolver(surface).with_catalog(catalog);

        let resolved = resolver.resolve_for("unitRow", "1a vara civel").await.unwrap();
        assert_eq!(resolved.handle.text, "1ª Vara Cível");
        assert!(resolver.resolve_for("unitRow", "3ª Vara Cível").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_for_rejects_longer_ordinal() {
        let catalog = LocatorCatalog {
            targets: [(
                "unitRow".to_string(),
                TargetSpec {
                    tiers: vec![LocatorTier {
                        level: TierLevel::Generic,
                        strategies: vec![LocatorStrategy::new("row", PatternDescriptor::css("tr"))
                            .validated(ContextValidator::MentionsExpected)],
                    }],
                    expansion: None,
                },
            )]
            .into_iter()
            .collect(),
        };
        let surface = FakeSurface::default()
            .with(&PatternDescriptor::css("tr"), element("11ª Vara Cível", ""));
        let resolver = quick_resolver(surface).with_catalog(catalog);

        let err = resolver.resolve_for("unitRow", "1ª Vara Cível").await.unwrap_err();
        assert!(matches!(err, LinkError::ResolverExhausted { .. }));
    }

    #[tokio::test]
    async fn test_unknown_target() {
        let resolver = quick_resolver(FakeSurface::default());
        assert!(matches!(
            resolver.resolve("nope").await,
            Err(LinkError::UnknownTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_deadline_exceeded_propagates() {
        let surface = FakeSurface {
            query_delay: Some(Duration::from_millis(30)),
            ..Default::default()
        };
        let resolver = quick_resolver(surface);
        let deadline = Deadline::after(Duration::from_millis(40));

        let err = resolver
            .resolve_with_deadline("confirmButton", None, &deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::TimeoutExceeded { .. }));
    }
}
