// 关联会话
//
// 一次自动化运行对应一个会话：独占一份校验缓存，共享规范化器与判定器，
// 可选地把每个单元的结论写入历史存储。

use std::sync::Arc;

use uuid::Uuid;

use crate::collaborators::{HistoryCollaborator, QueryCollaborator, ScanCollaborator};
use crate::config::ResolutionConfig;
use crate::error::Result;
use crate::history::HistoryEntry;
use crate::resolver::{Deadline, Resolved, Resolver, TimeoutCategory};
use crate::verify::{BatchProgress, BatchResult, CacheStats, LinkStateVerifier, VerificationResult};

/// 关联会话
pub struct LinkSession<S: ScanCollaborator, Q: QueryCollaborator> {
    id: String,
    verifier: LinkStateVerifier<S>,
    resolver: Resolver<Q>,
    history: Option<Arc<dyn HistoryCollaborator>>,
}

impl<S: ScanCollaborator, Q: QueryCollaborator> LinkSession<S, Q> {
    /// 按配置创建会话（配置无效时返回 Config 错误）
    pub fn new(scan: S, query: Q, config: &ResolutionConfig) -> Result<Self> {
        config.validate()?;

        let id = Uuid::new_v4().to_string();
        let label = id.chars().take(8).collect::<String>();

        let canon = config.build_canonicalizer();
        let decider = config.build_decider(Arc::clone(&canon));

        let policy = config.build_policy();

        let verifier = LinkStateVerifier::new(scan, decider)
            .with_thresholds(config.unit_matching.clone(), config.role_matching.clone())
            .with_scan_timeout(policy.adaptive_timeout(TimeoutCategory::Scan, 1.0))
            .with_label(label.clone());

        let resolver = Resolver::new(query, canon)
            .with_catalog(config.locators.clone())
            .with_policy(policy, config.retry.clone())
            .with_label(label.clone());

        tracing::info!("Session [{}]: 会话已创建", label);

        Ok(Self {
            id,
            verifier,
            resolver,
            history: None,
        })
    }

    /// 附加历史存储
    pub fn with_history(mut self, history: Arc<dyn HistoryCollaborator>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn verifier(&self) -> &LinkStateVerifier<S> {
        &self.verifier
    }

    pub fn resolver(&self) -> &Resolver<Q> {
        &self.resolver
    }

    /// 写历史记录（失败只记日志）
    fn record(&self, entry: HistoryEntry) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(&entry) {
                tracing::warn!("Session [{}]: 写入历史记录失败: {}", self.id, e);
            }
        }
    }

    /// 校验单个 (单位, 角色)
    ///
    /// 缓存命中的结果已记录过，不再写历史
    pub async fn verify(&mut self, unit_name: &str, desired_role: &str) -> Result<VerificationResult> {
        match self.verifier.verify_with_origin(unit_name, desired_role).await {
            Ok((result, cached)) => {
                if !cached {
                    self.record(HistoryEntry::from_result(&self.id, unit_name, desired_role, &result));
                }
                Ok(result)
            }
            Err(e) => {
                self.record(HistoryEntry::from_error(&self.id, unit_name, desired_role, &e));
                Err(e)
            }
        }
    }

    /// 批量校验（不设截止时间）
    pub async fn verify_batch<T, F>(
        &mut self,
        units: &[T],
        desired_role: &str,
        on_progress: Option<F>,
    ) -> Result<BatchResult>
    where
        T: AsRef<str>,
        F: FnMut(BatchProgress<'_>),
    {
        self.verify_batch_with_deadline(units, desired_role, &Deadline::unbounded(), on_progress)
            .await
    }

    /// 在截止时间内批量校验
    pub async fn verify_batch_with_deadline<T, F>(
        &mut self,
        units: &[T],
        desired_role: &str,
        deadline: &Deadline,
        on_progress: Option<F>,
    ) -> Result<BatchResult>
    where
        T: AsRef<str>,
        F: FnMut(BatchProgress<'_>),
    {
        let batch = self
            .verifier
            .verify_batch(units, desired_role, deadline, on_progress)
            .await?;

        if self.history.is_some() {
            for entry in batch
                .matched_correct
                .iter()
                .chain(&batch.matched_different_role)
                .chain(&batch.to_link)
                .filter(|entry| !entry.cached)
            {
                self.record(HistoryEntry::from_result(
                    &self.id,
                    &entry.unit,
                    desired_role,
                    &entry.result,
                ));
            }
            for failure in &batch.failed {
                self.record(HistoryEntry::failed(
                    &self.id,
                    &failure.unit,
                    desired_role,
                    failure.error.clone(),
                ));
            }
        }
        Ok(batch)
    }

    /// 定位目标控件
    pub async fn resolve(&self, kind: &str) -> Result<Resolved<Q::Handle>> {
        self.resolver.resolve(kind).await
    }

    /// 定位提到期望值的目标控件
    pub async fn resolve_for(&self, kind: &str, expected: &str) -> Result<Resolved<Q::Handle>> {
        self.resolver.resolve_for(kind, expected).await
    }

    pub fn clear_cache(&mut self) {
        tracing::debug!("Session [{}]: 清空缓存", self.id);
        self.verifier.clear_cache();
    }

    pub fn invalidate(&mut self, unit_name: &str, role: &str) -> bool {
        self.verifier.invalidate(unit_name, role)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.verifier.cache_stats()
    }
}
