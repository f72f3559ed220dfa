// 关联状态校验器
//
// 流程：查缓存 → 扫描候选 → 单位等价匹配 → 提取角色 → 角色等价判定 → 写缓存
//
// 校验路径上的协作方失败一律放行（fail-open）

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::collaborators::ScanCollaborator;
use crate::error::{LinkError, Result};
use crate::resolver::Deadline;
use crate::similarity::{EquivalenceDecider, MatchThresholds};
use crate::verify::cache::{CacheKey, CacheStats, LinkStateCache};
use crate::verify::types::{
    BatchFailure, BatchProgress, BatchResult, LinkRecord, LinkState, VerificationResult,
};

/// 默认扫描超时
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// 关联状态校验器
pub struct LinkStateVerifier<S: ScanCollaborator> {
    scan: S,
    decider: Arc<EquivalenceDecider>,
    cache: LinkStateCache,
    unit_thresholds: MatchThresholds,
    role_thresholds: MatchThresholds,
    scan_timeout: Duration,
    /// 日志标签（会话 ID 前缀）
    label: String,
}

impl<S: ScanCollaborator> LinkStateVerifier<S> {
    /// 创建校验器
    ///
    /// # Arguments
    /// * `scan` - 扫描协作方
    /// * `decider` - 等价判定器（与会话共享同一个规范化器）
    pub fn new(scan: S, decider: Arc<EquivalenceDecider>) -> Self {
        Self {
            scan,
            decider,
            cache: LinkStateCache::new(),
            unit_thresholds: MatchThresholds::default(),
            role_thresholds: MatchThresholds::for_roles(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            label: "-".to_string(),
        }
    }

    pub fn with_thresholds(mut self, unit: MatchThresholds, role: MatchThresholds) -> Self {
        self.unit_thresholds = unit;
        self.role_thresholds = role;
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// 校验 (单位, 角色) 的关联状态
    ///
    /// 只有歧义会以错误返回；扫描失败转为放行结果
    pub async fn verify(&mut self, unit_name: &str, desired_role: &str) -> Result<VerificationResult> {
        self.verify_with_origin(unit_name, desired_role)
            .await
            .map(|(result, _)| result)
    }

    /// 同 `verify`，另外返回结果是否取自缓存
    pub(crate) async fn verify_with_origin(
        &mut self,
        unit_name: &str,
        desired_role: &str,
    ) -> Result<(VerificationResult, bool)> {
        let start = Instant::now();
        let key = CacheKey::new(self.decider.scorer().canonicalizer(), unit_name, desired_role);

        // 1. 缓存命中直接返回，不重新扫描
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(
                "Verify [{}]: 缓存命中 unit=\"{}\" role=\"{}\" → {:?}",
                self.label,
                unit_name,
                desired_role,
                LinkState::Cached
            );
            return Ok((cached.clone(), true));
        }

        // 2. 扫描
        tracing::debug!(
            "Verify [{}]: {:?} unit=\"{}\"",
            self.label,
            LinkState::Scanning,
            unit_name
        );
        let records = match tokio::time::timeout(self.scan_timeout, self.scan.list_candidates()).await
        {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                let err = LinkError::ScanFailure(e.to_string());
                tracing::warn!("Verify [{}]: {}，按未关联放行", self.label, err);
                return Ok((VerificationResult::scan_failed(&e.to_string(), elapsed_ms(start)), false));
            }
            Err(_) => {
                tracing::warn!(
                    "Verify [{}]: 扫描超时（{:?}），按未关联放行",
                    self.label,
                    self.scan_timeout
                );
                return Ok((VerificationResult::scan_failed("timeout", elapsed_ms(start)), false));
            }
        };

        let result = self.classify(unit_name, desired_role, records, start)?;

        tracing::info!(
            "Verify [{}]: unit=\"{}\" role=\"{}\" → {:?} (can_apply={}, {}ms)",
            self.label,
            unit_name,
            desired_role,
            result.state,
            result.can_apply,
            result.elapsed_ms
        );

        // 7. 写缓存
        self.cache.insert(key, result.clone());
        Ok((result, false))
    }

    /// 分类（步骤 3-6）
    fn classify(
        &self,
        unit_name: &str,
        desired_role: &str,
        records: Vec<LinkRecord<S::SourceRef>>,
        start: Instant,
    ) -> Result<VerificationResult> {
        if records.is_empty() {
            return Ok(VerificationResult::not_linked("not linked", elapsed_ms(start)));
        }

        let canon = self.decider.scorer().canonicalizer();
        let records: Vec<_> = records.into_iter().map(|r| r.canonicalized(canon)).collect();

        // 3. 单位匹配（歧义向上抛出）
        let Some(best) = self.decider.pick_best_by(
            &records,
            |r| r.unit_name_raw.as_str(),
            unit_name,
            &self.unit_thresholds,
        )?
        else {
            // 4. 无匹配
            return Ok(VerificationResult::not_linked("not linked", elapsed_ms(start)));
        };

        // 同一单位可能以不同角色出现多行
        let matched_unit = &records[best.index].unit_name_normalized;
        let same_unit: Vec<&LinkRecord<S::SourceRef>> = records
            .iter()
            .filter(|r| &r.unit_name_normalized == matched_unit)
            .collect();

        tracing::debug!(
            "Verify [{}]: 匹配到 \"{}\"（score={:.3}，同单位 {} 行）",
            self.label,
            best.candidate,
            best.result.combined_score,
            same_unit.len()
        );

        let roles: Vec<&str> = same_unit
            .iter()
            .filter(|r| r.has_role())
            .filter_map(|r| r.role_raw.as_deref())
            .collect();

        // 5. 角色无法提取
        let Some(first_role) = roles.first() else {
            return Ok(VerificationResult::role_undetected(elapsed_ms(start)));
        };

        // 6. 角色判定
        let matching = roles
            .iter()
            .find(|role| self.decider.equivalent(role, desired_role, &self.role_thresholds));

        Ok(match matching {
            Some(role) => VerificationResult::role_match(role.to_string(), elapsed_ms(start)),
            None => VerificationResult::role_mismatch(
                first_role.to_string(),
                desired_role,
                elapsed_ms(start),
            ),
        })
    }

    /// 批量校验
    ///
    /// 逐个单元顺序执行；单个单元失败只记录到 `failed`，不中断整批。
    /// 截止时间到期则整体返回 `TimeoutExceeded`。
    pub async fn verify_batch<T, F>(
        &mut self,
        units: &[T],
        desired_role: &str,
        deadline: &Deadline,
        mut on_progress: Option<F>,
    ) -> Result<BatchResult>
    where
        T: AsRef<str>,
        F: FnMut(BatchProgress<'_>),
    {
        let mut batch = BatchResult::default();
        let total = units.len();

        for (i, unit) in units.iter().enumerate() {
            let unit = unit.as_ref();
            deadline.check("verify_batch")?;

            if let Some(callback) = on_progress.as_mut() {
                callback(BatchProgress {
                    index: i + 1,
                    total,
                    unit,
                });
            }

            match self.verify_with_origin(unit, desired_role).await {
                Ok((result, cached)) => batch.push(unit, result, cached),
                Err(e @ LinkError::TimeoutExceeded { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!("Verify [{}]: 单元 \"{}\" 校验失败，继续下一个: {}", self.label, unit, e);
                    batch.failed.push(BatchFailure {
                        unit: unit.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Verify [{}]: 批量完成 {} 个（已正确 {}，角色不同 {}，待关联 {}，失败 {}）",
            self.label,
            total,
            batch.matched_correct.len(),
            batch.matched_different_role.len(),
            batch.to_link.len(),
            batch.failed.len()
        );
        Ok(batch)
    }

    pub fn scan(&self) -> &S {
        &self.scan
    }

    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    /// 清空缓存
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// 使单个 (单位, 角色) 缓存失效
    pub fn invalidate(&mut self, unit_name: &str, role: &str) -> bool {
        let key = CacheKey::new(self.decider.scorer().canonicalizer(), unit_name, role);
        self.cache.invalidate(&key)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
