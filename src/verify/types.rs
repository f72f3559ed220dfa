// 关联状态校验类型定义
//
// 定义了校验流程所需的类型，包括：
// - 扫描记录 (LinkRecord)
// - 校验状态 (LinkState)
// - 校验结果 (VerificationResult)
// - 批量结果 (BatchResult)

use serde::{Deserialize, Serialize};

use crate::canon::{Canonicalizer, NormalizedText};

/// 扫描得到的一条 单位/角色 关联
///
/// `source_ref` 只是指回屏幕元素的引用，记录本身不拥有该元素
#[derive(Debug, Clone)]
pub struct LinkRecord<R> {
    pub unit_name_raw: String,
    pub unit_name_normalized: NormalizedText,
    /// 角色原文（无法提取时为 None）
    pub role_raw: Option<String>,
    pub role_normalized: Option<NormalizedText>,
    pub source_ref: Option<R>,
}

impl<R> LinkRecord<R> {
    /// 由协作方构造原始记录（规范化字段由校验器补全）
    pub fn new(unit_name: impl Into<String>, role: Option<String>, source_ref: Option<R>) -> Self {
        Self {
            unit_name_raw: unit_name.into(),
            unit_name_normalized: NormalizedText::default(),
            role_raw: role,
            role_normalized: None,
            source_ref,
        }
    }

    /// 补全规范化字段
    ///
    /// 空白角色视为未提取到
    pub fn canonicalized(mut self, canon: &Canonicalizer) -> Self {
        self.unit_name_normalized = canon.normalize(&self.unit_name_raw);
        self.role_raw = self
            .role_raw
            .take()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        self.role_normalized = self.role_raw.as_deref().map(|r| canon.normalize(r));
        self
    }

    /// 是否提取到了角色
    pub fn has_role(&self) -> bool {
        self.role_normalized.as_ref().is_some_and(|r| !r.is_empty())
    }
}

/// 校验状态机
///
/// NotChecked → Scanning → {FoundRoleMatch, FoundRoleMismatch, NotFound} → Cached；
/// Scanning 失败进入 ScanError（对调用方不致命）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    NotChecked,
    Scanning,
    FoundRoleMatch,
    FoundRoleMismatch,
    NotFound,
    ScanError,
    Cached,
}

impl LinkState {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkState::FoundRoleMatch
                | LinkState::FoundRoleMismatch
                | LinkState::NotFound
                | LinkState::ScanError
        )
    }
}

/// 校验结果
///
/// 不变量：role_matches ⇒ already_linked；!already_linked ⇒ can_apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub already_linked: bool,
    pub role_matches: bool,
    pub existing_role: Option<String>,
    pub can_apply: bool,
    pub reason: String,
    pub elapsed_ms: u64,
    /// 产生该结果的终态
    pub state: LinkState,
}

impl VerificationResult {
    /// 未关联
    pub fn not_linked(reason: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            already_linked: false,
            role_matches: false,
            existing_role: None,
            can_apply: true,
            reason: reason.into(),
            elapsed_ms,
            state: LinkState::NotFound,
        }
    }

    /// 扫描失败，放行
    pub fn scan_failed(error: &str, elapsed_ms: u64) -> Self {
        Self {
            reason: format!("not linked (scan failed: {})", error),
            state: LinkState::ScanError,
            ..Self::not_linked("", elapsed_ms)
        }
    }

    /// 已关联且角色一致，无需操作
    pub fn role_match(existing_role: String, elapsed_ms: u64) -> Self {
        Self {
            already_linked: true,
            role_matches: true,
            reason: format!("already linked with role \"{}\"", existing_role),
            existing_role: Some(existing_role),
            can_apply: false,
            elapsed_ms,
            state: LinkState::FoundRoleMatch,
        }
    }

    /// 已关联但角色不同
    pub fn role_mismatch(existing_role: String, desired_role: &str, elapsed_ms: u64) -> Self {
        Self {
            already_linked: true,
            role_matches: false,
            reason: format!(
                "linked with different role \"{}\" (desired \"{}\")",
                existing_role, desired_role
            ),
            existing_role: Some(existing_role),
            can_apply: true,
            elapsed_ms,
            state: LinkState::FoundRoleMismatch,
        }
    }

    /// 已关联但角色无法提取，为安全起见放行
    pub fn role_undetected(elapsed_ms: u64) -> Self {
        Self {
            already_linked: true,
            role_matches: false,
            existing_role: None,
            can_apply: true,
            reason: "role undetected, linking allowed for safety".to_string(),
            elapsed_ms,
            state: LinkState::FoundRoleMismatch,
        }
    }

    /// 检查不变量
    pub fn is_consistent(&self) -> bool {
        (!self.role_matches || self.already_linked) && (self.already_linked || self.can_apply)
    }
}

/// 批量校验中的单条结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub unit: String,
    pub result: VerificationResult,
    /// 结果取自会话缓存
    #[serde(default)]
    pub cached: bool,
}

/// 批量校验中失败的单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub unit: String,
    pub error: String,
}

/// 批量校验结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// 已关联且角色一致（跳过）
    pub matched_correct: Vec<BatchEntry>,
    /// 已关联但角色不同（需要处理）
    pub matched_different_role: Vec<BatchEntry>,
    /// 未关联（需要关联）
    pub to_link: Vec<BatchEntry>,
    /// 校验失败（如歧义），交由调用方人工处理
    pub failed: Vec<BatchFailure>,
}

impl BatchResult {
    pub(crate) fn push(&mut self, unit: &str, result: VerificationResult, cached: bool) {
        let entry = BatchEntry {
            unit: unit.to_string(),
            result,
            cached,
        };
        if entry.result.role_matches {
            self.matched_correct.push(entry);
        } else if entry.result.already_linked {
            self.matched_different_role.push(entry);
        } else {
            self.to_link.push(entry);
        }
    }

    /// 处理过的单元总数
    pub fn total(&self) -> usize {
        self.matched_correct.len()
            + self.matched_different_role.len()
            + self.to_link.len()
            + self.failed.len()
    }
}

/// 批量进度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress<'a> {
    /// 当前序号（从 1 开始）
    pub index: usize,
    pub total: usize,
    pub unit: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_keep_invariants() {
        for result in [
            VerificationResult::not_linked("not linked", 1),
            VerificationResult::scan_failed("timeout", 1),
            VerificationResult::role_match("Assessor".to_string(), 1),
            VerificationResult::role_mismatch("Assessor".to_string(), "Secretário", 1),
            VerificationResult::role_undetected(1),
        ] {
            assert!(result.is_consistent(), "{:?}", result);
            assert!(result.state.is_terminal());
        }
    }

    #[test]
    fn test_record_canonicalization_drops_blank_role() {
        let canon = Canonicalizer::default();
        let record: LinkRecord<()> =
            LinkRecord::new("1ª Vara Cível", Some("   ".to_string()), None).canonicalized(&canon);
        assert_eq!(record.unit_name_normalized.as_str(), "1a vara civel");
        assert!(record.role_raw.is_none());
        assert!(!record.has_role());
    }

    #[test]
    fn test_batch_buckets() {
        let mut batch = BatchResult::default();
        batch.push("a", VerificationResult::role_match("X".to_string(), 0), false);
        batch.push("b", VerificationResult::role_undetected(0), true);
        batch.push("c", VerificationResult::not_linked("not linked", 0), false);
        assert_eq!(batch.matched_correct.len(), 1);
        assert_eq!(batch.matched_different_role.len(), 1);
        assert_eq!(batch.to_link.len(), 1);
        assert_eq!(batch.total(), 3);
        assert!(batch.matched_different_role[0].cached);
    }
}
