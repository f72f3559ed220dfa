//! 等价判定
//!
//! 把多指标打分融合为布尔判定，并在多个候选间检测歧义。
//! 歧义绝不通过任意的平局规则消解，而是抛给调用方。

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::similarity::scorer::{SimilarityResult, SimilarityScorer};

/// 默认等价阈值
pub const DEFAULT_THRESHOLD: f64 = 0.85;
/// 默认歧义边际
pub const DEFAULT_AMBIGUITY_MARGIN: f64 = 0.95;

/// 等价判定阈值
///
/// 针对葡语司法单位命名调出的经验值，换领域需要重新调参
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchThresholds {
    /// 综合分阈值
    pub threshold: f64,
    /// 双向覆盖率都达到该值即视为等价
    pub both_coverage: f64,
    /// Jaccard 下限（与 coverage_floor 联合使用）
    pub jaccard_floor: f64,
    /// 最大覆盖率下限（与 jaccard_floor 联合使用）
    pub coverage_floor: f64,
    /// 较短文本是较长文本的整词前缀且词全部被覆盖时视为等价
    pub allow_prefix_containment: bool,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            both_coverage: 0.95,
            jaccard_floor: 0.85,
            coverage_floor: 0.90,
            allow_prefix_containment: false,
        }
    }
}

impl MatchThresholds {
    /// 角色匹配默认值（允许前缀包含，如 "Analista" ≡ "Analista Judiciário"）
    pub fn for_roles() -> Self {
        Self {
            allow_prefix_containment: true,
            ..Self::default()
        }
    }

    /// 替换综合分阈值
    pub fn with_threshold(&self, threshold: f64) -> Self {
        Self {
            threshold,
            ..self.clone()
        }
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        for (name, value) in [
            ("threshold", self.threshold),
            ("both_coverage", self.both_coverage),
            ("jaccard_floor", self.jaccard_floor),
            ("coverage_floor", self.coverage_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} 必须在 [0, 1] 内，当前为 {}", name, value));
            }
        }
        Ok(())
    }
}

/// 等价判定结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquivalenceVerdict {
    pub equivalent: bool,
    pub score: f64,
    /// 与最佳候选无法区分的其他候选
    pub ambiguous_with: Vec<String>,
}

/// 最佳候选
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    /// 在候选列表中的下标
    pub index: usize,
    pub candidate: String,
    pub result: SimilarityResult,
}

/// 等价判定器
pub struct EquivalenceDecider {
    scorer: SimilarityScorer,
    ambiguity_margin: f64,
}

impl EquivalenceDecider {
    pub fn new(scorer: SimilarityScorer) -> Self {
        Self::with_margin(scorer, DEFAULT_AMBIGUITY_MARGIN)
    }

    pub fn with_margin(scorer: SimilarityScorer, ambiguity_margin: f64) -> Self {
        Self {
            scorer,
            ambiguity_margin,
        }
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    pub fn ambiguity_margin(&self) -> f64 {
        self.ambiguity_margin
    }

    /// 判定两段文本是否指同一实体
    ///
    /// 满足任一条件即等价：
    /// - 规范化后完全相同
    /// - 双向覆盖率都 ≥ both_coverage
    /// - 综合分 ≥ threshold
    /// - Jaccard ≥ jaccard_floor 且最大覆盖率 ≥ coverage_floor
    /// - （可选）整词前缀包含
    pub fn equivalent(&self, a: &str, b: &str, thresholds: &MatchThresholds) -> bool {
        let result = self.scorer.score(a, b);
        self.is_equivalent(a, b, &result, thresholds)
    }

    /// 以默认下限、指定综合分阈值判定
    pub fn equivalent_at(&self, a: &str, b: &str, threshold: f64) -> bool {
        self.equivalent(a, b, &MatchThresholds::default().with_threshold(threshold))
    }

    /// 单对文本的判定结果
    pub fn verdict(&self, a: &str, b: &str, thresholds: &MatchThresholds) -> EquivalenceVerdict {
        let result = self.scorer.score(a, b);
        EquivalenceVerdict {
            equivalent: self.is_equivalent(a, b, &result, thresholds),
            score: result.combined_score,
            ambiguous_with: Vec::new(),
        }
    }

    fn is_equivalent(
        &self,
        a: &str,
        b: &str,
        result: &SimilarityResult,
        thresholds: &MatchThresholds,
    ) -> bool {
        if result.exact_match {
            return true;
        }
        if result.min_coverage() >= thresholds.both_coverage {
            return true;
        }
        if result.combined_score >= thresholds.threshold {
            return true;
        }
        if result.jaccard >= thresholds.jaccard_floor
            && result.max_coverage() >= thresholds.coverage_floor
        {
            return true;
        }
        thresholds.allow_prefix_containment && self.is_prefix_contained(a, b, result)
    }

    /// 较短文本是较长文本的整词前缀，且较短一方的词全部被覆盖
    fn is_prefix_contained(&self, a: &str, b: &str, result: &SimilarityResult) -> bool {
        let canon = self.scorer.canonicalizer();
        let norm_a = canon.normalize(a);
        let norm_b = canon.normalize(b);

        let (shorter, longer, shorter_coverage) = if norm_a.len() <= norm_b.len() {
            (norm_a.as_str(), norm_b.as_str(), result.coverage_a_to_b)
        } else {
            (norm_b.as_str(), norm_a.as_str(), result.coverage_b_to_a)
        };

        if shorter.is_empty() || shorter_coverage < 1.0 || !longer.starts_with(shorter) {
            return false;
        }
        longer.len() == shorter.len() || longer.as_bytes()[shorter.len()] == b' '
    }

    /// 评估候选列表：选出综合分最高的等价候选，并收集与之无法区分的其他候选
    ///
    /// 规范化后与最佳候选相同的条目视为同一实体，不计入歧义
    pub fn evaluate<T: AsRef<str>>(
        &self,
        candidates: &[T],
        target: &str,
        thresholds: &MatchThresholds,
    ) -> Option<(BestMatch, EquivalenceVerdict)> {
        self.evaluate_by(candidates, |c| c.as_ref(), target, thresholds)
    }

    /// 同 `evaluate`，通过 `key` 从候选中取文本
    pub fn evaluate_by<T, F>(
        &self,
        candidates: &[T],
        key: F,
        target: &str,
        thresholds: &MatchThresholds,
    ) -> Option<(BestMatch, EquivalenceVerdict)>
    where
        F: Fn(&T) -> &str,
    {
        let scored: Vec<(usize, &str, SimilarityResult)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let text = key(c);
                (i, text, self.scorer.score(text, target))
            })
            .collect();

        let mut best: Option<&(usize, &str, SimilarityResult)> = None;
        for entry in &scored {
            let (_, text, result) = entry;
            if !self.is_equivalent(text, target, result, thresholds) {
                continue;
            }
            // 严格大于：同分时保留先出现的候选，歧义由下方检查兜底
            if best.map_or(true, |b| result.combined_score > b.2.combined_score) {
                best = Some(entry);
            }
        }
        let &(index, best_text, best_result) = best?;

        let ambiguous_with = self.ambiguous_among(
            scored.iter().map(|(i, text, r)| (*i, *text, r.combined_score)),
            index,
            best_text,
            best_result.combined_score,
        );

        let best_match = BestMatch {
            index,
            candidate: best_text.to_string(),
            result: best_result,
        };
        let verdict = EquivalenceVerdict {
            equivalent: true,
            score: best_result.combined_score,
            ambiguous_with,
        };
        Some((best_match, verdict))
    }

    /// 选出最佳候选
    ///
    /// 无等价候选返回 `Ok(None)`；存在无法区分的候选时返回 `AmbiguousMatch`
    pub fn pick_best<T: AsRef<str>>(
        &self,
        candidates: &[T],
        target: &str,
        thresholds: &MatchThresholds,
    ) -> Result<Option<BestMatch>> {
        self.pick_best_by(candidates, |c| c.as_ref(), target, thresholds)
    }

    /// 同 `pick_best`，通过 `key` 从候选中取文本
    pub fn pick_best_by<T, F>(
        &self,
        candidates: &[T],
        key: F,
        target: &str,
        thresholds: &MatchThresholds,
    ) -> Result<Option<BestMatch>>
    where
        F: Fn(&T) -> &str,
    {
        let Some((best, verdict)) = self.evaluate_by(candidates, key, target, thresholds) else {
            return Ok(None);
        };

        if !verdict.ambiguous_with.is_empty() {
            let mut all = vec![best.candidate.clone()];
            all.extend(verdict.ambiguous_with);
            tracing::warn!(
                "similarity: 目标 \"{}\" 存在 {} 个无法区分的候选，拒绝自动选择",
                target,
                all.len()
            );
            return Err(LinkError::AmbiguousMatch {
                target: target.to_string(),
                candidates: all,
            });
        }

        Ok(Some(best))
    }

    /// 歧义检查：给定最佳候选，返回综合分 ≥ best × margin 的其他候选
    pub fn ambiguity_check<T: AsRef<str>>(
        &self,
        candidates: &[T],
        target: &str,
        best: &BestMatch,
        margin: f64,
    ) -> Vec<String> {
        let threshold = best.result.combined_score * margin;
        let best_norm = self.scorer.canonicalizer().normalize(&best.candidate);
        candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != best.index)
            .map(|(_, c)| c.as_ref())
            .filter(|c| self.scorer.canonicalizer().normalize(c) != best_norm)
            .filter(|c| self.scorer.score(c, target).combined_score >= threshold)
            .map(|c| c.to_string())
            .collect()
    }

    fn ambiguous_among<'a, I>(
        &self,
        scored: I,
        best_index: usize,
        best_text: &str,
        best_score: f64,
    ) -> Vec<String>
    where
        I: Iterator<Item = (usize, &'a str, f64)>,
    {
        let threshold = best_score * self.ambiguity_margin;
        let canon = self.scorer.canonicalizer();
        let best_norm = canon.normalize(best_text);
        let mut out: Vec<String> = Vec::new();
        for (i, text, score) in scored {
            if i == best_index || score < threshold {
                continue;
            }
            if canon.normalize(text) == best_norm || out.iter().any(|o| o == text) {
                continue;
            }
            out.push(text.to_string());
        }
        out
    }
}
