//! 多指标相似度打分
//!
//! 精确匹配、双向词覆盖率、Jaccard、归一化编辑距离，以及加权综合分

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strsim::levenshtein;

use crate::canon::{Canonicalizer, DEFAULT_MIN_TOKEN_LEN};

/// 覆盖率权重
const COVERAGE_WEIGHT: f64 = 0.4;
/// Jaccard 权重
const JACCARD_WEIGHT: f64 = 0.3;
/// 编辑相似度权重
const EDIT_WEIGHT: f64 = 0.3;

/// 相似度结果
///
/// 所有分量在 [0, 1]；精确匹配时综合分恒为 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub exact_match: bool,
    /// a 的词被 b 覆盖的比例
    pub coverage_a_to_b: f64,
    /// b 的词被 a 覆盖的比例
    pub coverage_b_to_a: f64,
    pub jaccard: f64,
    pub edit_similarity: f64,
    pub combined_score: f64,
}

impl SimilarityResult {
    /// 两个方向中较大的覆盖率
    pub fn max_coverage(&self) -> f64 {
        self.coverage_a_to_b.max(self.coverage_b_to_a)
    }

    /// 两个方向中较小的覆盖率
    pub fn min_coverage(&self) -> f64 {
        self.coverage_a_to_b.min(self.coverage_b_to_a)
    }
}

/// 相似度打分器
pub struct SimilarityScorer {
    canon: Arc<Canonicalizer>,
    min_token_len: usize,
}

impl SimilarityScorer {
    pub fn new(canon: Arc<Canonicalizer>) -> Self {
        Self::with_min_token_len(canon, DEFAULT_MIN_TOKEN_LEN)
    }

    pub fn with_min_token_len(canon: Arc<Canonicalizer>, min_token_len: usize) -> Self {
        Self {
            canon,
            min_token_len,
        }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canon
    }

    /// 计算两段文本的相似度
    pub fn score(&self, a: &str, b: &str) -> SimilarityResult {
        let norm_a = self.canon.normalize(a);
        let norm_b = self.canon.normalize(b);
        let exact_match = !norm_a.is_empty() && norm_a == norm_b;

        let tokens_a = self.canon.tokenize(a, self.min_token_len);
        let tokens_b = self.canon.tokenize(b, self.min_token_len);
        let common = tokens_a.intersection_count(&tokens_b) as f64;

        let coverage_a_to_b = ratio(common, tokens_a.len());
        let coverage_b_to_a = ratio(common, tokens_b.len());
        let jaccard = ratio(common, tokens_a.union_count(&tokens_b));

        let edit_similarity = {
            let max_len = norm_a.char_len().max(norm_b.char_len());
            if max_len == 0 {
                0.0
            } else {
                let distance = levenshtein(norm_a.as_str(), norm_b.as_str());
                1.0 - (distance as f64 / max_len as f64)
            }
        };

        let combined_score = if exact_match {
            1.0
        } else {
            (COVERAGE_WEIGHT * coverage_a_to_b.max(coverage_b_to_a)
                + JACCARD_WEIGHT * jaccard
                + EDIT_WEIGHT * edit_similarity)
                .clamp(0.0, 1.0)
        };

        SimilarityResult {
            exact_match,
            coverage_a_to_b,
            coverage_b_to_a,
            jaccard,
            edit_similarity,
            combined_score,
        }
    }
}

fn ratio(part: f64, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part / whole as f64
    }
}
