//! 相似度与等价判定
//!
//! - scorer: 多指标相似度打分
//! - decider: 阈值融合、最佳候选选择、歧义检测

mod decider;
mod scorer;

pub use decider::{
    BestMatch, EquivalenceDecider, EquivalenceVerdict, MatchThresholds, DEFAULT_AMBIGUITY_MARGIN,
    DEFAULT_THRESHOLD,
};
pub use scorer::{SimilarityResult, SimilarityScorer};
