// 单位关联核心：名称规范化、相似度判定、关联状态校验、分层元素定位

pub mod canon;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod history;
pub mod resolver;
pub mod session;
pub mod similarity;
pub mod verify;

pub use canon::{Canonicalizer, NormalizedText, TokenSet};
pub use collaborators::{
    ActionKind, ElementContext, HistoryCollaborator, QueryCollaborator, ScanCollaborator,
};
pub use config::ResolutionConfig;
pub use error::{LinkError, Result};
pub use history::{HistoryEntry, HistoryOutcome, JsonlHistory};
pub use resolver::{
    Deadline, EnvironmentProfile, LocatorCatalog, PatternDescriptor, Resolved, Resolver,
    TierLevel, TimeoutCategory, TimeoutPolicy,
};
pub use session::LinkSession;
pub use similarity::{
    EquivalenceDecider, EquivalenceVerdict, MatchThresholds, SimilarityResult, SimilarityScorer,
};
pub use verify::{
    BatchProgress, BatchResult, CacheStats, LinkRecord, LinkState, LinkStateVerifier,
    VerificationResult,
};

/// 初始化日志输出
///
/// 宿主或测试可重复调用，已初始化时静默忽略
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}
