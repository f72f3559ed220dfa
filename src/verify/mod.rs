// 关联状态校验模块
//
// 判断某个单位是否已关联、角色是否一致，并缓存结果

pub mod cache;
pub mod types;
pub mod verifier;

pub use cache::{CacheKey, CacheStats, LinkStateCache};
pub use types::{
    BatchEntry, BatchFailure, BatchProgress, BatchResult, LinkRecord, LinkState,
    VerificationResult,
};
pub use verifier::{LinkStateVerifier, DEFAULT_SCAN_TIMEOUT};
