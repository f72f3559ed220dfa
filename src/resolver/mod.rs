// 元素定位模块
//
// - timeout: 自适应/递进超时与带截止时间的重试
// - tiers: 定位层级、上下文校验与内置定位目录
// - locator: 分层定位器

pub mod locator;
pub mod tiers;
pub mod timeout;

pub use locator::{Resolved, Resolver};
pub use tiers::{
    ContextValidator, Expansion, LocatorCatalog, LocatorStrategy, LocatorTier, PatternDescriptor,
    TargetSpec, TierLevel,
};
pub use timeout::{
    Deadline, EnvironmentProfile, RetryConfig, TimeoutCategory, TimeoutConfig, TimeoutPolicy,
};
