// 错误类型定义
//
// 校验路径的错误（扫描失败等）在内部吸收并转换为保守结果；
// 定位路径的错误（歧义、定位耗尽、超时）向调用方抛出。

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// 两个及以上候选在统计上无法区分，必须由人工处理
    #[error("歧义匹配: 目标 \"{target}\" 同时接近 {candidates:?}")]
    AmbiguousMatch {
        target: String,
        candidates: Vec<String>,
    },

    /// 所有层级和重试均未定位到目标控件
    #[error("定位耗尽: 目标 \"{target}\"，已尝试 {} 个模式", attempted.len())]
    ResolverExhausted {
        target: String,
        attempted: Vec<String>,
    },

    /// 全局截止时间在操作中途到期
    #[error("操作超时: {operation}（预算 {budget_ms}ms）")]
    TimeoutExceeded { operation: String, budget_ms: u64 },

    /// 扫描协作方失败（校验器内部吸收，不会到达调用方）
    #[error("扫描失败: {0}")]
    ScanFailure(String),

    /// 定位目录中不存在该目标类型
    #[error("未知的定位目标: {0}")]
    UnknownTarget(String),

    #[error("配置无效: {0}")]
    Config(String),
}

impl LinkError {
    /// 是否允许在重试循环中再次尝试
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            LinkError::TimeoutExceeded { .. }
                | LinkError::AmbiguousMatch { .. }
                | LinkError::UnknownTarget(_)
                | LinkError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LinkError::ResolverExhausted {
            target: "addButton".to_string(),
            attempted: vec![],
        }
        .is_retryable());
        assert!(LinkError::ScanFailure("boom".to_string()).is_retryable());
        assert!(!LinkError::TimeoutExceeded {
            operation: "resolve".to_string(),
            budget_ms: 10,
        }
        .is_retryable());
        assert!(!LinkError::AmbiguousMatch {
            target: "x".to_string(),
            candidates: vec!["a".to_string(), "b".to_string()],
        }
        .is_retryable());
    }

    #[test]
    fn test_exhausted_message_counts_patterns() {
        let err = LinkError::ResolverExhausted {
            target: "addButton".to_string(),
            attempted: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("2"));
    }
}
