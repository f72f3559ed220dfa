// 关联状态缓存
//
// 以 (规范化单位名, 规范化角色) 为键记忆校验结果。
// 无 TTL，只能手动失效；每个会话独占一个实例。

use std::collections::HashMap;

use serde::Serialize;

use crate::canon::{Canonicalizer, NormalizedText};
use crate::verify::types::VerificationResult;

/// 缓存键（纯字符串对）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub unit: NormalizedText,
    pub role: NormalizedText,
}

impl CacheKey {
    pub fn new(canon: &Canonicalizer, unit_name: &str, role: &str) -> Self {
        Self {
            unit: canon.normalize(unit_name),
            role: canon.normalize(role),
        }
    }
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
}

/// 关联状态缓存
#[derive(Debug, Default)]
pub struct LinkStateCache {
    entries: HashMap<CacheKey, VerificationResult>,
    hits: u64,
    misses: u64,
}

impl LinkStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询（同时记录命中/未命中）
    pub fn get(&mut self, key: &CacheKey) -> Option<&VerificationResult> {
        match self.entries.get(key) {
            Some(result) => {
                self.hits += 1;
                Some(result)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, result: VerificationResult) {
        self.entries.insert(key, result);
    }

    /// 使单个条目失效
    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// 清空缓存（统计计数一并归零）
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_canonical() {
        let canon = Canonicalizer::default();
        let a = CacheKey::new(&canon, "1ª Vara", "Secretário");
        let b = CacheKey::new(&canon, "1a  VARA", "secretario");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hits_misses_and_clear() {
        let canon = Canonicalizer::default();
        let mut cache = LinkStateCache::new();
        let key = CacheKey::new(&canon, "Vara Cível", "Assessor");

        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), VerificationResult::not_linked("not linked", 3));
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!(stats, CacheStats { size: 1, hits: 1, misses: 1 });

        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));

        cache.insert(key, VerificationResult::not_linked("not linked", 3));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
