//! 分词器
//!
//! 规范化 → 展开缩写 → 按空白切分 → 过滤短词/停用词/纯数字 → 折叠序数 → 保序去重

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::canon::normalizer::Canonicalizer;
use crate::canon::rules::{fold_ordinal, is_numeral, is_stop_word};
use crate::canon::types::TokenSet;

/// 默认最小词长
pub const DEFAULT_MIN_TOKEN_LEN: usize = 2;

/// 定容记忆缓存
///
/// 满后新条目直接丢弃：既不驱逐旧条目，也不无限增长
pub(crate) struct MemoCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
    capacity: usize,
}

impl<K: Eq + Hash, V: Clone> MemoCache<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub(crate) fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() < self.capacity || entries.contains_key(&key) {
            entries.insert(key, value);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Canonicalizer {
    /// 分词
    ///
    /// 结果按 (原文, 最小长度) 记忆
    pub fn tokenize(&self, text: &str, min_length: usize) -> TokenSet {
        if text.is_empty() {
            return TokenSet::default();
        }

        let key = (text.to_string(), min_length);
        if let Some(hit) = self.tokens.get(&key) {
            return hit;
        }

        let normalized = self.normalize(text);
        let expanded = self.expand_abbreviations(&normalized);

        let significant = expanded.split_whitespace().filter_map(|token| {
            if token.chars().count() < min_length || is_stop_word(token) || is_numeral(token) {
                return None;
            }
            Some(fold_ordinal(token).unwrap_or(token))
        });

        let result = TokenSet::from_tokens(significant);
        self.tokens.insert(key, result.clone());
        result
    }

    /// 以默认最小词长分词
    pub fn tokens(&self, text: &str) -> TokenSet {
        self.tokenize(text, DEFAULT_MIN_TOKEN_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_unit_name() {
        let canon = Canonicalizer::default();
        let tokens = canon.tokens("1ª Vara do Trabalho de São Paulo");
        assert_eq!(tokens.as_slice(), &["1", "vara", "trabalho", "sao", "paulo"]);
    }

    #[test]
    fn test_tokenize_drops_numerals_and_short_tokens() {
        let canon = Canonicalizer::default();
        let tokens = canon.tokens("Vara 2024 X de Família");
        assert_eq!(tokens.as_slice(), &["vara", "familia"]);
    }

    #[test]
    fn test_tokenize_expands_and_dedups() {
        let canon = Canonicalizer::default();
        // "vt" 展开后与后面的 "vara" 重复
        let tokens = canon.tokens("VT Vara Campinas");
        assert_eq!(tokens.as_slice(), &["vara", "trabalho", "campinas"]);
    }

    #[test]
    fn test_tokenize_min_length() {
        let canon = Canonicalizer::default();
        let tokens = canon.tokenize("Vara Cível de Rio Claro", 4);
        assert_eq!(tokens.as_slice(), &["vara", "civel", "claro"]);
    }

    #[test]
    fn test_tokenize_memo_capacity_is_fixed() {
        let canon = Canonicalizer::new(2);
        canon.tokens("Vara Cível");
        canon.tokens("Vara Criminal");
        canon.tokens("Vara de Família");
        assert_eq!(canon.memo_sizes().1, 2);
        // 未缓存的输入仍然能正确计算
        assert_eq!(canon.tokens("Vara de Família").as_slice(), &["vara", "familia"]);
    }

    #[test]
    fn test_memo_cache_never_evicts() {
        let cache: MemoCache<String, u32> = MemoCache::new(1);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        // 已存在的键允许更新
        cache.insert("a".to_string(), 3);
        assert_eq!(cache.get("a"), Some(3));
    }
}
