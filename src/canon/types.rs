//! 规范化类型定义

use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// 规范化文本
///
/// 小写、去重音、标点折叠后的字符串，只能由 `Canonicalizer` 产生
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub(crate) fn new(text: String) -> Self {
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// 字符数（编辑距离按字符计算）
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl Deref for NormalizedText {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 有效词序列
///
/// 已去停用词、去纯数字、折叠序数、展开缩写，按首次出现顺序去重
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenSet(Vec<String>);

impl TokenSet {
    /// 由词序列构造（保序去重）
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for token in tokens {
            let token = token.into();
            if seen.insert(token.clone()) {
                out.push(token);
            }
        }
        Self(out)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.iter().any(|t| t == token)
    }

    /// 交集大小
    pub fn intersection_count(&self, other: &TokenSet) -> usize {
        let theirs: HashSet<&str> = other.iter().collect();
        self.iter().filter(|t| theirs.contains(t)).count()
    }

    /// 并集大小
    pub fn union_count(&self, other: &TokenSet) -> usize {
        self.len() + other.len() - self.intersection_count(other)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_set_dedup_preserves_order() {
        let set = TokenSet::from_tokens(["vara", "civel", "vara", "campinas"]);
        assert_eq!(set.as_slice(), &["vara", "civel", "campinas"]);
    }

    #[test]
    fn test_set_counts() {
        let a = TokenSet::from_tokens(["vara", "trabalho", "paulo"]);
        let b = TokenSet::from_tokens(["vara", "paulo", "sao"]);
        assert_eq!(a.intersection_count(&b), 2);
        assert_eq!(a.union_count(&b), 4);
    }
}
