//! 规范化器
//!
//! 小写 → Unicode 兼容分解并去除组合附加符 → 连字符折叠 → 非 [a-z0-9 -] 字符替换为空格 → 空白折叠

use std::collections::BTreeMap;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::canon::rules::AbbreviationTable;
use crate::canon::tokenizer::MemoCache;
use crate::canon::types::{NormalizedText, TokenSet};

/// 默认记忆容量
pub const DEFAULT_MEMO_CAPACITY: usize = 4096;

/// 规范化器（会话级，持有记忆缓存）
///
/// 每个自动化会话构造一次，显式传给评分器与校验器，不存在进程级可变状态
pub struct Canonicalizer {
    /// 缩写表
    pub(crate) abbreviations: AbbreviationTable,
    /// normalize 结果缓存
    normalized: MemoCache<String, NormalizedText>,
    /// tokenize 结果缓存，键为 (原文, 最小长度)
    pub(crate) tokens: MemoCache<(String, usize), TokenSet>,
}

impl Canonicalizer {
    /// 创建规范化器
    ///
    /// # Arguments
    /// * `memo_capacity` - 每类缓存的最大条目数，满后不再写入
    pub fn new(memo_capacity: usize) -> Self {
        Self::with_abbreviations(AbbreviationTable::new(), memo_capacity)
    }

    /// 使用额外缩写条目创建
    pub fn with_extra_abbreviations(extra: &BTreeMap<String, String>, memo_capacity: usize) -> Self {
        Self::with_abbreviations(AbbreviationTable::with_extra(extra), memo_capacity)
    }

    fn with_abbreviations(abbreviations: AbbreviationTable, memo_capacity: usize) -> Self {
        Self {
            abbreviations,
            normalized: MemoCache::new(memo_capacity),
            tokens: MemoCache::new(memo_capacity),
        }
    }

    /// 规范化文本
    ///
    /// 确定且幂等；空输入返回空串，不会失败
    pub fn normalize(&self, text: &str) -> NormalizedText {
        if text.is_empty() {
            return NormalizedText::default();
        }
        if let Some(hit) = self.normalized.get(text) {
            return hit;
        }

        let result = NormalizedText::new(normalize_uncached(text));
        self.normalized.insert(text.to_string(), result.clone());
        result
    }

    /// 展开缩写
    ///
    /// 先做短语级替换，再逐词替换；未命中的词原样保留
    pub fn expand_abbreviations(&self, normalized: &str) -> String {
        if normalized.is_empty() {
            return String::new();
        }

        let phrased = self.abbreviations.expand_phrases(normalized);
        phrased
            .split_whitespace()
            .map(|token| self.abbreviations.lookup_token(token).unwrap_or(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 缓存占用（normalize 条目数, tokenize 条目数）
    pub fn memo_sizes(&self) -> (usize, usize) {
        (self.normalized.len(), self.tokens.len())
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MEMO_CAPACITY)
    }
}

/// 各类连字符/破折号
fn is_dash(ch: char) -> bool {
    matches!(
        ch,
        '-' | '\u{2010}'
            | '\u{2011}'
            | '\u{2012}'
            | '\u{2013}'
            | '\u{2014}'
            | '\u{2015}'
            | '\u{2212}'
            | '\u{FE58}'
            | '\u{FE63}'
            | '\u{FF0D}'
    )
}

fn normalize_uncached(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for ch in text.nfkd() {
        if is_combining_mark(ch) {
            continue;
        }
        for lower in ch.to_lowercase() {
            let mapped = if is_dash(lower) {
                '-'
            } else if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
                lower
            } else {
                ' '
            };
            folded.push(mapped);
        }
    }

    // 空白折叠：多个连续空格 -> 单个空格
    let mut result = String::with_capacity(folded.len());
    let mut prev_space = true;
    for ch in folded.chars() {
        if ch == ' ' {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(ch);
            prev_space = false;
        }
    }

    result.trim_end().to_string()
}
