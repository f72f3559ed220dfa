//! 规范化规则定义
//!
//! 包含停用词表、缩写/拼写变体表、序数折叠

use std::collections::{BTreeMap, HashMap, HashSet};

use aho_corasick::{AhoCorasick, MatchKind};

lazy_static::lazy_static! {
    /// 停用词（葡语介词、冠词、连词）
    static ref STOP_WORDS: HashSet<&'static str> = HashSet::from([
        "de", "da", "do", "das", "dos", "e", "a", "o", "as", "os", "em", "no", "na",
        "nos", "nas", "para", "por", "com", "ao", "aos", "um", "uma",
    ]);
}

/// 判断是否为停用词
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

/// 判断是否为纯数字
pub fn is_numeral(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// 折叠序数后缀（"1a" → "1"，"12os" → "12"）
///
/// 不是序数形式时返回 None
pub fn fold_ordinal(token: &str) -> Option<&str> {
    let digits_end = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)?;
    if digits_end == 0 {
        return None;
    }
    match &token[digits_end..] {
        "a" | "o" | "as" | "os" => Some(&token[..digits_end]),
        _ => None,
    }
}

/// 内置单词缩写与拼写变体（键为规范化后的单词）
fn builtin_token_abbreviations() -> Vec<(&'static str, &'static str)> {
    vec![
        // 法院/机构类型
        ("vt", "vara do trabalho"),
        ("trt", "tribunal regional do trabalho"),
        ("trf", "tribunal regional federal"),
        ("tj", "tribunal de justica"),
        ("tst", "tribunal superior do trabalho"),
        ("jef", "juizado especial federal"),
        ("jec", "juizado especial civel"),
        ("cejusc", "centro judiciario de solucao de conflitos e cidadania"),
        ("jz", "juizado"),
        ("esp", "especial"),
        ("trab", "trabalho"),
        ("civ", "civel"),
        ("crim", "criminal"),
        ("fam", "familia"),
        ("faz", "fazenda"),
        ("pub", "publica"),
        ("exec", "execucao"),
        ("fisc", "fiscal"),
        ("inf", "infancia"),
        ("juv", "juventude"),
        ("fed", "federal"),
        ("est", "estadual"),
        ("jud", "judiciario"),
        ("secr", "secretaria"),
        ("aud", "audiencia"),
        ("tec", "tecnico"),
        ("sto", "santo"),
        ("sta", "santa"),
        // 拼写变体
        ("civil", "civel"),
        ("civeis", "civel"),
        ("criminais", "criminal"),
        ("varas", "vara"),
        // 州缩写
        ("sp", "sao paulo"),
        ("rj", "rio de janeiro"),
        ("mg", "minas gerais"),
        ("df", "distrito federal"),
        ("rs", "rio grande do sul"),
        ("pr", "parana"),
        ("ba", "bahia"),
        ("sc", "santa catarina"),
        ("pe", "pernambuco"),
        ("ce", "ceara"),
        ("go", "goias"),
    ]
}

/// 内置短语缩写（多词，整词边界匹配）
fn builtin_phrase_abbreviations() -> Vec<(&'static str, &'static str)> {
    vec![
        ("s paulo", "sao paulo"),
        ("v trab", "vara do trabalho"),
        ("v do trabalho", "vara do trabalho"),
        ("v civel", "vara civel"),
        ("v crim", "vara criminal"),
        ("j especial", "juizado especial"),
        ("faz publica", "fazenda publica"),
        ("exec fiscal", "execucao fiscal"),
        ("inf e juventude", "infancia e juventude"),
        ("sec aud", "secretario de audiencia"),
        ("sec de audiencia", "secretario de audiencia"),
    ]
}

/// 缩写表
///
/// 单词级替换走 HashMap，短语级替换走 Aho-Corasick（最左最长匹配）
pub struct AbbreviationTable {
    tokens: HashMap<String, String>,
    phrases: Vec<(String, String)>,
    phrase_matcher: Option<AhoCorasick>,
}

impl AbbreviationTable {
    /// 创建内置缩写表
    pub fn new() -> Self {
        Self::with_extra(&BTreeMap::new())
    }

    /// 创建缩写表并合并额外条目
    ///
    /// 额外条目覆盖同名内置条目；含空格的键视为短语
    pub fn with_extra(extra: &BTreeMap<String, String>) -> Self {
        let mut tokens: HashMap<String, String> = builtin_token_abbreviations()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut phrases: Vec<(String, String)> = builtin_phrase_abbreviations()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        for (key, value) in extra {
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            if key.contains(' ') {
                phrases.retain(|(k, _)| k != &key);
                phrases.push((key, value.clone()));
            } else {
                tokens.insert(key, value.clone());
            }
        }

        let phrase_matcher = match AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(phrases.iter().map(|(k, _)| k.as_str()))
        {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                tracing::warn!("canon: 短语缩写自动机构建失败，跳过短语展开: {}", e);
                None
            }
        };

        Self {
            tokens,
            phrases,
            phrase_matcher,
        }
    }

    /// 单词级查找
    pub fn lookup_token(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(|s| s.as_str())
    }

    /// 短语级替换（仅在整词边界处生效）
    pub fn expand_phrases(&self, text: &str) -> String {
        let Some(matcher) = &self.phrase_matcher else {
            return text.to_string();
        };

        let bytes = text.as_bytes();
        let mut result = String::with_capacity(text.len());
        let mut last_end = 0;

        for m in matcher.find_iter(text) {
            let starts_on_word = m.start() == 0 || bytes[m.start() - 1] == b' ';
            let ends_on_word = m.end() == bytes.len() || bytes[m.end()] == b' ';
            if !starts_on_word || !ends_on_word {
                continue;
            }
            result.push_str(&text[last_end..m.start()]);
            result.push_str(&self.phrases[m.pattern().as_usize()].1);
            last_end = m.end();
        }

        result.push_str(&text[last_end..]);
        result
    }

    /// 条目总数
    pub fn len(&self) -> usize {
        self.tokens.len() + self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.phrases.is_empty()
    }
}

impl Default for AbbreviationTable {
    fn default() -> Self {
        Self::new()
    }
}
