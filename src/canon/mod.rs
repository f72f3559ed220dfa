//! 文本规范化层
//!
//! 把来源不一的单位/角色名称转为可比较的形式。
//!
//! ## 处理流程
//! 1. 小写 + Unicode 兼容分解 + 去除附加符号
//! 2. 连字符折叠，其他标点替换为空格，空白折叠
//! 3. 短语级、单词级缩写展开（含拼写变体）
//! 4. 分词：过滤短词/停用词/纯数字，折叠序数，保序去重

mod normalizer;
mod rules;
mod tokenizer;
mod types;

pub use normalizer::{Canonicalizer, DEFAULT_MEMO_CAPACITY};
pub use rules::AbbreviationTable;
pub(crate) use rules::{fold_ordinal, is_numeral};
pub use tokenizer::DEFAULT_MIN_TOKEN_LEN;
pub use types::{NormalizedText, TokenSet};
