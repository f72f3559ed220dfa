//! 定位层级与内置定位目录
//!
//! 每个目标种类对应一组按优先级排列的层级：具体 → 上下文 → 通用。
//! 通用层的匹配必须通过上下文校验。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canon::{fold_ordinal, is_numeral, Canonicalizer};
use crate::collaborators::ElementContext;

/// 元素查询模式（由宿主的查询协作方解释）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternDescriptor {
    Css {
        selector: String,
    },
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
    },
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    Label {
        label: String,
    },
    #[serde(rename = "xpath")]
    XPath {
        xpath: String,
    },
}

impl PatternDescriptor {
    pub fn css(selector: &str) -> Self {
        PatternDescriptor::Css {
            selector: selector.to_string(),
        }
    }

    pub fn role(role: &str, name: Option<&str>) -> Self {
        PatternDescriptor::Role {
            role: role.to_string(),
            name: name.map(str::to_string),
        }
    }

    pub fn text(text: &str) -> Self {
        PatternDescriptor::Text {
            text: text.to_string(),
            exact: false,
        }
    }

    pub fn label(label: &str) -> Self {
        PatternDescriptor::Label {
            label: label.to_string(),
        }
    }
}

impl fmt::Display for PatternDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternDescriptor::Css { selector } => write!(f, "css={}", selector),
            PatternDescriptor::Role { role, name: Some(name) } => {
                write!(f, "role={}[name=\"{}\"]", role, name)
            }
            PatternDescriptor::Role { role, name: None } => write!(f, "role={}", role),
            PatternDescriptor::Text { text, exact: true } => write!(f, "text=\"{}\"", text),
            PatternDescriptor::Text { text, exact: false } => write!(f, "text~\"{}\"", text),
            PatternDescriptor::Label { label } => write!(f, "label=\"{}\"", label),
            PatternDescriptor::XPath { xpath } => write!(f, "xpath={}", xpath),
        }
    }
}

/// 定位层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    Specific,
    Contextual,
    Generic,
}

impl TierLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierLevel::Specific => "specific",
            TierLevel::Contextual => "contextual",
            TierLevel::Generic => "generic",
        }
    }
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 匹配元素的上下文校验
///
/// 关键词比较前都会经过规范化（去重音、小写），且只按整词匹配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextValidator {
    /// 不校验
    #[default]
    Any,
    /// 元素文本包含任一关键词
    TextContainsAny { needles: Vec<String> },
    /// 容器文本包含任一关键词
    ContainerContainsAny { needles: Vec<String> },
    /// 元素或容器文本整词提到调用方期望的值，且前面没有别的序号（未提供期望值时放行）
    MentionsExpected,
    /// 属性等于给定值
    AttributeEquals { name: String, value: String },
}

/// needle 在 haystack 中以整词形式出现的起始位置
fn whole_word_matches<'a>(
    haystack: &'a str,
    needle: &'a str,
) -> impl Iterator<Item = usize> + 'a {
    let bytes = haystack.as_bytes();
    haystack.match_indices(needle).map(|(i, _)| i).filter(move |&i| {
        let end = i + needle.len();
        let starts_on_word = i == 0 || !bytes[i - 1].is_ascii_alphanumeric();
        let ends_on_word = end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        starts_on_word && ends_on_word
    })
}

/// 前一个词是序数或数字（"2a vara civel" 中的 "2a"）
fn qualified_by_number(haystack: &str, start: usize) -> bool {
    haystack[..start]
        .split_whitespace()
        .last()
        .is_some_and(|prev| is_numeral(prev) || fold_ordinal(prev).is_some())
}

impl ContextValidator {
    fn text_contains(canon: &Canonicalizer, haystack: &str, needles: &[String]) -> bool {
        let haystack = canon.normalize(haystack);
        needles.iter().any(|needle| {
            let needle = canon.normalize(needle);
            !needle.is_empty() && whole_word_matches(&haystack, &needle).next().is_some()
        })
    }

    /// 整词提到期望值，且该处没有被另一个序号修饰
    fn mentions(canon: &Canonicalizer, haystack: &str, expected: &str) -> bool {
        let haystack = canon.normalize(haystack);
        let expected = canon.normalize(expected);
        !expected.is_empty()
            && whole_word_matches(&haystack, &expected).any(|i| !qualified_by_number(&haystack, i))
    }

    /// 校验元素上下文
    pub fn accepts(
        &self,
        canon: &Canonicalizer,
        context: &ElementContext,
        expected: Option<&str>,
    ) -> bool {
        match self {
            ContextValidator::Any => true,
            ContextValidator::TextContainsAny { needles } => {
                Self::text_contains(canon, &context.text, needles)
            }
            ContextValidator::ContainerContainsAny { needles } => {
                Self::text_contains(canon, &context.container_text, needles)
            }
            ContextValidator::MentionsExpected => match expected {
                None => true,
                Some(expected) => {
                    Self::mentions(canon, &context.text, expected)
                        || Self::mentions(canon, &context.container_text, expected)
                }
            },
            ContextValidator::AttributeEquals { name, value } => {
                context.attributes.get(name).is_some_and(|v| v == value)
            }
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, ContextValidator::Any)
    }
}

/// 单个定位策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorStrategy {
    pub id: String,
    pub pattern: PatternDescriptor,
    #[serde(default)]
    pub validator: ContextValidator,
}

impl LocatorStrategy {
    pub fn new(id: &str, pattern: PatternDescriptor) -> Self {
        Self {
            id: id.to_string(),
            pattern,
            validator: ContextValidator::Any,
        }
    }

    pub fn validated(mut self, validator: ContextValidator) -> Self {
        self.validator = validator;
        self
    }
}

/// 一个层级及其策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorTier {
    pub level: TierLevel,
    pub strategies: Vec<LocatorStrategy>,
}

/// 目标所在的可折叠区域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    /// 展开触发元素
    pub pattern: PatternDescriptor,
    /// 展开后的稳定等待（None 时使用 Expansion 类别超时）
    #[serde(default)]
    pub settle_ms: Option<u64>,
}

/// 一个目标种类的定位规格
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub tiers: Vec<LocatorTier>,
    #[serde(default)]
    pub expansion: Option<Expansion>,
}

impl TargetSpec {
    /// 按层级顺序排列
    pub fn ordered_tiers(&self) -> Vec<&LocatorTier> {
        let mut tiers: Vec<&LocatorTier> = self.tiers.iter().collect();
        tiers.sort_by_key(|t| t.level);
        tiers
    }
}

/// 定位目录（目标种类 → 定位规格）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorCatalog {
    #[serde(flatten)]
    pub targets: BTreeMap<String, TargetSpec>,
}

impl Default for LocatorCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn needles(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl LocatorCatalog {
    pub fn empty() -> Self {
        Self {
            targets: BTreeMap::new(),
        }
    }

    /// 内置目录：关联表单的五类控件
    pub fn builtin() -> Self {
        let links_panel_toggle = Expansion {
            pattern: PatternDescriptor::css("#painelLotacoes .panel-heading"),
            settle_ms: None,
        };

        let mut targets = BTreeMap::new();

        targets.insert(
            "addButton".to_string(),
            TargetSpec {
                tiers: vec![
                    LocatorTier {
                        level: TierLevel::Specific,
                        strategies: vec![
                            LocatorStrategy::new("add-by-id", PatternDescriptor::css("button#btnAdicionarLotacao")),
                            LocatorStrategy::new("add-by-role", PatternDescriptor::role("button", Some("Adicionar"))),
                        ],
                    },
                    LocatorTier {
                        level: TierLevel::Contextual,
                        strategies: vec![LocatorStrategy::new(
                            "add-in-form",
                            PatternDescriptor::css("form[id*='lotacao'] button"),
                        )
                        .validated(ContextValidator::TextContainsAny {
                            needles: needles(&["adicionar", "incluir"]),
                        })],
                    },
                    LocatorTier {
                        level: TierLevel::Generic,
                        strategies: vec![LocatorStrategy::new("any-button", PatternDescriptor::css("button"))
                            .validated(ContextValidator::TextContainsAny {
                                needles: needles(&["adicionar", "incluir", "nova lotacao"]),
                            })],
                    },
                ],
                expansion: Some(links_panel_toggle.clone()),
            },
        );

        for (kind, id, label, words) in [
            (
                "unitSelector",
                "select#orgaoJulgador",
                "Órgão Julgador",
                ["orgao julgador", "unidade", "localizacao"],
            ),
            ("roleSelector", "select#papel", "Papel", ["papel", "cargo", "funcao"]),
        ] {
            targets.insert(
                kind.to_string(),
                TargetSpec {
                    tiers: vec![
                        LocatorTier {
                            level: TierLevel::Specific,
                            strategies: vec![
                                LocatorStrategy::new("select-by-id", PatternDescriptor::css(id)),
                                LocatorStrategy::new("select-by-label", PatternDescriptor::label(label)),
                            ],
                        },
                        LocatorTier {
                            level: TierLevel::Contextual,
                            strategies: vec![LocatorStrategy::new(
                                "select-in-form",
                                PatternDescriptor::css("form[id*='lotacao'] select"),
                            )
                            .validated(ContextValidator::ContainerContainsAny {
                                needles: needles(&words),
                            })],
                        },
                        LocatorTier {
                            level: TierLevel::Generic,
                            strategies: vec![
                                LocatorStrategy::new("any-combobox", PatternDescriptor::role("combobox", None))
                                    .validated(ContextValidator::ContainerContainsAny {
                                        needles: needles(&words),
                                    }),
                            ],
                        },
                    ],
                    expansion: Some(links_panel_toggle.clone()),
                },
            );
        }

        targets.insert(
            "confirmButton".to_string(),
            TargetSpec {
                tiers: vec![
                    LocatorTier {
                        level: TierLevel::Specific,
                        strategies: vec![LocatorStrategy::new(
                            "confirm-by-id",
                            PatternDescriptor::css("button#btnSalvarLotacao"),
                        )],
                    },
                    LocatorTier {
                        level: TierLevel::Contextual,
                        strategies: vec![LocatorStrategy::new(
                            "confirm-in-footer",
                            PatternDescriptor::css(".modal-footer button"),
                        )
                        .validated(ContextValidator::TextContainsAny {
                            needles: needles(&["salvar", "confirmar"]),
                        })],
                    },
                    LocatorTier {
                        level: TierLevel::Generic,
                        strategies: vec![LocatorStrategy::new("any-button", PatternDescriptor::css("button"))
                            .validated(ContextValidator::TextContainsAny {
                                needles: needles(&["salvar", "confirmar", "gravar"]),
                            })],
                    },
                ],
                expansion: None,
            },
        );

        targets.insert(
            "linksPanel".to_string(),
            TargetSpec {
                tiers: vec![
                    LocatorTier {
                        level: TierLevel::Specific,
                        strategies: vec![LocatorStrategy::new(
                            "panel-by-id",
                            PatternDescriptor::css("#painelLotacoes"),
                        )],
                    },
                    LocatorTier {
                        level: TierLevel::Contextual,
                        strategies: vec![LocatorStrategy::new("any-panel", PatternDescriptor::css("div.panel"))
                            .validated(ContextValidator::TextContainsAny {
                                needles: needles(&["lotacoes", "localizacoes"]),
                            })],
                    },
                    LocatorTier {
                        level: TierLevel::Generic,
                        strategies: vec![LocatorStrategy::new(
                            "panel-by-text",
                            PatternDescriptor::text("Lotações"),
                        )
                        .validated(ContextValidator::MentionsExpected)],
                    },
                ],
                expansion: None,
            },
        );

        Self { targets }
    }

    pub fn get(&self, kind: &str) -> Option<&TargetSpec> {
        self.targets.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    /// 用另一份目录覆盖同名目标
    pub fn merge(&mut self, other: LocatorCatalog) {
        self.targets.extend(other.targets);
    }

    /// 结构校验：每个目标至少有一个策略，同一目标内层级不重复
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        for (kind, spec) in &self.targets {
            if spec.tiers.iter().all(|t| t.strategies.is_empty()) {
                return Err(format!("定位目标 {} 没有任何策略", kind));
            }
            let mut levels: Vec<TierLevel> = spec.tiers.iter().map(|t| t.level).collect();
            levels.sort();
            levels.dedup();
            if levels.len() != spec.tiers.len() {
                return Err(format!("定位目标 {} 的层级重复", kind));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_builtin_catalog_covers_all_targets() {
        let catalog = LocatorCatalog::builtin();
        for kind in ["addButton", "unitSelector", "roleSelector", "confirmButton", "linksPanel"] {
            let spec = catalog.get(kind).unwrap();
            let levels: Vec<TierLevel> = spec.ordered_tiers().iter().map(|t| t.level).collect();
            assert_eq!(
                levels,
                vec![TierLevel::Specific, TierLevel::Contextual, TierLevel::Generic],
                "{}",
                kind
            );
            // 通用层必须带上下文校验
            let generic = spec.ordered_tiers()[2];
            assert!(generic.strategies.iter().all(|s| !s.validator.is_any()), "{}", kind);
        }
        assert!(catalog.get("unitSelector").unwrap().expansion.is_some());
        assert!(catalog.validate().is_ok());
    }

    #[test]
    fn test_catalog_serde_roundtrip_keeps_shape() {
        let catalog = LocatorCatalog::builtin();
        let json = serde_json::to_string_pretty(&catalog).unwrap();
        assert!(json.contains("\"kind\": \"css\""));
        let parsed: LocatorCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, catalog);
    }

    #[test]
    fn test_validator_normalizes_needles() {
        let canon = Canonicalizer::default();
        let ctx = ElementContext {
            text: "Adicionar Lotação".to_string(),
            container_text: "Órgão Julgador:".to_string(),
            attributes: HashMap::from([("data-field".to_string(), "orgao".to_string())]),
        };

        assert!(ContextValidator::TextContainsAny {
            needles: needles(&["lotacao"])
        }
        .accepts(&canon, &ctx, None));
        assert!(ContextValidator::ContainerContainsAny {
            needles: needles(&["ORGAO JULGADOR"])
        }
        .accepts(&canon, &ctx, None));
        assert!(!ContextValidator::ContainerContainsAny {
            needles: needles(&["papel"])
        }
        .accepts(&canon, &ctx, None));
        assert!(ContextValidator::AttributeEquals {
            name: "data-field".to_string(),
            value: "orgao".to_string()
        }
        .accepts(&canon, &ctx, None));
        assert!(ContextValidator::MentionsExpected.accepts(&canon, &ctx, None));
        assert!(ContextValidator::MentionsExpected.accepts(&canon, &ctx, Some("lotação")));
        assert!(!ContextValidator::MentionsExpected.accepts(&canon, &ctx, Some("Vara Cível")));
    }

    #[test]
    fn test_validator_matches_whole_words_only() {
        let canon = Canonicalizer::default();
        let row = |text: &str| ElementContext {
            text: text.to_string(),
            ..Default::default()
        };

        let mentions = |text: &str, expected: &str| {
            ContextValidator::MentionsExpected.accepts(&canon, &row(text), Some(expected))
        };

        // 序号不同的单位不能互相冒充
        assert!(!mentions("11ª Vara Cível", "1ª Vara Cível"));
        assert!(!mentions("2ª Vara Cível", "Vara Cível"));
        assert!(mentions("1ª Vara Cível - Campinas", "1ª Vara Cível"));
        assert!(mentions("Vara Cível de Campinas", "Vara Cível"));

        let partial = ContextValidator::TextContainsAny {
            needles: needles(&["lot"]),
        };
        assert!(!partial.accepts(&canon, &row("Adicionar lotação"), None));
    }

    #[test]
    fn test_duplicate_levels_rejected() {
        let tier = LocatorTier {
            level: TierLevel::Generic,
            strategies: vec![LocatorStrategy::new("b", PatternDescriptor::css("button"))],
        };
        let mut catalog = LocatorCatalog::empty();
        catalog.targets.insert(
            "x".to_string(),
            TargetSpec {
                tiers: vec![tier.clone(), tier],
                expansion: None,
            },
        );
        assert!(catalog.validate().is_err());
    }
}
