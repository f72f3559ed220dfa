// src/config.rs

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::canon::{Canonicalizer, DEFAULT_MEMO_CAPACITY, DEFAULT_MIN_TOKEN_LEN};
use crate::error::LinkError;
use crate::resolver::{LocatorCatalog, RetryConfig, TimeoutCategory, TimeoutConfig, TimeoutPolicy};
use crate::similarity::{
    EquivalenceDecider, MatchThresholds, SimilarityScorer, DEFAULT_AMBIGUITY_MARGIN,
};

// ============================================================================
// 全局配置操作锁
// ============================================================================

lazy_static::lazy_static! {
    /// 全局配置操作锁
    ///
    /// 保护 load->modify->save 序列，防止并发修改导致的数据丢失
    pub static ref CONFIG_LOCK: Mutex<()> = Mutex::new(());
}

fn default_ambiguity_margin() -> f64 {
    DEFAULT_AMBIGUITY_MARGIN
}

fn default_token_min_length() -> usize {
    DEFAULT_MIN_TOKEN_LEN
}

fn default_memo_capacity() -> usize {
    DEFAULT_MEMO_CAPACITY
}

fn default_role_matching() -> MatchThresholds {
    MatchThresholds::for_roles()
}

// ============================================================================
// 解析配置
// ============================================================================

/// 单位解析与校验配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// 单位名匹配阈值
    #[serde(default)]
    pub unit_matching: MatchThresholds,
    /// 角色匹配阈值（默认允许前缀包含）
    #[serde(default = "default_role_matching")]
    pub role_matching: MatchThresholds,
    /// 歧义边际：次优分 ≥ 最优分 × margin 即视为歧义
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f64,
    #[serde(default = "default_token_min_length")]
    pub token_min_length: usize,
    /// 规范化记忆表容量
    #[serde(default = "default_memo_capacity")]
    pub memo_capacity: usize,
    /// 额外缩写（覆盖内置表；含空格的键按短语处理）
    #[serde(default)]
    pub extra_abbreviations: BTreeMap<String, String>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// 定位目录（与内置目录合并，同名目标以配置为准）
    #[serde(default)]
    pub locators: LocatorCatalog,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionConfig {
    pub fn new() -> Self {
        Self {
            unit_matching: MatchThresholds::default(),
            role_matching: MatchThresholds::for_roles(),
            ambiguity_margin: DEFAULT_AMBIGUITY_MARGIN,
            token_min_length: DEFAULT_MIN_TOKEN_LEN,
            memo_capacity: DEFAULT_MEMO_CAPACITY,
            extra_abbreviations: BTreeMap::new(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            locators: LocatorCatalog::builtin(),
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法获取配置目录"))?;
        let app_dir = config_dir.join("UnitLinker");
        std::fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("resolution.json"))
    }

    /// 从默认路径加载，返回 (配置, 文件是否存在)
    pub fn load() -> Result<(Self, bool)> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// 从指定路径加载
    ///
    /// 整体解析失败时逐段恢复能解析的部分，其余字段取默认值
    pub fn load_from(path: &Path) -> Result<(Self, bool)> {
        tracing::info!("尝试从以下路径加载配置: {:?}", path);

        if !path.exists() {
            tracing::warn!("配置文件不存在，返回默认配置");
            return Ok((Self::new(), false));
        }

        let content = std::fs::read_to_string(path)?;
        let v: serde_json::Value = serde_json::from_str(&content)?;

        let mut config: ResolutionConfig = match serde_json::from_value(v.clone()) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("直接解析配置失败，尝试逐段恢复: {}", e);
                Self::recover(&v)
            }
        };

        // 配置中的定位目标覆盖内置目标，未提及的保留内置定义
        let mut catalog = LocatorCatalog::builtin();
        catalog.merge(std::mem::replace(&mut config.locators, LocatorCatalog::empty()));
        config.locators = catalog;

        if let Err(e) = config.validate() {
            tracing::warn!("配置校验失败，回退到默认配置: {}", e);
            return Ok((Self::new(), true));
        }

        tracing::info!("配置加载成功");
        Ok((config, true))
    }

    fn recover(v: &serde_json::Value) -> Self {
        let mut cfg = Self::new();

        macro_rules! restore {
            ($field:ident) => {
                if let Some(section) = v.get(stringify!($field)) {
                    match serde_json::from_value(section.clone()) {
                        Ok(value) => {
                            tracing::info!("成功恢复 {}", stringify!($field));
                            cfg.$field = value;
                        }
                        Err(e) => tracing::warn!("无法恢复 {}: {}", stringify!($field), e),
                    }
                }
            };
        }

        restore!(unit_matching);
        restore!(role_matching);
        restore!(ambiguity_margin);
        restore!(token_min_length);
        restore!(memo_capacity);
        restore!(extra_abbreviations);
        restore!(timeouts);
        restore!(retry);
        restore!(locators);
        cfg
    }

    /// 保存到默认路径
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    /// 原子写入：先写临时文件，再替换目标文件
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tracing::info!("保存配置到: {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("json.tmp");
        let backup_path = path.with_extension("json.bak");

        std::fs::write(&temp_path, &content).map_err(|e| {
            tracing::error!("写入临时文件失败: {}", e);
            e
        })?;

        // 目标存在时先备份，替换失败可从 .bak 恢复
        if path.exists() {
            if backup_path.exists() {
                let _ = std::fs::remove_file(&backup_path);
            }
            std::fs::rename(path, &backup_path).map_err(|e| {
                tracing::error!("备份旧配置文件失败: {}", e);
                e
            })?;
        }

        match std::fs::rename(&temp_path, path) {
            Ok(_) => {
                let _ = std::fs::remove_file(&backup_path);
                tracing::info!("配置保存成功");
                Ok(())
            }
            Err(e) => {
                tracing::error!("重命名临时文件失败: {}", e);
                if backup_path.exists() {
                    if let Err(restore_err) = std::fs::rename(&backup_path, path) {
                        tracing::error!("恢复备份失败: {}", restore_err);
                    } else {
                        tracing::info!("已从备份恢复配置");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// 在配置锁保护下执行 load → modify → save
    pub fn update_at<F>(path: &Path, modify: F) -> Result<Self>
    where
        F: FnOnce(&mut ResolutionConfig),
    {
        let _guard = CONFIG_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (mut config, _) = Self::load_from(path)?;
        modify(&mut config);
        config.validate()?;
        config.save_to(path)?;
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> crate::error::Result<()> {
        self.unit_matching
            .validate()
            .map_err(|e| LinkError::Config(format!("unit_matching: {}", e)))?;
        self.role_matching
            .validate()
            .map_err(|e| LinkError::Config(format!("role_matching: {}", e)))?;

        if !(0.0..=1.0).contains(&self.ambiguity_margin) {
            return Err(LinkError::Config(format!(
                "ambiguity_margin 必须在 [0, 1] 内，当前为 {}",
                self.ambiguity_margin
            )));
        }
        if self.token_min_length == 0 {
            return Err(LinkError::Config("token_min_length 不能为 0".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(LinkError::Config("retry.max_attempts 不能为 0".to_string()));
        }
        if self.retry.backoff < 1.0 || self.timeouts.growth_factor < 1.0 {
            return Err(LinkError::Config(
                "retry.backoff 与 timeouts.growth_factor 不能小于 1".to_string(),
            ));
        }
        self.locators.validate().map_err(LinkError::Config)?;
        Ok(())
    }

    /// 扫描超时，随环境档位缩放
    pub fn scan_timeout(&self) -> Duration {
        self.build_policy().adaptive_timeout(TimeoutCategory::Scan, 1.0)
    }

    /// 按配置构造规范化器
    pub fn build_canonicalizer(&self) -> Arc<Canonicalizer> {
        Arc::new(Canonicalizer::with_extra_abbreviations(
            &self.extra_abbreviations,
            self.memo_capacity,
        ))
    }

    /// 按配置构造等价判定器
    pub fn build_decider(&self, canon: Arc<Canonicalizer>) -> Arc<EquivalenceDecider> {
        let scorer = SimilarityScorer::with_min_token_len(canon, self.token_min_length);
        Arc::new(EquivalenceDecider::with_margin(scorer, self.ambiguity_margin))
    }

    pub fn build_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(self.timeouts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{EnvironmentProfile, TargetSpec};

    #[test]
    fn test_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (config, existed) = ResolutionConfig::load_from(&dir.path().join("none.json")).unwrap();
        assert!(!existed);
        assert_eq!(config, ResolutionConfig::default());
        assert!(config.role_matching.allow_prefix_containment);
        assert!(!config.unit_matching.allow_prefix_containment);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolution.json");

        let mut config = ResolutionConfig::new();
        config.timeouts.profile = EnvironmentProfile::Slow;
        config.extra_abbreviations.insert("trib".to_string(), "tribunal".to_string());
        config.save_to(&path).unwrap();
        // 第二次保存走备份替换路径
        config.save_to(&path).unwrap();

        let (loaded, existed) = ResolutionConfig::load_from(&path).unwrap();
        assert!(existed);
        assert_eq!(loaded, config);
        assert!(!path.with_extension("json.tmp").exists());
        assert!(!path.with_extension("json.bak").exists());
    }

    #[test]
    fn test_partial_file_uses_defaults_and_builtin_locators() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolution.json");
        std::fs::write(
            &path,
            r#"{ "ambiguity_margin": 0.9, "retry": { "max_attempts": 5 }, "locators": {} }"#,
        )
        .unwrap();

        let (config, _) = ResolutionConfig::load_from(&path).unwrap();
        assert_eq!(config.ambiguity_margin, 0.9);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!(config.locators.get("addButton").is_some());
    }

    #[test]
    fn test_malformed_section_is_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolution.json");
        std::fs::write(
            &path,
            r#"{ "memo_capacity": "lots", "timeouts": { "profile": "fast" } }"#,
        )
        .unwrap();

        let (config, existed) = ResolutionConfig::load_from(&path).unwrap();
        assert!(existed);
        assert_eq!(config.memo_capacity, DEFAULT_MEMO_CAPACITY);
        assert_eq!(config.timeouts.profile, EnvironmentProfile::Fast);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ResolutionConfig::new();
        config.unit_matching.threshold = 1.5;
        assert!(matches!(config.validate(), Err(LinkError::Config(_))));

        let mut config = ResolutionConfig::new();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ResolutionConfig::new();
        config.locators.targets.insert(
            "empty".to_string(),
            TargetSpec {
                tiers: vec![],
                expansion: None,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_update_at_persists_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolution.json");

        ResolutionConfig::update_at(&path, |c| c.timeouts.scan_ms = 2500).unwrap();
        let (loaded, _) = ResolutionConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scan_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_scan_timeout_follows_profile() {
        let mut config = ResolutionConfig::new();
        assert_eq!(config.scan_timeout(), Duration::from_millis(10_000));

        config.timeouts.profile = EnvironmentProfile::Slow;
        assert_eq!(config.scan_timeout(), Duration::from_millis(20_000));
    }
}
