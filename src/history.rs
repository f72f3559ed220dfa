// 校验历史记录
//
// 每个单元的校验结论以 JSON Lines 追加写入，供事后审计。
// 只写不读；多个并行会话可共享同一个存储。

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::HistoryCollaborator;
use crate::error::LinkError;
use crate::verify::{LinkState, VerificationResult};

/// 单元处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    /// 已关联且角色一致，跳过
    AlreadyCorrect,
    /// 已关联但角色不同
    RoleMismatch,
    /// 未关联，需要关联
    ToLink,
    /// 扫描失败，按未关联放行
    ScanFailed,
    /// 校验失败（歧义、超时等）
    Failed,
}

impl HistoryOutcome {
    pub fn from_result(result: &VerificationResult) -> Self {
        if result.role_matches {
            HistoryOutcome::AlreadyCorrect
        } else if result.already_linked {
            HistoryOutcome::RoleMismatch
        } else if result.state == LinkState::ScanError {
            HistoryOutcome::ScanFailed
        } else {
            HistoryOutcome::ToLink
        }
    }
}

/// 一条历史记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub session_id: String,
    pub unit: String,
    pub role: String,
    pub outcome: HistoryOutcome,
    pub reason: String,
    pub timestamp_ms: u64,
}

impl HistoryEntry {
    fn new(session_id: &str, unit: &str, role: &str, outcome: HistoryOutcome, reason: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            unit: unit.to_string(),
            role: role.to_string(),
            outcome,
            reason,
            timestamp_ms: now_ms(),
        }
    }

    pub fn from_result(session_id: &str, unit: &str, role: &str, result: &VerificationResult) -> Self {
        Self::new(
            session_id,
            unit,
            role,
            HistoryOutcome::from_result(result),
            result.reason.clone(),
        )
    }

    pub fn from_error(session_id: &str, unit: &str, role: &str, error: &LinkError) -> Self {
        Self::failed(session_id, unit, role, error.to_string())
    }

    pub fn failed(session_id: &str, unit: &str, role: &str, reason: String) -> Self {
        Self::new(session_id, unit, role, HistoryOutcome::Failed, reason)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// JSON Lines 历史存储
pub struct JsonlHistory {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlHistory {
    /// 打开（不存在则创建）历史文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::info!("history: 历史记录写入 {:?}", path);
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// 默认位置：配置目录下的 history.jsonl
    pub fn open_default() -> Result<Self> {
        let config_dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法获取配置目录"))?;
        Self::open(config_dir.join("UnitLinker").join("history.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryCollaborator for JsonlHistory {
    fn record(&self, entry: &HistoryEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        // 整行一次写入，锁保证并发追加不交错
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
