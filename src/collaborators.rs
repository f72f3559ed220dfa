// 外部协作方接口
//
// 宿主自动化层提供三个窄接口：
// - ScanCollaborator: 枚举当前可见的 单位/角色 关联
// - QueryCollaborator: 定位并最小化地操作屏幕控件
// - HistoryCollaborator: 可选的历史结果持久化（只写不读）

#![allow(async_fn_in_trait)]

use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resolver::PatternDescriptor;
use crate::verify::LinkRecord;

/// 扫描协作方
pub trait ScanCollaborator {
    /// 屏幕元素引用（只借用，不拥有）
    type SourceRef: Clone + Debug;

    /// 列出当前已关联的单位及角色
    async fn list_candidates(&self) -> anyhow::Result<Vec<LinkRecord<Self::SourceRef>>>;
}

/// 控件操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    /// 展开折叠面板
    Expand,
    Focus,
}

/// 元素上下文（用于校验匹配是否属于预期的单位/字段）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementContext {
    /// 元素自身文本
    pub text: String,
    /// 所在容器的文本（表单行、面板标题等）
    pub container_text: String,
    /// 元素属性
    pub attributes: HashMap<String, String>,
}

/// 查询协作方
pub trait QueryCollaborator {
    type Handle: Clone + Debug;

    /// 按模式查询元素
    async fn query(&self, pattern: &PatternDescriptor) -> anyhow::Result<Vec<Self::Handle>>;

    /// 在超时内判断元素是否可见
    async fn is_visible(&self, handle: &Self::Handle, timeout: Duration) -> bool;

    /// 读取元素文本
    async fn text(&self, handle: &Self::Handle) -> anyhow::Result<String>;

    /// 对元素执行操作
    async fn act(&self, handle: &Self::Handle, action: ActionKind) -> anyhow::Result<()>;

    /// 提取元素上下文
    ///
    /// 默认只取元素文本，宿主可覆盖以提供容器文本和属性
    async fn context(&self, handle: &Self::Handle) -> anyhow::Result<ElementContext> {
        Ok(ElementContext {
            text: self.text(handle).await?,
            ..Default::default()
        })
    }
}

/// 历史结果持久化（触发即忘，可被多个会话并发调用）
pub trait HistoryCollaborator: Send + Sync {
    fn record(&self, entry: &crate::history::HistoryEntry) -> anyhow::Result<()>;
}
