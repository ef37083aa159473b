use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::irrigation::IrrigationState;
use crate::net::Weight;

/// 库所 id → token 数，按网中顺序。
pub type MarkingSnapshot = IndexMap<String, Weight>;

/// 状态变化通知。由引擎排队，待产生它们的修改完成后由所有者发布。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngineEvent {
    Fired { transition: String, delayed: bool },
    #[serde(rename_all = "camelCase")]
    Scheduled { transition: String, after_ms: u64 },
    /// 延迟发生时变迁不可发生，该分区的级联就此停止。
    Stalled { transition: String },
    StateChanged,
    Reset { zones: usize },
    TimersCancelled { count: usize },
}

/// 观察者渲染所需内容的只读副本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub revision: u64,
    pub marking: MarkingSnapshot,
    pub enabled: Vec<String>,
    pub state: IrrigationState,
    pub pending_timers: usize,
}
