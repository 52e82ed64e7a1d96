//! 对账摘要

use serde::Serialize;

use crate::core::TerminationReason;
use crate::inventory::ItemId;
use crate::reconcile::{RequestedAction, Transcript};

/// 未被删除也未被更新的旧物品及保留理由
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetainedItem {
    pub id: ItemId,
    pub reason: String,
}

/// 一次对账的结果：变更 id、未变更数、结束原因与完整对话
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub added: Vec<ItemId>,
    pub updated: Vec<ItemId>,
    pub deleted: Vec<ItemId>,
    /// 模型正常结束时，未被任何新增/更新消耗的识别结果数
    pub unchanged_count: usize,
    /// 对账未正常结束时，尚未被处理的识别结果数（此时 unchanged_count 为 0）
    pub unaccounted_count: usize,
    /// 执行结果未知的变更动作（存储超时或不可达），可能已经落库
    pub indeterminate: Vec<RequestedAction>,
    /// 旧快照中既未更新也未删除的物品（仅当它们不在本次识别中时才需要理由）
    pub retained: Vec<RetainedItem>,
    pub terminated_reason: TerminationReason,
    pub rounds: usize,
    /// 动作失败与模型错误的文字记录
    pub errors: Vec<String>,
    pub final_reply: Option<String>,
    pub transcript: Transcript,
}

impl ReconciliationSummary {
    /// 模型正常结束才算完整；轮数耗尽、出错或取消都要告知调用方
    pub fn is_complete(&self) -> bool {
        self.terminated_reason == TerminationReason::OracleFinished
    }

    pub fn changed(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    /// 一行文字摘要（CLI 与日志用）
    pub fn headline(&self) -> String {
        format!(
            "{}: added={} updated={} deleted={} unchanged={} unaccounted={} indeterminate={} retained={} rounds={}",
            self.terminated_reason.as_str(),
            self.added.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged_count,
            self.unaccounted_count,
            self.indeterminate.len(),
            self.retained.len(),
            self.rounds
        )
    }
}
