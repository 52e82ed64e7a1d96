//! 对账过程事件：供前端流式展示轮次、动作执行与结束原因

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcileEvent {
    /// 开始第 round 轮（从 1 计）
    RoundStarted { round: usize, max_rounds: usize },
    /// 动作执行成功（结果预览，避免过长）
    ActionExecuted {
        round: usize,
        action: String,
        action_id: String,
        preview: String,
    },
    /// 动作失败，错误已写回对话
    ActionFailed {
        round: usize,
        action: String,
        action_id: String,
        error: String,
    },
    /// 模型最终回复
    OracleReply { preview: String },
    Finished { reason: String },
}
