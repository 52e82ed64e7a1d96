//! 错误类型与轮次恢复决策
//!
//! 存储、动作、决策模型三层各有错误枚举；RecoveryEngine 据此决定回灌给模型继续，还是结束本次对账。

use serde::Serialize;
use thiserror::Error;

/// 库存存储错误
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// 连接不可用（锁中毒、后台任务崩溃等），视为存储整体不可达
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out: {0}")]
    Timeout(&'static str),

    /// 持久化前校验失败（name / image_url 为空等）
    #[error("Invalid item: {0}")]
    InvalidItem(String),
}

impl InventoryError {
    /// 存储整体不可达：对账应停止继续变更
    pub fn is_unreachable(&self) -> bool {
        matches!(self, InventoryError::Unavailable(_) | InventoryError::Timeout(_))
    }
}

/// 单个动作执行错误；除不可达外均作为工具结果回灌给模型
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Schema error in {action}: {reason}")]
    Schema { action: String, reason: String },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Store error: {0}")]
    Store(#[from] InventoryError),

    #[error("Action timeout: {0}")]
    Timeout(String),
}

impl ActionError {
    pub fn schema(action: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionError::Schema {
            action: action.into(),
            reason: reason.into(),
        }
    }

    /// 回灌到对话中的错误类别名
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Schema { .. } => "schema_error",
            ActionError::UnknownAction(_) => "unknown_action_error",
            ActionError::Store(_) => "store_error",
            ActionError::Timeout(_) => "timeout_error",
        }
    }
}

/// 决策模型调用错误（传输、超时、空响应、工具调用格式错误）
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle transport error: {0}")]
    Transport(String),

    #[error("Oracle request timed out after {0}s")]
    Timeout(u64),

    #[error("Oracle returned an empty response")]
    EmptyResponse,

    #[error("Malformed tool call: {0}")]
    MalformedToolCall(String),

    #[error("Oracle config error: {0}")]
    Config(String),
}

/// 识别模型调用错误
#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("Vision transport error: {0}")]
    Transport(String),

    #[error("Vision request timed out after {0}s")]
    Timeout(u64),

    /// 响应不是 { "items": [...] } 形式的 JSON
    #[error("Malformed recognition result: {0}")]
    Malformed(String),

    #[error("Vision config error: {0}")]
    Config(String),
}

/// 对账入口只向直接调用方返回契约错误；循环内部的失败都进摘要
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid reconcile input: {0}")]
    InvalidInput(String),
}

/// 运行时入口（CLI / 上层服务）汇总的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error(transparent)]
    Store(#[from] InventoryError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// 对账结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// 模型不再请求动作
    OracleFinished,
    /// 达到轮数上限，对账不完整
    BudgetExhausted,
    /// 模型调用失败或存储不可达
    OracleError,
    /// 调用方在轮次之间取消
    Cancelled,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::OracleFinished => "oracle_finished",
            TerminationReason::BudgetExhausted => "budget_exhausted",
            TerminationReason::OracleError => "oracle_error",
            TerminationReason::Cancelled => "cancelled",
        }
    }
}

/// 恢复引擎对一次失败给出的处理方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundRecovery {
    /// 把错误作为工具结果写回对话，继续本批次下一个动作
    FeedBack,
    /// 结束本次对账
    Terminate(TerminationReason),
}
