//! 错误恢复引擎
//!
//! 根据 ActionError / OracleError 返回 RoundRecovery，供对账循环决定回灌重试还是结束本次运行。

use crate::core::{ActionError, OracleError, RoundRecovery, TerminationReason};

/// 把错误映射为循环可执行的处理方式
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 动作失败：参数/未知动作/普通存储错误回灌给模型；存储不可达或超时（结果未知）则停止变更
    pub fn on_action_error(&self, err: &ActionError) -> RoundRecovery {
        match err {
            ActionError::Schema { .. } | ActionError::UnknownAction(_) => RoundRecovery::FeedBack,
            ActionError::Store(e) if e.is_unreachable() => {
                RoundRecovery::Terminate(TerminationReason::OracleError)
            }
            ActionError::Store(_) => RoundRecovery::FeedBack,
            ActionError::Timeout(_) => RoundRecovery::Terminate(TerminationReason::OracleError),
        }
    }

    /// 模型侧失败一律优雅结束本轮，不重试
    pub fn on_oracle_error(&self, err: &OracleError) -> RoundRecovery {
        match err {
            OracleError::Transport(_)
            | OracleError::Timeout(_)
            | OracleError::EmptyResponse
            | OracleError::MalformedToolCall(_)
            | OracleError::Config(_) => RoundRecovery::Terminate(TerminationReason::OracleError),
        }
    }
}
