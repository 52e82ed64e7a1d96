//! 决策模型抽象
//!
//! 所有后端（OpenAI 兼容 / 规则 / 脚本 Mock）实现 DecisionOracle：给定对话记录与动作目录，
//! 返回最终回复或一批请求的动作。实现只负责把模型输出严格解析成结构化数据，不执行任何动作。

use async_trait::async_trait;

use crate::actions::ActionCatalogue;
use crate::core::OracleError;
use crate::reconcile::{RequestedAction, Transcript};

/// 一轮决策结果
#[derive(Debug, Clone, PartialEq)]
pub enum OracleDecision {
    /// 不再请求动作，对账结束
    Reply(String),
    /// 请求按顺序执行的动作；content 为模型附带的说明文字（可无）
    Actions {
        content: Option<String>,
        actions: Vec<RequestedAction>,
    },
}

impl OracleDecision {
    pub fn actions(actions: Vec<RequestedAction>) -> Self {
        OracleDecision::Actions {
            content: None,
            actions,
        }
    }
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(
        &self,
        transcript: &Transcript,
        catalogue: &ActionCatalogue,
    ) -> Result<OracleDecision, OracleError>;

    /// 累计 token 使用：(prompt_tokens, completion_tokens, total_tokens)，默认 (0, 0, 0)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
