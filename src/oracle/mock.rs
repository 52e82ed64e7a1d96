//! 脚本化 Mock 决策模型（用于测试，无需 API）
//!
//! 按顺序返回预置的决策；脚本耗尽后回复 "done"。记录每次调用时看到的对话长度，便于断言回灌内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::ActionCatalogue;
use crate::core::OracleError;
use crate::oracle::{DecisionOracle, OracleDecision};
use crate::reconcile::{RequestedAction, Transcript};

#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<OracleDecision, OracleError>>>,
    seen_turns: Mutex<Vec<usize>>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<OracleDecision, OracleError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen_turns: Mutex::new(Vec::new()),
        }
    }

    /// 每轮只请求一个动作的便捷构造
    pub fn one_action_per_round(actions: Vec<(&str, Value)>) -> Self {
        let script = actions
            .into_iter()
            .enumerate()
            .map(|(i, (name, args))| {
                Ok(OracleDecision::actions(vec![RequestedAction::new(
                    format!("call_{i}"),
                    name,
                    args,
                )]))
            })
            .collect();
        Self::new(script)
    }

    /// 每次 decide 时对话记录的条数
    pub fn seen_turns(&self) -> Vec<usize> {
        self.seen_turns
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.seen_turns().len()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(
        &self,
        transcript: &Transcript,
        _catalogue: &ActionCatalogue,
    ) -> Result<OracleDecision, OracleError> {
        if let Ok(mut seen) = self.seen_turns.lock() {
            seen.push(transcript.len());
        }
        let next = self
            .script
            .lock()
            .map_err(|_| OracleError::Transport("mock script poisoned".to_string()))?
            .pop_front();
        next.unwrap_or_else(|| Ok(OracleDecision::Reply("done".to_string())))
    }
}

/// 永远再请求一个 list_items 的 Mock，用于验证轮数上限
#[derive(Debug, Default)]
pub struct EndlessOracle {
    calls: Mutex<usize>,
}

impl EndlessOracle {
    pub fn calls(&self) -> usize {
        self.calls.lock().map(|g| *g).unwrap_or_default()
    }
}

#[async_trait]
impl DecisionOracle for EndlessOracle {
    async fn decide(
        &self,
        _transcript: &Transcript,
        _catalogue: &ActionCatalogue,
    ) -> Result<OracleDecision, OracleError> {
        let n = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|_| OracleError::Transport("mock counter poisoned".to_string()))?;
            *calls += 1;
            *calls
        };
        Ok(OracleDecision::actions(vec![RequestedAction::new(
            format!("call_{n}"),
            "list_items",
            Value::Null,
        )]))
    }
}
