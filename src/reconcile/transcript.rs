//! 对账对话记录
//!
//! 一次对账内只追加不删除：种子指令、模型回复（含请求的动作）、每个动作的结果。
//! 种子保留结构化的库存快照与识别结果，只在发给模型时才渲染为文本。运行结束后随摘要返回，不持久化。

use serde::Serialize;
use serde_json::Value;

use crate::inventory::{Item, ObservedItem};

/// 模型请求的单个动作（未校验的结构化数据）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestedAction {
    /// 模型侧的调用 id，结果回灌时原样带回
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl RequestedAction {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// 种子轮：匹配规则 + 上次库存快照 + 本次识别结果
#[derive(Debug, Clone, Serialize)]
pub struct SeedTurn {
    pub instructions: String,
    pub device_id: Option<String>,
    pub prior: Vec<Item>,
    pub observed: Vec<ObservedItem>,
}

impl SeedTurn {
    /// 渲染为单条用户消息；全部字段无损序列化，识别结果附带 observation_index 便于逐条交代
    pub fn render(&self) -> String {
        let prior = serde_json::to_string_pretty(&self.prior).unwrap_or_else(|_| "[]".to_string());
        let observed: Vec<Value> = self
            .observed
            .iter()
            .enumerate()
            .map(|(i, o)| {
                let mut v = serde_json::to_value(o).unwrap_or(Value::Null);
                if let Value::Object(map) = &mut v {
                    map.insert("observation_index".to_string(), Value::from(i));
                }
                v
            })
            .collect();
        let observed =
            serde_json::to_string_pretty(&observed).unwrap_or_else(|_| "[]".to_string());
        let device = self.device_id.as_deref().unwrap_or("unscoped");
        format!(
            "{}\n\n[Device] {}\n\n[Prior inventory snapshot] ({} items)\n{}\n\n[Observed items from this recognition pass] ({} items)\n{}",
            self.instructions,
            device,
            self.prior.len(),
            prior,
            self.observed.len(),
            observed
        )
    }
}

/// 单条对话
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    Seed(SeedTurn),
    OracleReply {
        content: Option<String>,
        actions: Vec<RequestedAction>,
    },
    ActionResult {
        action_id: String,
        action: String,
        ok: bool,
        payload: Value,
    },
}

/// 只追加的对话记录
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new(seed: SeedTurn) -> Self {
        Self {
            turns: vec![Turn::Seed(seed)],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn seed(&self) -> Option<&SeedTurn> {
        self.turns.iter().find_map(|t| match t {
            Turn::Seed(s) => Some(s),
            _ => None,
        })
    }

    /// 已执行的动作结果条数
    pub fn action_results(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::ActionResult { .. }))
            .count()
    }
}
