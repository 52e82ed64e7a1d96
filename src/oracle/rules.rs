//! 规则决策模型（离线）
//!
//! 不调用任何外部服务：按名称 + 分类配对识别结果与上次快照，
//! 配对且状态字段有差异的发 update_item，未配对的识别结果发 add_item，未被配对的旧物品发 delete_item。
//! 第一轮一次性给出全部动作，看到动作结果后回复摘要结束。

use async_trait::async_trait;
use serde_json::json;

use crate::actions::ActionCatalogue;
use crate::core::OracleError;
use crate::inventory::{Item, ObservedItem};
use crate::oracle::{DecisionOracle, OracleDecision};
use crate::reconcile::{RequestedAction, Transcript};

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedOracle;

impl RuleBasedOracle {
    pub fn new() -> Self {
        Self
    }

    /// 计算一次性动作计划
    pub fn plan(prior: &[Item], observed: &[ObservedItem]) -> Vec<RequestedAction> {
        let mut matched = vec![false; prior.len()];
        let mut actions = Vec::new();
        let mut next_id = {
            let mut n = 0usize;
            move || {
                n += 1;
                format!("rule-{n}")
            }
        };

        for obs in observed {
            let hit = prior
                .iter()
                .enumerate()
                .position(|(i, p)| !matched[i] && p.fields.same_identity(obs));
            match hit {
                Some(i) => {
                    matched[i] = true;
                    let patch = prior[i].fields.state_changes(obs);
                    if !patch.is_empty() {
                        actions.push(RequestedAction::new(
                            next_id(),
                            "update_item",
                            json!({ "item_id": prior[i].id, "item_info": patch }),
                        ));
                    }
                }
                None => actions.push(RequestedAction::new(
                    next_id(),
                    "add_item",
                    json!({ "item_info": obs }),
                )),
            }
        }

        for (item, _) in prior.iter().zip(&matched).filter(|(_, m)| !**m) {
            actions.push(RequestedAction::new(
                next_id(),
                "delete_item",
                json!({ "item_id": item.id }),
            ));
        }
        actions
    }
}

#[async_trait]
impl DecisionOracle for RuleBasedOracle {
    async fn decide(
        &self,
        transcript: &Transcript,
        _catalogue: &ActionCatalogue,
    ) -> Result<OracleDecision, OracleError> {
        let seed = transcript
            .seed()
            .ok_or_else(|| OracleError::Config("transcript has no seed turn".to_string()))?;

        if transcript.action_results() > 0 {
            return Ok(OracleDecision::Reply(format!(
                "Applied {} change(s) by name/category matching.",
                transcript.action_results()
            )));
        }

        let actions = Self::plan(&seed.prior, &seed.observed);
        if actions.is_empty() {
            return Ok(OracleDecision::Reply(format!(
                "All {} observed item(s) match the inventory; nothing to change.",
                seed.observed.len()
            )));
        }
        Ok(OracleDecision::actions(actions))
    }
}
