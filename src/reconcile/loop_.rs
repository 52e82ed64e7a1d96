//! 对账主循环
//!
//! Seed -> 询问模型 -> 按序执行请求的动作 -> 结果回灌 -> 下一轮；模型不再请求动作或轮数耗尽时结束。
//! 循环内的任何失败都记录进摘要，调用方总能拿到 ReconciliationSummary；只有入参不合法才返回 Err。
//! 可选 event_tx：向前端推送轮次、动作执行与结束事件。

use std::collections::HashSet;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::actions::{error_payload, ActionCatalogue, ActionExecutor, ActionKind, ActionOutcome};
use crate::config::ReconcileSection;
use crate::core::{ActionError, RecoveryEngine, ReconcileError, RoundRecovery, TerminationReason};
use crate::inventory::{Item, ItemId, ObservedItem};
use crate::oracle::{DecisionOracle, OracleDecision};
use crate::reconcile::{
    reconcile_instructions, ReconcileEvent, ReconciliationSummary, RequestedAction, RetainedItem,
    SeedTurn, Transcript, Turn,
};

/// 事件中结果预览的最大字符数
const PREVIEW_CHARS: usize = 200;

/// 轮数与每轮动作数上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileLimits {
    pub max_rounds: usize,
    pub max_actions_per_round: usize,
}

impl ReconcileLimits {
    pub fn new(max_rounds: usize, max_actions_per_round: usize) -> Self {
        Self {
            max_rounds: max_rounds.max(1),
            max_actions_per_round: max_actions_per_round.max(1),
        }
    }

    pub fn from_config(cfg: &ReconcileSection) -> Self {
        Self::new(cfg.max_rounds, cfg.max_actions_per_round)
    }
}

impl Default for ReconcileLimits {
    fn default() -> Self {
        Self::from_config(&ReconcileSection::default())
    }
}

/// 一次对账所需的组件
pub struct ReconcileSession<'a> {
    pub oracle: &'a dyn DecisionOracle,
    pub executor: &'a ActionExecutor,
    pub recovery: &'a RecoveryEngine,
    pub catalogue: &'a ActionCatalogue,
    pub limits: ReconcileLimits,
    /// 仅在轮次之间生效，不会打断正在执行的动作批次
    pub cancel_token: CancellationToken,
    pub event_tx: Option<&'a UnboundedSender<ReconcileEvent>>,
    /// 本次对账的设备；None 表示不按设备划分
    pub device_id: Option<&'a str>,
}

impl<'a> ReconcileSession<'a> {
    pub fn new(
        oracle: &'a dyn DecisionOracle,
        executor: &'a ActionExecutor,
        recovery: &'a RecoveryEngine,
        catalogue: &'a ActionCatalogue,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            oracle,
            executor,
            recovery,
            catalogue,
            limits: ReconcileLimits::default(),
            cancel_token,
            event_tx: None,
            device_id: None,
        }
    }

    pub fn with_limits(mut self, limits: ReconcileLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<ReconcileEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_device(mut self, device_id: Option<&'a str>) -> Self {
        self.device_id = device_id;
        self
    }

    fn send_event(&self, ev: ReconcileEvent) {
        if let Some(tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }
}

/// 本次运行中成功执行的变更
#[derive(Debug, Default)]
struct Applied {
    added: Vec<ItemId>,
    updated: Vec<ItemId>,
    deleted: Vec<ItemId>,
    /// 因超时或存储不可达而结果未知的变更
    indeterminate: Vec<RequestedAction>,
}

impl Applied {
    fn record(&mut self, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Added(id) => self.added.push(*id),
            ActionOutcome::Updated {
                item_id,
                found: true,
            } if !self.updated.contains(item_id) && !self.added.contains(item_id) => {
                self.updated.push(*item_id)
            }
            ActionOutcome::Deleted {
                item_id,
                success: true,
            } => {
                self.added.retain(|id| id != item_id);
                self.updated.retain(|id| id != item_id);
                self.deleted.push(*item_id);
            }
            _ => {}
        }
    }
}

fn preview(text: &str) -> String {
    let mut out: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}

fn validate_inputs(prior: &[Item], observed: &[ObservedItem]) -> Result<(), ReconcileError> {
    let mut ids = HashSet::new();
    for item in prior {
        if !ids.insert(item.id) {
            return Err(ReconcileError::InvalidInput(format!(
                "duplicate prior item id {}",
                item.id
            )));
        }
        item.fields.validate().map_err(|reason| {
            ReconcileError::InvalidInput(format!("prior item {}: {}", item.id, reason))
        })?;
    }
    for (i, obs) in observed.iter().enumerate() {
        obs.validate().map_err(|reason| {
            ReconcileError::InvalidInput(format!("observed item #{i}: {reason}"))
        })?;
    }
    Ok(())
}

fn seed_turn(device_id: Option<&str>, prior: Vec<Item>, observed: Vec<ObservedItem>) -> SeedTurn {
    SeedTurn {
        instructions: reconcile_instructions(observed.len()),
        device_id: device_id.map(str::to_string),
        prior,
        observed,
    }
}

/// 旧快照中没有同名同类识别结果、且本次既未删除也未更新的物品；理由取模型最终回复
fn retained_items(
    prior: &[Item],
    observed: &[ObservedItem],
    applied: &Applied,
    final_reply: Option<&str>,
    reason: TerminationReason,
) -> Vec<RetainedItem> {
    prior
        .iter()
        .filter(|p| !observed.iter().any(|o| p.fields.same_identity(o)))
        .filter(|p| !applied.deleted.contains(&p.id) && !applied.updated.contains(&p.id))
        .map(|p| RetainedItem {
            id: p.id,
            reason: match final_reply {
                Some(reply) => reply.to_string(),
                None => format!("no delete requested before the run ended ({})", reason.as_str()),
            },
        })
        .collect()
}

/// 未被新增/更新消耗的识别结果：模型正常结束时视为未变化，否则算作未处理
fn observation_counts(
    observed: usize,
    applied: &Applied,
    reason: TerminationReason,
) -> (usize, usize) {
    let remainder = observed.saturating_sub(applied.added.len() + applied.updated.len());
    match reason {
        TerminationReason::OracleFinished => (remainder, 0),
        _ => (0, remainder),
    }
}

/// 执行一次对账
///
/// prior 为对账前的库存快照，observed 为本次识别结果。除入参校验失败外总是返回摘要。
pub async fn reconcile(
    session: &ReconcileSession<'_>,
    prior: Vec<Item>,
    observed: Vec<ObservedItem>,
) -> Result<ReconciliationSummary, ReconcileError> {
    validate_inputs(&prior, &observed)?;

    let limits = session.limits;
    let mut transcript = Transcript::new(seed_turn(session.device_id, prior, observed));
    let mut applied = Applied::default();
    let mut errors: Vec<String> = Vec::new();
    let mut final_reply: Option<String> = None;
    let mut round = 0usize;

    tracing::info!(
        device = session.device_id.unwrap_or("-"),
        prior = transcript.seed().map(|s| s.prior.len()).unwrap_or_default(),
        observed = transcript.seed().map(|s| s.observed.len()).unwrap_or_default(),
        "reconcile started"
    );

    let reason = loop {
        if session.cancel_token.is_cancelled() {
            break TerminationReason::Cancelled;
        }
        if round >= limits.max_rounds {
            tracing::warn!(max_rounds = limits.max_rounds, "reconcile round budget exhausted");
            break TerminationReason::BudgetExhausted;
        }
        round += 1;
        session.send_event(ReconcileEvent::RoundStarted {
            round,
            max_rounds: limits.max_rounds,
        });

        let decided = tokio::select! {
            _ = session.cancel_token.cancelled() => None,
            r = session.oracle.decide(&transcript, session.catalogue) => Some(r),
        };
        let Some(decided) = decided else {
            break TerminationReason::Cancelled;
        };

        let (content, actions) = match decided {
            Ok(OracleDecision::Reply(text)) => (Some(text), Vec::new()),
            Ok(OracleDecision::Actions { content, actions }) => (content, actions),
            Err(e) => {
                tracing::warn!(round, error = %e, "oracle call failed");
                errors.push(format!("round {round}: oracle: {e}"));
                match session.recovery.on_oracle_error(&e) {
                    RoundRecovery::Terminate(reason) => break reason,
                    RoundRecovery::FeedBack => continue,
                }
            }
        };

        transcript.push(Turn::OracleReply {
            content: content.clone(),
            actions: actions.clone(),
        });

        if actions.is_empty() {
            if let Some(text) = &content {
                session.send_event(ReconcileEvent::OracleReply {
                    preview: preview(text),
                });
            }
            tracing::info!(round, "oracle finished without further actions");
            final_reply = content;
            break TerminationReason::OracleFinished;
        }

        tracing::info!(round, requested = actions.len(), "executing requested actions");
        if let Some(reason) = execute_batch(
            session,
            round,
            actions,
            &mut transcript,
            &mut applied,
            &mut errors,
        )
        .await
        {
            break reason;
        }
    };

    let (prior, observed) = match transcript.seed() {
        Some(seed) => (seed.prior.as_slice(), seed.observed.as_slice()),
        None => (&[][..], &[][..]),
    };
    let retained = retained_items(prior, observed, &applied, final_reply.as_deref(), reason);
    let (unchanged_count, unaccounted_count) = observation_counts(observed.len(), &applied, reason);

    let (prompt_tokens, completion_tokens, _) = session.oracle.token_usage();
    tracing::info!(
        reason = reason.as_str(),
        rounds = round,
        added = applied.added.len(),
        updated = applied.updated.len(),
        deleted = applied.deleted.len(),
        unchanged = unchanged_count,
        unaccounted = unaccounted_count,
        indeterminate = applied.indeterminate.len(),
        errors = errors.len(),
        prompt_tokens,
        completion_tokens,
        "reconcile finished"
    );
    session.send_event(ReconcileEvent::Finished {
        reason: reason.as_str().to_string(),
    });

    Ok(ReconciliationSummary {
        added: applied.added,
        updated: applied.updated,
        deleted: applied.deleted,
        unchanged_count,
        unaccounted_count,
        indeterminate: applied.indeterminate,
        retained,
        terminated_reason: reason,
        rounds: round,
        errors,
        final_reply,
        transcript,
    })
}

/// 按序执行一批动作，每个动作一条结果回灌；返回 Some 表示本次对账应结束
async fn execute_batch(
    session: &ReconcileSession<'_>,
    round: usize,
    actions: Vec<RequestedAction>,
    transcript: &mut Transcript,
    applied: &mut Applied,
    errors: &mut Vec<String>,
) -> Option<TerminationReason> {
    let max = session.limits.max_actions_per_round;
    for (index, req) in actions.into_iter().enumerate() {
        let result = if index >= max {
            Err(ActionError::schema(
                req.name.as_str(),
                format!("exceeds max_actions_per_round ({max}); request it again in the next round"),
            ))
        } else {
            session
                .executor
                .execute(&req.name, req.arguments.clone(), session.device_id)
                .await
        };

        match result {
            Ok(outcome) => {
                applied.record(&outcome);
                let payload = outcome.to_payload();
                session.send_event(ReconcileEvent::ActionExecuted {
                    round,
                    action: req.name.clone(),
                    action_id: req.id.clone(),
                    preview: preview(&payload.to_string()),
                });
                transcript.push(Turn::ActionResult {
                    action_id: req.id,
                    action: req.name,
                    ok: true,
                    payload,
                });
            }
            Err(e) => {
                tracing::warn!(round, action = %req.name, error = %e, "action failed");
                errors.push(format!("round {round}: {} ({}): {e}", req.name, req.id));
                session.send_event(ReconcileEvent::ActionFailed {
                    round,
                    action: req.name.clone(),
                    action_id: req.id.clone(),
                    error: e.to_string(),
                });
                let recovery = session.recovery.on_action_error(&e);
                transcript.push(Turn::ActionResult {
                    action_id: req.id.clone(),
                    action: req.name.clone(),
                    ok: false,
                    payload: error_payload(&e),
                });
                if let RoundRecovery::Terminate(reason) = recovery {
                    if ActionKind::from_name(&req.name).is_some_and(|k| k.is_mutation()) {
                        applied.indeterminate.push(req);
                    }
                    return Some(reason);
                }
            }
        }
    }
    None
}

/// 从存储读取本设备的快照后对账；存储不可读时返回 oracle_error 摘要，不执行任何动作
pub async fn reconcile_from_store(
    session: &ReconcileSession<'_>,
    observed: Vec<ObservedItem>,
) -> Result<ReconciliationSummary, ReconcileError> {
    validate_inputs(&[], &observed)?;
    match session.executor.store().list(session.device_id).await {
        Ok(prior) => reconcile(session, prior, observed).await,
        Err(e) => {
            tracing::error!(error = %e, "failed to read inventory snapshot");
            let unaccounted_count = observed.len();
            session.send_event(ReconcileEvent::Finished {
                reason: TerminationReason::OracleError.as_str().to_string(),
            });
            Ok(ReconciliationSummary {
                added: Vec::new(),
                updated: Vec::new(),
                deleted: Vec::new(),
                unchanged_count: 0,
                unaccounted_count,
                indeterminate: Vec::new(),
                retained: Vec::new(),
                terminated_reason: TerminationReason::OracleError,
                rounds: 0,
                errors: vec![format!("snapshot: {e}")],
                final_reply: None,
                transcript: Transcript::new(seed_turn(session.device_id, Vec::new(), observed)),
            })
        }
    }
}
