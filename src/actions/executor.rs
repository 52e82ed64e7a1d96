//! 动作执行器
//!
//! 对账循环修改库存的唯一通道：解析并校验动作，在超时内分派到 InventoryStore，
//! 每个变更动作至多一次存储写入；每次调用输出结构化审计日志（JSON）。
//! 按设备划分的对账中，其他设备的物品对 fetch / update / delete 均表现为不存在。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::actions::{Action, ActionOutcome};
use crate::core::{ActionError, InventoryError};
use crate::inventory::{InventoryStore, Item, ItemId};

/// 动作执行器：持有存储与单动作超时
pub struct ActionExecutor {
    store: Arc<dyn InventoryStore>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(store: Arc<dyn InventoryStore>, timeout_secs: u64) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn store(&self) -> &Arc<dyn InventoryStore> {
        &self.store
    }

    /// 按名称与原始参数执行；device_id 为本次对账的设备范围。输出 JSON 审计日志
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        device_id: Option<&str>,
    ) -> Result<ActionOutcome, ActionError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = match Action::parse(name, args) {
            Ok(action) => self.apply(action.scoped_to(device_id), device_id).await,
            Err(e) => Err(e),
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(_) => (true, "ok"),
            Err(e) => (false, e.kind()),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "action_audit",
            "action": name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "action");

        result
    }

    /// 执行已校验的动作，施加超时；scope 为本次对账的设备
    pub async fn apply(
        &self,
        action: Action,
        scope: Option<&str>,
    ) -> Result<ActionOutcome, ActionError> {
        let name = action.kind().name();
        match timeout(self.timeout, self.dispatch(action, scope)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout(name.to_string())),
        }
    }

    async fn dispatch(
        &self,
        action: Action,
        scope: Option<&str>,
    ) -> Result<ActionOutcome, ActionError> {
        let outcome = match action {
            Action::ListItems { device_id } => {
                ActionOutcome::Items(self.store.list(device_id.as_deref()).await?)
            }
            Action::FetchItemImage { item_id } => ActionOutcome::Image {
                item_id,
                image_url: self
                    .store
                    .get(item_id)
                    .await?
                    .filter(|item| in_scope(item, scope))
                    .map(|item| item.fields.image_url),
            },
            Action::AddItem(fields) => ActionOutcome::Added(self.store.insert(fields).await?.id),
            Action::UpdateItem { item_id, patch } => {
                let found = if self.owns(item_id, scope).await? {
                    self.store.update(item_id, patch).await?.is_some()
                } else {
                    false
                };
                ActionOutcome::Updated { item_id, found }
            }
            Action::DeleteItem { item_id } => ActionOutcome::Deleted {
                item_id,
                success: self.owns(item_id, scope).await? && self.store.delete(item_id).await?,
            },
        };
        Ok(outcome)
    }

    async fn owns(&self, item_id: ItemId, scope: Option<&str>) -> Result<bool, InventoryError> {
        if scope.is_none() {
            return Ok(true);
        }
        Ok(self
            .store
            .get(item_id)
            .await?
            .is_some_and(|item| in_scope(&item, scope)))
    }
}

fn in_scope(item: &Item, scope: Option<&str>) -> bool {
    match scope {
        Some(device) => item.fields.device_id.as_deref() == Some(device),
        None => true,
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
