//! Headless 运行时
//!
//! 供 CLI 与上层服务调用的无界面对账流程：
//! create_components 按配置构建存储 / 执行器 / 决策模型，
//! process_observations 在设备锁内对一批识别结果跑对账，
//! process_photo 先识别照片再对账。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::actions::{ActionCatalogue, ActionExecutor};
use crate::config::{AppConfig, ReconcileSection};
use crate::core::{AgentError, DeviceLocks, RecoveryEngine};
use crate::inventory::{InventoryStore, ObservedItem, SqliteInventoryStore};
use crate::oracle::{DecisionOracle, OpenAiOracle, RuleBasedOracle};
use crate::reconcile::{
    reconcile_from_store, ReconcileEvent, ReconcileLimits, ReconcileSession, ReconciliationSummary,
};
use crate::recognize::{prepare_observations, Recognizer};

/// 预构建的对账组件，可在多次运行（多个设备）间共享
pub struct AgentComponents {
    pub store: Arc<dyn InventoryStore>,
    pub executor: ActionExecutor,
    pub recovery: RecoveryEngine,
    pub catalogue: ActionCatalogue,
    pub oracle: Box<dyn DecisionOracle>,
    pub limits: ReconcileLimits,
    /// 同一设备的对账串行执行
    pub locks: DeviceLocks,
}

impl AgentComponents {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        oracle: Box<dyn DecisionOracle>,
        reconcile: &ReconcileSection,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(store.clone(), reconcile.action_timeout_secs),
            store,
            recovery: RecoveryEngine::new(),
            catalogue: ActionCatalogue::standard(),
            oracle,
            limits: ReconcileLimits::from_config(reconcile),
            locks: DeviceLocks::new(),
        }
    }
}

/// 打开配置中的 SQLite 库
pub fn open_store(cfg: &AppConfig) -> Result<SqliteInventoryStore, AgentError> {
    let store = SqliteInventoryStore::open(
        &cfg.store.database_path,
        Duration::from_secs(cfg.store.op_timeout_secs.max(1)),
    )?;
    Ok(store)
}

/// 按配置创建组件；offline 时使用规则决策模型，不需要 API Key
pub fn create_components(cfg: &AppConfig, offline: bool) -> Result<AgentComponents, AgentError> {
    let store: Arc<dyn InventoryStore> = Arc::new(open_store(cfg)?);
    let oracle: Box<dyn DecisionOracle> = if offline {
        Box::new(RuleBasedOracle::new())
    } else {
        Box::new(OpenAiOracle::from_config(&cfg.oracle)?)
    };
    let oracle_name = if offline { "rules" } else { cfg.oracle.model.as_str() };
    tracing::info!(
        database = %cfg.store.database_path.display(),
        oracle = oracle_name,
        max_rounds = cfg.reconcile.max_rounds,
        "components ready"
    );
    Ok(AgentComponents::new(store, oracle, &cfg.reconcile))
}

/// 对一批识别结果跑一次对账；持有设备锁直到对账结束
pub async fn process_observations(
    components: &AgentComponents,
    device_id: Option<&str>,
    observed: Vec<ObservedItem>,
    cancel_token: CancellationToken,
    event_tx: Option<&UnboundedSender<ReconcileEvent>>,
) -> Result<ReconciliationSummary, AgentError> {
    let _guard = components.locks.lock(device_id).await;
    let mut session = ReconcileSession::new(
        components.oracle.as_ref(),
        &components.executor,
        &components.recovery,
        &components.catalogue,
        cancel_token,
    )
    .with_limits(components.limits)
    .with_device(device_id);
    if let Some(tx) = event_tx {
        session = session.with_event_tx(tx);
    }
    let summary = reconcile_from_store(&session, observed).await?;
    Ok(summary)
}

/// 识别照片后对账：识别不持锁，对账持锁
pub async fn process_photo(
    components: &AgentComponents,
    recognizer: &dyn Recognizer,
    image_url: &str,
    device_id: Option<&str>,
    cancel_token: CancellationToken,
) -> Result<ReconciliationSummary, AgentError> {
    let recognition = recognizer.recognize(image_url, device_id).await?;
    let observed = prepare_observations(
        recognition,
        image_url,
        device_id,
        Utc::now().fixed_offset(),
    );
    tracing::info!(observed = observed.len(), "observations prepared");
    process_observations(components, device_id, observed, cancel_token, None).await
}
