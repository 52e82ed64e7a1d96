//! 对账：种子指令、对话记录、主循环、过程事件与摘要

pub mod events;
pub mod loop_;
pub mod prompt;
pub mod summary;
pub mod transcript;

pub use events::ReconcileEvent;
pub use loop_::{reconcile, reconcile_from_store, ReconcileLimits, ReconcileSession};
pub use prompt::{reconcile_instructions, MATCHING_RULES};
pub use summary::{ReconciliationSummary, RetainedItem};
pub use transcript::{RequestedAction, SeedTurn, Transcript, Turn};
