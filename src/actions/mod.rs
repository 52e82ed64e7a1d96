//! 动作层：封闭的动作枚举、参数 Schema 目录与执行器

pub mod action;
pub mod catalogue;
pub mod executor;

pub use action::{error_payload, Action, ActionKind, ActionOutcome, ITEM_FIELDS};
pub use catalogue::{ActionCatalogue, ActionSpec};
pub use executor::ActionExecutor;
