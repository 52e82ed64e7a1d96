//! FreshTrack - 冰箱库存对账
//!
//! 模块划分：
//! - **agent**: 无头运行时（组件构建、按设备串行的对账入口）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、轮次恢复决策、设备锁
//! - **inventory**: 物品模型、存储抽象与 SQLite 实现、库存概况
//! - **actions**: 固定动作目录、参数校验与执行器
//! - **oracle**: 决策模型（OpenAI 兼容 / 规则 / Mock）
//! - **reconcile**: 对账主循环、对话记录与摘要
//! - **recognize**: 照片识别与识别结果整理
//! - **observability**: tracing 初始化

pub mod actions;
pub mod agent;
pub mod config;
pub mod core;
pub mod inventory;
pub mod observability;
pub mod oracle;
pub mod recognize;
pub mod reconcile;

pub use agent::{create_components, process_observations, process_photo, AgentComponents};
pub use reconcile::{reconcile, ReconciliationSummary};
