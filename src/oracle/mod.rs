//! 决策模型：OpenAI 兼容客户端、离线规则实现与测试用脚本实现

pub mod mock;
pub mod openai;
pub mod rules;
pub mod traits;

pub use mock::{EndlessOracle, ScriptedOracle};
pub use openai::{OpenAiOracle, TokenUsage};
pub use rules::RuleBasedOracle;
pub use traits::{DecisionOracle, OracleDecision};
