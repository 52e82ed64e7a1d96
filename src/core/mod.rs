//! 核心层：错误与恢复、按设备串行化

pub mod device_lock;
pub mod error;
pub mod recovery;

pub use device_lock::{DeviceGuard, DeviceLocks};
pub use error::{
    ActionError, AgentError, InventoryError, OracleError, RecognitionError, ReconcileError,
    RoundRecovery, TerminationReason,
};
pub use recovery::RecoveryEngine;
