//! 可观测性：tracing 订阅器初始化
//!
//! 日志写到 stderr，stdout 留给 CLI 的 JSON 输出；RUST_LOG 优先于默认级别。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
