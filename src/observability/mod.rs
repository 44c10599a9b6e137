//! 可观测性：tracing 订阅器初始化
//!
//! 日志级别由 `RUST_LOG` 控制，缺省为 info。`STEPWISE_LOG_FORMAT=json` 时输出 JSON 行。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("STEPWISE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    // 日志写 stderr，stdout 留给运行结果
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
