//! 日志初始化
//!
//! SDK 本身只通过 `tracing` 宏输出日志，宿主应用决定是否安装 subscriber。

use tracing_subscriber::EnvFilter;

/// 默认过滤规则（可被 RUST_LOG 覆盖）
pub const DEFAULT_FILTER: &str = "finsync_sdk=info";

/// 安装全局 fmt subscriber；已经安装过时返回 false
pub fn init_tracing() -> bool {
    init_with_filter(DEFAULT_FILTER, false)
}

/// 测试用：输出到测试捕获，默认 debug 级别，可以重复调用
pub fn init_test_tracing() {
    let _ = init_with_filter("finsync_sdk=debug", true);
}

fn init_with_filter(default_filter: &str, for_tests: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let result = if for_tests {
        builder.with_test_writer().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}
