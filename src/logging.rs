// ==========================================
// 结算数据仓库 - 日志初始化
// ==========================================
// 输出: 人类可读 (终端) / JSON 行 (日志采集)
// 过滤: RUST_LOG，缺省 info
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 按格式安装全局订阅者（重复安装静默忽略）
///
/// # 示例
/// ```no_run
/// use settlements_dwh::logging::{self, LogFormat};
/// logging::init_with(LogFormat::Json);
/// ```
pub fn init_with(format: LogFormat) {
    let builder = fmt().with_env_filter(env_filter());
    let _ = match format {
        LogFormat::Pretty => builder.with_target(true).with_line_number(true).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
}

/// 终端格式
pub fn init() {
    init_with(LogFormat::Pretty);
}

/// 测试用: debug 级别，输出交给测试框架捕获
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
