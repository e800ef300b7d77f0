// ==========================================
// 结算数据仓库 - 配置层
// ==========================================
// 职责: 流水线配置加载，支持多级覆写
// 来源: 默认值 → JSON 文件 → 环境变量
// ==========================================

pub mod pipeline_config;

pub use pipeline_config::{default_db_path, env_keys, BatchLimits, PipelineConfig};
