// ==========================================
// 外卖结算数据仓库 - 核心库
// ==========================================
// 数据流: 源系统导出 → stg (贴源) → dds (明细/维度/事实) → cdm (集市)
// 技术栈: Rust + SQLite + tokio
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 各层行结构与游标
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 源系统读取
pub mod source;

// 引擎层 - 加载任务与编排
pub mod engine;

// 校验层
pub mod validation;

// 配置层
pub mod config;

// 数据库基础设施（连接初始化/命名空间挂载）
pub mod db;

// 建表脚本
pub mod schema;

// 日志系统
pub mod logging;

// 批次耗时采集
pub mod perf;

// ==========================================
// 重导出核心类型
// ==========================================

pub use config::PipelineConfig;
pub use domain::{Layer, StagingSource, WorkflowCursor};
pub use engine::{
    LoadTask, Orchestrator, OrchestratorOptions, PipelineError, PipelineResult, RunReport,
    TaskId, TaskStatus,
};
pub use repository::Warehouse;
pub use schema::SchemaManager;
pub use source::{FileSource, MemorySource, SourceReader};
pub use validation::{IntegrityChecker, IntegrityReport};
