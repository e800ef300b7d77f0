// ==========================================
// 结算数据仓库 - 引擎层
// ==========================================
// 职责: 分层加载任务 (抽取 / 维度 / 事实 / 集市) 与 DAG 编排
// 红线: 引擎不拼 SQL，数据访问全部经由仓储层
// ==========================================

pub mod cdm;
pub mod dds;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod scd;
pub mod stg_loader;
pub mod task;
pub mod transform;

// 重导出核心类型
pub use error::{PipelineError, PipelineResult};
pub use graph::TaskGraph;
pub use orchestrator::{
    find_checkpoint_divergences, Orchestrator, OrchestratorOptions, RunReport, TaskReport, TaskStatus,
};
pub use scd::{decide, ScdAction};
pub use stg_loader::StagingLoader;
pub use task::{BatchOutcome, LoadTask, MissingReference, TaskId};
pub use transform::{BatchBuilder, TransformTask};
