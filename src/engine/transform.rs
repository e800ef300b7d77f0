// ==========================================
// 结算数据仓库 - 库内转换任务 (dds / cdm)
// ==========================================
// 职责: 把同步的批次构建器包装为可编排的加载任务
// 执行: 阻塞线程池 + 单事务（游标同事务推进）
// ==========================================

use async_trait::async_trait;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::domain::workflow::WorkflowCursor;
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::task::{run_blocking, run_transactional_batch, BatchOutcome, LoadTask, TaskId};
use crate::perf::PerfGuard;
use crate::repository::Warehouse;

/// 同步批次构建器: 在事务连接上读取游标之后的数据并写入目标表
pub trait BatchBuilder: Send + Sync + 'static {
    fn task_id(&self) -> TaskId;

    fn batch_limit(&self) -> usize;

    /// # 参数
    /// - `conn`: 批次事务
    /// - `cursor`: 当前游标
    ///
    /// # 返回
    /// - 批次结果（`cursor` 为需要保存的新游标）
    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome>;
}

pub struct TransformTask<B> {
    builder: Arc<B>,
}

impl<B: BatchBuilder> TransformTask<B> {
    pub fn new(builder: B) -> Self {
        Self {
            builder: Arc::new(builder),
        }
    }
}

#[async_trait]
impl<B: BatchBuilder> LoadTask for TransformTask<B> {
    fn task_id(&self) -> TaskId {
        self.builder.task_id()
    }

    fn batch_limit(&self) -> usize {
        self.builder.batch_limit()
    }

    async fn run_batch(&self, warehouse: &Warehouse) -> PipelineResult<BatchOutcome> {
        let builder = self.builder.clone();
        let wh = warehouse.clone();
        run_blocking(move || {
            let task = builder.task_id();
            let perf = PerfGuard::new(task.name());
            let outcome = run_transactional_batch(&wh, task.layer(), task.workflow_key(), |conn, cursor| {
                builder.build(conn, cursor)
            })?;
            let stats = perf.finish();
            tracing::debug!(
                task = %task,
                elapsed_ms = stats.elapsed_ms,
                sql_count = stats.sql_count,
                slow_sql_count = stats.slow_sql_count,
                "批次统计"
            );
            Ok(outcome)
        })
        .await
    }
}

/// 解析 stg JSON 原文
pub fn parse_payload<T: DeserializeOwned>(task: TaskId, key: &str, json: &str) -> PipelineResult<T> {
    serde_json::from_str(json).map_err(|e| PipelineError::payload(task.workflow_key(), key, e))
}
