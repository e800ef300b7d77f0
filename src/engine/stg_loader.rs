// ==========================================
// 结算数据仓库 - 贴源层抽取任务
// ==========================================
// 流程: 读游标 → 读取源导出 (游标之后, 按位置排序, 限批) → 同事务 upsert + 推进游标
// 红线: 落地失败不推进游标；重复抽取同一批次结果不变
// ==========================================

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::sync::Arc;

use crate::domain::staging::{StagedRecord, StagingSource};
use crate::domain::types::Layer;
use crate::domain::workflow::WorkflowCursor;
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::task::{run_blocking, run_transactional_batch, BatchOutcome, LoadTask, TaskId};
use crate::perf::PerfGuard;
use crate::repository::{StagingRepository, Warehouse, WorkflowSettingsRepository};
use crate::source::reader::{kind_matches, SourceReader};

pub struct StagingLoader {
    source: StagingSource,
    reader: Arc<dyn SourceReader>,
    batch_limit: usize,
    initial_load_from: Option<NaiveDateTime>,
}

impl StagingLoader {
    pub fn new(source: StagingSource, reader: Arc<dyn SourceReader>, batch_limit: usize) -> Self {
        Self {
            source,
            reader,
            batch_limit: batch_limit.max(1),
            initial_load_from: None,
        }
    }

    /// 首次加载的时间下界（仅对时间排序的源生效）
    pub fn with_initial_load_from(mut self, from: Option<NaiveDateTime>) -> Self {
        self.initial_load_from = from;
        self
    }

    pub fn source(&self) -> StagingSource {
        self.source
    }

    // 空游标时套用首次加载下界
    fn effective_cursor(&self, stored: WorkflowCursor) -> WorkflowCursor {
        match self.initial_load_from {
            Some(from) if stored.is_empty() && self.source.is_time_ordered() => {
                WorkflowCursor::at_ts(from)
            }
            _ => stored,
        }
    }
}

#[async_trait]
impl LoadTask for StagingLoader {
    fn task_id(&self) -> TaskId {
        TaskId::for_staging(self.source)
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn run_batch(&self, warehouse: &Warehouse) -> PipelineResult<BatchOutcome> {
        let source = self.source;
        let workflow_key = source.workflow_key();

        let stored = warehouse.read(|conn| {
            WorkflowSettingsRepository::new(conn, Layer::Stg).get_setting(workflow_key)
        })?;
        let after = self.effective_cursor(stored.workflow_settings);

        let fetched = self.reader.read_after(source, &after, self.batch_limit).await?;
        // 截断后不在游标之后的记录已落地过，丢弃以保证游标前进
        let fetched_count = fetched.len();
        let records: Vec<StagedRecord> = fetched
            .into_iter()
            .map(StagedRecord::normalized)
            .filter(|r| after.admits(&r.position()))
            .collect();
        if records.is_empty() {
            if fetched_count > 0 {
                tracing::warn!(
                    source = source.table(),
                    after = %after.describe(),
                    count = fetched_count,
                    "源记录均不在游标之后，本批次跳过"
                );
            }
            return Ok(BatchOutcome::empty());
        }
        if let Some(bad) = records.iter().find(|r| !kind_matches(source, r)) {
            return Err(PipelineError::payload(
                workflow_key,
                &bad.identifier(),
                format!("记录类型与 {} 不匹配", source.table()),
            ));
        }

        tracing::debug!(
            source = source.table(),
            reader = %self.reader.describe(),
            after = %after.describe(),
            count = records.len(),
            "读取源记录"
        );

        let wh = warehouse.clone();
        run_blocking(move || land_batch(&wh, source, records)).await
    }
}

/// 同事务落地一批记录并推进游标
fn land_batch(
    warehouse: &Warehouse,
    source: StagingSource,
    records: Vec<StagedRecord>,
) -> PipelineResult<BatchOutcome> {
    let perf = PerfGuard::new("stg_land_batch");
    let outcome = run_transactional_batch(warehouse, Layer::Stg, source.workflow_key(), |conn, _| {
        let repo = StagingRepository::new(conn);
        let mut cursor = None;
        for record in &records {
            repo.upsert(source, record)?;
            cursor = Some(record.position());
        }
        Ok(BatchOutcome {
            rows: records.len(),
            read: records.len(),
            cursor,
            ..BatchOutcome::default()
        })
    })?;
    let stats = perf.finish();
    tracing::debug!(
        source = source.table(),
        elapsed_ms = stats.elapsed_ms,
        sql_count = stats.sql_count,
        "落地完成"
    );
    Ok(outcome)
}
