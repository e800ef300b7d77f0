// ==========================================
// 结算数据仓库 - 流水线编排器
// ==========================================
// 流程: 检查点预检 → 按层执行 (stg → dds → cdm) → 层内按波次并发 → 维度缺失重试
// 红线: 失败任务的下游跳过；任一任务失败则后续层全部跳过
// ==========================================

use chrono::NaiveDateTime;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::staging::StagingSource;
use crate::domain::types::Layer;
use crate::engine::cdm::{CourierLedgerBuilder, SettlementReportBuilder};
use crate::engine::dds::{
    CouriersBuilder, DeliveriesBuilder, OrdersBuilder, ProductSalesBuilder, ProductsBuilder,
    RestaurantsBuilder, TimestampsBuilder, UsersBuilder,
};
use crate::engine::error::{PipelineError, PipelineResult};
use crate::engine::graph::TaskGraph;
use crate::engine::stg_loader::StagingLoader;
use crate::engine::task::{log_batch, LoadTask, MissingReference, TaskId};
use crate::engine::transform::TransformTask;
use crate::repository::{StagingRepository, Warehouse, WorkflowSettingsRepository};
use crate::source::SourceReader;

// ==========================================
// 运行报告
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Deferred,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: TaskId,
    pub layer: Layer,
    pub workflow_key: String,
    pub status: TaskStatus,
    pub batches: usize,
    pub rows: usize,
    pub attempts: u32,
    pub error: Option<String>,
    pub deferred_on: Option<MissingReference>,
}

impl TaskReport {
    fn new(task: TaskId, status: TaskStatus) -> Self {
        Self {
            task,
            layer: task.layer(),
            workflow_key: task.workflow_key().to_string(),
            status,
            batches: 0,
            rows: 0,
            attempts: 0,
            error: None,
            deferred_on: None,
        }
    }

    fn skipped(task: TaskId, reason: String) -> Self {
        Self {
            error: Some(reason),
            ..Self::new(task, TaskStatus::Skipped)
        }
    }

    // 重试结果并入原报告
    fn merge(&mut self, retry: TaskReport) {
        self.batches += retry.batches;
        self.rows += retry.rows;
        self.attempts += retry.attempts;
        self.status = retry.status;
        self.error = retry.error;
        self.deferred_on = retry.deferred_on;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// 全部任务成功（失败、重试耗尽仍延后、被跳过都算失败）
    pub fn succeeded(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Succeeded)
    }

    pub fn task(&self, task: TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task == task)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    pub fn total_rows(&self) -> usize {
        self.tasks.iter().map(|t| t.rows).sum()
    }
}

// ==========================================
// 编排参数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub max_dependency_retries: u32,
    pub drain: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_dependency_retries: 2,
            drain: true,
        }
    }
}

// ==========================================
// Orchestrator
// ==========================================
pub struct Orchestrator {
    warehouse: Warehouse,
    tasks: BTreeMap<TaskId, Arc<dyn LoadTask>>,
    graph: TaskGraph<TaskId>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    /// 由配置构建完整的 18 个任务
    pub fn from_config(
        warehouse: Warehouse,
        reader: Arc<dyn SourceReader>,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let limits = &config.batch_limits;
        let limit = |t: TaskId| limits.for_task(t);

        let mut tasks: Vec<Arc<dyn LoadTask>> = StagingSource::ALL
            .iter()
            .map(|source| {
                let loader = StagingLoader::new(*source, reader.clone(), limit(TaskId::for_staging(*source)))
                    .with_initial_load_from(config.initial_load_from);
                Arc::new(loader) as Arc<dyn LoadTask>
            })
            .collect();

        tasks.push(Arc::new(TransformTask::new(UsersBuilder::new(limit(TaskId::DmUsers)))));
        tasks.push(Arc::new(TransformTask::new(CouriersBuilder::new(limit(TaskId::DmCouriers)))));
        tasks.push(Arc::new(TransformTask::new(RestaurantsBuilder::new(limit(TaskId::DmRestaurants)))));
        tasks.push(Arc::new(TransformTask::new(ProductsBuilder::new(limit(TaskId::DmProducts)))));
        tasks.push(Arc::new(TransformTask::new(TimestampsBuilder::new(limit(TaskId::DmTimestamps)))));
        tasks.push(Arc::new(TransformTask::new(OrdersBuilder::new(limit(TaskId::DmOrders)))));
        tasks.push(Arc::new(TransformTask::new(ProductSalesBuilder::new(limit(TaskId::FctProductSales)))));
        tasks.push(Arc::new(TransformTask::new(DeliveriesBuilder::new(limit(TaskId::FctDeliveries)))));
        tasks.push(Arc::new(TransformTask::new(SettlementReportBuilder::new())));
        tasks.push(Arc::new(TransformTask::new(CourierLedgerBuilder::new())));

        Self::with_tasks(
            warehouse,
            tasks,
            OrchestratorOptions {
                max_dependency_retries: config.max_dependency_retries,
                drain: config.drain,
            },
        )
    }

    /// 由任意任务集构建（依赖边取自 TaskId，集合外的上游忽略）
    pub fn with_tasks(
        warehouse: Warehouse,
        tasks: Vec<Arc<dyn LoadTask>>,
        options: OrchestratorOptions,
    ) -> PipelineResult<Self> {
        let mut registry = BTreeMap::new();
        for task in tasks {
            let id = task.task_id();
            if registry.insert(id, task).is_some() {
                return Err(PipelineError::Graph(format!("任务重复登记: {}", id)));
            }
        }
        let edges: Vec<(TaskId, TaskId)> = registry
            .keys()
            .flat_map(|t| {
                t.dependencies()
                    .into_iter()
                    .filter(|d| registry.contains_key(d))
                    .map(move |d| (d, *t))
            })
            .collect();
        let graph = TaskGraph::new(registry.keys().copied(), edges)?;
        Ok(Self {
            warehouse,
            tasks: registry,
            graph,
            options,
        })
    }

    pub fn graph(&self) -> &TaskGraph<TaskId> {
        &self.graph
    }

    // ==========================================
    // 检查点预检
    // ==========================================

    /// 对比每个抽取工作流的游标与已落地数据的最大位置
    ///
    /// # 返回
    /// - Err(CheckpointDivergence): 游标超前于已落地数据
    pub fn preflight(&self) -> PipelineResult<()> {
        let divergences = find_checkpoint_divergences(&self.warehouse)?;
        match divergences.into_iter().next() {
            None => Ok(()),
            Some(err) => {
                error!(error = %err, "检查点偏离，需人工核对后再运行");
                Err(err)
            }
        }
    }

    // ==========================================
    // 执行
    // ==========================================

    /// 运行全部已登记任务
    pub async fn run(&self) -> PipelineResult<RunReport> {
        self.run_layers(&Layer::ALL).await
    }

    /// 按层顺序运行指定层
    pub async fn run_layers(&self, layers: &[Layer]) -> PipelineResult<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = now();
        info!(%run_id, layers = ?layers, "流水线开始");

        self.preflight()?;

        let mut ordered: Vec<Layer> = layers.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut reports: BTreeMap<TaskId, TaskReport> = BTreeMap::new();
        let mut halted: Option<String> = None;

        for layer in ordered {
            let layer_tasks: BTreeSet<TaskId> = self
                .tasks
                .keys()
                .copied()
                .filter(|t| t.layer() == layer)
                .collect();

            if let Some(reason) = &halted {
                for t in &layer_tasks {
                    reports.insert(*t, TaskReport::skipped(*t, reason.clone()));
                }
                continue;
            }

            self.run_set(&layer_tasks, &mut reports).await?;
            self.retry_deferred(layer, &mut reports).await?;

            let failed: Vec<String> = layer_tasks
                .iter()
                .filter(|t| reports.get(t).map(|r| r.status) == Some(TaskStatus::Failed))
                .map(|t| t.to_string())
                .collect();
            if !failed.is_empty() {
                warn!(%layer, failed = ?failed, "本层存在失败任务，后续层跳过");
                halted = Some(format!("{} 层任务失败: {}", layer, failed.join(", ")));
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: now(),
            tasks: reports.into_values().collect(),
        };
        info!(
            %run_id,
            succeeded = report.count(TaskStatus::Succeeded),
            deferred = report.count(TaskStatus::Deferred),
            failed = report.count(TaskStatus::Failed),
            skipped = report.count(TaskStatus::Skipped),
            rows = report.total_rows(),
            "流水线结束"
        );
        Ok(report)
    }

    /// 按波次运行一组任务；上游失败/跳过的任务直接跳过
    async fn run_set(
        &self,
        set: &BTreeSet<TaskId>,
        reports: &mut BTreeMap<TaskId, TaskReport>,
    ) -> PipelineResult<()> {
        for wave in self.graph.waves_of(set)? {
            let mut runnable = Vec::new();
            for id in wave {
                let blocked = self.graph.upstream(&id).into_iter().find(|d| {
                    matches!(
                        reports.get(d).map(|r| r.status),
                        Some(TaskStatus::Failed | TaskStatus::Skipped)
                    )
                });
                match blocked {
                    Some(dep) => {
                        let report = TaskReport::skipped(id, format!("上游任务未完成: {}", dep));
                        merge_report(reports, report);
                    }
                    None => {
                        if let Some(task) = self.tasks.get(&id) {
                            runnable.push(task.clone());
                        }
                    }
                }
            }

            let handles = runnable.into_iter().map(|task| {
                let wh = self.warehouse.clone();
                let drain = self.options.drain;
                let id = task.task_id();
                (id, tokio::spawn(async move { drain_task(task, wh, drain).await }))
            });
            let (ids, joins): (Vec<TaskId>, Vec<_>) = handles.unzip();

            for (id, joined) in ids.into_iter().zip(join_all(joins).await) {
                let report = joined.unwrap_or_else(|e| {
                    let mut r = TaskReport::new(id, TaskStatus::Failed);
                    r.attempts = 1;
                    r.error = Some(PipelineError::TaskPanicked(e.to_string()).to_string());
                    r
                });
                merge_report(reports, report);
            }
        }
        Ok(())
    }

    /// 维度缺失重试: 重跑延后任务的上游与其自身
    async fn retry_deferred(
        &self,
        layer: Layer,
        reports: &mut BTreeMap<TaskId, TaskReport>,
    ) -> PipelineResult<()> {
        for round in 1..=self.options.max_dependency_retries {
            let deferred: Vec<TaskId> = reports
                .values()
                .filter(|r| r.layer == layer && r.status == TaskStatus::Deferred)
                .map(|r| r.task)
                .collect();
            if deferred.is_empty() {
                return Ok(());
            }
            info!(round, %layer, deferred = ?deferred, "重试维度缺失的任务");

            let mut rerun: BTreeSet<TaskId> = BTreeSet::new();
            for t in &deferred {
                rerun.extend(self.graph.ancestors(t));
                rerun.insert(*t);
            }
            // 上游按层顺序重跑
            for l in Layer::ALL.iter().filter(|l| **l <= layer) {
                let subset: BTreeSet<TaskId> = rerun.iter().copied().filter(|t| t.layer() == *l).collect();
                if !subset.is_empty() {
                    self.run_set(&subset, reports).await?;
                }
            }
        }

        for report in reports.values_mut() {
            if report.layer == layer && report.status == TaskStatus::Deferred {
                let missing = report
                    .deferred_on
                    .as_ref()
                    .map(|m| format!("{} 中不存在 {}", m.dimension, m.natural_key))
                    .unwrap_or_default();
                error!(task = %report.task, attempts = report.attempts, %missing, "维度缺失重试耗尽");
                report.error = Some(format!("维度缺失重试耗尽: {}", missing));
            }
        }
        Ok(())
    }
}

fn merge_report(reports: &mut BTreeMap<TaskId, TaskReport>, report: TaskReport) {
    match reports.get_mut(&report.task) {
        Some(existing) => existing.merge(report),
        None => {
            reports.insert(report.task, report);
        }
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// 连续执行批次直到数据耗尽、被截断或失败
async fn drain_task(task: Arc<dyn LoadTask>, warehouse: Warehouse, drain: bool) -> TaskReport {
    let id = task.task_id();
    let mut report = TaskReport::new(id, TaskStatus::Succeeded);
    report.attempts = 1;

    loop {
        match task.run_batch(&warehouse).await {
            Ok(outcome) => {
                log_batch(id, &outcome);
                report.batches += 1;
                report.rows += outcome.rows;
                if let Some(missing) = outcome.deferred {
                    report.status = TaskStatus::Deferred;
                    report.deferred_on = Some(missing);
                    return report;
                }
                if outcome.exhausted || !drain || outcome.read < task.batch_limit() {
                    return report;
                }
            }
            Err(PipelineError::MissingDimension {
                dimension,
                natural_key,
                ..
            }) => {
                warn!(task = %id, %dimension, %natural_key, "维度缺失，等待重试");
                report.status = TaskStatus::Deferred;
                report.deferred_on = Some(MissingReference {
                    dimension,
                    natural_key,
                });
                return report;
            }
            Err(err) => {
                error!(task = %id, fatal = err.is_fatal(), error = %err, "任务失败");
                report.status = TaskStatus::Failed;
                report.error = Some(err.to_string());
                return report;
            }
        }
    }
}

/// 抽取工作流的检查点偏离
///
/// 游标非空且 (表为空 或 游标 > 已落地最大位置) 即偏离
pub fn find_checkpoint_divergences(warehouse: &Warehouse) -> PipelineResult<Vec<PipelineError>> {
    warehouse.read(|conn| {
        let settings = WorkflowSettingsRepository::new(conn, Layer::Stg);
        let staging = StagingRepository::new(conn);
        let mut found = Vec::new();
        for source in StagingSource::ALL {
            let key = source.workflow_key();
            let cursor = settings.get_setting(key)?.workflow_settings;
            if cursor.is_empty() {
                continue;
            }
            let landed = staging.max_landed_position(source)?;
            let diverged = match &landed {
                None => true,
                Some(max) => cursor > *max,
            };
            if diverged {
                found.push(PipelineError::CheckpointDivergence {
                    workflow: key.to_string(),
                    watermark: cursor.describe(),
                    landed: landed
                        .map(|c| c.describe())
                        .unwrap_or_else(|| "<无数据>".to_string()),
                });
            }
        }
        Ok(found)
    })
}
