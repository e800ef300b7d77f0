// ==========================================
// 结算数据仓库 - 加载任务抽象
// ==========================================
// 职责: 任务标识、依赖边、单批次执行接口
// 红线: 一个批次 = 一个事务；游标与数据同事务提交
// ==========================================

use async_trait::async_trait;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::staging::StagingSource;
use crate::domain::types::Layer;
use crate::domain::workflow::{workflow_keys, WorkflowCursor};
use crate::engine::error::{PipelineError, PipelineResult};
use crate::repository::{Warehouse, WorkflowSettingsRepository};

// ==========================================
// TaskId - 任务标识
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskId {
    // stg
    StgOrdersystemRestaurants,
    StgOrdersystemUsers,
    StgOrdersystemOrders,
    StgDeliverysystemRestaurants,
    StgDeliverysystemCouriers,
    StgDeliverysystemDeliveries,
    StgBonussystemRanks,
    StgBonussystemEvents,
    // dds
    DmUsers,
    DmCouriers,
    DmRestaurants,
    DmProducts,
    DmTimestamps,
    DmOrders,
    FctProductSales,
    FctDeliveries,
    // cdm
    SettlementReport,
    CourierLedger,
}

impl TaskId {
    pub const ALL: [TaskId; 18] = [
        TaskId::StgOrdersystemRestaurants,
        TaskId::StgOrdersystemUsers,
        TaskId::StgOrdersystemOrders,
        TaskId::StgDeliverysystemRestaurants,
        TaskId::StgDeliverysystemCouriers,
        TaskId::StgDeliverysystemDeliveries,
        TaskId::StgBonussystemRanks,
        TaskId::StgBonussystemEvents,
        TaskId::DmUsers,
        TaskId::DmCouriers,
        TaskId::DmRestaurants,
        TaskId::DmProducts,
        TaskId::DmTimestamps,
        TaskId::DmOrders,
        TaskId::FctProductSales,
        TaskId::FctDeliveries,
        TaskId::SettlementReport,
        TaskId::CourierLedger,
    ];

    pub fn for_staging(source: StagingSource) -> Self {
        match source {
            StagingSource::OrdersystemRestaurants => TaskId::StgOrdersystemRestaurants,
            StagingSource::OrdersystemUsers => TaskId::StgOrdersystemUsers,
            StagingSource::OrdersystemOrders => TaskId::StgOrdersystemOrders,
            StagingSource::DeliverysystemRestaurants => TaskId::StgDeliverysystemRestaurants,
            StagingSource::DeliverysystemCouriers => TaskId::StgDeliverysystemCouriers,
            StagingSource::DeliverysystemDeliveries => TaskId::StgDeliverysystemDeliveries,
            StagingSource::BonussystemRanks => TaskId::StgBonussystemRanks,
            StagingSource::BonussystemEvents => TaskId::StgBonussystemEvents,
        }
    }

    pub fn staging_source(&self) -> Option<StagingSource> {
        StagingSource::ALL
            .iter()
            .copied()
            .find(|s| TaskId::for_staging(*s) == *self)
    }

    pub fn layer(&self) -> Layer {
        match self {
            TaskId::SettlementReport | TaskId::CourierLedger => Layer::Cdm,
            TaskId::DmUsers
            | TaskId::DmCouriers
            | TaskId::DmRestaurants
            | TaskId::DmProducts
            | TaskId::DmTimestamps
            | TaskId::DmOrders
            | TaskId::FctProductSales
            | TaskId::FctDeliveries => Layer::Dds,
            _ => Layer::Stg,
        }
    }

    pub fn workflow_key(&self) -> &'static str {
        if let Some(source) = self.staging_source() {
            return source.workflow_key();
        }
        match self {
            TaskId::DmUsers => workflow_keys::DM_USERS,
            TaskId::DmCouriers => workflow_keys::DM_COURIERS,
            TaskId::DmRestaurants => workflow_keys::DM_RESTAURANTS,
            TaskId::DmProducts => workflow_keys::DM_PRODUCTS,
            TaskId::DmTimestamps => workflow_keys::DM_TIMESTAMPS,
            TaskId::DmOrders => workflow_keys::DM_ORDERS,
            TaskId::FctProductSales => workflow_keys::FCT_PRODUCT_SALES,
            TaskId::FctDeliveries => workflow_keys::FCT_DELIVERIES,
            TaskId::SettlementReport => workflow_keys::SETTLEMENT_REPORT,
            _ => workflow_keys::COURIER_LEDGER,
        }
    }

    /// 目标表（日志 / 报告用）
    pub fn name(&self) -> &'static str {
        match self {
            TaskId::StgOrdersystemRestaurants => "stg.ordersystem_restaurants",
            TaskId::StgOrdersystemUsers => "stg.ordersystem_users",
            TaskId::StgOrdersystemOrders => "stg.ordersystem_orders",
            TaskId::StgDeliverysystemRestaurants => "stg.deliverysystem_restaurants",
            TaskId::StgDeliverysystemCouriers => "stg.deliverysystem_couriers",
            TaskId::StgDeliverysystemDeliveries => "stg.deliverysystem_deliveries",
            TaskId::StgBonussystemRanks => "stg.bonussystem_ranks",
            TaskId::StgBonussystemEvents => "stg.bonussystem_events",
            TaskId::DmUsers => "dds.dm_users",
            TaskId::DmCouriers => "dds.dm_couriers",
            TaskId::DmRestaurants => "dds.dm_restaurants",
            TaskId::DmProducts => "dds.dm_products",
            TaskId::DmTimestamps => "dds.dm_timestamps",
            TaskId::DmOrders => "dds.dm_orders",
            TaskId::FctProductSales => "dds.fct_product_sales",
            TaskId::FctDeliveries => "dds.fct_deliveries",
            TaskId::SettlementReport => "cdm.dm_settlement_report",
            TaskId::CourierLedger => "cdm.dm_courier_ledger",
        }
    }

    /// 直接上游任务
    ///
    /// dds 维度依赖其 stg 源表；层内依赖对应外键；集市依赖整个 dds 层
    pub fn dependencies(&self) -> Vec<TaskId> {
        use TaskId::*;
        match self {
            DmUsers => vec![StgOrdersystemUsers],
            DmCouriers => vec![StgDeliverysystemCouriers],
            DmRestaurants => vec![StgOrdersystemRestaurants],
            DmProducts => vec![StgOrdersystemRestaurants, DmRestaurants],
            DmTimestamps => vec![StgOrdersystemOrders],
            DmOrders => vec![StgOrdersystemOrders, DmUsers, DmRestaurants, DmTimestamps],
            FctProductSales => vec![StgBonussystemEvents, DmProducts, DmOrders],
            FctDeliveries => vec![StgDeliverysystemDeliveries, DmOrders, DmCouriers],
            SettlementReport | CourierLedger => vec![
                DmUsers,
                DmCouriers,
                DmRestaurants,
                DmProducts,
                DmTimestamps,
                DmOrders,
                FctProductSales,
                FctDeliveries,
            ],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ==========================================
// BatchOutcome - 单批次结果
// ==========================================

/// 未解析的维度引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingReference {
    pub dimension: String,
    pub natural_key: String,
}

impl MissingReference {
    pub fn new(dimension: &str, natural_key: impl Into<String>) -> Self {
        Self {
            dimension: dimension.to_string(),
            natural_key: natural_key.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub rows: usize,                         // 写入（或处理）的行数
    pub read: usize,                         // 本批读取的源行数
    pub cursor: Option<WorkflowCursor>,      // 新游标（None 表示不推进）
    pub deferred: Option<MissingReference>,  // 被截断时的首个缺失引用
    pub exhausted: bool,                     // 一次即完成（集市）
}

impl BatchOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.is_some()
    }
}

// ==========================================
// LoadTask Trait
// ==========================================
#[async_trait]
pub trait LoadTask: Send + Sync {
    fn task_id(&self) -> TaskId;

    /// 单批次最大读取行数
    fn batch_limit(&self) -> usize;

    /// 执行一个批次（一个事务）
    async fn run_batch(&self, warehouse: &Warehouse) -> PipelineResult<BatchOutcome>;

    fn workflow_key(&self) -> &'static str {
        self.task_id().workflow_key()
    }

    fn layer(&self) -> Layer {
        self.task_id().layer()
    }
}

// ==========================================
// 公共执行辅助
// ==========================================

/// 在阻塞线程池中执行同步工作
pub async fn run_blocking<T, F>(f: F) -> PipelineResult<T>
where
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::TaskPanicked(e.to_string()))?
}

/// 事务批次: 读游标 → 执行 → 保存新游标 → 提交
///
/// 闭包返回 Err 时事务回滚，游标不推进
pub fn run_transactional_batch<F>(
    warehouse: &Warehouse,
    layer: Layer,
    workflow_key: &'static str,
    f: F,
) -> PipelineResult<BatchOutcome>
where
    F: FnOnce(&Connection, &WorkflowCursor) -> PipelineResult<BatchOutcome>,
{
    let result = warehouse.transaction(|tx| {
        let settings = WorkflowSettingsRepository::new(tx, layer);
        let cursor = settings.get_setting(workflow_key)?.workflow_settings;
        let outcome = f(tx, &cursor)?;
        if let Some(next) = &outcome.cursor {
            if *next != cursor {
                settings.save_setting(workflow_key, next)?;
            }
        }
        Ok::<_, PipelineError>(outcome)
    });
    result.map_err(|e| e.in_workflow(workflow_key))
}

/// 批次日志
pub fn log_batch(task: TaskId, outcome: &BatchOutcome) {
    match &outcome.deferred {
        Some(missing) => tracing::warn!(
            task = %task,
            workflow = task.workflow_key(),
            rows = outcome.rows,
            dimension = %missing.dimension,
            natural_key = %missing.natural_key,
            "批次被截断: 维度缺失"
        ),
        None => tracing::info!(
            task = %task,
            workflow = task.workflow_key(),
            rows = outcome.rows,
            read = outcome.read,
            cursor = %outcome.cursor.as_ref().map(|c| c.describe()).unwrap_or_else(|| "-".into()),
            "批次完成"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaManager;

    #[test]
    fn test_task_catalog_is_consistent() {
        let mut keys: Vec<_> = TaskId::ALL.iter().map(|t| t.workflow_key()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 18);

        for task in TaskId::ALL {
            for dep in task.dependencies() {
                // 依赖只能指向同层或更早的层
                assert!(dep.layer() <= task.layer(), "{} -> {}", task, dep);
            }
        }
        assert_eq!(
            TaskId::StgBonussystemEvents.staging_source(),
            Some(StagingSource::BonussystemEvents)
        );
        assert_eq!(TaskId::DmUsers.staging_source(), None);
    }

    #[test]
    fn test_transactional_batch_saves_cursor_only_on_success() {
        let wh = Warehouse::open_in_memory().unwrap();
        SchemaManager::new(wh.clone()).init_all().unwrap();

        let ok = run_transactional_batch(&wh, Layer::Dds, workflow_keys::DM_USERS, |_, cursor| {
            assert!(cursor.is_empty());
            Ok(BatchOutcome {
                rows: 1,
                read: 1,
                cursor: Some(WorkflowCursor::at_id(7)),
                ..BatchOutcome::default()
            })
        })
        .unwrap();
        assert_eq!(ok.rows, 1);

        let failed = run_transactional_batch(&wh, Layer::Dds, workflow_keys::DM_USERS, |conn, _| {
            WorkflowSettingsRepository::new(conn, Layer::Dds)
                .save_setting(workflow_keys::DM_USERS, &WorkflowCursor::at_id(99))?;
            Err(PipelineError::Config("boom".into()))
        });
        assert!(failed.is_err());

        let stored = wh
            .read(|c| {
                WorkflowSettingsRepository::new(c, Layer::Dds).get_setting(workflow_keys::DM_USERS)
            })
            .unwrap();
        assert_eq!(stored.workflow_settings, WorkflowCursor::at_id(7));
    }
}
