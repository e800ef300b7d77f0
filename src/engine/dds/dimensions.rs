// ==========================================
// 结算数据仓库 - 非版本化维度构建
// ==========================================
// dm_users      ← stg.ordersystem_users      游标 (update_ts, object_id)
// dm_couriers   ← stg.deliverysystem_couriers 游标 (stg id)
// dm_timestamps ← stg.ordersystem_orders     游标 (update_ts, object_id)
// ==========================================

use rusqlite::Connection;

use crate::domain::dimension::{DmCourier, DmTimestamp, DmUser};
use crate::domain::payload::{OrderDoc, UserDoc};
use crate::domain::staging::StagingSource;
use crate::domain::workflow::WorkflowCursor;
use crate::engine::error::PipelineResult;
use crate::engine::task::{BatchOutcome, TaskId};
use crate::engine::transform::{parse_payload, BatchBuilder};
use crate::repository::{DimensionRepository, StagingRepository};
use crate::validation::check_rules::{check_timestamp, ensure_clean};

// ==========================================
// dm_users
// ==========================================
pub struct UsersBuilder {
    batch_limit: usize,
}

impl UsersBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }
}

impl BatchBuilder for UsersBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::DmUsers
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let docs = StagingRepository::new(conn).list_documents_after(
            StagingSource::OrdersystemUsers,
            cursor,
            self.batch_limit,
        )?;
        let dims = DimensionRepository::new(conn);

        let mut outcome = BatchOutcome {
            read: docs.len(),
            ..BatchOutcome::default()
        };
        for doc in &docs {
            let user: UserDoc = parse_payload(self.task_id(), &doc.object_id, &doc.object_value)?;
            dims.upsert_user(&DmUser {
                id: None,
                user_id: doc.object_id.clone(),
                user_name: user.name,
                user_login: user.login,
            })?;
            outcome.rows += 1;
            outcome.cursor = Some(WorkflowCursor::at_ts_key(doc.update_ts, doc.object_id.clone()));
        }
        Ok(outcome)
    }
}

// ==========================================
// dm_couriers
// ==========================================
pub struct CouriersBuilder {
    batch_limit: usize,
}

impl CouriersBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }
}

impl BatchBuilder for CouriersBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::DmCouriers
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let rows = StagingRepository::new(conn).list_named_after_id(
            StagingSource::DeliverysystemCouriers,
            cursor.last_loaded_id.unwrap_or(0),
            self.batch_limit,
        )?;
        let dims = DimensionRepository::new(conn);

        let mut outcome = BatchOutcome {
            read: rows.len(),
            ..BatchOutcome::default()
        };
        for row in rows {
            dims.upsert_courier(&DmCourier {
                id: None,
                courier_id: row.record.object_id,
                courier_name: row.record.name,
            })?;
            outcome.rows += 1;
            outcome.cursor = Some(WorkflowCursor::at_id(row.id));
        }
        Ok(outcome)
    }
}

// ==========================================
// dm_timestamps
// ==========================================
// 所有状态的订单都登记下单时刻
pub struct TimestampsBuilder {
    batch_limit: usize,
}

impl TimestampsBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }
}

impl BatchBuilder for TimestampsBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::DmTimestamps
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let docs = StagingRepository::new(conn).list_documents_after(
            StagingSource::OrdersystemOrders,
            cursor,
            self.batch_limit,
        )?;
        let dims = DimensionRepository::new(conn);

        let mut outcome = BatchOutcome {
            read: docs.len(),
            ..BatchOutcome::default()
        };
        for doc in &docs {
            let order: OrderDoc = parse_payload(self.task_id(), &doc.object_id, &doc.object_value)?;
            let dm = DmTimestamp::from_ts(order.date);
            ensure_clean(self.task_id().workflow_key(), check_timestamp(&dm))?;
            if dims.insert_timestamp_if_absent(&dm)? {
                outcome.rows += 1;
            }
            outcome.cursor = Some(WorkflowCursor::at_ts_key(doc.update_ts, doc.object_id.clone()));
        }
        Ok(outcome)
    }
}
