// ==========================================
// 结算数据仓库 - 订单构建
// ==========================================
// dm_orders ← stg.ordersystem_orders，游标 (update_ts, object_id)
// 引用: 用户 / 下单时刻有效的餐厅版本 / 时间维度
// ==========================================

use rusqlite::Connection;

use crate::domain::dimension::DmOrder;
use crate::domain::payload::OrderDoc;
use crate::domain::staging::StagingSource;
use crate::domain::workflow::WorkflowCursor;
use crate::engine::error::PipelineResult;
use crate::engine::task::{BatchOutcome, MissingReference, TaskId};
use crate::engine::transform::{parse_payload, BatchBuilder};
use crate::repository::{DimensionRepository, ScdRepository, StagingRepository};

pub struct OrdersBuilder {
    batch_limit: usize,
}

impl OrdersBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }

    // 逐项解析外键；返回首个缺失的引用
    fn resolve(
        dims: &DimensionRepository<'_>,
        scd: &ScdRepository<'_>,
        order_key: &str,
        doc: &OrderDoc,
    ) -> PipelineResult<Result<DmOrder, MissingReference>> {
        let Some(user_id) = dims.find_user_id(&doc.user.id)? else {
            return Ok(Err(MissingReference::new("dm_users", doc.user.id.clone())));
        };
        let Some(restaurant) = scd.restaurant_as_of(&doc.restaurant.id, &doc.date)? else {
            return Ok(Err(MissingReference::new("dm_restaurants", doc.restaurant.id.clone())));
        };
        let Some(timestamp_id) = dims.find_timestamp_id(&doc.date)? else {
            return Ok(Err(MissingReference::new(
                "dm_timestamps",
                crate::domain::types::format_ts(&doc.date),
            )));
        };
        Ok(Ok(DmOrder {
            id: None,
            user_id,
            restaurant_id: restaurant.id,
            timestamp_id,
            order_key: order_key.to_string(),
            order_status: doc.final_status.clone(),
        }))
    }
}

impl BatchBuilder for OrdersBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::DmOrders
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
        let scd = ScdRepository::new(conn);

        let mut outcome = BatchOutcome {
            read: docs.len(),
            ..BatchOutcome::default()
        };
        for doc in &docs {
            let parsed: OrderDoc = parse_payload(self.task_id(), &doc.object_id, &doc.object_value)?;
            match Self::resolve(&dims, &scd, &doc.object_id, &parsed)? {
                Ok(order) => {
                    dims.upsert_order(&order)?;
                    outcome.rows += 1;
                    outcome.cursor = Some(WorkflowCursor::at_ts_key(doc.update_ts, doc.object_id.clone()));
                }
                Err(missing) => {
                    outcome.deferred = Some(missing);
                    break;
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dimension::DmUser;
    use crate::domain::staging::{StagedRecord, StgDocument};
    use crate::domain::types::parse_ts;
    use crate::engine::dds::{RestaurantsBuilder, TimestampsBuilder};
    use crate::engine::task::run_transactional_batch;
    use crate::repository::{DimensionTable, Warehouse};
    use crate::schema::SchemaManager;

    fn run(wh: &Warehouse, builder: &dyn BatchBuilder) -> BatchOutcome {
        run_transactional_batch(wh, builder.task_id().layer(), builder.task_id().workflow_key(), |c, cur| {
            builder.build(c, cur)
        })
        .unwrap()
    }

    fn land(wh: &Warehouse, source: StagingSource, id: &str, json: &str, ts: &str) {
        let doc = StagedRecord::Document(StgDocument {
            object_id: id.into(),
            object_value: json.into(),
            update_ts: parse_ts(ts).unwrap(),
        });
        wh.read(|c| StagingRepository::new(c).upsert(source, &doc)).unwrap();
    }

    #[test]
    fn test_order_waits_for_user_then_loads_once() {
        let wh = Warehouse::open_in_memory().unwrap();
        SchemaManager::new(wh.clone()).init_all().unwrap();

        land(&wh, StagingSource::OrdersystemRestaurants, "R1", r#"{"_id":"R1","name":"Bistro A"}"#, "2024-01-01 00:00:00");
        let order = r#"{"_id":"O-1","final_status":"CLOSED","user":{"id":"U1"},"restaurant":{"id":"R1"},"date":"2024-06-01 12:00:00"}"#;
        land(&wh, StagingSource::OrdersystemOrders, "O-1", order, "2024-06-01 12:05:00");
        run(&wh, &RestaurantsBuilder::new(10));
        run(&wh, &TimestampsBuilder::new(10));

        let orders = OrdersBuilder::new(10);
        let first = run(&wh, &orders);
        assert_eq!(first.deferred, Some(MissingReference::new("dm_users", "U1")));

        wh.read(|c| {
            DimensionRepository::new(c).upsert_user(&DmUser {
                id: None,
                user_id: "U1".into(),
                user_name: "Ann".into(),
                user_login: "ann".into(),
            })
        })
        .unwrap();
        let second = run(&wh, &orders);
        assert_eq!(second.rows, 1);

        // 重新落地同一订单后重建，仍只有一行
        land(&wh, StagingSource::OrdersystemOrders, "O-1", order, "2024-06-01 12:06:00");
        run(&wh, &orders);
        let count = wh.read(|c| DimensionRepository::new(c).count(DimensionTable::Orders)).unwrap();
        assert_eq!(count, 1);
    }
}
