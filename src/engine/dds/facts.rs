// ==========================================
// 结算数据仓库 - 事实构建
// ==========================================
// fct_product_sales ← bonussystem_events (bonus_transaction)，游标 (event_ts, event id)
// fct_deliveries    ← deliverysystem_deliveries，游标 (stg id)
// 红线: 引用未就绪时截断批次，不得写入错误外键
// ==========================================

use rusqlite::Connection;

use crate::domain::fact::{FctDelivery, FctProductSale};
use crate::domain::payload::{BonusTransaction, DeliveryDoc};
use crate::domain::types::EVENT_TYPE_BONUS_TRANSACTION;
use crate::domain::workflow::WorkflowCursor;
use crate::engine::error::PipelineResult;
use crate::engine::task::{BatchOutcome, MissingReference, TaskId};
use crate::engine::transform::{parse_payload, BatchBuilder};
use crate::repository::{DimensionRepository, FactRepository, ScdRepository, StagingRepository};
use crate::validation::check_rules::{check_delivery, check_product_sale, ensure_clean};

// ==========================================
// fct_product_sales
// ==========================================
pub struct ProductSalesBuilder {
    batch_limit: usize,
}

impl ProductSalesBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }

    /// 一个积分事件的全部商品行（任一引用缺失则整事件不写）
    fn resolve(
        &self,
        dims: &DimensionRepository<'_>,
        scd: &ScdRepository<'_>,
        tx: BonusTransaction,
    ) -> PipelineResult<Result<Vec<FctProductSale>, MissingReference>> {
        let Some((order, order_ts)) = dims.find_order(&tx.order_id)? else {
            return Ok(Err(MissingReference::new("dm_orders", tx.order_id)));
        };
        let Some(order_id) = order.id else {
            return Ok(Err(MissingReference::new("dm_orders", tx.order_id)));
        };

        let mut sales = Vec::with_capacity(tx.product_payments.len());
        for payment in tx.product_payments {
            let Some(product) = scd.product_as_of(&payment.product_id, &order_ts)? else {
                return Ok(Err(MissingReference::new("dm_products", payment.product_id)));
            };
            sales.push(FctProductSale {
                product_id: product.id,
                order_id,
                count: payment.quantity,
                price: payment.price,
                total_sum: payment.price * payment.quantity as f64,
                bonus_payment: payment.bonus_payment,
                bonus_grant: payment.bonus_grant,
            });
        }
        Ok(Ok(sales))
    }
}

impl BatchBuilder for ProductSalesBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::FctProductSales
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let events = StagingRepository::new(conn).list_events_after(
            cursor,
            Some(EVENT_TYPE_BONUS_TRANSACTION),
            self.batch_limit,
        )?;
        let dims = DimensionRepository::new(conn);
        let scd = ScdRepository::new(conn);
        let facts = FactRepository::new(conn);
        let workflow = self.task_id().workflow_key();

        let mut outcome = BatchOutcome {
            read: events.len(),
            ..BatchOutcome::default()
        };
        for event in &events {
            let tx: BonusTransaction =
                parse_payload(self.task_id(), &event.id.to_string(), &event.event_value)?;
            let sales = match self.resolve(&dims, &scd, tx)? {
                Ok(sales) => sales,
                Err(missing) => {
                    outcome.deferred = Some(missing);
                    break;
                }
            };
            for sale in &sales {
                ensure_clean(workflow, check_product_sale(sale))?;
                facts.upsert_product_sale(sale)?;
            }
            outcome.rows += sales.len();
            outcome.cursor = Some(WorkflowCursor::at_ts_id(event.event_ts, event.id));
        }
        Ok(outcome)
    }
}

// ==========================================
// fct_deliveries
// ==========================================
pub struct DeliveriesBuilder {
    batch_limit: usize,
}

impl DeliveriesBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }
}

impl BatchBuilder for DeliveriesBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::FctDeliveries
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let rows = StagingRepository::new(conn)
            .list_deliveries_after_id(cursor.last_loaded_id.unwrap_or(0), self.batch_limit)?;
        let dims = DimensionRepository::new(conn);
        let facts = FactRepository::new(conn);
        let workflow = self.task_id().workflow_key();

        let mut outcome = BatchOutcome {
            read: rows.len(),
            ..BatchOutcome::default()
        };
        for row in &rows {
            let doc: DeliveryDoc =
                parse_payload(self.task_id(), &row.record.delivery_id, &row.record.delivery_value)?;

            let order_id = match dims.find_order(&doc.order_id)? {
                Some((order, _)) => order.id,
                None => None,
            };
            let Some(order_id) = order_id else {
                outcome.deferred = Some(MissingReference::new("dm_orders", doc.order_id));
                break;
            };
            let Some(courier_id) = dims.find_courier_id(&doc.courier_id)? else {
                outcome.deferred = Some(MissingReference::new("dm_couriers", doc.courier_id));
                break;
            };

            let delivery = FctDelivery {
                order_id,
                courier_id,
                address: doc.address,
                rate: doc.rate,
                tip_sum: doc.tip_sum,
                sum: doc.sum,
            };
            ensure_clean(workflow, check_delivery(&delivery))?;
            facts.upsert_delivery(&delivery)?;
            outcome.rows += 1;
            outcome.cursor = Some(WorkflowCursor::at_id(row.id));
        }
        Ok(outcome)
    }
}
