// ==========================================
// 结算数据仓库 - 餐厅日结算报表
// ==========================================
// 输入: CLOSED 订单的商品销售，按 (日期, 餐厅) 汇总
// 公式: 手续费 = 订单总额 × 25%
//       餐厅收益 = 订单总额 − 手续费 − 积分抵扣
// 游标: 已结算的最大日期；每次从该日期重算并原地覆盖
// ==========================================

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;

use crate::domain::mart::SettlementReportRow;
use crate::domain::types::round_money;
use crate::domain::workflow::WorkflowCursor;
use crate::engine::error::PipelineResult;
use crate::engine::task::{BatchOutcome, TaskId};
use crate::engine::transform::BatchBuilder;
use crate::repository::{MartRepository, SettlementAggregate};
use crate::validation::check_rules::{check_settlement, ensure_clean};

pub const ORDER_PROCESSING_FEE_RATE: f64 = 0.25;

/// 汇总行 → 报表行
pub fn settlement_row(agg: &SettlementAggregate) -> SettlementReportRow {
    let total = round_money(agg.orders_total_sum);
    let fee = round_money(total * ORDER_PROCESSING_FEE_RATE);
    let bonus_payment = round_money(agg.bonus_payment_sum);
    SettlementReportRow {
        restaurant_id: agg.restaurant_id.clone(),
        restaurant_name: agg.restaurant_name.clone(),
        settlement_date: agg.settlement_date,
        orders_count: agg.orders_count,
        orders_total_sum: total,
        orders_bonus_payment_sum: bonus_payment,
        orders_bonus_granted_sum: round_money(agg.bonus_granted_sum),
        order_processing_fee: fee,
        restaurant_reward_sum: round_money(total - fee - bonus_payment),
    }
}

/// 从游标所在周期起整体重算，一个批次完成
#[derive(Debug, Default)]
pub struct SettlementReportBuilder;

impl SettlementReportBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl BatchBuilder for SettlementReportBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::SettlementReport
    }

    fn batch_limit(&self) -> usize {
        usize::MAX
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let from = cursor
            .last_loaded_ts
            .map(|ts| ts.date())
            .unwrap_or(NaiveDate::MIN);
        let repo = MartRepository::new(conn);
        let workflow = self.task_id().workflow_key();

        let aggregates = repo.aggregate_settlements_since(&from)?;
        let rows: Vec<SettlementReportRow> = aggregates.iter().map(settlement_row).collect();

        // 先整体校验，任一违规整批回滚
        let violations = rows.iter().flat_map(check_settlement).collect();
        ensure_clean(workflow, violations)?;

        for row in &rows {
            repo.upsert_settlement(row)?;
        }

        let cursor = rows
            .iter()
            .map(|r| r.settlement_date)
            .max()
            .map(|date| WorkflowCursor::at_ts(date.and_time(NaiveTime::MIN)));

        Ok(BatchOutcome {
            rows: rows.len(),
            read: aggregates.len(),
            cursor,
            deferred: None,
            exhausted: true,
        })
    }
}
