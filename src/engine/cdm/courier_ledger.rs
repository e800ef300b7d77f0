// ==========================================
// 结算数据仓库 - 快递员月度账本
// ==========================================
// 输入: 配送事实，按 (快递员, 年, 月) 汇总
// 分档 (按月均评分): <4 → 5% 保底 100; <4.5 → 7% 保底 150;
//                   <4.9 → 8% 保底 175; 其余 → 10% 保底 200
// 公式: 单笔所得 = max(订单金额 × 比例, 保底)
//       快递员收益 = Σ 单笔所得 + 小费 × 95%
// 游标: 已结算的最大月份首日
// ==========================================

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::mart::CourierLedgerRow;
use crate::domain::types::{round_money, round_rate};
use crate::domain::workflow::WorkflowCursor;
use crate::engine::cdm::settlement_report::ORDER_PROCESSING_FEE_RATE;
use crate::engine::error::PipelineResult;
use crate::engine::task::{BatchOutcome, TaskId};
use crate::engine::transform::BatchBuilder;
use crate::repository::{LedgerDeliveryLine, MartRepository};
use crate::validation::check_rules::{check_ledger, ensure_clean};

pub const TIPS_PAYOUT_RATE: f64 = 0.95;

/// 评分分档: (比例, 单笔保底)
pub fn reward_tier(rate_avg: f64) -> (f64, f64) {
    if rate_avg < 4.0 {
        (0.05, 100.0)
    } else if rate_avg < 4.5 {
        (0.07, 150.0)
    } else if rate_avg < 4.9 {
        (0.08, 175.0)
    } else {
        (0.10, 200.0)
    }
}

/// 同一 (快递员, 年, 月) 的配送行 → 账本行
///
/// 调用方保证 lines 非空且属于同一分组
pub fn ledger_row(lines: &[LedgerDeliveryLine]) -> Option<CourierLedgerRow> {
    let first = lines.first()?;
    let n = lines.len() as f64;
    let rate_avg = lines.iter().map(|l| l.rate as f64).sum::<f64>() / n;
    let (percent, floor) = reward_tier(rate_avg);

    let orders: BTreeSet<i64> = lines.iter().map(|l| l.order_id).collect();
    let total: f64 = lines.iter().map(|l| l.sum).sum();
    let tips: f64 = lines.iter().map(|l| l.tip_sum).sum();
    let order_sum: f64 = lines.iter().map(|l| (l.sum * percent).max(floor)).sum();

    Some(CourierLedgerRow {
        courier_id: first.courier_id.clone(),
        courier_name: first.courier_name.clone(),
        settlement_year: first.year,
        settlement_month: first.month,
        orders_count: orders.len() as i64,
        orders_total_sum: round_money(total),
        rate_avg: round_rate(rate_avg),
        order_processing_fee: round_money(total * ORDER_PROCESSING_FEE_RATE),
        courier_order_sum: round_money(order_sum),
        courier_tips_sum: round_money(tips),
        courier_reward_sum: round_money(order_sum + tips * TIPS_PAYOUT_RATE),
    })
}

/// 从游标所在周期起整体重算，一个批次完成
#[derive(Debug, Default)]
pub struct CourierLedgerBuilder;

impl CourierLedgerBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl BatchBuilder for CourierLedgerBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::CourierLedger
    }

    fn batch_limit(&self) -> usize {
        usize::MAX
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        use chrono::Datelike;

        let from_period = cursor
            .last_loaded_ts
            .map(|ts| ts.year() * 100 + ts.month() as i32)
            .unwrap_or(0);
        let repo = MartRepository::new(conn);
        let workflow = self.task_id().workflow_key();

        let lines = repo.ledger_lines_since(from_period)?;
        let mut groups: BTreeMap<(String, i32, u32), Vec<LedgerDeliveryLine>> = BTreeMap::new();
        for line in &lines {
            groups
                .entry((line.courier_id.clone(), line.year, line.month))
                .or_default()
                .push(line.clone());
        }
        let rows: Vec<CourierLedgerRow> = groups.values().filter_map(|g| ledger_row(g)).collect();

        let violations = rows.iter().flat_map(check_ledger).collect();
        ensure_clean(workflow, violations)?;

        for row in &rows {
            repo.upsert_ledger(row)?;
        }

        let cursor = rows
            .iter()
            .map(|r| (r.settlement_year, r.settlement_month))
            .max()
            .and_then(|(y, m)| NaiveDate::from_ymd_opt(y, m, 1))
            .map(|d| WorkflowCursor::at_ts(d.and_time(NaiveTime::MIN)));

        Ok(BatchOutcome {
            rows: rows.len(),
            read: lines.len(),
            cursor,
            deferred: None,
            exhausted: true,
        })
    }
}
