// ==========================================
// 结算数据仓库 - 边界校验规则
// ==========================================
// 职责: 写入前复核表级 CHECK 约束（非负 / 区间）
// 红线: 违规即拒绝，不做截断或修正
// ==========================================

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::fmt;

use crate::domain::dimension::{DmTimestamp, ProductAttrs};
use crate::domain::fact::{FctDelivery, FctProductSale};
use crate::domain::mart::{CourierLedgerRow, SettlementReportRow};
use crate::domain::types::{format_ts, scd_open_end};
use crate::engine::error::{PipelineError, PipelineResult};

pub const MIN_YEAR: i32 = 2022;
pub const MAX_YEAR_EXCLUSIVE: i32 = 2500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckViolation {
    pub table: &'static str,
    pub field: &'static str,
    pub value: String,
    pub rule: &'static str,
}

impl fmt::Display for CheckViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}={} ({})", self.table, self.field, self.value, self.rule)
    }
}

// ===== 规则原语 =====

struct Checker {
    table: &'static str,
    violations: Vec<CheckViolation>,
}

impl Checker {
    fn new(table: &'static str) -> Self {
        Self {
            table,
            violations: Vec::new(),
        }
    }

    fn push(&mut self, field: &'static str, value: impl ToString, rule: &'static str) {
        self.violations.push(CheckViolation {
            table: self.table,
            field,
            value: value.to_string(),
            rule,
        });
    }

    fn non_negative(&mut self, field: &'static str, value: f64) -> &mut Self {
        // NaN 同样拒绝
        if !(value >= 0.0) {
            self.push(field, value, ">= 0");
        }
        self
    }

    fn non_negative_int(&mut self, field: &'static str, value: i64) -> &mut Self {
        if value < 0 {
            self.push(field, value, ">= 0");
        }
        self
    }

    fn int_range(&mut self, field: &'static str, value: i64, min: i64, max: i64, rule: &'static str) -> &mut Self {
        if value < min || value > max {
            self.push(field, value, rule);
        }
        self
    }

    fn year(&mut self, field: &'static str, year: i32) -> &mut Self {
        if !(MIN_YEAR..MAX_YEAR_EXCLUSIVE).contains(&year) {
            self.push(field, year, "[2022, 2500)");
        }
        self
    }

    fn finish(&mut self) -> Vec<CheckViolation> {
        std::mem::take(&mut self.violations)
    }
}

// ===== dds =====

pub fn check_product(product_id: &str, attrs: &ProductAttrs) -> Vec<CheckViolation> {
    let mut c = Checker::new("dm_products");
    c.non_negative("product_price", attrs.product_price);
    if product_id.is_empty() {
        c.push("product_id", "''", "非空");
    }
    c.finish()
}

/// 版本生效时刻必须早于开放区间哨兵值
pub fn check_scd_effective(table: &'static str, effective: &NaiveDateTime) -> Vec<CheckViolation> {
    let mut c = Checker::new(table);
    if *effective >= scd_open_end() {
        c.push("active_from", format_ts(effective), "< 2500-01-01 00:00:00");
    }
    c.finish()
}

pub fn check_timestamp(dm: &DmTimestamp) -> Vec<CheckViolation> {
    let mut c = Checker::new("dm_timestamps");
    c.year("year", dm.year)
        .int_range("month", dm.month as i64, 1, 12, "[1, 12]")
        .int_range("day", dm.day as i64, 1, 31, "[1, 31]");
    c.finish()
}

pub fn check_product_sale(sale: &FctProductSale) -> Vec<CheckViolation> {
    let mut c = Checker::new("fct_product_sales");
    c.non_negative_int("count", sale.count)
        .non_negative("price", sale.price)
        .non_negative("total_sum", sale.total_sum)
        .non_negative("bonus_payment", sale.bonus_payment)
        .non_negative("bonus_grant", sale.bonus_grant);
    c.finish()
}

pub fn check_delivery(delivery: &FctDelivery) -> Vec<CheckViolation> {
    let mut c = Checker::new("fct_deliveries");
    c.int_range("rate", delivery.rate, 1, 5, "[1, 5]")
        .non_negative("tip_sum", delivery.tip_sum)
        .non_negative("sum", delivery.sum);
    c.finish()
}

// ===== cdm =====

pub fn check_settlement(row: &SettlementReportRow) -> Vec<CheckViolation> {
    let mut c = Checker::new("dm_settlement_report");
    if !settlement_date_in_range(&row.settlement_date) {
        c.push("settlement_date", row.settlement_date, "[2022-01-01, 2500-01-01)");
    }
    c.non_negative_int("orders_count", row.orders_count)
        .non_negative("orders_total_sum", row.orders_total_sum)
        .non_negative("orders_bonus_payment_sum", row.orders_bonus_payment_sum)
        .non_negative("orders_bonus_granted_sum", row.orders_bonus_granted_sum)
        .non_negative("order_processing_fee", row.order_processing_fee)
        .non_negative("restaurant_reward_sum", row.restaurant_reward_sum);
    c.finish()
}

pub fn check_ledger(row: &CourierLedgerRow) -> Vec<CheckViolation> {
    let mut c = Checker::new("dm_courier_ledger");
    c.year("settlement_year", row.settlement_year)
        .int_range("settlement_month", row.settlement_month as i64, 1, 12, "[1, 12]")
        .non_negative_int("orders_count", row.orders_count)
        .non_negative("orders_total_sum", row.orders_total_sum)
        .non_negative("order_processing_fee", row.order_processing_fee)
        .non_negative("courier_order_sum", row.courier_order_sum)
        .non_negative("courier_tips_sum", row.courier_tips_sum)
        .non_negative("courier_reward_sum", row.courier_reward_sum);
    if !(row.rate_avg >= 1.0) {
        c.push("rate_avg", row.rate_avg, ">= 1");
    }
    c.finish()
}

fn settlement_date_in_range(date: &NaiveDate) -> bool {
    (MIN_YEAR..MAX_YEAR_EXCLUSIVE).contains(&date.year())
}

/// 有违规则转为约束违反错误（批次回滚）
pub fn ensure_clean(workflow: &str, violations: Vec<CheckViolation>) -> PipelineResult<()> {
    if violations.is_empty() {
        return Ok(());
    }
    let message = violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    tracing::error!(workflow, violations = violations.len(), %message, "写入前校验失败");
    Err(PipelineError::ConstraintViolation {
        workflow: workflow.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::parse_ts;

    fn ledger() -> CourierLedgerRow {
        CourierLedgerRow {
            courier_id: "C1".into(),
            courier_name: "Ann".into(),
            settlement_year: 2024,
            settlement_month: 6,
            orders_count: 2,
            orders_total_sum: 1000.0,
            rate_avg: 4.5,
            order_processing_fee: 250.0,
            courier_order_sum: 300.0,
            courier_tips_sum: 50.0,
            courier_reward_sum: 347.5,
        }
    }

    #[test]
    fn test_clean_ledger_passes() {
        assert!(check_ledger(&ledger()).is_empty());
    }

    #[test]
    fn test_negative_and_out_of_range_values_are_reported() {
        let mut row = ledger();
        row.courier_reward_sum = -1.0;
        row.rate_avg = 0.5;
        row.settlement_month = 13;
        let fields: Vec<_> = check_ledger(&row).iter().map(|v| v.field).collect();
        assert_eq!(fields, vec!["settlement_month", "courier_reward_sum", "rate_avg"]);

        let err = ensure_clean("courier_ledger_dds_to_cdm_workflow", check_ledger(&row)).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_delivery_rate_bounds() {
        let delivery = FctDelivery {
            order_id: 1,
            courier_id: 1,
            address: "Main st".into(),
            rate: 6,
            tip_sum: 0.0,
            sum: 100.0,
        };
        assert_eq!(check_delivery(&delivery)[0].field, "rate");
    }

    #[test]
    fn test_timestamp_year_lower_bound() {
        let dm = DmTimestamp::from_ts(parse_ts("2021-12-31 23:59:59").unwrap());
        assert_eq!(check_timestamp(&dm)[0].field, "year");
    }

    #[test]
    fn test_nan_is_rejected() {
        let sale = FctProductSale {
            product_id: 1,
            order_id: 1,
            count: 1,
            price: f64::NAN,
            total_sum: 0.0,
            bonus_payment: 0.0,
            bonus_grant: 0.0,
        };
        assert_eq!(check_product_sale(&sale).len(), 1);
    }
}
