// ==========================================
// 结算数据仓库 - 集市层 (cdm) 模型
// ==========================================
// 对齐: sql/cdm/*.sql
// 说明: 集市只保存业务键（不引用 dds 代理键）
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// SettlementReportRow - 餐厅日结算
// ==========================================
// 汇总键: (settlement_date, restaurant_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReportRow {
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub settlement_date: NaiveDate,
    pub orders_count: i64,
    pub orders_total_sum: f64,
    pub orders_bonus_payment_sum: f64,
    pub orders_bonus_granted_sum: f64,
    pub order_processing_fee: f64,
    pub restaurant_reward_sum: f64,
}

// ==========================================
// CourierLedgerRow - 快递员月结算
// ==========================================
// 汇总键: (courier_id, settlement_year, settlement_month)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierLedgerRow {
    pub courier_id: String,
    pub courier_name: String,
    pub settlement_year: i32,
    pub settlement_month: u32,
    pub orders_count: i64,
    pub orders_total_sum: f64,
    pub rate_avg: f64,
    pub order_processing_fee: f64,
    pub courier_order_sum: f64,
    pub courier_tips_sum: f64,
    pub courier_reward_sum: f64,
}
