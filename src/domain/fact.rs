// ==========================================
// 结算数据仓库 - 明细层 (dds) 事实模型
// ==========================================
// 对齐: sql/dds/003_facts.sql
// ==========================================

use serde::{Deserialize, Serialize};

/// dds.fct_product_sales（一单一商品一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FctProductSale {
    pub product_id: i64, // → dm_products.id
    pub order_id: i64,   // → dm_orders.id
    pub count: i64,
    pub price: f64,
    pub total_sum: f64, // price × count
    pub bonus_payment: f64,
    pub bonus_grant: f64,
}

/// dds.fct_deliveries（一单一快递员一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FctDelivery {
    pub order_id: i64,   // → dm_orders.id
    pub courier_id: i64, // → dm_couriers.id
    pub address: String,
    pub rate: i64, // 1..=5
    pub tip_sum: f64,
    pub sum: f64,
}
