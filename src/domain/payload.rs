// ==========================================
// 结算数据仓库 - 源文档载荷结构
// ==========================================
// 职责: stg 层 JSON 原文 (object_value / delivery_value / event_value) 的解析形状
// 说明: 仅声明 dds 构建用到的字段，其余字段忽略
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer};

use super::types::parse_ts;

fn de_ts<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
    let text = String::deserialize(d)?;
    parse_ts(&text).ok_or_else(|| serde::de::Error::custom(format!("无效时间戳: {}", text)))
}

/// 引用对象 `{ "id": "..." }`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectRef {
    pub id: String,
}

/// ordersystem_restaurants.object_value
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RestaurantDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
}

/// 菜单项
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MenuItem {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub price: f64,
}

/// ordersystem_users.object_value
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub login: String,
}

/// ordersystem_orders.object_value
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub final_status: String,
    pub user: ObjectRef,
    pub restaurant: ObjectRef,
    #[serde(deserialize_with = "de_ts")]
    pub date: NaiveDateTime,
}

/// bonussystem_events.event_value（event_type = bonus_transaction）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BonusTransaction {
    pub order_id: String,
    #[serde(default)]
    pub product_payments: Vec<ProductPayment>,
}

/// 单商品支付明细
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductPayment {
    pub product_id: String,
    pub price: f64,
    pub quantity: i64,
    #[serde(default)]
    pub bonus_payment: f64,
    #[serde(default)]
    pub bonus_grant: f64,
}

/// deliverysystem_deliveries.delivery_value
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryDoc {
    pub delivery_id: String,
    pub order_id: String,
    pub courier_id: String,
    #[serde(default)]
    pub address: String,
    pub rate: i64,
    pub sum: f64,
    #[serde(default)]
    pub tip_sum: f64,
}
