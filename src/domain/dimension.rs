// ==========================================
// 结算数据仓库 - 明细层 (dds) 维度模型
// ==========================================
// 对齐: sql/dds/001_dimensions.sql, sql/dds/002_dm_orders.sql
// 红线: dm_restaurants / dm_products 同一业务键的有效区间不得重叠
// ==========================================

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::types::{round_money, scd_open_end};

// ==========================================
// 非版本化维度
// ==========================================

/// dds.dm_users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmUser {
    pub id: Option<i64>, // 代理键（写入前为 None）
    pub user_id: String,
    pub user_name: String,
    pub user_login: String,
}

/// dds.dm_couriers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmCourier {
    pub id: Option<i64>,
    pub courier_id: String,
    pub courier_name: String,
}

// ==========================================
// 缓慢变化维度 (SCD2)
// ==========================================

/// 版本化维度的一行: 代理键 + 业务键 + 跟踪属性 + 有效区间 [active_from, active_to)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScdVersion<A> {
    pub id: i64,
    pub natural_key: String,
    pub attrs: A,
    pub active_from: NaiveDateTime,
    pub active_to: NaiveDateTime,
}

impl<A> ScdVersion<A> {
    /// 是否为开放版本（active_to = 哨兵值）
    pub fn is_open(&self) -> bool {
        self.active_to == scd_open_end()
    }

    /// ts 是否落在 [active_from, active_to)
    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        self.active_from <= *ts && *ts < self.active_to
    }
}

/// dm_restaurants 的跟踪属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestaurantAttrs {
    pub restaurant_name: String,
}

/// dm_products 的跟踪属性
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductAttrs {
    pub restaurant_id: i64, // dm_restaurants 版本代理键
    pub product_name: String,
    pub product_price: f64,
}

// 价格按分比较，避免浮点尾差造成虚假版本
impl PartialEq for ProductAttrs {
    fn eq(&self, other: &Self) -> bool {
        self.restaurant_id == other.restaurant_id
            && self.product_name == other.product_name
            && round_money(self.product_price) == round_money(other.product_price)
    }
}

pub type DmRestaurant = ScdVersion<RestaurantAttrs>;
pub type DmProduct = ScdVersion<ProductAttrs>;

// ==========================================
// 时间维度
// ==========================================

/// dds.dm_timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmTimestamp {
    pub id: Option<i64>,
    pub ts: NaiveDateTime,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub time: NaiveTime,
    pub date: NaiveDate,
}

impl DmTimestamp {
    /// 由时间戳拆分年/月/日/时间/日期
    pub fn from_ts(ts: NaiveDateTime) -> Self {
        let time = NaiveTime::from_hms_opt(ts.hour(), ts.minute(), ts.second()).unwrap_or(ts.time());
        Self {
            id: None,
            ts,
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            time,
            date: ts.date(),
        }
    }
}

// ==========================================
// 订单
// ==========================================

/// dds.dm_orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmOrder {
    pub id: Option<i64>,
    pub user_id: i64,       // → dm_users.id
    pub restaurant_id: i64, // → dm_restaurants.id（下单时刻有效版本）
    pub timestamp_id: i64,  // → dm_timestamps.id
    pub order_key: String,
    pub order_status: String,
}
