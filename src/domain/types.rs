// ==========================================
// 结算数据仓库 - 领域类型定义
// ==========================================
// 职责: 分层枚举、时间格式、SCD 哨兵值等公共类型
// ==========================================

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 时间戳存储格式（TEXT，字典序即时间序）
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 日期存储格式
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// 时间存储格式
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// 订单完成状态（结算报表只统计该状态）
pub const ORDER_STATUS_CLOSED: &str = "CLOSED";

/// 积分交易事件类型（商品销售事实来源）
pub const EVENT_TYPE_BONUS_TRANSACTION: &str = "bonus_transaction";

// ==========================================
// 数据分层 (Layer)
// ==========================================
// 数据只沿 stg → dds → cdm 单向流动
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Stg, // 贴源层
    Dds, // 明细层
    Cdm, // 集市层
}

impl Layer {
    /// 全部分层（按执行顺序）
    pub const ALL: [Layer; 3] = [Layer::Stg, Layer::Dds, Layer::Cdm];

    /// 对应的 SQLite 命名空间
    pub fn namespace(&self) -> &'static str {
        match self {
            Layer::Stg => "stg",
            Layer::Dds => "dds",
            Layer::Cdm => "cdm",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.namespace())
    }
}

impl FromStr for Layer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stg" => Ok(Layer::Stg),
            "dds" => Ok(Layer::Dds),
            "cdm" => Ok(Layer::Cdm),
            other => Err(format!("未知分层: {}", other)),
        }
    }
}

// ==========================================
// 时间工具
// ==========================================

/// SCD 开放区间哨兵值（2500-01-01 00:00:00）
///
/// 等于时间维度年份上界（不含），任何合法时刻都严格早于它
pub fn scd_open_end() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2500, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MAX)
}

/// 截断到整秒（存储列与游标都只保留到秒）
pub fn truncate_ts(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// 格式化时间戳
pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// 格式化日期
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// 格式化时间
pub fn format_time(time: &NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// 解析时间戳
///
/// 兼容: `2024-06-01 10:00:00` / `2024-06-01T10:00:00` / 带小数秒 / 纯日期
/// 小数秒一律截断
pub fn parse_ts(value: &str) -> Option<NaiveDateTime> {
    let v = value.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];
    for fmt in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(truncate_ts(ts));
        }
    }
    NaiveDate::parse_from_str(v, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// 解析日期
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

/// 金额保留两位小数（对齐 NUMERIC(14, 2)）
pub fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 比率保留五位小数（对齐 NUMERIC(19, 5)）
pub fn round_rate(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}
