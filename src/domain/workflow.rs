// ==========================================
// 结算数据仓库 - 工作流游标（水位）
// ==========================================
// 存储: <ns>.srv_wf_settings.workflow_settings (JSON)
// 红线: 游标只能与其覆盖的数据在同一事务内推进
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// WorkflowCursor - 增量加载位置
// ==========================================
// 排序: (ts, id, key) 字典序，None 排在任何值之前
// 规则: 记录位置严格大于游标时才会被加载
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowCursor {
    #[serde(default, with = "ts_option", skip_serializing_if = "Option::is_none")]
    pub last_loaded_ts: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_loaded_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_loaded_key: Option<String>,
}

impl WorkflowCursor {
    /// 空游标（从头加载）
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.last_loaded_ts.is_none() && self.last_loaded_id.is_none() && self.last_loaded_key.is_none()
    }

    /// (时间戳, 业务键) 位置
    pub fn at_ts_key(ts: NaiveDateTime, key: impl Into<String>) -> Self {
        Self {
            last_loaded_ts: Some(ts),
            last_loaded_id: None,
            last_loaded_key: Some(key.into()),
        }
    }

    /// (时间戳, 数值 id) 位置
    pub fn at_ts_id(ts: NaiveDateTime, id: i64) -> Self {
        Self {
            last_loaded_ts: Some(ts),
            last_loaded_id: Some(id),
            last_loaded_key: None,
        }
    }

    /// 纯时间戳位置
    pub fn at_ts(ts: NaiveDateTime) -> Self {
        Self {
            last_loaded_ts: Some(ts),
            ..Self::default()
        }
    }

    /// 纯数值 id 位置
    pub fn at_id(id: i64) -> Self {
        Self {
            last_loaded_id: Some(id),
            ..Self::default()
        }
    }

    /// 纯业务键位置
    pub fn at_key(key: impl Into<String>) -> Self {
        Self {
            last_loaded_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// 位置是否在游标之后
    pub fn admits(&self, position: &WorkflowCursor) -> bool {
        position > self
    }

    /// 日志用的紧凑表示
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "<empty>".to_string();
        }
        let mut parts = Vec::new();
        if let Some(ts) = &self.last_loaded_ts {
            parts.push(format!("ts={}", super::types::format_ts(ts)));
        }
        if let Some(id) = self.last_loaded_id {
            parts.push(format!("id={}", id));
        }
        if let Some(key) = &self.last_loaded_key {
            parts.push(format!("key={}", key));
        }
        parts.join(",")
    }
}

// 时间戳以 "%Y-%m-%d %H:%M:%S" 文本序列化，与表内存储格式一致
mod ts_option {
    use crate::domain::types::{format_ts, parse_ts};
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => s.serialize_str(&format_ts(ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(text) => parse_ts(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("无效时间戳: {}", text))),
        }
    }
}

// ==========================================
// WorkflowSetting - srv_wf_settings 行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSetting {
    pub workflow_key: String,
    pub workflow_settings: WorkflowCursor,
}

impl WorkflowSetting {
    pub fn new(workflow_key: impl Into<String>, cursor: WorkflowCursor) -> Self {
        Self {
            workflow_key: workflow_key.into(),
            workflow_settings: cursor,
        }
    }
}

// ==========================================
// 工作流键常量（每个加载任务一个）
// ==========================================
pub mod workflow_keys {
    // ----- stg -----
    pub const ORDERSYSTEM_RESTAURANTS: &str = "ordersystem_restaurants_origin_to_stg_workflow";
    pub const ORDERSYSTEM_USERS: &str = "ordersystem_users_origin_to_stg_workflow";
    pub const ORDERSYSTEM_ORDERS: &str = "ordersystem_orders_origin_to_stg_workflow";
    pub const DELIVERYSYSTEM_RESTAURANTS: &str = "deliverysystem_restaurants_origin_to_stg_workflow";
    pub const DELIVERYSYSTEM_COURIERS: &str = "deliverysystem_couriers_origin_to_stg_workflow";
    pub const DELIVERYSYSTEM_DELIVERIES: &str = "deliverysystem_deliveries_origin_to_stg_workflow";
    pub const BONUSSYSTEM_RANKS: &str = "bonussystem_ranks_origin_to_stg_workflow";
    pub const BONUSSYSTEM_EVENTS: &str = "bonussystem_events_origin_to_stg_workflow";

    // ----- dds -----
    pub const DM_USERS: &str = "users_stg_to_dds_workflow";
    pub const DM_COURIERS: &str = "couriers_stg_to_dds_workflow";
    pub const DM_RESTAURANTS: &str = "restaurants_stg_to_dds_workflow";
    pub const DM_PRODUCTS: &str = "products_stg_to_dds_workflow";
    pub const DM_TIMESTAMPS: &str = "timestamps_stg_to_dds_workflow";
    pub const DM_ORDERS: &str = "orders_stg_to_dds_workflow";
    pub const FCT_PRODUCT_SALES: &str = "product_sales_stg_to_dds_workflow";
    pub const FCT_DELIVERIES: &str = "courier_deliveries_stg_to_dds_workflow";

    // ----- cdm -----
    pub const SETTLEMENT_REPORT: &str = "settlement_report_dds_to_cdm_workflow";
    pub const COURIER_LEDGER: &str = "courier_ledger_dds_to_cdm_workflow";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::parse_ts;

    #[test]
    fn test_absent_fields_sort_first() {
        let empty = WorkflowCursor::empty();
        let ts = parse_ts("2024-01-01 00:00:00").unwrap();
        let with_ts = WorkflowCursor::at_ts(ts);
        let with_key = WorkflowCursor::at_ts_key(ts, "A");

        assert!(empty < with_ts);
        assert!(with_ts < with_key);
        assert!(with_ts.admits(&with_key));
        assert!(!with_key.admits(&with_key));
    }

    #[test]
    fn test_ts_dominates_key() {
        let early = WorkflowCursor::at_ts_key(parse_ts("2024-01-01 00:00:00").unwrap(), "Z");
        let late = WorkflowCursor::at_ts_key(parse_ts("2024-01-02 00:00:00").unwrap(), "A");
        assert!(early < late);
    }

    #[test]
    fn test_json_shape() {
        let cursor = WorkflowCursor::at_ts_id(parse_ts("2024-06-01 10:00:00").unwrap(), 42);
        let json = serde_json::to_string(&cursor).unwrap();
        assert_eq!(
            json,
            r#"{"last_loaded_ts":"2024-06-01 10:00:00","last_loaded_id":42}"#
        );

        let back: WorkflowCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cursor);

        let empty: WorkflowCursor = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
