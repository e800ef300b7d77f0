// ==========================================
// 结算数据仓库 - 贴源层 (stg) 领域模型
// ==========================================
// 职责: 三个源系统导出记录的强类型表示
// 对齐: sql/stg/*.sql
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::types::truncate_ts;
use super::workflow::{workflow_keys, WorkflowCursor};

// ==========================================
// StagingSource - 贴源表枚举
// ==========================================
// 每个变体对应一张 stg 表和一个抽取工作流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingSource {
    OrdersystemRestaurants,
    OrdersystemUsers,
    OrdersystemOrders,
    DeliverysystemRestaurants,
    DeliverysystemCouriers,
    DeliverysystemDeliveries,
    BonussystemRanks,
    BonussystemEvents,
}

impl StagingSource {
    pub const ALL: [StagingSource; 8] = [
        StagingSource::OrdersystemRestaurants,
        StagingSource::OrdersystemUsers,
        StagingSource::OrdersystemOrders,
        StagingSource::DeliverysystemRestaurants,
        StagingSource::DeliverysystemCouriers,
        StagingSource::DeliverysystemDeliveries,
        StagingSource::BonussystemRanks,
        StagingSource::BonussystemEvents,
    ];

    /// stg 表名（不含命名空间）
    pub fn table(&self) -> &'static str {
        match self {
            StagingSource::OrdersystemRestaurants => "ordersystem_restaurants",
            StagingSource::OrdersystemUsers => "ordersystem_users",
            StagingSource::OrdersystemOrders => "ordersystem_orders",
            StagingSource::DeliverysystemRestaurants => "deliverysystem_restaurants",
            StagingSource::DeliverysystemCouriers => "deliverysystem_couriers",
            StagingSource::DeliverysystemDeliveries => "deliverysystem_deliveries",
            StagingSource::BonussystemRanks => "bonussystem_ranks",
            StagingSource::BonussystemEvents => "bonussystem_events",
        }
    }

    pub fn workflow_key(&self) -> &'static str {
        match self {
            StagingSource::OrdersystemRestaurants => workflow_keys::ORDERSYSTEM_RESTAURANTS,
            StagingSource::OrdersystemUsers => workflow_keys::ORDERSYSTEM_USERS,
            StagingSource::OrdersystemOrders => workflow_keys::ORDERSYSTEM_ORDERS,
            StagingSource::DeliverysystemRestaurants => workflow_keys::DELIVERYSYSTEM_RESTAURANTS,
            StagingSource::DeliverysystemCouriers => workflow_keys::DELIVERYSYSTEM_COURIERS,
            StagingSource::DeliverysystemDeliveries => workflow_keys::DELIVERYSYSTEM_DELIVERIES,
            StagingSource::BonussystemRanks => workflow_keys::BONUSSYSTEM_RANKS,
            StagingSource::BonussystemEvents => workflow_keys::BONUSSYSTEM_EVENTS,
        }
    }

    /// 导出文件名
    pub fn export_file(&self) -> &'static str {
        match self {
            StagingSource::OrdersystemRestaurants => "ordersystem_restaurants.jsonl",
            StagingSource::OrdersystemUsers => "ordersystem_users.jsonl",
            StagingSource::OrdersystemOrders => "ordersystem_orders.jsonl",
            StagingSource::DeliverysystemRestaurants => "deliverysystem_restaurants.jsonl",
            StagingSource::DeliverysystemCouriers => "deliverysystem_couriers.jsonl",
            StagingSource::DeliverysystemDeliveries => "deliverysystem_deliveries.jsonl",
            StagingSource::BonussystemRanks => "bonussystem_ranks.csv",
            StagingSource::BonussystemEvents => "bonussystem_events.csv",
        }
    }

    /// 游标是否以时间戳打头（可被 initial_load_from 限定下界）
    pub fn is_time_ordered(&self) -> bool {
        matches!(
            self,
            StagingSource::OrdersystemRestaurants
                | StagingSource::OrdersystemUsers
                | StagingSource::OrdersystemOrders
                | StagingSource::DeliverysystemDeliveries
                | StagingSource::BonussystemEvents
        )
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.table() == table)
    }
}

// ==========================================
// 贴源记录
// ==========================================

/// 订单子系统文档（restaurants / users / orders）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StgDocument {
    pub object_id: String,
    pub object_value: String, // 源文档 JSON 原文
    pub update_ts: NaiveDateTime,
}

/// 配送子系统命名对象（restaurants / couriers）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StgNamedObject {
    pub object_id: String,
    pub name: String,
}

/// 配送记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StgDelivery {
    pub delivery_id: String,
    pub delivery_ts: NaiveDateTime,
    pub delivery_value: String, // 源文档 JSON 原文
}

/// 积分等级
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusRank {
    pub id: i64,
    pub name: String,
    pub bonus_percent: f64,
    pub min_payment_threshold: f64,
}

/// 积分事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusEvent {
    pub id: i64,
    pub event_ts: NaiveDateTime,
    pub event_type: String,
    pub event_value: String, // 事件 JSON 原文
}

// ==========================================
// StagedRecord - 待落地记录
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum StagedRecord {
    Document(StgDocument),
    Named(StgNamedObject),
    Delivery(StgDelivery),
    Rank(BonusRank),
    Event(BonusEvent),
}

impl StagedRecord {
    /// 记录在所属工作流中的位置
    pub fn position(&self) -> WorkflowCursor {
        match self {
            StagedRecord::Document(d) => WorkflowCursor::at_ts_key(d.update_ts, d.object_id.clone()),
            StagedRecord::Named(n) => WorkflowCursor::at_key(n.object_id.clone()),
            StagedRecord::Delivery(d) => {
                WorkflowCursor::at_ts_key(d.delivery_ts, d.delivery_id.clone())
            }
            StagedRecord::Rank(r) => WorkflowCursor::at_id(r.id),
            StagedRecord::Event(e) => WorkflowCursor::at_ts_id(e.event_ts, e.id),
        }
    }

    /// 时间戳截断到整秒，与落地后的列值和游标一致
    pub fn normalized(self) -> Self {
        match self {
            StagedRecord::Document(d) => StagedRecord::Document(StgDocument {
                update_ts: truncate_ts(d.update_ts),
                ..d
            }),
            StagedRecord::Delivery(d) => StagedRecord::Delivery(StgDelivery {
                delivery_ts: truncate_ts(d.delivery_ts),
                ..d
            }),
            StagedRecord::Event(e) => StagedRecord::Event(BonusEvent {
                event_ts: truncate_ts(e.event_ts),
                ..e
            }),
            other => other,
        }
    }

    /// 源系统标识（日志用）
    pub fn identifier(&self) -> String {
        match self {
            StagedRecord::Document(d) => d.object_id.clone(),
            StagedRecord::Named(n) => n.object_id.clone(),
            StagedRecord::Delivery(d) => d.delivery_id.clone(),
            StagedRecord::Rank(r) => r.id.to_string(),
            StagedRecord::Event(e) => e.id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::parse_ts;

    #[test]
    fn test_every_source_has_distinct_table_and_key() {
        let mut tables: Vec<_> = StagingSource::ALL.iter().map(|s| s.table()).collect();
        let mut keys: Vec<_> = StagingSource::ALL.iter().map(|s| s.workflow_key()).collect();
        tables.sort();
        tables.dedup();
        keys.sort();
        keys.dedup();
        assert_eq!(tables.len(), 8);
        assert_eq!(keys.len(), 8);
        assert_eq!(
            StagingSource::from_table("bonussystem_events"),
            Some(StagingSource::BonussystemEvents)
        );
    }

    #[test]
    fn test_event_position_orders_by_ts_then_id() {
        let ts = parse_ts("2024-06-01 10:00:00").unwrap();
        let a = StagedRecord::Event(BonusEvent {
            id: 9,
            event_ts: ts,
            event_type: "bonus_transaction".into(),
            event_value: "{}".into(),
        });
        let b = StagedRecord::Event(BonusEvent {
            id: 10,
            event_ts: ts,
            event_type: "bonus_transaction".into(),
            event_value: "{}".into(),
        });
        assert!(a.position() < b.position());
    }
}
