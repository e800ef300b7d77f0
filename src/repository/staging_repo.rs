// ==========================================
// 结算数据仓库 - 贴源层 (stg) 仓储
// ==========================================
// 写入: 按源系统标识 upsert（重复落地幂等）
// 读取: 按工作流游标分页，供 dds 构建使用
// 红线: Repository 不含业务逻辑
// ==========================================

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::staging::{
    BonusEvent, BonusRank, StagedRecord, StagingSource, StgDelivery, StgDocument, StgNamedObject,
};
use crate::domain::types::{format_ts, parse_ts};
use crate::domain::workflow::WorkflowCursor;
use crate::repository::error::{RepositoryError, RepositoryResult};

/// stg 表中带自增 id 的行（dds 构建按 stg id 推进游标时使用）
#[derive(Debug, Clone, PartialEq)]
pub struct StgRow<T> {
    pub id: i64,
    pub record: T,
}

// 时间戳游标下界（空游标时取最小文本）
fn ts_bound(cursor: &WorkflowCursor) -> String {
    cursor
        .last_loaded_ts
        .as_ref()
        .map(format_ts)
        .unwrap_or_default()
}

fn read_ts(row: &Row<'_>, idx: usize, field: &str) -> rusqlite::Result<chrono::NaiveDateTime> {
    let text: String = row.get(idx)?;
    parse_ts(&text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("{} 不是有效时间戳: {}", field, text).into(),
        )
    })
}

// ==========================================
// StagingRepository
// ==========================================
pub struct StagingRepository<'a> {
    conn: &'a Connection,
}

impl<'a> StagingRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ===== 写入 =====

    /// 落地一条记录（upsert）
    pub fn upsert(&self, source: StagingSource, record: &StagedRecord) -> RepositoryResult<usize> {
        let table = source.table();
        let n = match record {
            StagedRecord::Document(d) => self.conn.execute(
                &format!(
                    r#"
                    INSERT INTO stg.{table} (object_id, object_value, update_ts)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT (object_id) DO UPDATE SET
                        object_value = excluded.object_value,
                        update_ts = excluded.update_ts
                    "#
                ),
                params![d.object_id, d.object_value, format_ts(&d.update_ts)],
            )?,
            StagedRecord::Named(o) => self.conn.execute(
                &format!(
                    r#"
                    INSERT INTO stg.{table} (object_id, name)
                    VALUES (?1, ?2)
                    ON CONFLICT (object_id) DO UPDATE SET name = excluded.name
                    "#
                ),
                params![o.object_id, o.name],
            )?,
            StagedRecord::Delivery(d) => self.conn.execute(
                r#"
                INSERT INTO stg.deliverysystem_deliveries (delivery_id, delivery_ts, delivery_value)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (delivery_id) DO UPDATE SET
                    delivery_ts = excluded.delivery_ts,
                    delivery_value = excluded.delivery_value
                "#,
                params![d.delivery_id, format_ts(&d.delivery_ts), d.delivery_value],
            )?,
            StagedRecord::Rank(r) => self.conn.execute(
                r#"
                INSERT INTO stg.bonussystem_ranks (id, name, bonus_percent, min_payment_threshold)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (id) DO UPDATE SET
                    name = excluded.name,
                    bonus_percent = excluded.bonus_percent,
                    min_payment_threshold = excluded.min_payment_threshold
                "#,
                params![r.id, r.name, r.bonus_percent, r.min_payment_threshold],
            )?,
            StagedRecord::Event(e) => self.conn.execute(
                r#"
                INSERT INTO stg.bonussystem_events (id, event_ts, event_type, event_value)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (id) DO UPDATE SET
                    event_ts = excluded.event_ts,
                    event_type = excluded.event_type,
                    event_value = excluded.event_value
                "#,
                params![e.id, format_ts(&e.event_ts), e.event_type, e.event_value],
            )?,
        };
        Ok(n)
    }

    // ===== 读取（按游标分页）=====

    /// 订单子系统文档: 位置 (update_ts, object_id) 严格大于游标
    pub fn list_documents_after(
        &self,
        source: StagingSource,
        cursor: &WorkflowCursor,
        limit: usize,
    ) -> RepositoryResult<Vec<StgDocument>> {
        let table = source.table();
        let ts = ts_bound(cursor);
        let key = cursor.last_loaded_key.clone().unwrap_or_default();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT object_id, object_value, update_ts
            FROM stg.{table}
            WHERE update_ts > ?1 OR (update_ts = ?1 AND object_id > ?2)
            ORDER BY update_ts, object_id
            LIMIT ?3
            "#
        ))?;
        let rows = stmt.query_map(params![ts, key, limit as i64], |row| {
            Ok(StgDocument {
                object_id: row.get(0)?,
                object_value: row.get(1)?,
                update_ts: read_ts(row, 2, "update_ts")?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }

    /// 配送子系统命名对象: stg id 严格大于游标
    pub fn list_named_after_id(
        &self,
        source: StagingSource,
        last_id: i64,
        limit: usize,
    ) -> RepositoryResult<Vec<StgRow<StgNamedObject>>> {
        let table = source.table();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, object_id, name FROM stg.{table} WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![last_id, limit as i64], |row| {
            Ok(StgRow {
                id: row.get(0)?,
                record: StgNamedObject {
                    object_id: row.get(1)?,
                    name: row.get(2)?,
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }

    /// 配送记录: stg id 严格大于游标
    pub fn list_deliveries_after_id(
        &self,
        last_id: i64,
        limit: usize,
    ) -> RepositoryResult<Vec<StgRow<StgDelivery>>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, delivery_id, delivery_ts, delivery_value
            FROM stg.deliverysystem_deliveries
            WHERE id > ?1
            ORDER BY id
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![last_id, limit as i64], |row| {
            Ok(StgRow {
                id: row.get(0)?,
                record: StgDelivery {
                    delivery_id: row.get(1)?,
                    delivery_ts: read_ts(row, 2, "delivery_ts")?,
                    delivery_value: row.get(3)?,
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }

    /// 积分事件: 位置 (event_ts, id) 严格大于游标，可按事件类型过滤
    pub fn list_events_after(
        &self,
        cursor: &WorkflowCursor,
        event_type: Option<&str>,
        limit: usize,
    ) -> RepositoryResult<Vec<BonusEvent>> {
        let ts = ts_bound(cursor);
        let id = cursor.last_loaded_id.unwrap_or(i64::MIN);
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, event_ts, event_type, event_value
            FROM stg.bonussystem_events
            WHERE (event_ts > ?1 OR (event_ts = ?1 AND id > ?2))
              AND (?3 IS NULL OR event_type = ?3)
            ORDER BY event_ts, id
            LIMIT ?4
            "#,
        )?;
        let rows = stmt.query_map(params![ts, id, event_type, limit as i64], |row| {
            Ok(BonusEvent {
                id: row.get(0)?,
                event_ts: read_ts(row, 1, "event_ts")?,
                event_type: row.get(2)?,
                event_value: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }

    /// 积分等级全表
    pub fn list_ranks(&self) -> RepositoryResult<Vec<BonusRank>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, bonus_percent, min_payment_threshold FROM stg.bonussystem_ranks ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BonusRank {
                id: row.get(0)?,
                name: row.get(1)?,
                bonus_percent: row.get(2)?,
                min_payment_threshold: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }

    /// 表行数
    pub fn count(&self, source: StagingSource) -> RepositoryResult<i64> {
        let n = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM stg.{}", source.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ===== 检查点探针 =====

    /// 已落地数据的最大位置（与该表抽取工作流的游标同构）
    ///
    /// # 返回
    /// - Ok(None): 表为空
    pub fn max_landed_position(&self, source: StagingSource) -> RepositoryResult<Option<WorkflowCursor>> {
        let table = source.table();
        let position = match source {
            StagingSource::OrdersystemRestaurants
            | StagingSource::OrdersystemUsers
            | StagingSource::OrdersystemOrders => self
                .conn
                .query_row(
                    &format!(
                        "SELECT update_ts, object_id FROM stg.{table} ORDER BY update_ts DESC, object_id DESC LIMIT 1"
                    ),
                    [],
                    |row| Ok(WorkflowCursor::at_ts_key(read_ts(row, 0, "update_ts")?, row.get::<_, String>(1)?)),
                )
                .optional()?,
            StagingSource::DeliverysystemRestaurants | StagingSource::DeliverysystemCouriers => self
                .conn
                .query_row(
                    &format!("SELECT MAX(object_id) FROM stg.{table}"),
                    [],
                    |row| row.get::<_, Option<String>>(0),
                )?
                .map(WorkflowCursor::at_key),
            StagingSource::DeliverysystemDeliveries => self
                .conn
                .query_row(
                    "SELECT delivery_ts, delivery_id FROM stg.deliverysystem_deliveries ORDER BY delivery_ts DESC, delivery_id DESC LIMIT 1",
                    [],
                    |row| Ok(WorkflowCursor::at_ts_key(read_ts(row, 0, "delivery_ts")?, row.get::<_, String>(1)?)),
                )
                .optional()?,
            StagingSource::BonussystemRanks => self
                .conn
                .query_row("SELECT MAX(id) FROM stg.bonussystem_ranks", [], |row| {
                    row.get::<_, Option<i64>>(0)
                })?
                .map(WorkflowCursor::at_id),
            StagingSource::BonussystemEvents => self
                .conn
                .query_row(
                    "SELECT event_ts, id FROM stg.bonussystem_events ORDER BY event_ts DESC, id DESC LIMIT 1",
                    [],
                    |row| Ok(WorkflowCursor::at_ts_id(read_ts(row, 0, "event_ts")?, row.get(1)?)),
                )
                .optional()?,
        };
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Warehouse;
    use crate::schema::SchemaManager;

    fn warehouse() -> Warehouse {
        let wh = Warehouse::open_in_memory().unwrap();
        SchemaManager::new(wh.clone()).init_all().unwrap();
        wh
    }

    fn doc(id: &str, ts: &str, value: &str) -> StagedRecord {
        StagedRecord::Document(StgDocument {
            object_id: id.into(),
            object_value: value.into(),
            update_ts: parse_ts(ts).unwrap(),
        })
    }

    #[test]
    fn test_document_upsert_is_idempotent() {
        let wh = warehouse();
        let record = doc("O-1", "2024-06-01 10:00:00", r#"{"_id":"O-1"}"#);
        let count = wh
            .transaction(|tx| {
                let repo = StagingRepository::new(tx);
                repo.upsert(StagingSource::OrdersystemOrders, &record)?;
                repo.upsert(StagingSource::OrdersystemOrders, &record)?;
                repo.count(StagingSource::OrdersystemOrders)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_upsert_replaces_payload() {
        let wh = warehouse();
        let docs = wh
            .transaction(|tx| {
                let repo = StagingRepository::new(tx);
                repo.upsert(StagingSource::OrdersystemUsers, &doc("U1", "2024-01-01 00:00:00", "{\"v\":1}"))?;
                repo.upsert(StagingSource::OrdersystemUsers, &doc("U1", "2024-01-02 00:00:00", "{\"v\":2}"))?;
                repo.list_documents_after(StagingSource::OrdersystemUsers, &WorkflowCursor::empty(), 10)
            })
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].object_value, "{\"v\":2}");
        assert_eq!(docs[0].update_ts, parse_ts("2024-01-02 00:00:00").unwrap());
    }

    #[test]
    fn test_documents_after_cursor_respect_tie_break() {
        let wh = warehouse();
        let ts = "2024-06-01 10:00:00";
        let docs = wh
            .transaction(|tx| {
                let repo = StagingRepository::new(tx);
                for id in ["A", "B", "C"] {
                    repo.upsert(StagingSource::OrdersystemOrders, &doc(id, ts, "{}"))?;
                }
                let cursor = WorkflowCursor::at_ts_key(parse_ts(ts).unwrap(), "A");
                repo.list_documents_after(StagingSource::OrdersystemOrders, &cursor, 10)
            })
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.object_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[test]
    fn test_negative_rank_percent_rejected() {
        let wh = warehouse();
        let err = wh
            .transaction(|tx| {
                StagingRepository::new(tx).upsert(
                    StagingSource::BonussystemRanks,
                    &StagedRecord::Rank(BonusRank {
                        id: 1,
                        name: "Bronze".into(),
                        bonus_percent: -0.1,
                        min_payment_threshold: 0.0,
                    }),
                )
            })
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CheckConstraintViolation(_)));
    }

    #[test]
    fn test_max_landed_position() {
        let wh = warehouse();
        let (empty, landed) = wh
            .transaction(|tx| {
                let repo = StagingRepository::new(tx);
                let empty = repo.max_landed_position(StagingSource::BonussystemEvents)?;
                for (id, ts) in [(1, "2024-06-02 00:00:00"), (2, "2024-06-01 00:00:00")] {
                    repo.upsert(
                        StagingSource::BonussystemEvents,
                        &StagedRecord::Event(BonusEvent {
                            id,
                            event_ts: parse_ts(ts).unwrap(),
                            event_type: "bonus_transaction".into(),
                            event_value: "{}".into(),
                        }),
                    )?;
                }
                Ok::<_, RepositoryError>((empty, repo.max_landed_position(StagingSource::BonussystemEvents)?))
            })
            .unwrap();
        assert_eq!(empty, None);
        assert_eq!(
            landed,
            Some(WorkflowCursor::at_ts_id(parse_ts("2024-06-02 00:00:00").unwrap(), 1))
        );
    }
}
