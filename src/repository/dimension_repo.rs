// ==========================================
// 结算数据仓库 - 明细层非版本化维度仓储
// ==========================================
// 表: dds.dm_users / dds.dm_couriers / dds.dm_timestamps / dds.dm_orders
// 写入: 按业务键 upsert，代理键在重复加载间保持不变
// 红线: Repository 不含业务逻辑
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::dimension::{DmCourier, DmOrder, DmTimestamp, DmUser};
use crate::domain::types::{format_date, format_time, format_ts};
use crate::repository::error::RepositoryResult;

pub struct DimensionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> DimensionRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ==========================================
    // dm_users
    // ==========================================

    /// upsert 用户，返回代理键
    pub fn upsert_user(&self, user: &DmUser) -> RepositoryResult<i64> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO dds.dm_users (user_id, user_name, user_login)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (user_id) DO UPDATE SET
                user_name = excluded.user_name,
                user_login = excluded.user_login
            RETURNING id
            "#,
            params![user.user_id, user.user_name, user.user_login],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn find_user_id(&self, user_id: &str) -> RepositoryResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM dds.dm_users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn find_user(&self, user_id: &str) -> RepositoryResult<Option<DmUser>> {
        let user = self
            .conn
            .query_row(
                "SELECT id, user_id, user_name, user_login FROM dds.dm_users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(DmUser {
                        id: Some(row.get(0)?),
                        user_id: row.get(1)?,
                        user_name: row.get(2)?,
                        user_login: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    // ==========================================
    // dm_couriers
    // ==========================================

    /// upsert 快递员，返回代理键
    pub fn upsert_courier(&self, courier: &DmCourier) -> RepositoryResult<i64> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO dds.dm_couriers (courier_id, courier_name)
            VALUES (?1, ?2)
            ON CONFLICT (courier_id) DO UPDATE SET
                courier_name = excluded.courier_name
            RETURNING id
            "#,
            params![courier.courier_id, courier.courier_name],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn find_courier_id(&self, courier_id: &str) -> RepositoryResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM dds.dm_couriers WHERE courier_id = ?1",
                params![courier_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // ==========================================
    // dm_timestamps
    // ==========================================

    /// 不存在则插入
    ///
    /// # 返回
    /// - Ok(true): 新插入
    /// - Ok(false): 已存在
    pub fn insert_timestamp_if_absent(&self, dm: &DmTimestamp) -> RepositoryResult<bool> {
        let n = self.conn.execute(
            r#"
            INSERT INTO dds.dm_timestamps (ts, year, month, day, time, date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (ts) DO NOTHING
            "#,
            params![
                format_ts(&dm.ts),
                dm.year,
                dm.month,
                dm.day,
                format_time(&dm.time),
                format_date(&dm.date),
            ],
        )?;
        Ok(n > 0)
    }

    pub fn find_timestamp_id(&self, ts: &chrono::NaiveDateTime) -> RepositoryResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM dds.dm_timestamps WHERE ts = ?1",
                params![format_ts(ts)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // ==========================================
    // dm_orders
    // ==========================================

    /// upsert 订单，返回代理键
    pub fn upsert_order(&self, order: &DmOrder) -> RepositoryResult<i64> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO dds.dm_orders (user_id, restaurant_id, timestamp_id, order_key, order_status)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (order_key) DO UPDATE SET
                user_id = excluded.user_id,
                restaurant_id = excluded.restaurant_id,
                timestamp_id = excluded.timestamp_id,
                order_status = excluded.order_status
            RETURNING id
            "#,
            params![
                order.user_id,
                order.restaurant_id,
                order.timestamp_id,
                order.order_key,
                order.order_status,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 按订单号查询（含下单时刻）
    pub fn find_order(&self, order_key: &str) -> RepositoryResult<Option<(DmOrder, chrono::NaiveDateTime)>> {
        let found = self
            .conn
            .query_row(
                r#"
                SELECT o.id, o.user_id, o.restaurant_id, o.timestamp_id, o.order_key, o.order_status, t.ts
                FROM dds.dm_orders o
                JOIN dds.dm_timestamps t ON t.id = o.timestamp_id
                WHERE o.order_key = ?1
                "#,
                params![order_key],
                |row| {
                    Ok((
                        DmOrder {
                            id: Some(row.get(0)?),
                            user_id: row.get(1)?,
                            restaurant_id: row.get(2)?,
                            timestamp_id: row.get(3)?,
                            order_key: row.get(4)?,
                            order_status: row.get(5)?,
                        },
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        match found {
            None => Ok(None),
            Some((order, ts_text)) => {
                let ts = crate::domain::types::parse_ts(&ts_text).ok_or_else(|| {
                    crate::repository::error::RepositoryError::field(
                        "dm_timestamps.ts",
                        format!("无效时间戳: {}", ts_text),
                    )
                })?;
                Ok(Some((order, ts)))
            }
        }
    }

    /// 表行数（users / couriers / timestamps / orders）
    pub fn count(&self, table: DimensionTable) -> RepositoryResult<i64> {
        let n = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM dds.{}", table.name()),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

/// 非版本化维度表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionTable {
    Users,
    Couriers,
    Timestamps,
    Orders,
}

impl DimensionTable {
    pub fn name(&self) -> &'static str {
        match self {
            DimensionTable::Users => "dm_users",
            DimensionTable::Couriers => "dm_couriers",
            DimensionTable::Timestamps => "dm_timestamps",
            DimensionTable::Orders => "dm_orders",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::parse_ts;
    use crate::repository::error::RepositoryError;
    use crate::repository::Warehouse;
    use crate::schema::SchemaManager;

    fn warehouse() -> Warehouse {
        let wh = Warehouse::open_in_memory().unwrap();
        SchemaManager::new(wh.clone()).init_all().unwrap();
        wh
    }

    #[test]
    fn test_user_surrogate_key_is_stable() {
        let wh = warehouse();
        let (a, b, user) = wh
            .transaction(|tx| {
                let repo = DimensionRepository::new(tx);
                let mut user = DmUser {
                    id: None,
                    user_id: "U1".into(),
                    user_name: "Ann".into(),
                    user_login: "ann".into(),
                };
                let a = repo.upsert_user(&user)?;
                user.user_name = "Anna".into();
                let b = repo.upsert_user(&user)?;
                Ok::<_, RepositoryError>((a, b, repo.find_user("U1")?))
            })
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(user.unwrap().user_name, "Anna");
    }

    #[test]
    fn test_timestamp_insert_if_absent() {
        let wh = warehouse();
        let ts = parse_ts("2024-06-01 12:00:00").unwrap();
        let (first, second, n) = wh
            .transaction(|tx| {
                let repo = DimensionRepository::new(tx);
                let dm = DmTimestamp::from_ts(ts);
                Ok::<_, RepositoryError>((
                    repo.insert_timestamp_if_absent(&dm)?,
                    repo.insert_timestamp_if_absent(&dm)?,
                    repo.count(DimensionTable::Timestamps)?,
                ))
            })
            .unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_timestamp_year_range_checked() {
        let wh = warehouse();
        let err = wh
            .transaction(|tx| {
                DimensionRepository::new(tx)
                    .insert_timestamp_if_absent(&DmTimestamp::from_ts(parse_ts("2021-12-31 23:00:00").unwrap()))
            })
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CheckConstraintViolation(_)));
    }

    #[test]
    fn test_order_with_unknown_dimension_rejected() {
        let wh = warehouse();
        let err = wh
            .transaction(|tx| {
                DimensionRepository::new(tx).upsert_order(&DmOrder {
                    id: None,
                    user_id: 42,
                    restaurant_id: 42,
                    timestamp_id: 42,
                    order_key: "O-1".into(),
                    order_status: "CLOSED".into(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ForeignKeyViolation(_)));
    }
}
