// ==========================================
// 结算数据仓库 - 缓慢变化维度 (SCD2) 仓储
// ==========================================
// 表: dds.dm_restaurants / dds.dm_products
// 区间: [active_from, active_to)，开放版本 active_to = 2500-01-01 00:00:00
// 红线: 只做数据访问；版本开闭决策由引擎层给出
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::domain::dimension::{DmProduct, DmRestaurant, ProductAttrs, RestaurantAttrs};
use crate::domain::types::{format_ts, parse_ts, scd_open_end};
use crate::repository::error::{RepositoryError, RepositoryResult};

/// 版本化维度表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScdTable {
    Restaurants,
    Products,
}

impl ScdTable {
    pub fn name(&self) -> &'static str {
        match self {
            ScdTable::Restaurants => "dm_restaurants",
            ScdTable::Products => "dm_products",
        }
    }

    pub fn natural_key_column(&self) -> &'static str {
        match self {
            ScdTable::Restaurants => "restaurant_id",
            ScdTable::Products => "product_id",
        }
    }
}

fn parse_window(row: &Row<'_>, from_idx: usize) -> rusqlite::Result<(NaiveDateTime, NaiveDateTime)> {
    let mut out = [NaiveDateTime::MIN; 2];
    for (slot, idx) in out.iter_mut().zip([from_idx, from_idx + 1]) {
        let text: String = row.get(idx)?;
        *slot = parse_ts(&text).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("有效区间时间戳无效: {}", text).into(),
            )
        })?;
    }
    Ok((out[0], out[1]))
}

const RESTAURANT_COLUMNS: &str = "id, restaurant_id, restaurant_name, active_from, active_to";
const PRODUCT_COLUMNS: &str =
    "id, product_id, restaurant_id, product_name, product_price, active_from, active_to";

fn map_restaurant(row: &Row<'_>) -> rusqlite::Result<DmRestaurant> {
    let (active_from, active_to) = parse_window(row, 3)?;
    Ok(DmRestaurant {
        id: row.get(0)?,
        natural_key: row.get(1)?,
        attrs: RestaurantAttrs {
            restaurant_name: row.get(2)?,
        },
        active_from,
        active_to,
    })
}

fn map_product(row: &Row<'_>) -> rusqlite::Result<DmProduct> {
    let (active_from, active_to) = parse_window(row, 5)?;
    Ok(DmProduct {
        id: row.get(0)?,
        natural_key: row.get(1)?,
        attrs: ProductAttrs {
            restaurant_id: row.get(2)?,
            product_name: row.get(3)?,
            product_price: row.get(4)?,
        },
        active_from,
        active_to,
    })
}

// ==========================================
// ScdRepository
// ==========================================
pub struct ScdRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ScdRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ===== 通用: 版本开闭 =====

    /// 关闭版本: active_to = at
    pub fn close_version(&self, table: ScdTable, id: i64, at: &NaiveDateTime) -> RepositoryResult<()> {
        let n = self.conn.execute(
            &format!("UPDATE dds.{} SET active_to = ?1 WHERE id = ?2", table.name()),
            params![format_ts(at), id],
        )?;
        if n == 0 {
            return Err(RepositoryError::NotFound {
                entity: table.name().to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// 全部版本（按 active_from 升序）
    fn versions<T>(
        &self,
        table: ScdTable,
        columns: &str,
        natural_key: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> RepositoryResult<Vec<T>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {columns} FROM dds.{} WHERE {} = ?1 ORDER BY active_from, id",
            table.name(),
            table.natural_key_column()
        ))?;
        let rows = stmt.query_map(params![natural_key], map)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }

    /// 当前版本（active_to 最大者）
    fn current<T>(
        &self,
        table: ScdTable,
        columns: &str,
        natural_key: &str,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> RepositoryResult<Option<T>> {
        let v = self
            .conn
            .query_row(
                &format!(
                    "SELECT {columns} FROM dds.{} WHERE {} = ?1 ORDER BY active_to DESC, id DESC LIMIT 1",
                    table.name(),
                    table.natural_key_column()
                ),
                params![natural_key],
                map,
            )
            .optional()?;
        Ok(v)
    }

    /// as-of 查询: active_from <= ts < active_to；早于首个版本时取最早版本
    fn as_of<T>(
        &self,
        table: ScdTable,
        columns: &str,
        natural_key: &str,
        ts: &NaiveDateTime,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> RepositoryResult<Option<T>> {
        let ts_text = format_ts(ts);
        let hit = self
            .conn
            .query_row(
                &format!(
                    r#"
                    SELECT {columns} FROM dds.{}
                    WHERE {} = ?1 AND active_from <= ?2 AND active_to > ?2
                    ORDER BY active_from DESC
                    LIMIT 1
                    "#,
                    table.name(),
                    table.natural_key_column()
                ),
                params![natural_key, ts_text],
                map,
            )
            .optional()?;
        if hit.is_some() {
            return Ok(hit);
        }

        let earliest = self
            .conn
            .query_row(
                &format!(
                    r#"
                    SELECT {columns} FROM dds.{}
                    WHERE {} = ?1 AND active_from > ?2
                    ORDER BY active_from ASC
                    LIMIT 1
                    "#,
                    table.name(),
                    table.natural_key_column()
                ),
                params![natural_key, ts_text],
                map,
            )
            .optional()?;
        Ok(earliest)
    }

    // ==========================================
    // dm_restaurants
    // ==========================================

    pub fn current_restaurant(&self, restaurant_id: &str) -> RepositoryResult<Option<DmRestaurant>> {
        self.current(ScdTable::Restaurants, RESTAURANT_COLUMNS, restaurant_id, map_restaurant)
    }

    pub fn restaurant_as_of(
        &self,
        restaurant_id: &str,
        ts: &NaiveDateTime,
    ) -> RepositoryResult<Option<DmRestaurant>> {
        self.as_of(ScdTable::Restaurants, RESTAURANT_COLUMNS, restaurant_id, ts, map_restaurant)
    }

    pub fn restaurant_versions(&self, restaurant_id: &str) -> RepositoryResult<Vec<DmRestaurant>> {
        self.versions(ScdTable::Restaurants, RESTAURANT_COLUMNS, restaurant_id, map_restaurant)
    }

    /// 打开新版本 [active_from, 哨兵)，返回代理键
    pub fn open_restaurant_version(
        &self,
        restaurant_id: &str,
        attrs: &RestaurantAttrs,
        active_from: &NaiveDateTime,
    ) -> RepositoryResult<i64> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO dds.dm_restaurants (restaurant_id, restaurant_name, active_from, active_to)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
            params![
                restaurant_id,
                attrs.restaurant_name,
                format_ts(active_from),
                format_ts(&scd_open_end()),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// 原地更新跟踪属性（同一生效时刻的修正）
    pub fn update_restaurant_attrs(&self, id: i64, attrs: &RestaurantAttrs) -> RepositoryResult<()> {
        self.conn.execute(
            "UPDATE dds.dm_restaurants SET restaurant_name = ?1 WHERE id = ?2",
            params![attrs.restaurant_name, id],
        )?;
        Ok(())
    }

    // ==========================================
    // dm_products
    // ==========================================

    pub fn current_product(&self, product_id: &str) -> RepositoryResult<Option<DmProduct>> {
        self.current(ScdTable::Products, PRODUCT_COLUMNS, product_id, map_product)
    }

    pub fn product_as_of(&self, product_id: &str, ts: &NaiveDateTime) -> RepositoryResult<Option<DmProduct>> {
        self.as_of(ScdTable::Products, PRODUCT_COLUMNS, product_id, ts, map_product)
    }

    pub fn product_versions(&self, product_id: &str) -> RepositoryResult<Vec<DmProduct>> {
        self.versions(ScdTable::Products, PRODUCT_COLUMNS, product_id, map_product)
    }

    pub fn open_product_version(
        &self,
        product_id: &str,
        attrs: &ProductAttrs,
        active_from: &NaiveDateTime,
    ) -> RepositoryResult<i64> {
        let id = self.conn.query_row(
            r#"
            INSERT INTO dds.dm_products
                (restaurant_id, product_id, product_name, product_price, active_from, active_to)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING id
            "#,
            params![
                attrs.restaurant_id,
                product_id,
                attrs.product_name,
                attrs.product_price,
                format_ts(active_from),
                format_ts(&scd_open_end()),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn update_product_attrs(&self, id: i64, attrs: &ProductAttrs) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            UPDATE dds.dm_products
            SET restaurant_id = ?1, product_name = ?2, product_price = ?3
            WHERE id = ?4
            "#,
            params![attrs.restaurant_id, attrs.product_name, attrs.product_price, id],
        )?;
        Ok(())
    }

    // ===== 完整性检查用 =====

    /// 全部业务键的版本区间 (natural_key, id, active_from, active_to)，按业务键与起点排序
    pub fn all_windows(
        &self,
        table: ScdTable,
    ) -> RepositoryResult<Vec<(String, i64, NaiveDateTime, NaiveDateTime)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}, id, active_from, active_to FROM dds.{} ORDER BY {}, active_from, id",
            table.natural_key_column(),
            table.name(),
            table.natural_key_column()
        ))?;
        let rows = stmt.query_map([], |row| {
            let (from, to) = parse_window(row, 2)?;
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, from, to))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }
}
