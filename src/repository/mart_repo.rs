// ==========================================
// 结算数据仓库 - 集市层 (cdm) 仓储
// ==========================================
// 读取: 从 dds 事实/维度取汇总输入
// 写入: 按汇总键 upsert，重复计算原地覆盖
// ==========================================

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::mart::{CourierLedgerRow, SettlementReportRow};
use crate::domain::types::{format_date, parse_date, round_money, round_rate, ORDER_STATUS_CLOSED};
use crate::repository::error::{RepositoryError, RepositoryResult};

/// 餐厅日汇总输入（费用与收益由引擎计算）
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementAggregate {
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub settlement_date: NaiveDate,
    pub orders_count: i64,
    pub orders_total_sum: f64,
    pub bonus_payment_sum: f64,
    pub bonus_granted_sum: f64,
}

/// 快递员账本输入: 一行一次配送
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerDeliveryLine {
    pub courier_id: String,
    pub courier_name: String,
    pub year: i32,
    pub month: u32,
    pub order_id: i64,
    pub sum: f64,
    pub tip_sum: f64,
    pub rate: i64,
}

pub struct MartRepository<'a> {
    conn: &'a Connection,
}

impl<'a> MartRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    // ==========================================
    // dm_settlement_report
    // ==========================================

    /// 汇总 CLOSED 订单的商品销售，按 (日期, 餐厅业务键) 分组
    ///
    /// 餐厅名取该餐厅当前版本
    pub fn aggregate_settlements_since(&self, from: &NaiveDate) -> RepositoryResult<Vec<SettlementAggregate>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                dr.restaurant_id,
                (SELECT cur.restaurant_name
                   FROM dds.dm_restaurants cur
                  WHERE cur.restaurant_id = dr.restaurant_id
                  ORDER BY cur.active_to DESC
                  LIMIT 1) AS restaurant_name,
                dt.date,
                COUNT(DISTINCT o.id),
                SUM(fps.total_sum),
                SUM(fps.bonus_payment),
                SUM(fps.bonus_grant)
            FROM dds.fct_product_sales fps
            JOIN dds.dm_orders o ON o.id = fps.order_id
            JOIN dds.dm_timestamps dt ON dt.id = o.timestamp_id
            JOIN dds.dm_restaurants dr ON dr.id = o.restaurant_id
            WHERE o.order_status = ?1 AND dt.date >= ?2
            GROUP BY dt.date, dr.restaurant_id
            ORDER BY dt.date, dr.restaurant_id
            "#,
        )?;
        let rows = stmt.query_map(params![ORDER_STATUS_CLOSED, format_date(from)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, f64>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (restaurant_id, restaurant_name, date, count, total, bonus_payment, bonus_grant) = row?;
            let settlement_date = parse_date(&date)
                .ok_or_else(|| RepositoryError::field("dm_timestamps.date", format!("无效日期: {}", date)))?;
            out.push(SettlementAggregate {
                restaurant_id,
                restaurant_name,
                settlement_date,
                orders_count: count,
                orders_total_sum: total,
                bonus_payment_sum: bonus_payment,
                bonus_granted_sum: bonus_grant,
            });
        }
        Ok(out)
    }

    pub fn upsert_settlement(&self, r: &SettlementReportRow) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO cdm.dm_settlement_report (
                restaurant_id, restaurant_name, settlement_date,
                orders_count, orders_total_sum,
                orders_bonus_payment_sum, orders_bonus_granted_sum,
                order_processing_fee, restaurant_reward_sum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (settlement_date, restaurant_id) DO UPDATE SET
                restaurant_name = excluded.restaurant_name,
                orders_count = excluded.orders_count,
                orders_total_sum = excluded.orders_total_sum,
                orders_bonus_payment_sum = excluded.orders_bonus_payment_sum,
                orders_bonus_granted_sum = excluded.orders_bonus_granted_sum,
                order_processing_fee = excluded.order_processing_fee,
                restaurant_reward_sum = excluded.restaurant_reward_sum
            "#,
            params![
                r.restaurant_id,
                r.restaurant_name,
                format_date(&r.settlement_date),
                r.orders_count,
                round_money(r.orders_total_sum),
                round_money(r.orders_bonus_payment_sum),
                round_money(r.orders_bonus_granted_sum),
                round_money(r.order_processing_fee),
                round_money(r.restaurant_reward_sum),
            ],
        )?;
        Ok(())
    }

    pub fn find_settlement(
        &self,
        date: &NaiveDate,
        restaurant_id: &str,
    ) -> RepositoryResult<Option<SettlementReportRow>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT restaurant_id, restaurant_name, settlement_date,
                       orders_count, orders_total_sum,
                       orders_bonus_payment_sum, orders_bonus_granted_sum,
                       order_processing_fee, restaurant_reward_sum
                FROM cdm.dm_settlement_report
                WHERE settlement_date = ?1 AND restaurant_id = ?2
                "#,
                params![format_date(date), restaurant_id],
                |row| {
                    Ok(SettlementReportRow {
                        restaurant_id: row.get(0)?,
                        restaurant_name: row.get(1)?,
                        settlement_date: *date,
                        orders_count: row.get(3)?,
                        orders_total_sum: row.get(4)?,
                        orders_bonus_payment_sum: row.get(5)?,
                        orders_bonus_granted_sum: row.get(6)?,
                        order_processing_fee: row.get(7)?,
                        restaurant_reward_sum: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count_settlements(&self) -> RepositoryResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM cdm.dm_settlement_report", [], |r| r.get(0))?)
    }

    // ==========================================
    // dm_courier_ledger
    // ==========================================

    /// 结算月 (year*100+month) 不早于 from_period 的全部配送
    pub fn ledger_lines_since(&self, from_period: i32) -> RepositoryResult<Vec<LedgerDeliveryLine>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT dc.courier_id, dc.courier_name, dt.year, dt.month,
                   o.id, fd.sum, fd.tip_sum, fd.rate
            FROM dds.fct_deliveries fd
            JOIN dds.dm_couriers dc ON dc.id = fd.courier_id
            JOIN dds.dm_orders o ON o.id = fd.order_id
            JOIN dds.dm_timestamps dt ON dt.id = o.timestamp_id
            WHERE (dt.year * 100 + dt.month) >= ?1
            ORDER BY dt.year, dt.month, dc.courier_id, o.id
            "#,
        )?;
        let rows = stmt.query_map(params![from_period], |row| {
            Ok(LedgerDeliveryLine {
                courier_id: row.get(0)?,
                courier_name: row.get(1)?,
                year: row.get(2)?,
                month: row.get(3)?,
                order_id: row.get(4)?,
                sum: row.get(5)?,
                tip_sum: row.get(6)?,
                rate: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn upsert_ledger(&self, r: &CourierLedgerRow) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO cdm.dm_courier_ledger (
                courier_id, courier_name, settlement_year, settlement_month,
                orders_count, orders_total_sum, rate_avg,
                order_processing_fee, courier_order_sum,
                courier_tips_sum, courier_reward_sum
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT (courier_id, settlement_year, settlement_month) DO UPDATE SET
                courier_name = excluded.courier_name,
                orders_count = excluded.orders_count,
                orders_total_sum = excluded.orders_total_sum,
                rate_avg = excluded.rate_avg,
                order_processing_fee = excluded.order_processing_fee,
                courier_order_sum = excluded.courier_order_sum,
                courier_tips_sum = excluded.courier_tips_sum,
                courier_reward_sum = excluded.courier_reward_sum
            "#,
            params![
                r.courier_id,
                r.courier_name,
                r.settlement_year,
                r.settlement_month,
                r.orders_count,
                round_money(r.orders_total_sum),
                round_rate(r.rate_avg),
                round_money(r.order_processing_fee),
                round_money(r.courier_order_sum),
                round_money(r.courier_tips_sum),
                round_money(r.courier_reward_sum),
            ],
        )?;
        Ok(())
    }

    pub fn find_ledger(
        &self,
        courier_id: &str,
        year: i32,
        month: u32,
    ) -> RepositoryResult<Option<CourierLedgerRow>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT courier_id, courier_name, settlement_year, settlement_month,
                       orders_count, orders_total_sum, rate_avg,
                       order_processing_fee, courier_order_sum,
                       courier_tips_sum, courier_reward_sum
                FROM cdm.dm_courier_ledger
                WHERE courier_id = ?1 AND settlement_year = ?2 AND settlement_month = ?3
                "#,
                params![courier_id, year, month],
                |row| {
                    Ok(CourierLedgerRow {
                        courier_id: row.get(0)?,
                        courier_name: row.get(1)?,
                        settlement_year: row.get(2)?,
                        settlement_month: row.get(3)?,
                        orders_count: row.get(4)?,
                        orders_total_sum: row.get(5)?,
                        rate_avg: row.get(6)?,
                        order_processing_fee: row.get(7)?,
                        courier_order_sum: row.get(8)?,
                        courier_tips_sum: row.get(9)?,
                        courier_reward_sum: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn count_ledger(&self) -> RepositoryResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM cdm.dm_courier_ledger", [], |r| r.get(0))?)
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

    fn settlement(total: f64) -> SettlementReportRow {
        SettlementReportRow {
            restaurant_id: "R1".into(),
            restaurant_name: "Bistro".into(),
            settlement_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            orders_count: 1,
            orders_total_sum: total,
            orders_bonus_payment_sum: 0.0,
            orders_bonus_granted_sum: 0.0,
            order_processing_fee: total * 0.25,
            restaurant_reward_sum: total * 0.75,
        }
    }

    #[test]
    fn test_settlement_upsert_overwrites_in_place() {
        let wh = warehouse();
        let (n, row) = wh
            .transaction(|tx| {
                let repo = MartRepository::new(tx);
                repo.upsert_settlement(&settlement(100.0))?;
                repo.upsert_settlement(&settlement(300.0))?;
                Ok::<_, RepositoryError>((
                    repo.count_settlements()?,
                    repo.find_settlement(&NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), "R1")?,
                ))
            })
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(row.unwrap().orders_total_sum, 300.0);
    }

    #[test]
    fn test_settlement_date_lower_bound() {
        let wh = warehouse();
        let mut row = settlement(10.0);
        row.settlement_date = NaiveDate::from_ymd_opt(2021, 12, 31).unwrap();
        let err = wh
            .transaction(|tx| MartRepository::new(tx).upsert_settlement(&row))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CheckConstraintViolation(_)));
    }

    #[test]
    fn test_ledger_rate_avg_lower_bound() {
        let wh = warehouse();
        let row = CourierLedgerRow {
            courier_id: "C1".into(),
            courier_name: "Bob".into(),
            settlement_year: 2024,
            settlement_month: 6,
            orders_count: 1,
            orders_total_sum: 10.0,
            rate_avg: 0.5,
            order_processing_fee: 2.5,
            courier_order_sum: 100.0,
            courier_tips_sum: 0.0,
            courier_reward_sum: 100.0,
        };
        let err = wh
            .transaction(|tx| MartRepository::new(tx).upsert_ledger(&row))
            .unwrap_err();
        assert!(matches!(err, RepositoryError::CheckConstraintViolation(_)));
    }
}
