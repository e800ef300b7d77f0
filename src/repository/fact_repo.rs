// ==========================================
// 结算数据仓库 - 明细层事实仓储
// ==========================================
// 表: dds.fct_product_sales / dds.fct_deliveries
// 写入: 按唯一键 upsert，重复构建原地覆盖
// ==========================================

use rusqlite::{params, Connection};

use crate::domain::fact::{FctDelivery, FctProductSale};
use crate::domain::types::round_money;
use crate::repository::error::RepositoryResult;

pub struct FactRepository<'a> {
    conn: &'a Connection,
}

impl<'a> FactRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// upsert 商品销售（唯一键: product_id, order_id）
    pub fn upsert_product_sale(&self, sale: &FctProductSale) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO dds.fct_product_sales
                (product_id, order_id, count, price, total_sum, bonus_payment, bonus_grant)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (product_id, order_id) DO UPDATE SET
                count = excluded.count,
                price = excluded.price,
                total_sum = excluded.total_sum,
                bonus_payment = excluded.bonus_payment,
                bonus_grant = excluded.bonus_grant
            "#,
            params![
                sale.product_id,
                sale.order_id,
                sale.count,
                round_money(sale.price),
                round_money(sale.total_sum),
                round_money(sale.bonus_payment),
                round_money(sale.bonus_grant),
            ],
        )?;
        Ok(())
    }

    /// upsert 配送（唯一键: courier_id, order_id）
    pub fn upsert_delivery(&self, delivery: &FctDelivery) -> RepositoryResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO dds.fct_deliveries (order_id, courier_id, address, rate, tip_sum, sum)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (courier_id, order_id) DO UPDATE SET
                address = excluded.address,
                rate = excluded.rate,
                tip_sum = excluded.tip_sum,
                sum = excluded.sum
            "#,
            params![
                delivery.order_id,
                delivery.courier_id,
                delivery.address,
                delivery.rate,
                round_money(delivery.tip_sum),
                round_money(delivery.sum),
            ],
        )?;
        Ok(())
    }

    /// 某订单的商品销售行
    pub fn product_sales_for_order(&self, order_id: i64) -> RepositoryResult<Vec<FctProductSale>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT product_id, order_id, count, price, total_sum, bonus_payment, bonus_grant
            FROM dds.fct_product_sales
            WHERE order_id = ?1
            ORDER BY product_id
            "#,
        )?;
        let rows = stmt.query_map(params![order_id], |row| {
            Ok(FctProductSale {
                product_id: row.get(0)?,
                order_id: row.get(1)?,
                count: row.get(2)?,
                price: row.get(3)?,
                total_sum: row.get(4)?,
                bonus_payment: row.get(5)?,
                bonus_grant: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_product_sales(&self) -> RepositoryResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM dds.fct_product_sales", [], |r| r.get(0))?)
    }

    pub fn count_deliveries(&self) -> RepositoryResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM dds.fct_deliveries", [], |r| r.get(0))?)
    }
}
