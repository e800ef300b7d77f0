// ==========================================
// 表约束集成测试
// ==========================================
// 覆盖: 唯一约束 / upsert 合并 / 外键 / CHECK 取值范围 / 集市原地覆盖
// ==========================================


use chrono::NaiveDate;

use settlements_dwh::domain::dimension::{DmUser, ProductAttrs, RestaurantAttrs};
use settlements_dwh::domain::fact::{FctDelivery, FctProductSale};
use settlements_dwh::domain::mart::{CourierLedgerRow, SettlementReportRow};
use settlements_dwh::repository::{
    DimensionRepository, DimensionTable, FactRepository, MartRepository, RepositoryError,
    ScdRepository, Warehouse,
};
use test_helpers::*;

fn alice() -> DmUser {
    DmUser {
        id: None,
        user_id: "U1".to_string(),
        user_name: "Alice".to_string(),
        user_login: "alice".to_string(),
    }
}

fn settlement(orders: i64, total: f64) -> SettlementReportRow {
    SettlementReportRow {
        restaurant_id: "R1".to_string(),
        restaurant_name: "Bistro A".to_string(),
        settlement_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
        orders_count: orders,
        orders_total_sum: total,
        orders_bonus_payment_sum: 0.0,
        orders_bonus_granted_sum: 0.0,
        order_processing_fee: total * 0.25,
        restaurant_reward_sum: total * 0.75,
    }
}

fn ledger(rate_avg: f64, reward: f64) -> CourierLedgerRow {
    CourierLedgerRow {
        courier_id: "C1".to_string(),
        courier_name: "Bob".to_string(),
        settlement_year: 2024,
        settlement_month: 6,
        orders_count: 1,
        orders_total_sum: 200.0,
        rate_avg,
        order_processing_fee: 50.0,
        courier_order_sum: 200.0,
        courier_tips_sum: 0.0,
        courier_reward_sum: reward,
    }
}

/// 插入一个可被事实表引用的完整订单，返回 (订单代理键, 商品代理键, 快递员代理键)
fn seed_order(wh: &Warehouse) -> (i64, i64, i64) {
    wh.transaction(|tx| {
        let dims = DimensionRepository::new(tx);
        let scd = ScdRepository::new(tx);
        let user_id = dims.upsert_user(&alice())?;
        let at = ts("2024-01-01 00:00:00");
        let restaurant_id = scd.open_restaurant_version(
            "R1",
            &RestaurantAttrs {
                restaurant_name: "Bistro A".to_string(),
            },
            &at,
        )?;
        let product_id = scd.open_product_version(
            "P1",
            &ProductAttrs {
                restaurant_id,
                product_name: "Soup".to_string(),
                product_price: 100.0,
            },
            &at,
        )?;
        let order_ts = ts("2024-06-10 12:00:00");
        let stamp = settlements_dwh::domain::dimension::DmTimestamp::from_ts(order_ts);
        dims.insert_timestamp_if_absent(&stamp)?;
        let timestamp_id = dims
            .find_timestamp_id(&order_ts)?
            .ok_or_else(|| RepositoryError::field("ts", "未写入"))?;
        let order_id = dims.upsert_order(&settlements_dwh::domain::dimension::DmOrder {
            id: None,
            user_id,
            restaurant_id,
            timestamp_id,
            order_key: "O-1".to_string(),
            order_status: "CLOSED".to_string(),
        })?;
        let courier_id = dims.upsert_courier(&settlements_dwh::domain::dimension::DmCourier {
            id: None,
            courier_id: "C1".to_string(),
            courier_name: "Bob".to_string(),
        })?;
        Ok::<_, RepositoryError>((order_id, product_id, courier_id))
    })
    .unwrap()
}

#[test]
fn test_duplicate_natural_key_rejected_on_plain_insert() {
    let (_dir, wh) = create_test_warehouse();
    let result = wh.read(|c| {
        c.execute_batch(
            "INSERT INTO dds.dm_users (user_id, user_name, user_login) VALUES ('U1', 'a', 'a');
             INSERT INTO dds.dm_users (user_id, user_name, user_login) VALUES ('U1', 'b', 'b');",
        )
        .map_err(RepositoryError::from)
    });
    assert!(matches!(result, Err(RepositoryError::UniqueConstraintViolation(_))));
}

#[test]
fn test_upsert_merges_instead_of_duplicating() {
    let (_dir, wh) = create_test_warehouse();
    let first = wh.read(|c| DimensionRepository::new(c).upsert_user(&alice())).unwrap();
    let renamed = DmUser {
        user_name: "Alice Cooper".to_string(),
        ..alice()
    };
    let second = wh.read(|c| DimensionRepository::new(c).upsert_user(&renamed)).unwrap();
    assert_eq!(first, second);

    let (count, stored) = wh
        .read(|c| {
            let dims = DimensionRepository::new(c);
            Ok::<_, RepositoryError>((dims.count(DimensionTable::Users)?, dims.find_user("U1")?))
        })
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(stored.map(|u| u.user_name).as_deref(), Some("Alice Cooper"));
}

#[test]
fn test_two_open_versions_for_one_key_rejected() {
    let (_dir, wh) = create_test_warehouse();
    let attrs = RestaurantAttrs {
        restaurant_name: "Bistro A".to_string(),
    };
    let result = wh.read(|c| {
        let scd = ScdRepository::new(c);
        scd.open_restaurant_version("R1", &attrs, &ts("2024-01-01 00:00:00"))?;
        scd.open_restaurant_version("R1", &attrs, &ts("2024-02-01 00:00:00"))
    });
    assert!(matches!(result, Err(RepositoryError::UniqueConstraintViolation(_))));
}

#[test]
fn test_fact_with_unknown_order_rejected() {
    let (_dir, wh) = create_test_warehouse();
    let (_, product_id, courier_id) = seed_order(&wh);

    let sale = FctProductSale {
        product_id,
        order_id: 9_999,
        count: 1,
        price: 100.0,
        total_sum: 100.0,
        bonus_payment: 0.0,
        bonus_grant: 0.0,
    };
    let result = wh.read(|c| FactRepository::new(c).upsert_product_sale(&sale));
    assert!(matches!(result, Err(RepositoryError::ForeignKeyViolation(_))));

    let delivery = FctDelivery {
        order_id: 9_999,
        courier_id,
        address: "x".to_string(),
        rate: 5,
        tip_sum: 0.0,
        sum: 10.0,
    };
    let result = wh.read(|c| FactRepository::new(c).upsert_delivery(&delivery));
    assert!(matches!(result, Err(RepositoryError::ForeignKeyViolation(_))));
}

#[test]
fn test_negative_and_out_of_range_values_rejected() {
    let (_dir, wh) = create_test_warehouse();
    let (order_id, product_id, courier_id) = seed_order(&wh);

    let negative_sale = FctProductSale {
        product_id,
        order_id,
        count: 1,
        price: 100.0,
        total_sum: 100.0,
        bonus_payment: -1.0,
        bonus_grant: 0.0,
    };
    let result = wh.read(|c| FactRepository::new(c).upsert_product_sale(&negative_sale));
    assert!(matches!(result, Err(RepositoryError::CheckConstraintViolation(_))));

    let bad_rate = FctDelivery {
        order_id,
        courier_id,
        address: "x".to_string(),
        rate: 6,
        tip_sum: 0.0,
        sum: 10.0,
    };
    let result = wh.read(|c| FactRepository::new(c).upsert_delivery(&bad_rate));
    assert!(matches!(result, Err(RepositoryError::CheckConstraintViolation(_))));

    let early = SettlementReportRow {
        settlement_date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
        ..settlement(1, 100.0)
    };
    let result = wh.read(|c| MartRepository::new(c).upsert_settlement(&early));
    assert!(matches!(result, Err(RepositoryError::CheckConstraintViolation(_))));

    let result = wh.read(|c| MartRepository::new(c).upsert_ledger(&ledger(0.5, 100.0)));
    assert!(matches!(result, Err(RepositoryError::CheckConstraintViolation(_))));

    // 失败的写入不留下任何行
    let sales = wh.read(|c| FactRepository::new(c).count_product_sales()).unwrap();
    assert_eq!(sales, 0);
}

#[test]
fn test_mart_rows_overwrite_in_place() {
    let (_dir, wh) = create_test_warehouse();
    let date = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();

    wh.read(|c| {
        let mart = MartRepository::new(c);
        mart.upsert_settlement(&settlement(1, 100.0))?;
        mart.upsert_settlement(&settlement(3, 300.0))?;
        mart.upsert_ledger(&ledger(5.0, 200.0))?;
        mart.upsert_ledger(&ledger(4.0, 150.0))
    })
    .unwrap();

    let (settlements, row, ledgers, ledger_row) = wh
        .read(|c| {
            let mart = MartRepository::new(c);
            Ok::<_, RepositoryError>((
                mart.count_settlements()?,
                mart.find_settlement(&date, "R1")?,
                mart.count_ledger()?,
                mart.find_ledger("C1", 2024, 6)?,
            ))
        })
        .unwrap();
    assert_eq!(settlements, 1);
    assert_eq!(row.map(|r| r.orders_count), Some(3));
    assert_eq!(ledgers, 1);
    assert_eq!(ledger_row.map(|r| r.courier_reward_sum), Some(150.0));
}
