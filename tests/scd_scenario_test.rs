// ==========================================
// 版本化维度集成测试
// ==========================================
// 场景: 餐厅 Bistro A 于 2024-06-01 更名为 Bistro B
// ==========================================


use std::sync::Arc;

use settlements_dwh::domain::staging::StagingSource;
use settlements_dwh::domain::types::scd_open_end;
use settlements_dwh::repository::{ScdRepository, Warehouse};
use settlements_dwh::source::MemorySource;
use settlements_dwh::validation::IntegrityChecker;
use test_helpers::*;

async fn rename_bistro(wh: &Warehouse) {
    let source = Arc::new(MemorySource::new());
    source
        .push(
            StagingSource::OrdersystemRestaurants,
            restaurant("R1", "Bistro A", "2024-01-01 00:00:00", &[("P1", "Soup", 100.0)]),
        )
        .unwrap();
    assert!(run_pipeline(wh, source.clone()).await.succeeded());

    // 源端更新同一文档
    source
        .push(
            StagingSource::OrdersystemRestaurants,
            restaurant("R1", "Bistro B", "2024-06-01 00:00:00", &[("P1", "Soup", 100.0)]),
        )
        .unwrap();
    assert!(run_pipeline(wh, source).await.succeeded());
}

#[tokio::test]
async fn test_rename_produces_two_versions() {
    let (_dir, wh) = create_test_warehouse();
    rename_bistro(&wh).await;

    let versions = wh
        .read(|c| ScdRepository::new(c).restaurant_versions("R1"))
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].attrs.restaurant_name, "Bistro A");
    assert_eq!(versions[0].active_to, ts("2024-06-01 00:00:00"));
    assert_eq!(versions[1].attrs.restaurant_name, "Bistro B");
    assert_eq!(versions[1].active_from, ts("2024-06-01 00:00:00"));
    assert_eq!(versions[1].active_to, scd_open_end());
}

#[tokio::test]
async fn test_as_of_lookup_follows_windows() {
    let (_dir, wh) = create_test_warehouse();
    rename_bistro(&wh).await;

    let name_at = |at: &str| {
        wh.read(|c| ScdRepository::new(c).restaurant_as_of("R1", &ts(at)))
            .unwrap()
            .map(|v| v.attrs.restaurant_name)
    };
    assert_eq!(name_at("2024-05-01 00:00:00").as_deref(), Some("Bistro A"));
    assert_eq!(name_at("2024-07-01 00:00:00").as_deref(), Some("Bistro B"));
    assert_eq!(name_at("2024-06-01 00:00:00").as_deref(), Some("Bistro B"));

    let current = wh
        .read(|c| ScdRepository::new(c).current_restaurant("R1"))
        .unwrap();
    assert_eq!(current.map(|v| v.attrs.restaurant_name).as_deref(), Some("Bistro B"));
}

#[tokio::test]
async fn test_product_follows_restaurant_version() {
    let (_dir, wh) = create_test_warehouse();
    rename_bistro(&wh).await;

    let (products, restaurants) = wh
        .read(|c| {
            let scd = ScdRepository::new(c);
            Ok::<_, settlements_dwh::repository::RepositoryError>((
                scd.product_versions("P1")?,
                scd.restaurant_versions("R1")?,
            ))
        })
        .unwrap();
    // 商品挂在餐厅版本代理键上，餐厅换版本后商品随之换版本
    assert_eq!(products.len(), 2);
    assert_eq!(products[0].attrs.restaurant_id, restaurants[0].id);
    assert_eq!(products[1].attrs.restaurant_id, restaurants[1].id);
    assert_eq!(products[0].active_to, products[1].active_from);
}

#[tokio::test]
async fn test_windows_stay_consistent_after_rename() {
    let (_dir, wh) = create_test_warehouse();
    rename_bistro(&wh).await;

    let report = IntegrityChecker::new(wh.clone()).run().unwrap();
    assert!(report.is_clean(), "{:?}", report);
}

#[tokio::test]
async fn test_replaying_old_version_is_ignored() {
    let (_dir, wh) = create_test_warehouse();
    rename_bistro(&wh).await;

    // 迟到的旧文档（早于当前版本起点）不改写历史
    let source = Arc::new(MemorySource::new());
    source
        .push(
            StagingSource::OrdersystemRestaurants,
            restaurant("R1", "Bistro Z", "2024-03-01 00:00:00", &[]),
        )
        .unwrap();
    // 游标已越过 2024-03-01，需清空游标让旧文档进入
    wh.read(|c| {
        settlements_dwh::repository::WorkflowSettingsRepository::new(c, settlements_dwh::Layer::Stg)
            .reset_setting(StagingSource::OrdersystemRestaurants.workflow_key())?;
        settlements_dwh::repository::WorkflowSettingsRepository::new(c, settlements_dwh::Layer::Dds)
            .reset_setting(settlements_dwh::TaskId::DmRestaurants.workflow_key())
    })
    .unwrap();
    run_pipeline(&wh, source).await;

    let versions = wh
        .read(|c| ScdRepository::new(c).restaurant_versions("R1"))
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions.iter().all(|v| v.attrs.restaurant_name != "Bistro Z"));
}
