// ==========================================
// 结算数据仓库 - 版本化维度构建 (SCD2)
// ==========================================
// dm_restaurants ← ordersystem_restaurants.name，生效时刻 = update_ts
// dm_products    ← ordersystem_restaurants.menu[]，生效时刻 = update_ts
//                  restaurant_id = 该时刻有效的餐厅版本
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::domain::dimension::{ProductAttrs, RestaurantAttrs};
use crate::domain::payload::RestaurantDoc;
use crate::domain::staging::StagingSource;
use crate::domain::workflow::WorkflowCursor;
use crate::engine::error::PipelineResult;
use crate::engine::scd::{decide, ScdAction};
use crate::engine::task::{BatchOutcome, MissingReference, TaskId};
use crate::engine::transform::{parse_payload, BatchBuilder};
use crate::repository::{ScdRepository, ScdTable, StagingRepository};
use crate::validation::check_rules::{check_product, check_scd_effective, ensure_clean};

/// 执行判定结果
///
/// # 返回
/// - true: 版本链有变化
fn apply_action(
    scd: &ScdRepository<'_>,
    table: ScdTable,
    natural_key: &str,
    action: ScdAction,
    effective: &NaiveDateTime,
    open: impl FnOnce() -> PipelineResult<i64>,
    supersede: impl FnOnce(i64) -> PipelineResult<()>,
) -> PipelineResult<bool> {
    match action {
        ScdAction::Unchanged => Ok(false),
        ScdAction::Open => {
            open()?;
            Ok(true)
        }
        ScdAction::CloseAndOpen { close_id } => {
            scd.close_version(table, close_id, effective)?;
            open()?;
            Ok(true)
        }
        ScdAction::Supersede { id } => {
            supersede(id)?;
            Ok(true)
        }
        ScdAction::Stale { current_from } => {
            tracing::warn!(
                table = table.name(),
                natural_key,
                effective = %effective,
                current_from = %current_from,
                "忽略过期的版本观测"
            );
            Ok(false)
        }
    }
}

// ==========================================
// dm_restaurants
// ==========================================
pub struct RestaurantsBuilder {
    batch_limit: usize,
}

impl RestaurantsBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }
}

impl BatchBuilder for RestaurantsBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::DmRestaurants
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let docs = StagingRepository::new(conn).list_documents_after(
            StagingSource::OrdersystemRestaurants,
            cursor,
            self.batch_limit,
        )?;
        let scd = ScdRepository::new(conn);

        let mut outcome = BatchOutcome {
            read: docs.len(),
            ..BatchOutcome::default()
        };
        for doc in &docs {
            let parsed: RestaurantDoc = parse_payload(self.task_id(), &doc.object_id, &doc.object_value)?;
            let attrs = RestaurantAttrs {
                restaurant_name: parsed.name,
            };
            let key = doc.object_id.as_str();
            ensure_clean(
                self.task_id().workflow_key(),
                check_scd_effective(ScdTable::Restaurants.name(), &doc.update_ts),
            )?;
            let current = scd.current_restaurant(key)?;
            let action = decide(current.as_ref(), &attrs, &doc.update_ts);

            let changed = apply_action(
                &scd,
                ScdTable::Restaurants,
                key,
                action,
                &doc.update_ts,
                || Ok(scd.open_restaurant_version(key, &attrs, &doc.update_ts)?),
                |id| Ok(scd.update_restaurant_attrs(id, &attrs)?),
            )?;
            if changed {
                outcome.rows += 1;
            }
            outcome.cursor = Some(WorkflowCursor::at_ts_key(doc.update_ts, doc.object_id.clone()));
        }
        Ok(outcome)
    }
}

// ==========================================
// dm_products
// ==========================================
pub struct ProductsBuilder {
    batch_limit: usize,
}

impl ProductsBuilder {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            batch_limit: batch_limit.max(1),
        }
    }
}

impl BatchBuilder for ProductsBuilder {
    fn task_id(&self) -> TaskId {
        TaskId::DmProducts
    }

    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    fn build(&self, conn: &Connection, cursor: &WorkflowCursor) -> PipelineResult<BatchOutcome> {
        let docs = StagingRepository::new(conn).list_documents_after(
            StagingSource::OrdersystemRestaurants,
            cursor,
            self.batch_limit,
        )?;
        let scd = ScdRepository::new(conn);
        let workflow = self.task_id().workflow_key();

        let mut outcome = BatchOutcome {
            read: docs.len(),
            ..BatchOutcome::default()
        };
        for doc in &docs {
            let parsed: RestaurantDoc = parse_payload(self.task_id(), &doc.object_id, &doc.object_value)?;
            ensure_clean(workflow, check_scd_effective(ScdTable::Products.name(), &doc.update_ts))?;

            // 餐厅版本未就绪: 截断批次，已处理部分照常提交
            let Some(restaurant) = scd.restaurant_as_of(&doc.object_id, &doc.update_ts)? else {
                outcome.deferred = Some(MissingReference::new("dm_restaurants", doc.object_id.clone()));
                break;
            };

            for item in parsed.menu {
                let attrs = ProductAttrs {
                    restaurant_id: restaurant.id,
                    product_name: item.name,
                    product_price: item.price,
                };
                ensure_clean(workflow, check_product(&item.id, &attrs))?;

                let current = scd.current_product(&item.id)?;
                let action = decide(current.as_ref(), &attrs, &doc.update_ts);
                let changed = apply_action(
                    &scd,
                    ScdTable::Products,
                    &item.id,
                    action,
                    &doc.update_ts,
                    || Ok(scd.open_product_version(&item.id, &attrs, &doc.update_ts)?),
                    |id| Ok(scd.update_product_attrs(id, &attrs)?),
                )?;
                if changed {
                    outcome.rows += 1;
                }
            }
            outcome.cursor = Some(WorkflowCursor::at_ts_key(doc.update_ts, doc.object_id.clone()));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::staging::{StagedRecord, StgDocument};
    use crate::domain::types::parse_ts;
    use crate::repository::Warehouse;
    use crate::schema::SchemaManager;

    fn warehouse() -> Warehouse {
        let wh = Warehouse::open_in_memory().unwrap();
        SchemaManager::new(wh.clone()).init_all().unwrap();
        wh
    }

    fn land_restaurant(wh: &Warehouse, name: &str, ts: &str, menu: &str) {
        let doc = StagedRecord::Document(StgDocument {
            object_id: "R1".into(),
            object_value: format!(r#"{{"_id":"R1","name":"{}","menu":{}}}"#, name, menu),
            update_ts: parse_ts(ts).unwrap(),
        });
        wh.read(|c| StagingRepository::new(c).upsert(StagingSource::OrdersystemRestaurants, &doc))
            .unwrap();
    }

    fn run(wh: &Warehouse, builder: &dyn BatchBuilder) -> BatchOutcome {
        crate::engine::task::run_transactional_batch(
            wh,
            builder.task_id().layer(),
            builder.task_id().workflow_key(),
            |conn, cursor| builder.build(conn, cursor),
        )
        .unwrap()
    }

    #[test]
    fn test_rename_closes_previous_version() {
        let wh = warehouse();
        let restaurants = RestaurantsBuilder::new(10);
        land_restaurant(&wh, "Bistro A", "2024-01-01 00:00:00", "[]");
        run(&wh, &restaurants);
        land_restaurant(&wh, "Bistro B", "2024-06-01 00:00:00", "[]");
        run(&wh, &restaurants);

        let versions = wh
            .read(|c| ScdRepository::new(c).restaurant_versions("R1"))
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].active_to, parse_ts("2024-06-01 00:00:00").unwrap());
        assert!(versions[1].is_open());
    }

    #[test]
    fn test_far_future_change_keeps_single_open_version() {
        let wh = warehouse();
        let restaurants = RestaurantsBuilder::new(10);
        land_restaurant(&wh, "Bistro A", "2024-01-01 00:00:00", "[]");
        run(&wh, &restaurants);
        land_restaurant(&wh, "Bistro B", "2150-01-01 00:00:00", "[]");
        run(&wh, &restaurants);

        let (versions, current, later) = wh
            .read(|c| {
                let scd = ScdRepository::new(c);
                Ok::<_, crate::repository::RepositoryError>((
                    scd.restaurant_versions("R1")?,
                    scd.current_restaurant("R1")?,
                    scd.restaurant_as_of("R1", &parse_ts("2200-01-01 00:00:00").unwrap())?,
                ))
            })
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[1].active_from < versions[1].active_to);
        assert!(versions[1].is_open());
        assert_eq!(current.map(|r| r.attrs.restaurant_name).as_deref(), Some("Bistro B"));
        assert_eq!(later.map(|r| r.attrs.restaurant_name).as_deref(), Some("Bistro B"));
    }

    #[test]
    fn test_change_at_open_end_rejected() {
        let wh = warehouse();
        land_restaurant(&wh, "Bistro A", "2024-01-01 00:00:00", "[]");
        run(&wh, &RestaurantsBuilder::new(10));
        land_restaurant(&wh, "Bistro B", "2500-01-01 00:00:00", "[]");

        let builder = RestaurantsBuilder::new(10);
        let err = crate::engine::task::run_transactional_batch(
            &wh,
            builder.task_id().layer(),
            builder.task_id().workflow_key(),
            |conn, cursor| builder.build(conn, cursor),
        )
        .unwrap_err();
        assert!(matches!(err, crate::engine::error::PipelineError::ConstraintViolation { .. }));

        let (versions, cursor) = wh
            .read(|c| {
                let versions = ScdRepository::new(c).restaurant_versions("R1")?;
                let cursor = crate::repository::WorkflowSettingsRepository::new(c, crate::domain::types::Layer::Dds)
                    .get_setting(TaskId::DmRestaurants.workflow_key())?
                    .workflow_settings;
                Ok::<_, crate::repository::RepositoryError>((versions, cursor))
            })
            .unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].attrs.restaurant_name, "Bistro A");
        assert_eq!(
            cursor,
            WorkflowCursor::at_ts_key(parse_ts("2024-01-01 00:00:00").unwrap(), "R1")
        );
    }

    #[test]
    fn test_products_defer_until_restaurant_exists() {
        let wh = warehouse();
        land_restaurant(
            &wh,
            "Bistro A",
            "2024-01-01 00:00:00",
            r#"[{"_id":"P1","name":"Soup","price":120.0}]"#,
        );

        let products = ProductsBuilder::new(10);
        let deferred = run(&wh, &products);
        assert_eq!(
            deferred.deferred,
            Some(MissingReference::new("dm_restaurants", "R1"))
        );
        assert_eq!(deferred.cursor, None);

        run(&wh, &RestaurantsBuilder::new(10));
        let done = run(&wh, &products);
        assert!(done.deferred.is_none());
        assert_eq!(done.rows, 1);

        let product = wh
            .read(|c| ScdRepository::new(c).current_product("P1"))
            .unwrap()
            .unwrap();
        assert_eq!(product.attrs.product_name, "Soup");
    }

    #[test]
    fn test_price_change_versions_product() {
        let wh = warehouse();
        land_restaurant(
            &wh,
            "Bistro A",
            "2024-01-01 00:00:00",
            r#"[{"_id":"P1","name":"Soup","price":120.0}]"#,
        );
        run(&wh, &RestaurantsBuilder::new(10));
        run(&wh, &ProductsBuilder::new(10));

        land_restaurant(
            &wh,
            "Bistro A",
            "2024-03-01 00:00:00",
            r#"[{"_id":"P1","name":"Soup","price":150.0}]"#,
        );
        run(&wh, &RestaurantsBuilder::new(10));
        run(&wh, &ProductsBuilder::new(10));

        let versions = wh.read(|c| ScdRepository::new(c).product_versions("P1")).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].attrs.product_price, 120.0);
        assert_eq!(versions[1].attrs.product_price, 150.0);
        // 餐厅名未变，不产生新餐厅版本
        let restaurants = wh.read(|c| ScdRepository::new(c).restaurant_versions("R1")).unwrap();
        assert_eq!(restaurants.len(), 1);
    }
}
