// ==========================================
// 结算数据仓库 - Schema 管理
// ==========================================
// DDL: sql/<layer>/*.sql（编译期嵌入，按文件名顺序执行）
// 日志: main.schema_migrations 记录已执行脚本，重复初始化为空操作
// ==========================================

use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::CURRENT_SCHEMA_VERSION;
use crate::domain::types::{Layer, TS_FORMAT};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::Warehouse;

/// 嵌入的 DDL 脚本
#[derive(Debug, Clone, Copy)]
pub struct SchemaScript {
    pub layer: Layer,
    pub name: &'static str,
    pub sql: &'static str,
}

/// 全部脚本（同层内按文件名排序）
pub const SCRIPTS: &[SchemaScript] = &[
    SchemaScript {
        layer: Layer::Stg,
        name: "001_ordersystem.sql",
        sql: include_str!("../sql/stg/001_ordersystem.sql"),
    },
    SchemaScript {
        layer: Layer::Stg,
        name: "002_deliverysystem.sql",
        sql: include_str!("../sql/stg/002_deliverysystem.sql"),
    },
    SchemaScript {
        layer: Layer::Stg,
        name: "003_bonussystem.sql",
        sql: include_str!("../sql/stg/003_bonussystem.sql"),
    },
    SchemaScript {
        layer: Layer::Stg,
        name: "004_srv_wf_settings.sql",
        sql: include_str!("../sql/stg/004_srv_wf_settings.sql"),
    },
    SchemaScript {
        layer: Layer::Dds,
        name: "001_dimensions.sql",
        sql: include_str!("../sql/dds/001_dimensions.sql"),
    },
    SchemaScript {
        layer: Layer::Dds,
        name: "002_dm_orders.sql",
        sql: include_str!("../sql/dds/002_dm_orders.sql"),
    },
    SchemaScript {
        layer: Layer::Dds,
        name: "003_facts.sql",
        sql: include_str!("../sql/dds/003_facts.sql"),
    },
    SchemaScript {
        layer: Layer::Dds,
        name: "004_srv_wf_settings.sql",
        sql: include_str!("../sql/dds/004_srv_wf_settings.sql"),
    },
    SchemaScript {
        layer: Layer::Cdm,
        name: "001_dm_settlement_report.sql",
        sql: include_str!("../sql/cdm/001_dm_settlement_report.sql"),
    },
    SchemaScript {
        layer: Layer::Cdm,
        name: "002_dm_courier_ledger.sql",
        sql: include_str!("../sql/cdm/002_dm_courier_ledger.sql"),
    },
    SchemaScript {
        layer: Layer::Cdm,
        name: "003_srv_wf_settings.sql",
        sql: include_str!("../sql/cdm/003_srv_wf_settings.sql"),
    },
];

const JOURNAL_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS main.schema_migrations (
    layer TEXT NOT NULL,
    script TEXT NOT NULL,
    applied_at TEXT NOT NULL,
    PRIMARY KEY (layer, script)
);
CREATE TABLE IF NOT EXISTS main.schema_version (
    version INTEGER NOT NULL PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

// ==========================================
// SchemaManager
// ==========================================
pub struct SchemaManager {
    warehouse: Warehouse,
}

impl SchemaManager {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    /// 初始化全部分层
    ///
    /// # 返回
    /// - Ok(n): 本次新执行的脚本数（已初始化的仓库返回 0）
    pub fn init_all(&self) -> RepositoryResult<usize> {
        let mut applied = 0;
        for layer in Layer::ALL {
            applied += self.init_layer(layer)?;
        }
        self.warehouse.transaction(|tx| write_version(tx))?;
        Ok(applied)
    }

    /// 初始化单个分层（同层脚本在一个事务内执行）
    pub fn init_layer(&self, layer: Layer) -> RepositoryResult<usize> {
        self.warehouse.transaction(|tx| {
            tx.execute_batch(JOURNAL_DDL)?;
            let mut applied = 0;
            for script in SCRIPTS.iter().filter(|s| s.layer == layer) {
                if is_applied(tx, script)? {
                    continue;
                }
                tx.execute_batch(script.sql).map_err(|e| {
                    RepositoryError::DatabaseQueryError(format!(
                        "执行 {}/{} 失败: {}",
                        layer, script.name, e
                    ))
                })?;
                tx.execute(
                    "INSERT INTO main.schema_migrations (layer, script, applied_at) VALUES (?1, ?2, ?3)",
                    params![layer.namespace(), script.name, now_text()],
                )?;
                tracing::info!(layer = %layer, script = script.name, "DDL 已执行");
                applied += 1;
            }
            Ok(applied)
        })
    }

    /// 已执行的脚本 (layer, script)
    pub fn applied_scripts(&self) -> RepositoryResult<Vec<(String, String)>> {
        self.warehouse.read(|conn| {
            if !journal_exists(conn)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(
                "SELECT layer, script FROM main.schema_migrations ORDER BY applied_at, layer, script",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
        })
    }
}

fn now_text() -> String {
    Local::now().naive_local().format(TS_FORMAT).to_string()
}

fn journal_exists(conn: &Connection) -> RepositoryResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM main.sqlite_master WHERE type = 'table' AND name = 'schema_migrations'",
            [],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn is_applied(conn: &Connection, script: &SchemaScript) -> RepositoryResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM main.schema_migrations WHERE layer = ?1 AND script = ?2",
            params![script.layer.namespace(), script.name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn write_version(conn: &Connection) -> RepositoryResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO main.schema_version (version, applied_at) VALUES (?1, ?2)",
        params![CURRENT_SCHEMA_VERSION, now_text()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::read_schema_version;

    #[test]
    fn test_init_is_idempotent() {
        let wh = Warehouse::open_in_memory().unwrap();
        let manager = SchemaManager::new(wh.clone());

        assert_eq!(manager.init_all().unwrap(), SCRIPTS.len());
        assert_eq!(manager.init_all().unwrap(), 0);
        assert_eq!(manager.applied_scripts().unwrap().len(), SCRIPTS.len());

        let version = wh
            .read(|c| read_schema_version(c).map_err(RepositoryError::from))
            .unwrap();
        assert_eq!(version, Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_every_layer_gets_its_tables() {
        let wh = Warehouse::open_in_memory().unwrap();
        SchemaManager::new(wh.clone()).init_all().unwrap();

        let expected = [
            ("stg", 9),  // 8 张贴源表 + srv_wf_settings
            ("dds", 9),  // 6 维度 + 2 事实 + srv_wf_settings
            ("cdm", 3),  // 2 集市 + srv_wf_settings
        ];
        for (ns, n) in expected {
            let count: i64 = wh
                .read(|c| {
                    c.query_row(
                        &format!(
                            "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                            ns
                        ),
                        [],
                        |r| r.get(0),
                    )
                    .map_err(RepositoryError::from)
                })
                .unwrap();
            assert_eq!(count, n, "命名空间 {} 表数量不符", ns);
        }
    }
}
