// ==========================================
// 结算数据仓库 - 工作流游标仓储
// ==========================================
// 表: <ns>.srv_wf_settings（每个命名空间一张）
// 红线: Repository 不含业务逻辑
// ==========================================

use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::types::Layer;
use crate::domain::workflow::{WorkflowCursor, WorkflowSetting};
use crate::repository::error::{RepositoryError, RepositoryResult};

// ==========================================
// WorkflowSettingsRepository
// ==========================================
/// 工作流游标仓储
///
/// 借用调用方的连接（或事务），使游标与数据在同一事务中提交
pub struct WorkflowSettingsRepository<'a> {
    conn: &'a Connection,
    layer: Layer,
}

impl<'a> WorkflowSettingsRepository<'a> {
    pub fn new(conn: &'a Connection, layer: Layer) -> Self {
        Self { conn, layer }
    }

    fn table(&self) -> String {
        format!("{}.srv_wf_settings", self.layer.namespace())
    }

    /// 读取游标（不存在时返回空游标）
    pub fn get_setting(&self, workflow_key: &str) -> RepositoryResult<WorkflowSetting> {
        let sql = format!(
            "SELECT workflow_settings FROM {} WHERE workflow_key = ?1",
            self.table()
        );
        let raw: Option<String> = self
            .conn
            .query_row(&sql, params![workflow_key], |row| row.get(0))
            .optional()?;

        let cursor = match raw {
            Some(json) => serde_json::from_str::<WorkflowCursor>(&json).map_err(|e| {
                RepositoryError::field(
                    "workflow_settings",
                    format!("{} 的游标无法解析: {}", workflow_key, e),
                )
            })?,
            None => WorkflowCursor::empty(),
        };
        Ok(WorkflowSetting::new(workflow_key, cursor))
    }

    /// 保存游标（按 workflow_key upsert）
    pub fn save_setting(&self, workflow_key: &str, cursor: &WorkflowCursor) -> RepositoryResult<()> {
        let json = serde_json::to_string(cursor)?;
        let sql = format!(
            r#"
            INSERT INTO {} (workflow_key, workflow_settings)
            VALUES (?1, ?2)
            ON CONFLICT (workflow_key) DO UPDATE SET
                workflow_settings = excluded.workflow_settings
            "#,
            self.table()
        );
        self.conn.execute(&sql, params![workflow_key, json])?;
        Ok(())
    }

    /// 列出本命名空间全部游标
    pub fn list_settings(&self) -> RepositoryResult<Vec<WorkflowSetting>> {
        let sql = format!(
            "SELECT workflow_key, workflow_settings FROM {} ORDER BY workflow_key",
            self.table()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut settings = Vec::new();
        for row in rows {
            let (key, json) = row?;
            let cursor: WorkflowCursor = serde_json::from_str(&json)?;
            settings.push(WorkflowSetting::new(key, cursor));
        }
        Ok(settings)
    }

    /// 删除游标（下次运行从头加载）
    ///
    /// # 返回
    /// - Ok(true): 已删除
    /// - Ok(false): 游标不存在
    pub fn reset_setting(&self, workflow_key: &str) -> RepositoryResult<bool> {
        let sql = format!("DELETE FROM {} WHERE workflow_key = ?1", self.table());
        let n = self.conn.execute(&sql, params![workflow_key])?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::parse_ts;
    use crate::schema::SchemaManager;
    use crate::repository::Warehouse;

    fn warehouse() -> Warehouse {
        let wh = Warehouse::open_in_memory().unwrap();
        SchemaManager::new(wh.clone()).init_all().unwrap();
        wh
    }

    #[test]
    fn test_absent_key_yields_empty_cursor() {
        let wh = warehouse();
        let setting = wh
            .read(|c| WorkflowSettingsRepository::new(c, Layer::Stg).get_setting("nope"))
            .unwrap();
        assert!(setting.workflow_settings.is_empty());
    }

    #[test]
    fn test_save_is_upsert_and_namespaced() {
        let wh = warehouse();
        let first = WorkflowCursor::at_id(1);
        let second = WorkflowCursor::at_ts_key(parse_ts("2024-06-01 00:00:00").unwrap(), "O-1");

        wh.read(|c| {
            let repo = WorkflowSettingsRepository::new(c, Layer::Dds);
            repo.save_setting("k", &first)?;
            repo.save_setting("k", &second)?;
            Ok::<_, RepositoryError>(())
        })
        .unwrap();

        let (dds, stg) = wh
            .read(|c| {
                Ok::<_, RepositoryError>((
                    WorkflowSettingsRepository::new(c, Layer::Dds).list_settings()?,
                    WorkflowSettingsRepository::new(c, Layer::Stg).list_settings()?,
                ))
            })
            .unwrap();
        assert_eq!(dds.len(), 1);
        assert_eq!(dds[0].workflow_settings, second);
        assert!(stg.is_empty());
    }

    #[test]
    fn test_reset_setting() {
        let wh = warehouse();
        let removed = wh
            .read(|c| {
                let repo = WorkflowSettingsRepository::new(c, Layer::Cdm);
                repo.save_setting("k", &WorkflowCursor::at_id(3))?;
                let a = repo.reset_setting("k")?;
                let b = repo.reset_setting("k")?;
                Ok::<_, RepositoryError>((a, b))
            })
            .unwrap();
        assert_eq!(removed, (true, false));
    }
}
