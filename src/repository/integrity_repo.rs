// ==========================================
// 结算数据仓库 - 完整性探针仓储
// ==========================================
// 用途: 外键孤儿行扫描（例如关闭外键时写入的历史数据）
// ==========================================

use rusqlite::Connection;
use serde::Serialize;

use crate::repository::error::{RepositoryError, RepositoryResult};

/// 外键孤儿行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FkOrphan {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
}

pub struct IntegrityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> IntegrityRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 扫描某个命名空间内全部外键
    pub fn foreign_key_orphans(&self, namespace: &str) -> RepositoryResult<Vec<FkOrphan>> {
        if !crate::db::NAMESPACES.contains(&namespace) {
            return Err(RepositoryError::field("namespace", format!("未知命名空间: {}", namespace)));
        }
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA {}.foreign_key_check", namespace))?;
        let rows = stmt.query_map([], |row| {
            Ok(FkOrphan {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(RepositoryError::from)
    }
}
