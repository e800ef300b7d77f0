// ==========================================
// 结算数据仓库 - 仓库连接句柄
// ==========================================
// 职责: 持有共享连接，提供只读访问与批次事务
// 红线: 一个批次 = 一个事务；闭包返回 Err 时整体回滚
// ==========================================

use rusqlite::{Connection, Transaction};
use std::sync::MutexGuard;

use crate::db::{self, SharedConnection};
use crate::perf;
use crate::repository::error::{RepositoryError, RepositoryResult};

/// 仓库句柄（可廉价克隆，跨任务共享同一连接）
#[derive(Clone)]
pub struct Warehouse {
    conn: SharedConnection,
}

impl Warehouse {
    /// 打开文件型仓库（主库 + stg/dds/cdm 三个命名空间库）
    pub fn open(db_path: &str) -> RepositoryResult<Self> {
        let mut conn = db::open_warehouse(db_path)?;
        perf::install_sqlite_tracing(&mut conn);
        tracing::debug!(db_path, "仓库已打开");
        Ok(Self::from_connection(db::into_shared(conn)))
    }

    /// 打开内存仓库
    pub fn open_in_memory() -> RepositoryResult<Self> {
        let mut conn = db::open_in_memory_warehouse()?;
        perf::install_sqlite_tracing(&mut conn);
        Ok(Self::from_connection(db::into_shared(conn)))
    }

    /// 从已有连接创建
    pub fn from_connection(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 共享连接（供需要自持锁的调用方）
    pub fn shared(&self) -> SharedConnection {
        self.conn.clone()
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 在连接上执行只读（或自管理事务的）操作
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let conn = self.get_conn()?;
        f(&conn)
    }

    /// 在单个事务内执行，成功则提交
    ///
    /// # 返回
    /// - Ok(T): 闭包成功且事务已提交
    /// - Err: 闭包失败（事务回滚）或提交失败
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<RepositoryError>,
    {
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        let out = f(&tx)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let wh = Warehouse::open_in_memory().unwrap();
        wh.read(|c| {
            c.execute_batch("CREATE TABLE stg.t (v INTEGER)")
                .map_err(RepositoryError::from)
        })
        .unwrap();

        let result: RepositoryResult<()> = wh.transaction(|tx| {
            tx.execute("INSERT INTO stg.t (v) VALUES (1)", [])?;
            Err(RepositoryError::field("v", "boom"))
        });
        assert!(result.is_err());

        let count: i64 = wh
            .read(|c| {
                c.query_row("SELECT COUNT(*) FROM stg.t", [], |r| r.get(0))
                    .map_err(RepositoryError::from)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
