// ==========================================
// 结算数据仓库 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有连接的 PRAGMA 行为（外键、busy_timeout）
// - 将 stg / dds / cdm 三个命名空间挂载到同一连接上
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version（与 `sql/<layer>/*.sql` 对齐）
///
/// 说明：版本号仅用于告警，不做自动降级。
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 仓库的三个命名空间（按数据流向排列）
pub const NAMESPACES: [&str; 3] = ["stg", "dds", "cdm"];

/// 共享连接类型（仓储层统一使用）
pub type SharedConnection = Arc<Mutex<Connection>>;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 命名空间对应的数据库文件路径
///
/// `dwh.db` → `dwh.stg.db` / `dwh.dds.db` / `dwh.cdm.db`
pub fn namespace_file_path(db_path: &Path, namespace: &str) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "dwh".to_string());
    db_path.with_file_name(format!("{}.{}.db", stem, namespace))
}

/// 挂载命名空间（已挂载则跳过）
fn attach_namespace(conn: &Connection, namespace: &str, target: &str) -> rusqlite::Result<()> {
    if is_namespace_attached(conn, namespace)? {
        return Ok(());
    }
    // 命名空间名来自 NAMESPACES 常量，不接受外部输入
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {}", namespace),
        rusqlite::params![target],
    )?;
    Ok(())
}

/// 检查命名空间是否已挂载
pub fn is_namespace_attached(conn: &Connection, namespace: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == namespace {
            return Ok(true);
        }
    }
    Ok(false)
}

/// 打开文件型仓库：主库 + 三个命名空间库
pub fn open_warehouse(db_path: &str) -> rusqlite::Result<Connection> {
    let path = Path::new(db_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let conn = Connection::open(path)?;
    for ns in NAMESPACES {
        let ns_path = namespace_file_path(path, ns);
        attach_namespace(&conn, ns, &ns_path.to_string_lossy())?;
    }
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存仓库（测试/嵌入场景）
pub fn open_in_memory_warehouse() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    for ns in NAMESPACES {
        attach_namespace(&conn, ns, ":memory:")?;
    }
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 包装为共享连接
pub fn into_shared(conn: Connection) -> SharedConnection {
    Arc::new(Mutex::new(conn))
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM main.sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM main.schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 检查 schema_version 是否与代码期望一致，不一致时告警
pub fn warn_on_schema_mismatch(conn: &Connection) -> rusqlite::Result<()> {
    match read_schema_version(conn)? {
        Some(v) if v == CURRENT_SCHEMA_VERSION => {}
        Some(v) => tracing::warn!(
            found = v,
            expected = CURRENT_SCHEMA_VERSION,
            "仓库 schema_version 与当前代码不一致，请先执行 dwh init"
        ),
        None => tracing::warn!("仓库尚未初始化 schema，请先执行 dwh init"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_warehouse_attaches_namespaces() {
        let conn = open_in_memory_warehouse().unwrap();
        for ns in NAMESPACES {
            assert!(is_namespace_attached(&conn, ns).unwrap(), "{} 未挂载", ns);
        }
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_namespace_file_path() {
        let p = namespace_file_path(Path::new("/tmp/data/dwh.db"), "stg");
        assert_eq!(p, PathBuf::from("/tmp/data/dwh.stg.db"));
    }

    #[test]
    fn test_schema_version_absent_before_init() {
        let conn = open_in_memory_warehouse().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
