// ==========================================
// 卡支付结算对账 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键 + busy_timeout）
// - 所有仓储共用同一份建表语句，幂等执行
// ==========================================

use crate::domain::types::{CanonicalField, FieldKind};
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "SETTLEMENT_RECON_DB_PATH";

/// 结算记录表: 已接受 / 已过滤
pub const ACCEPTED_TABLE: &str = "accepted_sales";
pub const FILTERED_TABLE: &str = "filtered_sales";

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

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 结算记录表的建表语句（列由字段注册表生成）
fn settlement_table_ddl(table: &str) -> String {
    let mut columns: Vec<String> = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    for field in CanonicalField::ALL {
        let sql_type = match field.kind() {
            FieldKind::Date => "TEXT",
            FieldKind::Decimal => "REAL",
            FieldKind::Text => "TEXT",
        };
        columns.push(format!("{} {}", field.column_name(), sql_type));
    }
    columns.extend(
        [
            "extra_json TEXT NOT NULL DEFAULT '{}'",
            "batch_id TEXT NOT NULL",
            "merchant_id INTEGER NOT NULL",
            "client_id INTEGER",
            "source_file TEXT",
            "processed_at TEXT",
            "processed_by TEXT",
            "filtered INTEGER NOT NULL DEFAULT 0",
            "filter_reason TEXT",
        ]
        .iter()
        .map(|c| c.to_string()),
    );

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n  {}\n);\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_batch ON {table}(batch_id);\n\
         CREATE INDEX IF NOT EXISTS idx_{table}_merchant ON {table}(merchant_id);\n",
        columns.join(",\n  "),
        table = table
    )
}

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
  scope_id TEXT NOT NULL,
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS column_mappings (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  source_name TEXT NOT NULL,
  canonical_name TEXT NOT NULL,
  context TEXT NOT NULL DEFAULT '',
  origin_type TEXT NOT NULL DEFAULT 'V' CHECK (origin_type IN ('V', 'L')),
  active INTEGER NOT NULL DEFAULT 1,
  created_by TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  UNIQUE (source_name, context, origin_type)
);

CREATE TABLE IF NOT EXISTS brand_whitelist (
  merchant_id INTEGER NOT NULL,
  brand TEXT NOT NULL,
  active INTEGER NOT NULL DEFAULT 1,
  updated_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (merchant_id, brand)
);

CREATE TABLE IF NOT EXISTS blocked_terms (
  merchant_id INTEGER NOT NULL,
  term TEXT NOT NULL,
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  PRIMARY KEY (merchant_id, term)
);

CREATE TABLE IF NOT EXISTS settlement_batches (
  batch_id TEXT PRIMARY KEY,
  batch_uid TEXT NOT NULL UNIQUE,
  merchant_id INTEGER NOT NULL,
  client_id INTEGER,
  sequence INTEGER NOT NULL,
  description TEXT,
  created_at TEXT NOT NULL,
  created_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_settlement_batches_merchant
  ON settlement_batches(merchant_id);
"#;

const CALCULATION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sales_calculations (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  sale_id INTEGER NOT NULL REFERENCES accepted_sales(id),
  calc_id TEXT NOT NULL,
  calc_user TEXT,
  calc_date TEXT NOT NULL DEFAULT (datetime('now')),
  fee_registered REAL,
  discount_registered REAL,
  net_registered REAL,
  fee_logged REAL,
  discount_logged REAL,
  net_logged REAL
);

CREATE INDEX IF NOT EXISTS idx_sales_calculations_sale
  ON sales_calculations(sale_id);
"#;

/// 幂等建表并登记 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(BASE_SCHEMA)?;
    conn.execute_batch(&settlement_table_ddl(ACCEPTED_TABLE))?;
    conn.execute_batch(&settlement_table_ddl(FILTERED_TABLE))?;
    conn.execute_batch(CALCULATION_SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 默认数据库路径
///
/// 顺序: 环境变量 SETTLEMENT_RECON_DB_PATH → 用户数据目录 → ./settlement_recon.db
pub fn default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./settlement_recon.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("settlement-recon");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("settlement_recon.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(
            read_schema_version(&conn).unwrap(),
            Some(CURRENT_SCHEMA_VERSION)
        );
    }

    #[test]
    fn test_settlement_table_has_registry_columns() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let mut stmt = conn.prepare("PRAGMA table_info(accepted_sales)").unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for field in CanonicalField::ALL {
            assert!(names.iter().any(|n| n == field.column_name()));
        }
        assert!(names.iter().any(|n| n == "filter_reason"));
    }
}
