// ==========================================
// 卡支付结算对账 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::ImportConfigReader;
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::types::BatchAllocation;
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
            ensure_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// 全部 global 配置（按键排序）
    pub fn list_global(&self) -> RepositoryResult<BTreeMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![GLOBAL_SCOPE], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> ImportResult<String> {
        let value = self
            .get_global_config_value(key)
            .map_err(|e| ImportError::Config {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    fn get_parsed<T: FromStr>(&self, key: &str, default: &str) -> ImportResult<T>
    where
        T::Err: std::fmt::Display,
    {
        let raw = self.get_config_or_default(key, default)?;
        raw.parse::<T>().map_err(|e| ImportError::Config {
            key: key.to_string(),
            message: format!("值 {} 无法解析: {}", raw, e),
        })
    }
}

impl ImportConfigReader for ConfigManager {
    fn get_header_min_filled(&self) -> ImportResult<usize> {
        self.get_parsed(config_keys::HEADER_MIN_FILLED, "10")
    }

    fn get_date_format(&self) -> ImportResult<String> {
        self.get_config_or_default(config_keys::DATE_FORMAT, "%d/%m/%Y")
    }

    fn get_dedupe_enabled(&self) -> ImportResult<bool> {
        let raw = self.get_config_or_default(config_keys::DEDUPE_ENABLED, "true")?;
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ImportError::Config {
                key: config_keys::DEDUPE_ENABLED.to_string(),
                message: format!("值 {} 不是布尔值", raw),
            }),
        }
    }

    fn get_batch_id_retry_limit(&self) -> ImportResult<u32> {
        self.get_parsed(config_keys::BATCH_ID_RETRY_LIMIT, "3")
    }

    fn get_batch_allocation(&self) -> ImportResult<BatchAllocation> {
        self.get_parsed(config_keys::BATCH_ALLOCATION, "SEQUENTIAL")
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 表头检测
    pub const HEADER_MIN_FILLED: &str = "header_min_filled";

    // 标准化
    pub const DATE_FORMAT: &str = "date_format";

    // 去重
    pub const DEDUPE_ENABLED: &str = "dedupe_enabled";

    // 批次
    pub const BATCH_ID_RETRY_LIMIT: &str = "batch_id_retry_limit";
    pub const BATCH_ALLOCATION: &str = "batch_allocation";
}
