// ==========================================
// 卡支付结算对账 - 列映射仓储
// ==========================================
// 职责: 管理 column_mappings 表
// 唯一键: (source_name, context, origin_type)
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::mapping::{ColumnMapping, MappingQuery, NewColumnMapping};
use crate::domain::types::{CanonicalField, OriginType};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::ColumnMappingStore;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "id, source_name, canonical_name, context, origin_type, active, \
                              created_by, created_at, updated_at";

/// 数据库原始行（canonical_name / origin_type 尚未校验）
struct MappingRow {
    id: i64,
    source_name: String,
    canonical_name: String,
    context: String,
    origin_type: String,
    active: bool,
    created_by: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl MappingRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source_name: row.get(1)?,
            canonical_name: row.get(2)?,
            context: row.get(3)?,
            origin_type: row.get(4)?,
            active: row.get::<_, i64>(5)? != 0,
            created_by: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_entity(self) -> RepositoryResult<ColumnMapping> {
        let canonical_name = self.canonical_name.parse::<CanonicalField>().map_err(|e| {
            RepositoryError::FieldValueError {
                field: "canonical_name".to_string(),
                message: e,
            }
        })?;
        let origin_type = OriginType::from_code(&self.origin_type).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "origin_type".to_string(),
                message: format!("未知来源类型: {}", self.origin_type),
            }
        })?;

        Ok(ColumnMapping {
            id: self.id,
            source_name: self.source_name,
            canonical_name,
            context: self.context,
            origin_type,
            active: self.active,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct ColumnMappingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ColumnMappingRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.ensure_table()?;
        Ok(repo)
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let repo = Self { conn };
        repo.ensure_table()?;
        Ok(repo)
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 确保表存在（如果不存在则创建）
    fn ensure_table(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        ensure_schema(&conn)?;
        Ok(())
    }

    fn validate(mapping: &NewColumnMapping) -> RepositoryResult<()> {
        if mapping.source_name.trim().is_empty() {
            return Err(RepositoryError::ValidationError(
                "源列名不能为空".to_string(),
            ));
        }
        if !mapping.canonical_name.is_mappable() {
            return Err(RepositoryError::ValidationError(format!(
                "字段不可映射: {}",
                mapping.canonical_name
            )));
        }
        Ok(())
    }

    fn now() -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

impl ColumnMappingStore for ColumnMappingRepository {
    fn list(&self, query: &MappingQuery) -> RepositoryResult<Vec<ColumnMapping>> {
        let mut sql = format!("SELECT {} FROM column_mappings WHERE 1 = 1", SELECT_COLUMNS);
        let mut values: Vec<String> = Vec::new();

        if let Some(context) = query.normalized_context() {
            values.push(context.to_string());
            sql.push_str(&format!(" AND context = ?{}", values.len()));
        }
        if let Some(origin) = query.origin_type {
            values.push(origin.code().to_string());
            sql.push_str(&format!(" AND origin_type = ?{}", values.len()));
        }
        if query.active_only {
            sql.push_str(" AND active = 1");
        }
        sql.push_str(" ORDER BY context, source_name");

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), MappingRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(MappingRow::into_entity).collect()
    }

    fn insert(&self, mapping: &NewColumnMapping) -> RepositoryResult<i64> {
        Self::validate(mapping)?;
        let now = Self::now();
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO column_mappings (
                source_name, canonical_name, context, origin_type,
                active, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
            params![
                mapping.source_name.trim(),
                mapping.canonical_name.column_name(),
                mapping.context.trim(),
                mapping.origin_type.code(),
                mapping.active as i64,
                mapping.created_by,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn upsert(&self, mapping: &NewColumnMapping) -> RepositoryResult<i64> {
        Self::validate(mapping)?;
        let now = Self::now();
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO column_mappings (
                source_name, canonical_name, context, origin_type,
                active, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(source_name, context, origin_type) DO UPDATE SET
                canonical_name = excluded.canonical_name,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
            params![
                mapping.source_name.trim(),
                mapping.canonical_name.column_name(),
                mapping.context.trim(),
                mapping.origin_type.code(),
                mapping.active as i64,
                mapping.created_by,
                now,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM column_mappings WHERE source_name = ?1 AND context = ?2 AND origin_type = ?3",
            params![
                mapping.source_name.trim(),
                mapping.context.trim(),
                mapping.origin_type.code()
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn update(&self, id: i64, mapping: &NewColumnMapping) -> RepositoryResult<()> {
        Self::validate(mapping)?;
        let conn = self.get_conn()?;
        let affected = conn.execute(
            r#"
            UPDATE column_mappings SET
                source_name = ?1,
                canonical_name = ?2,
                context = ?3,
                origin_type = ?4,
                active = ?5,
                updated_at = ?6
            WHERE id = ?7
            "#,
            params![
                mapping.source_name.trim(),
                mapping.canonical_name.column_name(),
                mapping.context.trim(),
                mapping.origin_type.code(),
                mapping.active as i64,
                Self::now(),
                id,
            ],
        )?;

        if affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ColumnMapping".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let affected = conn.execute("DELETE FROM column_mappings WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    fn find_by_key(
        &self,
        source_name: &str,
        context: &str,
        origin_type: OriginType,
    ) -> RepositoryResult<Option<ColumnMapping>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM column_mappings \
                     WHERE source_name = ?1 AND context = ?2 AND origin_type = ?3",
                    SELECT_COLUMNS
                ),
                params![source_name.trim(), context.trim(), origin_type.code()],
                MappingRow::from_row,
            )
            .optional()?;

        row.map(MappingRow::into_entity).transpose()
    }

    fn load_active_map(
        &self,
        context: &str,
        origin_type: OriginType,
    ) -> RepositoryResult<HashMap<String, CanonicalField>> {
        let query = MappingQuery {
            context: Some(context.to_string()),
            origin_type: Some(origin_type),
            active_only: true,
        };

        Ok(self
            .list(&query)?
            .into_iter()
            .map(|m| (m.source_name, m.canonical_name))
            .collect())
    }

    fn list_contexts(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT context FROM column_mappings WHERE context <> '' ORDER BY context",
        )?;
        let contexts = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(contexts)
    }
}
