// ==========================================
// 卡支付结算对账 - 结算记录仓储
// ==========================================
// 职责: 管理 accepted_sales / filtered_sales 表
// 红线: 记录落库后不可修改，只能随批次级联删除
// 红线: 去重永不删除已挂接计算结果的行
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection, ACCEPTED_TABLE, FILTERED_TABLE};
use crate::domain::record::{CanonicalRecord, FilterReason};
use crate::domain::types::{CanonicalField, FieldKind, FieldValue};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::SettlementStore;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const DATE_STORAGE_FORMAT: &str = "%Y-%m-%d";
const STAMP_STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 审计/归属列（紧跟标准列之后）
const AUDIT_COLUMNS: [&str; 9] = [
    "extra_json",
    "batch_id",
    "merchant_id",
    "client_id",
    "source_file",
    "processed_at",
    "processed_by",
    "filtered",
    "filter_reason",
];

/// 去重业务键中除标准列之外的列
const DEDUPE_EXTRA_KEYS: [&str; 4] = ["filtered", "batch_id", "merchant_id", "client_id"];

// ==========================================
// SettlementTable - 分区对应的表
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementTable {
    Accepted,
    Filtered,
}

impl SettlementTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            SettlementTable::Accepted => ACCEPTED_TABLE,
            SettlementTable::Filtered => FILTERED_TABLE,
        }
    }

    fn filtered_flag(&self) -> i64 {
        match self {
            SettlementTable::Accepted => 0,
            SettlementTable::Filtered => 1,
        }
    }
}

fn field_to_sql(value: &FieldValue) -> Value {
    match value {
        FieldValue::Date(d) => Value::Text(d.format(DATE_STORAGE_FORMAT).to_string()),
        FieldValue::Decimal(v) => Value::Real(*v),
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Missing => Value::Null,
    }
}

fn field_from_sql(field: CanonicalField, value: Value) -> FieldValue {
    match (field.kind(), value) {
        (_, Value::Null) => FieldValue::Missing,
        (FieldKind::Date, Value::Text(s)) => NaiveDate::parse_from_str(&s, DATE_STORAGE_FORMAT)
            .map(FieldValue::Date)
            .unwrap_or(FieldValue::Missing),
        (FieldKind::Decimal, Value::Real(v)) => FieldValue::Decimal(v),
        (FieldKind::Decimal, Value::Integer(v)) => FieldValue::Decimal(v as f64),
        (_, Value::Text(s)) => FieldValue::Text(s),
        (_, Value::Integer(v)) => FieldValue::Text(v.to_string()),
        (_, Value::Real(v)) => FieldValue::Text(v.to_string()),
        (_, Value::Blob(_)) => FieldValue::Missing,
    }
}

fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        _ => None,
    }
}

fn value_int(value: Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(v),
        _ => None,
    }
}

fn all_columns() -> Vec<&'static str> {
    CanonicalField::ALL
        .iter()
        .map(|f| f.column_name())
        .chain(AUDIT_COLUMNS.iter().copied())
        .collect()
}

fn record_to_row(table: SettlementTable, record: &CanonicalRecord) -> RepositoryResult<Vec<Value>> {
    let batch_id = record.audit.batch_id.clone().ok_or_else(|| {
        RepositoryError::ValidationError(format!("第 {} 行缺少 batch_id", record.source_row))
    })?;
    let merchant_id = record.audit.merchant_id.ok_or_else(|| {
        RepositoryError::ValidationError(format!("第 {} 行缺少 merchant_id", record.source_row))
    })?;

    let mut row: Vec<Value> = CanonicalField::ALL
        .iter()
        .map(|f| field_to_sql(record.get(*f)))
        .collect();

    row.push(Value::Text(serde_json::to_string(record.extras())?));
    row.push(Value::Text(batch_id));
    row.push(Value::Integer(merchant_id));
    row.push(record.audit.client_id.map(Value::Integer).unwrap_or(Value::Null));
    row.push(
        record
            .audit
            .source_file
            .clone()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    );
    row.push(
        record
            .audit
            .processed_at
            .map(|t| Value::Text(t.format(STAMP_STORAGE_FORMAT).to_string()))
            .unwrap_or(Value::Null),
    );
    row.push(
        record
            .audit
            .processed_by
            .clone()
            .map(Value::Text)
            .unwrap_or(Value::Null),
    );
    row.push(Value::Integer(table.filtered_flag()));
    row.push(
        record
            .filter_reason
            .as_ref()
            .map(|r| Value::Text(r.to_string()))
            .unwrap_or(Value::Null),
    );
    Ok(row)
}

pub struct SettlementRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SettlementRepository {
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

    fn ensure_table(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        ensure_schema(&conn)?;
        Ok(())
    }

    /// 批次内行 ID（升序）
    pub fn row_ids(&self, table: SettlementTable, batch_id: &str) -> RepositoryResult<Vec<i64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM {} WHERE batch_id = ?1 ORDER BY id",
            table.table_name()
        ))?;
        let ids = stmt
            .query_map(params![batch_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

impl SettlementStore for SettlementRepository {
    fn bulk_append(
        &self,
        table: SettlementTable,
        records: &[CanonicalRecord],
    ) -> RepositoryResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let columns = all_columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.table_name(),
            columns.join(", "),
            placeholders
        );

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                let row = record_to_row(table, record)?;
                stmt.execute(params_from_iter(row))?;
            }
        }
        tx.commit()?;

        Ok(records.len())
    }

    fn remove_intra_batch_duplicates(
        &self,
        table: SettlementTable,
        batch_id: &str,
    ) -> RepositoryResult<usize> {
        let name = table.table_name();
        let group_by: Vec<&str> = CanonicalField::ALL
            .iter()
            .map(|f| f.column_name())
            .chain(DEDUPE_EXTRA_KEYS.iter().copied())
            .collect();

        // 仅已接受表会被计算结果引用
        let calc_guard = match table {
            SettlementTable::Accepted => format!(
                "AND NOT EXISTS (SELECT 1 FROM sales_calculations c WHERE c.sale_id = {}.id)",
                name
            ),
            SettlementTable::Filtered => String::new(),
        };

        let sql = format!(
            r#"
            DELETE FROM {name}
            WHERE batch_id = ?1
              AND id NOT IN (
                  SELECT MIN(id) FROM {name}
                  WHERE batch_id = ?1
                  GROUP BY {group_by}
              )
              {calc_guard}
            "#,
            name = name,
            group_by = group_by.join(", "),
            calc_guard = calc_guard,
        );

        let conn = self.get_conn()?;
        let removed = conn.execute(&sql, params![batch_id])?;
        Ok(removed)
    }

    fn count_by_batch(&self, table: SettlementTable, batch_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE batch_id = ?1",
                table.table_name()
            ),
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn load_by_batch(
        &self,
        table: SettlementTable,
        batch_id: &str,
    ) -> RepositoryResult<Vec<CanonicalRecord>> {
        let columns = all_columns();
        let sql = format!(
            "SELECT {} FROM {} WHERE batch_id = ?1 ORDER BY id",
            columns.join(", "),
            table.table_name()
        );

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![batch_id], |row| {
                let mut values = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    values.push(row.get::<_, Value>(idx)?);
                }
                Ok(values)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for values in rows {
            let mut iter = values.into_iter();
            let mut record = CanonicalRecord::new(0);

            for field in CanonicalField::ALL {
                let value = iter.next().unwrap_or(Value::Null);
                let value = field_from_sql(field, value);
                if !value.is_missing() {
                    record.set(field, value);
                }
            }

            let mut audit = iter;
            let mut next = || audit.next().unwrap_or(Value::Null);

            if let Some(json) = value_text(next()) {
                let extras: BTreeMap<String, String> = serde_json::from_str(&json)?;
                for (k, v) in extras {
                    record.set_extra(k, v);
                }
            }
            record.audit.batch_id = value_text(next());
            record.audit.merchant_id = value_int(next());
            record.audit.client_id = value_int(next());
            record.audit.source_file = value_text(next());
            record.audit.processed_at = value_text(next())
                .and_then(|s| NaiveDateTime::parse_from_str(&s, STAMP_STORAGE_FORMAT).ok());
            record.audit.processed_by = value_text(next());
            let _filtered = next();
            record.filter_reason = value_text(next()).and_then(|s| FilterReason::parse_label(&s));

            records.push(record);
        }

        Ok(records)
    }
}
