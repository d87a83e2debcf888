// ==========================================
// 卡支付结算对账 - 标准化（Normalizer）
// ==========================================
// 日期字段: 按日期格式严格解析（默认 %d/%m/%Y），失败 → 缺失哨兵
// 金额字段: 逗号 → 点，去空白，空 → 0.0，无法解析 → 0.0
// 文本字段: 去首尾空白，空 → 缺失
// 红线: 不丢弃任何行; 每次强制转换都记录到 coercions
// ==========================================

use crate::domain::record::{
    CanonicalRecord, Coercion, CoercionKind, ColumnKey, MappedTable, NormalizationReport,
};
use crate::domain::types::{CanonicalField, FieldKind, FieldValue};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::importer_trait::Normalizer;
use chrono::{Local, NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use tracing::{info, warn};

pub const DEFAULT_DATE_FORMAT: &str = "%d/%m/%Y";

/// 操作人为空时的占位
pub const UNKNOWN_OPERATOR: &str = "unknown";

#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    date_format: String,
    /// 固定处理时间（测试用）; None 取当前本地时间
    fixed_now: Option<NaiveDateTime>,
}

impl Default for FieldNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT)
    }
}

impl FieldNormalizer {
    pub fn new(date_format: &str) -> Self {
        Self {
            date_format: date_format.to_string(),
            fixed_now: None,
        }
    }

    pub fn with_fixed_now(mut self, now: NaiveDateTime) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// 日期: 空 → 缺失（不算强制转换）; 不可解析 → 缺失 + 强制转换
    pub fn parse_date(&self, raw: &str) -> (FieldValue, Option<CoercionKind>) {
        let raw = raw.trim();
        if raw.is_empty() {
            return (FieldValue::Missing, None);
        }
        match NaiveDate::parse_from_str(raw, &self.date_format) {
            Ok(date) => (FieldValue::Date(date), None),
            Err(_) => (FieldValue::Missing, Some(CoercionKind::UnparsableDate)),
        }
    }

    /// 金额: 空 → 0.0; 不可解析或非有限值 → 0.0 + 强制转换
    pub fn parse_decimal(raw: &str) -> (FieldValue, Option<CoercionKind>) {
        let cleaned: String = raw
            .replace(',', ".")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if cleaned.is_empty() {
            return (FieldValue::Decimal(0.0), None);
        }
        match cleaned.parse::<f64>() {
            Ok(v) if v.is_finite() => (FieldValue::Decimal(v), None),
            _ => (FieldValue::Decimal(0.0), Some(CoercionKind::UnparsableDecimal)),
        }
    }

    fn parse_text(raw: &str) -> FieldValue {
        let raw = raw.trim();
        if raw.is_empty() {
            FieldValue::Missing
        } else {
            FieldValue::Text(raw.to_string())
        }
    }

    fn convert(&self, field: CanonicalField, raw: &str) -> (FieldValue, Option<CoercionKind>) {
        match field.kind() {
            FieldKind::Date => self.parse_date(raw),
            FieldKind::Decimal => Self::parse_decimal(raw),
            FieldKind::Text => (Self::parse_text(raw), None),
        }
    }

    /// 列名 → ColumnKey; 同一标准列出现多次 → MappingCollision
    fn resolve_columns(table: &MappedTable) -> ImportResult<Vec<ColumnKey>> {
        let mut seen_canonical: HashSet<CanonicalField> = HashSet::new();
        let mut seen_unmapped: HashSet<String> = HashSet::new();
        let mut keys = Vec::with_capacity(table.columns.len());

        for name in &table.columns {
            match ColumnKey::parse(name) {
                ColumnKey::Canonical(field) => {
                    if !seen_canonical.insert(field) {
                        let sources = table
                            .collisions
                            .iter()
                            .find(|c| c.canonical_name == field.column_name())
                            .map(|c| c.source_names.join(", "))
                            .unwrap_or_else(|| field.column_name().to_string());
                        return Err(ImportError::MappingCollision {
                            canonical_name: field.column_name().to_string(),
                            sources,
                        });
                    }
                    keys.push(ColumnKey::Canonical(field));
                }
                ColumnKey::Unmapped(original) => {
                    // 同名未映射列加序号区分
                    let mut candidate = original.clone();
                    let mut n = 2;
                    while !seen_unmapped.insert(candidate.clone()) {
                        candidate = format!("{} ({})", original, n);
                        n += 1;
                    }
                    keys.push(ColumnKey::Unmapped(candidate));
                }
            }
        }
        Ok(keys)
    }
}

impl Normalizer for FieldNormalizer {
    fn normalize(&self, table: &MappedTable, operator: &str) -> ImportResult<NormalizationReport> {
        let columns = Self::resolve_columns(table)?;

        let operator = match operator.trim() {
            "" => UNKNOWN_OPERATOR.to_string(),
            op => op.to_string(),
        };
        let processed_at = self
            .fixed_now
            .unwrap_or_else(|| Local::now().naive_local());

        let mut records = Vec::with_capacity(table.rows.len());
        let mut coercions = Vec::new();

        for (offset, row) in table.rows.iter().enumerate() {
            let source_row = table.header_index + 1 + offset;
            let mut record = CanonicalRecord::new(source_row);

            for (col_idx, key) in columns.iter().enumerate() {
                let raw = row.get(col_idx).map(String::as_str).unwrap_or("").trim();
                match key {
                    ColumnKey::Canonical(field) => {
                        let (value, coercion) = self.convert(*field, raw);
                        if let Some(kind) = coercion {
                            warn!(row = source_row, field = %field, raw, kind = ?kind, "取值强制转换");
                            coercions.push(Coercion {
                                source_row,
                                field: *field,
                                raw_value: raw.to_string(),
                                kind,
                            });
                        }
                        record.set(*field, value);
                    }
                    ColumnKey::Unmapped(name) => record.set_extra(name.clone(), raw),
                }
            }

            record.audit.processed_at = Some(processed_at);
            record.audit.processed_by = Some(operator.clone());
            records.push(record);
        }

        info!(
            rows = records.len(),
            coercions = coercions.len(),
            "标准化完成"
        );

        Ok(NormalizationReport {
            columns,
            records,
            coercions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn mapped(columns: &[&str], rows: Vec<Vec<&str>>) -> MappedTable {
        MappedTable {
            header_index: 0,
            columns: columns.iter().map(|s| s.to_string()).collect(),
            substitutions: BTreeMap::new(),
            collisions: vec![],
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(String::from).collect())
                .collect(),
        }
    }

    #[test]
    fn test_decimal_rules() {
        assert_eq!(FieldNormalizer::parse_decimal("10,50").0, FieldValue::Decimal(10.5));
        assert_eq!(FieldNormalizer::parse_decimal("").0, FieldValue::Decimal(0.0));
        assert_eq!(FieldNormalizer::parse_decimal(" 1 000,5 ").0, FieldValue::Decimal(1000.5));

        let (value, coercion) = FieldNormalizer::parse_decimal("abc");
        assert_eq!(value, FieldValue::Decimal(0.0));
        assert_eq!(coercion, Some(CoercionKind::UnparsableDecimal));

        // 千分位点 + 小数逗号 无法解析
        assert_eq!(
            FieldNormalizer::parse_decimal("1.234,56").1,
            Some(CoercionKind::UnparsableDecimal)
        );
        assert_eq!(
            FieldNormalizer::parse_decimal("inf").1,
            Some(CoercionKind::UnparsableDecimal)
        );
    }

    #[test]
    fn test_date_rules() {
        let n = FieldNormalizer::default();
        assert_eq!(
            n.parse_date("31/01/2024").0,
            FieldValue::Date(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );
        assert_eq!(n.parse_date(""), (FieldValue::Missing, None));
        assert_eq!(
            n.parse_date("not-a-date"),
            (FieldValue::Missing, Some(CoercionKind::UnparsableDate))
        );
        assert_eq!(n.parse_date("31/02/2024").0, FieldValue::Missing);
    }

    #[test]
    fn test_normalize_keeps_every_row_and_stamps_audit() {
        let table = mapped(
            &["sale_date", "sale_amount", "brand", "Loja"],
            vec![
                vec!["31/01/2024", "10,50", "VISA", "001"],
                vec!["xx", "", ""],
                vec![],
            ],
        );
        let now = NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let report = FieldNormalizer::default()
            .with_fixed_now(now)
            .normalize(&table, "  ")
            .unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(report.coercions.len(), 1);
        assert_eq!(report.coercions[0].source_row, 2);
        assert_eq!(report.coercions[0].field, CanonicalField::SaleDate);

        let first = &report.records[0];
        assert_eq!(first.get(CanonicalField::SaleAmount), &FieldValue::Decimal(10.5));
        assert_eq!(first.extras().get("Loja").map(String::as_str), Some("001"));
        assert_eq!(first.audit.processed_by.as_deref(), Some(UNKNOWN_OPERATOR));
        assert_eq!(first.audit.processed_at, Some(now));

        let second = &report.records[1];
        assert!(second.get(CanonicalField::Brand).is_missing());
        assert_eq!(second.get(CanonicalField::SaleAmount), &FieldValue::Decimal(0.0));
        assert!(report.has_column(CanonicalField::Brand));
        assert!(!report.has_column(CanonicalField::Status));
    }

    #[test]
    fn test_duplicate_canonical_column_is_collision() {
        let table = mapped(&["sale_amount", "sale_amount"], vec![vec!["1", "2"]]);
        let err = FieldNormalizer::default().normalize(&table, "ana").unwrap_err();
        assert!(matches!(err, ImportError::MappingCollision { .. }));
    }

    #[test]
    fn test_duplicate_unmapped_columns_kept_apart() {
        let table = mapped(&["Obs", "Obs"], vec![vec!["a", "b"]]);
        let report = FieldNormalizer::default().normalize(&table, "ana").unwrap();
        let extras = report.records[0].extras();
        assert_eq!(extras.get("Obs").map(String::as_str), Some("a"));
        assert_eq!(extras.get("Obs (2)").map(String::as_str), Some("b"));
    }
}
