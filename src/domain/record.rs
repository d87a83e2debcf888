// ==========================================
// 卡支付结算对账 - 记录模型
// ==========================================
// 用途: 导入管道各阶段产物
// 原始表 → 映射表 → 标准化表 → 分区
// ==========================================

use crate::domain::types::{CanonicalField, FieldValue};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ==========================================
// RawTable - 原始表
// ==========================================
// 生命周期: 仅在一次管道调用内
// 允许参差行（各行长度不一致）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row(&self, idx: usize) -> Option<&[String]> {
        self.rows.get(idx).map(|r| r.as_slice())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 指定行的非空单元格数量
    pub fn filled_count(&self, idx: usize) -> usize {
        self.row(idx)
            .map(|r| r.iter().filter(|c| !c.trim().is_empty()).count())
            .unwrap_or(0)
    }
}

// ==========================================
// MappedTable - 映射后的表
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappedTable {
    /// 表头行索引（0-based）
    pub header_index: usize,
    /// 映射后的列名（列数与表头一致）
    pub columns: Vec<String>,
    /// 已应用的替换 {源列名: 标准列名}
    pub substitutions: BTreeMap<String, String>,
    /// 多个源列映射到同一标准列
    pub collisions: Vec<MappingCollision>,
    /// 数据行（表头之后的全部行）
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingCollision {
    pub canonical_name: String,
    pub source_names: Vec<String>,
}

impl fmt::Display for MappingCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ← [{}]",
            self.canonical_name,
            self.source_names.join(", ")
        )
    }
}

// ==========================================
// ColumnKey - 已按注册表解析的列
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKey {
    Canonical(CanonicalField),
    Unmapped(String),
}

impl ColumnKey {
    pub fn parse(name: &str) -> Self {
        match CanonicalField::from_column_name(name) {
            Some(field) => ColumnKey::Canonical(field),
            None => ColumnKey::Unmapped(name.trim().to_string()),
        }
    }
}

// ==========================================
// AuditFields - 审计/归属字段
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFields {
    pub batch_id: Option<String>,
    pub merchant_id: Option<i64>,
    pub client_id: Option<i64>,
    pub source_file: Option<String>,
    pub processed_at: Option<NaiveDateTime>,
    pub processed_by: Option<String>,
}

// ==========================================
// FilterReason - 过滤原因
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterReason {
    InactiveBrand(String), // 卡组织不在白名单或未启用
    BlockedTerm(String),   // 命中屏蔽词
}

impl FilterReason {
    /// 解析 Display 格式（"INACTIVE_BRAND:VISA"）
    pub fn parse_label(label: &str) -> Option<Self> {
        let (rule, value) = label.split_once(':')?;
        match rule {
            "INACTIVE_BRAND" => Some(FilterReason::InactiveBrand(value.to_string())),
            "BLOCKED_TERM" => Some(FilterReason::BlockedTerm(value.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterReason::InactiveBrand(b) => write!(f, "INACTIVE_BRAND:{}", b),
            FilterReason::BlockedTerm(t) => write!(f, "BLOCKED_TERM:{}", t),
        }
    }
}

// ==========================================
// CanonicalRecord - 标准记录
// ==========================================
// 红线: 落库后不可修改（仅可随批次级联删除）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// 原始表中的行索引（0-based）
    pub source_row: usize,
    fields: BTreeMap<CanonicalField, FieldValue>,
    /// 未映射列（保留原列名与文本）
    extras: BTreeMap<String, String>,
    pub audit: AuditFields,
    pub filter_reason: Option<FilterReason>,
}

static MISSING: FieldValue = FieldValue::Missing;

impl CanonicalRecord {
    pub fn new(source_row: usize) -> Self {
        Self {
            source_row,
            fields: BTreeMap::new(),
            extras: BTreeMap::new(),
            audit: AuditFields::default(),
            filter_reason: None,
        }
    }

    pub fn set(&mut self, field: CanonicalField, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn set_extra(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extras.insert(name.into(), value.into());
    }

    /// 取字段值; 记录中不存在的字段视为缺失
    pub fn get(&self, field: CanonicalField) -> &FieldValue {
        self.fields.get(&field).unwrap_or(&MISSING)
    }

    pub fn has_field(&self, field: CanonicalField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&CanonicalField, &FieldValue)> {
        self.fields.iter()
    }

    pub fn extras(&self) -> &BTreeMap<String, String> {
        &self.extras
    }

    pub fn is_filtered(&self) -> bool {
        self.filter_reason.is_some()
    }

    /// 按列取文本表示
    pub fn text_of(&self, column: &ColumnKey) -> String {
        match column {
            ColumnKey::Canonical(field) => self.get(*field).to_string(),
            ColumnKey::Unmapped(name) => self.extras.get(name).cloned().unwrap_or_default(),
        }
    }
}

// ==========================================
// 标准化结果
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoercionKind {
    UnparsableDate,    // → 缺失哨兵
    UnparsableDecimal, // → 0.0
}

/// 单次取值强制转换（可追溯到源字段）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coercion {
    pub source_row: usize,
    pub field: CanonicalField,
    pub raw_value: String,
    pub kind: CoercionKind,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizationReport {
    pub columns: Vec<ColumnKey>,
    pub records: Vec<CanonicalRecord>,
    pub coercions: Vec<Coercion>,
}

impl NormalizationReport {
    pub fn has_column(&self, field: CanonicalField) -> bool {
        self.columns.contains(&ColumnKey::Canonical(field))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ==========================================
// Partition - 分类结果
// ==========================================
// 红线: accepted ∩ filtered = ∅, 并集 = 全部标准化行
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub accepted: Vec<CanonicalRecord>,
    pub filtered: Vec<CanonicalRecord>,
}

impl Partition {
    pub fn total(&self) -> usize {
        self.accepted.len() + self.filtered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_table_filled_count() {
        let table = RawTable::new(vec![
            vec!["a".into(), "".into(), "  ".into()],
            vec![],
        ]);
        assert_eq!(table.filled_count(0), 1);
        assert_eq!(table.filled_count(1), 0);
        assert_eq!(table.filled_count(5), 0);
    }

    #[test]
    fn test_column_key_parse() {
        assert_eq!(ColumnKey::parse("brand"), ColumnKey::Canonical(CanonicalField::Brand));
        assert_eq!(
            ColumnKey::parse(" Loja "),
            ColumnKey::Unmapped("Loja".to_string())
        );
    }

    #[test]
    fn test_record_missing_field_default() {
        let mut record = CanonicalRecord::new(3);
        assert!(record.get(CanonicalField::Brand).is_missing());
        record.set(CanonicalField::Brand, FieldValue::Text("VISA".into()));
        record.set_extra("Loja", "001");
        assert_eq!(record.text_of(&ColumnKey::Canonical(CanonicalField::Brand)), "VISA");
        assert_eq!(record.text_of(&ColumnKey::Unmapped("Loja".into())), "001");
        assert_eq!(record.text_of(&ColumnKey::Unmapped("Outro".into())), "");
    }

    #[test]
    fn test_filter_reason_display() {
        assert_eq!(
            FilterReason::InactiveBrand("DINERS".into()).to_string(),
            "INACTIVE_BRAND:DINERS"
        );
        assert_eq!(
            FilterReason::BlockedTerm("estorno".into()).to_string(),
            "BLOCKED_TERM:estorno"
        );
        assert_eq!(
            FilterReason::parse_label("INACTIVE_BRAND:"),
            Some(FilterReason::InactiveBrand(String::new()))
        );
        assert_eq!(FilterReason::parse_label("OTHER:x"), None);
    }
}
