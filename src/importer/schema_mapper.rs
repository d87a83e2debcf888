// ==========================================
// 卡支付结算对账 - 列映射（SchemaMapper）
// ==========================================
// 规则:
// - 表头去首尾空白后精确匹配映射表
// - 命中则替换为标准列名并记录替换，否则保留去空白后的原名
// 红线: 不删除、不合并列（输出列数 == 输入列数）
// 说明: 冲突只报告不解决，由 Normalizer 在构造记录时拒绝
// ==========================================

use crate::domain::record::{MappedTable, MappingCollision, RawTable};
use crate::domain::types::CanonicalField;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::importer_trait::SchemaMapper;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextSchemaMapper;

impl ContextSchemaMapper {
    /// 仅映射表头（预览/测试用）
    pub fn map_header(
        header: &[String],
        active_map: &HashMap<String, CanonicalField>,
    ) -> (Vec<String>, BTreeMap<String, String>) {
        let mut substitutions = BTreeMap::new();
        let columns = header
            .iter()
            .map(|h| {
                let trimmed = h.trim();
                match active_map.get(trimmed) {
                    Some(field) => {
                        substitutions.insert(trimmed.to_string(), field.column_name().to_string());
                        field.column_name().to_string()
                    }
                    None => trimmed.to_string(),
                }
            })
            .collect();
        (columns, substitutions)
    }

    /// 多个源列落到同一标准列
    fn find_collisions(header: &[String], columns: &[String]) -> Vec<MappingCollision> {
        let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (source, column) in header.iter().zip(columns) {
            if CanonicalField::from_column_name(column).is_some() {
                groups
                    .entry(column.as_str())
                    .or_default()
                    .push(source.trim().to_string());
            }
        }

        groups
            .into_iter()
            .filter(|(_, sources)| sources.len() > 1)
            .map(|(canonical, sources)| MappingCollision {
                canonical_name: canonical.to_string(),
                source_names: sources,
            })
            .collect()
    }
}

impl SchemaMapper for ContextSchemaMapper {
    fn map_columns(
        &self,
        table: &RawTable,
        header_index: usize,
        active_map: &HashMap<String, CanonicalField>,
    ) -> ImportResult<MappedTable> {
        if table.is_empty() {
            return Err(ImportError::InvalidTable("表格没有任何行".to_string()));
        }

        let header = table.row(header_index).ok_or_else(|| {
            ImportError::InvalidTable(format!(
                "表头行 {} 超出范围（共 {} 行）",
                header_index,
                table.len()
            ))
        })?;
        if table.filled_count(header_index) == 0 {
            return Err(ImportError::InvalidTable(format!(
                "表头行 {} 没有任何非空单元格",
                header_index
            )));
        }

        let (columns, substitutions) = Self::map_header(header, active_map);
        let collisions = Self::find_collisions(header, &columns);
        for c in &collisions {
            warn!(collision = %c, "列映射冲突");
        }

        debug!(
            header_index,
            columns = columns.len(),
            substitutions = substitutions.len(),
            "列映射完成"
        );

        Ok(MappedTable {
            header_index,
            columns,
            substitutions,
            collisions,
            rows: table.rows()[header_index + 1..].to_vec(),
        })
    }
}
