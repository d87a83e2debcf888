// ==========================================
// 卡支付结算对账 - 表头检测
// ==========================================
// 规则: 第一个非空单元格数 > min_filled 的行即表头
// 回退: 无满足条件的行时返回 0（调用方无法区分“第 0 行”与“未找到”）
// ==========================================

use crate::domain::record::RawTable;
use crate::importer::importer_trait::HeaderDetector;
use tracing::debug;

/// 默认阈值
pub const DEFAULT_MIN_FILLED: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct FilledCountHeaderDetector;

impl HeaderDetector for FilledCountHeaderDetector {
    fn detect(&self, table: &RawTable, min_filled: usize) -> usize {
        let found = (0..table.len()).find(|&idx| table.filled_count(idx) > min_filled);

        match found {
            Some(idx) => {
                debug!(header_index = idx, min_filled, "检测到表头");
                idx
            }
            None => {
                debug!(min_filled, "未找到满足阈值的表头行，回退到第 0 行");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(filled: usize, width: usize) -> Vec<String> {
        (0..width)
            .map(|i| if i < filled { format!("c{}", i) } else { String::new() })
            .collect()
    }

    #[test]
    fn test_detects_first_row_over_threshold() {
        let table = RawTable::new(vec![row(1, 12), row(3, 12), row(11, 12), row(12, 12)]);
        assert_eq!(FilledCountHeaderDetector.detect(&table, 10), 2);
    }

    #[test]
    fn test_threshold_is_strict() {
        let table = RawTable::new(vec![row(1, 12), row(10, 12)]);
        assert_eq!(FilledCountHeaderDetector.detect(&table, 10), 0);
        assert_eq!(FilledCountHeaderDetector.detect(&table, 9), 1);
    }

    #[test]
    fn test_fallback_to_zero() {
        assert_eq!(FilledCountHeaderDetector.detect(&RawTable::default(), 10), 0);
        let table = RawTable::new(vec![row(2, 3), row(3, 3)]);
        assert_eq!(FilledCountHeaderDetector.detect(&table, 10), 0);
    }

    #[test]
    fn test_whitespace_cells_are_empty() {
        let mut header = row(11, 11);
        header[0] = "   ".to_string();
        let table = RawTable::new(vec![header, row(11, 11)]);
        assert_eq!(FilledCountHeaderDetector.detect(&table, 10), 1);
    }
}
