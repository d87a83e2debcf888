// ==========================================
// 卡支付结算对账 - 文件解析器实现
// ==========================================
// 支持: Excel (.xlsx/.xls/.xlsm/.xlsb/.ods) / CSV (.csv/.txt)
// 说明: 不做表头假设，保留空白行（由 HeaderDetector 判定表头）
// 说明: CSV 中完全没有字符的空行由 csv 读取器忽略
// ==========================================

use crate::domain::record::RawTable;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::importer_trait::FileParser;
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Duration, NaiveDate};
use csv::ReaderBuilder;
use std::path::Path;
use tracing::debug;

/// 分隔符候选（按优先级）
const DELIMITER_CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];

/// 用于嗅探分隔符的行数
const SNIFF_LINES: usize = 20;

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

fn ensure_exists(path: &Path) -> ImportResult<()> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

// ==========================================
// CSV Parser 实现
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CsvParser {
    /// 固定分隔符; None 时自动嗅探
    pub delimiter: Option<u8>,
}

impl CsvParser {
    /// 解码: UTF-8（去 BOM），失败时按 Latin-1 解码
    fn decode(bytes: Vec<u8>) -> String {
        match String::from_utf8(bytes) {
            Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
            Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
        }
    }

    /// 嗅探分隔符: 取前若干行中出现次数最多的候选
    fn sniff_delimiter(text: &str) -> u8 {
        let sample: Vec<&str> = text.lines().take(SNIFF_LINES).collect();
        let mut best = DELIMITER_CANDIDATES[0];
        let mut best_count = 0usize;

        for candidate in DELIMITER_CANDIDATES {
            let count: usize = sample
                .iter()
                .map(|line| line.bytes().filter(|b| *b == candidate).count())
                .sum();
            if count > best_count {
                best = candidate;
                best_count = count;
            }
        }
        best
    }

    pub fn parse_text(&self, text: &str) -> ImportResult<RawTable> {
        let delimiter = self
            .delimiter
            .unwrap_or_else(|| Self::sniff_delimiter(text));

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            rows.push(record.iter().map(|v| v.trim().to_string()).collect());
        }

        debug!(rows = rows.len(), delimiter = %(delimiter as char), "CSV 解析完成");
        Ok(RawTable::new(rows))
    }
}

impl FileParser for CsvParser {
    fn parse_to_raw_table(&self, file_path: &Path, _sheet: Option<&str>) -> ImportResult<RawTable> {
        ensure_exists(file_path)?;

        let ext = extension_of(file_path);
        if ext != "csv" && ext != "txt" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let bytes = std::fs::read(file_path)?;
        self.parse_text(&Self::decode(bytes))
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl ExcelParser {
    /// Excel 序列日期 → dd/mm/yyyy（1900 日期系统，基准 1899-12-30）
    fn serial_to_date_text(serial: f64) -> String {
        let base = NaiveDate::from_ymd_opt(1899, 12, 30);
        match base.and_then(|b| b.checked_add_signed(Duration::days(serial.floor() as i64))) {
            Some(date) => date.format("%d/%m/%Y").to_string(),
            None => serial.to_string(),
        }
    }

    fn cell_to_text(cell: &Data) -> String {
        match cell {
            Data::Empty => String::new(),
            Data::String(s) => s.trim().to_string(),
            Data::Int(i) => i.to_string(),
            Data::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            Data::Bool(b) => b.to_string(),
            Data::DateTime(dt) => Self::serial_to_date_text(dt.as_f64()),
            Data::DateTimeIso(s) => match NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d") {
                Ok(date) => date.format("%d/%m/%Y").to_string(),
                Err(_) => s.clone(),
            },
            Data::DurationIso(s) => s.clone(),
            Data::Error(_) => String::new(),
        }
    }

    /// 工作表区域 → 行列表
    ///
    /// calamine 的区域从首个非空单元格开始; 按 start() 补回前导空行与前导空列，
    /// 行号与工作表一致
    fn range_to_rows(range: &Range<Data>) -> Vec<Vec<String>> {
        let (start_row, start_col) = match range.start() {
            Some((row, col)) => (row as usize, col as usize),
            None => return Vec::new(),
        };

        let mut rows: Vec<Vec<String>> = vec![Vec::new(); start_row];
        rows.extend(range.rows().map(|row| {
            let mut cells = vec![String::new(); start_col];
            cells.extend(row.iter().map(Self::cell_to_text));
            cells
        }));
        rows
    }
}

impl FileParser for ExcelParser {
    fn parse_to_raw_table(&self, file_path: &Path, sheet: Option<&str>) -> ImportResult<RawTable> {
        ensure_exists(file_path)?;

        let ext = extension_of(file_path);
        if !matches!(ext.as_str(), "xlsx" | "xls" | "xlsm" | "xlsb" | "ods") {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let mut workbook = open_workbook_auto(file_path)?;

        let sheet_name = match sheet {
            Some(name) => name.to_string(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?,
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| ImportError::ExcelParseError(format!("{}: {}", sheet_name, e)))?;

        let rows = Self::range_to_rows(&range);

        debug!(rows = rows.len(), sheet = %sheet_name, "Excel 解析完成");
        Ok(RawTable::new(rows))
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct UniversalFileParser {
    pub csv_delimiter: Option<u8>,
}

impl UniversalFileParser {
    pub fn parse<P: AsRef<Path>>(&self, file_path: P, sheet: Option<&str>) -> ImportResult<RawTable> {
        let path = file_path.as_ref();
        match extension_of(path).as_str() {
            "csv" | "txt" => CsvParser {
                delimiter: self.csv_delimiter,
            }
            .parse_to_raw_table(path, sheet),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => ExcelParser.parse_to_raw_table(path, sheet),
            other => Err(ImportError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl FileParser for UniversalFileParser {
    fn parse_to_raw_table(&self, file_path: &Path, sheet: Option<&str>) -> ImportResult<RawTable> {
        self.parse(file_path, sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn temp_csv(content: &[u8]) -> tempfile::NamedTempFile {
        let mut f = Builder::new().suffix(".csv").tempfile().unwrap();
        f.write_all(content).unwrap();
        f
    }

    #[test]
    fn test_csv_keeps_preamble_and_blank_rows() {
        let f = temp_csv(b"Relatorio de vendas\n;;\nData;Bandeira;Valor\n31/01/2024;VISA;10,50\n");
        let table = UniversalFileParser::default().parse(f.path(), None).unwrap();

        assert_eq!(table.len(), 4);
        assert_eq!(table.row(0).unwrap(), &["Relatorio de vendas".to_string()]);
        assert_eq!(table.filled_count(1), 0);
        assert_eq!(table.row(3).unwrap()[2], "10,50");
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(CsvParser::sniff_delimiter("a;b;c\n1;2;3"), b';');
        assert_eq!(CsvParser::sniff_delimiter("a,b,c\n1,2,3"), b',');
        assert_eq!(CsvParser::sniff_delimiter("a\tb\tc"), b'\t');
        assert_eq!(CsvParser::sniff_delimiter("abc"), b';');
    }

    #[test]
    fn test_latin1_fallback() {
        // "Cartão" 的 Latin-1 编码
        let f = temp_csv(b"Cart\xe3o;Valor\nVISA;1\n");
        let table = UniversalFileParser::default().parse(f.path(), None).unwrap();
        assert_eq!(table.row(0).unwrap()[0], "Cartão");
    }

    #[test]
    fn test_file_not_found_and_unsupported() {
        let parser = UniversalFileParser::default();
        assert!(matches!(
            parser.parse("non_existent.csv", None),
            Err(ImportError::FileNotFound(_))
        ));
        assert!(matches!(
            parser.parse("report.pdf", None),
            Err(ImportError::UnsupportedFormat(_))
        ));
    }

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    #[test]
    fn test_range_offset_restores_leading_rows_and_columns() {
        let mut range: Range<Data> = Range::new((2, 1), (3, 2));
        range.set_value((2, 1), Data::String("Data".to_string()));
        range.set_value((3, 2), Data::Float(10.5));

        let rows = ExcelParser::range_to_rows(&range);
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_empty() && rows[1].is_empty());
        assert_eq!(rows[2], vec!["", "Data", ""]);
        assert_eq!(rows[3], vec!["", "", "10.5"]);

        assert!(ExcelParser::range_to_rows(&Range::<Data>::empty()).is_empty());
    }

    #[test]
    fn test_excel_keeps_leading_blank_rows() {
        let path = fixture("vendas_preambulo.xlsx");
        let table = UniversalFileParser::default().parse(&path, None).unwrap();

        // 第 1 行空白，第 2 行说明，第 3 行空白，第 4 行表头
        assert_eq!(table.len(), 8);
        assert_eq!(table.filled_count(0), 0);
        assert_eq!(table.row(1).unwrap()[0], "Relatório de Vendas");
        assert_eq!(table.filled_count(2), 0);
        assert_eq!(table.row(3).unwrap()[0], "Data da Venda");
        assert_eq!(table.filled_count(3), 14);
    }

    #[test]
    fn test_excel_keeps_leading_blank_columns() {
        let path = fixture("vendas_preambulo.xlsx");
        let table = ExcelParser.parse_to_raw_table(&path, Some("Deslocada")).unwrap();

        assert_eq!(table.len(), 5);
        let header = table.row(2).unwrap();
        assert_eq!(header.len(), 16);
        assert_eq!(header[0], "");
        assert_eq!(header[2], "Data da Venda");
        assert_eq!(table.row(3).unwrap()[12], "1001");
    }

    #[test]
    fn test_excel_serial_date() {
        assert_eq!(ExcelParser::serial_to_date_text(45322.0), "31/01/2024");
        assert_eq!(ExcelParser::serial_to_date_text(45322.75), "31/01/2024");
    }
}
