// ==========================================
// 卡支付结算对账 - 领域类型定义
// ==========================================
// 职责: 标准字段注册表 / 字段类型 / 来源类型 / 单元格取值
// 红线: 标准字段为封闭枚举, 记录构造时按注册表校验
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 来源类型 (Origin Type)
// ==========================================
// 存储口径: 单字母代码 (V=销售, L=入账)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OriginType {
    Sales,       // 销售明细
    Receivables, // 入账/结算明细
}

impl OriginType {
    pub fn code(&self) -> &'static str {
        match self {
            OriginType::Sales => "V",
            OriginType::Receivables => "L",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "V" => Some(OriginType::Sales),
            "L" => Some(OriginType::Receivables),
            _ => None,
        }
    }
}

impl Default for OriginType {
    fn default() -> Self {
        OriginType::Sales
    }
}

impl fmt::Display for OriginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ==========================================
// 字段类型 (Field Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    Date,    // dd/mm/yyyy → 日历日期
    Decimal, // 逗号小数 → 浮点
    Text,    // 原样保留
}

// ==========================================
// 标准字段 (Canonical Field)
// ==========================================
// 列名即落库列名, 也是字段映射的目标名
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    SaleDate,
    AuthorizationDate,
    Brand,
    PaymentMethod,
    Installments,
    OperationSummary,
    SaleAmount,
    FeePct,
    DiscountAmount,
    FastReceiptFee,
    FastReceiptAmount,
    ExpectedPaymentDate,
    NetAmount,
    SalesChannel,
    TerminalId,
    SaleCode,
    AuthorizationCode,
    Nsu,
    CardNumber,
    CaptureType,
    FastReceipt,
    MinCommission,
    InvoiceNumber,
    BoardingFee,
    EntryAmount,
    WithdrawalAmount,
    Status,
    Handling,
}

impl CanonicalField {
    /// 注册表（顺序即落库列顺序）
    pub const ALL: [CanonicalField; 28] = [
        CanonicalField::SaleDate,
        CanonicalField::AuthorizationDate,
        CanonicalField::Brand,
        CanonicalField::PaymentMethod,
        CanonicalField::Installments,
        CanonicalField::OperationSummary,
        CanonicalField::SaleAmount,
        CanonicalField::FeePct,
        CanonicalField::DiscountAmount,
        CanonicalField::FastReceiptFee,
        CanonicalField::FastReceiptAmount,
        CanonicalField::ExpectedPaymentDate,
        CanonicalField::NetAmount,
        CanonicalField::SalesChannel,
        CanonicalField::TerminalId,
        CanonicalField::SaleCode,
        CanonicalField::AuthorizationCode,
        CanonicalField::Nsu,
        CanonicalField::CardNumber,
        CanonicalField::CaptureType,
        CanonicalField::FastReceipt,
        CanonicalField::MinCommission,
        CanonicalField::InvoiceNumber,
        CanonicalField::BoardingFee,
        CanonicalField::EntryAmount,
        CanonicalField::WithdrawalAmount,
        CanonicalField::Status,
        CanonicalField::Handling,
    ];

    /// 屏蔽词检索的优先字段（按优先级）
    pub const TERM_SEARCH_FIELDS: [CanonicalField; 4] = [
        CanonicalField::OperationSummary,
        CanonicalField::PaymentMethod,
        CanonicalField::SalesChannel,
        CanonicalField::Status,
    ];

    pub fn column_name(&self) -> &'static str {
        match self {
            CanonicalField::SaleDate => "sale_date",
            CanonicalField::AuthorizationDate => "authorization_date",
            CanonicalField::Brand => "brand",
            CanonicalField::PaymentMethod => "payment_method",
            CanonicalField::Installments => "installments",
            CanonicalField::OperationSummary => "operation_summary",
            CanonicalField::SaleAmount => "sale_amount",
            CanonicalField::FeePct => "fee_pct",
            CanonicalField::DiscountAmount => "discount_amount",
            CanonicalField::FastReceiptFee => "fast_receipt_fee",
            CanonicalField::FastReceiptAmount => "fast_receipt_amount",
            CanonicalField::ExpectedPaymentDate => "expected_payment_date",
            CanonicalField::NetAmount => "net_amount",
            CanonicalField::SalesChannel => "sales_channel",
            CanonicalField::TerminalId => "terminal_id",
            CanonicalField::SaleCode => "sale_code",
            CanonicalField::AuthorizationCode => "authorization_code",
            CanonicalField::Nsu => "nsu",
            CanonicalField::CardNumber => "card_number",
            CanonicalField::CaptureType => "capture_type",
            CanonicalField::FastReceipt => "fast_receipt",
            CanonicalField::MinCommission => "min_commission",
            CanonicalField::InvoiceNumber => "invoice_number",
            CanonicalField::BoardingFee => "boarding_fee",
            CanonicalField::EntryAmount => "entry_amount",
            CanonicalField::WithdrawalAmount => "withdrawal_amount",
            CanonicalField::Status => "status",
            CanonicalField::Handling => "handling",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.iter().copied().find(|f| f.column_name() == name)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            CanonicalField::SaleDate
            | CanonicalField::AuthorizationDate
            | CanonicalField::ExpectedPaymentDate => FieldKind::Date,

            CanonicalField::FeePct
            | CanonicalField::FastReceiptFee
            | CanonicalField::BoardingFee
            | CanonicalField::SaleAmount
            | CanonicalField::DiscountAmount
            | CanonicalField::FastReceiptAmount
            | CanonicalField::NetAmount
            | CanonicalField::MinCommission
            | CanonicalField::EntryAmount
            | CanonicalField::WithdrawalAmount => FieldKind::Decimal,

            _ => FieldKind::Text,
        }
    }

    /// 是否允许作为字段映射目标
    ///
    /// 处理标记 (Handling) 由下游人工维护, 不从文件导入
    pub fn is_mappable(&self) -> bool {
        !matches!(self, CanonicalField::Handling)
    }

    pub fn mappable_fields() -> Vec<CanonicalField> {
        Self::ALL.iter().copied().filter(|f| f.is_mappable()).collect()
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column_name())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_column_name(s).ok_or_else(|| format!("未注册的标准字段: {}", s.trim()))
    }
}

// ==========================================
// 字段取值 (Field Value)
// ==========================================
// Missing: 空值/无法解析的日期 (缺失哨兵)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldValue {
    Date(NaiveDate),
    Decimal(f64),
    Text(String),
    Missing,
}

impl FieldValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            FieldValue::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    /// 文本表示（用于屏蔽词检索）; 缺失值为空串
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Decimal(v) => write!(f, "{}", v),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Missing => Ok(()),
        }
    }
}

// ==========================================
// 批次号分配策略 (Batch Allocation)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchAllocation {
    Sequential, // 先计数后写入（两步, 存在并发竞争）
    Atomic,     // 计数与写入同一写事务
}

impl Default for BatchAllocation {
    fn default() -> Self {
        BatchAllocation::Sequential
    }
}

impl FromStr for BatchAllocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SEQUENTIAL" => Ok(BatchAllocation::Sequential),
            "ATOMIC" => Ok(BatchAllocation::Atomic),
            other => Err(format!("无效的批次分配策略: {}", other)),
        }
    }
}
