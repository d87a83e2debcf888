// ==========================================
// 卡支付结算对账 - 商户规则
// ==========================================
// 卡组织白名单 + 屏蔽词（分类器输入，按商户）
// ==========================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

// ==========================================
// BrandWhitelist - 卡组织白名单
// ==========================================
// 精确匹配（仅去首尾空白，区分大小写）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrandWhitelist {
    brands: HashMap<String, bool>,
}

impl BrandWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_active<I, S>(brands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for b in brands {
            list.insert(b.as_ref(), true);
        }
        list
    }

    pub fn insert(&mut self, brand: &str, active: bool) {
        let key = brand.trim();
        if !key.is_empty() {
            self.brands.insert(key.to_string(), active);
        }
    }

    /// 白名单成员且启用才放行
    pub fn is_active(&self, brand: &str) -> bool {
        self.brands.get(brand.trim()).copied().unwrap_or(false)
    }

    pub fn entries(&self) -> Vec<(String, bool)> {
        let mut out: Vec<(String, bool)> =
            self.brands.iter().map(|(k, v)| (k.clone(), *v)).collect();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.brands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }
}

// ==========================================
// BlockedTerms - 屏蔽词
// ==========================================
// 存储: 去空白 + 小写; 空词永不匹配
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockedTerms {
    terms: BTreeSet<String>,
}

impl BlockedTerms {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .filter_map(|t| normalize_term(t.as_ref()))
            .collect();
        Self { terms }
    }

    /// 在已小写的文本中查找第一个命中的屏蔽词
    pub fn first_match(&self, haystack_lower: &str) -> Option<&str> {
        self.terms
            .iter()
            .find(|t| haystack_lower.contains(t.as_str()))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

pub fn normalize_term(term: &str) -> Option<String> {
    let t = term.trim().to_lowercase();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist_exact_match() {
        let mut wl = BrandWhitelist::from_active(["VISA", "MASTERCARD"]);
        wl.insert("ELO", false);
        assert!(wl.is_active("VISA"));
        assert!(wl.is_active(" VISA "));
        assert!(!wl.is_active("visa"));
        assert!(!wl.is_active("ELO"));
        assert!(!wl.is_active("DINERS"));
    }

    #[test]
    fn test_blocked_terms_normalized() {
        let terms = BlockedTerms::new(["  Estorno ", "", "   ", "CANCEL"]);
        assert_eq!(terms.iter().collect::<Vec<_>>(), vec!["cancel", "estorno"]);
        assert_eq!(terms.first_match("venda estorno parcial"), Some("estorno"));
        assert_eq!(terms.first_match("venda normal"), None);
    }

    #[test]
    fn test_empty_terms_never_match() {
        let terms = BlockedTerms::new([""]);
        assert!(terms.is_empty());
        assert_eq!(terms.first_match("anything"), None);
    }
}
