// ==========================================
// 卡支付结算对账 - 商户规则仓储
// ==========================================
// 职责: 管理 brand_whitelist / blocked_terms 表
// ==========================================

use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::merchant::{normalize_term, BlockedTerms, BrandWhitelist};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::stores::MerchantRuleStore;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct MerchantRuleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MerchantRuleRepository {
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
}

impl MerchantRuleStore for MerchantRuleRepository {
    fn brands_for_merchant(&self, merchant_id: i64) -> RepositoryResult<BrandWhitelist> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT brand, active FROM brand_whitelist WHERE merchant_id = ?1")?;
        let rows = stmt
            .query_map(params![merchant_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut whitelist = BrandWhitelist::new();
        for (brand, active) in rows {
            whitelist.insert(&brand, active);
        }
        Ok(whitelist)
    }

    fn save_brands(&self, merchant_id: i64, entries: &[(String, bool)]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO brand_whitelist (merchant_id, brand, active, updated_at)
                VALUES (?1, ?2, ?3, datetime('now'))
                ON CONFLICT(merchant_id, brand) DO UPDATE SET
                    active = excluded.active,
                    updated_at = excluded.updated_at
                "#,
            )?;

            for (brand, active) in entries {
                let brand = brand.trim();
                if brand.is_empty() {
                    continue;
                }
                written += stmt.execute(params![merchant_id, brand, *active as i64])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }

    fn list_terms(&self, merchant_id: i64) -> RepositoryResult<BlockedTerms> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT term FROM blocked_terms WHERE merchant_id = ?1 ORDER BY term")?;
        let terms = stmt
            .query_map(params![merchant_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BlockedTerms::new(terms))
    }

    fn add_term(&self, merchant_id: i64, term: &str) -> RepositoryResult<bool> {
        let Some(term) = normalize_term(term) else {
            return Ok(false);
        };
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO blocked_terms (merchant_id, term) VALUES (?1, ?2)",
            params![merchant_id, term],
        )?;
        Ok(affected > 0)
    }

    fn remove_term(&self, merchant_id: i64, term: &str) -> RepositoryResult<bool> {
        let Some(term) = normalize_term(term) else {
            return Ok(false);
        };
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "DELETE FROM blocked_terms WHERE merchant_id = ?1 AND term = ?2",
            params![merchant_id, term],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> MerchantRuleRepository {
        let conn = Connection::open_in_memory().unwrap();
        MerchantRuleRepository::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_save_and_read_brands() {
        let repo = setup();
        repo.save_brands(
            7,
            &[("VISA".into(), true), ("ELO".into(), false), ("  ".into(), true)],
        )
        .unwrap();
        repo.save_brands(7, &[("ELO".into(), true)]).unwrap();

        let wl = repo.brands_for_merchant(7).unwrap();
        assert_eq!(wl.len(), 2);
        assert!(wl.is_active("VISA"));
        assert!(wl.is_active("ELO"));
        assert!(repo.brands_for_merchant(8).unwrap().is_empty());
    }

    #[test]
    fn test_terms_are_lowercased_and_unique() {
        let repo = setup();
        assert!(repo.add_term(7, "  ESTORNO ").unwrap());
        assert!(!repo.add_term(7, "estorno").unwrap());
        assert!(!repo.add_term(7, "   ").unwrap());

        let terms = repo.list_terms(7).unwrap();
        assert_eq!(terms.iter().collect::<Vec<_>>(), vec!["estorno"]);

        assert!(repo.remove_term(7, "Estorno").unwrap());
        assert!(repo.list_terms(7).unwrap().is_empty());
    }
}
