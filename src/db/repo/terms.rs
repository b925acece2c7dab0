//! Versioned commercial terms operations.

use super::{decimal_col, u32_col, Repository};
use crate::domain::{CommercialTerms, EntityId, TermsBook, TermsVersion, TimeMs};
use crate::store::StoreError;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

impl Repository {
    /// Append the next version for `buyer`. Existing versions are never updated.
    pub(super) async fn insert_terms_version(
        &self,
        buyer: &EntityId,
        terms: &CommercialTerms,
        effective_from: TimeMs,
    ) -> Result<TermsVersion, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) + 1 AS next_version FROM commercial_terms WHERE buyer_id = ?",
        )
        .bind(buyer.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let version: i64 = row.try_get("next_version")?;

        sqlx::query(
            r#"
            INSERT INTO commercial_terms (
                buyer_id, version, effective_from_ms, markup_percent,
                buyer_payment_term_days, supplier_payment_term_days
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(buyer.as_str())
        .bind(version)
        .bind(effective_from.as_ms())
        .bind(terms.markup_percent.to_canonical_string())
        .bind(i64::from(terms.buyer_payment_term_days))
        .bind(i64::from(terms.supplier_payment_term_days))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TermsVersion {
            version,
            effective_from,
            terms: terms.clone(),
        })
    }

    pub(super) async fn query_terms_history(
        &self,
        buyer: &EntityId,
    ) -> Result<Vec<TermsVersion>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT buyer_id, version, effective_from_ms, markup_percent,
                   buyer_payment_term_days, supplier_payment_term_days
            FROM commercial_terms
            WHERE buyer_id = ?
            ORDER BY effective_from_ms ASC, version ASC
            "#,
        )
        .bind(buyer.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_version).collect()
    }

    /// Latest version whose `effective_from` is at or before `at`.
    pub(super) async fn query_terms_at(
        &self,
        buyer: &EntityId,
        at: TimeMs,
    ) -> Result<Option<CommercialTerms>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT buyer_id, version, effective_from_ms, markup_percent,
                   buyer_payment_term_days, supplier_payment_term_days
            FROM commercial_terms
            WHERE buyer_id = ? AND effective_from_ms <= ?
            ORDER BY effective_from_ms DESC, version DESC
            LIMIT 1
            "#,
        )
        .bind(buyer.as_str())
        .bind(at.as_ms())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(decode_version)
            .transpose()
            .map(|v| v.map(|v| v.terms))
    }
}

/// Load every buyer's terms history into a [`TermsBook`].
pub(super) async fn load_terms_book(conn: &mut SqliteConnection) -> Result<TermsBook, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT buyer_id, version, effective_from_ms, markup_percent,
               buyer_payment_term_days, supplier_payment_term_days
        FROM commercial_terms
        ORDER BY buyer_id ASC, effective_from_ms ASC, version ASC
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let mut book = TermsBook::new();
    for row in &rows {
        let buyer: String = row.try_get("buyer_id")?;
        book.insert(EntityId::new(buyer), decode_version(row)?);
    }
    Ok(book)
}

fn decode_version(row: &SqliteRow) -> Result<TermsVersion, StoreError> {
    Ok(TermsVersion {
        version: row.try_get("version")?,
        effective_from: TimeMs::new(row.try_get("effective_from_ms")?),
        terms: CommercialTerms::new(
            decimal_col(row, "commercial_terms", "markup_percent")?,
            u32_col(row, "commercial_terms", "buyer_payment_term_days")?,
            u32_col(row, "commercial_terms", "supplier_payment_term_days")?,
        ),
    })
}
