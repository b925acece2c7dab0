//! Per-buyer commercial terms and their version history.

use crate::domain::{Decimal, EntityId, TimeMs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commercial terms negotiated with a buyer entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommercialTerms {
    /// Markup applied on top of wholesale cost, in percent.
    pub markup_percent: Decimal,
    pub buyer_payment_term_days: u32,
    pub supplier_payment_term_days: u32,
}

impl CommercialTerms {
    pub fn new(
        markup_percent: Decimal,
        buyer_payment_term_days: u32,
        supplier_payment_term_days: u32,
    ) -> Self {
        Self {
            markup_percent,
            buyer_payment_term_days,
            supplier_payment_term_days,
        }
    }

    /// Returns the reason the terms are unusable, if any.
    pub fn validation_error(&self) -> Option<String> {
        if self.markup_percent.is_negative() {
            return Some(format!(
                "markupPercent must be >= 0, got {}",
                self.markup_percent
            ));
        }
        None
    }
}

/// One write to the terms registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermsVersion {
    pub version: i64,
    pub effective_from: TimeMs,
    pub terms: CommercialTerms,
}

/// All terms versions, keyed by buyer entity.
///
/// Lookups resolve the version in force at a given instant so historical
/// orders keep the terms they were placed under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermsBook {
    versions: BTreeMap<EntityId, Vec<TermsVersion>>,
}

impl TermsBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a version. Versions are kept ordered by (effective_from, version).
    pub fn insert(&mut self, buyer: EntityId, version: TermsVersion) {
        let history = self.versions.entry(buyer).or_default();
        history.push(version);
        history.sort_by_key(|v| (v.effective_from, v.version));
    }

    /// Terms in force for `buyer` at `at`.
    pub fn terms_at(&self, buyer: &EntityId, at: TimeMs) -> Option<&CommercialTerms> {
        self.versions
            .get(buyer)?
            .iter()
            .rev()
            .find(|v| v.effective_from <= at)
            .map(|v| &v.terms)
    }

    pub fn history(&self, buyer: &EntityId) -> &[TermsVersion] {
        self.versions.get(buyer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn next_version(&self, buyer: &EntityId) -> i64 {
        self.history(buyer)
            .iter()
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(markup: i64) -> CommercialTerms {
        CommercialTerms::new(Decimal::from_i64(markup), 7, 14)
    }

    #[test]
    fn test_terms_at_picks_version_in_force() {
        let buyer = EntityId::new("grocer-1");
        let mut book = TermsBook::new();
        book.insert(
            buyer.clone(),
            TermsVersion {
                version: 1,
                effective_from: TimeMs::new(1_000),
                terms: terms(15),
            },
        );
        book.insert(
            buyer.clone(),
            TermsVersion {
                version: 2,
                effective_from: TimeMs::new(5_000),
                terms: terms(20),
            },
        );

        assert_eq!(book.terms_at(&buyer, TimeMs::new(999)), None);
        assert_eq!(book.terms_at(&buyer, TimeMs::new(1_000)), Some(&terms(15)));
        assert_eq!(book.terms_at(&buyer, TimeMs::new(4_999)), Some(&terms(15)));
        assert_eq!(book.terms_at(&buyer, TimeMs::new(5_000)), Some(&terms(20)));
        assert_eq!(book.next_version(&buyer), 3);
    }

    #[test]
    fn test_unknown_buyer_has_no_terms() {
        let book = TermsBook::new();
        assert!(book.terms_at(&EntityId::new("nobody"), TimeMs::new(0)).is_none());
        assert_eq!(book.next_version(&EntityId::new("nobody")), 1);
    }

    #[test]
    fn test_negative_markup_is_invalid() {
        let t = CommercialTerms::new(Decimal::from_i64(-1), 7, 14);
        assert!(t.validation_error().is_some());
        assert!(terms(0).validation_error().is_none());
    }
}
