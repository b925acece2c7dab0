//! Pure credit ledger rules: balance folding, chain verification, withdrawal checks.

use crate::domain::{CreditBalance, CreditEntry, Decimal, EntityId, GENESIS_HASH};
use crate::error::LedgerError;

/// Fold entries into balances.
pub fn fold_balance(entries: &[CreditEntry]) -> CreditBalance {
    let mut balance = CreditBalance::default();
    for entry in entries {
        balance.apply(entry.class, entry.amount);
    }
    balance
}

/// Hash the next entry should chain from.
pub fn chain_head(entries: &[CreditEntry]) -> &str {
    entries
        .last()
        .map(|e| e.entry_hash.as_str())
        .unwrap_or(GENESIS_HASH)
}

/// Reconstruct the balance from the ledger and check it against the cached
/// total and the hash chain.
///
/// # Errors
/// `DataCorruption` on any disagreement. The caller must stop automated
/// processing for the user.
pub fn verify_ledger(
    user: &EntityId,
    entries: &[CreditEntry],
    cached: &CreditBalance,
) -> Result<CreditBalance, LedgerError> {
    let corruption = |detail: String| LedgerError::DataCorruption {
        entity: format!("user:{}", user),
        detail,
    };

    let mut prev = GENESIS_HASH;
    for entry in entries {
        if &entry.user_id != user {
            return Err(corruption(format!(
                "entry {} belongs to {}",
                entry.entry_id, entry.user_id
            )));
        }
        if entry.prev_hash != prev {
            return Err(corruption(format!(
                "entry {} breaks the hash chain",
                entry.entry_id
            )));
        }
        if !entry.hash_is_valid() {
            return Err(corruption(format!(
                "entry {} does not match its hash",
                entry.entry_id
            )));
        }
        prev = &entry.entry_hash;
    }

    let folded = fold_balance(entries);
    if &folded != cached {
        return Err(corruption(format!(
            "ledger sum (trade {}, incentive {}) disagrees with cached balance (trade {}, incentive {})",
            folded.trade_revenue,
            folded.incentive_credit,
            cached.trade_revenue,
            cached.incentive_credit
        )));
    }
    if folded.trade_revenue.is_negative() || folded.incentive_credit.is_negative() {
        return Err(corruption("negative balance".to_string()));
    }

    Ok(folded)
}

/// Credits must be strictly positive amounts at currency precision.
pub fn validate_credit_amount(amount: Decimal) -> Result<(), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidInput(format!(
            "credit amount must be positive, got {}",
            amount
        )));
    }
    if amount.round_currency() != amount {
        return Err(LedgerError::InvalidInput(format!(
            "credit amount {} has more than two decimal places",
            amount
        )));
    }
    Ok(())
}

/// A withdrawal may only consume trade revenue.
///
/// # Errors
/// `InvalidInput` for non-positive or sub-cent amounts,
/// `InsufficientWithdrawableFunds` when trade revenue does not cover it,
/// regardless of the incentive credit balance.
pub fn check_withdrawal(
    user: &EntityId,
    balance: &CreditBalance,
    amount: Decimal,
) -> Result<(), LedgerError> {
    validate_credit_amount(amount)?;
    if amount > balance.trade_revenue {
        return Err(LedgerError::InsufficientWithdrawableFunds {
            user_id: user.clone(),
            requested: amount,
            available: balance.trade_revenue,
            restricted: balance.incentive_credit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CreditClass, CreditSource, GrantId, OrderId, TimeMs};

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn user() -> EntityId {
        EntityId::new("farm-1")
    }

    fn chain() -> Vec<CreditEntry> {
        let first = CreditEntry::chained(
            user(),
            CreditClass::TradeRevenue,
            d("100"),
            CreditSource::Order {
                order_id: OrderId::new("o1"),
            },
            TimeMs::new(1),
            GENESIS_HASH,
        );
        let second = CreditEntry::chained(
            user(),
            CreditClass::Incentive,
            d("250"),
            CreditSource::Installment {
                grant_id: GrantId::new("g1"),
                week: 1,
            },
            TimeMs::new(2),
            &first.entry_hash,
        );
        vec![first, second]
    }

    #[test]
    fn test_verify_accepts_consistent_ledger() {
        let entries = chain();
        let cached = fold_balance(&entries);
        let balance = verify_ledger(&user(), &entries, &cached).unwrap();
        assert_eq!(balance.trade_revenue, d("100"));
        assert_eq!(balance.incentive_credit, d("250"));
        assert_eq!(chain_head(&entries), entries[1].entry_hash);
    }

    #[test]
    fn test_verify_rejects_cache_drift() {
        let entries = chain();
        let mut cached = fold_balance(&entries);
        cached.trade_revenue = d("101");
        let err = verify_ledger(&user(), &entries, &cached).unwrap_err();
        assert!(matches!(err, LedgerError::DataCorruption { .. }));
    }

    #[test]
    fn test_verify_rejects_broken_chain() {
        let mut entries = chain();
        entries.remove(0);
        let cached = fold_balance(&entries);
        let err = verify_ledger(&user(), &entries, &cached).unwrap_err();
        assert!(err.to_string().contains("hash chain"));
    }

    #[test]
    fn test_withdrawal_never_touches_incentive_credit() {
        let balance = CreditBalance {
            trade_revenue: d("10"),
            incentive_credit: d("1000"),
        };
        let err = check_withdrawal(&user(), &balance, d("50")).unwrap_err();
        match err {
            LedgerError::InsufficientWithdrawableFunds {
                available,
                restricted,
                ..
            } => {
                assert_eq!(available, d("10"));
                assert_eq!(restricted, d("1000"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(check_withdrawal(&user(), &balance, d("10")).is_ok());
    }

    #[test]
    fn test_withdrawal_amount_validation() {
        let balance = CreditBalance {
            trade_revenue: d("10"),
            incentive_credit: Decimal::zero(),
        };
        assert!(matches!(
            check_withdrawal(&user(), &balance, Decimal::zero()),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            check_withdrawal(&user(), &balance, d("0.001")),
            Err(LedgerError::InvalidInput(_))
        ));
    }
}
