//! Append-only credit ledger.
//!
//! A provider's balance is the sum of its transactions. The cached balance
//! kept next to the log is only ever updated together with an append, under
//! the provider's own lock, so concurrent debits against one provider
//! serialize while different providers proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::Credits;
use crate::model::{CreditTransaction, ProviderId, PurchaseId, TransactionKind};

mod error;
pub use error::LedgerError;

/// A requested ledger movement. `amount` is the magnitude; direction comes
/// from the operation.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub provider: ProviderId,
    pub amount: Credits,
    pub kind: TransactionKind,
    pub reason: String,
    pub related_purchase: Option<PurchaseId>,
    pub at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(
        provider: ProviderId,
        amount: Credits,
        kind: TransactionKind,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            amount,
            kind,
            reason: reason.into(),
            related_purchase: None,
            at,
        }
    }

    pub fn for_purchase(mut self, purchase: PurchaseId) -> Self {
        self.related_purchase = Some(purchase);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Debit,
    Credit,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }
}

#[derive(Debug, Default)]
struct Account {
    balance: Credits,
    transactions: Vec<CreditTransaction>,
}

#[derive(Debug)]
pub struct CreditLedger {
    accounts: RwLock<HashMap<ProviderId, Arc<Mutex<Account>>>>,
    next_id: AtomicU64,
}

/// Public API
impl CreditLedger {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open an empty account. Returns false if it already existed.
    pub fn open_account(&self, provider: ProviderId) -> bool {
        let mut accounts = self.accounts.write();
        if accounts.contains_key(&provider) {
            return false;
        }
        accounts.insert(provider, Arc::default());
        true
    }

    pub fn has_account(&self, provider: ProviderId) -> bool {
        self.accounts.read().contains_key(&provider)
    }

    pub fn balance(&self, provider: ProviderId) -> Result<Credits, LedgerError> {
        Ok(self.account(provider)?.lock().balance)
    }

    /// Remove credits; fails if the balance would go negative.
    pub fn debit(&self, entry: LedgerEntry) -> Result<CreditTransaction, LedgerError> {
        self.debit_and(entry, |_| Ok::<_, LedgerError>(()))
            .map(|(txn, ())| txn)
    }

    /// Add credits (refunds, bonuses, credit packs).
    pub fn credit(&self, entry: LedgerEntry) -> Result<CreditTransaction, LedgerError> {
        self.credit_and(entry, |_| Ok::<_, LedgerError>(()))
            .map(|(txn, ())| txn)
    }

    /// Debit and run `commit` while the provider's account is locked.
    ///
    /// The transaction is appended only if `commit` succeeds, which makes the
    /// debit atomic with whatever `commit` persists.
    pub fn debit_and<T, E>(
        &self,
        entry: LedgerEntry,
        commit: impl FnOnce(&CreditTransaction) -> Result<T, E>,
    ) -> Result<(CreditTransaction, T), E>
    where
        E: From<LedgerError>,
    {
        self.apply(entry, Direction::Debit, commit)
    }

    /// Credit counterpart of [`CreditLedger::debit_and`].
    pub fn credit_and<T, E>(
        &self,
        entry: LedgerEntry,
        commit: impl FnOnce(&CreditTransaction) -> Result<T, E>,
    ) -> Result<(CreditTransaction, T), E>
    where
        E: From<LedgerError>,
    {
        self.apply(entry, Direction::Credit, commit)
    }

    /// Newest-first transaction history, optionally filtered by kind.
    pub fn history(
        &self,
        provider: ProviderId,
        limit: usize,
        kind: Option<TransactionKind>,
    ) -> Result<Vec<CreditTransaction>, LedgerError> {
        let account = self.account(provider)?;
        let account = account.lock();
        Ok(account
            .transactions
            .iter()
            .rev()
            .filter(|txn| kind.is_none_or(|k| txn.kind == k))
            .take(limit)
            .cloned()
            .collect())
    }

    /// Verify the cached balance against the fold of the log.
    pub fn reconcile(&self, provider: ProviderId) -> Result<Credits, LedgerError> {
        let account = self.account(provider)?;
        let account = account.lock();
        let folded: Credits = account.transactions.iter().map(|txn| txn.amount).sum();
        if folded != account.balance {
            return Err(LedgerError::Reconciliation {
                provider,
                cached: account.balance,
                folded,
            });
        }
        Ok(folded)
    }

    /// Every account with its balance, ordered by provider id.
    pub fn balances(&self) -> Vec<(ProviderId, Credits, usize)> {
        let accounts = self.accounts.read();
        let mut balances: Vec<_> = accounts
            .iter()
            .map(|(id, account)| {
                let account = account.lock();
                (*id, account.balance, account.transactions.len())
            })
            .collect();
        balances.sort_by_key(|(id, _, _)| *id);
        balances
    }
}

/// Private API
impl CreditLedger {
    fn account(&self, provider: ProviderId) -> Result<Arc<Mutex<Account>>, LedgerError> {
        self.accounts
            .read()
            .get(&provider)
            .cloned()
            .ok_or(LedgerError::UnknownProvider(provider))
    }

    fn apply<T, E>(
        &self,
        entry: LedgerEntry,
        direction: Direction,
        commit: impl FnOnce(&CreditTransaction) -> Result<T, E>,
    ) -> Result<(CreditTransaction, T), E>
    where
        E: From<LedgerError>,
    {
        if !entry.amount.is_positive() {
            return Err(LedgerError::InvalidAmount(entry.amount).into());
        }
        let kind_allowed = match direction {
            Direction::Debit => entry.kind.is_debit_kind(),
            Direction::Credit => entry.kind.is_credit_kind(),
        };
        if !kind_allowed {
            return Err(LedgerError::InvalidKind {
                kind: entry.kind,
                direction: direction.label(),
            }
            .into());
        }

        let account = self.account(entry.provider)?;
        let mut account = account.lock();

        let signed = match direction {
            Direction::Debit => -entry.amount,
            Direction::Credit => entry.amount,
        };
        let balance_after = match direction {
            Direction::Debit => account.balance.checked_sub(entry.amount),
            Direction::Credit => account.balance.checked_add(entry.amount),
        }
        .ok_or(LedgerError::Overflow {
            provider: entry.provider,
            balance: account.balance,
            amount: entry.amount,
        })?;
        if balance_after.is_negative() {
            return Err(LedgerError::InsufficientBalance {
                provider: entry.provider,
                balance: account.balance,
                requested: entry.amount,
            }
            .into());
        }

        let txn = CreditTransaction {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            provider: entry.provider,
            kind: entry.kind,
            amount: signed,
            balance_after,
            reason: entry.reason,
            related_purchase: entry.related_purchase,
            created_at: entry.at,
        };

        let value = commit(&txn)?;

        account.balance = balance_after;
        account.transactions.push(txn.clone());
        debug!(
            provider = %txn.provider,
            kind = ?txn.kind,
            amount = %txn.amount,
            balance = %txn.balance_after,
            "{} applied",
            direction.label()
        );
        Ok((txn, value))
    }
}

impl Default for CreditLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn entry(provider: ProviderId, amount: i64, kind: TransactionKind) -> LedgerEntry {
        LedgerEntry::new(provider, Credits::new(amount), kind, "test", Utc::now())
    }

    fn funded(provider: ProviderId, amount: i64) -> CreditLedger {
        let ledger = CreditLedger::new();
        ledger.open_account(provider);
        ledger
            .credit(entry(provider, amount, TransactionKind::Subscription))
            .unwrap();
        ledger
    }

    #[test]
    fn new_ledger_is_empty() {
        let ledger = CreditLedger::new();
        assert!(ledger.balances().is_empty());
        assert!(!ledger.has_account(1));
    }

    #[test]
    fn open_account_is_idempotent() {
        let ledger = CreditLedger::new();
        assert!(ledger.open_account(1));
        assert!(!ledger.open_account(1));
        assert_eq!(ledger.balance(1).unwrap(), Credits::ZERO);
    }

    #[test]
    fn credit_then_debit() {
        let ledger = funded(1, 20);
        let txn = ledger
            .debit(entry(1, 15, TransactionKind::LeadPurchase).for_purchase(7))
            .unwrap();
        assert_eq!(txn.amount, Credits::new(-15));
        assert_eq!(txn.balance_after, Credits::new(5));
        assert_eq!(txn.related_purchase, Some(7));
        assert_eq!(ledger.balance(1).unwrap(), Credits::new(5));
    }

    #[test]
    fn debit_exact_balance_succeeds() {
        let ledger = funded(1, 10);
        ledger.debit(entry(1, 10, TransactionKind::LeadPurchase)).unwrap();
        assert_eq!(ledger.balance(1).unwrap(), Credits::ZERO);
    }

    #[test]
    fn overflowing_credit_is_rejected() {
        let ledger = funded(1, i64::MAX);
        assert_eq!(
            ledger.credit(entry(1, 1, TransactionKind::Bonus)),
            Err(LedgerError::Overflow {
                provider: 1,
                balance: Credits::new(i64::MAX),
                amount: Credits::new(1),
            })
        );
        assert_eq!(ledger.balance(1).unwrap(), Credits::new(i64::MAX));
        assert_eq!(ledger.history(1, 10, None).unwrap().len(), 1);
        assert_eq!(ledger.reconcile(1).unwrap(), Credits::new(i64::MAX));

        // still spendable afterwards
        ledger.debit(entry(1, 1, TransactionKind::LeadPurchase)).unwrap();
        assert_eq!(ledger.balance(1).unwrap(), Credits::new(i64::MAX - 1));
    }

    #[test]
    fn overdraft_is_rejected() {
        let ledger = funded(1, 5);
        let result = ledger.debit(entry(1, 10, TransactionKind::LeadPurchase));
        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                provider: 1,
                balance: Credits::new(5),
                requested: Credits::new(10),
            })
        );
        assert_eq!(ledger.balance(1).unwrap(), Credits::new(5));
        assert_eq!(ledger.history(1, 10, None).unwrap().len(), 1);
    }

    #[test]
    fn unknown_provider() {
        let ledger = CreditLedger::new();
        assert_eq!(
            ledger.credit(entry(3, 10, TransactionKind::Bonus)),
            Err(LedgerError::UnknownProvider(3))
        );
        assert_eq!(ledger.balance(3), Err(LedgerError::UnknownProvider(3)));
    }

    #[test]
    fn rejects_non_positive_amounts_and_wrong_kinds() {
        let ledger = funded(1, 10);
        assert_eq!(
            ledger.debit(entry(1, 0, TransactionKind::LeadPurchase)),
            Err(LedgerError::InvalidAmount(Credits::ZERO))
        );
        assert!(matches!(
            ledger.debit(entry(1, 1, TransactionKind::Refund)),
            Err(LedgerError::InvalidKind { .. })
        ));
        assert!(matches!(
            ledger.credit(entry(1, 1, TransactionKind::LeadPurchase)),
            Err(LedgerError::InvalidKind { .. })
        ));
    }

    #[test]
    fn failed_commit_leaves_no_trace() {
        let ledger = funded(1, 20);
        let result: Result<_, LedgerError> =
            ledger.debit_and(entry(1, 15, TransactionKind::LeadPurchase), |_| {
                Err::<(), _>(LedgerError::UnknownProvider(99))
            });
        assert!(result.is_err());
        assert_eq!(ledger.balance(1).unwrap(), Credits::new(20));
        assert_eq!(ledger.history(1, 10, None).unwrap().len(), 1);
    }

    #[test]
    fn commit_sees_the_pending_transaction() {
        let ledger = funded(1, 20);
        let (txn, seen) = ledger
            .debit_and(entry(1, 5, TransactionKind::LeadPurchase), |txn| {
                Ok::<_, LedgerError>(txn.balance_after)
            })
            .unwrap();
        assert_eq!(seen, Credits::new(15));
        assert_eq!(txn.balance_after, seen);
    }

    #[test]
    fn history_is_newest_first_and_filterable() {
        let ledger = funded(1, 20);
        ledger.debit(entry(1, 5, TransactionKind::LeadPurchase)).unwrap();
        ledger.credit(entry(1, 5, TransactionKind::Refund)).unwrap();
        ledger.credit(entry(1, 2, TransactionKind::Bonus)).unwrap();

        let all = ledger.history(1, 10, None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].kind, TransactionKind::Bonus);
        assert!(all.windows(2).all(|w| w[0].id > w[1].id));

        let refunds = ledger.history(1, 10, Some(TransactionKind::Refund)).unwrap();
        assert_eq!(refunds.len(), 1);
        assert_eq!(ledger.history(1, 2, None).unwrap().len(), 2);
    }

    #[test]
    fn balance_equals_fold_after_mixed_operations() {
        let ledger = funded(1, 50);
        for i in 0..20 {
            if i % 3 == 0 {
                ledger.credit(entry(1, 4, TransactionKind::Bonus)).unwrap();
            } else {
                let _ = ledger.debit(entry(1, 7, TransactionKind::LeadPurchase));
            }
        }
        let folded = ledger.reconcile(1).unwrap();
        assert_eq!(folded, ledger.balance(1).unwrap());
        assert!(!folded.is_negative());
    }

    #[test]
    fn concurrent_debits_never_overdraw() {
        const BALANCE: i64 = 100;
        const THREADS: i64 = 10;
        let price = BALANCE / THREADS + 1;

        let ledger = funded(1, BALANCE);
        let succeeded = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    if ledger
                        .debit(entry(1, price, TransactionKind::LeadPurchase))
                        .is_ok()
                    {
                        succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        let succeeded = succeeded.load(Ordering::SeqCst) as i64;
        assert_eq!(succeeded, BALANCE / price);
        let balance = ledger.balance(1).unwrap();
        assert_eq!(balance, Credits::new(BALANCE - succeeded * price));
        assert_eq!(ledger.reconcile(1).unwrap(), balance);
    }

    #[test]
    fn concurrent_mixed_traffic_across_providers() {
        let ledger = CreditLedger::new();
        for provider in 1..=4 {
            ledger.open_account(provider);
            ledger
                .credit(entry(provider, 30, TransactionKind::Subscription))
                .unwrap();
        }

        thread::scope(|scope| {
            for worker in 0..16u32 {
                let ledger = &ledger;
                scope.spawn(move || {
                    let provider = worker % 4 + 1;
                    for round in 0..25 {
                        if (worker + round) % 4 == 0 {
                            ledger
                                .credit(entry(provider, 3, TransactionKind::Refund))
                                .unwrap();
                        } else {
                            let _ = ledger.debit(entry(provider, 5, TransactionKind::LeadPurchase));
                        }
                    }
                });
            }
        });

        for (provider, balance, _) in ledger.balances() {
            assert!(!balance.is_negative());
            assert_eq!(ledger.reconcile(provider).unwrap(), balance);
        }
    }
}
