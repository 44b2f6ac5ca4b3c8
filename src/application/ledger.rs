use crate::domain::ledger::{Amount, LedgerEntry};
use crate::domain::ports::LedgerStoreRef;
use crate::error::{Result, WithdrawalError};
use tracing::{error, warn};
use uuid::Uuid;

/// Bounded retries for optimistic-concurrency conflicts before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// The only component allowed to mutate balances.
///
/// Every operation is a load-mutate-CAS cycle against the `LedgerStore`:
/// concurrent writers to the same user entry are serialized by the version
/// check, and a conflicted attempt is retried against the fresh entry a
/// bounded number of times.
#[derive(Clone)]
pub struct Ledger {
    store: LedgerStoreRef,
    max_attempts: u32,
}

impl Ledger {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Opens a ledger entry for a user. Returns the existing entry if one is
    /// already open (the currency of the first open wins).
    pub async fn open(&self, user: Uuid, currency: &str) -> Result<LedgerEntry> {
        if let Some(existing) = self.store.get(user).await? {
            return Ok(existing);
        }
        let mut entry = LedgerEntry::new(user, currency);
        entry.version = 1;
        match self.store.put_if_version(entry.clone(), 0).await {
            Ok(()) => Ok(entry),
            // Lost the race to a concurrent open; the stored entry wins.
            Err(WithdrawalError::VersionConflict(_)) => self
                .store
                .get(user)
                .await?
                .ok_or(WithdrawalError::LedgerEntryNotFound(user)),
            Err(e) => Err(e),
        }
    }

    /// Credits earnings into the available balance, opening the entry if
    /// needed.
    pub async fn credit(&self, user: Uuid, amount: Amount, currency: &str) -> Result<LedgerEntry> {
        self.open(user, currency).await?;
        self.mutate(user, |entry| {
            entry.credit(amount);
            Ok(())
        })
        .await
    }

    /// Moves `amount` from available to reserved; fails with
    /// `InsufficientFunds` without any partial reservation.
    pub async fn reserve(&self, user: Uuid, amount: Amount) -> Result<LedgerEntry> {
        self.mutate(user, |entry| entry.reserve(amount)).await
    }

    /// Moves `amount` from reserved back to available. Releasing funds that
    /// are no longer reserved is rejected rather than double-credited.
    pub async fn release(&self, user: Uuid, amount: Amount) -> Result<LedgerEntry> {
        self.mutate(user, |entry| entry.release(amount)).await
    }

    /// Removes `amount` from reserved permanently. A debit exceeding the
    /// reserved balance indicates a bug upstream and is never tolerated.
    pub async fn debit(&self, user: Uuid, amount: Amount) -> Result<LedgerEntry> {
        self.mutate(user, |entry| entry.debit(amount)).await
    }

    pub async fn entry(&self, user: Uuid) -> Result<LedgerEntry> {
        self.store
            .get(user)
            .await?
            .ok_or(WithdrawalError::LedgerEntryNotFound(user))
    }

    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.store.get_all().await
    }

    async fn mutate<F>(&self, user: Uuid, op: F) -> Result<LedgerEntry>
    where
        F: Fn(&mut LedgerEntry) -> Result<()>,
    {
        for attempt in 1..=self.max_attempts {
            let mut entry = self.entry(user).await?;
            let expected = entry.version;

            if let Err(e) = op(&mut entry) {
                if matches!(
                    e,
                    WithdrawalError::InvalidDebitState { .. }
                        | WithdrawalError::InvalidReleaseState { .. }
                ) {
                    error!(%user, error = %e, "ledger invariant violation, halting mutation");
                }
                return Err(e);
            }

            entry.version += 1;
            match self.store.put_if_version(entry.clone(), expected).await {
                Ok(()) => return Ok(entry),
                Err(WithdrawalError::VersionConflict(_)) => {
                    warn!(%user, attempt, "ledger version conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(WithdrawalError::LedgerContention {
            user,
            attempts: self.max_attempts,
        })
    }
}
