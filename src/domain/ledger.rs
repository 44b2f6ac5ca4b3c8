use crate::error::{Result, WithdrawalError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub, SubAssign};
use uuid::Uuid;

/// Represents a monetary value with `rust_decimal` precision.
///
/// This is a wrapper around `rust_decimal::Decimal` to enforce domain-specific rules
/// and provide type safety for financial calculations.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// Represents a positive monetary amount for withdrawals and credits.
///
/// Ensures that amounts are always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(WithdrawalError::Validation(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = WithdrawalError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }
}

// Implement basic arithmetic for Balance to make it a usable Value Object
impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

/// Per-user balance row, the source of truth for whether a withdrawal can be
/// created.
///
/// `available + reserved` is conserved across reserve/release cycles; it only
/// grows through `credit` (earnings accrual) and only shrinks through `debit`
/// (a completed payout). The `version` counter supports optimistic
/// concurrency: stores reject writes whose expected version is stale.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    pub user: Uuid,
    /// Funds spendable by a new withdrawal request.
    pub available: Balance,
    /// Funds earmarked against pending/processing withdrawals.
    pub reserved: Balance,
    pub currency: String,
    pub version: u64,
}

impl LedgerEntry {
    pub fn new(user: Uuid, currency: impl Into<String>) -> Self {
        Self {
            user,
            available: Balance::ZERO,
            reserved: Balance::ZERO,
            currency: currency.into(),
            version: 0,
        }
    }

    /// Credits funds into the available balance (inflow from outside the
    /// withdrawal lifecycle).
    pub fn credit(&mut self, amount: Amount) {
        self.available += amount.into();
    }

    /// Moves funds from available to reserved for a new withdrawal request.
    pub fn reserve(&mut self, amount: Amount) -> Result<()> {
        if self.available >= amount.into() {
            self.available -= amount.into();
            self.reserved += amount.into();
            Ok(())
        } else {
            Err(WithdrawalError::InsufficientFunds {
                available: self.available.0,
                requested: amount.value(),
            })
        }
    }

    /// Returns reserved funds to available (cancel, reject, failed payout).
    pub fn release(&mut self, amount: Amount) -> Result<()> {
        if self.reserved >= amount.into() {
            self.reserved -= amount.into();
            self.available += amount.into();
            Ok(())
        } else {
            Err(WithdrawalError::InvalidReleaseState {
                reserved: self.reserved.0,
                requested: amount.value(),
            })
        }
    }

    /// Removes reserved funds permanently (the payout settled).
    pub fn debit(&mut self, amount: Amount) -> Result<()> {
        if self.reserved >= amount.into() {
            self.reserved -= amount.into();
            Ok(())
        } else {
            Err(WithdrawalError::InvalidDebitState {
                reserved: self.reserved.0,
                requested: amount.value(),
            })
        }
    }

    /// Sum of available and reserved funds still inside the system.
    pub fn total(&self) -> Balance {
        self.available + self.reserved
    }
}
