use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::config::BudgetLimits;
use crate::error::BudgetExceeded;
use crate::model::{BudgetCategory, BudgetSnapshot, CategorySnapshot};

/// Slack for float comparisons on USD amounts.
const EPSILON: f64 = 1e-9;

/// Proof that an amount was reserved. Must be handed back through
/// [`BudgetLedger::settle`] or [`BudgetLedger::release`].
#[must_use = "a reservation must be settled or released"]
#[derive(Debug)]
pub struct Authorization {
    category: BudgetCategory,
    amount: f64,
}

impl Authorization {
    pub fn category(&self) -> BudgetCategory {
        self.category
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }
}

#[derive(Debug, Default)]
struct CategoryState {
    limit: f64,
    spent: f64,
    reserved: f64,
    overdraft: f64,
    operations: u64,
}

impl CategoryState {
    fn remaining(&self) -> f64 {
        (self.limit - self.spent - self.reserved).max(0.0)
    }

    fn overdrawn(&self) -> bool {
        self.overdraft > 0.0
    }
}

#[derive(Debug)]
struct LedgerState {
    categories: BTreeMap<BudgetCategory, CategoryState>,
    total_limit: Option<f64>,
    closed: bool,
    cancel: Option<CancellationToken>,
}

impl LedgerState {
    /// Close as soon as the bound run is cancelled.
    fn observe_cancellation(&mut self) {
        if !self.closed && self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            tracing::info!("Run cancelled, budget ledger closed");
            self.closed = true;
        }
    }

    fn category(&self, category: BudgetCategory) -> &CategoryState {
        // Every category is inserted at construction.
        &self.categories[&category]
    }

    fn total_committed(&self) -> f64 {
        self.categories.values().map(|c| c.spent + c.reserved).sum()
    }

    fn total_spent(&self) -> f64 {
        self.categories.values().map(|c| c.spent).sum()
    }

    /// What a new reservation in `category` may use, honouring the run-wide total.
    fn available(&self, category: BudgetCategory) -> f64 {
        let state = self.category(category);
        if self.closed || state.overdrawn() {
            return 0.0;
        }
        let mut available = state.remaining();
        if let Some(total) = self.total_limit {
            available = available.min((total - self.total_committed()).max(0.0));
        }
        available
    }
}

/// Cumulative spend per category.
///
/// All bookkeeping happens under one mutex, so a reservation is a single
/// critical section no matter how many tasks race for the same category.
/// Spend only grows and remaining only shrinks.
#[derive(Debug)]
pub struct BudgetLedger {
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    pub fn new(limits: &BudgetLimits) -> Self {
        let categories = BudgetCategory::ALL
            .into_iter()
            .map(|c| {
                (
                    c,
                    CategoryState {
                        limit: limits.limit(c).max(0.0),
                        ..Default::default()
                    },
                )
            })
            .collect();
        Self {
            state: Mutex::new(LedgerState {
                categories,
                total_limit: limits.total,
                closed: false,
                cancel: None,
            }),
        }
    }

    /// Refuse every reservation once `token` is cancelled, without waiting
    /// for anyone to call [`BudgetLedger::close`].
    pub fn bind_cancellation(&self, token: CancellationToken) {
        self.lock().cancel = Some(token);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `estimate` USD in `category`, or refuse without side effects.
    pub fn reserve(
        &self,
        category: BudgetCategory,
        estimate: f64,
    ) -> Result<Authorization, BudgetExceeded> {
        let estimate = sanitize(estimate);
        let mut state = self.lock();
        state.observe_cancellation();
        let available = state.available(category);
        let blocked = state.closed || state.category(category).overdrawn();
        if blocked || estimate > available + EPSILON {
            tracing::debug!(
                %category,
                requested = estimate,
                remaining = available,
                "Budget reservation refused"
            );
            return Err(BudgetExceeded {
                category,
                requested: estimate,
                remaining: available,
            });
        }
        if let Some(entry) = state.categories.get_mut(&category) {
            entry.reserved += estimate;
        }
        Ok(Authorization {
            category,
            amount: estimate,
        })
    }

    /// Replace a reservation with the actual cost of the call.
    ///
    /// An actual cost beyond the limit is recorded as overdraft and the
    /// category grants nothing for the rest of the run.
    pub fn settle(&self, authorization: Authorization, actual: f64) {
        let actual = sanitize(actual);
        let mut state = self.lock();
        let total_limit = state.total_limit;
        let category = authorization.category;
        if let Some(entry) = state.categories.get_mut(&category) {
            entry.reserved = (entry.reserved - authorization.amount).max(0.0);
            entry.spent += actual;
            entry.operations += 1;
            if entry.spent > entry.limit + EPSILON {
                entry.overdraft = entry.spent - entry.limit;
                tracing::warn!(
                    %category,
                    estimate = authorization.amount,
                    actual,
                    overdraft = entry.overdraft,
                    "Budget overdrawn, category blocked"
                );
            }
        }
        if let Some(total) = total_limit {
            if state.total_spent() > total + EPSILON && !state.closed {
                tracing::warn!(total, "Run-wide budget overdrawn, ledger closed");
                state.closed = true;
            }
        }
    }

    /// Drop a reservation whose call never happened.
    pub fn release(&self, authorization: Authorization) {
        let mut state = self.lock();
        if let Some(entry) = state.categories.get_mut(&authorization.category) {
            entry.reserved = (entry.reserved - authorization.amount).max(0.0);
        }
    }

    pub fn can_afford(&self, category: BudgetCategory, estimate: f64) -> bool {
        let mut state = self.lock();
        state.observe_cancellation();
        !state.closed
            && !state.category(category).overdrawn()
            && sanitize(estimate) <= state.available(category) + EPSILON
    }

    pub fn remaining(&self, category: BudgetCategory) -> f64 {
        self.lock().available(category)
    }

    /// Stop granting reservations. Outstanding ones may still settle.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            tracing::info!("Budget ledger closed");
            state.closed = true;
        }
    }

    pub fn is_closed(&self) -> bool {
        let mut state = self.lock();
        state.observe_cancellation();
        state.closed
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let state = self.lock();
        let categories = state
            .categories
            .iter()
            .map(|(category, c)| {
                (
                    *category,
                    CategorySnapshot {
                        limit: c.limit,
                        spent: c.spent,
                        reserved: c.reserved,
                        remaining: c.remaining(),
                        overdraft: c.overdraft,
                        operations: c.operations,
                    },
                )
            })
            .collect();
        BudgetSnapshot {
            categories,
            total_limit: state.total_limit,
        }
    }
}

/// Negative or non-finite amounts count as zero.
fn sanitize(amount: f64) -> f64 {
    if amount.is_finite() {
        amount.max(0.0)
    } else {
        0.0
    }
}
