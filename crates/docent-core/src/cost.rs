//! Token and dollar accounting for language-model calls.
//!
//! Every model call is reported through [`CostMonitor::log_operation`]. The
//! monitor keeps a bounded ledger of [`CostEntry`] records, lifetime totals,
//! per-operation totals and per-day buckets. Totals and buckets are updated
//! on every call and are not affected when old ledger entries are pruned.
//!
//! Budget alerts are observational: crossing `warning_fraction` of the
//! daily budget logs a warning, exceeding it logs an error, each at most once
//! per day. The monitor never refuses a call; callers that want enforcement
//! check [`CostMonitor::budget_status`] before calling the model.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::models::{CostEntry, Operation};

/// Pricing and budget settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CostConfig {
    /// USD per one million input tokens.
    pub input_per_million: f64,
    /// USD per one million output tokens.
    pub output_per_million: f64,
    pub daily_budget_usd: f64,
    /// Fraction of the daily budget at which a warning is raised.
    pub warning_fraction: f64,
    /// Ledger entries retained; older ones are pruned.
    pub max_entries: usize,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            input_per_million: 0.15,
            output_per_million: 0.60,
            daily_budget_usd: 5.0,
            warning_fraction: 0.8,
            max_entries: 1_000,
        }
    }
}

/// Where today's spend stands relative to the daily budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Warning,
    Exceeded,
}

/// A budget alert that was raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetAlert {
    pub kind: AlertKind,
    pub date: NaiveDate,
    pub raised_at: DateTime<Utc>,
    pub daily_total_usd: f64,
    pub daily_budget_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationTotals {
    pub count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Spend for one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub operations: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_operations: u64,
    pub by_operation: BTreeMap<Operation, OperationTotals>,
    pub today_cost_usd: f64,
    pub daily_budget_usd: f64,
    /// `today_cost_usd / daily_budget_usd`.
    pub budget_used_fraction: f64,
    pub status: BudgetStatus,
    /// Entries currently held in the ledger.
    pub ledger_entries: usize,
}

#[derive(Default)]
struct Ledger {
    entries: VecDeque<CostEntry>,
    totals: OperationTotals,
    by_operation: BTreeMap<Operation, OperationTotals>,
    daily: BTreeMap<NaiveDate, DailyCost>,
    alerts: Vec<BudgetAlert>,
}

/// Process-wide cost ledger. Share it behind an `Arc`.
pub struct CostMonitor {
    config: CostConfig,
    clock: Arc<dyn Clock>,
    ledger: Mutex<Ledger>,
}

impl CostMonitor {
    pub fn new(config: CostConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CostConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn config(&self) -> &CostConfig {
        &self.config
    }

    /// Price of a call. A pure function of the token counts and the rates.
    ///
    /// ```rust
    /// use docent_core::cost::{CostConfig, CostMonitor};
    ///
    /// let monitor = CostMonitor::new(CostConfig {
    ///     input_per_million: 1.0,
    ///     output_per_million: 2.0,
    ///     ..CostConfig::default()
    /// });
    /// assert!((monitor.cost_for(1_000_000, 500_000) - 2.0).abs() < 1e-12);
    /// ```
    pub fn cost_for(&self, input_tokens: usize, output_tokens: usize) -> f64 {
        let cost = input_tokens as f64 / 1e6 * self.config.input_per_million
            + output_tokens as f64 / 1e6 * self.config.output_per_million;
        cost.max(0.0)
    }

    /// Record one model call and return its cost in USD.
    pub fn log_operation(
        &self,
        operation: Operation,
        input_tokens: usize,
        output_tokens: usize,
        description: &str,
    ) -> f64 {
        let now = self.clock.now();
        let cost_usd = self.cost_for(input_tokens, output_tokens);
        let entry = CostEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: now,
            operation,
            input_tokens,
            output_tokens,
            cost_usd,
            description: description.to_string(),
        };

        let mut ledger = self.lock();
        add(&mut ledger.totals, &entry);
        add(ledger.by_operation.entry(operation).or_default(), &entry);

        let date = now.date_naive();
        let day = ledger.daily.entry(date).or_insert_with(|| DailyCost {
            date,
            operations: 0,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
        });
        day.operations += 1;
        day.input_tokens += input_tokens as u64;
        day.output_tokens += output_tokens as u64;
        day.cost_usd += cost_usd;
        let day_total = day.cost_usd;

        ledger.entries.push_back(entry);
        while ledger.entries.len() > self.config.max_entries {
            ledger.entries.pop_front();
        }

        self.check_alerts(&mut ledger, date, now, day_total);
        cost_usd
    }

    pub fn get_summary(&self) -> CostSummary {
        let today = self.clock.now().date_naive();
        let ledger = self.lock();
        let today_cost = ledger.daily.get(&today).map(|d| d.cost_usd).unwrap_or(0.0);
        CostSummary {
            total_cost_usd: ledger.totals.cost_usd,
            total_input_tokens: ledger.totals.input_tokens,
            total_output_tokens: ledger.totals.output_tokens,
            total_operations: ledger.totals.count,
            by_operation: ledger.by_operation.clone(),
            today_cost_usd: today_cost,
            daily_budget_usd: self.config.daily_budget_usd,
            budget_used_fraction: self.fraction(today_cost),
            status: self.status_for(today_cost),
            ledger_entries: ledger.entries.len(),
        }
    }

    /// Per-day totals, most recent first.
    pub fn get_daily_costs(&self) -> Vec<DailyCost> {
        self.lock().daily.values().rev().cloned().collect()
    }

    /// Status of today's spend.
    pub fn budget_status(&self) -> BudgetStatus {
        let today = self.clock.now().date_naive();
        let spent = self.today_cost_for(today);
        self.status_for(spent)
    }

    /// Today's spend in USD.
    pub fn today_cost(&self) -> f64 {
        self.today_cost_for(self.clock.now().date_naive())
    }

    /// Alerts raised so far, oldest first.
    pub fn alerts(&self) -> Vec<BudgetAlert> {
        self.lock().alerts.clone()
    }

    /// The last `n` ledger entries, newest first.
    pub fn recent_entries(&self, n: usize) -> Vec<CostEntry> {
        self.lock().entries.iter().rev().take(n).cloned().collect()
    }

    fn today_cost_for(&self, today: NaiveDate) -> f64 {
        self.lock().daily.get(&today).map(|d| d.cost_usd).unwrap_or(0.0)
    }

    fn fraction(&self, spent: f64) -> f64 {
        if self.config.daily_budget_usd <= 0.0 {
            return 0.0;
        }
        spent / self.config.daily_budget_usd
    }

    fn status_for(&self, spent: f64) -> BudgetStatus {
        if self.config.daily_budget_usd <= 0.0 {
            return BudgetStatus::Ok;
        }
        if spent > self.config.daily_budget_usd {
            BudgetStatus::Exceeded
        } else if spent >= self.config.daily_budget_usd * self.config.warning_fraction {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }

    fn check_alerts(&self, ledger: &mut Ledger, date: NaiveDate, now: DateTime<Utc>, day_total: f64) {
        let kind = match self.status_for(day_total) {
            BudgetStatus::Ok => return,
            BudgetStatus::Warning => AlertKind::Warning,
            BudgetStatus::Exceeded => AlertKind::Exceeded,
        };
        if ledger.alerts.iter().any(|a| a.date == date && a.kind == kind) {
            return;
        }

        match kind {
            AlertKind::Warning => warn!(
                spent = day_total,
                budget = self.config.daily_budget_usd,
                "daily model spend crossed {:.0}% of budget",
                self.config.warning_fraction * 100.0
            ),
            AlertKind::Exceeded => error!(
                spent = day_total,
                budget = self.config.daily_budget_usd,
                "daily model budget exceeded"
            ),
        }
        ledger.alerts.push(BudgetAlert {
            kind,
            date,
            raised_at: now,
            daily_total_usd: day_total,
            daily_budget_usd: self.config.daily_budget_usd,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn add(totals: &mut OperationTotals, entry: &CostEntry) {
    totals.count += 1;
    totals.input_tokens += entry.input_tokens as u64;
    totals.output_tokens += entry.output_tokens as u64;
    totals.cost_usd += entry.cost_usd;
}
