//! Mutable simulation state.
//!
//! [`ExecState`] is the slice of state one `execute_order` call sees and
//! returns. [`SimState`] owns the per-column and per-group arrays a driver
//! mutates bar by bar; with cash sharing, cash lives per group (one wallet,
//! N positions), otherwise per column.

use crate::grouping::Grouper;
use crate::math;

/// State visible to a single order execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecState {
    pub cash: f64,
    /// Signed: positive long, negative short.
    pub position: f64,
    /// Notional of open short exposure; reserves cash. Never negative.
    pub debt: f64,
    /// Cash not reserved against short exposure.
    pub free_cash: f64,
    /// Mark-to-market price of this column.
    pub val_price: f64,
    /// Value of the enclosing wallet (group value under cash sharing).
    pub value: f64,
}

/// Per-column and per-group state arrays a driver iterates over.
#[derive(Debug, Clone)]
pub struct SimState {
    cash_sharing: bool,
    n_groups: usize,
    /// Indexed per group under cash sharing, per column otherwise.
    pub cash: Vec<f64>,
    /// Same indexing as `cash`.
    pub free_cash: Vec<f64>,
    pub position: Vec<f64>,
    pub debt: Vec<f64>,
    pub val_price: Vec<f64>,
    /// Last computed wallet value per group.
    pub value: Vec<f64>,
}

impl SimState {
    pub fn new(
        grouper: &Grouper,
        cash_sharing: bool,
        init_cash: &[f64],
        init_position: &[f64],
    ) -> Self {
        let n_cols = grouper.n_cols();
        let n_groups = grouper.n_groups();
        let n_wallets = if cash_sharing { n_groups } else { n_cols };
        debug_assert_eq!(init_cash.len(), n_wallets);
        debug_assert_eq!(init_position.len(), n_cols);
        Self {
            cash_sharing,
            n_groups,
            cash: init_cash.to_vec(),
            free_cash: init_cash.to_vec(),
            position: init_position.to_vec(),
            debt: vec![0.0; n_cols],
            val_price: vec![f64::NAN; n_cols],
            value: vec![f64::NAN; n_groups],
        }
    }

    pub fn cash_sharing(&self) -> bool {
        self.cash_sharing
    }

    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    /// Index into `cash`/`free_cash` for a column in a group.
    #[inline]
    pub fn wallet(&self, col: usize, group: usize) -> usize {
        if self.cash_sharing {
            group
        } else {
            col
        }
    }

    /// Wallet value: cash plus mark-to-market of every position it serves.
    ///
    /// NaN valuation prices contribute nothing for flat columns but poison
    /// the sum for open ones, which is the honest answer.
    pub fn group_value(&self, grouper: &Grouper, group: usize) -> f64 {
        let mut value = if self.cash_sharing {
            self.cash[group]
        } else {
            0.0
        };
        for col in grouper.col_range(group) {
            if !self.cash_sharing {
                value += self.cash[col];
            }
            if self.position[col] != 0.0 {
                value += self.position[col] * self.val_price[col];
            }
        }
        value
    }

    /// Snapshot the execution state for one column.
    pub fn exec_state(&self, col: usize, group: usize) -> ExecState {
        let w = self.wallet(col, group);
        ExecState {
            cash: self.cash[w],
            position: self.position[col],
            debt: self.debt[col],
            free_cash: self.free_cash[w],
            val_price: self.val_price[col],
            value: self.value[group],
        }
    }

    /// Write an execution state back after a fill.
    pub fn commit(&mut self, col: usize, group: usize, state: ExecState) {
        let w = self.wallet(col, group);
        self.cash[w] = state.cash;
        self.position[col] = state.position;
        self.debt[col] = state.debt;
        self.free_cash[w] = state.free_cash;
        self.val_price[col] = state.val_price;
        self.value[group] = state.value;
        debug_assert!(
            // Infinite wallets (auto init cash) trivially satisfy this but
            // never compare "close".
            self.cash[w].is_infinite()
                || math::is_close_or_less(self.free_cash[w], self.cash[w]),
            "free cash {} exceeds cash {} at col {col}",
            self.free_cash[w],
            self.cash[w],
        );
        debug_assert!(
            self.debt[col] >= 0.0,
            "negative debt {} at col {col}",
            self.debt[col],
        );
    }

    /// Add a cash deposit to a wallet (negative withdraws).
    pub fn deposit(&mut self, wallet: usize, amount: f64) {
        self.cash[wallet] = math::add(self.cash[wallet], amount);
        self.free_cash[wallet] = math::add(self.free_cash[wallet], amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::Grouper;

    #[test]
    fn wallet_indexing_follows_sharing() {
        let grouper = Grouper::from_group_lens(vec![2, 1]).unwrap();
        let shared = SimState::new(&grouper, true, &[100.0, 50.0], &[0.0; 3]);
        assert_eq!(shared.wallet(1, 0), 0);
        assert_eq!(shared.wallet(2, 1), 1);

        let solo = SimState::new(&grouper, false, &[100.0; 3], &[0.0; 3]);
        assert_eq!(solo.wallet(1, 0), 1);
        assert_eq!(solo.wallet(2, 1), 2);
    }

    #[test]
    fn group_value_sums_positions_at_val_price() {
        let grouper = Grouper::from_group_lens(vec![2]).unwrap();
        let mut state = SimState::new(&grouper, true, &[100.0], &[10.0, 0.0]);
        state.val_price[0] = 5.0;
        state.val_price[1] = f64::NAN;
        // Flat column with NaN val price must not poison the sum.
        assert_eq!(state.group_value(&grouper, 0), 100.0 + 50.0);
    }

    #[test]
    fn deposit_moves_cash_and_free_cash() {
        let grouper = Grouper::from_group_lens(vec![1]).unwrap();
        let mut state = SimState::new(&grouper, true, &[100.0], &[0.0]);
        state.deposit(0, 25.0);
        assert_eq!(state.cash[0], 125.0);
        assert_eq!(state.free_cash[0], 125.0);
        state.deposit(0, -125.0);
        assert_eq!(state.cash[0], 0.0);
    }
}
