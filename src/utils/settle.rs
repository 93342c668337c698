//! Single-assignment result cell.
//!
//! Used where two paths race to settle one outcome (a handshake reply and
//! its timer, or several terminal messages): the first `settle` wins, every
//! later attempt is a no-op that reports `false`.

#[derive(Debug)]
pub struct SettleCell<T> {
    value: Option<T>,
}

impl<T> Default for SettleCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SettleCell<T> {
    /// Create an unsettled cell.
    pub fn new() -> Self {
        Self { value: None }
    }

    /// Store `value` unless the cell already settled.
    ///
    /// Returns `true` only for the call that settled the cell.
    pub fn settle(&mut self, value: T) -> bool {
        if self.value.is_some() {
            return false;
        }
        self.value = Some(value);
        true
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_settle_wins() {
        let mut cell = SettleCell::new();
        assert_eq!(cell.get(), None);
        assert!(cell.settle("timeout"));
        assert!(!cell.settle("late reply"));
        assert_eq!(cell.get(), Some(&"timeout"));
    }

    #[test]
    fn unit_cell_settles_once() {
        let mut cell = SettleCell::default();
        assert!(cell.settle(()));
        assert!(!cell.settle(()));
    }
}
