//! Guards a transaction against collecting more documents than its amount pays for.

/// How much of a transaction's amount its connected documents already account for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coverage {
    pub transaction_amount: i64,
    pub covered_amount: i64,
    pub connected_documents: usize,
}

impl Coverage {
    /// Documents without an extracted amount contribute nothing.
    pub fn compute<I>(transaction_amount: i64, connected_amounts: I) -> Self
    where
        I: IntoIterator<Item = Option<i64>>,
    {
        let mut covered_amount: i64 = 0;
        let mut connected_documents = 0;
        for amount in connected_amounts {
            connected_documents += 1;
            covered_amount = covered_amount.saturating_add(amount.unwrap_or(0).saturating_abs());
        }
        Self {
            transaction_amount: transaction_amount.saturating_abs(),
            covered_amount,
            connected_documents,
        }
    }

    pub fn ratio(&self) -> f64 {
        if self.transaction_amount == 0 {
            return if self.covered_amount > 0 { 1.0 } else { 0.0 };
        }
        self.covered_amount as f64 / self.transaction_amount as f64
    }

    /// Covered once the connected amounts reach the transaction amount minus the tolerance.
    pub fn is_covered(&self, tolerance: f64) -> bool {
        if self.connected_documents == 0 {
            return false;
        }
        let required = (1.0 - tolerance.clamp(0.0, 1.0)) * self.transaction_amount as f64;
        self.covered_amount as f64 >= required
    }
}
