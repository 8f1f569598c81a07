//! Payment capability.
//!
//! Lightning specifics stay behind [`PaymentBackend`]: the engine asks for
//! invoices and waits for settlement outcomes, nothing more.

use async_trait::async_trait;

/// A Lightning invoice issued for a job.
#[derive(Debug, Clone)]
pub struct Invoice {
    /// BOLT-11 payment request handed to the customer.
    pub payment_request: String,
    /// Hash identifying the invoice for settlement tracking.
    pub payment_hash: String,
    /// Invoiced amount in sats.
    pub amount_sats: u64,
}

/// Outcome of waiting for an invoice to settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The invoice was paid.
    Settled,
    /// The invoice expired or was cancelled unpaid.
    Expired,
}

/// Issues invoices and reports their settlement.
#[async_trait]
pub trait PaymentBackend: Send + Sync {
    /// Create an invoice for the given amount.
    async fn create_invoice(&self, amount_sats: u64, memo: &str) -> anyhow::Result<Invoice>;

    /// Wait for the invoice to settle or expire.
    async fn await_settlement(&self, payment_hash: &str) -> anyhow::Result<Settlement>;
}
