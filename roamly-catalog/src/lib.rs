pub mod cancellation;
pub mod inventory;

pub use cancellation::{CancellationPolicyEngine, RefundCalculation};
pub use inventory::{InventoryError, InventoryLedger};
