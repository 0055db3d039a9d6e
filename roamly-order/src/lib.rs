pub mod accounting;
pub mod machine;
pub mod orchestrator;
pub mod reclaim;
pub mod sweeper;

pub use accounting::AccountingLedger;
pub use machine::{BookingStateMachine, Cancellation, QuoteReceipt};
pub use orchestrator::{MockPaymentGateway, PaymentOrchestrator};
pub use reclaim::{HoldReclaimer, HoldReleaser};
pub use sweeper::{HoldExpirationSweeper, SweepObserver, SweepReport};
