pub mod clock;
pub mod models;
pub mod money;
pub mod pii;

pub use clock::{Clock, ManualClock, SystemClock};
pub use pii::Masked;
