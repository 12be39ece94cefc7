//! Reservation and transaction engine
//!
//! Pipeline: a reading is classified (`classifier`), planned against a
//! snapshot and committed through `Store::apply` (`committer`); the
//! `sweeper` expires overdue leases on its own schedule.

pub mod classifier;
pub mod clock;
pub mod committer;
pub mod sweeper;
pub mod transition;

pub use classifier::{classify, Classification};
pub use clock::{Clock, ManualClock, SystemClock};
pub use committer::{Committer, ReadingReport};
pub use sweeper::{SweepReport, Sweeper};
pub use transition::{Effect, Outcome, ReadingUpdate, Transition};
