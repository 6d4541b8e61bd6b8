pub mod calendar;
pub mod notify;
pub mod payments;
pub mod reconciliation;
pub mod resilience;
pub mod state_machine;
pub mod sweeper;
