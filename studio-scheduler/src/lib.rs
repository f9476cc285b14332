//! Execution Scheduler / Quota Gate, Usage & Quota Ledger, and
//! Dedup/Correlation Store (spec §4.1, §4.6, §4.7; C6, C7, C8).

pub mod cancellation;
pub mod dedup;
pub mod events;
pub mod gate;
pub mod ledger;
pub mod scheduler;

pub use cancellation::CancellationSignal;
pub use dedup::DedupStore;
pub use events::UsageEvent;
pub use gate::{AdmitOutcome, OrgGate};
pub use ledger::{Alert, AlertKind, QuotaType, RateCard, UsageLedger, UserBillingProfile, UserLimits};
pub use scheduler::{ExecutionRunner, IngestOutcome, RecoveryReport, Scheduler, SchedulerConfig};
