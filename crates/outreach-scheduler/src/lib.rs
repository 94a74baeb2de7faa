//! # Outreach Scheduler
//!
//! The campaign engine: decides *when* a task fires (cadence resolver +
//! runtime), *which* identity carries each message (quota ledger), and
//! absorbs delivery failures without stalling a batch or a schedule
//! (dispatch queue + once-per-run escalation).
//!
//! ## Architecture
//! ```text
//! Runtime (tokio interval tick)
//!   ├── due task → worker pool (Semaphore, per-task instance cap)
//!   │     └── Dispatcher
//!   │           ├── RecipientResolver  (late-bound group membership)
//!   │           ├── QuotaLedger        (largest-remaining-first)
//!   │           ├── QueueEntry         (pending → success/failed/cancelled)
//!   │           └── Escalator          (≤1 operator alert per run)
//!   └── after run → cadence::compute_next_run → task row
//! ```

pub mod cadence;
pub mod dispatch;
pub mod escalate;
pub mod quota;
pub mod recipients;
pub mod render;
pub mod runtime;

pub use dispatch::{
    BatchStatus, DispatchMode, DispatchReport, Dispatcher, DrainReport, ItemOutcome,
};
pub use escalate::{Escalator, LogNotifier, WebhookNotifier};
pub use quota::{Allocation, QuotaLedger};
pub use recipients::RecipientResolver;
pub use runtime::Runtime;
