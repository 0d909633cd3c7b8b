//! Claims store: markdown claim files sharded by category
//!
//! Claims live as `## C_<n>: ...` blocks in `claims/<category>.md` (or one
//! flat `claims_and_evidence.md`). The store keeps them in memory and
//! serializes every write through a single FIFO queue.

pub mod categories;
pub mod file_ops;
pub mod format;
pub mod notify;
pub mod observers;
pub mod reload;
pub mod source_inference;
pub mod store;
pub mod verification;
pub mod write_queue;

pub use notify::{FailureKind, FailureReport, FailureSink, LogFailureSink};
pub use observers::{StoreEvent, SubscriptionId};
pub use store::{
    ClaimStore, CycleReport, FileOutcome, LoadOutcome, LoadStatus, PersistHandle, RetryHandle,
    StoreCollaborators,
};
pub use verification::{JsonVerificationStore, VerificationStore};
