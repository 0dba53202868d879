//! Directory-to-bucket mirroring.
//!
//! One cycle walks the local root, uploads new and changed files through
//! a bounded worker pool and deletes remote objects whose local file is
//! gone. [`schedule`] repeats cycles on an interval.

pub mod detect;
pub mod dispatch;
pub mod engine;
pub mod hash;
pub mod ignore;
pub mod multipart;
pub mod reconcile;
pub mod scan;
pub mod schedule;

pub use detect::{ChangeDetector, Decision, DecisionReason};
pub use dispatch::{SyncOutcome, UploadDispatcher, UploadTask};
pub use engine::{CycleReport, CycleSummary, SyncEngine};
pub use hash::{ContentHasher, Md5Hasher};
pub use ignore::IgnoreMatcher;
pub use multipart::{MultipartUploader, PartPlan};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scan::{LocalEntry, Scanner};
pub use schedule::{run_periodic, shutdown_channel, ShutdownHandle, ShutdownSignal};
