//! Job dispatch and remote-state reconciliation.
//!
//! [`NodeRegistry`] owns node descriptors and reachability checks.
//! [`JobDispatcher`] validates and starts jobs, then hands HTTP jobs to a
//! per-job reconciliation loop that polls the node until the job reaches
//! a terminal state. Every background task is supervised by a
//! [`ReconcilerSet`] so cancel, delete and shutdown can stop it.

pub mod dispatcher;
pub mod error;
pub mod outputs;
pub mod reconcile;
pub mod registry;
pub mod supervision;

pub use dispatcher::{JobDispatcher, RefreshOutcome};
pub use error::DispatchError;
pub use outputs::{JobDownload, JobOutputs, ALLOWED_UPLOAD_TYPES};
pub use reconcile::{LoopExit, ReconcilePolicy};
pub use registry::{NodeRegistry, NodeTestResult, HealthCheckTimeouts};
pub use supervision::ReconcilerSet;
