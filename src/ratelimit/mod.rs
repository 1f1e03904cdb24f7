//! Per-key token-bucket admission control.

mod backend;
mod bucket;
mod clock;
mod guard;
mod key;
mod limiter;
mod reaper;
mod registry;
mod store;

pub use backend::AdmissionControl;
pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use guard::{Admission, Guard, Rejection, RejectionBody, DEFAULT_RETRY_AFTER, TOO_MANY_REQUESTS};
pub use key::{KeyFn, KeyStrategy, RequestContext};
pub use limiter::{Limiter, Policy};
pub use reaper::{Reaper, ReaperHandle};
pub use registry::{Registry, API, GLOBAL, LOGIN, UPLOAD};
pub use store::BucketStore;
