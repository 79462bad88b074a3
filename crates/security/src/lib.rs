//! Admission and abuse controls for the Auspex guidance pipeline.
//!
//! Provides:
//! - **Fingerprinting**: keyed, non-reversible caller identity from transport signals
//! - **Throttle store**: fixed-window counters and cooldowns with per-key locking
//! - **Admission gate**: payload ceiling, cooldown, and rate limit in priority order
//! - **Sanitizer**: idempotent markup and control-character scrubbing
//! - **Classifiers**: content suspicion and behavioural bot detection
//! - **Security log**: append-only record of every gate decision

pub mod admission;
pub mod classify;
pub mod fingerprint;
pub mod log;
pub mod sanitize;
pub mod throttle;

pub use admission::{AdmissionDecision, AdmissionGate, AdmissionReason, Scope};
pub use classify::{classify_suspicious, AbuseSignal, BotDetector};
pub use fingerprint::{automation_marker, Fingerprint, Fingerprinter, RequestSignals};
pub use log::{SecurityLog, TracingSink};
pub use sanitize::sanitize;
pub use throttle::{
    Clock, InMemoryThrottleStore, ManualClock, SystemClock, ThrottleStore, WindowDecision,
};
