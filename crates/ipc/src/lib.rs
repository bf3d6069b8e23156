//! Wire protocol between the scheduler and analysis workers.
//!
//! Requests and responses are newline-delimited JSON, one job per exchange.
//! Only the content id crosses the wire; the worker fetches the blob itself,
//! so large payloads never pass through the scheduler.

mod protocol;

pub use protocol::{JobRequest, JobResponse, WireError, WireErrorKind};
