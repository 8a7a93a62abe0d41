pub mod dto;
pub mod error;
pub mod observability;


pub use dto::*;
pub use error::{Error, Result, ErrorResponse};
pub use observability::{ErrorCategory, MetricsSnapshot, ObservableMetrics, RequestId};
