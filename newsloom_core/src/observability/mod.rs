pub mod health;
pub mod metrics;
pub mod trace;

pub use health::{ComponentHealth, HealthSnapshot, HealthStatus};
pub use trace::{TraceContext, TraceContextLayer};
