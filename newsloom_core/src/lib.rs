pub mod contracts;
pub mod error;
pub mod models;
pub mod observability;

// Re-export core types and traits
pub use contracts::{MemorySecretStore, SecretRecord, SecretStore, VersionedRecord};
pub use error::{AppError, ErrorKind, PublicErrorBody};
pub use models::session::{CsrfTokenRecord, Session};
pub use models::token::{OAuth2Token, RotationMetadata, TokenEnvelope, TokenRefreshResponse};
pub use models::user::{Role, UserContext};
pub use observability::health::{ComponentHealth, HealthSnapshot, HealthStatus};
pub use observability::trace::TraceContextLayer;
