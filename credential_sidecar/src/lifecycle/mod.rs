pub mod manager;
pub mod registry;
pub mod single_flight;
pub mod state;

pub use manager::{CredentialStatus, RefreshPolicy, TokenLifecycleManager};
pub use registry::CredentialRegistry;
pub use single_flight::SingleFlight;
pub use state::CredentialState;
