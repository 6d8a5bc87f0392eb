pub mod config;
pub mod lifecycle;
pub mod oauth;
pub mod server;
pub mod store;

pub use config::SidecarConfig;
pub use lifecycle::manager::{CredentialStatus, RefreshPolicy, TokenLifecycleManager};
pub use lifecycle::registry::CredentialRegistry;
pub use lifecycle::state::CredentialState;
pub use oauth::client::OAuth2ProviderClient;
pub use oauth::RefreshProvider;
pub use server::get_router;
