pub mod secret_store;

pub use secret_store::{MemorySecretStore, SecretRecord, SecretStore, VersionedRecord};
