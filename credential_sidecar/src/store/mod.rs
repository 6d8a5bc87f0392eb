pub mod kubernetes;

pub use kubernetes::KubernetesSecretStore;
