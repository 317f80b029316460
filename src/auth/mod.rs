pub mod credentials;

pub use credentials::{CredentialSet, CredentialStore, EXPIRED_SENTINEL};
