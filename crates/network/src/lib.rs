// crates/network/src/lib.rs
//! HTTP client for the remote record service
//!
//! [`HttpRemoteClient`] implements the sync engine's remote contract over
//! JSON/HTTP, behind a circuit breaker that fails fast once the service
//! keeps failing.

mod client;
mod error;
mod remote_client;

pub use client::{Client, ClientConfig};
pub use error::{NetworkError, NetworkResult};
pub use remote_client::{ConnectionStatus, HttpRemoteClient};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_exports_accessible() {
        let client = Client::new("http://localhost:8000/api/v1").expect("Failed to create client");
        let remote = HttpRemoteClient::new(client);
        assert_eq!(remote.connection_status(), ConnectionStatus::Unknown);
    }
}
