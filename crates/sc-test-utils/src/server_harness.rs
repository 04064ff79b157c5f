//! Test server harness for end-to-end testing.
//!
//! Provides `TestScServer` for spawning a real session controller HTTP server
//! on a random local port.

use crate::fixtures::TestServices;
use session_controller::provider::mock::MockConversationProvider;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Test harness for spawning the Session Controller in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_e2e() -> Result<(), anyhow::Error> {
///     let server = TestScServer::spawn(1, MockConversationProvider::succeeding()).await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestScServer {
    addr: SocketAddr,
    services: TestServices,
    _handle: JoinHandle<()>,
}

impl TestScServer {
    /// Spawn a server with `capacity` slots and the given provider mock.
    pub async fn spawn(
        capacity: usize,
        provider: MockConversationProvider,
    ) -> Result<Self, anyhow::Error> {
        let services = TestServices::new(capacity, provider);
        let app = services.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            services,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Direct access to the actors and ledger behind the server.
    pub fn services(&self) -> &TestServices {
        &self.services
    }
}

impl Drop for TestScServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_and_serves_health() -> Result<(), anyhow::Error> {
        let server = TestScServer::spawn(1, MockConversationProvider::succeeding()).await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.addr().port() > 0);

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);

        let response = reqwest::get(format!("{}/api/v1/admission", server.url())).await?;
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["admission"]["capacity"], 1);

        Ok(())
    }
}
