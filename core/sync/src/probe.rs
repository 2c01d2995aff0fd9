//! Connectivity probe gating sync cycles.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::transport::RemoteAuthority;

/// Bounded liveness check against the remote authority.
pub struct ConnectivityProbe<R: RemoteAuthority + ?Sized> {
    remote: Arc<R>,
    timeout: Duration,
}

impl<R: RemoteAuthority + ?Sized> ConnectivityProbe<R> {
    /// Create a probe with the given deadline.
    pub fn new(remote: Arc<R>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    /// Whether the remote answered the liveness check in time.
    ///
    /// Timeouts, refused connections and non-success answers all yield
    /// `false`. Never fails.
    pub async fn is_reachable(&self) -> bool {
        match timeout(self.timeout, self.remote.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Remote {} unreachable: {}", self.remote.name(), e);
                false
            }
            Err(_) => {
                debug!(
                    "Remote {} did not answer within {:?}",
                    self.remote.name(),
                    self.timeout
                );
                false
            }
        }
    }
}
