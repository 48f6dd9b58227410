//! Startup connectivity check.
//!
//! The process probes the server once with a hard deadline and keeps the
//! result for the whole session. The mode is passed explicitly to everything
//! that behaves differently offline; it never changes mid-session.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Connectivity::Online => "online",
            Connectivity::Offline => "offline",
        }
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Error, Debug)]
pub enum ConnectivityError {
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server unreachable: {0}")]
    Unreachable(String),
}

/// Run one probe request under a deadline. The request future is dropped,
/// and with it the in-flight request, as soon as the deadline passes.
pub async fn check<F, T, E>(request: F, deadline: Duration) -> Result<(), ConnectivityError>
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match tokio::time::timeout(deadline, request).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(ConnectivityError::Unreachable(e.to_string())),
        Err(_) => Err(ConnectivityError::Timeout(deadline)),
    }
}

/// Classify the session as online or offline. No retries: any failure means
/// offline for the rest of the session.
pub async fn probe<F, T, E>(request: F, deadline: Duration) -> Connectivity
where
    F: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    match check(request, deadline).await {
        Ok(()) => {
            info!("Server reachable, running online");
            Connectivity::Online
        }
        Err(e) => {
            warn!(error = %e, "Server not reachable, running offline");
            Connectivity::Offline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_success_is_online() {
        let mode = probe(async { Ok::<_, String>("caps") }, Duration::from_secs(1)).await;
        assert_eq!(mode, Connectivity::Online);
        assert!(mode.is_online());
    }

    #[tokio::test]
    async fn test_error_is_offline() {
        let mode = probe(async { Err::<(), _>("connection refused") }, Duration::from_secs(1)).await;
        assert_eq!(mode, Connectivity::Offline);

        let err = check(async { Err::<(), _>("connection refused") }, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectivityError::Unreachable(msg) if msg == "connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_offline_and_cancels_request() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(Arc::clone(&dropped));

        let request = async move {
            let _flag = flag;
            futures::future::pending::<()>().await;
            Ok::<_, String>(())
        };

        let err = check(request, Duration::from_millis(1000)).await.unwrap_err();
        assert!(matches!(err, ConnectivityError::Timeout(d) if d == Duration::from_millis(1000)));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_server_is_offline() {
        let request = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        };
        assert_eq!(probe(request, Duration::from_secs(1)).await, Connectivity::Offline);
    }
}
