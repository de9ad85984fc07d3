//! Operator interruption for long merge runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Shared shutdown flag checked by the merge executor between pairs.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Create a new shutdown flag and register OS signal handlers.
///
/// On SIGTERM or SIGINT (Ctrl+C), the flag is set to `true`. The pair in
/// progress finishes and the run stops before the next one.
pub fn setup_signal_handlers() -> ShutdownFlag {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_clone = flag.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "failed to register SIGTERM handler, Ctrl+C only");
                    if ctrl_c.await.is_ok() {
                        info!("received SIGINT (Ctrl+C), stopping after the current pair");
                        flag_clone.store(true, Ordering::SeqCst);
                    }
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), stopping after the current pair");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, stopping after the current pair");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("received Ctrl+C, stopping after the current pair");
        }

        flag_clone.store(true, Ordering::SeqCst);
    });

    flag
}

/// Check whether the shutdown flag has been set.
pub fn is_shutdown_requested(flag: &ShutdownFlag) -> bool {
    flag.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flag_starts_clear() {
        let flag = setup_signal_handlers();
        assert!(!is_shutdown_requested(&flag));
        flag.store(true, Ordering::SeqCst);
        assert!(is_shutdown_requested(&flag));
    }
}
