use std::future::Future;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Returns the token both engine processes stop on.
///
/// SIGTERM or SIGINT cancels it. The executor finishes the job in hand and
/// leaves its poll loop; the distributor stops its distributions, each one
/// resigning its election.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    tokio::spawn(cancel_on(token.clone(), async move {
        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        }
    }));

    Ok(token)
}

async fn cancel_on(token: CancellationToken, received: impl Future<Output = &'static str>) {
    tokio::select! {
        name = received => {
            info!("Received {}, stopping after the work in hand", name);
            token.cancel();
        }
        // cancelled by the owner
        _ = token.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_cancels_token() {
        let token = CancellationToken::new();
        cancel_on(token.clone(), async { "SIGTERM" }).await;
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_waiter_ends_when_cancelled_elsewhere() {
        let token = CancellationToken::new();
        let waiter = tokio::spawn(cancel_on(token.clone(), std::future::pending()));
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
