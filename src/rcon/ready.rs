// src/rcon/ready.rs

//! Component D: polls a freshly-started instance's RCON endpoint until it
//! accepts connections and answers `ServerInfo` (spec.md §4.D).

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::ControllerError;

use super::client::RconClient;

/// Dials `url` on a fixed interval until a connection succeeds and
/// `ServerInfo` replies, `ctx` is cancelled, or `deadline` elapses. Rust
/// dedicated servers accept TCP well before Oxide and RCON are ready, so a
/// successful dial alone is not enough (spec.md §4.D).
pub async fn until_ready(
    ctx: CancellationToken,
    url: &str,
    deadline: Duration,
    retry_interval: Duration,
) -> Result<RconClient, ControllerError> {
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(retry_interval);

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return Err(ControllerError::DeadlineExceeded),
            _ = ticker.tick() => {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    return Err(ControllerError::DeadlineExceeded);
                }
                let remaining = deadline - elapsed;

                // A dial that never resolves (TCP accepted, RCON never answers)
                // must not block past `ctx` or the remaining deadline.
                tokio::select! {
                    _ = ctx.cancelled() => return Err(ControllerError::DeadlineExceeded),
                    dialed = tokio::time::timeout(remaining, dial_once(url)) => {
                        match dialed {
                            Ok(Ok(client)) => return Ok(client),
                            Ok(Err(e)) => debug!("rcon not ready yet: {e}"),
                            Err(_) => return Err(ControllerError::DeadlineExceeded),
                        }
                    }
                }
            }
        }
    }
}

async fn dial_once(url: &str) -> Result<RconClient, ControllerError> {
    let client = RconClient::connect(url).await?;
    client.server_info().await?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn deadline_exceeded_when_endpoint_never_comes_up() {
        let ctx = CancellationToken::new();
        let result = until_ready(
            ctx,
            "ws://127.0.0.1:1/nope",
            Duration::ZERO,
            Duration::from_millis(1),
        )
        .await;
        assert!(matches!(result, Err(ControllerError::DeadlineExceeded)));
    }

    /// A listener that accepts the TCP connection but never completes the
    /// WebSocket handshake, reproducing the "TCP up, Oxide/RCON never
    /// answers" case spec.md §4.D calls out. Without racing the dial
    /// against the deadline/cancellation this would hang forever.
    async fn spawn_accepting_black_hole() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                // Hold the connection open without ever writing a response.
                std::mem::forget(stream);
            }
        });
        format!("ws://{addr}/hunter2")
    }

    #[tokio::test]
    async fn a_hung_dial_does_not_block_past_the_deadline() {
        let url = spawn_accepting_black_hole().await;
        let result = until_ready(
            CancellationToken::new(),
            &url,
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
        .await;
        assert!(matches!(result, Err(ControllerError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn a_hung_dial_yields_to_cancellation() {
        let url = spawn_accepting_black_hole().await;
        let ctx = CancellationToken::new();
        let cancel_ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_ctx.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            until_ready(ctx, &url, Duration::from_secs(300), Duration::from_millis(5)),
        )
        .await
        .expect("until_ready must return long before the outer test timeout");
        assert!(matches!(result, Err(ControllerError::DeadlineExceeded)));
    }
}
