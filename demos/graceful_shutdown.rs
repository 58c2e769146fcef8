use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use nagare::{Batch, CancellationToken, PollerBuilder};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Endless backlog: every fetch is full and reports more.
    let next_id = Arc::new(AtomicU64::new(0));
    let poller = PollerBuilder::new(Duration::from_secs(2))
        .capacity(6)
        .threshold(-2)
        .concurrency(3)
        .build(move |_token: CancellationToken, limit: usize| {
            let next_id = next_id.clone();
            async move {
                let tasks = (0..limit)
                    .map(|_| {
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        move |token: CancellationToken| async move {
                            tokio::select! {
                                _ = token.cancelled() => {
                                    tracing::info!("job {} interrupted, cleaning up", id);
                                    tokio::time::sleep(Duration::from_millis(300)).await;
                                }
                                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                                    tracing::info!("job {} done", id);
                                }
                            }
                        }
                    })
                    .collect();
                Batch::new(tasks, true)
            }
        })
        .unwrap();

    let running = poller.clone();
    let handle = tokio::spawn(async move { running.start().await });

    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Ctrl+C received, stopping");

    // Give running jobs five seconds to wind down.
    let deadline = CancellationToken::new();
    let timer = deadline.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        timer.cancel();
    });

    if poller.stop_with_token(&deadline).await {
        tracing::info!("all jobs finished");
    } else {
        tracing::warn!("gave up waiting for running jobs");
    }
    let _ = handle.await;
}
