use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use nagare::{Batch, CancellationToken, Poller};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let queue = Arc::new(Mutex::new(VecDeque::<u64>::new()));

    let source_queue = queue.clone();
    let poller = Poller::new(
        Duration::from_secs(1),
        8,
        -2,
        4,
        move |_token: CancellationToken, limit: usize| {
            let queue = source_queue.clone();
            async move {
                let mut queue = queue.lock().unwrap();
                let take = limit.min(queue.len());
                let tasks = queue
                    .drain(..take)
                    .map(|count| {
                        move |_token: CancellationToken| async move {
                            tracing::info!("-start: job {}", count);
                            tokio::time::sleep(Duration::from_millis(count % 5 * 100 + 100)).await;
                            tracing::info!("--end: job {}", count)
                        }
                    })
                    .collect::<Vec<_>>();
                Batch::new(tasks, !queue.is_empty())
            }
        },
    )
    .unwrap();

    let producer = async move {
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        let mut n = 0;
        loop {
            interval.tick().await;
            queue.lock().unwrap().push_back(n);
            tracing::info!("Enqueue job {}", n);
            n += 1;
        }
    };

    let running = poller.clone();
    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(producer);
    tasks.spawn(async move { running.start().await });

    tasks.join_all().await;
}
