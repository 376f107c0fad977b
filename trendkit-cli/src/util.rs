// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{future::Future, sync::Arc};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::instrument::WithSubscriber as _;

/// Run any number of futures, but limited in concurrency by `max_concurrency`.
///
/// Results are returned in completion order, not submission order.
pub async fn spawn_limited_concurrency<F>(max_concurrency: usize, futures: Vec<F>) -> Vec<F::Output>
where
    F: Future + Send,
    F::Output: Send,
{
    let mut results = Vec::with_capacity(futures.len());
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut pending = FuturesUnordered::new();

    for future in futures {
        let sem = semaphore.clone();
        pending.push(
            async move {
                // The semaphore is never closed, so a permit is always granted eventually.
                let _permit = sem.acquire().await.ok();
                future.await
            }
            // keep the caller's subscriber so spans created inside the future still reach the UI layer
            .with_current_subscriber(),
        );
    }

    while let Some(result) = pending.next().await {
        results.push(result);
    }

    results
}
