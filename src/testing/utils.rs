use std::future::Future;
use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let interval = Duration::from_millis(5);

    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    condition()
}

/// Retry `action` until `predicate` accepts its result or `timeout` elapses.
pub async fn wait_for_result<F, Fut, T, P>(mut action: F, predicate: P, timeout: Duration) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let interval = Duration::from_millis(5);

    while start.elapsed() < timeout {
        let result = action().await;
        if predicate(&result) {
            return Some(result);
        }
        tokio::time::sleep(interval).await;
    }
    None
}
