//! Bounded-concurrency batch execution.
//!
//! Runs one worker per input with at most `limit` workers in flight, and
//! returns one result per input in input order regardless of completion
//! order. The worker is infallible by contract: per-item failures are
//! encoded inside its result type, so one failing item never aborts the
//! rest of the batch.

use futures::StreamExt;
use futures::stream;

/// Run `worker` over `items` with at most `limit` in flight.
///
/// A limit of zero degrades to sequential execution; a limit above the item
/// count runs the whole batch in parallel. The output vector is index-stable:
/// `results[i]` always corresponds to `items[i]`.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, worker: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    if items.is_empty() {
        return Vec::new();
    }
    let limit = limit.max(1);
    let total = items.len();

    let tagged = items.into_iter().enumerate().map(|(index, item)| {
        let task = worker(item);
        async move { (index, task.await) }
    });

    let mut slots: Vec<Option<R>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    let mut completed = stream::iter(tagged).buffer_unordered(limit);
    while let Some((index, result)) = completed.next().await {
        slots[index] = Some(result);
    }

    slots
        .into_iter()
        .map(|slot| slot.expect("every batch slot filled"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_empty_input_yields_empty_output() {
        let results: Vec<u64> = run_bounded(Vec::new(), 4, |item: u64| async move { item }).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_results_keep_input_order_under_staggered_completion() {
        // Later items finish first; the output order must not care
        let items: Vec<u64> = (0..6).collect();
        let results = run_bounded(items.clone(), items.len(), |value: u64| async move {
            tokio::time::sleep(Duration::from_millis((6 - value) * 10)).await;
            value * 2
        })
        .await;

        let expected: Vec<u64> = items.iter().map(|value| value * 2).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test]
    async fn test_limit_one_runs_sequentially_in_input_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let items: Vec<usize> = (0..5).collect();

        let results = run_bounded(items.clone(), 1, |value: usize| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(value);
                tokio::time::sleep(Duration::from_millis(5)).await;
                value
            }
        })
        .await;

        assert_eq!(results, items);
        assert_eq!(*order.lock().unwrap(), items);
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_limit() {
        for limit in [1usize, 3, 8] {
            let active = Arc::new(AtomicUsize::new(0));
            let high_water = Arc::new(AtomicUsize::new(0));
            let items: Vec<usize> = (0..8).collect();

            let results = run_bounded(items.clone(), limit, |value: usize| {
                let active = active.clone();
                let high_water = high_water.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    value
                }
            })
            .await;

            assert_eq!(results, items);
            assert!(
                high_water.load(Ordering::SeqCst) <= limit,
                "high water {} exceeded limit {}",
                high_water.load(Ordering::SeqCst),
                limit
            );
        }
    }

    #[tokio::test]
    async fn test_limit_zero_degrades_to_sequential() {
        let active = Arc::new(AtomicUsize::new(0));
        let high_water = Arc::new(AtomicUsize::new(0));

        let results = run_bounded((0..4).collect(), 0, |value: usize| {
            let active = active.clone();
            let high_water = high_water.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                value
            }
        })
        .await;

        assert_eq!(results, vec![0, 1, 2, 3]);
        assert_eq!(high_water.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_limit_above_item_count() {
        let results = run_bounded(vec!["a", "b", "c"], 64, |value: &str| async move {
            value.to_uppercase()
        })
        .await;

        assert_eq!(results, vec!["A", "B", "C"]);
    }
}
