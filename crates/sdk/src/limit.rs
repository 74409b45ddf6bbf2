use std::future::Future;

use futures::{StreamExt, stream::FuturesUnordered};

/// Run `task(item, index)` over `items` with at most `limit` in flight.
///
/// Items are dispatched in input order; completion order is unspecified.
/// After the first failure nothing new is dispatched, in-flight tasks are
/// drained and that first error is returned.
pub async fn run_limited<I, F, Fut, E>(items: I, limit: usize, mut task: F) -> Result<(), E>
where
    I: IntoIterator,
    F: FnMut(I::Item, usize) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let limit = limit.max(1);
    let mut in_flight = FuturesUnordered::new();
    let mut first_error: Option<E> = None;

    for (index, item) in items.into_iter().enumerate() {
        while in_flight.len() >= limit {
            if let Some(Err(e)) = in_flight.next().await {
                first_error.get_or_insert(e);
            }
        }
        if first_error.is_some() {
            break;
        }
        in_flight.push(task(item, index));
    }

    while let Some(result) = in_flight.next().await {
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}
