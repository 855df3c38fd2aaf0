//! Delayed delivery of items.
//!
//! A [`Scheduler`] owns one driver task holding a min-heap of deadlines.
//! Only the earliest entry has a timer armed. Items whose deadline passed are
//! handed out through [`Scheduler::scheduled`] in deadline order; items with
//! equal deadlines keep their insertion order.
//!
//! There is no cancellation of single items. Consumers drop items that went
//! stale by the time they come out.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::timeout::sleep_until_opt;

struct Entry<T> {
    deadline: Instant,
    order: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.order == other.order
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.order).cmp(&(other.deadline, other.order))
    }
}

/// Hands out items once their deadline has passed.
pub struct Scheduler<T> {
    input: mpsc::UnboundedSender<(Instant, T)>,
    output: mpsc::Receiver<T>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Spawn the driver task. Must be called within a tokio runtime.
    pub fn new() -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let driver = tokio::spawn(drive(input_rx, output_tx, cancel.clone()));
        Self {
            input: input_tx,
            output: output_rx,
            cancel,
            driver: Some(driver),
        }
    }

    /// Deliver `item` after `delay`.
    pub fn schedule_delay(&self, item: T, delay: Duration) {
        self.schedule_deadline(item, Instant::now() + delay);
    }

    /// Deliver `item` at `deadline`. A past deadline delivers immediately.
    pub fn schedule_deadline(&self, item: T, deadline: Instant) {
        // fails only after close
        let _ = self.input.send((deadline, item));
    }

    /// Queue of items whose deadline passed.
    pub fn scheduled(&mut self) -> &mut mpsc::Receiver<T> {
        &mut self.output
    }

    /// Stop the driver and wait for it to exit. Undelivered items are dropped.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl<T: Send + 'static> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Scheduler<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive<T>(
    mut input: mpsc::UnboundedReceiver<(Instant, T)>,
    output: mpsc::Sender<T>,
    cancel: CancellationToken,
) {
    let mut heap: BinaryHeap<Reverse<Entry<T>>> = BinaryHeap::new();
    let mut order = 0u64;
    let mut pending: Option<T> = None;

    loop {
        // while an item waits for room in the output queue no timer is armed
        let next_deadline = match pending {
            Some(_) => None,
            None => heap.peek().map(|Reverse(entry)| entry.deadline),
        };

        tokio::select! {
            _ = cancel.cancelled() => return,

            received = input.recv() => match received {
                Some((deadline, item)) => {
                    heap.push(Reverse(Entry { deadline, order, item }));
                    order += 1;
                }
                None => return,
            },

            _ = sleep_until_opt(next_deadline) => {
                if let Some(Reverse(entry)) = heap.pop() {
                    trace!(queued = heap.len(), "Scheduled item due");
                    pending = Some(entry.item);
                }
            }

            permit = output.reserve(), if pending.is_some() => match permit {
                Ok(permit) => {
                    if let Some(item) = pending.take() {
                        permit.send(item);
                    }
                }
                Err(_) => return,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_items_come_out_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_delay("c", Duration::from_millis(300));
        scheduler.schedule_delay("a", Duration::from_millis(100));
        scheduler.schedule_delay("b", Duration::from_millis(200));

        let start = Instant::now();
        assert_eq!(scheduler.scheduled().recv().await, Some("a"));
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(scheduler.scheduled().recv().await, Some("b"));
        assert_eq!(scheduler.scheduled().recv().await, Some("c"));
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        scheduler.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_deadlines_keep_insertion_order() {
        let mut scheduler = Scheduler::new();
        let deadline = Instant::now() + Duration::from_millis(50);
        for i in 0..5 {
            scheduler.schedule_deadline(i, deadline);
        }
        for i in 0..5 {
            assert_eq!(scheduler.scheduled().recv().await, Some(i));
        }
        scheduler.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_is_immediate() {
        let mut scheduler = Scheduler::new();
        tokio::time::advance(Duration::from_secs(1)).await;
        scheduler.schedule_deadline(7u32, Instant::now() - Duration::from_millis(500));
        assert_eq!(scheduler.scheduled().recv().await, Some(7));
        scheduler.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_item_does_not_delay_earlier_one() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_delay(2u8, Duration::from_secs(10));
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.schedule_delay(1u8, Duration::from_secs(1));

        let start = Instant::now();
        assert_eq!(scheduler.scheduled().recv().await, Some(1));
        assert!(start.elapsed() <= Duration::from_secs(1));
        scheduler.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_delivery() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_delay((), Duration::from_secs(1));
        scheduler.close().await;
        assert_eq!(scheduler.scheduled().recv().await, None);
    }
}
