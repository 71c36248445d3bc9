//! Push-to-pull streaming bridge.
//!
//! Record sources are push-style: they visit a callback with each decoded
//! record. The checker wants a pull-style sequence it can fold into the
//! relation indexes. The bridge runs the producer on a dedicated thread and
//! connects the two sides with a bounded channel:
//!
//! - producer blocks on send when the queue is full (backpressure; peak
//!   buffered memory is O([`BRIDGE_QUEUE_CAP`]) items no matter how large
//!   the dataset is),
//! - consumer blocks on recv when the queue is empty and the producer has
//!   not hung up (cooperative wait, no polling).
//!
//! Delivery is strict FIFO in visitation order; the sequence is finite and
//! non-restartable. There is no cancellation primitive: a bridge runs to
//! completion or the process is terminated externally. Dropping the bridge
//! early disconnects the channel so a blocked producer drains out, then
//! joins the thread.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver};
use tracing::warn;

use crate::error::{CheckError, Result};
use crate::progress::Progress;

/// Capacity of the producer/consumer queue.
///
/// Small on purpose: the queue exists to decouple scheduling, not to buffer
/// the dataset.
pub const BRIDGE_QUEUE_CAP: usize = 32;

/// Lazily-pulled, finite, non-restartable record sequence backed by a
/// producer thread.
///
/// Every pulled item ticks the [`Progress`] handle passed at spawn.
pub struct StreamBridge<T> {
    rx: Receiver<T>,
    progress: Progress,
    producer: Option<JoinHandle<Option<CheckError>>>,
    /// Producer failure, surfaced after the stream drains.
    error: Option<CheckError>,
}

impl<T: Send + 'static> StreamBridge<T> {
    /// Spawn the producer thread and return the pull side.
    ///
    /// `produce` is called once on the new thread with a push callback; it
    /// must keep going past individually unreadable records (skip and log)
    /// and return when the stream is exhausted. An `Err` return is a fatal
    /// source failure: the stream ends and the error is reported by
    /// [`StreamBridge::take_error`] once drained.
    pub fn spawn<F>(name: &str, progress: Progress, produce: F) -> Result<Self>
    where
        F: FnOnce(&mut dyn FnMut(T)) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = bounded(BRIDGE_QUEUE_CAP);

        let producer = thread::Builder::new()
            .name(format!("bridge-{name}"))
            .spawn(move || {
                let mut push = |item: T| {
                    // A send error means the consumer hung up; keep draining
                    // the producer so it can run to completion.
                    let _ = tx.send(item);
                };
                produce(&mut push).err()
                // tx drops here; the channel disconnects once drained.
            })?;

        Ok(Self {
            rx,
            progress,
            producer: Some(producer),
            error: None,
        })
    }
}

impl<T> StreamBridge<T> {
    /// Fatal producer error, if any. Only meaningful after the iterator has
    /// returned `None`.
    pub fn take_error(&mut self) -> Option<CheckError> {
        self.error.take()
    }

    fn join_producer(&mut self) {
        let Some(handle) = self.producer.take() else {
            return;
        };
        match handle.join() {
            Ok(result) => self.error = result,
            Err(_) => {
                warn!("bridge producer thread panicked");
                self.error = Some(CheckError::Source(
                    "producer thread panicked".to_string(),
                ));
            }
        }
    }
}

impl<T: Send + 'static> Iterator for StreamBridge<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.rx.recv() {
            Ok(item) => {
                self.progress.tick();
                Some(item)
            }
            // Disconnected: producer finished and the queue drained.
            Err(_) => {
                self.join_producer();
                None
            }
        }
    }
}

impl<T> Drop for StreamBridge<T> {
    fn drop(&mut self) {
        // Disconnect first so a producer blocked on a full queue drains out
        // instead of deadlocking the join.
        self.rx = crossbeam_channel::never();
        self.join_producer();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::error::CheckError;

    fn spawn_counting(
        n: usize,
        delay: Option<Duration>,
    ) -> (StreamBridge<usize>, Arc<AtomicUsize>, Progress) {
        let pushed = Arc::new(AtomicUsize::new(0));
        let pushed_clone = pushed.clone();
        let progress = Progress::new("bridge-test", Some(n as u64));
        let bridge = StreamBridge::spawn("test", progress.clone(), move |push| {
            for i in 0..n {
                if let Some(d) = delay {
                    std::thread::sleep(d);
                }
                push(i);
                pushed_clone.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();
        (bridge, pushed, progress)
    }

    #[test]
    fn test_delivers_all_items_in_order() {
        let (bridge, _, progress) = spawn_counting(1000, None);
        let items: Vec<usize> = bridge.collect();
        assert_eq!(items, (0..1000).collect::<Vec<_>>());
        assert_eq!(progress.count(), 1000);
    }

    #[test]
    fn test_slow_producer_observed_in_order() {
        let (bridge, _, _) = spawn_counting(50, Some(Duration::from_millis(1)));
        let items: Vec<usize> = bridge.collect();
        assert_eq!(items, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_backpressure_bounds_queue_occupancy() {
        let (mut bridge, pushed, _) = spawn_counting(500, None);

        for consumed in 0..500 {
            let item = bridge.next().unwrap();
            assert_eq!(item, consumed);
            // The producer can be at most: items consumed + queue capacity
            // + the one item it is currently blocked pushing.
            let produced = pushed.load(Ordering::SeqCst);
            assert!(
                produced <= consumed + BRIDGE_QUEUE_CAP + 2,
                "producer ran ahead: produced={produced} consumed={consumed}"
            );
        }
        assert_eq!(bridge.next(), None);
    }

    #[test]
    fn test_empty_stream_terminates() {
        let progress = Progress::new("empty", Some(0));
        let mut bridge: StreamBridge<usize> =
            StreamBridge::spawn("empty", progress, |_push| Ok(())).unwrap();
        assert_eq!(bridge.next(), None);
        assert!(bridge.take_error().is_none());
    }

    #[test]
    fn test_producer_error_surfaced_after_drain() {
        let progress = Progress::new("failing", None);
        let mut bridge = StreamBridge::spawn("failing", progress, |push| {
            push(1usize);
            push(2);
            Err(CheckError::Source("backend went away".to_string()))
        })
        .unwrap();

        // Items pushed before the failure are still delivered.
        assert_eq!(bridge.next(), Some(1));
        assert_eq!(bridge.next(), Some(2));
        assert_eq!(bridge.next(), None);
        assert!(matches!(bridge.take_error(), Some(CheckError::Source(_))));
    }

    #[test]
    fn test_early_drop_unblocks_producer() {
        // Producer pushes far more than the queue holds; dropping the
        // consumer must not deadlock.
        let (bridge, _, _) = spawn_counting(10_000, None);
        drop(bridge);
    }
}
