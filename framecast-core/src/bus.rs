//! In-process frame topic.
//!
//! `FrameBus` is a named `tokio::sync::broadcast` channel of
//! `Arc<FrameMessage>`. Each subscriber has its own bounded queue; a subscriber
//! that falls behind loses the oldest frames and learns how many on its next
//! receive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use crate::message::FrameMessage;

/// Default topic name.
pub const DEFAULT_TOPIC: &str = "/framecast";

/// Per-subscriber queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Longest single wait while looking for the first frame.
const MAX_FIRST_WAIT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct FrameBus {
    topic: Arc<str>,
    tx: broadcast::Sender<Arc<FrameMessage>>,
}

/// What a subscriber got from the bus.
#[derive(Debug)]
pub enum Delivery {
    Frame(Arc<FrameMessage>),
    /// This many frames were dropped because the subscriber lagged.
    Lagged(u64),
    /// Every publisher handle is gone.
    Closed,
}

/// The frame that fixes the stream shape.
#[derive(Debug)]
pub struct FirstFrame {
    pub frame: Arc<FrameMessage>,
    /// Frames lost to lag before it arrived.
    pub lagged: u64,
}

pub struct FrameSubscription {
    topic: Arc<str>,
    rx: broadcast::Receiver<Arc<FrameMessage>>,
}

impl FrameBus {
    pub fn new(topic: &str, queue_depth: usize) -> Self {
        let (tx, _) = broadcast::channel(queue_depth.max(1));
        Self {
            topic: Arc::from(topic),
            tx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish a frame; returns how many subscribers will see it.
    ///
    /// Publishing with no subscribers is not an error, the frame is simply
    /// not delivered.
    pub fn publish(&self, frame: Arc<FrameMessage>) -> usize {
        self.tx.send(frame).unwrap_or(0)
    }

    pub fn subscribe(&self) -> FrameSubscription {
        FrameSubscription {
            topic: Arc::clone(&self.topic),
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC, DEFAULT_QUEUE_DEPTH)
    }
}

impl FrameSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn recv(&mut self) -> Delivery {
        match self.rx.recv().await {
            Ok(frame) => Delivery::Frame(frame),
            Err(RecvError::Lagged(n)) => Delivery::Lagged(n),
            Err(RecvError::Closed) => Delivery::Closed,
        }
    }

    /// Wait for the first frame on the topic.
    ///
    /// Each empty wait logs a warning and the next wait is a little longer,
    /// up to 10 s. Frames lost to lag while waiting are logged and totalled
    /// in the result. Returns `None` when the bus closes or `keep_waiting`
    /// turns false between waits.
    pub async fn wait_for_first<F>(&mut self, initial_wait: Duration, keep_waiting: F) -> Option<FirstFrame>
    where
        F: Fn() -> bool,
    {
        let mut wait = initial_wait.max(Duration::from_millis(1));
        let mut lagged = 0;
        while keep_waiting() {
            match tokio::time::timeout(wait, self.recv()).await {
                Ok(Delivery::Frame(frame)) => {
                    info!(topic = %self.topic, "received first frame, initializing playback");
                    return Some(FirstFrame { frame, lagged });
                }
                Ok(Delivery::Lagged(n)) => {
                    warn!(topic = %self.topic, lost = n, "lagged while waiting for the first frame");
                    lagged += n;
                }
                Ok(Delivery::Closed) => return None,
                Err(_) => {
                    warn!(topic = %self.topic, waited_ms = wait.as_millis() as u64, "waiting for frames");
                    wait = (wait + wait / 2).min(MAX_FIRST_WAIT);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn frame(value: f32) -> Arc<FrameMessage> {
        Arc::new(FrameMessage::new(1, 2, 8_000.0, vec![vec![value; 2]]).unwrap())
    }

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let bus = FrameBus::default();
        let mut sub = bus.subscribe();
        assert_eq!(bus.publish(frame(1.0)), 1);
        assert_eq!(bus.publish(frame(2.0)), 1);

        for expected in [1.0, 2.0] {
            match sub.recv().await {
                Delivery::Frame(f) => assert_eq!(f.channel(0).unwrap()[0], expected),
                other => panic!("unexpected delivery: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = FrameBus::default();
        assert_eq!(bus.publish(frame(1.0)), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_is_told_how_much_it_lost() {
        let bus = FrameBus::new("/test", 2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(frame(i as f32));
        }
        assert!(matches!(sub.recv().await, Delivery::Lagged(3)));
        match sub.recv().await {
            Delivery::Frame(f) => assert_eq!(f.channel(0).unwrap()[0], 3.0),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_bus_reports_closed() {
        let bus = FrameBus::default();
        let mut sub = bus.subscribe();
        drop(bus);
        assert!(matches!(sub.recv().await, Delivery::Closed));
    }

    #[tokio::test]
    async fn wait_for_first_returns_late_frame() {
        let bus = FrameBus::default();
        let mut sub = bus.subscribe();
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            publisher.publish(frame(0.5));
        });
        let first = sub
            .wait_for_first(Duration::from_millis(5), || true)
            .await
            .expect("first frame");
        assert_eq!(first.frame.channel(0).unwrap()[0], 0.5);
        assert_eq!(first.lagged, 0);
    }

    #[tokio::test]
    async fn wait_for_first_totals_frames_lost_to_lag() {
        let bus = FrameBus::new("/test", 2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(frame(i as f32));
        }
        let first = sub
            .wait_for_first(Duration::from_millis(5), || true)
            .await
            .expect("first frame");
        assert_eq!(first.lagged, 3);
        assert_eq!(first.frame.channel(0).unwrap()[0], 3.0);
    }

    #[tokio::test]
    async fn wait_for_first_stops_when_asked() {
        let bus = FrameBus::default();
        let mut sub = bus.subscribe();
        let keep = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&keep);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(false, Ordering::SeqCst);
        });
        let got = sub
            .wait_for_first(Duration::from_millis(5), || keep.load(Ordering::SeqCst))
            .await;
        assert!(got.is_none());
        drop(bus);
    }
}
