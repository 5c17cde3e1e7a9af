//! Per-conversation status event bus
//!
//! A pipeline usually starts publishing before the client has finished
//! attaching its listener. Events published to a channel without a live sink
//! are buffered (bounded, oldest evicted first) and flushed in order the
//! moment a sink subscribes, so the subscriber sees the full history followed
//! by live events.

mod event;

pub use event::{BusMessage, Severity, StatusEvent};

use crate::config::BusConfig;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// What happened to a published event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered,
    Buffered,
    /// Buffered, and the oldest buffered event was dropped to make room
    BufferedWithEviction,
}

struct Sink {
    id: u64,
    tx: mpsc::UnboundedSender<BusMessage>,
    connected_at: DateTime<Utc>,
}

struct Channel {
    sink: Option<Sink>,
    buffer: VecDeque<StatusEvent>,
    connected: watch::Sender<bool>,
}

impl Channel {
    fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            sink: None,
            buffer: VecDeque::new(),
            connected,
        }
    }

    fn detach(&mut self) {
        self.sink = None;
        self.connected.send_replace(false);
    }

    fn is_idle(&self) -> bool {
        self.sink.is_none() && self.buffer.is_empty() && self.connected.receiver_count() == 0
    }
}

/// Live subscription to one channel
pub struct Subscription {
    buffered_count: usize,
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    /// Number of backlog events flushed into this subscription on attach
    pub fn buffered_count(&self) -> usize {
        self.buffered_count
    }

    #[cfg(test)]
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> UnboundedReceiverStream<BusMessage> {
        UnboundedReceiverStream::new(self.rx)
    }
}

/// Explicitly owned bus instance; construct one per process (or per test)
pub struct EventBus {
    channels: Mutex<HashMap<String, Channel>>,
    next_sink_id: AtomicU64,
    config: BusConfig,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_sink_id: AtomicU64::new(1),
            config,
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a live sink for `channel_id`, flushing any buffered backlog
    /// into it first. A fresh subscribe replaces the previous sink.
    pub fn subscribe(self: &Arc<Self>, channel_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink_id = self.next_sink_id.fetch_add(1, Ordering::Relaxed);

        let buffered_count = {
            let mut channels = self.channels();
            let channel = channels
                .entry(channel_id.to_string())
                .or_insert_with(Channel::new);

            let backlog: Vec<StatusEvent> = channel.buffer.drain(..).collect();
            let count = backlog.len();
            for event in backlog {
                // Receiver is held locally, send cannot fail
                let _ = tx.send(BusMessage::Event(event));
            }

            if channel.sink.is_some() {
                tracing::debug!(channel = %channel_id, "Replacing existing sink");
            }
            channel.sink = Some(Sink {
                id: sink_id,
                tx,
                connected_at: Utc::now(),
            });
            channel.connected.send_replace(true);
            count
        };

        tracing::info!(channel = %channel_id, buffered = buffered_count, "Subscriber attached");
        self.spawn_heartbeat(channel_id.to_string(), sink_id);

        Subscription {
            buffered_count,
            rx,
        }
    }

    /// Deliver to the live sink, or buffer when there is none. Never fails.
    pub fn publish(&self, channel_id: &str, event: StatusEvent) -> PublishOutcome {
        let mut channels = self.channels();
        Self::publish_locked(&mut channels, channel_id, event, self.config.buffer_capacity)
    }

    fn publish_locked(
        channels: &mut HashMap<String, Channel>,
        channel_id: &str,
        event: StatusEvent,
        capacity: usize,
    ) -> PublishOutcome {
        let channel = channels
            .entry(channel_id.to_string())
            .or_insert_with(Channel::new);

        match channel
            .sink
            .as_ref()
            .map(|sink| sink.tx.send(BusMessage::Event(event.clone())).is_ok())
        {
            Some(true) => return PublishOutcome::Delivered,
            Some(false) => {
                tracing::warn!(channel = %channel_id, "Sink transport gone, falling back to buffer");
                channel.detach();
            }
            None => {}
        }

        channel.buffer.push_back(event);
        if channel.buffer.len() > capacity.max(1) {
            channel.buffer.pop_front();
            tracing::warn!(channel = %channel_id, capacity, "Event buffer full, dropped oldest event");
            PublishOutcome::BufferedWithEviction
        } else {
            PublishOutcome::Buffered
        }
    }

    /// Wait until a sink is registered for `channel_id`, or `timeout` elapses.
    pub async fn wait_for_connection(&self, channel_id: &str, timeout: Duration) -> bool {
        let mut rx = {
            let mut channels = self.channels();
            channels
                .entry(channel_id.to_string())
                .or_insert_with(Channel::new)
                .connected
                .subscribe()
        };

        let connected = tokio::time::timeout(timeout, rx.wait_for(|connected| *connected))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false);
        drop(rx);

        if !connected {
            tracing::debug!(channel = %channel_id, ?timeout, "No subscriber attached in time");
            self.prune(channel_id);
        }
        connected
    }

    /// Remove the sink. Buffered events stay for the next subscribe.
    pub fn unsubscribe(&self, channel_id: &str) {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(channel_id) else {
            return;
        };
        let connected_secs = channel
            .sink
            .as_ref()
            .map(|sink| (Utc::now() - sink.connected_at).num_seconds());
        channel.detach();
        if channel.is_idle() {
            channels.remove(channel_id);
        }
        tracing::info!(channel = %channel_id, connected_secs, "Subscriber detached");
    }

    /// Move undelivered events from a temporary channel onto its successor,
    /// behind whatever the successor already buffered.
    pub fn forward(&self, from: &str, to: &str) -> usize {
        let mut channels = self.channels();
        let backlog: Vec<StatusEvent> = match channels.get_mut(from) {
            Some(channel) => channel.buffer.drain(..).collect(),
            None => return 0,
        };
        if channels.get(from).is_some_and(Channel::is_idle) {
            channels.remove(from);
        }

        let count = backlog.len();
        for event in backlog {
            Self::publish_locked(&mut channels, to, event, self.config.buffer_capacity);
        }
        if count > 0 {
            tracing::debug!(from = %from, to = %to, count, "Forwarded buffered events");
        }
        count
    }

    #[cfg(test)]
    pub fn is_connected(&self, channel_id: &str) -> bool {
        self.channels()
            .get(channel_id)
            .is_some_and(|channel| channel.sink.is_some())
    }

    #[cfg(test)]
    pub fn buffered_len(&self, channel_id: &str) -> usize {
        self.channels()
            .get(channel_id)
            .map_or(0, |channel| channel.buffer.len())
    }

    fn prune(&self, channel_id: &str) {
        let mut channels = self.channels();
        if channels.get(channel_id).is_some_and(Channel::is_idle) {
            channels.remove(channel_id);
        }
    }

    /// Check a sink is still live; returns false once the sink is gone or was replaced
    fn heartbeat(&self, channel_id: &str, sink_id: u64) -> bool {
        let mut channels = self.channels();
        let Some(channel) = channels.get_mut(channel_id) else {
            return false;
        };
        let alive = match &channel.sink {
            Some(sink) if sink.id == sink_id => sink.tx.send(BusMessage::Heartbeat).is_ok(),
            _ => return false,
        };
        if !alive {
            tracing::info!(channel = %channel_id, "Heartbeat failed, unsubscribing dead sink");
            channel.detach();
            if channel.is_idle() {
                channels.remove(channel_id);
            }
        }
        alive
    }

    fn spawn_heartbeat(self: &Arc<Self>, channel_id: String, sink_id: u64) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let bus = Arc::downgrade(self);
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(bus) = bus.upgrade() else { break };
                if !bus.heartbeat(&channel_id, sink_id) {
                    break;
                }
            }
        });
    }
}
