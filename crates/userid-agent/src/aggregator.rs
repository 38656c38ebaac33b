//! Buffered, deduplicated aggregation of identity events.
//!
//! Events accumulate in two insertion-ordered buffers (login, logout) until
//! either the joint cap is hit or the periodic flush timer fires. A flush
//! renders one update payload, clears the buffers, and routes the batch to
//! the first ready endpoint: the primary while it is healthy, the secondary
//! only as a fallback, never both.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connector::EndpointConnector;
use crate::payload;
use crate::periodic::{PeriodicTask, TickOutcome};
use crate::record::{Direction, IdentityEvent};
use crate::response;

#[derive(Default)]
struct PendingBuffer {
    login: Vec<IdentityEvent>,
    logout: Vec<IdentityEvent>,
}

impl PendingBuffer {
    fn len(&self) -> usize {
        self.login.len() + self.logout.len()
    }

    /// Drops any buffered entry for the same session, in either buffer.
    fn remove_session(&mut self, event: &IdentityEvent) {
        if let Some(i) = self.login.iter().position(|e| e.same_session(event)) {
            self.login.remove(i);
            debug!("removed duplicated login entry already in the buffer");
        }
        if let Some(i) = self.logout.iter().position(|e| e.same_session(event)) {
            self.logout.remove(i);
            debug!("removed duplicated logout entry already in the buffer");
        }
    }
}

pub struct AggregatorConfig {
    pub max_pending_entries: usize,
    pub userid_timeout: u32,
    pub dyn_address_feature: bool,
    pub primary: Arc<EndpointConnector>,
    pub secondary: Arc<EndpointConnector>,
}

pub struct EntryAggregator {
    buffer: Mutex<PendingBuffer>,
    max_pending_entries: usize,
    userid_timeout: u32,
    dyn_address_feature: bool,
    primary: Arc<EndpointConnector>,
    secondary: Arc<EndpointConnector>,
}

impl EntryAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        EntryAggregator {
            buffer: Mutex::new(PendingBuffer::default()),
            max_pending_entries: config.max_pending_entries,
            userid_timeout: config.userid_timeout,
            dyn_address_feature: config.dyn_address_feature,
            primary: config.primary,
            secondary: config.secondary,
        }
    }

    /// Buffers one event, superseding any buffered entry for the same
    /// session. Reaching the cap flushes inline, still under the buffer
    /// lock, so insertion can stall behind the outbound call.
    pub async fn add_entry(&self, event: IdentityEvent) {
        debug!(
            user = %event.username,
            ip = %event.source_ip,
            direction = ?event.direction,
            "buffering new entry"
        );
        let mut buffer = self.buffer.lock().await;
        buffer.remove_session(&event);
        match event.direction {
            Direction::Login => buffer.login.push(event),
            Direction::Logout => buffer.logout.push(event),
        }
        if buffer.len() >= self.max_pending_entries {
            self.flush_buffer(&mut buffer).await;
        }
    }

    /// Timer-driven flush entry: sends whatever is buffered, if anything.
    pub async fn flush(&self) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() > 0 {
            self.flush_buffer(&mut buffer).await;
        }
    }

    /// Buffered (login, logout) entry counts awaiting flush.
    pub async fn pending_counts(&self) -> (usize, usize) {
        let buffer = self.buffer.lock().await;
        (buffer.login.len(), buffer.logout.len())
    }

    /// Renders and sends everything buffered. The buffers are cleared
    /// whether or not a destination accepted the batch: bounded memory is
    /// traded against redelivery.
    async fn flush_buffer(&self, buffer: &mut PendingBuffer) {
        debug!(
            login = buffer.login.len(),
            logout = buffer.logout.len(),
            "flushing entries"
        );
        let message = payload::render(
            &buffer.login,
            &buffer.logout,
            self.userid_timeout,
            self.dyn_address_feature,
        );
        buffer.login.clear();
        buffer.logout.clear();

        let mut ack = None;
        if self.primary.is_ready() {
            ack = self.primary.send(&message).await;
        }
        // A failed send flips the primary to not ready, so the same batch
        // falls through to the secondary within this flush.
        if !self.primary.is_ready() {
            if self.secondary.is_ready() {
                ack = self.secondary.send(&message).await;
            } else {
                warn!("no endpoint available to handle this update, discarding");
            }
        }

        if let Some(ack) = ack {
            if !ack.is_empty() && !response::parse_ack(&ack) {
                warn!("update acknowledgement includes an error message");
                debug!(%ack);
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for EntryAggregator {
    async fn on_tick(&self) -> TickOutcome {
        self.flush().await;
        TickOutcome::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, VSYS_NONE};

    /// Connectors pointing nowhere: never ready, so flushes drop batches
    /// without touching the network.
    fn dead_connector() -> Arc<EndpointConnector> {
        EndpointConnector::new(&EndpointConfig {
            url: "http://127.0.0.1:9".to_string(),
            api_key: "k".to_string(),
            vsys: VSYS_NONE.to_string(),
        })
        .unwrap()
    }

    fn aggregator(max_pending_entries: usize) -> EntryAggregator {
        EntryAggregator::new(AggregatorConfig {
            max_pending_entries,
            userid_timeout: 1440,
            dyn_address_feature: false,
            primary: dead_connector(),
            secondary: dead_connector(),
        })
    }

    fn event(direction: Direction, user: &str, ip: &str) -> IdentityEvent {
        IdentityEvent {
            direction,
            username: user.to_string(),
            source_ip: ip.to_string(),
            tag: None,
        }
    }

    #[tokio::test]
    async fn buffers_by_direction() {
        let agg = aggregator(10);
        agg.add_entry(event(Direction::Login, "corp\\alice", "10.0.0.1")).await;
        agg.add_entry(event(Direction::Login, "corp\\bob", "10.0.0.2")).await;
        agg.add_entry(event(Direction::Logout, "corp\\carol", "10.0.0.3")).await;
        assert_eq!(agg.pending_counts().await, (2, 1));
    }

    #[tokio::test]
    async fn newer_event_supersedes_older_for_the_same_session() {
        let agg = aggregator(10);
        agg.add_entry(event(Direction::Login, "corp\\alice", "10.0.0.1")).await;
        agg.add_entry(event(Direction::Login, "corp\\alice", "10.0.0.1")).await;
        assert_eq!(agg.pending_counts().await, (1, 0));

        // A stop for the same session moves the pair to the logout buffer.
        agg.add_entry(event(Direction::Logout, "corp\\alice", "10.0.0.1")).await;
        assert_eq!(agg.pending_counts().await, (0, 1));

        // And a fresh start moves it back.
        agg.add_entry(event(Direction::Login, "corp\\alice", "10.0.0.1")).await;
        assert_eq!(agg.pending_counts().await, (1, 0));
    }

    #[tokio::test]
    async fn same_user_on_two_addresses_is_two_sessions() {
        let agg = aggregator(10);
        agg.add_entry(event(Direction::Login, "corp\\alice", "10.0.0.1")).await;
        agg.add_entry(event(Direction::Login, "corp\\alice", "10.0.0.2")).await;
        assert_eq!(agg.pending_counts().await, (2, 0));
    }

    #[tokio::test]
    async fn reaching_the_cap_flushes_and_empties_the_buffer() {
        let agg = aggregator(3);
        agg.add_entry(event(Direction::Login, "corp\\a", "10.0.0.1")).await;
        agg.add_entry(event(Direction::Login, "corp\\b", "10.0.0.2")).await;
        assert_eq!(agg.pending_counts().await, (2, 0));
        // Third entry hits the cap; both endpoints are down so the batch is
        // dropped, but the buffer still ends empty.
        agg.add_entry(event(Direction::Logout, "corp\\c", "10.0.0.3")).await;
        assert_eq!(agg.pending_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn timer_flush_on_empty_buffer_is_a_no_op() {
        let agg = aggregator(10);
        agg.flush().await;
        assert_eq!(agg.pending_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn interleaved_sessions_keep_only_latest_state() {
        let agg = aggregator(100);
        for i in 0..5 {
            agg.add_entry(event(Direction::Login, "corp\\u", &format!("10.0.0.{i}"))).await;
        }
        // Interim updates for two of them, stop for another.
        agg.add_entry(event(Direction::Login, "corp\\u", "10.0.0.1")).await;
        agg.add_entry(event(Direction::Login, "corp\\u", "10.0.0.3")).await;
        agg.add_entry(event(Direction::Logout, "corp\\u", "10.0.0.4")).await;
        assert_eq!(agg.pending_counts().await, (4, 1));
    }
}
