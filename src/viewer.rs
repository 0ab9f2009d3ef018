//! The viewing client: a newest-first feed of received submissions.
//!
//! The feed lives as long as the view does. `Viewer::run` consumes a session
//! until it ends; dropping the viewer afterwards discards the whole feed.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelEvent, PubSubSession};
use crate::constants::{FORM_SUBMISSION_EVENT, SUBMISSION_ALERT_TITLE};
use crate::notifications::{Delivery, DeliveryAgent};

/// One received submission as shown in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Unique within the feed; derived from receipt time.
    pub id: String,
    /// Human-readable summary.
    pub message: String,
    /// Publish time, epoch milliseconds; receipt time if the event had none.
    pub timestamp: i64,
}

/// Newest-first list of records.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    records: Vec<NotificationRecord>,
    last_id_ms: i64,
}

impl NotificationFeed {
    /// Empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for `event` at the front.
    ///
    /// Two events received in the same millisecond still get distinct ids:
    /// the later one is bumped forward.
    pub fn push(&mut self, event: &ChannelEvent, received_at_ms: i64) -> &NotificationRecord {
        let id_ms = received_at_ms.max(self.last_id_ms.saturating_add(1));
        self.last_id_ms = id_ms;
        let timestamp = match event.payload().timestamp {
            0 => received_at_ms,
            published => published,
        };

        self.records.insert(
            0,
            NotificationRecord {
                id: id_ms.to_string(),
                message: event.payload().message.clone(),
                timestamp,
            },
        );
        &self.records[0]
    }

    /// Remove the record with `id`.
    pub fn remove(&mut self, id: &str) -> Option<NotificationRecord> {
        let index = self.records.iter().position(|r| r.id == id)?;
        Some(self.records.remove(index))
    }

    /// Record with `id`, if present.
    pub fn get(&self, id: &str) -> Option<&NotificationRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.records.iter()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the feed is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Consumes session events into a feed and raises alerts for them.
#[derive(Debug, Default)]
pub struct Viewer {
    feed: NotificationFeed,
    agent: Option<DeliveryAgent>,
}

impl Viewer {
    /// Viewer raising alerts through `agent`.
    pub fn new(agent: DeliveryAgent) -> Self {
        Self {
            feed: NotificationFeed::new(),
            agent: Some(agent),
        }
    }

    /// Viewer that only keeps the feed.
    pub fn without_alerts() -> Self {
        Self::default()
    }

    /// The feed.
    pub fn feed(&self) -> &NotificationFeed {
        &self.feed
    }

    /// Mutable feed, for removals by the user.
    pub fn feed_mut(&mut self) -> &mut NotificationFeed {
        &mut self.feed
    }

    /// Record `event` and raise an alert for it.
    pub async fn handle_event(&mut self, event: &ChannelEvent) -> (NotificationRecord, Delivery) {
        let record = self.feed.push(event, crate::now_millis()).clone();

        let delivery = match &self.agent {
            Some(agent) => {
                agent
                    .show(SUBMISSION_ALERT_TITLE, &event.payload().message, FORM_SUBMISSION_EVENT)
                    .await
            }
            None => Delivery::Suppressed,
        };
        (record, delivery)
    }

    /// Consume `session` until it ends, returning how many events were handled.
    pub async fn run(&mut self, session: &mut PubSubSession) -> usize {
        self.run_with(session, |_| {}).await
    }

    /// Like [`Self::run`], calling `on_record` for each new record.
    pub async fn run_with(
        &mut self,
        session: &mut PubSubSession,
        mut on_record: impl FnMut(&NotificationRecord) + Send,
    ) -> usize {
        let mut handled = 0;
        while let Some(event) = session.recv().await {
            let (record, _) = self.handle_event(&event).await;
            on_record(&record);
            handled += 1;
        }
        log::debug!("Viewer stopped after {} event(s)", handled);
        handled
    }
}
