use crate::core::model::DownloadState;
use tokio::sync::broadcast;

/// Events published by the persistence manager. Delivery is best-effort
/// broadcast: observers that (re)subscribe late must re-query current state.
#[derive(Debug, Clone)]
pub enum PersistenceEvent {
    DownloadProgress {
        asset_id: String,
        /// Unclamped fraction; can exceed 1.0 when overlapping ranges are
        /// reported for tracks already partially cached.
        percent: f64,
    },
    DownloadStateChanged {
        asset_id: String,
        state: DownloadState,
        /// Display name of the secondary track being fetched, when the state
        /// change was caused by a media selection pass starting.
        selection_label: Option<String>,
        error: Option<String>,
    },
    ManagerRestored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DownloadProgress,
    DownloadStateChanged,
    ManagerRestored,
}

impl PersistenceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PersistenceEvent::DownloadProgress { .. } => EventKind::DownloadProgress,
            PersistenceEvent::DownloadStateChanged { .. } => EventKind::DownloadStateChanged,
            PersistenceEvent::ManagerRestored => EventKind::ManagerRestored,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PersistenceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fire-and-forget; a send with no live subscribers is not an error.
    pub fn publish(&self, event: PersistenceEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }

    /// Subscription limited to the given event kinds.
    pub fn subscribe_to(&self, kinds: Vec<EventKind>) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
            kinds: Some(kinds),
        }
    }
}

pub struct EventSubscriber {
    rx: broadcast::Receiver<PersistenceEvent>,
    kinds: Option<Vec<EventKind>>,
}

impl EventSubscriber {
    fn matches(&self, event: &PersistenceEvent) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&event.kind()),
            None => true,
        }
    }

    pub async fn recv(&mut self) -> Result<PersistenceEvent, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<Option<PersistenceEvent>, broadcast::error::TryRecvError> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(id: &str, percent: f64) -> PersistenceEvent {
        PersistenceEvent::DownloadProgress {
            asset_id: id.to_string(),
            percent,
        }
    }

    fn state_changed(id: &str) -> PersistenceEvent {
        PersistenceEvent::DownloadStateChanged {
            asset_id: id.to_string(),
            state: DownloadState::Downloading,
            selection_label: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn delivers_events_in_publish_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();

        bus.publish(state_changed("a"));
        bus.publish(progress("a", 0.5));

        assert!(matches!(
            sub.recv().await.unwrap(),
            PersistenceEvent::DownloadStateChanged { .. }
        ));
        assert!(matches!(
            sub.recv().await.unwrap(),
            PersistenceEvent::DownloadProgress { .. }
        ));
    }

    #[tokio::test]
    async fn filtered_subscription_skips_other_kinds() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe_to(vec![EventKind::DownloadProgress]);

        bus.publish(state_changed("a"));
        bus.publish(progress("a", 0.25));
        bus.publish(PersistenceEvent::ManagerRestored);

        let only = sub.try_recv().unwrap().expect("progress event");
        assert!(matches!(only, PersistenceEvent::DownloadProgress { .. }));
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[test]
    fn event_kind_mapping() {
        assert_eq!(progress("a", 1.0).kind(), EventKind::DownloadProgress);
        assert_eq!(state_changed("a").kind(), EventKind::DownloadStateChanged);
        assert_eq!(
            PersistenceEvent::ManagerRestored.kind(),
            EventKind::ManagerRestored
        );
    }
}
