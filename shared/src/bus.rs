//! Process-local publish/subscribe for facts and presentation events.
//!
//! Simulation and session code publish here; presentation code (or, in the
//! headless binaries, a logger) subscribes. Delivery follows subscription
//! order and subscribers can leave deterministically via [`Bus::unsubscribe`]
//! or simply by dropping their [`Subscription`].

use crate::protocol::Fact;
use log::debug;
use tokio::sync::mpsc;

/// User-originated requests handled by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionIntent {
    HostClicked,
    JoinClicked,
    LeaveClicked,
    RestartClicked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Intent(ConnectionIntent),
    StatusText(String),
    ShowMenu(bool),
    GameOver { winner: String, kills: u32 },
    Fact(Fact),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Subscription<T> {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Everything delivered so far, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

pub struct Bus<T> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<T>)>,
}

impl<T: Clone> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Bus<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription<T> {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push((id, tx));
        Subscription { id, rx }
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    /// Delivers to every live subscriber in subscription order and drops
    /// those whose receiving end has gone away.
    pub fn publish(&mut self, event: T) {
        self.subscribers.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                debug!("Pruning closed bus subscriber {:?}", id);
            }
            alive
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Presentation events derived from a match fact, in publish order.
pub fn presentation_events(fact: &Fact) -> Vec<BusEvent> {
    match fact {
        Fact::MatchEnded { winner, kills } => {
            let status = if winner.is_empty() {
                "Match ended!".to_string()
            } else {
                format!("{} wins!", winner)
            };
            vec![
                BusEvent::GameOver {
                    winner: winner.clone(),
                    kills: *kills,
                },
                BusEvent::StatusText(status),
            ]
        }
        Fact::MatchStarted => vec![
            BusEvent::StatusText("Match started!".to_string()),
            BusEvent::ShowMenu(false),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let mut bus = Bus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(1);
        bus.publish(2);
        assert_eq!(a.drain(), vec![1, 2]);
        assert_eq!(b.drain(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut bus = Bus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert!(bus.unsubscribe(a.id()));
        assert!(!bus.unsubscribe(a.id()));
        bus.publish("x");
        assert_eq!(a.try_next(), None);
        assert_eq!(b.try_next(), Some("x"));
    }

    #[test]
    fn test_dropped_subscriber_pruned() {
        let mut bus = Bus::new();
        let a = bus.subscribe();
        let _b = bus.subscribe();
        drop(a);
        bus.publish(0u8);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_match_end_presentation() {
        let events = presentation_events(&Fact::MatchEnded {
            winner: "alice".to_string(),
            kills: 10,
        });
        assert_eq!(
            events,
            vec![
                BusEvent::GameOver {
                    winner: "alice".to_string(),
                    kills: 10
                },
                BusEvent::StatusText("alice wins!".to_string()),
            ]
        );

        let attrition = presentation_events(&Fact::MatchEnded {
            winner: String::new(),
            kills: 0,
        });
        assert_eq!(attrition[1], BusEvent::StatusText("Match ended!".to_string()));
    }

    #[test]
    fn test_other_facts_have_no_presentation() {
        assert!(presentation_events(&Fact::ProjectileHidden { slot: 3 }).is_empty());
    }

    #[tokio::test]
    async fn test_async_recv() {
        let mut bus = Bus::new();
        let mut sub = bus.subscribe();
        bus.publish(BusEvent::ShowMenu(true));
        assert_eq!(sub.recv().await, Some(BusEvent::ShowMenu(true)));
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }
}
