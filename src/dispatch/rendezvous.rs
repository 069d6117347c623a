//! Per-request completion slots keyed by correlation id.

use std::collections::HashMap;

use tokio::sync::oneshot;
use uuid::Uuid;

use super::DispatchResult;

#[derive(Default)]
pub(crate) struct Rendezvous {
    slots: HashMap<Uuid, oneshot::Sender<DispatchResult>>,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: Uuid, slot: oneshot::Sender<DispatchResult>) {
        self.slots.insert(id, slot);
    }

    /// True when the caller stopped waiting for this request.
    pub fn is_abandoned(&self, id: &Uuid) -> bool {
        self.slots.get(id).map_or(true, |slot| slot.is_closed())
    }

    /// Hand the result to its caller. Returns false if nobody was listening.
    pub fn deliver(&mut self, id: &Uuid, result: DispatchResult) -> bool {
        match self.slots.remove(id) {
            Some(slot) => slot.send(result).is_ok(),
            None => false,
        }
    }

    pub fn discard(&mut self, id: &Uuid) {
        self.slots.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Outcome, Payload};

    #[tokio::test]
    async fn test_deliver_reaches_only_its_caller() {
        let mut rendezvous = Rendezvous::new();
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        rendezvous.register(first, first_tx);
        rendezvous.register(second, second_tx);

        assert!(rendezvous.deliver(&first, Ok(Outcome::Found(Payload::Present))));
        assert!(matches!(
            first_rx.await.unwrap(),
            Ok(Outcome::Found(Payload::Present))
        ));
        assert!(second_rx.try_recv().is_err());
        assert!(!rendezvous.deliver(&first, Ok(Outcome::NotFound)));
    }

    #[test]
    fn test_dropped_caller_is_abandoned() {
        let mut rendezvous = Rendezvous::new();
        let (tx, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        rendezvous.register(id, tx);

        assert!(!rendezvous.is_abandoned(&id));
        drop(rx);
        assert!(rendezvous.is_abandoned(&id));
        assert!(rendezvous.is_abandoned(&Uuid::new_v4()));
    }
}
