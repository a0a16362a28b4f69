//! Ordered queue of sync events
//!
//! Events are kept in insertion order, keyed by a monotonically increasing
//! sequence number. Two secondary indexes avoid linear scans:
//!
//! - `by_id`: event id to sequence number
//! - `by_identifier`: every target and dependency identifier to the
//!   sequence numbers of the events that mention it

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::event::{Operation, Payload, SyncEvent};

#[derive(Debug, Default)]
pub struct SyncQueue {
    events: BTreeMap<u64, SyncEvent>,
    next_seq: u64,
    by_id: HashMap<String, u64>,
    by_identifier: HashMap<String, BTreeSet<u64>>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event; an event with the same id is replaced in place
    pub fn push(&mut self, event: SyncEvent) {
        if let Some(seq) = self.by_id.get(&event.id).copied() {
            self.unindex(seq);
            self.index(seq, &event);
            self.events.insert(seq, event);
            return;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_id.insert(event.id.clone(), seq);
        self.index(seq, &event);
        self.events.insert(seq, event);
    }

    pub fn front(&self) -> Option<&SyncEvent> {
        self.events.values().next()
    }

    pub fn front_mut(&mut self) -> Option<&mut SyncEvent> {
        self.events.values_mut().next()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&SyncEvent> {
        self.by_id.get(id).and_then(|seq| self.events.get(seq))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SyncEvent> {
        let seq = self.by_id.get(id)?;
        self.events.get_mut(seq)
    }

    pub fn remove(&mut self, id: &str) -> Option<SyncEvent> {
        let seq = self.by_id.remove(id)?;
        self.unindex(seq);
        self.events.remove(&seq)
    }

    /// A queued CREATE for `target` that has not been sent yet and renders
    /// its body from the target at fire time
    ///
    /// Only such a CREATE carries every later change to the target; one
    /// with a fixed body does not absorb PATCHes.
    pub fn find_unfired_create(&self, target: &str) -> Option<&SyncEvent> {
        self.mentioning(target).find(|event| {
            event.operation == Operation::Create
                && event.target.as_deref() == Some(target)
                && matches!(event.data, Some(Payload::Deferred))
                && !event.is_firing()
        })
    }

    /// Ids of queued events whose `depends` contains `identifier`, in order
    pub fn dependents_of(&self, identifier: &str) -> Vec<String> {
        self.mentioning(identifier)
            .filter(|event| event.depends_on(identifier))
            .map(|event| event.id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncEvent> {
        self.events.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SyncEvent> {
        self.events.values_mut()
    }

    /// Consume the queue, yielding events in order
    pub fn into_events(self) -> impl Iterator<Item = SyncEvent> {
        self.events.into_values()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn mentioning<'a>(&'a self, identifier: &str) -> impl Iterator<Item = &'a SyncEvent> + 'a {
        self.by_identifier
            .get(identifier)
            .into_iter()
            .flat_map(|seqs| seqs.iter())
            .filter_map(|seq| self.events.get(seq))
    }

    fn index(&mut self, seq: u64, event: &SyncEvent) {
        for identifier in event.target.iter().chain(event.depends.iter()) {
            self.by_identifier
                .entry(identifier.clone())
                .or_default()
                .insert(seq);
        }
    }

    fn unindex(&mut self, seq: u64) {
        let Some(event) = self.events.get(&seq) else {
            return;
        };
        let identifiers: Vec<String> = event
            .target
            .iter()
            .chain(event.depends.iter())
            .cloned()
            .collect();
        for identifier in identifiers {
            if let Some(seqs) = self.by_identifier.get_mut(&identifier) {
                seqs.remove(&seq);
                if seqs.is_empty() {
                    self.by_identifier.remove(&identifier);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::event::FireState;
    use tokio::time::Instant;

    fn event(id: &str, operation: Operation, target: &str) -> SyncEvent {
        SyncEvent::http(operation, "/x").with_id(id).with_target(target)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = SyncQueue::new();
        queue.push(event("e1", Operation::Create, "a"));
        queue.push(event("e2", Operation::Create, "b"));
        queue.push(event("e3", Operation::Patch, "a"));

        let ids: Vec<&str> = queue.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
        assert_eq!(queue.front().unwrap().id, "e1");

        queue.remove("e1");
        assert_eq!(queue.front().unwrap().id, "e2");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_push_same_id_replaces_in_place() {
        let mut queue = SyncQueue::new();
        queue.push(event("e1", Operation::Create, "a"));
        queue.push(event("e2", Operation::Create, "b"));
        queue.push(event("e1", Operation::Create, "c"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front().unwrap().target.as_deref(), Some("c"));
        assert!(queue.dependents_of("a").is_empty());
        assert_eq!(queue.dependents_of("c"), vec!["e1".to_string()]);
    }

    #[test]
    fn test_find_unfired_create_skips_firing() {
        let mut queue = SyncQueue::new();
        queue.push(event("e1", Operation::Create, "conv1").with_deferred_data());
        assert_eq!(queue.find_unfired_create("conv1").unwrap().id, "e1");
        assert!(queue.find_unfired_create("conv2").is_none());

        queue.get_mut("e1").unwrap().state = FireState::Firing {
            since: Instant::now(),
            attempt: 0,
        };
        assert!(queue.find_unfired_create("conv1").is_none());
    }

    #[test]
    fn test_find_unfired_create_needs_deferred_body() {
        let mut queue = SyncQueue::new();
        queue.push(
            event("e1", Operation::Create, "conv1")
                .with_data(serde_json::json!({ "id": "conv1", "title": "old" })),
        );
        assert!(queue.find_unfired_create("conv1").is_none());
    }

    #[test]
    fn test_find_unfired_create_ignores_dependents() {
        let mut queue = SyncQueue::new();
        // A message create depends on its conversation but targets itself
        queue.push(
            SyncEvent::http(Operation::Create, "/messages")
                .with_id("m1")
                .with_target("msg1")
                .with_depends(["conv1", "msg1"]),
        );
        assert!(queue.find_unfired_create("conv1").is_none());
        assert_eq!(queue.dependents_of("conv1"), vec!["m1".to_string()]);
    }

    #[test]
    fn test_dependents_in_queue_order_and_index_cleanup() {
        let mut queue = SyncQueue::new();
        queue.push(event("e1", Operation::Create, "conv1"));
        queue.push(event("e2", Operation::Patch, "conv2"));
        queue.push(event("e3", Operation::Patch, "conv1"));

        assert_eq!(
            queue.dependents_of("conv1"),
            vec!["e1".to_string(), "e3".to_string()]
        );

        queue.remove("e1");
        queue.remove("e3");
        assert!(queue.dependents_of("conv1").is_empty());
        assert!(queue.by_identifier.get("conv1").is_none());
    }
}
