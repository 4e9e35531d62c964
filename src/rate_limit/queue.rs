//! Admission Queue
//!
//! Per-resource FIFO of pending requests. Only the head is evaluated for
//! admission, so waiters are granted in arrival order.

use serde::Serialize;
use std::collections::VecDeque;
use tokio::time::Instant;

/// Handle identifying one pending request within its resource's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Ticket(u64);

impl Ticket {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request waiting for a grant
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub ticket: Ticket,

    /// Carried through but does not reorder the queue
    pub priority: u32,

    pub enqueued_at: Instant,
}

/// FIFO of pending requests for one resource
#[derive(Debug, Default)]
pub struct AdmissionQueue {
    pending: VecDeque<PendingRequest>,
    next_ticket: u64,
}

impl AdmissionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending request and return its handle
    pub fn enqueue(&mut self, priority: u32, now: Instant) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.pending.push_back(PendingRequest {
            ticket,
            priority,
            enqueued_at: now,
        });
        ticket
    }

    /// Whether `ticket` is at the front of the queue
    pub fn is_head(&self, ticket: Ticket) -> bool {
        self.pending.front().is_some_and(|head| head.ticket == ticket)
    }

    /// Remove the head. Called only after the head was admitted or failed.
    pub fn dequeue(&mut self) -> Option<PendingRequest> {
        self.pending.pop_front()
    }

    /// Remove a request wherever it sits, e.g. when its caller gave up.
    /// Returns whether it was the head.
    pub fn remove(&mut self, ticket: Ticket) -> Option<bool> {
        let index = self.pending.iter().position(|p| p.ticket == ticket)?;
        self.pending.remove(index);
        Some(index == 0)
    }

    pub fn head(&self) -> Option<&PendingRequest> {
        self.pending.front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let now = Instant::now();
        let mut queue = AdmissionQueue::new();

        let first = queue.enqueue(1, now);
        let second = queue.enqueue(1, now);

        assert!(queue.is_head(first));
        assert!(!queue.is_head(second));
        assert_eq!(queue.len(), 2);

        let head = queue.dequeue().unwrap();
        assert_eq!(head.ticket, first);
        assert!(queue.is_head(second));
    }

    #[test]
    fn test_priority_does_not_reorder() {
        let now = Instant::now();
        let mut queue = AdmissionQueue::new();

        let low = queue.enqueue(1, now);
        let high = queue.enqueue(10, now);

        assert!(queue.is_head(low));
        assert_eq!(queue.dequeue().unwrap().priority, 1);
        assert!(queue.is_head(high));
    }

    #[test]
    fn test_remove_middle() {
        let now = Instant::now();
        let mut queue = AdmissionQueue::new();

        let a = queue.enqueue(1, now);
        let b = queue.enqueue(1, now);
        let c = queue.enqueue(1, now);

        assert_eq!(queue.remove(b), Some(false));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.remove(a), Some(true));
        assert!(queue.is_head(c));
        assert_eq!(queue.remove(b), None);
    }

    #[test]
    fn test_tickets_unique() {
        let now = Instant::now();
        let mut queue = AdmissionQueue::new();

        let a = queue.enqueue(1, now);
        queue.dequeue();
        let b = queue.enqueue(1, now);

        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(b.to_string(), "#1");
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = AdmissionQueue::new();
        assert!(queue.is_empty());
        assert!(queue.head().is_none());
        assert!(queue.dequeue().is_none());
        assert!(!queue.is_head(Ticket(0)));
    }
}
