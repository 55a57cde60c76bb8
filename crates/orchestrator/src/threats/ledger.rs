#![forbid(unsafe_code)]

use crate::threats::ThreatEvent;
use std::collections::VecDeque;

/// Bounded event history, oldest evicted first.
#[derive(Debug)]
pub struct Ledger {
    capacity: usize,
    events: VecDeque<ThreatEvent>,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: ThreatEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn to_vec(&self) -> Vec<ThreatEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
