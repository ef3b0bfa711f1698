/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! Priority-ordered, rate-paced interest expression.
//!
//! Dequeue order is lowest priority value first, FIFO within a priority.
//! Expression is paced by a token bucket when a pacing rate is set; the
//! queue records per-expression timestamps that feed RTT estimation.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};

use namecast_types::data::Interest;
use namecast_types::name::Name;

/// Priority used for retransmissions: ahead of everything else.
pub const RTX_PRIORITY: u32 = 0;
/// Priority used for bootstrap objects (`_latest`, `_live`, GOP pointers).
pub const BOOTSTRAP_PRIORITY: u32 = 1;
/// Priority used for in-order frame fetching.
pub const FETCH_PRIORITY: u32 = 2;

#[derive(Debug)]
struct Entry {
    priority: u32,
    order: u64,
    interest: Interest,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the lowest (priority, order)
        // pops first.
        other
            .priority
            .cmp(&self.priority)
            .then(other.order.cmp(&self.order))
    }
}

/// The interest expression queue.
#[derive(Debug)]
pub struct InterestQueue {
    heap: BinaryHeap<Entry>,
    next_order: u64,
    /// Interests per second; 0 disables pacing.
    pacing_rate: f64,
    tokens: f64,
    last_refill_ms: Option<u64>,
    expressed: HashMap<Name, u64>,
}

impl Default for InterestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InterestQueue {
    pub fn new() -> Self {
        InterestQueue {
            heap: BinaryHeap::new(),
            next_order: 0,
            pacing_rate: 0.0,
            tokens: 0.0,
            last_refill_ms: None,
            expressed: HashMap::new(),
        }
    }

    /// Adjust the expression rate, interests per second. 0 disables pacing.
    pub fn set_pacing_rate(&mut self, rate: f64) {
        self.pacing_rate = rate.max(0.0);
    }

    pub fn enqueue(&mut self, interest: Interest, priority: u32) {
        let order = self.next_order;
        self.next_order += 1;
        self.heap.push(Entry {
            priority,
            order,
            interest,
        });
    }

    /// Pop every interest that is allowed out right now, recording its
    /// expression timestamp.
    pub fn drain_due(&mut self, now_ms: u64) -> Vec<Interest> {
        self.refill_tokens(now_ms);

        let mut out = Vec::new();
        while let Some(head) = self.heap.peek() {
            if self.pacing_rate > 0.0 && self.tokens < 1.0 {
                log::trace!(
                    "pacing holds {} queued interests (head priority {})",
                    self.heap.len(),
                    head.priority
                );
                break;
            }
            let entry = self.heap.pop().unwrap();
            if self.pacing_rate > 0.0 {
                self.tokens -= 1.0;
            }
            self.expressed.insert(entry.interest.name.clone(), now_ms);
            out.push(entry.interest);
        }
        out
    }

    /// When the interest for `name` was last expressed. Consumed by the RTT
    /// sampler on data arrival.
    pub fn take_express_time(&mut self, name: &Name) -> Option<u64> {
        self.expressed.remove(name)
    }

    pub fn express_time(&self, name: &Name) -> Option<u64> {
        self.expressed.get(name).copied()
    }

    /// Drop all queued interests and expression bookkeeping.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.expressed.clear();
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn refill_tokens(&mut self, now_ms: u64) {
        if self.pacing_rate <= 0.0 {
            return;
        }
        if let Some(last) = self.last_refill_ms {
            let elapsed_ms = now_ms.saturating_sub(last) as f64;
            // Burst capacity of a quarter second's worth of interests.
            let burst = (self.pacing_rate / 4.0).max(1.0);
            self.tokens = (self.tokens + elapsed_ms * self.pacing_rate / 1000.0).min(burst);
        } else {
            self.tokens = (self.pacing_rate / 4.0).max(1.0);
        }
        self.last_refill_ms = Some(now_ms);
    }
}
