//! Sequence number and job id allocation.
//!
//! Both allocators are owned by one client; nothing here is process-wide.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{ClientError, Result};

/// Wrapping 32-bit sequence counter starting at 1.
///
/// Wraparound is not guarded: a value can only collide with a pending
/// waiter after 2^32 sends while that waiter is still outstanding.
#[derive(Debug)]
pub struct SeqAllocator {
    next: AtomicU32,
}

impl Default for SeqAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl SeqAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(seq: u32) -> Self {
        Self {
            next: AtomicU32::new(seq),
        }
    }

    pub fn next_seq(&self) -> u32 {
        // fetch_add wraps on overflow.
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct JobIds {
    next: u16,
    in_flight: HashSet<u16>,
}

/// 16-bit job id allocator that never hands out an id still in flight.
///
/// Id 0 is reserved.
#[derive(Debug)]
pub struct JobIdAllocator {
    state: Mutex<JobIds>,
}

impl Default for JobIdAllocator {
    fn default() -> Self {
        Self {
            state: Mutex::new(JobIds {
                next: 1,
                in_flight: HashSet::new(),
            }),
        }
    }
}

impl JobIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next free id and mark it in flight.
    pub fn allocate(&self) -> Result<u16> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for _ in 0..u16::MAX {
            let candidate = state.next;
            state.next = match state.next.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if state.in_flight.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(ClientError::AllocatorExhausted)
    }

    /// Return an id to the pool. Returns false if it was not in flight.
    pub fn release(&self, id: u16) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .remove(&id)
    }

    pub fn is_in_flight(&self, id: u16) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .contains(&id)
    }

    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .len()
    }
}
