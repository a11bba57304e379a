//! Reusable RGBA buffers for the capture loop.

use crate::types::{Frame, Timestamp};

/// Keeps released frame buffers around so steady-state capture does not allocate.
#[derive(Debug)]
pub struct FramePool {
    free: Vec<Vec<u8>>,
    capacity: usize,
    allocations: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            allocations: 0,
        }
    }

    /// Hands out an empty frame whose buffer may carry capacity from earlier use.
    pub fn acquire(&mut self, timestamp: Timestamp) -> Frame {
        let rgba = match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => {
                self.allocations += 1;
                Vec::new()
            }
        };
        Frame {
            rgba,
            width: 0,
            height: 0,
            timestamp,
        }
    }

    pub fn release(&mut self, frame: Frame) {
        if self.free.len() < self.capacity {
            self.free.push(frame.rgba);
        }
    }

    /// Number of buffers created from scratch over the pool's lifetime.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}
