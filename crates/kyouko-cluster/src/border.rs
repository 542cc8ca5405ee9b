// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Border exchange between linked segments
//!
//! A link connects an output slot of one segment to an input slot of a
//! later segment. Each link owns two exchanges: forward carries the
//! producer's outputs downstream, backward carries the consumer's input
//! deltas upstream. The exchange is the only state two segments share.

use parking_lot::Mutex;

use crate::state::PassDirection;

#[derive(Debug, Default)]
struct ExchangeBuffer {
    values: Vec<f32>,
    ready: bool,
}

/// Transfer buffer plus ready flag, guarded by one lock
#[derive(Debug, Default)]
pub struct BorderExchange {
    inner: Mutex<ExchangeBuffer>,
}

impl BorderExchange {
    pub fn new(size: usize) -> Self {
        Self {
            inner: Mutex::new(ExchangeBuffer {
                values: vec![0.0; size],
                ready: false,
            }),
        }
    }

    /// Copy `values` in and mark the exchange ready
    pub fn publish(&self, values: &[f32]) {
        let mut buffer = self.inner.lock();
        let len = buffer.values.len().min(values.len());
        buffer.values[..len].copy_from_slice(&values[..len]);
        buffer.values[len..].fill(0.0);
        buffer.ready = true;
    }

    /// Copy the published values into `target` and clear the flag
    ///
    /// Returns false, leaving `target` untouched, if nothing was published.
    pub fn take_into(&self, target: &mut [f32]) -> bool {
        let mut buffer = self.inner.lock();
        if !buffer.ready {
            return false;
        }
        let len = buffer.values.len().min(target.len());
        target[..len].copy_from_slice(&buffer.values[..len]);
        buffer.ready = false;
        true
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    pub fn reset(&self) {
        self.inner.lock().ready = false;
    }
}

/// Route of one link through slot records and transfer buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRoute {
    pub source_segment: usize,
    pub source_slot: usize,
    /// Offset into the source's output transfer buffer
    pub source_offset: usize,
    pub target_segment: usize,
    pub target_slot: usize,
    /// Offset into the target's input transfer buffer
    pub target_offset: usize,
    pub size: usize,
}

/// Both directions of one link
#[derive(Debug)]
pub struct LinkExchange {
    pub route: LinkRoute,
    forward: BorderExchange,
    backward: BorderExchange,
}

impl LinkExchange {
    pub fn new(route: LinkRoute) -> Self {
        Self {
            route,
            forward: BorderExchange::new(route.size),
            backward: BorderExchange::new(route.size),
        }
    }

    pub fn exchange(&self, direction: PassDirection) -> &BorderExchange {
        match direction {
            PassDirection::Forward => &self.forward,
            PassDirection::Backward => &self.backward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_requires_publish() {
        let exchange = BorderExchange::new(3);
        let mut target = [9.0; 3];
        assert!(!exchange.take_into(&mut target));
        assert_eq!(target, [9.0; 3]);

        exchange.publish(&[1.0, 2.0]);
        assert!(exchange.is_ready());
        assert!(exchange.take_into(&mut target));
        assert_eq!(target, [1.0, 2.0, 0.0]);
        assert!(!exchange.is_ready());
        assert!(!exchange.take_into(&mut target));
    }

    #[test]
    fn test_reset_discards_pending_values() {
        let exchange = BorderExchange::new(1);
        exchange.publish(&[4.0]);
        exchange.reset();
        let mut target = [0.0];
        assert!(!exchange.take_into(&mut target));
    }

    #[test]
    fn test_link_directions_are_independent() {
        let link = LinkExchange::new(LinkRoute {
            source_segment: 0,
            source_slot: 0,
            source_offset: 0,
            target_segment: 1,
            target_slot: 0,
            target_offset: 0,
            size: 2,
        });
        link.exchange(PassDirection::Forward).publish(&[1.0, 1.0]);
        assert!(!link.exchange(PassDirection::Backward).is_ready());
    }
}
