//! Reception buffer for reordering inbound packets.
//!
//! Each peer owns one buffer. The receive loop pushes decrypted packets in
//! whatever order the network delivers them; the audio callback pops them
//! in ascending id order.
//!
//! # Design
//!
//! - Nothing is released until `minimum_buffer_size` packets are queued
//! - Packets older than `maximum_age_ms` or behind the next expected id are
//!   swept on every push
//! - Above `maximum_buffer_size` the lowest id is evicted
//! - A missing id is skipped by one `pop` returning `None`
//! - Too many late packets in a row reset the whole buffer
//!
//! ```text
//! Accumulating --(len >= minimum)--> Draining --(empty)--> Accumulating
//!       ^                                |
//!       +-----------(reset)--------------+
//! ```
//!
//! # Thread Safety
//!
//! This implementation is NOT thread-safe. Wrap in a Mutex if needed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{monotonic_ms, Packet};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BufferConfigError {
    #[error("minimum buffer size must be at least 1")]
    ZeroMinimum,
    #[error("maximum buffer size {max} is below minimum {min}")]
    MaximumBelowMinimum { min: usize, max: usize },
}

/// Tunables for a [`ReceptionBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Packets held back before the first release.
    pub minimum_buffer_size: usize,
    /// Hard cap; exceeding it evicts the lowest id.
    pub maximum_buffer_size: usize,
    /// Packets older than this are dropped on the next push.
    pub maximum_age_ms: u64,
    /// Late packets tolerated before the buffer resets.
    pub maximum_rejected_before_reset: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            minimum_buffer_size: 3,
            maximum_buffer_size: 16,
            maximum_age_ms: 1_000,
            maximum_rejected_before_reset: 32,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<(), BufferConfigError> {
        if self.minimum_buffer_size == 0 {
            return Err(BufferConfigError::ZeroMinimum);
        }
        if self.maximum_buffer_size < self.minimum_buffer_size {
            return Err(BufferConfigError::MaximumBelowMinimum {
                min: self.minimum_buffer_size,
                max: self.maximum_buffer_size,
            });
        }
        Ok(())
    }
}

/// Whether the buffer is still filling or releasing packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPhase {
    Accumulating,
    Draining,
}

/// Bounded, time-limited reordering buffer keyed by packet id.
#[derive(Debug, Clone)]
pub struct ReceptionBuffer {
    config: BufferConfig,
    packets: BTreeMap<u32, Packet>,
    /// `None` until the first pop anchors it to the smallest buffered id.
    next_expected: Option<u32>,
    rejected: u32,
    phase: BufferPhase,
}

impl Default for ReceptionBuffer {
    fn default() -> Self {
        Self::from_valid(BufferConfig::default())
    }
}

impl ReceptionBuffer {
    pub fn new(config: BufferConfig) -> Result<Self, BufferConfigError> {
        config.validate()?;
        Ok(Self::from_valid(config))
    }

    fn from_valid(config: BufferConfig) -> Self {
        Self {
            config,
            packets: BTreeMap::new(),
            next_expected: None,
            rejected: 0,
            phase: BufferPhase::Accumulating,
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Queue a packet, sweeping stale entries against the monotonic clock.
    pub fn push(&mut self, packet: Packet) {
        self.push_at(packet, monotonic_ms());
    }

    /// Queue a packet, treating `now_ms` as the current monotonic time.
    pub fn push_at(&mut self, packet: Packet, now_ms: u64) {
        if self.rejected > self.config.maximum_rejected_before_reset {
            debug!(
                rejected = self.rejected,
                dropped = self.packets.len(),
                "reception buffer reset after repeated late packets"
            );
            self.reset();
        }

        self.sweep(now_ms);

        match self.next_expected {
            Some(next) if packet.id < next => {
                self.rejected = self.rejected.saturating_add(1);
                trace!(id = packet.id, next, "late packet rejected");
                return;
            }
            _ => {
                self.packets.insert(packet.id, packet);
            }
        }

        while self.packets.len() > self.config.maximum_buffer_size {
            self.evict_oldest();
        }
    }

    /// Release the next packet in id order.
    ///
    /// Returns `None` while accumulating, on underrun, or when the expected
    /// id is missing. In the last case the expected id still advances by one.
    pub fn pop(&mut self) -> Option<Packet> {
        match self.phase {
            BufferPhase::Accumulating => {
                if self.packets.len() < self.config.minimum_buffer_size {
                    return None;
                }
                self.phase = BufferPhase::Draining;
            }
            BufferPhase::Draining => {
                if self.packets.is_empty() {
                    trace!("reception buffer underrun");
                    self.phase = BufferPhase::Accumulating;
                    return None;
                }
            }
        }

        let next = match self.next_expected {
            Some(next) => next,
            None => *self.packets.keys().next()?,
        };
        self.next_expected = Some(next.wrapping_add(1));

        match self.packets.remove(&next) {
            Some(packet) => {
                self.rejected = 0;
                Some(packet)
            }
            None => {
                trace!(id = next, "skipping missing packet");
                None
            }
        }
    }

    /// Drop everything and forget the expected id.
    pub fn reset(&mut self) {
        self.packets.clear();
        self.next_expected = None;
        self.rejected = 0;
        self.phase = BufferPhase::Accumulating;
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn next_expected(&self) -> Option<u32> {
        self.next_expected
    }

    pub fn rejected_count(&self) -> u32 {
        self.rejected
    }

    pub fn phase(&self) -> BufferPhase {
        self.phase
    }

    fn sweep(&mut self, now_ms: u64) {
        let max_age = self.config.maximum_age_ms;
        let next = self.next_expected;
        self.packets.retain(|id, packet| {
            now_ms.saturating_sub(packet.received_ms) <= max_age
                && next.map_or(true, |next| *id >= next)
        });
    }

    fn evict_oldest(&mut self) {
        if let Some((id, _)) = self.packets.pop_first() {
            trace!(id, "reception buffer full, evicting");
            self.next_expected = Some(id.wrapping_add(1));
        }
    }
}
