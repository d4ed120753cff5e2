//! Expander Link
//!
//! Lock-free, double-buffered message exchange between a module and an
//! adjacent companion. The producer writes into the back buffer and requests a
//! flip; the host performs the flip between samples; consumers read the front
//! buffer. Nothing here blocks or allocates after construction.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Atomic f64 for lock-free communication between threads
///
/// Uses AtomicU64 internally since there's no native AtomicF64.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Create a new atomic f64 with the given initial value
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Get the current value
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Set a new value
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Load with specified ordering
    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.0.load(ordering))
    }

    /// Store with specified ordering
    pub fn store(&self, value: f64, ordering: Ordering) {
        self.0.store(value.to_bits(), ordering);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

/// Per-sample state published to an expander
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExpanderMessage {
    /// Step currently addressed (0–7)
    pub address_index: usize,
    /// Combined gate level of the active step
    pub all_gates: f64,
    /// Scaled output clock level
    pub output_clock: f64,
    /// Whether the sequence is running
    pub is_playing: bool,
}

#[derive(Debug, Default)]
struct MessageSlot {
    address_index: AtomicUsize,
    all_gates: AtomicF64,
    output_clock: AtomicF64,
    is_playing: AtomicBool,
}

impl MessageSlot {
    fn write(&self, message: &ExpanderMessage) {
        self.address_index
            .store(message.address_index, Ordering::Relaxed);
        self.all_gates.store(message.all_gates, Ordering::Relaxed);
        self.output_clock
            .store(message.output_clock, Ordering::Relaxed);
        self.is_playing.store(message.is_playing, Ordering::Release);
    }

    fn read(&self) -> ExpanderMessage {
        let is_playing = self.is_playing.load(Ordering::Acquire);
        ExpanderMessage {
            address_index: self.address_index.load(Ordering::Relaxed),
            all_gates: self.all_gates.load(Ordering::Relaxed),
            output_clock: self.output_clock.load(Ordering::Relaxed),
            is_playing,
        }
    }
}

/// Double-buffered single-producer/single-consumer message slot
#[derive(Debug, Default)]
pub struct ExpanderLink {
    slots: [MessageSlot; 2],
    front: AtomicUsize,
    flip_requested: AtomicBool,
}

impl ExpanderLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the producer-side (back) buffer
    pub fn write(&self, message: &ExpanderMessage) {
        let back = 1 - self.front.load(Ordering::Acquire);
        self.slots[back].write(message);
    }

    /// Marks the back buffer ready to be swapped in at the end of the sample
    pub fn request_flip(&self) {
        self.flip_requested.store(true, Ordering::Release);
    }

    pub fn flip_requested(&self) -> bool {
        self.flip_requested.load(Ordering::Acquire)
    }

    /// Swaps buffers if the producer asked for it; returns whether a swap happened
    pub fn flip(&self) -> bool {
        if self.flip_requested.swap(false, Ordering::AcqRel) {
            self.front.fetch_xor(1, Ordering::AcqRel);
            true
        } else {
            false
        }
    }

    /// Reads the consumer-side (front) buffer
    pub fn read(&self) -> ExpanderMessage {
        let front = self.front.load(Ordering::Acquire);
        self.slots[front].read()
    }
}
