//! A small sliding window buffer indexed by a large looping address space.

use core::fmt;

use crate::sequence_number::pmod;

/// A sliding window over a looping address space, backed by a circular
/// buffer of `window_size` bytes.
///
/// A value can be registered at any location within the address space. If
/// the given location is outside the current window, the head shifts forward
/// until the location is reached, resetting every slot it steps past to the
/// default value. Data that falls outside the window as it moves is lost.
///
/// Conceptual view (the implementation keeps the window as a circular buffer
/// with its own moving head):
///
/// ```text
///          |<-winSize->|
///          |           |
///          v           v
///   |-----|0|X|0|X|0|0|0|----------------------------------|
///                      ^                                  ^
///                      |                                  |
///                      +---- address_head                 +--- address_size-1
/// ```
#[derive(Debug, Clone)]
pub struct WindowRing {
    ring: Vec<u8>,
    address_size: u32,
    window_size: u32,
    default_val: u8,
    // The window head and address head have no fixed relationship; they are
    // only ever moved relative to their previous positions.
    window_head: usize,
    address_head: u32,
}

impl WindowRing {
    /// Create a new `WindowRing` of `window_size` slots over an address
    /// space of `address_size` positions, with empty slots holding
    /// `default_val`.
    ///
    /// # Panics
    ///
    /// Panics if `address_size` is smaller than `window_size`.
    pub fn new(address_size: u32, window_size: u32, default_val: u8) -> Self {
        assert!(
            address_size >= window_size,
            "window ring address size {address_size} smaller than window size {window_size}"
        );

        WindowRing {
            ring: vec![default_val; window_size as usize],
            address_size,
            window_size,
            default_val,
            window_head: 0,
            address_head: 0,
        }
    }

    /// The number of slots in the window.
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// The size of the looping address space the window slides over.
    pub fn address_size(&self) -> u32 {
        self.address_size
    }

    /// Whether the given address space location is covered by the current
    /// window. Distance is measured counting back from the head until `loc`
    /// is reached, looping around the address space as needed.
    pub fn in_window(&self, loc: u32) -> bool {
        let distance = pmod(self.address_head as i64 - loc as i64, self.address_size as i64);
        distance < self.window_size as i64
    }

    /// Write `val` into the slot for the address space location `loc`,
    /// advancing the window over `loc` first if it is not currently covered.
    ///
    /// # Panics
    ///
    /// Panics if `loc` exceeds the address size. That indicates a bug in the
    /// caller.
    pub fn write(&mut self, loc: u32, val: u8) {
        let index = self.slot_for(loc);
        self.ring[index] = val;
    }

    /// Advance the window so that its head covers `loc`, resetting slots
    /// stepped past, without recording a value. A no-op when `loc` is
    /// already covered.
    ///
    /// # Panics
    ///
    /// Panics if `loc` exceeds the address size. That indicates a bug in the
    /// caller.
    pub fn advance_to(&mut self, loc: u32) {
        self.slot_for(loc);
    }

    /// Locate the ring slot for `loc`, shifting the window forward over it
    /// if needed. Each position stepped past (capped at the window size)
    /// moves the window head one slot and resets that slot.
    fn slot_for(&mut self, loc: u32) -> usize {
        assert!(
            loc <= self.address_size,
            "window ring location {loc} exceeds address size {}",
            self.address_size
        );

        if self.in_window(loc) {
            let distance = pmod(self.address_head as i64 - loc as i64, self.address_size as i64);
            pmod(self.window_head as i64 - distance, self.window_size as i64) as usize
        } else {
            let move_by = pmod(loc as i64 - self.address_head as i64, self.address_size as i64);
            self.address_head = loc;

            let mut index = self.window_head;
            for _ in 0..move_by.min(self.window_size as i64) {
                self.window_head = (self.window_head + 1) % self.window_size as usize;
                self.ring[self.window_head] = self.default_val;
                index = self.window_head;
            }
            index
        }
    }

    /// The value stored for the address space location `loc`, if that
    /// location is covered by the current window.
    pub fn read(&self, loc: u32) -> Option<u8> {
        let distance = pmod(self.address_head as i64 - loc as i64, self.address_size as i64);
        if distance < self.window_size as i64 {
            let index = pmod(self.window_head as i64 - distance, self.window_size as i64) as usize;
            Some(self.ring[index])
        } else {
            None
        }
    }

    /// The number of slots holding exactly `val`.
    pub fn count_hits(&self, val: u8) -> usize {
        self.ring.iter().filter(|&&v| v == val).count()
    }

    /// The number of slots for which `test` holds.
    pub fn count_hits_with(&self, test: impl Fn(u8) -> bool) -> usize {
        self.ring.iter().filter(|&&v| test(v)).count()
    }
}

impl fmt::Display for WindowRing {
    /// Renders a 20 column density picture of the window: ` ` for an empty
    /// bucket, `|` for a fully written one, `.`/`!` for partially written
    /// buckets of zero and non-zero slots.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const WIDTH: usize = 20;
        let factor = (self.ring.len() as f64 - 0.5) / WIDTH as f64;
        let mut pic = String::with_capacity(WIDTH);
        for i in 0..WIDTH {
            let mut empty = true;
            let mut full = true;
            for n in (i as f64 * factor) as usize..((i + 1) as f64 * factor) as usize {
                if self.ring[n] > 0 {
                    empty = false;
                }
                if self.ring[n] == 0 {
                    full = false;
                }
            }
            pic.push(match (empty, full) {
                (true, true) => ' ',
                (true, false) => '.',
                (false, true) => '|',
                (false, false) => '!',
            });
        }
        f.write_fmt(format_args!(
            "<windowRing{{{}}}: head:{:04} ({})>",
            self.window_size, self.address_head, pic
        ))
    }
}
