//! Modular sequence number arithmetic for OGMs.
//!
//! Sequence numbers live on a bounded ring and are only ever compared within
//! a freshness window, so ordering has to survive rollover at the ring limit.

use core::fmt;

/// Value at which sequence numbers roll over by default.
pub const SQN_ADDR_SIZE: u32 = 2048;
/// Default width of the window within which sequence numbers are ordered.
pub const LOCAL_WINDOW_SIZE: u32 = 64;

/// Non-negative (Python-style) integer modulo.
pub(crate) fn pmod(x: i64, y: i64) -> i64 {
    (x % y + y) % y
}

/// A sequence number on a bounded ring, together with the ring `limit` it
/// rolls over at and the `window` within which ordering is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqNum {
    num: u32,
    limit: u32,
    window: u32,
}

impl SeqNum {
    /// Create a new `SeqNum` on a ring of size `limit` with the given
    /// comparison `window`.
    ///
    /// # Panics
    ///
    /// Panics if `num` is not below `limit`, or if `window` exceeds `limit`.
    /// Both indicate a bug in the caller.
    pub fn new(num: u32, limit: u32, window: u32) -> Self {
        assert!(
            num < limit,
            "sequence number {num} outside address range {limit}"
        );
        assert!(
            window <= limit,
            "sequence window {window} larger than address range {limit}"
        );
        SeqNum { num, limit, window }
    }

    /// Create a new `SeqNum` with the default ring and window parameters.
    pub fn with_defaults(num: u32) -> Self {
        Self::new(num, SQN_ADDR_SIZE, LOCAL_WINDOW_SIZE)
    }

    /// The zero value used by trackers before any sequence number was
    /// observed. Any in-range sequence number orders above it on first
    /// comparison by the out-of-window rule of [`greater_than`](Self::greater_than).
    pub const fn zero() -> Self {
        SeqNum {
            num: 0,
            limit: 0,
            window: 0,
        }
    }

    /// Convert a raw wire value into a `SeqNum` with default parameters.
    ///
    /// Only the low bits of the wire field are meaningful; the value is
    /// reduced modulo the ring limit so that no datagram can produce an
    /// out-of-range sequence number.
    pub fn from_wire(raw: u32) -> Self {
        Self::with_defaults(raw % SQN_ADDR_SIZE)
    }

    /// The raw wire representation of this `SeqNum`.
    pub fn to_wire(self) -> u32 {
        self.num
    }

    /// The position of this `SeqNum` on its ring.
    pub fn num(&self) -> u32 {
        self.num
    }

    /// Advance this `SeqNum` one step along its ring.
    pub fn increment(&mut self) {
        self.num = pmod(self.num as i64 + 1, self.limit as i64) as u32;
    }

    /// Ring addition. The `limit` and `window` of the result are taken from
    /// `self`, not from `other`.
    pub fn add(self, other: SeqNum) -> SeqNum {
        SeqNum {
            num: pmod(self.num as i64 + other.num as i64, self.limit as i64) as u32,
            ..self
        }
    }

    /// Ring subtraction. The `limit` and `window` of the result are taken
    /// from `self`, not from `other`.
    pub fn subtract(self, other: SeqNum) -> SeqNum {
        SeqNum {
            num: pmod(self.num as i64 - other.num as i64, self.limit as i64) as u32,
            ..self
        }
    }

    /// Whether two sequence numbers occupy the same ring position. Ring
    /// parameters are ignored.
    pub fn equal(&self, other: &SeqNum) -> bool {
        self.num == other.num
    }

    /// Windowed ordering over the ring, using the `limit` and `window` of
    /// `self`.
    ///
    /// When the two values are within one window of each other (in either
    /// direction around the ring), `self` is greater exactly when it is
    /// reached from `other` in fewer than `window` forward steps. When they
    /// are further apart than one window the result defaults to true, so
    /// `a.greater_than(b)` and `b.greater_than(a)` can hold simultaneously.
    /// Callers must only rely on the ordering within expected freshness
    /// ranges; [`less_than`](Self::less_than) explicitly excludes the
    /// default-true case.
    pub fn greater_than(&self, other: &SeqNum) -> bool {
        let limit = self.limit as i64;
        let window = self.window as i64;
        let dif = (self.num as i64 - other.num as i64).min(self.num as i64 - other.num as i64 - limit);
        if pmod(dif.abs(), limit) < window {
            0 < pmod(dif, limit) && pmod(dif, limit) < window
        } else {
            true
        }
    }

    /// Strict windowed "less than": never true in the out-of-window region
    /// where [`greater_than`](Self::greater_than) defaults to true.
    pub fn less_than(&self, other: &SeqNum) -> bool {
        !self.greater_than(other) && !self.equal(other)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.limit != 0 && self.window != 0 {
            f.write_fmt(format_args!("{:4}", self.num))
        } else {
            f.write_str("none")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SeqNum;

    #[test]
    #[should_panic(expected = "outside address range")]
    fn construct_num_at_limit() {
        SeqNum::new(512, 512, 32);
    }

    #[test]
    #[should_panic(expected = "larger than address range")]
    fn construct_window_over_limit() {
        SeqNum::new(42, 64, 128);
    }

    #[test]
    fn add_rolls_over() {
        let out = SeqNum::new(9, 10, 3).add(SeqNum::new(2, 10, 3));
        assert!(out.equal(&SeqNum::new(1, 10, 3)));
    }

    #[test]
    fn add_keeps_left_parameters() {
        let out = SeqNum::new(1, 2048, 64).add(SeqNum::new(100, 128, 32));
        assert_eq!(out, SeqNum::new(101, 2048, 64));
    }

    #[test]
    fn subtract_rolls_over() {
        let out = SeqNum::new(0, 2048, 64).subtract(SeqNum::new(1, 2048, 64));
        assert_eq!(out, SeqNum::new(2047, 2048, 64));
    }

    #[test]
    fn subtract_keeps_left_parameters() {
        let out = SeqNum::new(99, 2048, 64).subtract(SeqNum::new(60, 64, 32));
        assert_eq!(out, SeqNum::new(39, 2048, 64));
    }

    #[test]
    fn equal_compares_ring_position() {
        assert!(SeqNum::with_defaults(212).equal(&SeqNum::with_defaults(212)));
        assert!(!SeqNum::with_defaults(100).equal(&SeqNum::with_defaults(90)));
        assert!(!SeqNum::with_defaults(50).equal(&SeqNum::with_defaults(60)));
        assert!(!SeqNum::with_defaults(1000).equal(&SeqNum::with_defaults(2000)));
    }

    #[test]
    fn greater_than_within_window() {
        assert!(!SeqNum::with_defaults(212).greater_than(&SeqNum::with_defaults(212)));
        assert!(!SeqNum::with_defaults(212).greater_than(&SeqNum::with_defaults(213)));
        assert!(SeqNum::with_defaults(212).greater_than(&SeqNum::with_defaults(211)));
        assert!(SeqNum::with_defaults(100).greater_than(&SeqNum::with_defaults(90)));
        assert!(!SeqNum::with_defaults(5).greater_than(&SeqNum::with_defaults(10)));
    }

    #[test]
    fn greater_than_defaults_true_outside_window() {
        assert!(SeqNum::with_defaults(1000).greater_than(&SeqNum::with_defaults(90)));
        // Both orderings hold when the values are more than one window apart.
        assert!(SeqNum::with_defaults(1000).greater_than(&SeqNum::with_defaults(1100)));
        assert!(SeqNum::with_defaults(1100).greater_than(&SeqNum::with_defaults(1000)));
    }

    #[test]
    fn greater_than_across_rollover() {
        assert!(SeqNum::with_defaults(1).greater_than(&SeqNum::with_defaults(2046)));
        assert!(!SeqNum::with_defaults(2047).greater_than(&SeqNum::with_defaults(0)));
    }

    #[test]
    fn greater_than_with_window_equal_to_limit() {
        // With window == limit every distinct pair is within one window in
        // both directions, so both orderings always hold.
        assert!(SeqNum::new(20, 32, 32).greater_than(&SeqNum::new(10, 32, 32)));
        assert!(SeqNum::new(10, 32, 32).greater_than(&SeqNum::new(30, 32, 32)));
        assert!(SeqNum::new(1, 32, 32).greater_than(&SeqNum::new(31, 32, 32)));
        assert!(SeqNum::new(31, 32, 32).greater_than(&SeqNum::new(1, 32, 32)));
    }

    #[test]
    fn less_than_is_strict() {
        assert!(!SeqNum::with_defaults(212).less_than(&SeqNum::with_defaults(212)));
        assert!(!SeqNum::with_defaults(100).less_than(&SeqNum::with_defaults(90)));
        assert!(SeqNum::with_defaults(2000).less_than(&SeqNum::with_defaults(2040)));
        assert!(SeqNum::with_defaults(212).less_than(&SeqNum::with_defaults(213)));
        assert!(!SeqNum::with_defaults(212).less_than(&SeqNum::with_defaults(211)));
        // Never true in the out-of-window default region.
        assert!(!SeqNum::with_defaults(1000).less_than(&SeqNum::with_defaults(2000)));
    }

    #[test]
    fn less_than_across_rollover() {
        assert!(SeqNum::with_defaults(2040).less_than(&SeqNum::with_defaults(2)));
        assert!(!SeqNum::with_defaults(2).less_than(&SeqNum::with_defaults(2040)));
    }

    #[test]
    fn trichotomy_within_window() {
        for (a, b) in [(100u32, 130u32), (130, 100), (7, 7), (2040, 10), (10, 2040)] {
            let a = SeqNum::with_defaults(a);
            let b = SeqNum::with_defaults(b);
            let outcomes = [a.less_than(&b), a.equal(&b), a.greater_than(&b)];
            assert_eq!(
                outcomes.iter().filter(|&&o| o).count(),
                1,
                "expected exactly one ordering for {a} and {b}"
            );
        }
    }

    #[test]
    fn increment_rolls_over() {
        let mut sqn = SeqNum::with_defaults(2047);
        sqn.increment();
        assert_eq!(sqn.num(), 0);
    }

    #[test]
    fn wire_reduction() {
        assert_eq!(SeqNum::from_wire(42).num(), 42);
        assert_eq!(SeqNum::from_wire(2048).num(), 0);
        assert_eq!(SeqNum::from_wire(u32::MAX).num(), u32::MAX % 2048);
    }

    #[test]
    fn zero_is_replaceable() {
        assert!(SeqNum::with_defaults(5).greater_than(&SeqNum::zero()));
        assert!(SeqNum::with_defaults(1000).greater_than(&SeqNum::zero()));
        // A value within one window below the rollover point reads as older
        // than the zero value; the tracker then simply waits out the wrap.
        assert!(SeqNum::with_defaults(2000).less_than(&SeqNum::zero()));
    }

    #[test]
    fn display() {
        assert_eq!(SeqNum::with_defaults(42).to_string(), "  42");
        assert_eq!(SeqNum::zero().to_string(), "none");
    }
}
