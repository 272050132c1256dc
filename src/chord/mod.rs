pub mod routing;
pub mod tasks;
pub mod types;
pub mod workers;

// Chord configuration
/// Number of bits in a ring identifier (m).
pub const RING_BITS: u32 = 6;
/// Size of the identifier space, 2^m.
pub const RING_SIZE: u64 = 1 << RING_BITS;
/// One finger per identifier bit; finger 0 is the successor.
pub const FINGER_TABLE_SIZE: usize = RING_BITS as usize;

pub const STABILIZE_INTERVAL_MS: u64 = 1_000;
pub const FIX_FINGERS_INTERVAL_MS: u64 = 1_000;
pub const CHECK_PREDECESSOR_INTERVAL_MS: u64 = 2_000;
