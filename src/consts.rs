// Song header
pub(crate) const TEMPO_LENGTH: usize = 1;
pub(crate) const SONG_END: u8 = 0xff;

// Track block header
pub(crate) const BLOCK_HEADER_LENGTH: usize = 6;
pub(crate) const BLOCK_CHANNEL: usize = 0;
pub(crate) const BLOCK_LENGTH: usize = 1;
pub(crate) const BLOCK_DURATION_OFFSET: usize = 3;
pub(crate) const BLOCK_IMMEDIATE_PAUSE: usize = 5;

// Note array
pub(crate) const NOTE_REST: u8 = 0x54;
pub(crate) const IMMEDIATE_PAUSE_OFFSET: u8 = 0x55;
pub(crate) const INLINE_PAUSE_OFFSET: u8 = 0xaa;
pub(crate) const TRACK_END: u8 = 0xff;
#[cfg(feature = "std")]
pub(crate) const MAX_INLINE_PAUSE: u16 = (TRACK_END - INLINE_PAUSE_OFFSET) as u16;

// Duration array
pub(crate) const DURATION_REPEAT: u8 = 0x80;
pub(crate) const DURATION_TWO_BYTES: u8 = 0xc0;
#[cfg(feature = "std")]
pub(crate) const MAX_SHORT_DURATION: u16 = 0x80;
#[cfg(feature = "std")]
pub(crate) const MAX_DURATION: u16 = 0x4000;
#[cfg(feature = "std")]
pub(crate) const MAX_REPEAT: usize = 0x3f;

/// Flag carried in `Track::duration_total` when the current note is followed
/// by the block's immediate pause.
pub(crate) const IMMEDIATE_PAUSE_MASK: u16 = 0x8000;

/// Number of distinct pitches the byte-code can express (C2 to B8).
pub const PLAYABLE_NOTES: usize = NOTE_REST as usize;

/// One tempo unit, in microseconds.
pub const TICK_SLICE_US: u32 = 256;

/// Adjustment, in 256 µs slices, applied by the busy-wait pacer to account for
/// the time spent decoding notes on each tick.
pub const TEMPO_ADJUST: i16 = -1;

/// Scheduler ticks per beat.
pub const TICKS_PER_BEAT: u32 = 16;

/// Volume selector used by the shipped targets (0-3).
pub const DEFAULT_VOLUME: u8 = 2;

/// Number of volume selector bits above the channel bits in the output level.
pub(crate) const VOLUME_BITS: usize = 2;
