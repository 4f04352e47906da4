//! Tunables named directly by spec §3/§9. Keep these in one place so the
//! Capturer and Encoder can never disagree about ring sizing or scratch
//! buffer capacity.

/// Capacity, in stereo S16 samples, of the shared-memory audio scratch
/// buffer that follows the header (spec §3, §4.7).
pub const MAX_SAMPLES: usize = 44_100;

/// Number of staging-texture slots in the GPU→CPU download ring (spec §3,
/// §4.6). `0 ≤ write_idx − read_idx ≤ VID_QUEUED_TEXTURES` must hold at
/// every observable point.
pub const VID_QUEUED_TEXTURES: u64 = 16;

/// The download-ring lag constant from spec §9: mapping is only permitted
/// once `write_idx − read_idx > VID_QUEUED_TEXTURES − DOWNLOAD_RING_LAG`.
/// Load-bearing — reducing it stalls the GPU pipeline, increasing it raises
/// latency. Kept as a named constant rather than an inline literal so a
/// future tuning pass has one place to change it.
pub const DOWNLOAD_RING_LAG: u64 = 2;

/// Keyed-mutex key owned by the Capturer (spec §3, §4.1).
pub const GAME_ID: u64 = 0;

/// Keyed-mutex key owned by the Encoder (spec §3, §4.1).
pub const ENCODER_ID: u64 = 1;

/// Standard small epsilon used by the motion-sampling accumulator (spec
/// §4.3) to avoid emitting a zero-weighted trailing partial sub-frame.
pub const MOSAMPLE_EPSILON: f32 = f32::EPSILON * 8.0;
