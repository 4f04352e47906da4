//! Scoped keyed-mutex guard for the shared BGRA texture (spec §3, §4.1, §9).
//!
//! The driver-level keyed mutex rendezvous on two named keys: `GAME_ID` is
//! the Capturer's key, `ENCODER_ID` is the Encoder's. Ownership alternates —
//! whoever acquires with one key must release with the *other* key, and an
//! attempt to acquire with a key the current holder did not release with is
//! an error (spec §3 invariants). We encode "which side I am" as a
//! zero-sized marker type so the acquire/release key pair is fixed at
//! compile time and can never be swapped by accident.

use crate::constants::{ENCODER_ID, GAME_ID};

/// Which process a [`KeyedMutex`] handle belongs to. Determines the key used
/// to acquire and the (opposite) key used to release.
pub trait KeySide {
    const ACQUIRE_KEY: u64;
    const RELEASE_KEY: u64;
    const NAME: &'static str;
}

/// The Capturer's side of the shared texture: acquires with `GAME_ID`,
/// releases with `ENCODER_ID`.
pub struct GameSide;
impl KeySide for GameSide {
    const ACQUIRE_KEY: u64 = GAME_ID;
    const RELEASE_KEY: u64 = ENCODER_ID;
    const NAME: &'static str = "game";
}

/// The Encoder's side of the shared texture: acquires with `ENCODER_ID`,
/// releases with `GAME_ID`.
pub struct EncoderSide;
impl KeySide for EncoderSide {
    const ACQUIRE_KEY: u64 = ENCODER_ID;
    const RELEASE_KEY: u64 = GAME_ID;
    const NAME: &'static str = "encoder";
}

/// Error returned when a keyed-mutex acquire/release fails or times out.
#[derive(Debug, thiserror::Error)]
pub enum KeyedMutexError {
    #[error("{side} failed to acquire keyed mutex (key={key}): {detail}")]
    AcquireFailed { side: &'static str, key: u64, detail: String },
    #[error("{side} failed to release keyed mutex (key={key}): {detail}")]
    ReleaseFailed { side: &'static str, key: u64, detail: String },
}

// ── Windows implementation ──────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex;

    use super::{KeySide, KeyedMutexError};

    /// Wraps an `IDXGIKeyedMutex` on the shared BGRA texture.
    pub struct KeyedMutex<S: KeySide> {
        inner: IDXGIKeyedMutex,
        _side: std::marker::PhantomData<S>,
    }

    impl<S: KeySide> KeyedMutex<S> {
        pub fn new(inner: IDXGIKeyedMutex) -> Self {
            Self { inner, _side: std::marker::PhantomData }
        }

        /// Blocks until the texture can be acquired with this side's key,
        /// then returns a guard that releases with the opposite key on drop.
        pub fn acquire(&self, timeout_ms: u32) -> Result<KeyedMutexGuard<'_, S>, KeyedMutexError> {
            unsafe { self.inner.AcquireSync(S::ACQUIRE_KEY, timeout_ms) }.map_err(|e| {
                KeyedMutexError::AcquireFailed {
                    side: S::NAME,
                    key: S::ACQUIRE_KEY,
                    detail: e.message(),
                }
            })?;
            Ok(KeyedMutexGuard { mutex: self })
        }
    }

    /// RAII guard: releases with `S::RELEASE_KEY` on drop, matching spec §3's
    /// "ownership alternates" invariant.
    pub struct KeyedMutexGuard<'a, S: KeySide> {
        mutex: &'a KeyedMutex<S>,
    }

    impl<'a, S: KeySide> Drop for KeyedMutexGuard<'a, S> {
        fn drop(&mut self) {
            if let Err(e) = unsafe { self.mutex.inner.ReleaseSync(S::RELEASE_KEY) } {
                eprintln!(
                    "[keyed_mutex] {} failed to release with key {}: {}",
                    S::NAME,
                    S::RELEASE_KEY,
                    e.message()
                );
            }
        }
    }
}

#[cfg(windows)]
pub use imp::{KeyedMutex, KeyedMutexGuard};

// ── Non-Windows stub ────────────────────────────────────────────────────────

#[cfg(not(windows))]
mod imp {
    use std::marker::PhantomData;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::{KeySide, KeyedMutexError};

    const UNLOCKED: u64 = u64::MAX;

    /// Shared holder-key cell. Both a [`KeyedMutex<GameSide>`] and a
    /// [`KeyedMutex<EncoderSide>`] built from [`KeyedMutex::new_for_test`]
    /// with the same cell refer to the same underlying "texture lock", the
    /// way the two processes' NT-handle-opened views of the real keyed
    /// mutex do.
    pub struct Cell(AtomicU64);

    /// Non-Windows stand-in that models the same acquire/release key
    /// alternation in-process so unit tests can exercise the invariant
    /// without a real DXGI device.
    pub struct KeyedMutex<S: KeySide> {
        cell: Arc<Cell>,
        _side: PhantomData<S>,
    }

    impl<S: KeySide> KeyedMutex<S> {
        /// Creates a fresh cell initially held by `initial_holder_key`.
        pub fn new_for_test(initial_holder_key: u64) -> Self {
            Self { cell: Arc::new(Cell(AtomicU64::new(initial_holder_key))), _side: PhantomData }
        }

        /// Builds another typed handle onto the same underlying cell, as if
        /// opening the same shared texture from the other process.
        pub fn other_side<T: KeySide>(&self) -> KeyedMutex<T> {
            KeyedMutex { cell: Arc::clone(&self.cell), _side: PhantomData }
        }

        pub fn acquire(&self, _timeout_ms: u32) -> Result<KeyedMutexGuard<'_, S>, KeyedMutexError> {
            let prev = self.cell.0.swap(UNLOCKED, Ordering::SeqCst);
            if prev != S::ACQUIRE_KEY {
                self.cell.0.store(prev, Ordering::SeqCst);
                return Err(KeyedMutexError::AcquireFailed {
                    side: S::NAME,
                    key: S::ACQUIRE_KEY,
                    detail: format!("current holder key is {prev}, not {}", S::ACQUIRE_KEY),
                });
            }
            Ok(KeyedMutexGuard { mutex: self })
        }
    }

    pub struct KeyedMutexGuard<'a, S: KeySide> {
        mutex: &'a KeyedMutex<S>,
    }

    impl<'a, S: KeySide> Drop for KeyedMutexGuard<'a, S> {
        fn drop(&mut self) {
            self.mutex.cell.0.store(S::RELEASE_KEY, Ordering::SeqCst);
        }
    }
}

#[cfg(not(windows))]
pub use imp::{KeyedMutex, KeyedMutexGuard};

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
    use super::*;

    #[test]
    fn game_side_acquires_when_held_by_game_key() {
        let m: KeyedMutex<GameSide> = KeyedMutex::new_for_test(GAME_ID);
        assert!(m.acquire(0).is_ok());
    }

    #[test]
    fn game_side_rejects_acquire_when_held_by_encoder_key() {
        let m: KeyedMutex<GameSide> = KeyedMutex::new_for_test(ENCODER_ID);
        assert!(m.acquire(0).is_err());
    }

    #[test]
    fn releasing_hands_ownership_to_the_opposite_side() {
        let m: KeyedMutex<GameSide> = KeyedMutex::new_for_test(GAME_ID);
        let e: KeyedMutex<EncoderSide> = m.other_side();
        {
            let _guard = m.acquire(0).unwrap();
            // Texture is "locked" (neither side holds a usable key) while guard is alive.
            assert!(e.acquire(0).is_err());
        }
        // After the guard drops, the encoder-side key unlocks it.
        assert!(e.acquire(0).is_ok());
    }

    #[test]
    fn alternation_round_trips_game_then_encoder_then_game() {
        let m: KeyedMutex<GameSide> = KeyedMutex::new_for_test(GAME_ID);
        let e: KeyedMutex<EncoderSide> = m.other_side();
        drop(m.acquire(0).unwrap());
        drop(e.acquire(0).unwrap());
        assert!(m.acquire(0).is_ok());
    }
}
