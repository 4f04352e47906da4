//! Auto-reset wake events (spec §3 `game_wake_event`/`encoder_wake_event`,
//! §4.1). On Windows these are real named-less `CreateEventW` handles marked
//! inheritable across `CreateProcess`, matching spec §9's requirement that
//! "the inheritance-across-`CreateProcess` pattern must be preserved
//! bit-exactly". On other platforms a condvar-backed stand-in keeps the
//! crate testable without a Windows host.

use anyhow::Result;

// ── Windows implementation ──────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{Context, Result};
    use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
    use windows::Win32::Security::SECURITY_ATTRIBUTES;
    use windows::Win32::System::Threading::{
        CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, WaitForSingleObject,
        INFINITE,
    };

    /// An auto-reset event, optionally marked inheritable so a spawned child
    /// process (the Encoder) receives a usable duplicate of the handle.
    pub struct WakeEvent(HANDLE);

    unsafe impl Send for WakeEvent {}
    unsafe impl Sync for WakeEvent {}

    impl WakeEvent {
        /// Creates a new auto-reset, initially-unsignaled event.
        pub fn create(inheritable: bool) -> Result<Self> {
            let mut sa = SECURITY_ATTRIBUTES {
                nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                lpSecurityDescriptor: std::ptr::null_mut(),
                bInheritHandle: inheritable.into(),
            };
            let handle = unsafe {
                CreateEventW(
                    Some(&mut sa as *mut _),
                    false, // bManualReset = false → auto-reset
                    false, // bInitialState = false → unsignaled
                    None,
                )
            }
            .context("CreateEventW failed")?;
            Ok(Self(handle))
        }

        /// Wraps an already-open (e.g. inherited) event handle.
        ///
        /// # Safety
        /// `raw` must be a valid, open event handle owned by the caller.
        pub unsafe fn from_raw(raw: isize) -> Self {
            Self(HANDLE(raw))
        }

        /// The numeric handle value, suitable for passing on a command line
        /// the way spec §6 describes for the shared-memory mapping handle.
        pub fn raw(&self) -> isize {
            self.0 .0
        }

        pub fn signal(&self) -> Result<()> {
            unsafe { SetEvent(self.0) }.context("SetEvent failed")
        }

        /// Explicit reset, used only by the non-Windows stand-in's API
        /// surface for symmetry; Windows auto-reset events never need this
        /// on the hot path since a successful wait resets them.
        pub fn reset(&self) -> Result<()> {
            unsafe { ResetEvent(self.0) }.context("ResetEvent failed")
        }

        /// Blocks until signaled (auto-resetting on return).
        pub fn wait(&self) -> Result<()> {
            let r = unsafe { WaitForSingleObject(self.0, INFINITE) };
            if r != WAIT_OBJECT_0 {
                anyhow::bail!("WaitForSingleObject returned {:?}", r);
            }
            Ok(())
        }
    }

    impl Drop for WakeEvent {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }

    /// Blocks on several waitable handles (events or process handles) at
    /// once, returning the index of the one that fired first. This is the
    /// primitive spec §4.2 needs for `send_event` (`{encoder_process_handle,
    /// game_wake}`) and the Encoder main loop (`{game_process_handle,
    /// encoder_wake}`) — a single native wait across an event and a process
    /// handle, which is why spec §9 insists this cannot be modeled with
    /// cooperative/async tasks.
    pub fn wait_any(handles: &[isize]) -> Result<usize> {
        let raw: Vec<HANDLE> = handles.iter().map(|&h| HANDLE(h)).collect();
        let r = unsafe { WaitForMultipleObjects(&raw, false, INFINITE) };
        let index = r.0.wrapping_sub(WAIT_OBJECT_0.0) as usize;
        if index >= handles.len() {
            anyhow::bail!("WaitForMultipleObjects returned {:?}", r);
        }
        Ok(index)
    }
}

#[cfg(windows)]
pub use imp::{wait_any, WakeEvent};

// ── Non-Windows stand-in ─────────────────────────────────────────────────────

#[cfg(not(windows))]
mod imp {
    use anyhow::Result;
    use std::sync::{Condvar, Mutex};

    /// Condvar-backed auto-reset event for tests and non-Windows builds.
    /// Does not support cross-process use (there is no process to inherit
    /// the handle into on this platform); `raw`/`from_raw` are omitted.
    pub struct WakeEvent {
        signaled: Mutex<bool>,
        condvar: Condvar,
    }

    impl WakeEvent {
        pub fn create(_inheritable: bool) -> Result<Self> {
            Ok(Self { signaled: Mutex::new(false), condvar: Condvar::new() })
        }

        pub fn signal(&self) -> Result<()> {
            let mut s = self.signaled.lock().unwrap();
            *s = true;
            self.condvar.notify_one();
            Ok(())
        }

        pub fn reset(&self) -> Result<()> {
            *self.signaled.lock().unwrap() = false;
            Ok(())
        }

        pub fn wait(&self) -> Result<()> {
            let mut s = self.signaled.lock().unwrap();
            while !*s {
                s = self.condvar.wait(s).unwrap();
            }
            *s = false;
            Ok(())
        }
    }

    /// No cross-process waitable set on non-Windows; callers on this
    /// platform only ever wait on a single in-process [`WakeEvent`].
    pub fn wait_any(_handles: &[isize]) -> Result<usize> {
        anyhow::bail!("wait_any requires Windows wait primitives")
    }
}

#[cfg(not(windows))]
pub use imp::{wait_any, WakeEvent};

/// Convenience used by both platforms' higher layers when they just need a
/// fresh non-inheritable event (e.g. for tests).
pub fn new_local_event() -> Result<WakeEvent> {
    WakeEvent::create(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_then_wait_returns_immediately() {
        let e = new_local_event().unwrap();
        e.signal().unwrap();
        e.wait().unwrap();
    }

    #[test]
    fn wait_blocks_until_signaled_from_another_thread() {
        use std::sync::Arc;
        let e = Arc::new(new_local_event().unwrap());
        let e2 = Arc::clone(&e);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            e2.signal().unwrap();
        });
        e.wait().unwrap();
        handle.join().unwrap();
    }
}
