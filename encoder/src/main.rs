//! Encoder process entry point (spec §6: "One positional argument: the
//! integer handle value of the inherited shared-memory mapping"). Runs the
//! main RPC loop from spec §4.2/§4.8: waits on `{game_process_handle,
//! encoder_wake}`, dispatches on `event_type`, signals `game_wake` after
//! each event, and performs `STOP` cleanup if the game process dies first.

mod audio_resample;
mod codec_tables;
mod download_ring;
#[cfg(windows)]
mod ffmpeg_backend;
#[cfg(windows)]
mod gpu;
mod orchestrator;
mod pixel_convert;
mod state;

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use svr_shared::ipc::{dispatch_one, EventType, SharedRegion};

fn main() -> Result<()> {
    let handle_arg = std::env::args()
        .nth(1)
        .context("usage: svr-encoder <shared-memory-handle>")?;
    let handle_value: isize = handle_arg.parse().context("handle argument must be an integer")?;

    run(handle_value)
}

#[cfg(windows)]
fn run(handle_value: isize) -> Result<()> {
    use svr_shared::wake_event::{wait_any, WakeEvent};
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_SYNCHRONIZE};

    // SAFETY: `handle_value` was passed by the Capturer on the command line
    // as an inherited, already-open mapping handle (spec §4.1, §6).
    let region = unsafe { SharedRegion::open(handle_value) }?;
    let game_pid = region.header().game_pid;
    let game_process = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, false, game_pid) }
        .context("OpenProcess on the capturing game failed")?;

    // SAFETY: both handles were marked inheritable and opened by the
    // Capturer before it spawned this process (spec §4.1), and their
    // numeric values were stashed in the header for exactly this purpose.
    let encoder_wake = unsafe { WakeEvent::from_raw(region.header().encoder_wake_handle as isize) };
    let game_wake = unsafe { WakeEvent::from_raw(region.header().game_wake_handle as isize) };

    eprintln!("[encoder] started for game pid {game_pid}");

    let mut stopped_cleanly = false;
    let mut encoder_state = state::EncoderState::default();

    loop {
        let index = wait_any(&[game_process.0, encoder_wake.raw()])?;
        if index == 0 {
            // Game process died without a prior STOP (spec §4.2 Encoder
            // side: "On `game_process_handle` with no prior STOP, it
            // performs `STOP` cleanup then exits").
            eprintln!("[encoder] game process exited without STOP, cleaning up");
            if !stopped_cleanly {
                encoder_state.stop();
            }
            break;
        }

        let mut error_message = None;
        let kind = dispatch_one(&region, |kind| {
            encoder_state.handle(kind, &region).inspect_err(|e| error_message = Some(e.clone()))
        });
        if let Some(message) = error_message {
            eprintln!("[encoder] {kind:?} failed: {message}");
        }
        if kind == Some(EventType::Stop) {
            stopped_cleanly = true;
        }
        let _ = game_wake.signal();
        if kind == Some(EventType::Stop) {
            eprintln!("[encoder] stopped");
            break;
        }
    }

    Ok(())
}

#[cfg(not(windows))]
fn run(_handle_value: isize) -> Result<()> {
    anyhow::bail!("the Encoder is only supported on Windows")
}

#[cfg(test)]
mod tests {
    #[test]
    fn handle_argument_must_parse_as_an_integer() {
        assert!("not-a-handle".parse::<isize>().is_err());
        assert!("12345".parse::<isize>().is_ok());
    }
}
