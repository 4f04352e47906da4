//! The Capturer half of the pipeline: runs inside the host game, drives the
//! motion-sampling accumulator (C3) and velocity overlay (C4), and hands
//! finished frames and audio to the Encoder over the shared-memory RPC
//! (C1/C2). The `extern "C"` functions in this file are spec §6's
//! "Capturer → host game" interface; everything else is internal.

pub mod context;
pub mod logging;
pub mod mosample;
pub mod velocity_overlay;

use std::ffi::{c_char, CStr};
use std::sync::{Mutex, OnceLock};

use svr_shared::ipc::EventType;
use svr_shared::profile::{self, MovieProfile};

use context::{CapturerContext, MovieContext};

/// The single process-wide Capturer context. An `extern "C"` boundary has
/// no natural place to carry `&mut self`, so one process-lifetime instance
/// is unavoidable here; everything it owns is the explicit context from
/// [`context::CapturerContext`] rather than untyped file-scope pointers.
static CONTEXT: OnceLock<Mutex<Option<CapturerContext>>> = OnceLock::new();

fn context() -> &'static Mutex<Option<CapturerContext>> {
    CONTEXT.get_or_init(|| Mutex::new(None))
}

unsafe fn c_str_to_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// `init(svr_path, graphics_device)` (spec §6, §4.1): "creates Encoder
/// process and shared memory; returns success." On non-Windows this always
/// fails, as the whole pipeline is Windows-only (D3D11, WASAPI-equivalent
/// capture path).
#[cfg(windows)]
#[no_mangle]
pub extern "C" fn svr_init(svr_path: *const c_char) -> bool {
    use svr_shared::ipc::SharedRegion;
    use svr_shared::wake_event::WakeEvent;

    let svr_path = unsafe { c_str_to_string(svr_path) };
    logging::set_log_path(&svr_path);

    let Ok((device, device_context)) = context::create_device() else {
        logging::log_line("D3D11CreateDevice failed");
        return false;
    };
    let Ok(region) = SharedRegion::create(true) else {
        logging::log_line("failed to create the shared-memory mapping");
        return false;
    };
    let Ok(encoder_wake) = WakeEvent::create(true) else {
        logging::log_line("failed to create the encoder wake event");
        return false;
    };
    let Ok(game_wake) = WakeEvent::create(true) else {
        logging::log_line("failed to create the game wake event");
        return false;
    };
    let encoder_process = match context::spawn_encoder_process(&svr_path, region.mapping_handle()) {
        Ok(h) => h,
        Err(e) => {
            logging::log_line(&format!("failed to spawn the Encoder process: {e}"));
            return false;
        }
    };
    logging::log_line("Encoder process spawned");

    {
        let header = region.header_mut();
        header.game_wake_handle = game_wake.raw() as u32;
        header.encoder_wake_handle = encoder_wake.raw() as u32;
    }

    let mut guard = context().lock().unwrap();
    *guard = Some(CapturerContext {
        device,
        device_context,
        encoder_process,
        region,
        encoder_wake,
        game_wake,
        movie: None,
    });
    true
}

#[cfg(not(windows))]
#[no_mangle]
pub extern "C" fn svr_init(_svr_path: *const c_char) -> bool {
    false
}

/// `start(movie_name, profile_name, game_texture_view)` (spec §6): opens
/// the named profile, validates it, creates the shared texture, and sends
/// `START`.
#[no_mangle]
pub extern "C" fn svr_start(
    _movie_name: *const c_char,
    profile_text: *const c_char,
    width: u32,
    height: u32,
) -> bool {
    let profile_text = unsafe { c_str_to_string(profile_text) };
    let parsed: MovieProfile = profile::parse(&profile_text);
    if parsed.validate(width, height).is_err() {
        return false;
    }

    let mut guard = context().lock().unwrap();
    let Some(ctx) = guard.as_mut() else { return false };

    let accumulator = mosample::Accumulator::for_profile(&parsed.mosample);

    #[cfg(windows)]
    {
        use svr_shared::keyed_mutex::KeyedMutex;
        use windows::core::Interface;

        let Ok((texture, handle)) = context::create_shared_texture(&ctx.device, width, height) else {
            return false;
        };
        let Ok(keyed_mutex) = texture.cast::<windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex>() else {
            return false;
        };

        {
            let header = ctx.region.header_mut();
            header.game_texture_handle = handle;
            header.game_pid = std::process::id();
            header.movie_params.set_video_encoder(parsed.video_encoder.name());
            header.movie_params.width = width;
            header.movie_params.height = height;
            header.movie_params.fps = parsed.fps;
        }

        let movie = MovieContext {
            profile: parsed,
            game_texture_mutex: KeyedMutex::new(keyed_mutex),
            accumulator,
            velocity_font: None,
            pending_velocity: (0.0, 0.0, 0.0),
            frame_width: width,
            frame_height: height,
            active: std::sync::atomic::AtomicBool::new(false),
        };

        let ack = svr_shared::ipc::send_event(&ctx.region, EventType::Start, &ctx.encoder_wake, || {
            context::wait_for_ack_or_encoder_death(ctx.encoder_process, &ctx.game_wake)
        });
        let ok = ack.is_ok();
        match &ack {
            Ok(()) => {
                movie.active.store(true, std::sync::atomic::Ordering::SeqCst);
                logging::log_line(&format!("Started ({width}x{height} @{}fps)", movie.profile.fps));
            }
            Err(e) => logging::log_line(&format!("Start failed: {e}")),
        }
        ctx.movie = Some(movie);
        ok
    }

    #[cfg(not(windows))]
    {
        let _ = (accumulator, ctx, width, height);
        false
    }
}

/// `frame()` (spec §6, §4.10): per-sub-frame tick. Runs C3; on emit, runs
/// C4 if enabled, then sends `NEW_VIDEO`.
#[no_mangle]
pub extern "C" fn svr_frame() {
    let mut guard = context().lock().unwrap();
    let Some(ctx) = guard.as_mut() else { return };
    let Some(movie) = ctx.movie.as_mut() else { return };
    if !movie.is_active() {
        return;
    }

    let should_emit = match movie.accumulator.as_mut() {
        Some(acc) => !matches!(acc.tick(), mosample::Action::Skip),
        None => true,
    };
    if !should_emit {
        return;
    }

    #[cfg(windows)]
    {
        let result = svr_shared::ipc::send_event(&ctx.region, EventType::NewVideo, &ctx.encoder_wake, || {
            context::wait_for_ack_or_encoder_death(ctx.encoder_process, &ctx.game_wake)
        });
        if let Err(e) = result {
            logging::log_line(&format!("NEW_VIDEO failed, deactivating: {e}"));
            movie.deactivate();
        }
    }
}

/// `give_velocity(x, y, z)` (spec §6): sets the value read by the next
/// `frame()`'s velocity overlay, if enabled.
#[no_mangle]
pub extern "C" fn svr_give_velocity(x: f32, y: f32, z: f32) {
    let mut guard = context().lock().unwrap();
    if let Some(movie) = guard.as_mut().and_then(|c| c.movie.as_mut()) {
        movie.pending_velocity = (x, y, z);
    }
}

/// `give_audio(samples, n)` (spec §6): forwards a batch of interleaved S16
/// stereo samples to the Encoder, fragmenting into `MAX_SAMPLES`-sized RPC
/// events per spec §4.7.
#[no_mangle]
pub extern "C" fn svr_give_audio(samples: *const i16, n: u32) {
    if samples.is_null() || n == 0 {
        return;
    }
    let mut guard = context().lock().unwrap();
    let Some(ctx) = guard.as_mut() else { return };
    let Some(movie) = ctx.movie.as_mut() else { return };
    if !movie.is_active() {
        return;
    }

    let stereo_samples = unsafe { std::slice::from_raw_parts(samples, n as usize * 2) };
    let max = svr_shared::constants::MAX_SAMPLES;
    for chunk in stereo_samples.chunks(max * 2) {
        let scratch = ctx.region.audio_scratch();
        for (i, pair) in chunk.chunks_exact(2).enumerate() {
            scratch[i] = svr_shared::ipc::StereoS16 { left: pair[0], right: pair[1] };
        }
        ctx.region
            .header_mut()
            .waiting_audio_samples
            .store((chunk.len() / 2) as u32, std::sync::atomic::Ordering::SeqCst);

        #[cfg(windows)]
        {
            let result = svr_shared::ipc::send_event(&ctx.region, EventType::NewAudio, &ctx.encoder_wake, || {
                context::wait_for_ack_or_encoder_death(ctx.encoder_process, &ctx.game_wake)
            });
            if let Err(e) = result {
                logging::log_line(&format!("NEW_AUDIO failed, deactivating: {e}"));
                movie.deactivate();
                break;
            }
        }
    }
}

/// `stop()` (spec §6): sends `STOP`, tears down. A no-op if already stopped
/// (spec §8, testable property 7).
#[no_mangle]
pub extern "C" fn svr_stop() {
    let mut guard = context().lock().unwrap();
    let Some(ctx) = guard.as_mut() else { return };
    let Some(movie) = ctx.movie.as_ref() else { return };
    if !movie.is_active() {
        return;
    }

    #[cfg(windows)]
    {
        if let Err(e) = svr_shared::ipc::send_event(&ctx.region, EventType::Stop, &ctx.encoder_wake, || {
            context::wait_for_ack_or_encoder_death(ctx.encoder_process, &ctx.game_wake)
        }) {
            logging::log_line(&format!("STOP failed: {e}"));
        }
    }
    logging::log_line("Stopped");
    movie.deactivate();
    ctx.movie = None;
}

#[no_mangle]
pub extern "C" fn svr_is_velo_enabled() -> bool {
    context().lock().unwrap().as_ref().and_then(|c| c.movie.as_ref()).map(|m| m.profile.velocity.enabled).unwrap_or(false)
}

#[no_mangle]
pub extern "C" fn svr_is_audio_enabled() -> bool {
    context().lock().unwrap().as_ref().and_then(|c| c.movie.as_ref()).map(|m| m.profile.audio_enabled).unwrap_or(false)
}

/// `get_game_rate()` (spec §6): `fps * (mosample_enabled ? mosample_mult : 1)`.
#[no_mangle]
pub extern "C" fn svr_get_game_rate() -> u32 {
    context().lock().unwrap().as_ref().and_then(|c| c.movie.as_ref()).map(|m| m.profile.game_rate()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_without_active_movie_is_a_no_op() {
        svr_stop();
        svr_stop();
    }

    #[test]
    fn queries_default_to_false_and_zero_without_an_active_movie() {
        assert!(!svr_is_velo_enabled());
        assert!(!svr_is_audio_enabled());
        assert_eq!(svr_get_game_rate(), 0);
    }
}
