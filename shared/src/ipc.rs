//! The shared-memory header layout and the `send_event` RPC contract
//! (spec §3, §4.1, §4.2). Both the Capturer and the Encoder link this module
//! directly so the two sides can never disagree about field offsets —
//! spec §6 is explicit that "layout is private to this process pair — no
//! cross-version compatibility guarantees", which is exactly the property a
//! single shared `repr(C)` definition gives us for free.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::constants::MAX_SAMPLES;
use crate::error::RpcError;
use crate::wake_event::WakeEvent;

/// Fixed-capacity byte buffer used for the handful of string-ish fields
/// that live in the shared header (paths, codec names). Avoids pointers
/// into a region that may be mapped at different addresses in each process.
fn write_fixed(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
}

fn read_fixed(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Event tags written by the Capturer into the shared header (spec §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventType {
    None = 0,
    Start = 1,
    Stop = 2,
    NewVideo = 3,
    NewAudio = 4,
}

impl EventType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Start),
            2 => Some(Self::Stop),
            3 => Some(Self::NewVideo),
            4 => Some(Self::NewAudio),
            _ => None,
        }
    }
}

/// `movie_params`, set once by the Capturer at `START` and never again for
/// the duration of the movie (spec §3).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct MovieParams {
    pub dest_path: [u8; 260],
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_encoder: [u8; 32],
    pub audio_encoder: [u8; 32],
    pub x264_preset: [u8; 16],
    pub x264_crf: u32,
    pub x264_intra: u32,
    pub dnxhr_profile: [u8; 16],
    pub audio_channels: u32,
    pub audio_hz: u32,
    pub audio_bits: u32,
    pub use_audio: u32,
}

impl MovieParams {
    pub fn zeroed() -> Self {
        // SAFETY: all-zero is a valid bit pattern for every field (plain
        // integers and fixed byte arrays).
        unsafe { std::mem::zeroed() }
    }

    pub fn dest_path(&self) -> String {
        read_fixed(&self.dest_path)
    }

    pub fn set_dest_path(&mut self, s: &str) {
        write_fixed(&mut self.dest_path, s);
    }

    pub fn video_encoder(&self) -> String {
        read_fixed(&self.video_encoder)
    }

    pub fn set_video_encoder(&mut self, s: &str) {
        write_fixed(&mut self.video_encoder, s);
    }

    pub fn audio_encoder(&self) -> String {
        read_fixed(&self.audio_encoder)
    }

    pub fn set_audio_encoder(&mut self, s: &str) {
        write_fixed(&mut self.audio_encoder, s);
    }

    pub fn x264_preset(&self) -> String {
        read_fixed(&self.x264_preset)
    }

    pub fn set_x264_preset(&mut self, s: &str) {
        write_fixed(&mut self.x264_preset, s);
    }

    pub fn dnxhr_profile(&self) -> String {
        read_fixed(&self.dnxhr_profile)
    }

    pub fn set_dnxhr_profile(&mut self, s: &str) {
        write_fixed(&mut self.dnxhr_profile, s);
    }
}

/// One interleaved stereo S16 audio sample (spec §3 audio scratch buffer).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct StereoS16 {
    pub left: i16,
    pub right: i16,
}

/// The fixed part of the shared-memory region (spec §3). The audio scratch
/// buffer of `MAX_SAMPLES` [`StereoS16`] follows immediately after this
/// struct in the mapping; `audio_buffer_offset` records that as a byte
/// offset so both sides compute the same pointer regardless of struct
/// padding differences between compilers (there are none here, since both
/// sides build from this same definition, but the field is part of the
/// wire contract per spec §3 and is kept for that reason).
#[repr(C)]
pub struct Header {
    pub movie_params: MovieParams,
    pub game_texture_handle: u32,
    pub audio_buffer_offset: u64,
    pub waiting_audio_samples: AtomicU32,
    pub game_pid: u32,
    /// Numeric values of the two inherited wake-event handles (spec §3).
    /// Stored here rather than passed on the command line because, unlike
    /// the mapping itself, they're created after the Encoder is already
    /// spawned and inheriting (spec §4.1: "Two auto-reset wake events are
    /// created likewise"); the Encoder reads them out of the header once,
    /// right after mapping the region, before entering its main loop.
    pub game_wake_handle: u32,
    pub encoder_wake_handle: u32,
    pub event_type: AtomicU32,
    pub error: AtomicU32,
    pub error_message: [u8; 512],
    /// Encoder-side bookkeeping for the download ring (spec §3, §4.6),
    /// placed here rather than recomputed independently so a future
    /// diagnostics dump of the region can observe it.
    pub ring_write_idx: AtomicU64,
    pub ring_read_idx: AtomicU64,
}

impl Header {
    /// Total mapping size required for one region: the header plus the
    /// fixed-capacity audio scratch buffer (spec §3, §4.1).
    pub const fn region_size() -> usize {
        std::mem::size_of::<Header>() + MAX_SAMPLES * std::mem::size_of::<StereoS16>()
    }

    /// Offset of the audio scratch buffer from the region base.
    pub const fn audio_offset() -> u64 {
        std::mem::size_of::<Header>() as u64
    }

    pub fn error_message(&self) -> String {
        read_fixed(&self.error_message)
    }

    pub fn set_error(&mut self, message: &str) {
        self.error.store(1, Ordering::SeqCst);
        write_fixed(&mut self.error_message, message);
    }

    pub fn clear_error(&mut self) {
        self.error.store(0, Ordering::SeqCst);
        self.error_message.fill(0);
    }
}

/// An open shared-memory mapping, owned by whichever side created or opened
/// it. On Windows this is a real `CreateFileMappingW`/`MapViewOfFile`
/// region; elsewhere a heap allocation stands in so the RPC state machine
/// and its tests run on any host (spec §9: "Shared memory and process
/// handles should be wrapped in scoped ownership types").
pub struct SharedRegion {
    base: *mut u8,
    #[cfg(windows)]
    mapping: windows::Win32::Foundation::HANDLE,
    #[cfg(not(windows))]
    _storage: Box<[u8]>,
}

unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Creates a fresh, zeroed region sized for one movie's worth of shared
    /// state (spec §4.1: "Creates one page-aligned mapping sized
    /// `sizeof(header) + MAX_SAMPLES · sizeof(stereo_s16)`"). Marked
    /// inheritable on Windows so the spawned Encoder process receives it.
    #[cfg(windows)]
    pub fn create(inheritable: bool) -> anyhow::Result<Self> {
        use anyhow::Context;
        use windows::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
        use windows::Win32::Security::SECURITY_ATTRIBUTES;
        use windows::Win32::System::Memory::{
            CreateFileMappingW, MapViewOfFile, FILE_MAP_ALL_ACCESS, PAGE_READWRITE,
        };

        let mut sa = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: inheritable.into(),
        };
        let size = Header::region_size() as u64;
        let mapping = unsafe {
            CreateFileMappingW(
                INVALID_HANDLE_VALUE,
                Some(&mut sa as *mut _),
                PAGE_READWRITE,
                (size >> 32) as u32,
                size as u32,
                None,
            )
        }
        .context("CreateFileMappingW failed")?;
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        if view.Value.is_null() {
            anyhow::bail!("MapViewOfFile failed");
        }
        let base = view.Value as *mut u8;
        unsafe { std::ptr::write_bytes(base, 0, Header::region_size()) };
        Ok(Self { base, mapping })
    }

    /// Opens a region by an inherited mapping handle value, as the Encoder
    /// does from its one positional command-line argument (spec §6).
    ///
    /// # Safety
    /// `handle_value` must name a valid, already-open file-mapping handle of
    /// at least [`Header::region_size`] bytes, inherited from the Capturer.
    #[cfg(windows)]
    pub unsafe fn open(handle_value: isize) -> anyhow::Result<Self> {
        use anyhow::Context;
        use windows::Win32::Foundation::HANDLE;
        use windows::Win32::System::Memory::{MapViewOfFile, FILE_MAP_ALL_ACCESS};

        let mapping = HANDLE(handle_value);
        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_ALL_ACCESS, 0, 0, 0) };
        if view.Value.is_null() {
            return Err(anyhow::anyhow!("MapViewOfFile failed")).context("opening inherited mapping");
        }
        Ok(Self { base: view.Value as *mut u8, mapping })
    }

    #[cfg(not(windows))]
    pub fn create(_inheritable: bool) -> anyhow::Result<Self> {
        let mut storage = vec![0u8; Header::region_size()].into_boxed_slice();
        let base = storage.as_mut_ptr();
        Ok(Self { base, _storage: storage })
    }

    /// The numeric mapping handle value, suitable for passing on the
    /// Encoder's command line (spec §4.1, §6).
    #[cfg(windows)]
    pub fn mapping_handle(&self) -> isize {
        self.mapping.0
    }

    pub fn header(&self) -> &Header {
        unsafe { &*(self.base as *const Header) }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn header_mut(&self) -> &mut Header {
        unsafe { &mut *(self.base as *mut Header) }
    }

    pub fn audio_scratch(&self) -> &mut [StereoS16] {
        let ptr = unsafe { self.base.add(Header::audio_offset() as usize) } as *mut StereoS16;
        unsafe { std::slice::from_raw_parts_mut(ptr, MAX_SAMPLES) }
    }
}

/// Capturer-side `send_event` (spec §4.2). `wait_on_encoder` abstracts the
/// "wait on `{encoder_process_handle, game_wake}`" step so this function is
/// testable without a real process handle: on Windows the real
/// implementation races [`crate::wake_event::wait_any`] against a process
/// handle; the closure passed in by the caller decides which fired.
pub fn send_event(
    region: &SharedRegion,
    kind: EventType,
    encoder_wake: &WakeEvent,
    wait_for_ack_or_death: impl FnOnce() -> AckOrDeath,
) -> Result<(), RpcError> {
    let header = region.header_mut();
    header.clear_error();
    header.event_type.store(kind as u32, Ordering::SeqCst);
    let _ = encoder_wake.signal();

    match wait_for_ack_or_death() {
        AckOrDeath::EncoderDied => Err(RpcError::GameExit),
        AckOrDeath::Acked => {
            let header = region.header();
            if header.error.load(Ordering::SeqCst) != 0 {
                Err(RpcError::EncoderError(header.error_message()))
            } else {
                Ok(())
            }
        }
    }
}

/// Outcome of racing `game_wake` against the encoder process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOrDeath {
    Acked,
    EncoderDied,
}

/// Encoder-side dispatch: given the event tag currently in the header, call
/// `handler` and write its outcome back before signaling `game_wake` (spec
/// §4.2: "On `encoder_wake` it dispatches on `event_type`, then signals
/// `game_wake`"). `handler` returns `Err(message)` on failure, matching
/// "every event handler must write `error=1` and a descriptive string on
/// failure".
pub fn dispatch_one(
    region: &SharedRegion,
    handler: impl FnOnce(EventType) -> Result<(), String>,
) -> Option<EventType> {
    let header = region.header_mut();
    let kind = EventType::from_u32(header.event_type.load(Ordering::SeqCst))?;
    match handler(kind) {
        Ok(()) => header.clear_error(),
        Err(message) => header.set_error(&message),
    }
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake_event::new_local_event;

    #[test]
    fn movie_params_round_trip_string_fields() {
        let mut p = MovieParams::zeroed();
        p.set_dest_path("C:/clips/out.mp4");
        p.set_video_encoder("libx264");
        p.set_x264_preset("veryfast");
        assert_eq!(p.dest_path(), "C:/clips/out.mp4");
        assert_eq!(p.video_encoder(), "libx264");
        assert_eq!(p.x264_preset(), "veryfast");
    }

    #[test]
    fn region_size_covers_header_and_full_audio_scratch() {
        let expected = std::mem::size_of::<Header>() + MAX_SAMPLES * std::mem::size_of::<StereoS16>();
        assert_eq!(Header::region_size(), expected);
    }

    #[test]
    fn fresh_region_is_zeroed_and_event_type_is_none() {
        let region = SharedRegion::create(false).unwrap();
        assert_eq!(region.header().event_type.load(Ordering::SeqCst), EventType::None as u32);
        assert_eq!(region.header().error.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn send_event_ok_when_encoder_acks_without_error() {
        let region = SharedRegion::create(false).unwrap();
        let wake = new_local_event().unwrap();
        let result = send_event(&region, EventType::Start, &wake, || AckOrDeath::Acked);
        assert!(result.is_ok());
    }

    #[test]
    fn send_event_surfaces_encoder_error_message() {
        let region = SharedRegion::create(false).unwrap();
        region.header_mut().set_error("codec open failed");
        let wake = new_local_event().unwrap();
        // send_event clears the error before the wait, so the handler must
        // set it again inside `wait_for_ack_or_death` to model a real ack.
        let result = send_event(&region, EventType::Start, &wake, || {
            region.header_mut().set_error("codec open failed");
            AckOrDeath::Acked
        });
        assert_eq!(result, Err(RpcError::EncoderError("codec open failed".into())));
    }

    #[test]
    fn send_event_reports_game_exit_when_encoder_process_died() {
        let region = SharedRegion::create(false).unwrap();
        let wake = new_local_event().unwrap();
        let result = send_event(&region, EventType::NewVideo, &wake, || AckOrDeath::EncoderDied);
        assert_eq!(result, Err(RpcError::GameExit));
    }

    #[test]
    fn dispatch_one_writes_error_on_handler_failure() {
        let region = SharedRegion::create(false).unwrap();
        region.header_mut().event_type.store(EventType::NewAudio as u32, Ordering::SeqCst);
        let kind = dispatch_one(&region, |_| Err("boom".to_string()));
        assert_eq!(kind, Some(EventType::NewAudio));
        assert_eq!(region.header().error.load(Ordering::SeqCst), 1);
        assert_eq!(region.header().error_message(), "boom");
    }

    #[test]
    fn dispatch_one_clears_error_on_handler_success() {
        let region = SharedRegion::create(false).unwrap();
        region.header_mut().set_error("stale");
        region.header_mut().event_type.store(EventType::Stop as u32, Ordering::SeqCst);
        dispatch_one(&region, |_| Ok(()));
        assert_eq!(region.header().error.load(Ordering::SeqCst), 0);
    }
}
