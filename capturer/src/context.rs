//! The Capturer's per-process and per-movie state, collected into explicit
//! contexts instead of file-scope globals (spec §9: "Global mutable state
//! in the source ... should be re-architected as an explicit `Capturer`
//! context ... Lifetime rules then become: one context per movie for
//! dynamic state, one context per process for static state").

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context as _, Result};
use svr_shared::ipc::SharedRegion;
use svr_shared::keyed_mutex::{GameSide, KeyedMutex};
use svr_shared::profile::MovieProfile;
use svr_shared::wake_event::WakeEvent;

#[cfg(windows)]
use svr_shared::ipc::AckOrDeath;

use crate::mosample::Accumulator;
use crate::velocity_overlay::ResolvedFont;

/// One-per-process state (spec §9: "one context per process for static
/// state"). The shared-memory mapping, the two wake events, and the spawned
/// Encoder's process handle are all created once at `init()` (spec §4.1:
/// "The Encoder process is spawned with handle inheritance enabled") and
/// reused across every movie recorded in this host game session.
pub struct CapturerContext {
    #[cfg(windows)]
    pub device: windows::Win32::Graphics::Direct3D11::ID3D11Device,
    #[cfg(windows)]
    pub device_context: windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
    #[cfg(windows)]
    pub encoder_process: windows::Win32::Foundation::HANDLE,
    pub region: SharedRegion,
    pub encoder_wake: WakeEvent,
    pub game_wake: WakeEvent,
    pub movie: Option<MovieContext>,
}

/// One-per-movie dynamic state: everything reset when a movie starts and
/// torn down when it stops (spec §9).
pub struct MovieContext {
    pub profile: MovieProfile,
    pub game_texture_mutex: KeyedMutex<GameSide>,
    pub accumulator: Option<Accumulator>,
    pub velocity_font: Option<ResolvedFont>,
    pub pending_velocity: (f32, f32, f32),
    pub frame_width: u32,
    pub frame_height: u32,
    pub active: AtomicBool,
}

impl MovieContext {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Races `game_wake` against the Encoder process handle, the wait primitive
/// spec §4.2/§9 requires for `send_event` ("wait-for-multiple-handles",
/// "wait on a process handle in the same call as an event handle"). A free
/// function rather than a `CapturerContext` method so callers can hold it
/// can still have `ctx.movie` borrowed mutably at the same time (the two
/// borrows touch disjoint fields).
#[cfg(windows)]
pub fn wait_for_ack_or_encoder_death(
    encoder_process: windows::Win32::Foundation::HANDLE,
    game_wake: &WakeEvent,
) -> AckOrDeath {
    let handles = [encoder_process.0, game_wake.raw()];
    match svr_shared::wake_event::wait_any(&handles) {
        Ok(0) => AckOrDeath::EncoderDied,
        Ok(_) => AckOrDeath::Acked,
        Err(_) => AckOrDeath::EncoderDied,
    }
}

/// Spawns the Encoder process with handle inheritance enabled, passing the
/// mapping handle as its one positional command-line argument (spec §4.1,
/// §6: "One positional argument: the integer handle value of the inherited
/// shared-memory mapping"). `svr_path` is the directory the Encoder binary
/// ships alongside.
#[cfg(windows)]
pub fn spawn_encoder_process(svr_path: &str, mapping_handle: isize) -> Result<windows::Win32::Foundation::HANDLE> {
    use windows::core::PWSTR;
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{
        CreateProcessW, PROCESS_INFORMATION, STARTUPINFOW,
    };

    let exe_path = std::path::Path::new(svr_path).join("svr-encoder.exe");
    let mut cmdline: Vec<u16> = format!("\"{}\" {}", exe_path.display(), mapping_handle)
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    let startup_info = STARTUPINFOW { cb: std::mem::size_of::<STARTUPINFOW>() as u32, ..Default::default() };
    let mut process_info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessW(
            None,
            PWSTR(cmdline.as_mut_ptr()),
            None,
            None,
            true, // bInheritHandles: required for the mapping/event handles marked inheritable to cross over
            Default::default(),
            None,
            None,
            &startup_info,
            &mut process_info,
        )
    }
    .context("CreateProcessW for the Encoder failed")?;

    // SAFETY: `hThread` is owned by this call and not needed past startup.
    unsafe { CloseHandle(process_info.hThread) }.ok();
    Ok(process_info.hProcess)
}

#[cfg(windows)]
pub fn create_device() -> Result<(
    windows::Win32::Graphics::Direct3D11::ID3D11Device,
    windows::Win32::Graphics::Direct3D11::ID3D11DeviceContext,
)> {
    use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
    use windows::Win32::Graphics::Direct3D11::{
        D3D11CreateDevice, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION,
    };

    let mut device = None;
    let mut context = None;
    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
        .context("D3D11CreateDevice failed")?;
    }
    Ok((device.unwrap(), context.unwrap()))
}

/// Creates the shared, keyed-mutex-protected BGRA texture (spec §3, §4.1):
/// "A separate keyed-mutex BGRA shared texture is created by the
/// Capturer's graphics device ... opened by NT handle in the Encoder's
/// device."
#[cfg(windows)]
pub fn create_shared_texture(
    device: &windows::Win32::Graphics::Direct3D11::ID3D11Device,
    width: u32,
    height: u32,
) -> Result<(windows::Win32::Graphics::Direct3D11::ID3D11Texture2D, u32)> {
    use windows::core::Interface;
    use windows::Win32::Graphics::Direct3D11::{
        D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX, D3D11_TEXTURE2D_DESC,
        D3D11_USAGE_DEFAULT,
    };
    use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
    use windows::Win32::Graphics::Dxgi::IDXGIResource1;

    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
        CPUAccessFlags: 0,
        MiscFlags: D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0 as u32,
    };
    let mut texture = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("CreateTexture2D (shared keyed-mutex texture) failed")?;
    let texture = texture.unwrap();

    let resource: IDXGIResource1 = texture.cast().context("texture does not implement IDXGIResource1")?;
    let handle = unsafe { resource.CreateSharedHandle(None, 0x10000000u32, None) }
        .context("CreateSharedHandle failed")?;

    Ok((texture, handle.0 as u32))
}
