//! Real D3D11 backend for [`crate::pixel_convert::ConverterDevice`] and
//! [`crate::download_ring::StagingSlot`] (spec §4.1, §4.5, §4.6): opens the
//! Capturer's shared BGRA texture by NT handle, dispatches the conversion
//! compute shader into a set of plane textures, and downloads the result
//! through a ring of CPU-visible staging textures so the download never
//! stalls the GPU pipeline waiting on the frame that's still in flight.
//!
//! Grounded in [`svr_capturer::context`]'s own `create_device`/
//! `create_shared_texture` (same `D3D11CreateDevice`/`CreateTexture2D` call
//! shapes, mirrored here for the Encoder's side of the same shared texture).

#![cfg(windows)]

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use windows::core::Interface;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11ComputeShader, ID3D11Device, ID3D11DeviceContext, ID3D11ShaderResourceView,
    ID3D11Texture2D, ID3D11UnorderedAccessView, D3D11CreateDevice, D3D11_BIND_FLAG,
    D3D11_BIND_UNORDERED_ACCESS, D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE, D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_R8G8_UNORM, DXGI_FORMAT_R8_UNORM,
    DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::IDXGIKeyedMutex;

use svr_shared::constants::VID_QUEUED_TEXTURES;
use svr_shared::keyed_mutex::{EncoderSide, KeyedMutex};
use svr_shared::pixel_format::OutputFormat;

use crate::download_ring::{DownloadRing, StagingSlot};
use crate::ffmpeg_backend::VideoFrameInput;
use crate::pixel_convert::{ConverterDevice, ShaderVariant};

fn create_device() -> Result<(ID3D11Device, ID3D11DeviceContext)> {
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

fn dxgi_format_for_channels(channels: u32) -> DXGI_FORMAT {
    match channels {
        1 => DXGI_FORMAT_R8_UNORM,
        2 => DXGI_FORMAT_R8G8_UNORM,
        _ => DXGI_FORMAT_R8G8B8A8_UNORM,
    }
}

fn create_plane_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
    channels: u32,
    bind_flags: D3D11_BIND_FLAG,
    usage: D3D11_USAGE,
    cpu_access: u32,
) -> Result<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: dxgi_format_for_channels(channels),
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Usage: usage,
        BindFlags: bind_flags.0 as u32,
        CPUAccessFlags: cpu_access,
        MiscFlags: 0,
    };
    let mut texture = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }.context("CreateTexture2D failed")?;
    Ok(texture.unwrap())
}

/// Borrows two distinct elements of `items` mutably at once. `i` and `j`
/// must differ; the download ring only ever hands out a write slot and a
/// read slot whose indices coincide when it's completely empty, a case
/// callers short-circuit before reaching here.
fn two_distinct_mut<T>(items: &mut [T], i: usize, j: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(i, j, "download ring write/read slot aliased");
    if i < j {
        let (left, right) = items.split_at_mut(j);
        (&mut left[i], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(i);
        (&mut right[0], &mut left[j])
    }
}

/// One ring position's CPU-readable copy of the destination planes.
struct GpuRingSlot {
    context: ID3D11DeviceContext,
    dest_textures: Vec<ID3D11Texture2D>,
    staging_textures: Vec<ID3D11Texture2D>,
    plane_dims: Vec<(u32, u32)>,
    plane_channels: Vec<u32>,
    last_frame: Option<VideoFrameInput>,
}

impl GpuRingSlot {
    fn new(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        dest_textures: &[ID3D11Texture2D],
        format: OutputFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut staging_textures = Vec::with_capacity(dest_textures.len());
        let mut plane_dims = Vec::with_capacity(dest_textures.len());
        let mut plane_channels = Vec::with_capacity(dest_textures.len());
        for (i, plane) in format.planes().iter().enumerate() {
            let (pw, ph) = format.plane_dimensions(i, width, height);
            let texture = create_plane_texture(
                device,
                pw,
                ph,
                plane.channels,
                D3D11_BIND_FLAG(0),
                D3D11_USAGE_STAGING,
                D3D11_CPU_ACCESS_READ.0 as u32,
            )?;
            staging_textures.push(texture);
            plane_dims.push((pw, ph));
            plane_channels.push(plane.channels);
        }
        Ok(Self {
            context: context.clone(),
            dest_textures: dest_textures.to_vec(),
            staging_textures,
            plane_dims,
            plane_channels,
            last_frame: None,
        })
    }
}

impl StagingSlot for GpuRingSlot {
    fn copy_and_flush(&mut self) {
        for (dest, staging) in self.dest_textures.iter().zip(&self.staging_textures) {
            unsafe { self.context.CopyResource(staging, dest) };
        }
        unsafe { self.context.Flush() };
    }

    fn map_and_copy_out(&mut self) {
        let mut planes = Vec::with_capacity(self.staging_textures.len());
        let mut line_sizes = Vec::with_capacity(self.staging_textures.len());
        for i in 0..self.staging_textures.len() {
            let (width, height) = self.plane_dims[i];
            let row_bytes = width as usize * self.plane_channels[i] as usize;
            let mut plane = vec![0u8; row_bytes * height as usize];

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            let mapped_ok =
                unsafe { self.context.Map(&self.staging_textures[i], 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }.is_ok();
            if mapped_ok {
                let pitch = mapped.RowPitch as usize;
                let src = mapped.pData as *const u8;
                for row in 0..height as usize {
                    let dst = &mut plane[row * row_bytes..(row + 1) * row_bytes];
                    unsafe { std::ptr::copy_nonoverlapping(src.add(row * pitch), dst.as_mut_ptr(), row_bytes) };
                }
                unsafe { self.context.Unmap(&self.staging_textures[i], 0) };
            }

            planes.push(plane);
            line_sizes.push(row_bytes);
        }
        self.last_frame = Some(VideoFrameInput { planes, line_sizes });
    }
}

/// Owns the Encoder's own D3D11 device, the opened view of the Capturer's
/// shared texture, the destination plane textures a conversion pass writes
/// into, and the download ring's staging textures (spec §3, §4.1, §4.5,
/// §4.6). One instance per open movie.
pub struct GpuPipeline {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    source_srv: ID3D11ShaderResourceView,
    dest_textures: Vec<ID3D11Texture2D>,
    dest_uavs: Vec<ID3D11UnorderedAccessView>,
    shaders_dir: PathBuf,
    shader_cache: HashMap<String, ID3D11ComputeShader>,
    ring_slots: Vec<GpuRingSlot>,
}

impl GpuPipeline {
    /// Opens the shared texture by its NT handle value (spec §3: "opened by
    /// NT handle in the Encoder's device") and builds the destination plane
    /// textures and the download ring's staging textures for `format` at
    /// `width`x`height`. Returns the keyed-mutex handle on the same shared
    /// texture separately, since acquiring it has to stay a disjoint
    /// borrow from the rest of this struct at the call site (see
    /// [`crate::state`]'s `new_video`).
    pub fn open(shared_texture_handle: u32, format: OutputFormat, width: u32, height: u32) -> Result<(Self, KeyedMutex<EncoderSide>)> {
        let (device, context) = create_device()?;

        let source_texture: ID3D11Texture2D = unsafe { device.OpenSharedResource(HANDLE(shared_texture_handle as isize)) }
            .context("OpenSharedResource on the Capturer's shared texture failed")?;
        let mut source_srv = None;
        unsafe { device.CreateShaderResourceView(&source_texture, None, Some(&mut source_srv)) }
            .context("CreateShaderResourceView on the shared texture failed")?;
        let source_srv = source_srv.unwrap();

        let keyed: IDXGIKeyedMutex =
            source_texture.cast().context("shared texture does not implement IDXGIKeyedMutex")?;
        let keyed_mutex = KeyedMutex::<EncoderSide>::new(keyed);

        let mut dest_textures = Vec::with_capacity(format.plane_count());
        let mut dest_uavs = Vec::with_capacity(format.plane_count());
        for (i, plane) in format.planes().iter().enumerate() {
            let (pw, ph) = format.plane_dimensions(i, width, height);
            let texture =
                create_plane_texture(&device, pw, ph, plane.channels, D3D11_BIND_UNORDERED_ACCESS, D3D11_USAGE_DEFAULT, 0)?;
            let mut uav = None;
            unsafe { device.CreateUnorderedAccessView(&texture, None, Some(&mut uav)) }
                .context("CreateUnorderedAccessView on a destination plane failed")?;
            dest_textures.push(texture);
            dest_uavs.push(uav.unwrap());
        }

        let mut ring_slots = Vec::with_capacity(VID_QUEUED_TEXTURES as usize);
        for _ in 0..VID_QUEUED_TEXTURES {
            ring_slots.push(GpuRingSlot::new(&device, &context, &dest_textures, format, width, height)?);
        }

        let shaders_dir = std::env::current_exe()
            .map(|p| p.with_file_name("shaders"))
            .unwrap_or_else(|_| PathBuf::from("shaders"));

        let pipeline = Self { device, context, source_srv, dest_textures, dest_uavs, shaders_dir, shader_cache: HashMap::new(), ring_slots };
        Ok((pipeline, keyed_mutex))
    }

    /// Compiled compute shaders ship next to `svr-encoder.exe` as
    /// `<entry_point>.cso`, one per format/colorspace permutation; loaded
    /// and cached on first use rather than all eight up front.
    fn shader_for(&mut self, variant: ShaderVariant) -> Result<ID3D11ComputeShader> {
        let key = variant.entry_point();
        if let Some(shader) = self.shader_cache.get(&key) {
            return Ok(shader.clone());
        }
        let path = self.shaders_dir.join(format!("{key}.cso"));
        let bytecode = std::fs::read(&path).with_context(|| format!("reading compute shader {}", path.display()))?;
        let mut shader = None;
        unsafe { self.device.CreateComputeShader(&bytecode, None, Some(&mut shader)) }
            .with_context(|| format!("CreateComputeShader failed for {key}"))?;
        let shader = shader.unwrap();
        self.shader_cache.insert(key, shader.clone());
        Ok(shader)
    }

    /// Runs C6 (spec §4.6) on top of a just-converted frame: copies the
    /// destination planes into the next ring slot, and when the lag
    /// threshold is crossed, maps the oldest outstanding slot and returns
    /// its frame for the caller to hand to the frame-encode worker.
    pub fn push_and_maybe_drain(&mut self, ring: &mut DownloadRing) -> Option<VideoFrameInput> {
        let write_idx = ring.write_slot() as usize;
        let read_idx = (ring.read_idx() % VID_QUEUED_TEXTURES) as usize;

        if write_idx == read_idx {
            // Ring empty: nothing to drain yet.
            ring.push_and_maybe_drain(&mut self.ring_slots[write_idx], |_| None);
            return None;
        }

        let (write_slot, read_slot) = two_distinct_mut(&mut self.ring_slots, write_idx, read_idx);
        ring.push_and_maybe_drain(write_slot, |_| {
            read_slot.map_and_copy_out();
            Some(())
        });
        self.ring_slots[read_idx].last_frame.take()
    }
}

impl ConverterDevice for GpuPipeline {
    fn bind_source(&mut self) {
        unsafe { self.context.CSSetShaderResources(0, Some(&[Some(self.source_srv.clone())])) };
    }

    fn bind_destination_planes(&mut self, variant: ShaderVariant) {
        let shader = match self.shader_for(variant) {
            Ok(shader) => shader,
            Err(e) => {
                eprintln!("[encoder] {}: {e}", variant.entry_point());
                return;
            }
        };
        let uavs: Vec<Option<ID3D11UnorderedAccessView>> = self.dest_uavs.iter().cloned().map(Some).collect();
        unsafe {
            self.context.CSSetShader(Some(&shader), None, 0);
            self.context.CSSetUnorderedAccessViews(0, Some(&uavs), None);
        }
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        unsafe { self.context.Dispatch(groups_x, groups_y, groups_z) };
    }
}
