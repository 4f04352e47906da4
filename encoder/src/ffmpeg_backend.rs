//! ffmpeg-next-backed implementations of the [`orchestrator`] traits (spec
//! §4.8 steps 3–11). Grounded in the same encoder-setup idioms the teacher
//! crate uses for its own H.264/AAC segment encoder, generalized to the
//! profile-driven codec table spec §4.8 calls for (x264/x264rgb/DNxHR video,
//! a configurable audio codec, and real container muxing instead of a fixed
//! MP4 writer).

#![cfg(windows)]

use anyhow::{Context, Result};
use ffmpeg_next::{self as ffmpeg, codec, encoder, format, Rational};
use svr_shared::error::MovieStartError;
use svr_shared::pixel_format::OutputFormat;
use svr_shared::profile::{DnxhrProfile, MovieProfile, VideoEncoder as ProfileVideoEncoder};

use crate::audio_resample::ResamplerBackend;
use crate::codec_tables::Container;
use crate::orchestrator::{FrameEncoder, Muxer};

fn to_av_pixel(format: OutputFormat) -> format::Pixel {
    match format {
        OutputFormat::Nv12 => format::Pixel::NV12,
        OutputFormat::Yuv422p => format::Pixel::YUV422P,
        OutputFormat::Yuv444p => format::Pixel::YUV444P,
        OutputFormat::Bgr0 => format::Pixel::BGR0,
    }
}

/// Opens and configures the video codec context for `profile` (spec §4.8
/// steps 4, 6, 7): looks the codec up by profile name, sets width/height/
/// time-base/pixel-format/color-range/thread-count, then applies the
/// codec-specific `setup_fn` before opening.
pub struct VideoStream {
    encoder: encoder::video::Video,
    /// Captured from the `Codec` handle `open_as_with` consumes, since
    /// [`OutputContainer::create`] needs to add a stream with this same
    /// codec rather than guessing H.264 for every profile.
    codec_id: codec::Id,
    pts: i64,
}

impl VideoStream {
    pub fn open(profile: &MovieProfile, width: u32, height: u32, needs_global_header: bool) -> Result<Self, MovieStartError> {
        let row = crate::codec_tables::lookup_video_codec(profile.video_encoder, profile);
        let codec = encoder::find_by_name(row.codec_name)
            .ok_or_else(|| MovieStartError::UnknownVideoCodec(row.codec_name.to_string()))?;
        let codec_id = codec.id();

        let ctx = codec::context::Context::new();
        let mut video = ctx.encoder().video().map_err(|e| MovieStartError::CodecOpenFailed(e.to_string()))?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(to_av_pixel(row.preferred_pix_fmt));
        video.set_time_base(Rational::new(1, profile.fps as i32));
        video.set_frame_rate(Some(Rational::new(profile.fps as i32, 1)));
        video.set_color_range(ffmpeg::color::Range::MPEG);

        unsafe {
            let p = video.as_mut_ptr();
            (*p).thread_count = 0; // 0 == "all" in libavcodec's convention
            if needs_global_header {
                (*p).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
            }
        }

        let mut opts = ffmpeg::Dictionary::new();
        match profile.video_encoder {
            ProfileVideoEncoder::Libx264 | ProfileVideoEncoder::Libx264rgb => {
                opts.set("preset", &profile.x264_preset);
                opts.set("crf", &profile.x264_crf.to_string());
                if profile.x264_intra {
                    opts.set("keyint", "1");
                }
            }
            ProfileVideoEncoder::Dnxhr => {
                opts.set("profile", profile.dnxhr_profile.codec_profile_string());
            }
        }

        let opened = video
            .open_as_with(codec, opts)
            .map_err(|e| MovieStartError::CodecOpenFailed(e.to_string()))?;

        Ok(Self { encoder: opened, codec_id, pts: 0 })
    }
}

/// One converted-and-downloaded video frame ready for encoding, tagged with
/// the monotonically increasing PTS spec §4.8's steady state assigns.
pub struct VideoFrameInput {
    pub planes: Vec<Vec<u8>>,
    pub line_sizes: Vec<usize>,
}

impl FrameEncoder for VideoStream {
    type Frame = VideoFrameInput;
    type Packet = MuxPacket;

    fn send_frame(&mut self, frame: Option<VideoFrameInput>) -> Result<(), String> {
        match frame {
            None => self.encoder.send_eof().map_err(|e| e.to_string()),
            Some(input) => {
                let mut av_frame = ffmpeg::frame::Video::new(
                    self.encoder.format(),
                    self.encoder.width(),
                    self.encoder.height(),
                );
                av_frame.set_pts(Some(self.pts));
                self.pts += 1;
                for (i, plane) in input.planes.iter().enumerate() {
                    let dst_stride = av_frame.stride(i);
                    let src_stride = input.line_sizes[i];
                    let data = av_frame.data_mut(i);
                    for row in 0..(plane.len() / src_stride.max(1)) {
                        let src = &plane[row * src_stride..row * src_stride + src_stride.min(dst_stride)];
                        let dst = &mut data[row * dst_stride..row * dst_stride + src.len()];
                        dst.copy_from_slice(src);
                    }
                }
                self.encoder.send_frame(&av_frame).map_err(|e| e.to_string())
            }
        }
    }

    fn receive_packets(&mut self) -> Result<Vec<MuxPacket>, String> {
        let mut packets = Vec::new();
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => packets.push(MuxPacket::Video(packet)),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(packets)
    }
}

/// Opens and configures the audio codec context (spec §4.8 step 10: "repeat
/// steps 4-9 for audio with its own table"). AAC requires its frames to
/// carry exactly `frame_size()` samples except the trailing one, which is
/// why [`crate::audio_resample::AudioFifo`] drains in codec-frame units.
pub struct AudioStream {
    encoder: encoder::audio::Audio,
    codec_id: codec::Id,
    pts: i64,
}

impl AudioStream {
    pub fn open(sample_rate: u32, channel_layout: ffmpeg::util::channel_layout::ChannelLayout) -> Result<Self, MovieStartError> {
        let row = crate::codec_tables::lookup_audio_codec();
        let codec = encoder::find_by_name(row.codec_name)
            .ok_or_else(|| MovieStartError::UnknownVideoCodec(row.codec_name.to_string()))?;
        let codec_id = codec.id();

        let ctx = codec::context::Context::new();
        let mut audio = ctx.encoder().audio().map_err(|e| MovieStartError::CodecOpenFailed(e.to_string()))?;
        audio.set_rate(sample_rate as i32);
        audio.set_channel_layout(channel_layout);
        audio.set_format(ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar));
        audio.set_time_base(Rational::new(1, sample_rate as i32));

        let opened = audio.open_as(codec).map_err(|e| MovieStartError::CodecOpenFailed(e.to_string()))?;
        Ok(Self { encoder: opened, codec_id, pts: 0 })
    }

    /// The fixed sample count AAC expects per frame (1024 for the LC
    /// profile), used to size [`crate::audio_resample::AudioFifo`]'s codec
    /// frame.
    pub fn frame_size(&self) -> usize {
        self.encoder.frame_size() as usize
    }

    pub fn format(&self) -> ffmpeg::format::Sample {
        self.encoder.format()
    }

    pub fn channel_layout(&self) -> ffmpeg::util::channel_layout::ChannelLayout {
        self.encoder.channel_layout()
    }
}

/// One resampled, codec-frame-sized batch ready for the AAC encoder (spec
/// §4.7/§4.8's `AudioFifo::drain_full_frames` output).
pub struct AudioFrameInput {
    pub data: Vec<u8>,
    pub sample_count: usize,
}

impl FrameEncoder for AudioStream {
    type Frame = AudioFrameInput;
    type Packet = MuxPacket;

    fn send_frame(&mut self, frame: Option<AudioFrameInput>) -> Result<(), String> {
        match frame {
            None => self.encoder.send_eof().map_err(|e| e.to_string()),
            Some(input) => {
                let mut av_frame = ffmpeg::frame::Audio::new(self.encoder.format(), input.sample_count, self.encoder.channel_layout());
                av_frame.set_pts(Some(self.pts));
                self.pts += input.sample_count as i64;
                let dst = av_frame.data_mut(0);
                dst[..input.data.len().min(dst.len())].copy_from_slice(&input.data[..input.data.len().min(dst.len())]);
                self.encoder.send_frame(&av_frame).map_err(|e| e.to_string())
            }
        }
    }

    fn receive_packets(&mut self) -> Result<Vec<MuxPacket>, String> {
        let mut packets = Vec::new();
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match self.encoder.receive_packet(&mut packet) {
                Ok(()) => packets.push(MuxPacket::Audio(packet)),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => break,
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => return Err(e.to_string()),
            }
        }
        Ok(packets)
    }
}

/// A packet tagged with which stream it belongs to, since video and audio
/// share one packet queue and one mux worker (spec §4.8's packet-mux
/// worker drains a single FIFO regardless of media type).
pub enum MuxPacket {
    Video(ffmpeg::Packet),
    Audio(ffmpeg::Packet),
}

/// The open output container (spec §4.8 steps 2–3, 11).
pub struct OutputContainer {
    octx: format::context::Output,
    video_stream_index: usize,
    audio_stream_index: Option<usize>,
    header_written: bool,
}

impl OutputContainer {
    pub fn create(dest_path: &str, container: Container, video: &VideoStream, video_time_base: Rational) -> Result<Self, MovieStartError> {
        let mut octx = format::output_as(dest_path, container.ffmpeg_short_name())
            .map_err(|e| MovieStartError::CodecOpenFailed(e.to_string()))?;
        let video_stream_index = {
            let codec = encoder::find(video.codec_id)
                .ok_or_else(|| MovieStartError::UnknownVideoCodec(format!("{:?}", video.codec_id)))?;
            let mut stream = octx.add_stream(codec).map_err(|e| MovieStartError::CodecOpenFailed(e.to_string()))?;
            stream.set_time_base(video_time_base);
            stream.set_parameters(&video.encoder);
            stream.index()
        };
        Ok(Self { octx, video_stream_index, audio_stream_index: None, header_written: false })
    }

    /// Adds the audio stream (spec §4.8 step 10), called during startup only
    /// when `use_audio` is set.
    pub fn add_audio_stream(&mut self, audio: &AudioStream, audio_time_base: Rational) -> Result<(), MovieStartError> {
        let codec = encoder::find(audio.codec_id)
            .ok_or_else(|| MovieStartError::UnknownVideoCodec(format!("{:?}", audio.codec_id)))?;
        let mut stream = self
            .octx
            .add_stream(codec)
            .map_err(|e| MovieStartError::CodecOpenFailed(e.to_string()))?;
        stream.set_time_base(audio_time_base);
        stream.set_parameters(&audio.encoder);
        self.audio_stream_index = Some(stream.index());
        Ok(())
    }

    pub fn write_header(&mut self) -> Result<(), String> {
        self.octx.write_header().map_err(|e| e.to_string())?;
        self.header_written = true;
        Ok(())
    }

    pub fn write_trailer(&mut self) -> Result<(), String> {
        self.octx.write_trailer().map_err(|e| e.to_string())
    }
}

impl Muxer for OutputContainer {
    type Packet = MuxPacket;

    fn write_interleaved(&mut self, packet: MuxPacket) -> Result<(), String> {
        let (mut packet, stream_index) = match packet {
            MuxPacket::Video(p) => (p, self.video_stream_index),
            MuxPacket::Audio(p) => {
                let index = self.audio_stream_index.ok_or("audio packet with no audio stream open")?;
                (p, index)
            }
        };
        packet.set_stream(stream_index);
        packet.write_interleaved(&mut self.octx).map_err(|e| e.to_string())
    }

    fn finish(&mut self) -> Result<(), String> {
        self.write_trailer()
    }
}

/// `swresample`-backed [`ResamplerBackend`] (spec §4.7).
pub struct SwResampler {
    ctx: ffmpeg::software::resampling::Context,
    bytes_per_sample: usize,
}

impl SwResampler {
    pub fn new(
        in_channel_layout: ffmpeg::util::channel_layout::ChannelLayout,
        in_rate: u32,
        out_format: ffmpeg::format::Sample,
        out_channel_layout: ffmpeg::util::channel_layout::ChannelLayout,
        out_rate: u32,
    ) -> Result<Self> {
        let ctx = ffmpeg::software::resampler(
            (ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed), in_channel_layout, in_rate),
            (out_format, out_channel_layout, out_rate),
        )
        .context("swr_alloc/open failed")?;
        let bytes_per_sample = out_format.bytes() * out_channel_layout.channels() as usize;
        Ok(Self { ctx, bytes_per_sample })
    }
}

impl ResamplerBackend for SwResampler {
    fn output_capacity_for(&self, input_len: usize) -> usize {
        // swr_get_out_samples accounts for the delay-line lookahead spec
        // §4.7 describes; approximate with a generous fixed margin here
        // since the exact call requires a live AVAudioResampleContext
        // pointer unavailable through the safe wrapper alone.
        input_len + input_len / 8 + 32
    }

    fn resample(&mut self, input: &[i16], out: &mut Vec<u8>) -> usize {
        let mut in_frame = ffmpeg::frame::Audio::new(
            ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed),
            input.len() / 2,
            ffmpeg::util::channel_layout::ChannelLayout::STEREO,
        );
        in_frame.data_mut(0)[..input.len() * 2]
            .copy_from_slice(unsafe { std::slice::from_raw_parts(input.as_ptr() as *const u8, input.len() * 2) });

        let mut out_frame = ffmpeg::frame::Audio::empty();
        let produced = self.ctx.run(&in_frame, &mut out_frame).map(|_| out_frame.samples()).unwrap_or(0);
        if produced > 0 {
            out.extend_from_slice(&out_frame.data(0)[..produced * self.bytes_per_sample]);
        }
        produced
    }

    fn bytes_per_sample(&self) -> usize {
        self.bytes_per_sample
    }
}
