//! Per-movie Encoder state (spec §9's redesign flag, applied the same way
//! on this side as [`svr_capturer::context`] applies it on the Capturer
//! side): everything opened at `START` and torn down at `STOP`, instead of
//! file-scope pointers.

use svr_shared::ipc::{EventType, SharedRegion};
use svr_shared::keyed_mutex::{EncoderSide, KeyedMutex};
use svr_shared::pixel_format::OutputFormat;
use svr_shared::profile::{self, MovieProfile};

use crate::audio_resample::AudioFifo;
use crate::codec_tables::{self, Container};
use crate::download_ring::DownloadRing;
use crate::orchestrator::{FrameJob, PacketJob, Queues};

#[cfg(windows)]
use crate::ffmpeg_backend::{MuxPacket, OutputContainer, SwResampler, VideoFrameInput, VideoStream};
#[cfg(windows)]
use crate::gpu::GpuPipeline;

/// On non-Windows the `queues` field below still needs concrete types to
/// type-check even though [`EncoderState::start`] always errors out before
/// ever constructing an `OpenMovie` on this platform (the Encoder's worker
/// pipeline is Windows-only, same as [`crate::ffmpeg_backend`]/[`crate::gpu`]).
#[cfg(not(windows))]
type VideoFrameInput = ();
#[cfg(not(windows))]
type MuxPacket = ();

/// Dispatches the four event kinds (spec §4.2 Encoder side, §4.8). Held
/// across the whole process lifetime; `movie` is `None` between movies.
#[derive(Default)]
pub struct EncoderState {
    movie: Option<OpenMovie>,
}

struct OpenMovie {
    profile: MovieProfile,
    container: Container,
    width: u32,
    height: u32,
    pixel_format: OutputFormat,
    /// The Encoder's side of the shared BGRA texture's keyed mutex (spec
    /// §3, §9): acquired around each conversion pass so the Capturer can't
    /// write a new frame into the texture while it's being read.
    keyed_mutex: KeyedMutex<EncoderSide>,
    #[cfg(windows)]
    gpu: GpuPipeline,
    ring: DownloadRing,
    audio_fifo: Option<AudioFifo>,
    video_frames_sent: u64,
    #[cfg(windows)]
    resampler: Option<SwResampler>,
    /// The frame-encode and packet-mux workers each hold a clone of the
    /// matching receiver/sender; `queues` keeps the senders `new_video`/
    /// `new_audio` push onto and the flush/join handles `stop` needs.
    queues: Queues<VideoFrameInput, MuxPacket>,
    frame_thread: Option<std::thread::JoinHandle<()>>,
    mux_thread: Option<std::thread::JoinHandle<()>>,
    /// Failure reports from the frame-encode/packet-mux workers (spec
    /// §4.8/§7: the main thread polls this before each submission instead
    /// of letting a worker failure go unnoticed).
    err_rx: crossbeam_channel::Receiver<String>,
    /// Spec §4.8's audio frame-encode worker is folded into an inline call
    /// from `new_audio` instead of a fourth thread — spec §4.7/§4.8 allow
    /// either mapping provided ordering is preserved, and AAC's frame-sized
    /// batches arrive far less often than video frames.
    #[cfg(windows)]
    audio: Option<crate::ffmpeg_backend::AudioStream>,
}

#[cfg(windows)]
impl OpenMovie {
    /// Runs one resampled [`crate::audio_resample::AudioFrame`] through the
    /// AAC encoder and forwards the resulting packets onto the shared
    /// packet queue the video frame-encode worker also feeds.
    fn encode_and_mux_audio_frame(&mut self, frame: crate::audio_resample::AudioFrame) -> Result<(), String> {
        let audio = self.audio.as_mut().ok_or("NEW_AUDIO with no audio stream open")?;
        audio.send_frame(Some(crate::ffmpeg_backend::AudioFrameInput { data: frame.data, sample_count: frame.sample_count }))?;
        for pkt in audio.receive_packets()? {
            let _ = self.queues.packet_tx.send(PacketJob::Packet(pkt));
        }
        Ok(())
    }

    /// Surfaces a worker-thread failure as soon as one is pending, rather
    /// than letting `new_video`/`new_audio` keep submitting into a mux or
    /// frame-encode worker that has already died.
    fn check_worker_errors(&self) -> Result<(), String> {
        match self.err_rx.try_recv() {
            Ok(message) => Err(message),
            Err(_) => Ok(()),
        }
    }
}

impl EncoderState {
    /// Dispatches one event against the current state (spec §4.8
    /// "Startup"/"Steady state"/"Teardown"), returning `Err(message)` the
    /// way [`svr_shared::ipc::dispatch_one`] expects so it gets written
    /// into `error`/`error_message` for the Capturer to surface.
    pub fn handle(&mut self, kind: EventType, region: &SharedRegion) -> Result<(), String> {
        match kind {
            EventType::None => Ok(()),
            EventType::Start => self.start(region),
            EventType::NewVideo => self.new_video(region),
            EventType::NewAudio => self.new_audio(region),
            EventType::Stop => {
                self.stop();
                Ok(())
            }
        }
    }

    fn start(&mut self, region: &SharedRegion) -> Result<(), String> {
        let header = region.header();
        let width = header.movie_params.width;
        let height = header.movie_params.height;
        let dest_path = header.movie_params.dest_path();
        let fps = header.movie_params.fps;

        let mut profile = MovieProfile::default();
        profile.fps = fps;
        if let Some(encoder) = profile::VideoEncoder::parse(&header.movie_params.video_encoder()) {
            profile.video_encoder = encoder;
        }
        if let Some(dnxhr) = profile::DnxhrProfile::parse(&header.movie_params.dnxhr_profile()) {
            profile.dnxhr_profile = dnxhr;
        }
        profile.x264_preset = header.movie_params.x264_preset();
        profile.x264_crf = header.movie_params.x264_crf;
        profile.x264_intra = header.movie_params.x264_intra != 0;
        profile.audio_enabled = header.movie_params.use_audio != 0;

        let (container, row) =
            codec_tables::validate_startup(&profile, &dest_path, width, height).map_err(|e| e.to_string())?;

        #[cfg(windows)]
        {
            use crate::ffmpeg_backend::AudioStream;
            use ffmpeg_next::util::channel_layout::ChannelLayout;

            let video = VideoStream::open(&profile, width, height, container == Container::Mp4 || container == Container::Mov)
                .map_err(|e| e.to_string())?;
            let mut output = OutputContainer::create(&dest_path, container, &video, ffmpeg_next::Rational::new(1, fps as i32))
                .map_err(|e| e.to_string())?;
            let (gpu, keyed_mutex) = GpuPipeline::open(header.movie_params.game_texture_handle, row.preferred_pix_fmt, width, height)
                .map_err(|e| e.to_string())?;

            let (audio, resampler, audio_fifo) = if profile.audio_enabled {
                let audio_hz = header.movie_params.audio_hz;
                let audio = AudioStream::open(audio_hz, ChannelLayout::STEREO).map_err(|e| e.to_string())?;
                output.add_audio_stream(&audio, ffmpeg_next::Rational::new(1, audio_hz as i32)).map_err(|e| e.to_string())?;
                let resampler = SwResampler::new(ChannelLayout::STEREO, audio_hz, audio.format(), audio.channel_layout(), audio_hz)
                    .map_err(|e| e.to_string())?;
                let fifo = AudioFifo::new(resampler.bytes_per_sample(), audio.frame_size());
                (Some(audio), Some(resampler), Some(fifo))
            } else {
                (None, None, None)
            };

            output.write_header()?;

            let queues: Queues<VideoFrameInput, MuxPacket> = Queues::new();
            let (err_tx, err_rx) = crossbeam_channel::unbounded();
            let frame_thread = crate::orchestrator::spawn_frame_encode_worker(video, queues.frame_rx.clone(), queues.packet_tx.clone(), err_tx.clone());
            let mux_thread = crate::orchestrator::spawn_packet_mux_worker(output, queues.packet_rx.clone(), err_tx);

            self.movie = Some(OpenMovie {
                profile,
                container,
                width,
                height,
                pixel_format: row.preferred_pix_fmt,
                keyed_mutex,
                gpu,
                ring: DownloadRing::new(),
                audio_fifo,
                video_frames_sent: 0,
                resampler,
                queues,
                frame_thread: Some(frame_thread),
                mux_thread: Some(mux_thread),
                err_rx,
                audio,
            });
        }

        #[cfg(not(windows))]
        {
            let _ = (container, profile);
            return Err("the Encoder is only supported on Windows".to_string());
        }

        Ok(())
    }

    /// Steady state on `NEW_VIDEO` (spec §4.8): convert (C5), push onto the
    /// download ring (C6 write side); when saturated, also drain one slot
    /// and enqueue the result for the frame-encode worker.
    fn new_video(&mut self, _region: &SharedRegion) -> Result<(), String> {
        let movie = self.movie.as_mut().ok_or("NEW_VIDEO with no open movie")?;

        #[cfg(windows)]
        {
            movie.check_worker_errors()?;

            let variant = crate::pixel_convert::ShaderVariant {
                format: movie.pixel_format,
                colorspace: svr_shared::pixel_format::Colorspace::Bt709,
            };
            let guard = movie.keyed_mutex.acquire(u32::MAX).map_err(|e| e.to_string())?;
            crate::pixel_convert::convert(&mut movie.gpu, variant, movie.width, movie.height);
            drop(guard);

            if let Some(frame) = movie.gpu.push_and_maybe_drain(&mut movie.ring) {
                let _ = movie.queues.frame_tx.send(FrameJob::Frame(frame));
                movie.video_frames_sent += 1;
            }
        }

        #[cfg(not(windows))]
        {
            movie.ring.advance_write();
            if movie.ring.should_drain() {
                movie.ring.advance_read();
                movie.video_frames_sent += 1;
            }
        }

        Ok(())
    }

    /// `NEW_AUDIO` (spec §4.7, §4.8): resamples the pending batch and feeds
    /// every full codec-frame chunk straight into the AAC encoder, inline
    /// (spec §4.7/§4.8 allow a dedicated thread or an inline call here
    /// provided submission order is preserved; a batch this small arrives
    /// far less often than video frames, so inline keeps one fewer thread).
    fn new_audio(&mut self, region: &SharedRegion) -> Result<(), String> {
        let movie = self.movie.as_mut().ok_or("NEW_AUDIO with no open movie")?;
        if !movie.profile.audio_enabled {
            return Ok(());
        }
        let header = region.header();
        let n = header.waiting_audio_samples.load(std::sync::atomic::Ordering::SeqCst) as usize;
        let scratch = region.audio_scratch();
        let interleaved: Vec<i16> = scratch[..n].iter().flat_map(|s| [s.left, s.right]).collect();

        #[cfg(windows)]
        {
            movie.check_worker_errors()?;

            let (resampler, fifo) = match (movie.resampler.as_mut(), movie.audio_fifo.as_mut()) {
                (Some(r), Some(f)) => (r, f),
                _ => return Ok(()),
            };
            let frames = crate::audio_resample::process_batch(resampler, fifo, &interleaved);
            for frame in frames {
                movie.encode_and_mux_audio_frame(frame)?;
            }
        }
        #[cfg(not(windows))]
        let _ = interleaved;

        Ok(())
    }

    /// Teardown on `STOP` (spec §4.8): flush the audio FIFO's tail frame,
    /// send flush sentinels through both queues, and join the workers (the
    /// mux worker writes the trailer itself once it sees the sentinel).
    fn stop(&mut self) {
        let Some(mut movie) = self.movie.take() else { return };

        #[cfg(windows)]
        {
            if let Some(tail) = movie.audio_fifo.as_mut().and_then(|f| f.flush_tail()) {
                let _ = movie.encode_and_mux_audio_frame(tail);
            }
            if let Some(audio) = movie.audio.as_mut() {
                let _ = audio.send_frame(None);
                if let Ok(packets) = audio.receive_packets() {
                    for pkt in packets {
                        let _ = movie.queues.packet_tx.send(PacketJob::Packet(pkt));
                    }
                }
            }
        }

        let _ = movie.queues.frame_tx.send(FrameJob::Flush);
        if let Some(handle) = movie.frame_thread.take() {
            let _ = handle.join();
        }
        let _ = movie.queues.packet_tx.send(PacketJob::Flush);
        if let Some(handle) = movie.mux_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_video_without_a_started_movie_is_an_error() {
        let mut state = EncoderState::default();
        let region = SharedRegion::create(false).unwrap();
        assert!(state.new_video(&region).is_err());
    }

    #[test]
    fn stop_without_a_started_movie_is_a_no_op() {
        let mut state = EncoderState::default();
        state.stop();
        state.stop();
    }
}
