//! Container guessing and the codec lookup tables from spec §4.8 steps 2–7:
//! `(profile_name → {codec_name, preferred_pix_fmt, setup_fn})` for video,
//! plus container↔codec compatibility.

use svr_shared::error::MovieStartError;
use svr_shared::pixel_format::OutputFormat;
use svr_shared::profile::{MovieProfile, VideoEncoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Mkv,
    Mov,
    Avi,
}

/// Guesses the container from the destination extension (spec §4.8 step 2,
/// spec §6: ".mp4, .mkv, .mov, .avi").
pub fn guess_container(dest_path: &str) -> Option<Container> {
    let ext = dest_path.rsplit('.').next()?.to_ascii_lowercase();
    match ext.as_str() {
        "mp4" => Some(Container::Mp4),
        "mkv" => Some(Container::Mkv),
        "mov" => Some(Container::Mov),
        "avi" => Some(Container::Avi),
        _ => None,
    }
}

impl Container {
    pub fn ffmpeg_short_name(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "matroska",
            Container::Mov => "mov",
            Container::Avi => "avi",
        }
    }

    /// Spec §4.8 step 5: "Query container × codec compatibility; fail if
    /// incompatible." AVI's codec support is narrow enough in practice that
    /// DNxHR (which needs a MOV-family or MKV muxer for its metadata) is
    /// rejected here; every other pairing in this table is accepted and any
    /// further rejection is left to the real muxer at open time.
    pub fn supports(self, encoder: VideoEncoder) -> bool {
        !(self == Container::Avi && encoder == VideoEncoder::Dnxhr)
    }
}

/// One video codec table row (spec §4.8 step 4/7).
#[derive(Debug)]
pub struct VideoCodecRow {
    pub codec_name: &'static str,
    pub preferred_pix_fmt: OutputFormat,
}

pub fn lookup_video_codec(encoder: VideoEncoder, profile: &MovieProfile) -> VideoCodecRow {
    VideoCodecRow {
        codec_name: match encoder {
            VideoEncoder::Libx264 => "libx264",
            VideoEncoder::Libx264rgb => "libx264rgb",
            VideoEncoder::Dnxhr => "dnxhr",
        },
        preferred_pix_fmt: encoder.preferred_pixel_format(profile.dnxhr_profile),
    }
}

/// One audio codec table row (spec §4.8 step 10: "repeat steps 4-9 for
/// audio with its own table"). AAC is the one audio codec every one of the
/// four supported containers muxes without extra configuration.
pub struct AudioCodecRow {
    pub codec_name: &'static str,
}

pub fn lookup_audio_codec() -> AudioCodecRow {
    AudioCodecRow { codec_name: "aac" }
}

/// Full startup validation ahead of actually opening the container/codec
/// (spec §4.8 steps 2–5), layered on top of [`MovieProfile::validate`]'s
/// profile-only checks.
pub fn validate_startup(
    profile: &MovieProfile,
    dest_path: &str,
    width: u32,
    height: u32,
) -> Result<(Container, VideoCodecRow), MovieStartError> {
    profile.validate(width, height)?;

    let container = guess_container(dest_path)
        .ok_or_else(|| MovieStartError::ContainerCodecMismatch(format!("unrecognized container extension: {dest_path}")))?;
    let row = lookup_video_codec(profile.video_encoder, profile);
    if !container.supports(profile.video_encoder) {
        return Err(MovieStartError::ContainerCodecMismatch(format!(
            "{:?} cannot hold a {} stream",
            container,
            profile.video_encoder.name()
        )));
    }
    Ok((container, row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guesses_container_from_extension_case_insensitively() {
        assert_eq!(guess_container("out.MP4"), Some(Container::Mp4));
        assert_eq!(guess_container("out.mkv"), Some(Container::Mkv));
        assert_eq!(guess_container("out.mov"), Some(Container::Mov));
        assert_eq!(guess_container("out.avi"), Some(Container::Avi));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert_eq!(guess_container("out.webm"), None);
        assert_eq!(guess_container("no_extension"), None);
    }

    #[test]
    fn avi_rejects_dnxhr() {
        assert!(!Container::Avi.supports(VideoEncoder::Dnxhr));
        assert!(Container::Mp4.supports(VideoEncoder::Libx264));
        assert!(Container::Mov.supports(VideoEncoder::Dnxhr));
    }

    #[test]
    fn validate_startup_rejects_dnxhr_into_avi() {
        let mut profile = MovieProfile::default();
        profile.video_encoder = VideoEncoder::Dnxhr;
        let err = validate_startup(&profile, "out.avi", 1920, 1080).unwrap_err();
        assert!(matches!(err, MovieStartError::ContainerCodecMismatch(_)));
    }

    #[test]
    fn video_codec_lookup_returns_profiles_preferred_pixel_format() {
        let mut profile = MovieProfile::default();
        profile.video_encoder = VideoEncoder::Libx264;
        let row = lookup_video_codec(profile.video_encoder, &profile);
        assert_eq!(row.codec_name, "libx264");
        assert_eq!(row.preferred_pix_fmt, OutputFormat::Nv12);
    }
}
