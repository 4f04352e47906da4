//! Typed error surface for the event RPC (spec §4.2).

use thiserror::Error;

/// Outcome of `send_event` as seen by the Capturer.
///
/// `Ok(())` is the success case; the two failure variants are distinguished
/// because the Capturer must treat them differently (spec §4.2, §7):
/// `GameExit` means the Encoder process died and the movie must be aborted
/// immediately, while `EncoderError` carries a message that should be
/// surfaced to the game console and the log file before teardown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The Encoder process handle signaled before `game_wake` did — the
    /// Encoder died mid-RPC. Fatal to the movie (spec §4.2, §7).
    #[error("encoder process exited unexpectedly")]
    GameExit,

    /// The Encoder acked with `error = 1`. The message is whatever the
    /// Encoder wrote into the shared `error_message` field.
    #[error("encoder reported an error: {0}")]
    EncoderError(String),
}

/// Failures specific to validating a [`crate::profile::MovieProfile`] or
/// opening a movie (spec §4.8, §4.9, §7 "fatal-to-movie-start").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MovieStartError {
    #[error("unknown video codec profile: {0}")]
    UnknownVideoCodec(String),

    #[error("container/codec incompatibility: {0}")]
    ContainerCodecMismatch(String),

    #[error("mosample_mult must be >= 2 when mosample_enabled is true")]
    MosampleMultTooSmall,

    #[error("{encoder} does not support pixel format {format}")]
    UnsupportedPixelFormat { encoder: String, format: String },

    #[error("odd dimension {width}x{height} is not valid for YUV output")]
    OddDimensionForYuv { width: u32, height: u32 },

    #[error("font not found for family={family:?} weight={weight} stretch={stretch} style={style:?}")]
    FontNotFound {
        family: String,
        weight: u32,
        stretch: u32,
        style: String,
    },

    #[error("failed to open codec: {0}")]
    CodecOpenFailed(String),

    #[error("failed to open shared texture: {0}")]
    SharedTextureOpenFailed(String),
}
