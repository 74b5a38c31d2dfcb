//! `clipcap`: cut titled clips out of a master video and caption them.
//!
//! A run goes manifest → plan → cut → transcribe → subtitle file → embed, one bounded-pool
//! job per clip. Most consumers start at [`pipeline::Pipeline`]; the stages are usable on
//! their own.

// Input model.
pub mod layout;
pub mod manifest;
pub mod plan;
pub mod timecode;

// Stages.
pub mod captions;
pub mod extractor;
pub mod media;
pub mod transcriber;

// Orchestration.
pub mod cancel;
pub mod opts;
pub mod pipeline;
pub mod pool;

// Encoders and audio.
pub mod srt_encoder;
pub mod wav;

mod error;
pub use error::{Error, ErrorClass, Result};

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;
