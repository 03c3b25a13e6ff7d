//! # Audio Plumbing
//!
//! Byte-level helpers shared by the recognition path:
//!
//! - **ingest**: the bounded per-session queue that audio chunks are pushed into
//! - **wav**: PCM format description and the streaming WAV header sent ahead of
//!   the first chunk
//!
//! ## Audio Format Expectations:
//! - **Sample Rate**: 16kHz
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono
//!
//! Clients send whatever chunk sizes their recorder produces. Nothing here
//! re-slices or transcodes audio; chunk boundaries carry no meaning.

pub mod ingest;
pub mod wav;

pub use ingest::{AudioIngest, PushError};
pub use wav::PcmFormat;
