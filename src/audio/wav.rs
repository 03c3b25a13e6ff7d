//! Streaming WAV header.
//!
//! Recognition services that accept a raw audio stream still expect a RIFF
//! header in front of the first PCM bytes. For a live stream the total length
//! is unknown, so both size fields are written as zero.

use byteorder::{ByteOrder, LittleEndian};

/// Size of a canonical PCM WAV header in bytes.
pub const HEADER_LEN: usize = 44;

/// Raw PCM layout of the incoming audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// 16kHz, 16-bit, mono. What mobile recorders are asked to produce.
    pub const SPEECH: PcmFormat = PcmFormat {
        sample_rate: 16_000,
        channels: 1,
        bits_per_sample: 16,
    };

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    /// Header for a stream of unknown length.
    pub fn stream_header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];

        header[0..4].copy_from_slice(b"RIFF");
        LittleEndian::write_u32(&mut header[4..8], 0);
        header[8..12].copy_from_slice(b"WAVE");

        header[12..16].copy_from_slice(b"fmt ");
        LittleEndian::write_u32(&mut header[16..20], 16);
        LittleEndian::write_u16(&mut header[20..22], 1); // PCM
        LittleEndian::write_u16(&mut header[22..24], self.channels);
        LittleEndian::write_u32(&mut header[24..28], self.sample_rate);
        LittleEndian::write_u32(&mut header[28..32], self.byte_rate());
        LittleEndian::write_u16(&mut header[32..34], self.block_align());
        LittleEndian::write_u16(&mut header[34..36], self.bits_per_sample);

        header[36..40].copy_from_slice(b"data");
        LittleEndian::write_u32(&mut header[40..44], 0);

        header
    }
}
