//! 16-bit PCM WAV encoding
//!
//! Layout is the canonical 44-byte RIFF header followed by interleaved
//! little-endian `i16` samples. Samples are clamped to [-1, 1] and scaled by
//! `0x7FFF` when positive and `0x8000` when negative.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};
use timbre_core::domain::AudioBlock;

use crate::error::ExportError;

type Result<T> = std::result::Result<T, ExportError>;

/// Size of the RIFF/WAVE header
pub const WAV_HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: u32 = 2;
const PCM_FORMAT: u16 = 1;

#[inline]
fn to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

fn check_format(len: usize, channels: u16, sample_rate: u32) -> Result<u32> {
    if channels == 0 {
        return Err(ExportError::InvalidFormat("channel count must be positive".to_string()));
    }
    if sample_rate == 0 {
        return Err(ExportError::InvalidFormat("sample rate must be positive".to_string()));
    }
    if len % channels as usize != 0 {
        return Err(ExportError::InvalidFormat(format!(
            "{} samples do not divide into {} channels",
            len, channels
        )));
    }
    u32::try_from(len)
        .ok()
        .and_then(|n| n.checked_mul(BYTES_PER_SAMPLE))
        .filter(|bytes| bytes.checked_add(36).is_some())
        .ok_or_else(|| ExportError::InvalidFormat(format!("{} samples exceed WAV size limit", len)))
}

/// Write interleaved `samples` as a WAV stream
pub fn write_wav<W: Write>(
    writer: &mut W,
    samples: &[f32],
    channels: u16,
    sample_rate: u32,
) -> Result<()> {
    let data_bytes = check_format(samples.len(), channels, sample_rate)?;
    let block_align = channels as u32 * BYTES_PER_SAMPLE;

    writer.write_all(b"RIFF")?;
    writer.write_all(&(36 + data_bytes).to_le_bytes())?;
    writer.write_all(b"WAVE")?;
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&PCM_FORMAT.to_le_bytes())?;
    writer.write_all(&channels.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&(sample_rate * block_align).to_le_bytes())?;
    writer.write_all(&(block_align as u16).to_le_bytes())?;
    writer.write_all(&BITS_PER_SAMPLE.to_le_bytes())?;
    writer.write_all(b"data")?;
    writer.write_all(&data_bytes.to_le_bytes())?;

    for &sample in samples {
        writer.write_all(&to_i16(sample).to_le_bytes())?;
    }
    Ok(())
}

/// Encode interleaved `samples` into an in-memory WAV file
pub fn encode_wav(samples: &[f32], channels: u16, sample_rate: u32) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2);
    write_wav(&mut bytes, samples, channels, sample_rate)?;
    Ok(bytes)
}

/// Encode the live frames of a planar block
pub fn encode_block(block: &AudioBlock, sample_rate: u32) -> Result<Vec<u8>> {
    let channels = u16::try_from(block.channels())
        .map_err(|_| ExportError::InvalidFormat("too many channels".to_string()))?;
    let mut interleaved = vec![0.0; block.frames() * block.channels()];
    block.write_interleaved(&mut interleaved);
    encode_wav(&interleaved, channels, sample_rate)
}

/// Write interleaved `samples` to a WAV file at `path`
pub fn save_wav<P: AsRef<Path>>(
    path: P,
    samples: &[f32],
    channels: u16,
    sample_rate: u32,
) -> Result<()> {
    let path = path.as_ref();
    info!(path = %path.display(), channels, sample_rate, "Writing WAV");

    let mut writer = BufWriter::new(File::create(path)?);
    write_wav(&mut writer, samples, channels, sample_rate)?;
    writer.flush()?;

    debug!(frames = samples.len() / channels.max(1) as usize, "WAV written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_one_second_of_silence() {
        let bytes = encode_wav(&vec![0.0; 44100], 1, 44100).unwrap();
        assert_eq!(bytes.len(), 44 + 88200);

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36 + 88200);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(bytes[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(bytes[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(bytes[24..28].try_into().unwrap()), 44100);
        assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 88200);
        assert_eq!(u16::from_le_bytes(bytes[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(bytes[34..36].try_into().unwrap()), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 88200);
        assert!(bytes[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sample_scaling() {
        assert_eq!(to_i16(1.0), 32767);
        assert_eq!(to_i16(-1.0), -32768);
        assert_eq!(to_i16(2.0), 32767);
        assert_eq!(to_i16(-3.0), -32768);
        assert_eq!(to_i16(0.5), 16383);
        assert_eq!(to_i16(-0.5), -16384);
        assert_eq!(to_i16(f32::NAN), 0);
    }

    #[test]
    fn test_stereo_header_fields() {
        let bytes = encode_wav(&[0.0; 8], 2, 48000).unwrap();
        assert_eq!(u32::from_le_bytes(bytes[28..32].try_into().unwrap()), 48000 * 4);
        assert_eq!(u16::from_le_bytes(bytes[32..34].try_into().unwrap()), 4);
        assert_eq!(bytes.len(), 44 + 16);
    }

    #[test]
    fn test_invalid_format() {
        assert!(matches!(encode_wav(&[0.0; 3], 2, 48000), Err(ExportError::InvalidFormat(_))));
        assert!(matches!(encode_wav(&[0.0; 2], 0, 48000), Err(ExportError::InvalidFormat(_))));
        assert!(matches!(encode_wav(&[0.0; 2], 1, 0), Err(ExportError::InvalidFormat(_))));
    }

    #[test]
    fn test_saved_file_reads_back_with_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let samples = [0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
        save_wav(&path, &samples, 2, 22050).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, vec![0, 16383, -16384, 32767, -32768, 8191]);
    }

    #[test]
    fn test_block_is_interleaved() {
        let block = AudioBlock::from_channels(&[vec![1.0, 1.0], vec![-1.0, -1.0]]);
        let bytes = encode_block(&block, 8000).unwrap();
        let samples: Vec<i16> = bytes[44..]
            .chunks(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![32767, -32768, 32767, -32768]);
    }

    proptest! {
        #[test]
        fn prop_length_matches_samples(frames in 0usize..500, channels in 1u16..4) {
            let samples = vec![0.1; frames * channels as usize];
            let bytes = encode_wav(&samples, channels, 44100).unwrap();
            prop_assert_eq!(bytes.len(), WAV_HEADER_LEN + samples.len() * 2);
        }
    }
}
