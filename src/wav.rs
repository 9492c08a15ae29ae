//! WAV container probe
//!
//! Thin wrapper over the sample source: scans a RIFF/WAVE (or RF64) header
//! for the `fmt ` and `data` chunks and returns the declared format fields.
//! Everything else in the container is ignored; the demodulator consumes the
//! raw PCM bytes that follow.

use std::io::Read;

use crate::error::{DspError, DspResult};
use crate::pcm::PcmSpec;

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> DspResult<()> {
    r.read_exact(buf).map_err(DspError::from_io)
}

fn read_u16<R: Read>(r: &mut R) -> DspResult<u16> {
    let mut b = [0u8; 2];
    read_exact(r, &mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32<R: Read>(r: &mut R) -> DspResult<u32> {
    let mut b = [0u8; 4];
    read_exact(r, &mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Byte-scan forward until the 4-byte `tag` is found
fn scan_for<R: Read>(r: &mut R, tag: &[u8; 4]) -> DspResult<()> {
    let mut window = [0u8; 4];
    let mut filled = 0usize;
    loop {
        let mut byte = [0u8; 1];
        read_exact(r, &mut byte)?;
        if filled < 4 {
            window[filled] = byte[0];
            filled += 1;
        } else {
            window.rotate_left(1);
            window[3] = byte[0];
        }
        if filled == 4 && &window == tag {
            return Ok(());
        }
    }
}

/// Parse a RIFF/WAVE or RF64 header, leaving the reader positioned at the
/// first PCM byte of the `data` chunk.
///
/// Only the declared format fields are read; all other chunks are skipped
/// by the byte scan. Bit depths other than 8/16/32 are rejected.
pub fn read_wav_header<R: Read>(r: &mut R) -> DspResult<PcmSpec> {
    let mut tag = [0u8; 4];
    read_exact(r, &mut tag)?;
    if &tag != b"RIFF" && &tag != b"RF64" {
        return Err(DspError::UnsupportedFormat {
            msg: "missing RIFF/RF64 tag".into(),
        });
    }

    read_exact(r, &mut tag)?; // chunk size
    read_exact(r, &mut tag)?;
    if &tag != b"WAVE" {
        return Err(DspError::UnsupportedFormat {
            msg: "missing WAVE tag".into(),
        });
    }

    scan_for(r, b"fmt ")?;
    let _fmt_size = read_u32(r)?;
    let _audio_format = read_u16(r)?;
    let channels = read_u16(r)?;
    let mut sample_rate = read_u32(r)?;
    let _byte_rate = read_u32(r)?;
    let _block_align = read_u16(r)?;
    let bits_per_sample = read_u16(r)?;

    scan_for(r, b"data")?;
    let _data_size = read_u32(r)?;

    if bits_per_sample != 8 && bits_per_sample != 16 && bits_per_sample != 32 {
        return Err(DspError::UnsupportedFormat {
            msg: format!("unsupported bit depth: {}", bits_per_sample),
        });
    }
    if channels == 0 {
        return Err(DspError::UnsupportedFormat {
            msg: "zero channels".into(),
        });
    }

    // rtl_sdr tags resampled streams as 900001 Hz
    if sample_rate == 900001 {
        sample_rate -= 1;
    }

    Ok(PcmSpec {
        sample_rate,
        bits_per_sample,
        channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parses_hound_output() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut bytes, spec).unwrap();
            for i in 0..64i16 {
                writer.write_sample(i).unwrap();
            }
            writer.finalize().unwrap();
        }
        bytes.set_position(0);

        let parsed = read_wav_header(&mut bytes).unwrap();
        assert_eq!(parsed.sample_rate, 48000);
        assert_eq!(parsed.bits_per_sample, 16);
        assert_eq!(parsed.channels, 2);

        // reader is at the first data byte: sample 0 follows
        let mut b = [0u8; 2];
        bytes.read_exact(&mut b).unwrap();
        assert_eq!(i16::from_le_bytes(b), 0);
        bytes.read_exact(&mut b).unwrap();
        assert_eq!(i16::from_le_bytes(b), 1);
    }

    #[test]
    fn test_rf64_tag_accepted() {
        // minimal synthetic header: RF64 ... WAVE fmt(16) data(0)
        let mut v = Vec::new();
        v.extend_from_slice(b"RF64");
        v.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        v.extend_from_slice(b"WAVE");
        v.extend_from_slice(b"fmt ");
        v.extend_from_slice(&16u32.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes()); // PCM
        v.extend_from_slice(&2u16.to_le_bytes()); // channels
        v.extend_from_slice(&2_000_000u32.to_le_bytes());
        v.extend_from_slice(&8_000_000u32.to_le_bytes());
        v.extend_from_slice(&4u16.to_le_bytes());
        v.extend_from_slice(&16u16.to_le_bytes());
        v.extend_from_slice(b"data");
        v.extend_from_slice(&0u32.to_le_bytes());

        let parsed = read_wav_header(&mut Cursor::new(v)).unwrap();
        assert_eq!(parsed.sample_rate, 2_000_000);
        assert_eq!(parsed.channels, 2);
    }

    #[test]
    fn test_rtl_sdr_rate_tag() {
        let mut v = Vec::new();
        v.extend_from_slice(b"RIFF");
        v.extend_from_slice(&36u32.to_le_bytes());
        v.extend_from_slice(b"WAVE");
        v.extend_from_slice(b"fmt ");
        v.extend_from_slice(&16u32.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes());
        v.extend_from_slice(&2u16.to_le_bytes());
        v.extend_from_slice(&900_001u32.to_le_bytes());
        v.extend_from_slice(&3_600_004u32.to_le_bytes());
        v.extend_from_slice(&4u16.to_le_bytes());
        v.extend_from_slice(&16u16.to_le_bytes());
        v.extend_from_slice(b"data");
        v.extend_from_slice(&0u32.to_le_bytes());

        let parsed = read_wav_header(&mut Cursor::new(v)).unwrap();
        assert_eq!(parsed.sample_rate, 900_000);
    }

    #[test]
    fn test_truncated_header_is_end_of_stream() {
        let mut v = Vec::new();
        v.extend_from_slice(b"RIFF");
        v.extend_from_slice(&36u32.to_le_bytes());
        v.extend_from_slice(b"WAVE");
        let err = read_wav_header(&mut Cursor::new(v)).unwrap_err();
        assert!(matches!(err, DspError::EndOfStream));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = read_wav_header(&mut Cursor::new(b"OggS garbage".to_vec())).unwrap_err();
        assert!(matches!(err, DspError::UnsupportedFormat { .. }));
    }
}
