//! Decode WAV or MP3 bytes into a mono [`SampleBuffer`].

use std::io::Cursor;

use super::sampler::SampleBuffer;

/// Decode an encoded file. WAV is recognised by its RIFF/WAVE header,
/// anything else is handed to the MP3 decoder.
pub fn decode_audio(bytes: &[u8]) -> Result<SampleBuffer, String> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

pub fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer, String> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>()
            .map_err(|e| e.to_string())?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| e.to_string())?
        }
    };

    if interleaved.is_empty() {
        return Err("WAV file holds no samples".to_string());
    }
    Ok(SampleBuffer::new(downmix(&interleaved, channels), spec.sample_rate))
}

pub fn decode_mp3(bytes: &[u8]) -> Result<SampleBuffer, String> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut data = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 && frame.sample_rate > 0 {
                    sample_rate = frame.sample_rate as u32;
                }
                let pcm: Vec<f64> = frame.data.iter().map(|&s| s as f64 / 32768.0).collect();
                data.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::SkippedData) => continue,
            Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => break,
            Err(e) => return Err(format!("{e:?}")),
        }
    }

    if data.is_empty() || sample_rate == 0 {
        return Err("no MP3 frames found".to_string());
    }
    Ok(SampleBuffer::new(data, sample_rate))
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f64], channels: usize) -> Vec<f64> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f64>() / frame.len() as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        bytes
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let bytes = wav_bytes(2, &[16384, 0, -16384, -16384]);
        let buf = decode_audio(&bytes).unwrap();
        assert_eq!(buf.sample_rate, 22050);
        assert_eq!(buf.len(), 2);
        assert!((buf.data[0] - 0.25).abs() < 1e-4, "got {}", buf.data[0]);
        assert!((buf.data[1] + 0.5).abs() < 1e-4, "got {}", buf.data[1]);
    }

    #[test]
    fn empty_wav_is_a_failure() {
        let bytes = wav_bytes(1, &[]);
        assert!(decode_audio(&bytes).is_err());
    }

    #[test]
    fn garbage_is_a_failure() {
        let err = decode_audio(b"definitely not audio").unwrap_err();
        assert!(!err.is_empty());
    }
}
