//! Capture sinks: the canonical frame as PNG, drained audio as WAV.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use retrohost_core::FrameBuffer;

pub fn write_png(path: &Path, frame: &FrameBuffer) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width(), frame.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);

    let mut writer = encoder.write_header()?;
    writer.write_image_data(frame.pixels())?;
    writer.finish()?;
    Ok(())
}

/// Interleaved stereo `f32` collected across frames.
#[derive(Debug, Default)]
pub struct AudioCapture {
    samples: Vec<f32>,
}

impl AudioCapture {
    /// Append `frames` stereo frames pulled by `read`.
    pub fn drain(&mut self, frames: usize, read: impl FnOnce(&mut [f32]) -> usize) {
        if frames == 0 {
            return;
        }
        let start = self.samples.len();
        self.samples.resize(start + frames * 2, 0.0);
        let got = read(&mut self.samples[start..]);
        self.samples.truncate(start + got.min(frames) * 2);
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    pub fn write_wav(&self, path: &Path, sample_rate: u32) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("create {}", path.display()))?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("retrohost-{}-{name}", std::process::id()))
    }

    #[test]
    fn png_has_frame_dimensions() {
        let path = temp("frame.png");
        write_png(&path, &FrameBuffer::new(5, 3)).unwrap();

        let decoder = png::Decoder::new(File::open(&path).unwrap());
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        assert_eq!((info.width, info.height), (5, 3));
        assert_eq!(info.color_type, png::ColorType::Rgba);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wav_keeps_drained_frames() {
        let mut capture = AudioCapture::default();
        capture.drain(3, |out| {
            out.fill(0.5);
            3
        });
        capture.drain(0, |_| unreachable!());
        assert_eq!(capture.frames(), 3);

        let path = temp("audio.wav");
        capture.write_wav(&path, 32_000).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 32_000);
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 6);
        let _ = std::fs::remove_file(&path);
    }
}
