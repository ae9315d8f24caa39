//! 样本源和测试信号
//!
//! 样本统一为交错、左对齐的 i32，由播放器编码成设备格式。

use std::f64::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::decode::DecodeError;

/// 样本源
pub trait SampleSource {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// 填充交错样本，`out.len()` 为声道数的整数倍
    ///
    /// 返回写入的帧数，0 表示结束
    fn read_frames(&mut self, out: &mut [i32]) -> Result<usize, DecodeError>;
}

/// 测试信号波形
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Waveform {
    Sine { frequency: f64 },
    Noise,
}

/// 测试信号源
pub struct ToneSource {
    waveform: Waveform,
    sample_rate: u32,
    channels: usize,
    amplitude: f64,
    /// 剩余帧数（None 表示无限）
    remaining: Option<u64>,
    phase: f64,
    rng: StdRng,
}

impl ToneSource {
    pub fn new(waveform: Waveform, sample_rate: u32, channels: usize, amplitude: f64) -> Self {
        Self {
            waveform,
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            amplitude: amplitude.clamp(0.0, 1.0),
            remaining: None,
            phase: 0.0,
            rng: StdRng::seed_from_u64(0x5eed),
        }
    }

    pub fn sine(frequency: f64, sample_rate: u32, channels: usize, amplitude: f64) -> Self {
        Self::new(Waveform::Sine { frequency }, sample_rate, channels, amplitude)
    }

    pub fn noise(sample_rate: u32, channels: usize, amplitude: f64) -> Self {
        Self::new(Waveform::Noise, sample_rate, channels, amplitude)
    }

    /// 限制播放时长
    pub fn with_duration_secs(mut self, secs: f64) -> Self {
        self.remaining = Some((secs.max(0.0) * self.sample_rate as f64) as u64);
        self
    }

    #[inline]
    fn next_value(&mut self) -> f64 {
        match self.waveform {
            Waveform::Sine { frequency } => {
                let value = (self.phase * TAU).sin();
                self.phase = (self.phase + frequency / self.sample_rate as f64).fract();
                value
            }
            Waveform::Noise => self.rng.gen_range(-1.0..=1.0),
        }
    }
}

impl SampleSource for ToneSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn read_frames(&mut self, out: &mut [i32]) -> Result<usize, DecodeError> {
        let mut frames = out.len() / self.channels;
        if let Some(remaining) = self.remaining {
            frames = frames.min(remaining as usize);
            self.remaining = Some(remaining - frames as u64);
        }

        for frame in out[..frames * self.channels].chunks_exact_mut(self.channels) {
            let sample = (self.next_value() * self.amplitude * i32::MAX as f64) as i32;
            frame.fill(sample);
        }
        Ok(frames)
    }
}
