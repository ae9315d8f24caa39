//! 播放循环
//!
//! 驱动外部调用方的标准循环：填充 → 等待 → 写出，
//! 直到样本源结束、用户中断或会话被禁用。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::audio::format::AudioSpec;
use crate::audio::pacing::WaitOutcome;
use crate::audio::stats::StatsReport;
use crate::decode::DecodeError;
use crate::driver::AudioDriver;
use crate::error::OutputError;
use crate::signal::SampleSource;

/// 播放结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 样本源结束
    Finished,
    /// 用户中断
    Interrupted,
    /// 会话因致命写错误被禁用
    Disabled,
}

/// 播放汇总
#[derive(Debug, Clone)]
pub struct PlaybackSummary {
    pub reason: StopReason,
    pub chunks: u64,
    pub frames: u64,
    pub wait_timeouts: u64,
    pub elapsed_secs: f64,
    pub stats: Option<StatsReport>,
}

/// 按声道选择映射：目标声道 c 取源声道 min(c, 源声道数 - 1)，不混音
pub fn map_channels(src: &[i32], src_channels: usize, dst: &mut [i32], dst_channels: usize) -> usize {
    let src_channels = src_channels.max(1);
    let dst_channels = dst_channels.max(1);
    let frames = (src.len() / src_channels).min(dst.len() / dst_channels);

    for (in_frame, out_frame) in src
        .chunks_exact(src_channels)
        .zip(dst.chunks_exact_mut(dst_channels))
        .take(frames)
    {
        for (c, out) in out_frame.iter_mut().enumerate() {
            *out = in_frame[c.min(src_channels - 1)];
        }
    }
    frames
}

/// 播放器
pub struct Player<'a> {
    driver: &'a mut dyn AudioDriver,
    spec: AudioSpec,
    stop: Arc<AtomicBool>,
}

impl<'a> Player<'a> {
    /// `spec` 为 open 之后回写的实际参数
    pub fn new(driver: &'a mut dyn AudioDriver, spec: AudioSpec, stop: Arc<AtomicBool>) -> Self {
        Self { driver, spec, stop }
    }

    /// 播放直到结束
    pub fn play(&mut self, source: &mut dyn SampleSource) -> Result<PlaybackSummary, DecodeError> {
        let start = Instant::now();
        let frames_per_chunk = self.spec.samples.max(1) as usize;
        let src_channels = source.channels().max(1);
        let dst_channels = self.spec.channels.max(1) as usize;

        let mut input = vec![0i32; frames_per_chunk * src_channels];
        let mut mapped = vec![0i32; frames_per_chunk * dst_channels];

        let mut chunks = 0u64;
        let mut frames_total = 0u64;
        let mut wait_timeouts = 0u64;

        let reason = loop {
            if self.stop.load(Ordering::Relaxed) {
                break StopReason::Interrupted;
            }
            if !self.driver.is_enabled() {
                break StopReason::Disabled;
            }

            let frames = source.read_frames(&mut input)?;
            if frames == 0 {
                break StopReason::Finished;
            }
            let frames = map_channels(
                &input[..frames * src_channels],
                src_channels,
                &mut mapped,
                dst_channels,
            );

            let Some(buf) = self.driver.audio_buf() else {
                break StopReason::Disabled;
            };
            let written = self.spec.format.encode(&mapped[..frames * dst_channels], buf.as_mut_slice());
            // 最后一块不足时补静音，整块写出
            let silence = buf.silence();
            buf.as_mut_slice()[written..].fill(silence);
            let capacity = buf.capacity();
            buf.set_len(capacity);

            if self.driver.wait_audio() == WaitOutcome::TimedOut {
                wait_timeouts += 1;
            }

            match self.driver.play_audio() {
                Ok(_) => {
                    chunks += 1;
                    frames_total += frames as u64;
                }
                Err(OutputError::FatalWrite { .. }) | Err(OutputError::Disabled) => {
                    break StopReason::Disabled;
                }
                Err(e) => {
                    log::warn!("{}: {}", self.driver.name(), e);
                    break StopReason::Disabled;
                }
            }
        };

        log::info!(
            "Playback ended ({:?}): {} chunks, {} frames",
            reason,
            chunks,
            frames_total
        );

        Ok(PlaybackSummary {
            reason,
            chunks,
            frames: frames_total,
            wait_timeouts,
            elapsed_secs: start.elapsed().as_secs_f64(),
            stats: self.driver.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::PlaybackBuffer;
    use crate::audio::format::SampleFormat;
    use crate::signal::ToneSource;

    /// 记录写出内容的驱动
    struct RecordingDriver {
        buffer: Option<PlaybackBuffer>,
        writes: Vec<Vec<u8>>,
        fail_after: Option<usize>,
        enabled: bool,
        waits: usize,
    }

    impl RecordingDriver {
        fn new(spec: &AudioSpec) -> Self {
            Self {
                buffer: Some(PlaybackBuffer::allocate(spec.size, spec.silence).unwrap()),
                writes: Vec::new(),
                fail_after: None,
                enabled: true,
                waits: 0,
            }
        }
    }

    impl AudioDriver for RecordingDriver {
        fn name(&self) -> &str {
            "recording"
        }

        fn open(&mut self, _spec: &mut AudioSpec) -> Result<(), OutputError> {
            Ok(())
        }

        fn wait_audio(&mut self) -> WaitOutcome {
            self.waits += 1;
            WaitOutcome::Ready
        }

        fn play_audio(&mut self) -> Result<usize, OutputError> {
            if self.fail_after == Some(self.writes.len()) {
                self.enabled = false;
                return Err(OutputError::FatalWrite {
                    written: 0,
                    source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
                });
            }
            let buf = self.buffer.as_ref().ok_or(OutputError::Closed)?;
            self.writes.push(buf.staged().to_vec());
            Ok(buf.len())
        }

        fn audio_buf(&mut self) -> Option<&mut PlaybackBuffer> {
            self.buffer.as_mut()
        }

        fn close(&mut self) {
            self.buffer = None;
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn stats(&self) -> Option<StatsReport> {
            None
        }
    }

    #[test]
    fn test_map_channels_by_selection() {
        let mut out = [0i32; 6];
        assert_eq!(map_channels(&[1, 2, 3], 1, &mut out, 2), 3);
        assert_eq!(out, [1, 1, 2, 2, 3, 3]);

        let mut out = [0i32; 2];
        assert_eq!(map_channels(&[1, 2, 3, 4], 2, &mut out, 1), 2);
        assert_eq!(out, [1, 3]);
    }

    #[test]
    fn test_last_chunk_padded_with_silence() {
        let spec = AudioSpec::new(SampleFormat::U8, 1000, 1, 8);
        let mut driver = RecordingDriver::new(&spec);
        let mut source = ToneSource::sine(250.0, 1000, 1, 1.0).with_duration_secs(0.0125);

        let summary = Player::new(&mut driver, spec, Arc::new(AtomicBool::new(false)))
            .play(&mut source)
            .unwrap();

        assert_eq!(summary.reason, StopReason::Finished);
        assert_eq!(summary.chunks, 2);
        assert_eq!(summary.frames, 12);
        assert_eq!(driver.waits, 2);
        assert_eq!(driver.writes.len(), 2);
        assert!(driver.writes.iter().all(|w| w.len() == 8));
        // 第二块：4 帧信号 + 4 字节静音
        assert_eq!(&driver.writes[1][4..], &[0x80; 4]);
        // 正弦起点为 0 → U8 零点
        assert_eq!(driver.writes[0][0], 0x80);
    }

    #[test]
    fn test_fatal_write_stops_playback() {
        let spec = AudioSpec::new(SampleFormat::S16Msb, 8000, 2, 16);
        let mut driver = RecordingDriver::new(&spec);
        driver.fail_after = Some(1);
        let mut source = ToneSource::noise(8000, 2, 0.5);

        let summary = Player::new(&mut driver, spec, Arc::new(AtomicBool::new(false)))
            .play(&mut source)
            .unwrap();

        assert_eq!(summary.reason, StopReason::Disabled);
        assert_eq!(summary.chunks, 1);
        assert_eq!(driver.writes.len(), 1);
    }

    #[test]
    fn test_stop_flag_interrupts() {
        let spec = AudioSpec::new(SampleFormat::S8, 8000, 1, 16);
        let mut driver = RecordingDriver::new(&spec);
        let mut source = ToneSource::sine(440.0, 8000, 1, 0.5);

        let summary = Player::new(&mut driver, spec, Arc::new(AtomicBool::new(true)))
            .play(&mut source)
            .unwrap();

        assert_eq!(summary.reason, StopReason::Interrupted);
        assert!(driver.writes.is_empty());
    }
}
