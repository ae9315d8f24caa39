//! 音频文件解码器
//!
//! 使用 symphonia 解码，输出交错、左对齐的 i32 样本。
//! 支持：WAV, AIFF, FLAC, MP3
//!
//! 不做重采样：按文件本身的采样率打开设备。

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::signal::SampleSource;

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),

    #[error("Unsupported audio format")]
    UnsupportedFormat,

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Failed to create decoder: {0}")]
    DecoderCreation(String),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),
}

/// 音频文件信息
#[derive(Debug, Clone)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: usize,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果已知）
    pub total_frames: Option<u64>,
    pub duration_secs: Option<f64>,
    /// 格式名称（取文件扩展名）
    pub format: String,
    pub codec: String,
}

/// 文件样本源
pub struct FileSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioInfo,
    sample_buf: Option<SampleBuffer<i32>>,
    /// 已解码、尚未读出的样本
    pending: Vec<i32>,
    position: usize,
    eof: bool,
}

impl FileSource {
    /// 打开音频文件
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref();

        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|_| DecodeError::UnsupportedFormat)?;
        let reader = probed.format;

        let format_name = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "Unknown".to_string());

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(2);
        let total_frames = codec_params.n_frames;

        let codec = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = AudioInfo {
            sample_rate,
            channels,
            bit_depth: codec_params.bits_per_sample,
            total_frames,
            duration_secs: total_frames.map(|f| f as f64 / sample_rate as f64),
            format: format_name,
            codec,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        log::debug!(
            "Opened {}: {} Hz, {} ch, {} ({})",
            path.display(),
            info.sample_rate,
            info.channels,
            info.codec,
            info.format
        );

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            sample_buf: None,
            pending: Vec::new(),
            position: 0,
            eof: false,
        })
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    /// 解码下一个 packet 到 pending，文件结束时置 eof
    fn decode_next(&mut self) -> Result<(), DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.eof = true;
                    return Ok(());
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                // 跳过损坏的帧
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let needs_alloc = self
                .sample_buf
                .as_ref()
                .map_or(true, |b| b.capacity() < decoded.capacity() * decoded.spec().channels.count());
            if needs_alloc {
                self.sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
            }

            if let Some(buf) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref(decoded);
                self.pending.clear();
                self.pending.extend_from_slice(buf.samples());
                self.position = 0;
            }
            return Ok(());
        }
    }
}

impl SampleSource for FileSource {
    fn sample_rate(&self) -> u32 {
        self.info.sample_rate
    }

    fn channels(&self) -> usize {
        self.info.channels
    }

    fn read_frames(&mut self, out: &mut [i32]) -> Result<usize, DecodeError> {
        let channels = self.info.channels.max(1);
        let wanted = out.len() / channels * channels;
        let mut filled = 0;

        while filled < wanted {
            if self.position >= self.pending.len() {
                if self.eof {
                    break;
                }
                self.decode_next()?;
                continue;
            }

            let count = (wanted - filled).min(self.pending.len() - self.position);
            out[filled..filled + count]
                .copy_from_slice(&self.pending[self.position..self.position + count]);
            filled += count;
            self.position += count;
        }

        Ok(filled / channels)
    }
}
