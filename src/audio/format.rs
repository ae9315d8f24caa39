//! 样本格式、候选表和样本编码
//!
//! 内部样本表示：所有位深统一左对齐到 i32 的高位
//! - 8-bit: 占据 bit[31:24]
//! - 16-bit: 占据 bit[31:16]
//!
//! 设备端只支持 8/16-bit 整数 PCM，编码时从高位截取。

use std::fmt;
use std::str::FromStr;

/// 样本编码
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    S8,
    S16Lsb,
    S16Msb,
    U16Lsb,
    U16Msb,
}

/// 字节序
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// 数值表示
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberFormat {
    Signed,
    Unsigned,
    TwosComplement,
}

/// 协商时尝试的一个候选
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatCandidate {
    pub format: SampleFormat,
    pub bits_per_sample: u16,
    pub byte_order: ByteOrder,
    pub number_format: NumberFormat,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 6] = [
        Self::U8,
        Self::S8,
        Self::S16Lsb,
        Self::S16Msb,
        Self::U16Lsb,
        Self::U16Msb,
    ];

    /// 固定的回退顺序，第一个元素总是请求的格式本身
    ///
    /// 顺序是设备能力偏好，不由调用方控制：
    /// 同位深优先，其次同符号，最后才跨位深。
    pub fn fallback_order(self) -> [SampleFormat; 6] {
        use SampleFormat::*;
        match self {
            U8 => [U8, S8, S16Lsb, S16Msb, U16Lsb, U16Msb],
            S8 => [S8, U8, S16Lsb, S16Msb, U16Lsb, U16Msb],
            S16Lsb => [S16Lsb, S16Msb, U16Lsb, U16Msb, U8, S8],
            S16Msb => [S16Msb, S16Lsb, U16Msb, U16Lsb, U8, S8],
            U16Lsb => [U16Lsb, U16Msb, S16Lsb, S16Msb, U8, S8],
            U16Msb => [U16Msb, U16Lsb, S16Msb, S16Lsb, U8, S8],
        }
    }

    #[inline]
    pub fn bits_per_sample(self) -> u16 {
        match self {
            Self::U8 | Self::S8 => 8,
            _ => 16,
        }
    }

    #[inline]
    pub fn bytes_per_sample(self) -> usize {
        self.bits_per_sample() as usize / 8
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        matches!(self, Self::S8 | Self::S16Lsb | Self::S16Msb)
    }

    /// 8-bit 格式的字节序无意义，按大端报告
    #[inline]
    pub fn byte_order(self) -> ByteOrder {
        match self {
            Self::S16Lsb | Self::U16Lsb => ByteOrder::Little,
            _ => ByteOrder::Big,
        }
    }

    /// 设备层的编码参数
    pub fn candidate(self) -> FormatCandidate {
        FormatCandidate {
            format: self,
            bits_per_sample: self.bits_per_sample(),
            byte_order: self.byte_order(),
            number_format: if self.is_signed() {
                NumberFormat::TwosComplement
            } else {
                NumberFormat::Unsigned
            },
        }
    }

    /// 静音字节：无符号 8-bit 的零点是 0x80，其余为 0x00
    #[inline]
    pub fn silence(self) -> u8 {
        match self {
            Self::U8 => 0x80,
            _ => 0x00,
        }
    }

    /// 将 i32 样本（左对齐）编码为本格式的字节
    ///
    /// 返回写入的字节数，受 `output` 容量限制
    pub fn encode(self, samples: &[i32], output: &mut [u8]) -> usize {
        let width = self.bytes_per_sample();
        let count = samples.len().min(output.len() / width);

        for (sample, chunk) in samples[..count].iter().zip(output.chunks_exact_mut(width)) {
            match self {
                Self::U8 => chunk[0] = ((sample >> 24) as i8 as u8) ^ 0x80,
                Self::S8 => chunk[0] = (sample >> 24) as i8 as u8,
                Self::S16Lsb => chunk.copy_from_slice(&((sample >> 16) as i16).to_le_bytes()),
                Self::S16Msb => chunk.copy_from_slice(&((sample >> 16) as i16).to_be_bytes()),
                Self::U16Lsb => {
                    let v = ((sample >> 16) as i16 as u16) ^ 0x8000;
                    chunk.copy_from_slice(&v.to_le_bytes());
                }
                Self::U16Msb => {
                    let v = ((sample >> 16) as i16 as u16) ^ 0x8000;
                    chunk.copy_from_slice(&v.to_be_bytes());
                }
            }
        }

        count * width
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "u8",
            Self::S8 => "s8",
            Self::S16Lsb => "s16lsb",
            Self::S16Msb => "s16msb",
            Self::U16Lsb => "u16lsb",
            Self::U16Msb => "u16msb",
        };
        f.write_str(name)
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "u8" => Ok(Self::U8),
            "s8" => Ok(Self::S8),
            "s16lsb" | "s16le" | "s16" => Ok(Self::S16Lsb),
            "s16msb" | "s16be" => Ok(Self::S16Msb),
            "u16lsb" | "u16le" | "u16" => Ok(Self::U16Lsb),
            "u16msb" | "u16be" => Ok(Self::U16Msb),
            other => Err(format!(
                "unknown sample format '{}' (expected u8, s8, s16lsb, s16msb, u16lsb, u16msb)",
                other
            )),
        }
    }
}

/// 协商后的音频格式，在会话生命周期内不可变
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u8,
}

impl AudioFormat {
    pub fn new(sample_format: SampleFormat, sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_format,
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn bits_per_sample(&self) -> u16 {
        self.sample_format.bits_per_sample()
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample() as usize / 8) * self.channels as usize
    }
}

/// 调用方请求的音频参数
///
/// open 时可能被协商结果覆盖（格式、声道数、采样率），
/// 覆盖后的值写回此结构。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub freq: u32,
    pub channels: u8,
    /// 每个缓冲区的帧数
    pub samples: u16,
    /// 派生：静音字节
    pub silence: u8,
    /// 派生：缓冲区字节数
    pub size: usize,
}

impl AudioSpec {
    pub fn new(format: SampleFormat, freq: u32, channels: u8, samples: u16) -> Self {
        let mut spec = Self {
            format,
            freq,
            channels,
            samples,
            silence: 0,
            size: 0,
        };
        spec.recalculate();
        spec
    }

    /// 重新计算派生字段
    pub fn recalculate(&mut self) {
        self.silence = self.format.silence();
        self.size = self.format.bytes_per_sample() * self.channels as usize * self.samples as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_starts_with_request_and_covers_all() {
        for format in SampleFormat::ALL {
            let order = format.fallback_order();
            assert_eq!(order[0], format);
            for other in SampleFormat::ALL {
                assert_eq!(
                    order.iter().filter(|f| **f == other).count(),
                    1,
                    "{} must appear exactly once in {}'s fallback list",
                    other,
                    format
                );
            }
        }
    }

    #[test]
    fn test_fallback_prefers_same_width() {
        assert_eq!(
            SampleFormat::S16Msb.fallback_order(),
            [
                SampleFormat::S16Msb,
                SampleFormat::S16Lsb,
                SampleFormat::U16Msb,
                SampleFormat::U16Lsb,
                SampleFormat::U8,
                SampleFormat::S8,
            ]
        );
    }

    #[test]
    fn test_bytes_per_frame() {
        assert_eq!(AudioFormat::new(SampleFormat::U8, 44100, 1).bytes_per_frame(), 1);
        assert_eq!(AudioFormat::new(SampleFormat::S8, 44100, 2).bytes_per_frame(), 2);
        assert_eq!(AudioFormat::new(SampleFormat::S16Lsb, 44100, 1).bytes_per_frame(), 2);
        assert_eq!(AudioFormat::new(SampleFormat::U16Msb, 44100, 2).bytes_per_frame(), 4);
    }

    #[test]
    fn test_candidate_encoding() {
        let c = SampleFormat::S16Msb.candidate();
        assert_eq!(c.bits_per_sample, 16);
        assert_eq!(c.byte_order, ByteOrder::Big);
        assert_eq!(c.number_format, NumberFormat::TwosComplement);

        let c = SampleFormat::U16Lsb.candidate();
        assert_eq!(c.byte_order, ByteOrder::Little);
        assert_eq!(c.number_format, NumberFormat::Unsigned);
    }

    #[test]
    fn test_spec_derived_fields() {
        let spec = AudioSpec::new(SampleFormat::U8, 44100, 1, 2048);
        assert_eq!(spec.silence, 0x80);
        assert_eq!(spec.size, 2048);

        let spec = AudioSpec::new(SampleFormat::S16Lsb, 48000, 2, 1024);
        assert_eq!(spec.silence, 0x00);
        assert_eq!(spec.size, 4096);
    }

    #[test]
    fn test_encode_zero_is_silence() {
        for format in SampleFormat::ALL {
            let mut out = [0xAAu8; 4];
            let n = format.encode(&[0, 0], &mut out);
            assert_eq!(n, 2 * format.bytes_per_sample());
            let expected: Vec<u8> = match format {
                SampleFormat::U8 => vec![0x80, 0x80],
                SampleFormat::U16Lsb => vec![0x00, 0x80, 0x00, 0x80],
                SampleFormat::U16Msb => vec![0x80, 0x00, 0x80, 0x00],
                _ => vec![0; n],
            };
            assert_eq!(&out[..n], &expected[..], "zero sample for {}", format);
        }
    }

    #[test]
    fn test_encode_byte_order() {
        // +0x1234 左对齐到 16-bit
        let sample = 0x1234 << 16;
        let mut out = [0u8; 2];

        SampleFormat::S16Lsb.encode(&[sample], &mut out);
        assert_eq!(out, [0x34, 0x12]);

        SampleFormat::S16Msb.encode(&[sample], &mut out);
        assert_eq!(out, [0x12, 0x34]);

        SampleFormat::U16Msb.encode(&[sample], &mut out);
        assert_eq!(out, [0x92, 0x34]);
    }

    #[test]
    fn test_encode_negative_8bit() {
        let sample = i32::MIN;
        let mut out = [0u8; 1];

        SampleFormat::S8.encode(&[sample], &mut out);
        assert_eq!(out[0], 0x80);

        SampleFormat::U8.encode(&[sample], &mut out);
        assert_eq!(out[0], 0x00);
    }

    #[test]
    fn test_encode_truncates_to_output() {
        let mut out = [0u8; 3];
        let n = SampleFormat::S16Lsb.encode(&[1 << 16, 2 << 16], &mut out);
        assert_eq!(n, 2);
        assert_eq!(&out[..2], &[1, 0]);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("u8".parse::<SampleFormat>().unwrap(), SampleFormat::U8);
        assert_eq!("S16LE".parse::<SampleFormat>().unwrap(), SampleFormat::S16Lsb);
        assert_eq!("u16msb".parse::<SampleFormat>().unwrap(), SampleFormat::U16Msb);
        assert!("f32".parse::<SampleFormat>().is_err());

        for format in SampleFormat::ALL {
            assert_eq!(format.to_string().parse::<SampleFormat>().unwrap(), format);
        }
    }
}
