//! 音频输出核心
//!
//! 包含：
//! - Format: 样本格式、回退表和编码
//! - Negotiate: 在活动设备上协商格式
//! - Device: 后端设备抽象
//! - Buffer: 会话独占的播放缓冲区
//! - Pacing: 延迟预算节流和写重试
//! - Session: open / wait / write / close
//! - Stats: 会话统计

pub mod buffer;
pub mod device;
pub mod format;
pub mod negotiate;
pub mod pacing;
pub mod session;
pub mod stats;

#[cfg(test)]
pub(crate) mod mock;

pub use buffer::PlaybackBuffer;
pub use device::{OutputDevice, OutputPort, OutputRouting};
pub use format::{AudioFormat, AudioSpec, ByteOrder, FormatCandidate, NumberFormat, SampleFormat};
pub use negotiate::{coerce_channels, negotiate};
pub use pacing::{Clock, ThreadClock, WaitOutcome};
pub use session::{OutputConfig, Session};
pub use stats::{SessionStats, StatsReport};
