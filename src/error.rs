//! 输出错误类型
//!
//! 配置阶段（open / 协商 / 启动）的错误同步返回给调用方；
//! 运行阶段只有致命写错误会上抛，查询失败在本地吸收。

use std::fmt;
use std::io;

use thiserror::Error;

/// 设备拒绝最终配置的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    /// 请求参数无效
    InvalidRequest,
    /// 与 open 时的标志或其他使用者冲突
    ResourceConflict,
    /// DSP 算力或内存不足
    Overloaded,
    /// 设备不支持该操作（例如 DSP 代码不能播放）
    UnsupportedOperation,
    /// 未记录的返回码
    Unknown,
}

impl StartReason {
    /// 将 paud `audio_init.rc` 映射为原因
    pub fn from_paud_rc(rc: i16) -> Self {
        match rc {
            1 | 2 => Self::UnsupportedOperation,
            4 => Self::InvalidRequest,
            5 => Self::ResourceConflict,
            6 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "request was invalid"),
            Self::ResourceConflict => write!(f, "conflict with open's flags"),
            Self::Overloaded => write!(f, "out of DSP MIPS or memory"),
            Self::UnsupportedOperation => write!(f, "DSP can't do play requests"),
            Self::Unknown => write!(f, "not documented by the device"),
        }
    }
}

/// 音频输出错误
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Couldn't open {device}: {source}")]
    DeviceUnavailable {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't find any hardware audio formats")]
    FormatUnavailable,

    #[error("Couldn't allocate a {0} byte playback buffer")]
    OutOfMemory(usize),

    #[error("Couldn't start audio play: {0}")]
    StartFailed(StartReason),

    #[error("Fatal write error after {written} bytes: {source}")]
    FatalWrite {
        written: usize,
        #[source]
        source: io::Error,
    },

    #[error("Can't read buffer state: {0}")]
    QueryFailed(#[source] io::Error),

    #[error("Audio session is disabled")]
    Disabled,

    #[error("Audio session is closed")]
    Closed,
}

impl OutputError {
    /// 设备无法打开
    pub fn unavailable(device: impl Into<String>, source: io::Error) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            source,
        }
    }
}
