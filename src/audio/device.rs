//! 设备抽象
//!
//! 每个后端是一个拥有设备句柄的具体类型，实现 `OutputDevice`。
//! 句柄在值被 drop 时释放。

use std::io;

use super::format::FormatCandidate;
use crate::error::StartReason;

/// 输出端口
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputPort {
    /// 第一路线路输出
    Line1,
    /// 内置扬声器
    InternalSpeaker,
    /// 外接扬声器
    ExternalSpeaker,
}

/// 输出路由、音量、平衡
///
/// 尽力而为：设置失败只记日志，不影响 open
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputRouting {
    pub port: OutputPort,
    /// 0.0 - 1.0
    pub volume: f32,
    /// 0.0 = 左, 0.5 = 居中, 1.0 = 右
    pub balance: f32,
}

impl Default for OutputRouting {
    fn default() -> Self {
        Self {
            port: OutputPort::Line1,
            volume: 1.0,
            balance: 0.5,
        }
    }
}

/// 单个硬件输出流的设备操作
///
/// 调用顺序由会话保证：
/// `program_format` (可重复) → `set_transfer_size` → `initialize`
/// → `apply_routing` → `start` → (`buffered_ms` / `write`)* → `drain` → `stop`
pub trait OutputDevice {
    /// 设备名称（用于日志）
    fn name(&self) -> &str;

    /// 用候选编码编程设备，返回设备实际采用的采样率
    ///
    /// 失败不能留下阻止下一个候选的状态
    fn program_format(
        &mut self,
        candidate: &FormatCandidate,
        sample_rate: u32,
        channels: u8,
    ) -> io::Result<u32>;

    /// 请求传输粒度，返回设备实际生效的值（可以与请求不同）
    fn set_transfer_size(&mut self, block_bytes: u32, buffer_bytes: u32) -> io::Result<u32>;

    /// 提交格式配置
    fn initialize(&mut self) -> Result<(), StartReason> {
        Ok(())
    }

    fn apply_routing(&mut self, routing: &OutputRouting) -> io::Result<()>;

    fn start(&mut self) -> Result<(), StartReason>;

    /// 设备缓冲区中尚未播放的时长（毫秒）
    fn buffered_ms(&mut self) -> io::Result<u32>;

    /// 路由和音量是否要在 `initialize` 之前设置
    fn routes_before_initialize(&self) -> bool {
        false
    }

    /// 写入是否本身就会阻塞到设备有空间（此时无需节流等待）
    fn blocking_writes(&self) -> bool {
        false
    }

    /// 写入字节，返回设备接受的字节数
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// 播放完已排队的数据
    fn drain(&mut self) -> io::Result<()>;

    fn stop(&mut self) -> io::Result<()>;
}
