//! 设备会话
//!
//! 一个会话 = 一个打开并配置好的硬件输出流。
//! 独占一个设备句柄和一块播放缓冲区，不做内部加锁：
//! 同一时刻只允许一个写线程驱动它。

use std::sync::Arc;
use std::time::Duration;

use super::buffer::PlaybackBuffer;
use super::device::{OutputDevice, OutputRouting};
use super::format::{AudioFormat, AudioSpec};
use super::negotiate::negotiate;
use super::pacing::{self, Clock, ThreadClock, WaitOutcome};
use super::stats::SessionStats;
use crate::error::OutputError;

/// 输出配置
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// 延迟预算：设备中已缓冲时长超过此值时等待
    pub latency_budget: Duration,
    /// 传输粒度 = 每帧字节数 × 此倍数
    pub block_frames: u32,
    /// 暂时性写错误后的让出时间
    pub retry_interval: Duration,
    /// 等待设备排空的上限（None 表示无限等待）
    pub wait_timeout: Option<Duration>,
    /// 是否 mlock 播放缓冲区
    pub lock_memory: bool,
    /// 输出路由和音量
    pub routing: OutputRouting,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            latency_budget: Duration::from_millis(100),
            block_frames: 8,
            retry_interval: Duration::from_millis(1),
            wait_timeout: None,
            lock_memory: false,
            routing: OutputRouting::default(),
        }
    }
}

/// 路由失败不影响打开
fn apply_routing<D: OutputDevice>(device: &mut D, routing: &OutputRouting) {
    if let Err(e) = device.apply_routing(routing) {
        log::warn!("{}: can't change output settings: {}", device.name(), e);
    }
}

/// 打开的输出会话
pub struct Session<D: OutputDevice, C: Clock = ThreadClock> {
    device: Option<D>,
    buffer: Option<PlaybackBuffer>,
    format: AudioFormat,
    config: OutputConfig,
    clock: C,
    /// 致命写错误后置为 false，此后不再写设备
    enabled: bool,
    /// 打开会话的进程，仅用于诊断
    owner_pid: u32,
    /// 设备实际生效的传输粒度
    transfer_size: u32,
    stats: Arc<SessionStats>,
}

impl<D: OutputDevice> Session<D, ThreadClock> {
    /// 在已获取的设备上打开会话
    ///
    /// 失败时设备和缓冲区全部释放，不返回半成品
    pub fn open(device: D, spec: &mut AudioSpec, config: OutputConfig) -> Result<Self, OutputError> {
        Self::open_with_clock(device, spec, config, ThreadClock)
    }
}

impl<D: OutputDevice, C: Clock> Session<D, C> {
    pub fn open_with_clock(
        mut device: D,
        spec: &mut AudioSpec,
        config: OutputConfig,
        clock: C,
    ) -> Result<Self, OutputError> {
        let format = negotiate(&mut device, spec.format, spec.freq, spec.channels)?;

        spec.format = format.sample_format;
        spec.channels = format.channels;
        spec.freq = format.sample_rate;
        spec.recalculate();

        let block = format.bytes_per_frame() as u32 * config.block_frames;
        let transfer_size = match device.set_transfer_size(block, spec.size as u32) {
            Ok(effective) => {
                if effective != block {
                    log::debug!(
                        "{}: transfer size {} bytes (requested {})",
                        device.name(),
                        effective,
                        block
                    );
                }
                effective
            }
            Err(e) => {
                log::warn!("{}: can't set transfer size: {}", device.name(), e);
                block
            }
        };

        let mut buffer = PlaybackBuffer::allocate(spec.size, spec.silence)
            .map_err(|_| OutputError::OutOfMemory(spec.size))?;
        if config.lock_memory {
            buffer.lock_memory();
        }

        let routes_first = device.routes_before_initialize();
        if routes_first {
            apply_routing(&mut device, &config.routing);
        }

        device.initialize().map_err(OutputError::StartFailed)?;

        if !routes_first {
            apply_routing(&mut device, &config.routing);
        }

        device.start().map_err(OutputError::StartFailed)?;

        log::info!(
            "{}: opened {} @ {} Hz, {} ch, {} byte buffer",
            device.name(),
            format.sample_format,
            format.sample_rate,
            format.channels,
            spec.size
        );

        Ok(Self {
            device: Some(device),
            buffer: Some(buffer),
            format,
            config,
            clock,
            enabled: true,
            owner_pid: std::process::id(),
            transfer_size,
            stats: Arc::new(SessionStats::new()),
        })
    }

    /// 协商后的格式
    #[inline]
    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    #[inline]
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    #[inline]
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    #[inline]
    pub fn transfer_size(&self) -> u32 {
        self.transfer_size
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// 发生致命写错误后返回 false，调用方应关闭或重新打开
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.device.is_some()
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }

    /// 播放缓冲区（关闭后为 None）
    #[inline]
    pub fn buffer_mut(&mut self) -> Option<&mut PlaybackBuffer> {
        self.buffer.as_mut()
    }

    /// 阻塞直到设备缓冲降到延迟预算以内
    pub fn wait_until_writable(&mut self) -> WaitOutcome {
        if !self.enabled {
            return WaitOutcome::Ready;
        }
        let Some(device) = self.device.as_mut() else {
            return WaitOutcome::Ready;
        };

        pacing::wait_until_writable(
            device,
            &mut self.clock,
            self.config.latency_budget,
            self.config.wait_timeout,
            &self.stats,
        )
    }

    /// 设备中已缓冲、尚未播放的时长（毫秒）
    pub fn buffered_ms(&mut self) -> Result<u32, OutputError> {
        let device = self.device.as_mut().ok_or(OutputError::Closed)?;
        device.buffered_ms().map_err(OutputError::QueryFailed)
    }

    /// 把暂存的缓冲区全部写入设备
    ///
    /// 致命错误后会话被禁用，后续调用返回 `Disabled`
    pub fn write_buffer(&mut self) -> Result<usize, OutputError> {
        let (Some(device), Some(buffer)) = (self.device.as_mut(), self.buffer.as_ref()) else {
            return Err(OutputError::Closed);
        };
        if !self.enabled {
            return Err(OutputError::Disabled);
        }

        // 不足一帧的尾部丢弃
        let staged = buffer.staged();
        let bytes_per_frame = self.format.bytes_per_frame().max(1);
        let whole = staged.len() / bytes_per_frame * bytes_per_frame;
        if whole < staged.len() {
            log::trace!(
                "{}: dropping {} byte partial frame",
                device.name(),
                staged.len() - whole
            );
        }

        match pacing::write_all(
            device,
            &mut self.clock,
            &staged[..whole],
            self.config.retry_interval,
            &self.stats,
        ) {
            Ok(written) => {
                self.stats.record_write(written);
                log::trace!("{}: wrote {} bytes", device.name(), written);
                Ok(written)
            }
            Err(failure) => {
                log::warn!(
                    "{}: write failed after {} bytes, disabling output: {}",
                    device.name(),
                    failure.written,
                    failure.source
                );
                self.enabled = false;
                Err(OutputError::FatalWrite {
                    written: failure.written,
                    source: failure.source,
                })
            }
        }
    }

    /// 关闭会话：排空 → 停止 → 释放缓冲区 → 释放句柄
    ///
    /// 每一步都执行，失败只记日志；重复调用无副作用
    pub fn close(&mut self) {
        let device = self.device.take();

        if let Some(mut device) = device {
            if let Err(e) = device.drain() {
                log::debug!("{}: can't drain output: {}", device.name(), e);
            }
            if let Err(e) = device.stop() {
                log::debug!("{}: can't stop audio play: {}", device.name(), e);
            }
            self.buffer = None;
            log::debug!("{}: closed", device.name());
        }

        self.buffer = None;
        self.enabled = false;
    }
}

impl<D: OutputDevice, C: Clock> Drop for Session<D, C> {
    fn drop(&mut self) {
        self.close();
    }
}
