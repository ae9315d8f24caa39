//! 驱动接口
//!
//! 把会话的 open / wait / play / buffer / close 包装成统一的驱动对象，
//! 由上层按名字选择后端。

use crate::audio::buffer::PlaybackBuffer;
use crate::audio::device::OutputDevice;
use crate::audio::format::AudioSpec;
use crate::audio::pacing::{Clock, ThreadClock, WaitOutcome};
use crate::audio::session::{OutputConfig, Session};
use crate::audio::stats::StatsReport;
use crate::backend::{PaudDevice, UmsDevice};
use crate::error::OutputError;

/// 驱动接口
pub trait AudioDriver {
    fn name(&self) -> &str;

    /// 打开设备；`spec` 回写为实际生效的参数
    fn open(&mut self, spec: &mut AudioSpec) -> Result<(), OutputError>;

    /// 阻塞直到设备可以接收下一块
    fn wait_audio(&mut self) -> WaitOutcome;

    /// 写出播放缓冲区
    fn play_audio(&mut self) -> Result<usize, OutputError>;

    /// 供调用方填充的播放缓冲区
    fn audio_buf(&mut self) -> Option<&mut PlaybackBuffer>;

    fn close(&mut self);

    fn is_enabled(&self) -> bool;

    fn stats(&self) -> Option<StatsReport>;
}

type Connect<D> = Box<dyn FnMut(u32) -> Result<D, OutputError>>;

/// 基于 `OutputDevice` 的通用驱动
pub struct DeviceDriver<D: OutputDevice, C: Clock + Clone = ThreadClock> {
    name: &'static str,
    index: u32,
    config: OutputConfig,
    connect: Connect<D>,
    clock: C,
    session: Option<Session<D, C>>,
}

impl<D: OutputDevice> DeviceDriver<D, ThreadClock> {
    pub fn new(name: &'static str, index: u32, config: OutputConfig, connect: Connect<D>) -> Self {
        Self::with_clock(name, index, config, connect, ThreadClock)
    }
}

impl<D: OutputDevice, C: Clock + Clone> DeviceDriver<D, C> {
    pub fn with_clock(
        name: &'static str,
        index: u32,
        config: OutputConfig,
        connect: Connect<D>,
        clock: C,
    ) -> Self {
        Self {
            name,
            index,
            config,
            connect,
            clock,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session<D, C>> {
        self.session.as_ref()
    }
}

impl<D: OutputDevice, C: Clock + Clone> AudioDriver for DeviceDriver<D, C> {
    fn name(&self) -> &str {
        self.name
    }

    /// 已打开时先关闭旧会话
    fn open(&mut self, spec: &mut AudioSpec) -> Result<(), OutputError> {
        self.close();

        let device = (self.connect)(self.index)?;
        let session =
            Session::open_with_clock(device, spec, self.config.clone(), self.clock.clone())?;
        self.session = Some(session);
        Ok(())
    }

    fn wait_audio(&mut self) -> WaitOutcome {
        match self.session.as_mut() {
            Some(session) => session.wait_until_writable(),
            None => WaitOutcome::Ready,
        }
    }

    fn play_audio(&mut self) -> Result<usize, OutputError> {
        self.session
            .as_mut()
            .ok_or(OutputError::Closed)?
            .write_buffer()
    }

    fn audio_buf(&mut self) -> Option<&mut PlaybackBuffer> {
        self.session.as_mut()?.buffer_mut()
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    fn is_enabled(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_enabled())
    }

    fn stats(&self) -> Option<StatsReport> {
        self.session.as_ref().map(|s| s.stats().report())
    }
}

/// 驱动注册项
pub struct Bootstrap {
    pub name: &'static str,
    pub description: &'static str,
    /// 能力探测：能否打开设备
    pub available: fn() -> bool,
    pub create: fn(index: u32, config: OutputConfig) -> Box<dyn AudioDriver>,
}

fn create_paud(index: u32, config: OutputConfig) -> Box<dyn AudioDriver> {
    Box::new(DeviceDriver::<PaudDevice>::new(
        "paud",
        index,
        config,
        Box::new(PaudDevice::open_index),
    ))
}

/// UMS 只有一个设备对象，忽略设备序号
fn create_ums(index: u32, config: OutputConfig) -> Box<dyn AudioDriver> {
    Box::new(DeviceDriver::<UmsDevice>::new(
        "ums",
        index,
        config,
        Box::new(|_index: u32| UmsDevice::open()),
    ))
}

pub const PAUD_BOOTSTRAP: Bootstrap = Bootstrap {
    name: "paud",
    description: "AIX Paudio",
    available: PaudDevice::is_available,
    create: create_paud,
};

pub const UMS_BOOTSTRAP: Bootstrap = Bootstrap {
    name: "ums",
    description: "AIX UMS audio",
    available: UmsDevice::is_available,
    create: create_ums,
};

/// 按优先级排列
pub static BOOTSTRAPS: [Bootstrap; 2] = [PAUD_BOOTSTRAP, UMS_BOOTSTRAP];

/// 按名字查找驱动（不区分大小写）
pub fn find(name: &str) -> Option<&'static Bootstrap> {
    BOOTSTRAPS.iter().find(|b| b.name.eq_ignore_ascii_case(name))
}
