//! 测试用模拟设备和时钟
//!
//! 按脚本返回设备响应，并记录调用序列和睡眠，供断言使用

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::device::{OutputDevice, OutputRouting};
use super::format::{FormatCandidate, SampleFormat};
use super::pacing::Clock;
use crate::error::StartReason;

/// 模拟设备的调用记录
#[derive(Debug, Default)]
pub(crate) struct MockLog {
    pub calls: Vec<&'static str>,
    pub tried: Vec<SampleFormat>,
    pub programmed_channels: Option<u8>,
    pub transfer_request: Option<(u32, u32)>,
    pub routing: Option<OutputRouting>,
    pub buffered_queries: usize,
    pub write_calls: usize,
    pub written: Vec<u8>,
    pub dropped: bool,
}

pub(crate) type SharedLog = Arc<Mutex<MockLog>>;

pub(crate) struct MockDevice {
    log: SharedLog,
    /// 接受的格式（默认全部）
    pub accepted: Vec<SampleFormat>,
    pub rate_override: Option<u32>,
    pub effective_transfer: Option<u32>,
    pub init_result: Result<(), StartReason>,
    pub start_result: Result<(), StartReason>,
    pub routing_fails: bool,
    pub blocking: bool,
    /// 路由在 initialize 之前设置
    pub route_first: bool,
    /// 按帧计数的设备：只接受整帧，不足一帧报 InvalidInput
    pub frame_bytes: Option<usize>,
    /// buffered_ms 的脚本响应，用完后返回 0
    pub buffered: VecDeque<io::Result<u32>>,
    /// write 的脚本响应，用完后全部接受
    pub writes: VecDeque<io::Result<usize>>,
}

impl MockDevice {
    pub fn new() -> (Self, SharedLog) {
        let log = SharedLog::default();
        let device = Self {
            log: log.clone(),
            accepted: SampleFormat::ALL.to_vec(),
            rate_override: None,
            effective_transfer: None,
            init_result: Ok(()),
            start_result: Ok(()),
            routing_fails: false,
            blocking: false,
            route_first: false,
            frame_bytes: None,
            buffered: VecDeque::new(),
            writes: VecDeque::new(),
        };
        (device, log)
    }

    fn record(&self, call: &'static str) {
        self.log.lock().unwrap().calls.push(call);
    }
}

impl OutputDevice for MockDevice {
    fn name(&self) -> &str {
        "mock"
    }

    fn program_format(
        &mut self,
        candidate: &FormatCandidate,
        sample_rate: u32,
        channels: u8,
    ) -> io::Result<u32> {
        {
            let mut log = self.log.lock().unwrap();
            log.calls.push("program_format");
            log.tried.push(candidate.format);
        }
        if self.accepted.contains(&candidate.format) {
            self.log.lock().unwrap().programmed_channels = Some(channels);
            Ok(self.rate_override.unwrap_or(sample_rate))
        } else {
            Err(io::Error::new(io::ErrorKind::Unsupported, "format rejected"))
        }
    }

    fn set_transfer_size(&mut self, block_bytes: u32, buffer_bytes: u32) -> io::Result<u32> {
        let mut log = self.log.lock().unwrap();
        log.calls.push("set_transfer_size");
        log.transfer_request = Some((block_bytes, buffer_bytes));
        Ok(self.effective_transfer.unwrap_or(block_bytes))
    }

    fn initialize(&mut self) -> Result<(), StartReason> {
        self.record("initialize");
        self.init_result
    }

    fn apply_routing(&mut self, routing: &OutputRouting) -> io::Result<()> {
        let mut log = self.log.lock().unwrap();
        log.calls.push("apply_routing");
        log.routing = Some(*routing);
        if self.routing_fails {
            Err(io::Error::new(io::ErrorKind::Unsupported, "no mixer"))
        } else {
            Ok(())
        }
    }

    fn start(&mut self) -> Result<(), StartReason> {
        self.record("start");
        self.start_result
    }

    fn buffered_ms(&mut self) -> io::Result<u32> {
        self.log.lock().unwrap().buffered_queries += 1;
        self.buffered.pop_front().unwrap_or(Ok(0))
    }

    fn blocking_writes(&self) -> bool {
        self.blocking
    }

    fn routes_before_initialize(&self) -> bool {
        self.route_first
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut log = self.log.lock().unwrap();
        log.write_calls += 1;
        let data = match self.frame_bytes {
            Some(frame) if data.len() < frame => {
                return Err(io::Error::new(io::ErrorKind::InvalidInput, "partial frame"));
            }
            Some(frame) => &data[..data.len() / frame * frame],
            None => data,
        };
        let accepted = match self.writes.pop_front() {
            Some(Ok(n)) => n.min(data.len()),
            Some(Err(e)) => return Err(e),
            None => data.len(),
        };
        log.written.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn drain(&mut self) -> io::Result<()> {
        self.record("drain");
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        self.record("stop");
        Ok(())
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.dropped = true;
        }
    }
}

/// 虚拟时钟：sleep 只推进虚拟时间并记录时长
#[derive(Clone)]
pub(crate) struct FakeClock {
    origin: Instant,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let slept: Duration = self.sleeps.lock().unwrap().iter().sum();
        self.origin + slept
    }

    fn sleep(&mut self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
