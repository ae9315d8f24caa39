//! 写入节流与重试
//!
//! 设备内部缓冲区可容纳数秒音频。每次都写满再等待会带来同样量级的延迟，
//! 所以这里只在缓冲时长超过延迟预算时睡眠（每次半个预算），
//! 把延迟压到预算以内，同时避免空转轮询。
//!
//! 两个循环都是同步阻塞的，取消由外部调用方负责。

use std::io;
use std::time::{Duration, Instant};

use super::device::OutputDevice;
use super::stats::SessionStats;

/// 睡眠和计时
///
/// 测试中替换为虚拟时钟，以便精确断言睡眠次数
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

/// 使用真实线程睡眠的时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadClock;

impl Clock for ThreadClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// 等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 缓冲时长已降到预算以内
    Ready,
    /// 无法读取缓冲状态，放弃等待直接写
    QueryFailed,
    /// 超过等待上限，放弃等待直接写
    TimedOut,
    /// 设备写入本身阻塞，无需等待
    Blocking,
}

/// 轮询睡眠的下限，防止预算为 0 时空转
const MIN_PACING_SLEEP: Duration = Duration::from_millis(1);

/// 阻塞直到设备缓冲时长不超过 `budget`
///
/// `timeout` 为 None 时不设上限
pub fn wait_until_writable<D, C>(
    device: &mut D,
    clock: &mut C,
    budget: Duration,
    timeout: Option<Duration>,
    stats: &SessionStats,
) -> WaitOutcome
where
    D: OutputDevice + ?Sized,
    C: Clock + ?Sized,
{
    if device.blocking_writes() {
        return WaitOutcome::Blocking;
    }

    let started = clock.now();
    let interval = (budget / 2).max(MIN_PACING_SLEEP);

    loop {
        let buffered = match device.buffered_ms() {
            Ok(ms) => Duration::from_millis(ms as u64),
            Err(e) => {
                log::debug!("{}: can't read buffer state: {}", device.name(), e);
                stats.record_query_failure();
                return WaitOutcome::QueryFailed;
            }
        };

        if buffered <= budget {
            return WaitOutcome::Ready;
        }

        if let Some(limit) = timeout {
            if clock.now().duration_since(started) >= limit {
                log::warn!(
                    "{}: buffer still holds {:?} after waiting {:?}, writing anyway",
                    device.name(),
                    buffered,
                    limit
                );
                stats.record_wait_timeout();
                return WaitOutcome::TimedOut;
            }
        }

        log::trace!(
            "{}: {:?} buffered (budget {:?}), waiting to drain",
            device.name(),
            buffered,
            budget
        );
        stats.record_pacing_sleep();
        clock.sleep(interval);
    }
}

/// 写错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 设备暂时不可写（EAGAIN 或 errno 为 0），睡一下再试
    Transient,
    /// 被信号打断，立即重试
    Interrupted,
    /// 不可恢复
    Fatal,
}

pub fn classify(error: &io::Error) -> ErrorClass {
    if error.kind() == io::ErrorKind::WouldBlock || error.raw_os_error() == Some(0) {
        ErrorClass::Transient
    } else if error.kind() == io::ErrorKind::Interrupted {
        ErrorClass::Interrupted
    } else {
        ErrorClass::Fatal
    }
}

/// 致命写错误
#[derive(Debug)]
pub struct WriteFailure {
    /// 出错前已写入的字节数
    pub written: usize,
    pub source: io::Error,
}

/// 把 `data` 全部写入设备
///
/// 短写、零长度写和暂时性错误都会睡 `retry_interval` 后写剩余部分；
/// 被打断直接重试；其他错误立即返回，不再重试。
pub fn write_all<D, C>(
    device: &mut D,
    clock: &mut C,
    data: &[u8],
    retry_interval: Duration,
    stats: &SessionStats,
) -> Result<usize, WriteFailure>
where
    D: OutputDevice + ?Sized,
    C: Clock + ?Sized,
{
    let mut written = 0;

    while written < data.len() {
        match device.write(&data[written..]) {
            Ok(0) => {
                log::trace!("{}: zero-length write, retrying", device.name());
                stats.record_retry_sleep();
                clock.sleep(retry_interval);
            }
            Ok(n) => {
                written += n;
                if written < data.len() {
                    log::trace!(
                        "{}: short write {} / {} bytes",
                        device.name(),
                        written,
                        data.len()
                    );
                    stats.record_retry_sleep();
                    clock.sleep(retry_interval);
                }
            }
            Err(e) => match classify(&e) {
                ErrorClass::Transient => {
                    log::trace!("{}: device not ready ({}), retrying", device.name(), e);
                    stats.record_retry_sleep();
                    clock.sleep(retry_interval);
                }
                ErrorClass::Interrupted => {
                    stats.record_interrupted();
                }
                ErrorClass::Fatal => {
                    stats.record_fatal();
                    return Err(WriteFailure { written, source: e });
                }
            },
        }
    }

    Ok(written)
}
