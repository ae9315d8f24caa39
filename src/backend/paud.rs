//! AIX paud 字符设备后端
//!
//! 通过 `ioctl` 配置设备，用阻塞 `write` 输出 PCM。
//! 设备内部缓冲区固定约 3 秒，节流等待由会话按延迟预算完成。

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

use libc::{c_int, c_long, c_ulong, c_void};

use crate::audio::device::{OutputDevice, OutputPort, OutputRouting};
use crate::audio::format::{ByteOrder, FormatCandidate, NumberFormat};
use crate::error::{OutputError, StartReason};

/// 默认设备节点
pub const DEFAULT_DEVICE: &str = "/dev/paud0/1";

/// 覆盖设备节点的环境变量
pub const DEVICE_ENV: &str = "AUDIODEV";

// ioctl 请求码（'A' 组）
const AUDIO_IOC: u32 = (b'A' as u32) << 8;
const AUDIO_INIT: u32 = AUDIO_IOC | 1;
const AUDIO_CONTROL: u32 = AUDIO_IOC | 3;
const AUDIO_BUFFER: u32 = AUDIO_IOC | 4;
const AUDIO_WAIT: u32 = AUDIO_IOC | 5;

// AUDIO_CONTROL 子请求
const AUDIO_CHANGE: c_int = 0;
const AUDIO_START: c_int = 1;
const AUDIO_STOP: c_int = 2;

// audio_init.mode / operation
const PCM: c_int = 2;
const PLAY: c_int = 1;

// audio_init.flags
const FIXED: c_int = 1 << 0;
const AUDIO_BIG_ENDIAN: c_int = 1 << 3;
const TWOS_COMPLEMENT: c_int = 1 << 4;
const SIGNED: c_int = 1 << 5;

// audio_change 字段
const AUDIO_IGNORE: c_long = -1;
const EXTERNAL_SPEAKER: c_long = 1;
const INTERNAL_SPEAKER: c_long = 2;
const OUTPUT_1: c_long = 4;
const FULL_VOLUME: c_long = 0x7fff_ffff;

const LOAD_PATH: usize = 48;

#[repr(C)]
#[derive(Clone, Copy)]
struct AudioInit {
    srate: c_long,
    bits_per_sample: c_long,
    bsize: c_long,
    mode: c_int,
    channels: c_int,
    flags: c_int,
    operation: c_int,
    rc: i16,
    position_resolution: c_long,
    slot_number: c_int,
    device_id: c_int,
    loadpath: [u8; LOAD_PATH],
}

impl Default for AudioInit {
    fn default() -> Self {
        Self {
            srate: 0,
            bits_per_sample: 0,
            bsize: 0,
            mode: PCM,
            channels: 0,
            flags: 0,
            operation: PLAY,
            rc: 0,
            position_resolution: 0,
            slot_number: 0,
            device_id: 0,
            loadpath: [0; LOAD_PATH],
        }
    }
}

#[repr(C)]
#[derive(Default)]
struct AudioBufferInfo {
    flags: c_ulong,
    read_buf_size: c_ulong,
    write_buf_size: c_ulong,
    read_buf_time: c_ulong,
    write_buf_time: c_ulong,
    read_buf_max: c_ulong,
    write_buf_max: c_ulong,
    position: c_ulong,
    position_type: c_ulong,
    read_buf_cap: c_long,
    write_buf_cap: c_long,
    request_buf_cap: c_long,
}

#[repr(C)]
struct AudioControl {
    ioctl_request: c_int,
    request_info: *mut c_void,
    position: c_long,
    return_code: c_int,
}

impl AudioControl {
    fn new(request: c_int) -> Self {
        Self {
            ioctl_request: request,
            request_info: ptr::null_mut(),
            position: 0,
            return_code: 0,
        }
    }
}

#[repr(C)]
struct AudioChange {
    dev_info: *mut c_void,
    input: c_long,
    output: c_long,
    monitor: c_long,
    volume: c_long,
    volume_delay: c_long,
    balance: c_long,
    balance_delay: c_long,
    treble: c_long,
    bass: c_long,
    pitch: c_long,
}

impl AudioChange {
    fn from_routing(routing: &OutputRouting) -> Self {
        let output = match routing.port {
            OutputPort::Line1 => OUTPUT_1,
            OutputPort::InternalSpeaker => INTERNAL_SPEAKER,
            OutputPort::ExternalSpeaker => EXTERNAL_SPEAKER,
        };
        Self {
            dev_info: ptr::null_mut(),
            input: AUDIO_IGNORE,
            output,
            monitor: AUDIO_IGNORE,
            volume: scale(routing.volume),
            volume_delay: AUDIO_IGNORE,
            balance: scale(routing.balance),
            balance_delay: AUDIO_IGNORE,
            treble: AUDIO_IGNORE,
            bass: AUDIO_IGNORE,
            pitch: AUDIO_IGNORE,
        }
    }
}

/// 0.0 - 1.0 映射到设备的 [0, 0x7fffffff]
fn scale(value: f32) -> c_long {
    (value.clamp(0.0, 1.0) as f64 * FULL_VOLUME as f64) as c_long
}

/// 候选编码对应的 audio_init.flags
fn init_flags(candidate: &FormatCandidate) -> c_int {
    let mut flags = TWOS_COMPLEMENT | FIXED;
    if candidate.number_format != NumberFormat::Unsigned {
        flags |= SIGNED;
    }
    if candidate.bits_per_sample > 8 && candidate.byte_order == ByteOrder::Big {
        flags |= AUDIO_BIG_ENDIAN;
    }
    flags
}

/// 解析设备节点路径
///
/// `AUDIODEV` 覆盖默认路径。index > 0 时：
/// 末段是通道号（`/dev/paud0/1`）则换成 index，否则在路径后追加 index
pub fn device_path(index: u32) -> PathBuf {
    resolve_path(env::var(DEVICE_ENV).ok().as_deref(), index)
}

fn resolve_path(base: Option<&str>, index: u32) -> PathBuf {
    let base = base.filter(|b| !b.is_empty()).unwrap_or(DEFAULT_DEVICE);
    if index == 0 {
        return PathBuf::from(base);
    }

    match base.rsplit_once('/') {
        Some((dir, channel))
            if !channel.is_empty() && channel.bytes().all(|b| b.is_ascii_digit()) =>
        {
            PathBuf::from(format!("{}/{}", dir, index))
        }
        _ => PathBuf::from(format!("{}{}", base, index)),
    }
}

/// paud 设备
pub struct PaudDevice {
    file: File,
    name: String,
    /// 待提交的初始化参数，`initialize` 时一次性写入设备
    init: AudioInit,
}

impl PaudDevice {
    /// 以只写方式打开设备节点
    pub fn open(path: &Path) -> Result<Self, OutputError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| OutputError::unavailable(path.display().to_string(), e))?;

        log::debug!("Opened {}", path.display());

        Ok(Self {
            file,
            name: path.display().to_string(),
            init: AudioInit::default(),
        })
    }

    pub fn open_index(index: u32) -> Result<Self, OutputError> {
        Self::open(&device_path(index))
    }

    /// 能打开并立即关闭默认设备即视为可用
    pub fn is_available() -> bool {
        Self::open_index(0).is_ok()
    }

    fn ioctl<T>(&self, request: u32, arg: &mut T) -> io::Result<()> {
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, arg as *mut T) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn control(&self, request: c_int, info: *mut c_void) -> io::Result<()> {
        let mut control = AudioControl::new(request);
        control.request_info = info;
        self.ioctl(AUDIO_CONTROL, &mut control).map_err(|e| {
            if control.return_code != 0 {
                io::Error::new(
                    e.kind(),
                    format!("{} (return code {})", e, control.return_code),
                )
            } else {
                e
            }
        })
    }
}

impl OutputDevice for PaudDevice {
    fn name(&self) -> &str {
        &self.name
    }

    /// paud 支持全部编码，这里只暂存参数
    fn program_format(
        &mut self,
        candidate: &FormatCandidate,
        sample_rate: u32,
        channels: u8,
    ) -> io::Result<u32> {
        self.init.srate = sample_rate as c_long;
        self.init.bits_per_sample = candidate.bits_per_sample as c_long;
        self.init.channels = channels as c_int;
        self.init.flags = init_flags(candidate);
        Ok(sample_rate)
    }

    /// bsize 的最佳值是 bits_per_sample × channels，即 8 帧字节数
    fn set_transfer_size(&mut self, block_bytes: u32, _buffer_bytes: u32) -> io::Result<u32> {
        self.init.bsize = block_bytes as c_long;
        Ok(block_bytes)
    }

    /// 设备不会改写 audio_init，所以无需重新计算参数
    fn initialize(&mut self) -> Result<(), StartReason> {
        let mut init = self.init;
        init.rc = 0;
        match self.ioctl(AUDIO_INIT, &mut init) {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = StartReason::from_paud_rc(init.rc);
                log::warn!("{}: AUDIO_INIT failed (rc {}): {}", self.name, init.rc, e);
                Err(reason)
            }
        }
    }

    fn apply_routing(&mut self, routing: &OutputRouting) -> io::Result<()> {
        let mut change = AudioChange::from_routing(routing);
        self.control(AUDIO_CHANGE, &mut change as *mut AudioChange as *mut c_void)
    }

    /// 通知设备准备接收数据，实际播放在第一次 write 时开始
    fn start(&mut self) -> Result<(), StartReason> {
        self.control(AUDIO_START, ptr::null_mut()).map_err(|e| {
            log::warn!("{}: can't start audio play: {}", self.name, e);
            StartReason::Unknown
        })
    }

    fn buffered_ms(&mut self) -> io::Result<u32> {
        let mut info = AudioBufferInfo::default();
        self.ioctl(AUDIO_BUFFER, &mut info)?;

        if info.flags != 0 {
            log::trace!("{}: buffer error flags {:#x}", self.name, info.flags);
        }
        log::trace!(
            "{}: buffer time {} ms, size {}, capacity {}",
            self.name,
            info.write_buf_time,
            info.write_buf_size,
            info.write_buf_cap
        );

        Ok(info.write_buf_time.min(u32::MAX as c_ulong) as u32)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write(data)
    }

    fn drain(&mut self) -> io::Result<()> {
        let mut unused: c_int = 0;
        self.ioctl(AUDIO_WAIT, &mut unused)
    }

    fn stop(&mut self) -> io::Result<()> {
        self.control(AUDIO_STOP, ptr::null_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleFormat;

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path(None, 0), PathBuf::from("/dev/paud0/1"));
        assert_eq!(resolve_path(Some(""), 0), PathBuf::from("/dev/paud0/1"));
        assert_eq!(resolve_path(Some("/dev/paud1/1"), 0), PathBuf::from("/dev/paud1/1"));
        assert_eq!(resolve_path(Some("/dev/audio"), 2), PathBuf::from("/dev/audio2"));
    }

    #[test]
    fn test_index_selects_channel_node() {
        assert_eq!(resolve_path(None, 1), PathBuf::from("/dev/paud0/1"));
        assert_eq!(resolve_path(None, 2), PathBuf::from("/dev/paud0/2"));
        assert_eq!(resolve_path(Some("/dev/paud1/1"), 3), PathBuf::from("/dev/paud1/3"));
        assert_eq!(resolve_path(Some("/dev/paud0/"), 2), PathBuf::from("/dev/paud0/2"));
    }

    #[test]
    fn test_init_flags() {
        let flags = init_flags(&SampleFormat::U8.candidate());
        assert_eq!(flags, TWOS_COMPLEMENT | FIXED);

        let flags = init_flags(&SampleFormat::S8.candidate());
        assert_eq!(flags, SIGNED | TWOS_COMPLEMENT | FIXED);

        let flags = init_flags(&SampleFormat::S16Lsb.candidate());
        assert_eq!(flags, SIGNED | TWOS_COMPLEMENT | FIXED);

        let flags = init_flags(&SampleFormat::S16Msb.candidate());
        assert_eq!(flags, AUDIO_BIG_ENDIAN | SIGNED | TWOS_COMPLEMENT | FIXED);

        let flags = init_flags(&SampleFormat::U16Msb.candidate());
        assert_eq!(flags, AUDIO_BIG_ENDIAN | TWOS_COMPLEMENT | FIXED);
    }

    #[test]
    fn test_routing_defaults() {
        let change = AudioChange::from_routing(&OutputRouting::default());
        assert_eq!(change.output, OUTPUT_1);
        assert_eq!(change.volume, 0x7fff_ffff);
        assert_eq!(change.balance, 0x3fff_ffff);
        assert_eq!(change.input, AUDIO_IGNORE);
    }

    #[test]
    fn test_open_missing_device() {
        let err = PaudDevice::open(Path::new("/nonexistent/paud0/1"))
            .err()
            .expect("open must fail");
        assert!(matches!(err, OutputError::DeviceUnavailable { .. }));
        assert!(err.to_string().contains("/nonexistent/paud0/1"));
    }

    #[test]
    fn test_ioctl_on_plain_file_fails_as_query_error() {
        let path = std::env::temp_dir().join(format!("paud-test-{}", std::process::id()));
        std::fs::write(&path, b"").unwrap();

        let mut device = PaudDevice::open(&path).unwrap();
        assert!(device.buffered_ms().is_err());
        assert_eq!(device.write(&[1, 2, 3]).unwrap(), 3);

        drop(device);
        std::fs::remove_file(&path).unwrap();
    }
}
