//! AIX UMS (Ultimedia Services) 后端
//!
//! UMS 设备对象以阻塞 IO 模式打开，write 会自己等到设备有空间，
//! 所以会话不需要按延迟预算节流。
//! 非 AIX 平台上没有 UMS 库，后端报告不可用。

use std::ffi::CStr;
use std::io;

use crate::audio::device::{OutputDevice, OutputPort, OutputRouting};
use crate::audio::format::{ByteOrder, FormatCandidate, NumberFormat, SampleFormat};
use crate::error::{OutputError, StartReason};

const DEVICE_NAME: &str = "UMS Audio";

/// 请求的 DMA 传输大小，在中断负载和可闻延迟之间折中
const DMA_BUFFER_SIZE: i64 = 256;

/// 最大增益 / 音量
const FULL_GAIN: i64 = 100;

// UMSAudioDevice_ReturnCode
const UMS_SUCCESS: i64 = 0;
const UMS_PREEMPTED: i64 = 2;
const UMS_INTERRUPTED: i64 = 3;

// UMSAudioTypes_TimeFormat
const UMS_TIME_BYTES: i64 = 1;

/// UMS 只实现了实际系统会用到的三种格式
fn supports(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::U8 | SampleFormat::S16Lsb | SampleFormat::S16Msb
    )
}

fn byte_order_name(order: ByteOrder) -> &'static CStr {
    match order {
        ByteOrder::Little => c"LSB",
        ByteOrder::Big => c"MSB",
    }
}

fn number_format_name(format: NumberFormat) -> &'static CStr {
    match format {
        NumberFormat::Signed => c"SIGNED",
        NumberFormat::Unsigned => c"UNSIGNED",
        NumberFormat::TwosComplement => c"TWOS_COMPLEMENT",
    }
}

fn port_name(port: OutputPort) -> &'static CStr {
    match port {
        OutputPort::Line1 => c"LINE_OUT",
        OutputPort::InternalSpeaker => c"INTERNAL_SPEAKER",
        OutputPort::ExternalSpeaker => c"EXTERNAL_SPEAKER",
    }
}

/// 返回码 → io 结果
///
/// 被打断和被抢占可以重试，其余失败都是设备错误
fn check(rc: i64) -> io::Result<()> {
    match rc {
        UMS_SUCCESS => Ok(()),
        UMS_INTERRUPTED => Err(io::Error::from(io::ErrorKind::Interrupted)),
        UMS_PREEMPTED => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        rc => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("UMS return code {}", rc),
        )),
    }
}

/// UMS 音量 0..100，平衡 -100..100（0 居中）
fn ums_levels(routing: &OutputRouting) -> (i64, i64) {
    let volume = (routing.volume.clamp(0.0, 1.0) * FULL_GAIN as f32).round() as i64;
    let balance = ((routing.balance.clamp(0.0, 1.0) * 2.0 - 1.0) * FULL_GAIN as f32).round() as i64;
    (volume, balance)
}

/// UMS 设备
pub struct UmsDevice {
    raw: sys::RawDevice,
    bits_per_sample: u16,
    channels: u8,
}

impl UmsDevice {
    /// 创建 "Audio" 别名的播放设备对象
    pub fn open() -> Result<Self, OutputError> {
        let mut raw = sys::RawDevice::make().map_err(|msg| {
            OutputError::unavailable(DEVICE_NAME, io::Error::new(io::ErrorKind::Unsupported, msg))
        })?;

        check(raw.set_audio_format_type(c"PCM"))
            .map_err(|e| OutputError::unavailable(DEVICE_NAME, e))?;

        Ok(Self {
            raw,
            bits_per_sample: 0,
            channels: 0,
        })
    }

    pub fn is_available() -> bool {
        sys::AVAILABLE
    }

    #[inline]
    fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }
}

impl OutputDevice for UmsDevice {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn program_format(
        &mut self,
        candidate: &FormatCandidate,
        sample_rate: u32,
        channels: u8,
    ) -> io::Result<u32> {
        if !supports(candidate.format) {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not supported by UMS", candidate.format),
            ));
        }

        let (rc, out_rate) = self.raw.set_sample_rate(sample_rate as i64);
        check(rc)?;
        check(self.raw.set_byte_order(byte_order_name(candidate.byte_order)))?;
        check(self.raw.set_number_format(number_format_name(candidate.number_format)))?;

        self.bits_per_sample = candidate.bits_per_sample;
        self.channels = channels;
        Ok(out_rate.clamp(0, u32::MAX as i64) as u32)
    }

    /// DMA 大小固定为 256 字节，设备缓冲区为播放缓冲区的两倍
    fn set_transfer_size(&mut self, _block_bytes: u32, buffer_bytes: u32) -> io::Result<u32> {
        check(self.raw.set_bits_per_sample(self.bits_per_sample as i64))?;

        let (rc, dma) = self.raw.set_dma_buffer_size(DMA_BUFFER_SIZE);
        check(rc)?;

        let (rc, audio_buffer) = self.raw.set_audio_buffer_size(2 * buffer_bytes as i64);
        if let Err(e) = check(rc) {
            log::debug!("{}: can't set audio buffer size: {}", DEVICE_NAME, e);
        } else {
            log::debug!("{}: audio buffer size {}", DEVICE_NAME, audio_buffer);
        }

        Ok(dma.clamp(0, u32::MAX as i64) as u32)
    }

    fn initialize(&mut self) -> Result<(), StartReason> {
        let configure = check(self.raw.set_number_of_channels(self.channels as i64))
            .and_then(|_| check(self.raw.set_time_format(UMS_TIME_BYTES)));
        if let Err(e) = configure {
            log::warn!("{}: can't configure channels: {}", DEVICE_NAME, e);
            return Err(StartReason::InvalidRequest);
        }

        check(self.raw.initialize()).map_err(|e| {
            log::warn!("{}: initialize failed: {}", DEVICE_NAME, e);
            StartReason::Unknown
        })
    }

    fn apply_routing(&mut self, routing: &OutputRouting) -> io::Result<()> {
        if routing.port != OutputPort::InternalSpeaker {
            check(self.raw.disable_output(port_name(OutputPort::InternalSpeaker)))?;
        }
        check(self.raw.enable_output(port_name(routing.port), FULL_GAIN, FULL_GAIN))?;

        let (volume, balance) = ums_levels(routing);
        check(self.raw.set_volume(volume))?;
        check(self.raw.set_balance(balance))
    }

    fn start(&mut self) -> Result<(), StartReason> {
        check(self.raw.start()).map_err(|e| {
            log::warn!("{}: can't start audio play: {}", DEVICE_NAME, e);
            StartReason::Unknown
        })
    }

    fn buffered_ms(&mut self) -> io::Result<u32> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "UMS does not report buffer state",
        ))
    }

    fn blocking_writes(&self) -> bool {
        true
    }

    /// UMS 要求在 initialize 之前选好输出端口和音量
    fn routes_before_initialize(&self) -> bool {
        true
    }

    /// UMS 按样本帧计数
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let bytes_per_frame = self.bytes_per_frame();
        let frames = if bytes_per_frame == 0 {
            0
        } else {
            data.len() / bytes_per_frame
        };
        if frames == 0 {
            // UMS 按帧计数，不足一帧的尾部无法写出
            log::trace!("{}: dropping {} byte partial frame", DEVICE_NAME, data.len());
            return Ok(data.len());
        }

        let (rc, written) = self.raw.write(&data[..frames * bytes_per_frame], frames as i64);
        check(rc)?;
        Ok(written.clamp(0, frames as i64) as usize * bytes_per_frame)
    }

    fn drain(&mut self) -> io::Result<()> {
        check(self.raw.play_remaining_data(true))
    }

    fn stop(&mut self) -> io::Result<()> {
        check(self.raw.stop())
    }
}

/// UMS SOM 绑定
#[cfg(target_os = "aix")]
mod sys {
    use std::ffi::CStr;
    use std::ptr;

    use libc::{c_char, c_long, c_void};

    pub const AVAILABLE: bool = true;

    const MAJOR_VERSION: c_long = 1;
    const MINOR_VERSION: c_long = 0;
    const BLOCKING_IO: c_long = 1;

    type Obj = *mut c_void;
    type Env = *mut c_void;

    /// SOM sequence<octet>
    #[repr(C)]
    struct Buffer {
        maximum: c_long,
        length: c_long,
        buffer: *mut u8,
    }

    #[link(name = "UMSobj")]
    extern "C" {
        fn somGetGlobalEnvironment() -> Env;
        fn _somFree(obj: Obj);
        fn UMSAudioDeviceNewClass(major: c_long, minor: c_long) -> Obj;
        fn UMSAudioDeviceMClass_make_by_alias(
            class: Obj,
            ev: Env,
            alias: *const c_char,
            mode: *const c_char,
            flags: c_long,
            error: *mut c_long,
            error_string: *mut *mut c_char,
            formats: *mut *mut c_char,
            inputs: *mut *mut c_char,
            outputs: *mut *mut c_char,
        ) -> Obj;

        fn UMSAudioDevice_set_audio_format_type(dev: Obj, ev: Env, fmt: *const c_char) -> c_long;
        fn UMSAudioDevice_set_sample_rate(dev: Obj, ev: Env, rate: c_long, out: *mut c_long) -> c_long;
        fn UMSAudioDevice_set_byte_order(dev: Obj, ev: Env, order: *const c_char) -> c_long;
        fn UMSAudioDevice_set_number_format(dev: Obj, ev: Env, fmt: *const c_char) -> c_long;
        fn UMSAudioDevice_set_bits_per_sample(dev: Obj, ev: Env, bits: c_long) -> c_long;
        fn UMSAudioDevice_set_number_of_channels(dev: Obj, ev: Env, channels: c_long) -> c_long;
        fn UMSAudioDevice_set_DMA_buffer_size(dev: Obj, ev: Env, size: c_long, out: *mut c_long) -> c_long;
        fn UMSAudioDevice_set_audio_buffer_size(dev: Obj, ev: Env, size: c_long, out: *mut c_long) -> c_long;
        fn UMSAudioDevice_set_time_format(dev: Obj, ev: Env, fmt: c_long) -> c_long;
        fn UMSAudioDevice_disable_output(dev: Obj, ev: Env, output: *const c_char) -> c_long;
        fn UMSAudioDevice_enable_output(
            dev: Obj,
            ev: Env,
            output: *const c_char,
            left_gain: *mut c_long,
            right_gain: *mut c_long,
        ) -> c_long;
        fn UMSAudioDevice_set_volume(dev: Obj, ev: Env, volume: c_long) -> c_long;
        fn UMSAudioDevice_set_balance(dev: Obj, ev: Env, balance: c_long) -> c_long;
        fn UMSAudioDevice_initialize(dev: Obj, ev: Env) -> c_long;
        fn UMSAudioDevice_start(dev: Obj, ev: Env) -> c_long;
        fn UMSAudioDevice_stop(dev: Obj, ev: Env) -> c_long;
        fn UMSAudioDevice_close(dev: Obj, ev: Env) -> c_long;
        fn UMSAudioDevice_play_remaining_data(dev: Obj, ev: Env, block: c_long) -> c_long;
        fn UMSAudioDevice_write(
            dev: Obj,
            ev: Env,
            data: *mut Buffer,
            samples: c_long,
            written: *mut c_long,
        ) -> c_long;
    }

    pub struct RawDevice {
        dev: Obj,
        ev: Env,
    }

    impl RawDevice {
        pub fn make() -> Result<Self, String> {
            unsafe {
                let ev = somGetGlobalEnvironment();
                let class = UMSAudioDeviceNewClass(MAJOR_VERSION, MINOR_VERSION);
                if class.is_null() {
                    return Err("can't create AudioDeviceMClass metaclass".to_string());
                }

                let mut error: c_long = 0;
                let mut error_string: *mut c_char = ptr::null_mut();
                let mut formats: *mut c_char = ptr::null_mut();
                let mut inputs: *mut c_char = ptr::null_mut();
                let mut outputs: *mut c_char = ptr::null_mut();

                let dev = UMSAudioDeviceMClass_make_by_alias(
                    class,
                    ev,
                    c"Audio".as_ptr(),
                    c"PLAY".as_ptr(),
                    BLOCKING_IO,
                    &mut error,
                    &mut error_string,
                    &mut formats,
                    &mut inputs,
                    &mut outputs,
                );
                if dev.is_null() {
                    let detail = if error_string.is_null() {
                        format!("error {}", error)
                    } else {
                        CStr::from_ptr(error_string).to_string_lossy().into_owned()
                    };
                    return Err(format!("can't create audio device object: {}", detail));
                }

                Ok(Self { dev, ev })
            }
        }

        pub fn set_audio_format_type(&mut self, name: &CStr) -> i64 {
            unsafe { UMSAudioDevice_set_audio_format_type(self.dev, self.ev, name.as_ptr()) as i64 }
        }

        pub fn set_sample_rate(&mut self, rate: i64) -> (i64, i64) {
            let mut out: c_long = 0;
            let rc = unsafe {
                UMSAudioDevice_set_sample_rate(self.dev, self.ev, rate as c_long, &mut out)
            };
            (rc as i64, out as i64)
        }

        pub fn set_byte_order(&mut self, order: &CStr) -> i64 {
            unsafe { UMSAudioDevice_set_byte_order(self.dev, self.ev, order.as_ptr()) as i64 }
        }

        pub fn set_number_format(&mut self, format: &CStr) -> i64 {
            unsafe { UMSAudioDevice_set_number_format(self.dev, self.ev, format.as_ptr()) as i64 }
        }

        pub fn set_bits_per_sample(&mut self, bits: i64) -> i64 {
            unsafe { UMSAudioDevice_set_bits_per_sample(self.dev, self.ev, bits as c_long) as i64 }
        }

        pub fn set_number_of_channels(&mut self, channels: i64) -> i64 {
            unsafe {
                UMSAudioDevice_set_number_of_channels(self.dev, self.ev, channels as c_long) as i64
            }
        }

        pub fn set_dma_buffer_size(&mut self, size: i64) -> (i64, i64) {
            let mut out: c_long = 0;
            let rc = unsafe {
                UMSAudioDevice_set_DMA_buffer_size(self.dev, self.ev, size as c_long, &mut out)
            };
            (rc as i64, out as i64)
        }

        pub fn set_audio_buffer_size(&mut self, size: i64) -> (i64, i64) {
            let mut out: c_long = 0;
            let rc = unsafe {
                UMSAudioDevice_set_audio_buffer_size(self.dev, self.ev, size as c_long, &mut out)
            };
            (rc as i64, out as i64)
        }

        pub fn set_time_format(&mut self, format: i64) -> i64 {
            unsafe { UMSAudioDevice_set_time_format(self.dev, self.ev, format as c_long) as i64 }
        }

        pub fn disable_output(&mut self, output: &CStr) -> i64 {
            unsafe { UMSAudioDevice_disable_output(self.dev, self.ev, output.as_ptr()) as i64 }
        }

        pub fn enable_output(&mut self, output: &CStr, left: i64, right: i64) -> i64 {
            let mut left = left as c_long;
            let mut right = right as c_long;
            unsafe {
                UMSAudioDevice_enable_output(self.dev, self.ev, output.as_ptr(), &mut left, &mut right)
                    as i64
            }
        }

        pub fn set_volume(&mut self, volume: i64) -> i64 {
            unsafe { UMSAudioDevice_set_volume(self.dev, self.ev, volume as c_long) as i64 }
        }

        pub fn set_balance(&mut self, balance: i64) -> i64 {
            unsafe { UMSAudioDevice_set_balance(self.dev, self.ev, balance as c_long) as i64 }
        }

        pub fn initialize(&mut self) -> i64 {
            unsafe { UMSAudioDevice_initialize(self.dev, self.ev) as i64 }
        }

        pub fn start(&mut self) -> i64 {
            unsafe { UMSAudioDevice_start(self.dev, self.ev) as i64 }
        }

        pub fn stop(&mut self) -> i64 {
            unsafe { UMSAudioDevice_stop(self.dev, self.ev) as i64 }
        }

        pub fn play_remaining_data(&mut self, block: bool) -> i64 {
            unsafe {
                UMSAudioDevice_play_remaining_data(self.dev, self.ev, block as c_long) as i64
            }
        }

        /// UMS 不会修改数据，这里只是满足 sequence 的可变指针签名
        pub fn write(&mut self, data: &[u8], samples: i64) -> (i64, i64) {
            let mut buffer = Buffer {
                maximum: data.len() as c_long,
                length: data.len() as c_long,
                buffer: data.as_ptr() as *mut u8,
            };
            let mut written: c_long = 0;
            let rc = unsafe {
                UMSAudioDevice_write(
                    self.dev,
                    self.ev,
                    &mut buffer,
                    samples as c_long,
                    &mut written,
                )
            };
            (rc as i64, written as i64)
        }
    }

    impl Drop for RawDevice {
        fn drop(&mut self) {
            unsafe {
                UMSAudioDevice_close(self.dev, self.ev);
                _somFree(self.dev);
            }
        }
    }
}

/// 非 AIX 平台：无法构造设备，方法不可达
#[cfg(not(target_os = "aix"))]
mod sys {
    use std::ffi::CStr;

    pub const AVAILABLE: bool = false;

    pub enum RawDevice {}

    impl RawDevice {
        pub fn make() -> Result<Self, String> {
            Err("UMS audio is only available on AIX".to_string())
        }

        pub fn set_audio_format_type(&mut self, _name: &CStr) -> i64 {
            match *self {}
        }

        pub fn set_sample_rate(&mut self, _rate: i64) -> (i64, i64) {
            match *self {}
        }

        pub fn set_byte_order(&mut self, _order: &CStr) -> i64 {
            match *self {}
        }

        pub fn set_number_format(&mut self, _format: &CStr) -> i64 {
            match *self {}
        }

        pub fn set_bits_per_sample(&mut self, _bits: i64) -> i64 {
            match *self {}
        }

        pub fn set_number_of_channels(&mut self, _channels: i64) -> i64 {
            match *self {}
        }

        pub fn set_dma_buffer_size(&mut self, _size: i64) -> (i64, i64) {
            match *self {}
        }

        pub fn set_audio_buffer_size(&mut self, _size: i64) -> (i64, i64) {
            match *self {}
        }

        pub fn set_time_format(&mut self, _format: i64) -> i64 {
            match *self {}
        }

        pub fn disable_output(&mut self, _output: &CStr) -> i64 {
            match *self {}
        }

        pub fn enable_output(&mut self, _output: &CStr, _left: i64, _right: i64) -> i64 {
            match *self {}
        }

        pub fn set_volume(&mut self, _volume: i64) -> i64 {
            match *self {}
        }

        pub fn set_balance(&mut self, _balance: i64) -> i64 {
            match *self {}
        }

        pub fn initialize(&mut self) -> i64 {
            match *self {}
        }

        pub fn start(&mut self) -> i64 {
            match *self {}
        }

        pub fn stop(&mut self) -> i64 {
            match *self {}
        }

        pub fn play_remaining_data(&mut self, _block: bool) -> i64 {
            match *self {}
        }

        pub fn write(&mut self, _data: &[u8], _samples: i64) -> (i64, i64) {
            match *self {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_formats() {
        let supported: Vec<_> = SampleFormat::ALL.into_iter().filter(|f| supports(*f)).collect();
        assert_eq!(
            supported,
            vec![SampleFormat::U8, SampleFormat::S16Lsb, SampleFormat::S16Msb]
        );
    }

    #[test]
    fn test_format_names() {
        let c = SampleFormat::U8.candidate();
        assert_eq!(number_format_name(c.number_format), c"UNSIGNED");

        let c = SampleFormat::S16Lsb.candidate();
        assert_eq!(byte_order_name(c.byte_order), c"LSB");
        assert_eq!(number_format_name(c.number_format), c"TWOS_COMPLEMENT");

        assert_eq!(byte_order_name(SampleFormat::S16Msb.byte_order()), c"MSB");
    }

    #[test]
    fn test_return_codes() {
        assert!(check(UMS_SUCCESS).is_ok());
        assert_eq!(
            check(UMS_INTERRUPTED).unwrap_err().kind(),
            io::ErrorKind::Interrupted
        );
        assert_eq!(
            check(UMS_PREEMPTED).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(check(4).unwrap_err().kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_levels() {
        assert_eq!(ums_levels(&OutputRouting::default()), (100, 0));
        let hard_left = OutputRouting {
            balance: 0.0,
            volume: 0.5,
            ..OutputRouting::default()
        };
        assert_eq!(ums_levels(&hard_left), (50, -100));
    }

    #[cfg(not(target_os = "aix"))]
    #[test]
    fn test_unavailable_off_aix() {
        assert!(!UmsDevice::is_available());
        let err = UmsDevice::open().err().expect("UMS must be unavailable");
        assert!(matches!(err, OutputError::DeviceUnavailable { .. }));
    }
}
