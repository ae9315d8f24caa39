//! 格式协商
//!
//! 从请求格式开始，按固定回退顺序逐个编程设备，
//! 接受第一个设备配置成功的候选。

use super::device::OutputDevice;
use super::format::{AudioFormat, SampleFormat};
use crate::error::OutputError;

/// 声道数只支持单声道/立体声
///
/// 0 和 1 → 1，其余一律 → 2
#[inline]
pub fn coerce_channels(requested: u8) -> u8 {
    if requested > 1 {
        2
    } else {
        1
    }
}

/// 在活动设备上协商格式
///
/// 成功时设备的格式寄存器已被编程；返回的格式中采样率为设备实际采用的值
pub fn negotiate<D: OutputDevice + ?Sized>(
    device: &mut D,
    requested: SampleFormat,
    sample_rate: u32,
    channels: u8,
) -> Result<AudioFormat, OutputError> {
    let channels = coerce_channels(channels);

    for format in requested.fallback_order() {
        let candidate = format.candidate();
        log::debug!(
            "{}: trying {} ({} Hz, {} ch)",
            device.name(),
            format,
            sample_rate,
            channels
        );

        match device.program_format(&candidate, sample_rate, channels) {
            Ok(actual_rate) => {
                if actual_rate != sample_rate {
                    log::debug!(
                        "{}: device adjusted rate {} Hz → {} Hz",
                        device.name(),
                        sample_rate,
                        actual_rate
                    );
                }
                let accepted = AudioFormat::new(format, actual_rate, channels);
                log::info!(
                    "{}: accepted {} @ {} Hz, {} ch, {} bytes/frame",
                    device.name(),
                    format,
                    actual_rate,
                    channels,
                    accepted.bytes_per_frame()
                );
                return Ok(accepted);
            }
            Err(e) => {
                log::debug!("{}: {} rejected: {}", device.name(), format, e);
            }
        }
    }

    Err(OutputError::FormatUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockDevice;

    #[test]
    fn test_requested_format_accepted_first() {
        let (mut device, log) = MockDevice::new();
        let format = negotiate(&mut device, SampleFormat::S16Msb, 22050, 2).unwrap();

        assert_eq!(format.sample_format, SampleFormat::S16Msb);
        assert_eq!(format.sample_rate, 22050);
        assert_eq!(log.lock().unwrap().tried, vec![SampleFormat::S16Msb]);
    }

    #[test]
    fn test_falls_through_in_fixed_order() {
        let (mut device, log) = MockDevice::new();
        device.accepted = vec![SampleFormat::U8];

        let format = negotiate(&mut device, SampleFormat::U16Lsb, 8000, 1).unwrap();
        assert_eq!(format.sample_format, SampleFormat::U8);
        assert_eq!(
            log.lock().unwrap().tried,
            vec![
                SampleFormat::U16Lsb,
                SampleFormat::U16Msb,
                SampleFormat::S16Lsb,
                SampleFormat::S16Msb,
                SampleFormat::U8,
            ]
        );
    }

    #[test]
    fn test_exhausts_full_sequence_before_failing() {
        for requested in SampleFormat::ALL {
            let (mut device, log) = MockDevice::new();
            device.accepted.clear();

            let result = negotiate(&mut device, requested, 44100, 2);
            assert!(matches!(result, Err(OutputError::FormatUnavailable)));
            assert_eq!(
                log.lock().unwrap().tried,
                requested.fallback_order().to_vec(),
                "fallback order for {}",
                requested
            );
        }
    }

    #[test]
    fn test_channel_coercion() {
        for (requested, expected) in [(0u8, 1u8), (1, 1), (2, 2), (6, 2), (255, 2)] {
            let (mut device, log) = MockDevice::new();
            let format = negotiate(&mut device, SampleFormat::S16Lsb, 44100, requested).unwrap();
            assert_eq!(format.channels, expected, "requested {} channels", requested);
            assert_eq!(log.lock().unwrap().programmed_channels, Some(expected));
        }
    }

    #[test]
    fn test_bytes_per_frame_for_every_candidate() {
        for format in SampleFormat::ALL {
            for channels in [1u8, 2] {
                let (mut device, _log) = MockDevice::new();
                device.accepted = vec![format];
                let accepted = negotiate(&mut device, format, 44100, channels).unwrap();
                assert_eq!(
                    accepted.bytes_per_frame(),
                    (format.bits_per_sample() as usize / 8) * channels as usize
                );
            }
        }
    }

    #[test]
    fn test_device_rate_is_reported() {
        let (mut device, _log) = MockDevice::new();
        device.rate_override = Some(44100);

        let format = negotiate(&mut device, SampleFormat::U8, 44000, 1).unwrap();
        assert_eq!(format.sample_rate, 44100);
    }
}
