//! aix-audio - AIX 音频输出工具
//!
//! - info: 列出驱动并试探协商结果
//! - tone: 播放测试信号
//! - play: 播放音频文件（按文件采样率，不重采样）

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};

use aix_audio::audio::{coerce_channels, AudioSpec, OutputConfig, SampleFormat};
use aix_audio::backend::paud;
use aix_audio::decode::FileSource;
use aix_audio::driver::{self, AudioDriver};
use aix_audio::player::{PlaybackSummary, Player, StopReason};
use aix_audio::signal::{SampleSource, ToneSource};

/// aix-audio - Paced PCM output for AIX audio devices
#[derive(Parser)]
#[command(name = "aix-audio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output driver (paud or ums)
    #[arg(long, env = "AIXAUDIO_DRIVER", default_value = "paud", global = true)]
    driver: String,

    /// Device index (paud: channel node under /dev/paud0)
    #[arg(long, default_value = "0", global = true)]
    index: u32,

    /// Requested sample format (u8, s8, s16lsb, s16msb, u16lsb, u16msb)
    #[arg(short, long, default_value = "s16msb", global = true)]
    format: SampleFormat,

    /// Sample rate in Hz (tone only; files play at their own rate)
    #[arg(short, long, default_value = "44100", global = true)]
    rate: u32,

    /// Channel count (0 or 1 = mono, anything else = stereo)
    #[arg(short, long, global = true)]
    channels: Option<u8>,

    /// Frames per playback buffer
    #[arg(long, default_value = "1024", global = true)]
    samples: u16,

    /// Latency budget in milliseconds
    #[arg(long, default_value = "100", global = true)]
    latency_ms: u64,

    /// Give up waiting for the device after this many milliseconds
    #[arg(long, global = true)]
    wait_timeout_ms: Option<u64>,

    /// Lock the playback buffer in memory
    #[arg(long, global = true)]
    lock_memory: bool,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show drivers and the negotiated format
    Info,

    /// Play a test signal
    Tone {
        /// Waveform
        #[arg(long, value_enum, default_value = "sine")]
        wave: Wave,

        /// Sine frequency in Hz
        #[arg(long, default_value = "440")]
        frequency: f64,

        /// Amplitude (0.0 - 1.0)
        #[arg(long, default_value = "0.5")]
        amplitude: f64,

        /// Duration in seconds
        #[arg(long, default_value = "3")]
        seconds: f64,
    },

    /// Play file and exit
    Play {
        /// Audio file to play
        file: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Wave {
    Sine,
    Noise,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match cli.command {
        Commands::Info => show_driver_info(&cli),
        Commands::Tone {
            wave,
            frequency,
            amplitude,
            seconds,
        } => {
            let channels = coerce_channels(cli.channels.unwrap_or(2));
            let spec = AudioSpec::new(cli.format, cli.rate, channels, cli.samples);
            let (driver, spec) = open_driver(&cli, spec)?;

            let source = match wave {
                Wave::Sine => ToneSource::sine(frequency, spec.freq, spec.channels as usize, amplitude),
                Wave::Noise => ToneSource::noise(spec.freq, spec.channels as usize, amplitude),
            };
            let mut source = source.with_duration_secs(seconds);

            println!(
                "Playing {} for {:.1}s",
                match wave {
                    Wave::Sine => format!("{} Hz sine", frequency),
                    Wave::Noise => "white noise".to_string(),
                },
                seconds
            );
            run(driver, spec, &mut source)
        }
        Commands::Play { ref file } => {
            let mut source = FileSource::open(file)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let info = source.info().clone();

            let channels = coerce_channels(cli.channels.unwrap_or(info.channels.min(255) as u8));
            let spec = AudioSpec::new(cli.format, info.sample_rate, channels, cli.samples);
            let (driver, spec) = open_driver(&cli, spec)?;

            if spec.freq != info.sample_rate {
                log::warn!(
                    "Device plays at {} Hz, file is {} Hz (no resampling)",
                    spec.freq,
                    info.sample_rate
                );
            }

            println!("Playing: {}", file.display());
            println!(
                "  {} / {} | {} Hz | {} ch{}",
                info.format,
                info.codec,
                info.sample_rate,
                info.channels,
                info.duration_secs
                    .map(|d| format!(" | {}:{:02}", (d / 60.0) as u64, (d % 60.0) as u64))
                    .unwrap_or_default()
            );
            run(driver, spec, &mut source)
        }
    }
}

fn output_config(cli: &Cli) -> OutputConfig {
    OutputConfig {
        latency_budget: Duration::from_millis(cli.latency_ms),
        wait_timeout: cli.wait_timeout_ms.map(Duration::from_millis),
        lock_memory: cli.lock_memory,
        ..OutputConfig::default()
    }
}

/// 按名字创建驱动并打开，返回回写后的参数
fn open_driver(cli: &Cli, mut spec: AudioSpec) -> anyhow::Result<(Box<dyn AudioDriver>, AudioSpec)> {
    let bootstrap = driver::find(&cli.driver).ok_or_else(|| {
        let names: Vec<&str> = driver::BOOTSTRAPS.iter().map(|b| b.name).collect();
        anyhow!("Unknown driver '{}' (available: {})", cli.driver, names.join(", "))
    })?;

    let mut driver = (bootstrap.create)(cli.index, output_config(cli));
    driver
        .open(&mut spec)
        .with_context(|| format!("{} ({})", bootstrap.description, bootstrap.name))?;

    log::info!(
        "Opened {}: {} @ {} Hz, {} ch, {} frames ({} bytes)",
        bootstrap.name,
        spec.format,
        spec.freq,
        spec.channels,
        spec.samples,
        spec.size
    );
    Ok((driver, spec))
}

/// 播放直到结束或 Ctrl+C
fn run(
    mut driver: Box<dyn AudioDriver>,
    spec: AudioSpec,
    source: &mut dyn SampleSource,
) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    })?;

    println!(
        "Output: {} @ {} Hz, {} ch (Ctrl+C to stop)",
        spec.format, spec.freq, spec.channels
    );

    let summary = Player::new(driver.as_mut(), spec, stop).play(source);
    driver.close();

    let summary = summary?;
    print_summary(&summary);

    if summary.reason == StopReason::Disabled {
        return Err(anyhow!("Audio output was disabled by a write error"));
    }
    Ok(())
}

fn print_summary(summary: &PlaybackSummary) {
    match summary.reason {
        StopReason::Finished => println!("\nPlayback finished."),
        StopReason::Interrupted => println!("\nPlayback interrupted."),
        StopReason::Disabled => println!("\nPlayback stopped: output disabled."),
    }
    println!(
        "{} frames in {} chunks, {:.2}s",
        summary.frames, summary.chunks, summary.elapsed_secs
    );
    if summary.wait_timeouts > 0 {
        println!("Wait timeouts: {}", summary.wait_timeouts);
    }
    if let Some(stats) = &summary.stats {
        println!("\n{}", stats);
    }
}

/// 显示驱动信息
fn show_driver_info(cli: &Cli) -> anyhow::Result<()> {
    println!("=== Audio Output Drivers ===\n");

    for bootstrap in driver::BOOTSTRAPS.iter() {
        let available = (bootstrap.available)();
        let selected = if bootstrap.name.eq_ignore_ascii_case(&cli.driver) {
            " *"
        } else {
            ""
        };
        println!(
            "{:<5} {:<14} {}{}",
            bootstrap.name,
            bootstrap.description,
            if available { "available" } else { "unavailable" },
            selected
        );
    }
    println!();
    println!("paud device: {}", paud::device_path(cli.index).display());
    println!("* = selected (--driver or AIXAUDIO_DRIVER)\n");

    let channels = coerce_channels(cli.channels.unwrap_or(2));
    let requested = AudioSpec::new(cli.format, cli.rate, channels, cli.samples);
    match open_driver(cli, requested) {
        Ok((mut driver, spec)) => {
            println!("Requested: {} @ {} Hz, {} ch", requested.format, requested.freq, requested.channels);
            println!("Accepted:  {} @ {} Hz, {} ch", spec.format, spec.freq, spec.channels);
            println!("Buffer:    {} frames, {} bytes, silence 0x{:02x}", spec.samples, spec.size, spec.silence);
            driver.close();
        }
        Err(e) => println!("Can't open {}: {:#}", cli.driver, e),
    }

    Ok(())
}
