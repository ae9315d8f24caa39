//! 音频文件解码

pub mod decoder;

pub use decoder::{AudioInfo, DecodeError, FileSource};
