//! 设备后端
//!
//! - paud: 字符设备 + ioctl
//! - ums: UMS 设备对象（仅 AIX）

pub mod paud;
pub mod ums;

pub use paud::PaudDevice;
pub use ums::UmsDevice;
