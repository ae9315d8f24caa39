//! 播放缓冲区
//!
//! 会话独占的单块字节缓冲区：调用方填充，写入器整块写出。
//! 不做双缓冲，填充和写入严格交替。

use std::collections::TryReserveError;

#[cfg(test)]
thread_local! {
    /// 让本线程下一次分配失败
    pub(crate) static FAIL_NEXT_ALLOCATION: std::cell::Cell<bool> =
        const { std::cell::Cell::new(false) };
}

/// 播放缓冲区
pub struct PlaybackBuffer {
    data: Vec<u8>,
    /// 当前待播放的有效字节数（≤ 容量）
    len: usize,
    silence: u8,
    memory_locked: bool,
}

impl PlaybackBuffer {
    /// 分配 `capacity` 字节并用静音值填充
    ///
    /// 分配失败返回错误而不是 abort
    pub fn allocate(capacity: usize, silence: u8) -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        #[cfg(test)]
        if FAIL_NEXT_ALLOCATION.with(|f| f.replace(false)) {
            data.try_reserve_exact(usize::MAX)?;
        }
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, silence);

        Ok(Self {
            data,
            len: capacity,
            silence,
            memory_locked: false,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn silence(&self) -> u8 {
        self.silence
    }

    /// 可写的完整缓冲区
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// 已暂存、待写出的字节
    #[inline]
    pub fn staged(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// 设置有效字节数，超过容量时截断到容量
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// 整块填充静音，有效长度恢复为容量
    pub fn fill_silence(&mut self) {
        self.data.fill(self.silence);
        self.len = self.data.len();
    }

    /// 锁定缓冲区内存，防止写入路径上出现 page fault
    ///
    /// 返回是否成功锁定
    pub fn lock_memory(&mut self) -> bool {
        if self.memory_locked || self.data.is_empty() {
            return self.memory_locked;
        }

        let ptr = self.data.as_ptr() as *const libc::c_void;
        let len = self.data.len();

        let result = unsafe { libc::mlock(ptr, len) };
        if result == 0 {
            self.memory_locked = true;
            log::debug!("Playback buffer locked: {} bytes", len);
        } else {
            log::warn!(
                "Failed to lock playback buffer memory: {}",
                std::io::Error::last_os_error()
            );
        }
        self.memory_locked
    }

    fn unlock_memory(&mut self) {
        if !self.memory_locked {
            return;
        }

        let ptr = self.data.as_ptr() as *const libc::c_void;
        unsafe {
            libc::munlock(ptr, self.data.len());
        }
        self.memory_locked = false;
    }
}

impl Drop for PlaybackBuffer {
    fn drop(&mut self) {
        self.unlock_memory();
    }
}
