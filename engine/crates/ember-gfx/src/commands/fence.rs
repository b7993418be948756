use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

/// 进程内的 timeline fence
///
/// 值只会单调递增；等待方阻塞在 condvar 上直到值达到目标。
#[derive(Debug, Default)]
pub struct GfxTimelineFence {
    value: Mutex<u64>,
    cond: Condvar,
}

// new & init
impl GfxTimelineFence {
    pub fn new(initial_value: u64) -> Self {
        Self {
            value: Mutex::new(initial_value),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        // 锁内只有一个整数，poison 之后的值依然有效
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// getters
impl GfxTimelineFence {
    #[inline]
    pub fn completed_value(&self) -> u64 {
        *self.lock()
    }
}

// tools
impl GfxTimelineFence {
    /// 推进到 `value`，比当前值小时忽略
    pub fn signal(&self, value: u64) {
        let mut guard = self.lock();
        if value > *guard {
            *guard = value;
            self.cond.notify_all();
        }
    }

    /// 阻塞等待 fence 达到 `value`
    ///
    /// # 返回
    /// 超时返回 `false`
    pub fn wait(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while *guard < value {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match self.cond.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// 设备丢失后把 fence 强制设置到 `value`，并唤醒所有等待者
    pub fn reset(&self, value: u64) {
        let mut guard = self.lock();
        *guard = value;
        self.cond.notify_all();
    }
}
