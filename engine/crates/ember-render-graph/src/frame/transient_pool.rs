//! 每个 frame slot 独占的 transient 内存池
//!
//! 别名分配的结果决定了池的大小；池只记录占用和物理 id 的范围，
//! 真正的内存由设备层在对应的 id 上创建。

use crate::render_graph::aliasing::RgAliasingPlan;

/// transient 物理 id 的起点，高位区分 slot，避免与导入资源的 id 冲突
const TRANSIENT_ID_BASE: u64 = 1 << 48;
const TRANSIENT_ID_SLOT_SHIFT: u32 = 32;

#[derive(Debug)]
pub struct RgTransientPool {
    slot_index: usize,
    budget: u64,
    /// 当前帧占用的字节数
    used_bytes: u64,
    /// 当前帧分配的 transient 资源数量
    allocation_count: usize,
    high_water_bytes: u64,
}

// new & init
impl RgTransientPool {
    pub fn new(slot_index: usize, budget: u64) -> Self {
        Self {
            slot_index,
            budget,
            used_bytes: 0,
            allocation_count: 0,
            high_water_bytes: 0,
        }
    }
}

// getters
impl RgTransientPool {
    /// 本 slot 的 transient 资源物理 id 从这里开始编号
    #[inline]
    pub fn id_base(&self) -> u64 {
        TRANSIENT_ID_BASE + ((self.slot_index as u64) << TRANSIENT_ID_SLOT_SHIFT)
    }

    #[inline]
    pub fn budget(&self) -> u64 {
        self.budget
    }

    #[inline]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    /// 历史峰值，设备重置后也保留
    #[inline]
    pub fn high_water_bytes(&self) -> u64 {
        self.high_water_bytes
    }
}

// update
impl RgTransientPool {
    /// 记录一次成功提交的帧的占用
    pub fn commit(&mut self, plan: &RgAliasingPlan) {
        self.used_bytes = plan.pool_bytes();
        self.allocation_count = plan.placements().count();
        self.high_water_bytes = self.high_water_bytes.max(self.used_bytes);
    }

    /// slot 被复用时，上一帧的 transient 内存随之失效
    pub fn reset(&mut self) {
        if self.allocation_count > 0 {
            log::trace!(
                "transient pool {}: released {} allocations ({} bytes)",
                self.slot_index,
                self.allocation_count,
                self.used_bytes
            );
        }
        self.used_bytes = 0;
        self.allocation_count = 0;
    }
}
