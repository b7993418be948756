//! RenderGraph 句柄定义
//!
//! 这些句柄是 graph 内部的虚拟引用，与设备层的 `GfxResourceId` 分离。

use std::fmt;

slotmap::new_key_type! {
    /// 资源句柄
    ///
    /// 由 `RgResourceRegistry` 分配。transient 资源在帧结束后被移除，
    /// 之后再使用它的句柄会被判定为无效（slotmap 的代际检查）。
    pub struct RgResourceHandle;
}

/// Pass 在当前帧中的编号，即声明顺序
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RgPassId(pub(crate) usize);

impl RgPassId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for RgPassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RgPass({})", self.0)
    }
}
