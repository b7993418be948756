use std::fmt;

/// 设备侧的物理资源标识
///
/// 由设备层或 transient pool 分配，RenderGraph 只做透传。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct GfxResourceId(pub u64);

impl GfxResourceId {
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for GfxResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GfxResource({})", self.0)
    }
}

impl fmt::Display for GfxResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 资源类型：决定 barrier 是否涉及 layout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxResourceKind {
    Texture,
    Buffer,
}
