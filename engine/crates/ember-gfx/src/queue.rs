use std::fmt;

use serde::Deserialize;

/// 硬件队列类别
///
/// 每个 Pass 只能在一个队列类别上执行。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GfxQueueClass {
    Graphics,
    Compute,
    Copy,
}

impl GfxQueueClass {
    pub const COUNT: usize = 3;
    pub const ALL: [Self; Self::COUNT] = [Self::Graphics, Self::Compute, Self::Copy];

    /// 作为数组下标使用
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Graphics => "graphics",
            Self::Compute => "compute",
            Self::Copy => "copy",
        }
    }
}

impl fmt::Display for GfxQueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
