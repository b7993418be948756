use ash::vk;
use serde::Deserialize;

/// 纹理格式
///
/// 只收录 RenderGraph 需要估算大小的常用格式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GfxFormat {
    #[default]
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Rgba16Float,
    Rgba32Float,
    R11G11B10Float,
    R8Unorm,
    R16Float,
    R32Float,
    Rg16Float,
    D32Float,
    D24UnormS8Uint,
}

impl GfxFormat {
    /// 单个像素占用的字节数
    pub const fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Float => 2,
            Self::Rgba8Unorm
            | Self::Rgba8Srgb
            | Self::Bgra8Unorm
            | Self::R11G11B10Float
            | Self::R32Float
            | Self::Rg16Float
            | Self::D32Float
            | Self::D24UnormS8Uint => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    #[inline]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::D32Float | Self::D24UnormS8Uint)
    }

    #[inline]
    pub const fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint)
    }

    pub const fn vk_format(self) -> vk::Format {
        match self {
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            Self::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Self::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
            Self::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
            Self::R11G11B10Float => vk::Format::B10G11R11_UFLOAT_PACK32,
            Self::R8Unorm => vk::Format::R8_UNORM,
            Self::R16Float => vk::Format::R16_SFLOAT,
            Self::R32Float => vk::Format::R32_SFLOAT,
            Self::Rg16Float => vk::Format::R16G16_SFLOAT,
            Self::D32Float => vk::Format::D32_SFLOAT,
            Self::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
        }
    }

    /// 根据格式推断 image aspect
    pub fn aspect(self) -> vk::ImageAspectFlags {
        if self.has_stencil() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}
