//! 资源状态定义
//!
//! `GfxResourceState` 是 RenderGraph 计算 barrier 的基本单位。
//! 每个状态都可以翻译成 Vulkan 的 pipeline stage、access mask 和 image layout。

use ash::vk;

use crate::queue::GfxQueueClass;

/// 资源在 GPU 上的访问状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum GfxResourceState {
    /// 内容未定义（新创建的 transient 资源）
    #[default]
    Undefined,
    /// 多个队列之间共享时使用的通用状态
    Common,
    RenderTarget,
    /// 仅可用于呈现
    Present,
    CopyDest,
    CopySource,
    ResolveDest,
    ResolveSource,
    /// 片段着色器读取
    PixelShaderResource,
    /// 非片段着色器读取（vertex / compute）
    NonPixelShaderResource,
    /// 任意着色器阶段读取
    ShaderResource,
    DepthWrite,
    DepthRead,
    IndexBuffer,
    VertexBuffer,
    ConstantBuffer,
    IndirectArgument,
    UnorderedAccess,
}

// 常量 & 分类
impl GfxResourceState {
    pub const ALL: [Self; 18] = [
        Self::Undefined,
        Self::Common,
        Self::RenderTarget,
        Self::Present,
        Self::CopyDest,
        Self::CopySource,
        Self::ResolveDest,
        Self::ResolveSource,
        Self::PixelShaderResource,
        Self::NonPixelShaderResource,
        Self::ShaderResource,
        Self::DepthWrite,
        Self::DepthRead,
        Self::IndexBuffer,
        Self::VertexBuffer,
        Self::ConstantBuffer,
        Self::IndirectArgument,
        Self::UnorderedAccess,
    ];

    /// 只读状态：相邻的相同只读状态不需要 barrier
    #[inline]
    pub const fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::Present
                | Self::CopySource
                | Self::ResolveSource
                | Self::PixelShaderResource
                | Self::NonPixelShaderResource
                | Self::ShaderResource
                | Self::DepthRead
                | Self::IndexBuffer
                | Self::VertexBuffer
                | Self::ConstantBuffer
                | Self::IndirectArgument
        )
    }

    /// 该状态下允许写入
    #[inline]
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Self::Common | Self::RenderTarget | Self::CopyDest | Self::ResolveDest | Self::DepthWrite | Self::UnorderedAccess
        )
    }

    /// 只对 buffer 有意义的状态
    #[inline]
    pub const fn is_buffer_only(self) -> bool {
        matches!(self, Self::IndexBuffer | Self::VertexBuffer | Self::ConstantBuffer | Self::IndirectArgument)
    }

    /// 只对 texture 有意义的状态
    #[inline]
    pub const fn is_texture_only(self) -> bool {
        matches!(
            self,
            Self::RenderTarget
                | Self::Present
                | Self::ResolveDest
                | Self::ResolveSource
                | Self::DepthWrite
                | Self::DepthRead
        )
    }

    /// 检查指定队列类别能否在该状态下访问资源
    ///
    /// copy 队列只支持 Common/CopySource/CopyDest；
    /// compute 队列不支持光栅化相关状态。
    pub const fn is_supported_on(self, queue: GfxQueueClass) -> bool {
        match queue {
            GfxQueueClass::Graphics => !matches!(self, Self::Undefined),
            GfxQueueClass::Compute => matches!(
                self,
                Self::Common
                    | Self::CopySource
                    | Self::CopyDest
                    | Self::NonPixelShaderResource
                    | Self::ConstantBuffer
                    | Self::IndirectArgument
                    | Self::UnorderedAccess
            ),
            GfxQueueClass::Copy => matches!(self, Self::Common | Self::CopySource | Self::CopyDest),
        }
    }
}

/// Vulkan 侧的状态三元组
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GfxVkState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl GfxVkState {
    /// 读操作的 access 在 barrier 的 src 侧没有意义
    const READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
            | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
            | vk::AccessFlags2::TRANSFER_READ.as_raw()
            | vk::AccessFlags2::MEMORY_READ.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags2::UNIFORM_READ.as_raw()
            | vk::AccessFlags2::INDEX_READ.as_raw()
            | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw()
            | vk::AccessFlags2::INDIRECT_COMMAND_READ.as_raw(),
    );

    /// 获取用于 barrier src 的 access（去掉读操作）
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & !Self::READ_ACCESS
    }
}

// vulkan 映射
impl GfxResourceState {
    /// 翻译为 Vulkan 的 stage/access/layout
    ///
    /// buffer 专用的状态返回 `UNDEFINED` layout，调用方不应该使用它。
    pub fn to_vk(self) -> GfxVkState {
        let all_shaders = vk::PipelineStageFlags2::VERTEX_SHADER
            | vk::PipelineStageFlags2::FRAGMENT_SHADER
            | vk::PipelineStageFlags2::COMPUTE_SHADER;
        let depth_tests =
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;

        let (stage, access, layout) = match self {
            Self::Undefined => {
                (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED)
            }
            Self::Common => (
                vk::PipelineStageFlags2::ALL_COMMANDS,
                vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
                vk::ImageLayout::GENERAL,
            ),
            Self::RenderTarget => (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_READ | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            Self::Present => {
                (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR)
            }
            Self::CopyDest | Self::ResolveDest => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            Self::CopySource | Self::ResolveSource => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ),
            Self::PixelShaderResource => (
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            Self::NonPixelShaderResource => (
                vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::COMPUTE_SHADER,
                vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ),
            Self::ShaderResource => {
                (all_shaders, vk::AccessFlags2::SHADER_SAMPLED_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            }
            Self::DepthWrite => (
                depth_tests,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            Self::DepthRead => (
                depth_tests | vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags2::SHADER_SAMPLED_READ,
                vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            ),
            Self::IndexBuffer => {
                (vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ, vk::ImageLayout::UNDEFINED)
            }
            Self::VertexBuffer => (
                vk::PipelineStageFlags2::VERTEX_INPUT,
                vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
                vk::ImageLayout::UNDEFINED,
            ),
            Self::ConstantBuffer => (all_shaders, vk::AccessFlags2::UNIFORM_READ, vk::ImageLayout::UNDEFINED),
            Self::IndirectArgument => (
                vk::PipelineStageFlags2::DRAW_INDIRECT,
                vk::AccessFlags2::INDIRECT_COMMAND_READ,
                vk::ImageLayout::UNDEFINED,
            ),
            Self::UnorderedAccess => (
                vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                vk::ImageLayout::GENERAL,
            ),
        };

        GfxVkState { stage, access, layout }
    }
}
