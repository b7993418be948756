//! 资源 barrier 描述
//!
//! 由 RenderGraph 计算得到，录制到命令缓冲中。
//! 设备层可以通过 `to_vk_image_barrier` / `to_vk_buffer_barrier` 翻译为 synchronization2 的结构体。

use std::fmt;

use ash::vk;

use crate::{
    format::GfxFormat,
    queue::GfxQueueClass,
    resource::{GfxResourceId, GfxResourceKind},
    state::GfxResourceState,
};

/// barrier 类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GfxBarrierKind {
    /// 状态转换
    Transition,
    /// 同为 UnorderedAccess 的连续写入，只需要保证执行顺序和可见性
    UnorderedAccess,
    /// 同一块内存被新的 transient 资源接管
    Aliasing,
}

/// 单个资源上的 barrier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfxBarrier {
    pub resource: GfxResourceId,
    pub resource_kind: GfxResourceKind,
    pub kind: GfxBarrierKind,
    pub before: GfxResourceState,
    pub after: GfxResourceState,
    /// 跨队列移交时，资源上一次被使用的队列
    pub src_queue: Option<GfxQueueClass>,
}

// new & init
impl GfxBarrier {
    pub fn transition(
        resource: GfxResourceId,
        resource_kind: GfxResourceKind,
        before: GfxResourceState,
        after: GfxResourceState,
    ) -> Self {
        Self {
            resource,
            resource_kind,
            kind: GfxBarrierKind::Transition,
            before,
            after,
            src_queue: None,
        }
    }

    pub fn unordered_access(resource: GfxResourceId, resource_kind: GfxResourceKind) -> Self {
        Self {
            resource,
            resource_kind,
            kind: GfxBarrierKind::UnorderedAccess,
            before: GfxResourceState::UnorderedAccess,
            after: GfxResourceState::UnorderedAccess,
            src_queue: None,
        }
    }

    /// 内存接管：之前的内容全部作废，所以 before 总是 Undefined
    pub fn aliasing(resource: GfxResourceId, resource_kind: GfxResourceKind, after: GfxResourceState) -> Self {
        Self {
            resource,
            resource_kind,
            kind: GfxBarrierKind::Aliasing,
            before: GfxResourceState::Undefined,
            after,
            src_queue: None,
        }
    }

    #[inline]
    pub fn with_src_queue(mut self, queue: Option<GfxQueueClass>) -> Self {
        self.src_queue = queue;
        self
    }
}

// getters
impl GfxBarrier {
    #[inline]
    pub fn is_transition(&self) -> bool {
        self.kind == GfxBarrierKind::Transition
    }

    #[inline]
    pub fn is_cross_queue(&self) -> bool {
        self.src_queue.is_some()
    }
}

// vulkan 翻译
impl GfxBarrier {
    /// 翻译为 `vk::ImageMemoryBarrier2`
    ///
    /// `queue_family` 为 (src, dst) 队列族，仅在跨队列移交时使用。
    pub fn to_vk_image_barrier(
        &self,
        image: vk::Image,
        format: GfxFormat,
        queue_family: Option<(u32, u32)>,
    ) -> vk::ImageMemoryBarrier2<'static> {
        let src = self.before.to_vk();
        let dst = self.after.to_vk();
        let (src_family, dst_family) = queue_family.unwrap_or((vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED));

        vk::ImageMemoryBarrier2::default()
            .image(image)
            .src_stage_mask(src.stage)
            .src_access_mask(src.src_access())
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .old_layout(src.layout)
            .new_layout(dst.layout)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(format.aspect())
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            )
    }

    pub fn to_vk_buffer_barrier(
        &self,
        buffer: vk::Buffer,
        queue_family: Option<(u32, u32)>,
    ) -> vk::BufferMemoryBarrier2<'static> {
        let src = self.before.to_vk();
        let dst = self.after.to_vk();
        let (src_family, dst_family) = queue_family.unwrap_or((vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED));

        vk::BufferMemoryBarrier2::default()
            .buffer(buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .src_stage_mask(src.stage)
            .src_access_mask(src.src_access())
            .dst_stage_mask(dst.stage)
            .dst_access_mask(dst.access)
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
    }
}

impl fmt::Display for GfxBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            GfxBarrierKind::Transition => write!(f, "{} {:?} -> {:?}", self.resource, self.before, self.after)?,
            GfxBarrierKind::UnorderedAccess => write!(f, "{} uav", self.resource)?,
            GfxBarrierKind::Aliasing => write!(f, "{} alias -> {:?}", self.resource, self.after)?,
        }
        if let Some(queue) = self.src_queue {
            write!(f, " (from {queue})")?;
        }
        Ok(())
    }
}
