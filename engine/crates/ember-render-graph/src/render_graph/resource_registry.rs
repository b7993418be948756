use ember_gfx::{GfxQueueClass, GfxResourceId, GfxResourceState};
use slotmap::SlotMap;

use crate::{
    error::RgDeclareError,
    render_graph::{
        resource::{RgBufferDesc, RgResource, RgResourceDesc, RgTextureDesc},
        resource_handle::RgResourceHandle,
    },
};

/// 资源注册表
///
/// 权威资源状态的唯一持有者。Pass 只持有句柄，只有提交成功后才会把
/// barrier 计算得到的最终状态写回这里。
/// 使用 SlotMap 存储资源，提供稳定的句柄和高效的访问。
#[derive(Clone, Default)]
pub struct RgResourceRegistry {
    resources: SlotMap<RgResourceHandle, RgResource>,
}

// new & init
impl RgResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

// register
impl RgResourceRegistry {
    /// 导入外部纹理
    pub fn import_texture(
        &mut self,
        name: impl Into<String>,
        physical: GfxResourceId,
        desc: RgTextureDesc,
        initial_state: GfxResourceState,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.import(name, physical, desc.into(), initial_state)
    }

    /// 导入外部缓冲区
    pub fn import_buffer(
        &mut self,
        name: impl Into<String>,
        physical: GfxResourceId,
        desc: RgBufferDesc,
        initial_state: GfxResourceState,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.import(name, physical, desc.into(), initial_state)
    }

    pub fn import(
        &mut self,
        name: impl Into<String>,
        physical: GfxResourceId,
        desc: RgResourceDesc,
        initial_state: GfxResourceState,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        let name = name.into();
        desc.validate(&name)?;
        Ok(self.resources.insert(RgResource::imported(name, physical, desc, initial_state)))
    }

    /// 创建属于 `frame_id` 的 transient 资源
    ///
    /// 帧结束时随 `purge_transients` 一起移除，一般通过 `RgFrame::create_transient_*` 创建。
    pub fn create_transient(
        &mut self,
        name: impl Into<String>,
        desc: RgResourceDesc,
        frame_id: u64,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        let name = name.into();
        desc.validate(&name)?;
        Ok(self.resources.insert(RgResource::transient(name, desc, frame_id)))
    }

    /// 从注册表中移除资源
    pub(crate) fn remove(&mut self, handle: RgResourceHandle) -> Result<RgResource, RgDeclareError> {
        self.resources.remove(handle).ok_or(RgDeclareError::UnknownResource(handle))
    }
}

// getter & iter
impl RgResourceRegistry {
    #[inline]
    pub fn get(&self, handle: RgResourceHandle) -> Option<&RgResource> {
        self.resources.get(handle)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: RgResourceHandle) -> Option<&mut RgResource> {
        self.resources.get_mut(handle)
    }

    #[inline]
    pub fn contains(&self, handle: RgResourceHandle) -> bool {
        self.resources.contains_key(handle)
    }

    /// 资源名称，句柄无效时返回占位符
    pub fn name_of(&self, handle: RgResourceHandle) -> &str {
        self.resources.get(handle).map(|r| r.name.as_str()).unwrap_or("<unknown>")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn transient_count(&self) -> usize {
        self.resources.values().filter(|r| r.is_transient()).count()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (RgResourceHandle, &RgResource)> {
        self.resources.iter()
    }
}

// update
impl RgResourceRegistry {
    /// 由流式加载层调用
    pub fn set_resident(&mut self, handle: RgResourceHandle, resident: bool) -> Result<(), RgDeclareError> {
        let resource = self.resources.get_mut(handle).ok_or(RgDeclareError::UnknownResource(handle))?;
        resource.resident = resident;
        Ok(())
    }

    /// 写回一次成功提交之后的状态
    pub(crate) fn commit_state(
        &mut self,
        handle: RgResourceHandle,
        current_state: GfxResourceState,
        last_queue: Option<GfxQueueClass>,
        queue_states: [GfxResourceState; GfxQueueClass::COUNT],
        frame_id: u64,
    ) {
        if let Some(resource) = self.resources.get_mut(handle) {
            resource.current_state = current_state;
            resource.last_queue = last_queue;
            resource.queue_states = queue_states;
            resource.last_used_frame = Some(frame_id);
        }
    }

    /// 移除所有 transient 资源，它们的句柄随之失效
    pub(crate) fn purge_transients(&mut self) -> usize {
        let before = self.resources.len();
        self.resources.retain(|_, r| !r.is_transient());
        let purged = before - self.resources.len();
        if purged > 0 {
            log::trace!("purged {purged} transient resources");
        }
        purged
    }

    /// 清除上一帧的声明区间
    pub(crate) fn clear_declared_lifetimes(&mut self) {
        for resource in self.resources.values_mut() {
            resource.declared_lifetime = None;
        }
    }

    /// 设备重置后，所有持久资源回到导入时的状态
    pub(crate) fn reset_states(&mut self) {
        for resource in self.resources.values_mut() {
            resource.reset_state();
        }
    }
}
