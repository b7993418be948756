use crate::{commands::command_list::GfxCommandList, queue::GfxQueueClass};

/// 由设备分配的命令缓冲
///
/// 属于某个 frame slot 的 command allocator，slot 被复用时随 allocator 一起重置。
#[derive(Clone, Debug)]
pub struct GfxCommandBuffer {
    id: u64,
    queue: GfxQueueClass,
    slot: usize,
    name: String,
    list: GfxCommandList,
}

// new & init
impl GfxCommandBuffer {
    pub fn new(id: u64, queue: GfxQueueClass, slot: usize, name: impl Into<String>) -> Self {
        Self {
            id,
            queue,
            slot,
            name: name.into(),
            list: GfxCommandList::new(),
        }
    }
}

// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueClass {
        self.queue
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn list(&self) -> &GfxCommandList {
        &self.list
    }

    #[inline]
    pub fn list_mut(&mut self) -> &mut GfxCommandList {
        &mut self.list
    }
}

// tools
impl GfxCommandBuffer {
    /// 把一段录制好的命令追加到命令缓冲末尾
    #[inline]
    pub fn record(&mut self, list: GfxCommandList) {
        self.list.append(list);
    }
}
