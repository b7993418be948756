use std::time::Duration;

use crate::{
    commands::{command_buffer::GfxCommandBuffer, submit_info::GfxSubmitInfo},
    error::GfxError,
    queue::GfxQueueClass,
    resource::GfxResourceId,
};

/// RenderGraph 依赖的设备能力
///
/// 所有方法都可能被多个线程同时调用。
pub trait GfxDevice: Send + Sync {
    /// 重置某个 frame slot 在某个队列上的 command allocator
    ///
    /// 调用方必须保证该 slot 上一次提交的工作已经完成。
    fn reset_command_allocator(&self, slot: usize, queue: GfxQueueClass) -> Result<(), GfxError>;

    /// 从 frame slot 的 allocator 中分配一个命令缓冲
    fn allocate_command_buffer(
        &self,
        slot: usize,
        queue: GfxQueueClass,
        name: &str,
    ) -> Result<GfxCommandBuffer, GfxError>;

    /// 按顺序提交到对应队列
    ///
    /// 每个 submit 完成后，队列的 fence 会推进到 `signal_value`。
    fn submit(&self, submits: Vec<GfxSubmitInfo>) -> Result<(), GfxError>;

    /// 队列 fence 当前已经完成的值
    fn completed_value(&self, queue: GfxQueueClass) -> u64;

    /// 阻塞等待队列 fence 达到 `value`
    fn wait_for_value(&self, queue: GfxQueueClass, value: u64, timeout: Duration) -> Result<(), GfxError>;

    /// 等待所有队列空闲
    fn wait_idle(&self) -> Result<(), GfxError>;

    /// 资源的内存当前是否驻留
    fn is_resident(&self, _resource: GfxResourceId) -> bool {
        true
    }
}
