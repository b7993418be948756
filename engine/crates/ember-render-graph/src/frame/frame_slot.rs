use std::time::Duration;

use ember_gfx::{GfxDevice, GfxError, GfxQueueClass, GfxResourceId};

use crate::{frame::transient_pool::RgTransientPool, render_graph::aliasing::RgAliasingPlan};

/// ring buffer 中的一个帧上下文
///
/// 只有在它记录的 fence 值全部完成之后，才能被下一帧复用。
#[derive(Debug)]
pub struct RgFrameSlot {
    index: usize,
    /// 最近一次使用该 slot 的帧
    frame_id: Option<u64>,
    /// 每个队列上该 slot 最后一次提交的 signal 值，0 表示没有提交
    fence_values: [u64; GfxQueueClass::COUNT],
    transient_pool: RgTransientPool,
    /// 等待该 slot 完成之后才能销毁的持久资源
    deferred_releases: Vec<GfxResourceId>,
}

// new & init
impl RgFrameSlot {
    pub fn new(index: usize, transient_budget: u64) -> Self {
        Self {
            index,
            frame_id: None,
            fence_values: [0; GfxQueueClass::COUNT],
            transient_pool: RgTransientPool::new(index, transient_budget),
            deferred_releases: Vec::new(),
        }
    }
}

// getters
impl RgFrameSlot {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn frame_id(&self) -> Option<u64> {
        self.frame_id
    }

    #[inline]
    pub fn fence_value(&self, queue: GfxQueueClass) -> u64 {
        self.fence_values[queue.index()]
    }

    #[inline]
    pub fn transient_pool(&self) -> &RgTransientPool {
        &self.transient_pool
    }

    #[inline]
    pub fn pending_release_count(&self) -> usize {
        self.deferred_releases.len()
    }

    /// 所有队列上的工作都已经完成
    pub fn is_complete(&self, device: &dyn GfxDevice) -> bool {
        GfxQueueClass::ALL
            .iter()
            .all(|q| device.completed_value(*q) >= self.fence_values[q.index()])
    }
}

// update
impl RgFrameSlot {
    /// 阻塞直到该 slot 上一次提交的工作全部完成
    pub fn wait(&self, device: &dyn GfxDevice, timeout: Duration) -> Result<(), GfxError> {
        for queue in GfxQueueClass::ALL {
            let value = self.fence_values[queue.index()];
            if value == 0 || device.completed_value(queue) >= value {
                continue;
            }
            let _span = crate::profiling::rg_span!("wait frame slot");
            log::debug!(
                "frame slot {} (frame {:?}) is still in flight, waiting for {} fence {}",
                self.index,
                self.frame_id,
                queue,
                value
            );
            device.wait_for_value(queue, value, timeout)?;
        }
        Ok(())
    }

    /// 重置每个队列的 command allocator，调用前必须已经 `wait`
    pub fn reset_allocators(&self, device: &dyn GfxDevice) -> Result<(), GfxError> {
        for queue in GfxQueueClass::ALL {
            device.reset_command_allocator(self.index, queue)?;
        }
        Ok(())
    }

    /// 为新的一帧复用该 slot
    ///
    /// 返回上一轮中延迟释放的资源，它们已经不再被 GPU 使用。
    pub fn begin(&mut self, frame_id: u64) -> Vec<GfxResourceId> {
        self.frame_id = Some(frame_id);
        self.transient_pool.reset();
        self.take_deferred_releases()
    }

    #[inline]
    pub fn take_deferred_releases(&mut self) -> Vec<GfxResourceId> {
        std::mem::take(&mut self.deferred_releases)
    }

    pub fn defer_release(&mut self, resource: GfxResourceId) {
        self.deferred_releases.push(resource);
    }

    /// 记录本帧提交的 signal 值；本帧没有使用的队列记为 0
    pub fn commit(&mut self, fence_values: [u64; GfxQueueClass::COUNT], transient_plan: &RgAliasingPlan) {
        self.fence_values = fence_values;
        self.transient_pool.commit(transient_plan);
    }

    /// 设备重置：所有提交都已作废，不需要再等待
    ///
    /// 延迟释放的资源保留，下次复用时交还。
    pub fn reset(&mut self) {
        self.fence_values = [0; GfxQueueClass::COUNT];
        self.transient_pool.reset();
    }
}

#[cfg(test)]
mod tests {
    use ember_gfx::{GfxSubmitInfo, HeadlessDevice};

    use super::*;

    #[test]
    fn test_wait_blocks_until_complete() {
        let device = HeadlessDevice::manual();
        device
            .submit(vec![GfxSubmitInfo::new(GfxQueueClass::Graphics, vec![]).signal(1)])
            .unwrap();

        let mut slot = RgFrameSlot::new(0, 1024);
        slot.begin(0);
        slot.fence_values[GfxQueueClass::Graphics.index()] = 1;
        assert!(!slot.is_complete(&device));
        assert!(matches!(
            slot.wait(&device, Duration::from_millis(5)),
            Err(GfxError::FenceTimeout { value: 1, .. })
        ));

        device.complete_all();
        assert!(slot.is_complete(&device));
        assert!(slot.wait(&device, Duration::from_millis(5)).is_ok());
    }

    #[test]
    fn test_releases_are_returned_on_reuse() {
        let mut slot = RgFrameSlot::new(1, 1024);
        slot.begin(1);
        slot.defer_release(GfxResourceId(9));
        slot.reset();
        assert_eq!(slot.pending_release_count(), 1);
        assert_eq!(slot.begin(3), vec![GfxResourceId(9)]);
        assert_eq!(slot.frame_id(), Some(3));
        assert_eq!(slot.pending_release_count(), 0);
    }
}
