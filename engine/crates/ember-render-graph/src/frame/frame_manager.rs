//! Frame Context Manager
//!
//! N 个 ring-buffered 的 `RgFrameSlot`，每帧开始时等待被复用的 slot 完成（backpressure），
//! 提交时为每个 batch 分配 fence 值，并把 batch 之间的等待翻译成 fence wait。

use std::time::Duration;

use ember_gfx::{GfxCommandBuffer, GfxDevice, GfxError, GfxQueueClass, GfxResourceId, GfxSubmitInfo};
use itertools::Itertools;

use crate::{
    config::RgConfig,
    frame::{frame_counter::RgFrameCounter, frame_slot::RgFrameSlot},
    render_graph::compiler::RgCompiledFrame,
};

/// `begin_frame` 的结果
#[derive(Clone, Debug)]
pub struct RgFrameBegin {
    pub frame_id: u64,
    pub slot_index: usize,
    /// 形如 `[F12B]`
    pub frame_name: String,
    pub transient_id_base: u64,
}

pub struct RgFrameManager {
    counter: RgFrameCounter,
    slots: Vec<RgFrameSlot>,
    /// 每个队列上最近一次成功提交的 signal 值，跨设备重置保持单调
    last_signaled: [u64; GfxQueueClass::COUNT],
    /// 已经可以销毁、但还没有交给上层的资源
    retired: Vec<GfxResourceId>,
    timeout: Duration,
}

// new & init
impl RgFrameManager {
    pub fn new(config: &RgConfig) -> Self {
        let slots = (0..config.frames_in_flight)
            .map(|index| RgFrameSlot::new(index, config.transient_pool_budget))
            .collect_vec();
        log::info!("frame manager: {} frames in flight", slots.len());

        Self {
            counter: RgFrameCounter::new(0, config.frames_in_flight),
            slots,
            last_signaled: [0; GfxQueueClass::COUNT],
            retired: Vec::new(),
            timeout: config.fence_timeout(),
        }
    }
}

// getters
impl RgFrameManager {
    #[inline]
    pub fn frame_counter(&self) -> &RgFrameCounter {
        &self.counter
    }

    #[inline]
    pub fn fif_count(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slot(&self, index: usize) -> &RgFrameSlot {
        &self.slots[index]
    }

    #[inline]
    pub fn current_slot_index(&self) -> usize {
        self.counter.slot_index()
    }

    #[inline]
    pub fn last_signaled(&self, queue: GfxQueueClass) -> u64 {
        self.last_signaled[queue.index()]
    }

    /// 已经提交但 GPU 还没有完成的帧数
    pub fn frames_in_flight(&self, device: &dyn GfxDevice) -> usize {
        self.slots.iter().filter(|slot| !slot.is_complete(device)).count()
    }
}

// phase methods
impl RgFrameManager {
    /// 开始新的一帧
    ///
    /// 如果当前 slot 仍被 GPU 使用，阻塞直到它的 fence 全部完成，然后重置它的 command allocator。
    pub fn begin_frame(&mut self, device: &dyn GfxDevice) -> Result<RgFrameBegin, GfxError> {
        let _span = crate::profiling::rg_span!("RgFrameManager::begin_frame");

        let frame_id = self.counter.frame_id();
        let slot = &mut self.slots[self.counter.slot_index()];
        slot.wait(device, self.timeout)?;
        slot.reset_allocators(device)?;

        let retired = slot.begin(frame_id);
        if !retired.is_empty() {
            log::debug!("{} retired {} deferred resources", self.counter.frame_name(), retired.len());
        }
        self.retired.extend(retired);

        Ok(RgFrameBegin {
            frame_id,
            slot_index: slot.index(),
            frame_name: self.counter.frame_name(),
            transient_id_base: slot.transient_pool().id_base(),
        })
    }

    /// 为每个 batch 生成 submit info
    ///
    /// 每个 batch 在自己的队列上 signal 一个递增的值；batch 之间的等待使用被等待 batch 的 signal 值，
    /// 等待上一帧时使用该队列在本帧之前的最后一个 signal 值。
    /// 返回值中的数组是提交成功之后每个队列的 signal 值。
    pub fn build_submits(
        &self,
        compiled: &RgCompiledFrame,
        command_buffers: Vec<GfxCommandBuffer>,
    ) -> (Vec<GfxSubmitInfo>, [u64; GfxQueueClass::COUNT]) {
        let mut next = self.last_signaled;
        let mut batch_signals = Vec::with_capacity(compiled.batches().len());
        let mut submits = Vec::with_capacity(compiled.batches().len());

        for (batch, cmd) in compiled.batches().iter().zip_eq(command_buffers) {
            let mut submit = GfxSubmitInfo::new(batch.queue, vec![cmd]);
            for wait in &batch.waits {
                submit = submit.wait(wait.queue, batch_signals[wait.batch]);
            }
            for &queue in &batch.prior_frame_waits {
                let value = self.last_signaled[queue.index()];
                if value > 0 {
                    submit = submit.wait(queue, value);
                }
            }

            let value = &mut next[batch.queue.index()];
            *value += 1;
            batch_signals.push(*value);
            submits.push(submit.signal(*value));
        }

        (submits, next)
    }

    /// 提交成功：记录 slot 的 fence 值和 transient 占用
    pub fn commit_submission(&mut self, compiled: &RgCompiledFrame, signaled: [u64; GfxQueueClass::COUNT]) {
        let mut fence_values = [0; GfxQueueClass::COUNT];
        for queue in GfxQueueClass::ALL {
            if signaled[queue.index()] > self.last_signaled[queue.index()] {
                fence_values[queue.index()] = signaled[queue.index()];
            }
        }
        self.last_signaled = signaled;

        let slot_index = self.counter.slot_of(compiled.frame_id());
        self.slots[slot_index].commit(fence_values, compiled.aliasing());
    }

    /// 结束当前帧（无论是否提交成功）
    #[inline]
    pub fn end_frame(&mut self) {
        self.counter.next_frame();
    }

    /// 延迟释放持久资源的物理内存
    ///
    /// 资源在最后使用它的帧所在的 slot 下一次被复用时交还，那时该帧的 fence 已经完成。
    pub fn defer_release(&mut self, resource: GfxResourceId, last_used_frame: Option<u64>) {
        let slot_index = match last_used_frame {
            Some(frame_id) => self.counter.slot_of(frame_id),
            None => self.counter.slot_index(),
        };
        self.slots[slot_index].defer_release(resource);
    }

    /// 取出已经可以销毁的资源
    #[inline]
    pub fn take_retired(&mut self) -> Vec<GfxResourceId> {
        std::mem::take(&mut self.retired)
    }

    /// 所有队列空闲之后，所有延迟释放的资源都可以销毁
    pub fn drain_deferred_releases(&mut self) -> Vec<GfxResourceId> {
        self.slots.iter_mut().flat_map(RgFrameSlot::take_deferred_releases).collect_vec()
    }

    /// 设备丢失或提交失败之后重置所有 slot
    ///
    /// 未完成的提交全部作废，fence 计数保持单调，不会回退。
    pub fn reset_all(&mut self, device: &dyn GfxDevice) {
        let _span = crate::profiling::rg_span!("RgFrameManager::reset_all");
        log::error!("{} resetting all {} frame slots", self.counter.frame_name(), self.slots.len());

        if let Err(err) = device.wait_idle() {
            log::warn!("wait idle during frame reset failed: {err}");
        }
        for slot in &mut self.slots {
            slot.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use ember_gfx::HeadlessDevice;

    use super::*;

    fn config(frames_in_flight: usize) -> RgConfig {
        RgConfig {
            frames_in_flight,
            fence_timeout_ms: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_begin_frame_resets_allocators_of_slot() {
        let device = HeadlessDevice::new();
        let mut frames = RgFrameManager::new(&config(2));

        let begin = frames.begin_frame(&device).unwrap();
        assert_eq!(begin.frame_id, 0);
        assert_eq!(begin.slot_index, 0);
        assert_eq!(begin.frame_name, "[F0A]");
        frames.end_frame();

        let begin = frames.begin_frame(&device).unwrap();
        assert_eq!(begin.slot_index, 1);
        assert_eq!(
            device.allocator_resets(),
            vec![
                (0, GfxQueueClass::Graphics),
                (0, GfxQueueClass::Compute),
                (0, GfxQueueClass::Copy),
                (1, GfxQueueClass::Graphics),
                (1, GfxQueueClass::Compute),
                (1, GfxQueueClass::Copy),
            ]
        );
    }

    #[test]
    fn test_release_retires_when_slot_is_reused() {
        let device = HeadlessDevice::new();
        let mut frames = RgFrameManager::new(&config(2));

        frames.begin_frame(&device).unwrap();
        frames.end_frame();
        frames.defer_release(GfxResourceId(7), Some(0));

        // frame 1 使用 slot 1，资源还不能销毁
        frames.begin_frame(&device).unwrap();
        assert!(frames.take_retired().is_empty());
        frames.end_frame();

        // frame 2 复用 slot 0
        frames.begin_frame(&device).unwrap();
        assert_eq!(frames.take_retired(), vec![GfxResourceId(7)]);
    }

    #[test]
    fn test_device_lost_while_waiting() {
        let device = HeadlessDevice::manual();
        let mut frames = RgFrameManager::new(&config(1));
        device
            .submit(vec![GfxSubmitInfo::new(GfxQueueClass::Graphics, vec![]).signal(1)])
            .unwrap();
        frames.slots[0].commit([1, 0, 0], &Default::default());
        frames.last_signaled = [1, 0, 0];

        assert!(matches!(frames.begin_frame(&device), Err(GfxError::FenceTimeout { .. })));

        device.lose_device();
        assert_eq!(frames.begin_frame(&device).unwrap_err(), GfxError::DeviceLost);

        frames.reset_all(&device);
        device.recover();
        assert_eq!(frames.slot(0).fence_value(GfxQueueClass::Graphics), 0);
        assert_eq!(frames.last_signaled(GfxQueueClass::Graphics), 1);
        assert!(frames.begin_frame(&device).is_ok());
    }
}
