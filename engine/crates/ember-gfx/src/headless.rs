//! 不依赖 GPU 的设备实现
//!
//! 记录所有的提交，并用进程内的 timeline fence 模拟队列完成进度。
//! 两种模式：
//! - auto complete: 提交后立即完成
//! - manual: 提交后保持 pending，需要调用 `complete_up_to` / `complete_all` 推进

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use itertools::Itertools;

use crate::{
    commands::{
        command_buffer::GfxCommandBuffer,
        fence::GfxTimelineFence,
        submit_info::{GfxFenceWait, GfxSubmitInfo},
    },
    device::GfxDevice,
    error::GfxError,
    queue::GfxQueueClass,
    resource::GfxResourceId,
};

/// 一次被设备接收的提交
#[derive(Clone, Debug)]
pub struct HeadlessSubmission {
    pub queue: GfxQueueClass,
    pub waits: Vec<GfxFenceWait>,
    pub signal_value: Option<u64>,
    pub command_buffers: Vec<GfxCommandBuffer>,
}

impl HeadlessSubmission {
    /// 所有命令缓冲中的 debug label，按录制顺序
    pub fn labels(&self) -> Vec<String> {
        self.command_buffers
            .iter()
            .flat_map(|cmd| cmd.list().labels())
            .map(str::to_owned)
            .collect_vec()
    }
}

#[derive(Default)]
struct HeadlessState {
    next_command_buffer_id: u64,
    /// 每个队列上已经提交的最大 signal 值
    submitted: [u64; GfxQueueClass::COUNT],
    submissions: Vec<HeadlessSubmission>,
    allocator_resets: Vec<(usize, GfxQueueClass)>,
    non_resident: HashSet<GfxResourceId>,
    injected_error: Option<GfxError>,
    lost: bool,
}

pub struct HeadlessDevice {
    auto_complete: bool,
    fences: [GfxTimelineFence; GfxQueueClass::COUNT],
    state: Mutex<HeadlessState>,
}

// new & init
impl HeadlessDevice {
    /// 提交后立即完成
    pub fn new() -> Self {
        Self::with_mode(true)
    }

    /// 提交后保持 pending，由测试手动推进
    pub fn manual() -> Self {
        Self::with_mode(false)
    }

    fn with_mode(auto_complete: bool) -> Self {
        Self {
            auto_complete,
            fences: Default::default(),
            state: Mutex::new(HeadlessState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

// getters
impl HeadlessDevice {
    #[inline]
    pub fn is_auto_complete(&self) -> bool {
        self.auto_complete
    }

    #[inline]
    pub fn is_lost(&self) -> bool {
        self.lock().lost
    }

    /// 队列上已经提交（不一定完成）的最大 fence 值
    pub fn submitted_value(&self, queue: GfxQueueClass) -> u64 {
        self.lock().submitted[queue.index()]
    }

    pub fn submissions(&self) -> Vec<HeadlessSubmission> {
        self.lock().submissions.clone()
    }

    /// 取出并清空提交记录
    pub fn take_submissions(&self) -> Vec<HeadlessSubmission> {
        std::mem::take(&mut self.lock().submissions)
    }

    pub fn allocator_resets(&self) -> Vec<(usize, GfxQueueClass)> {
        self.lock().allocator_resets.clone()
    }
}

// 测试控制
impl HeadlessDevice {
    /// 把队列的 fence 推进到 `value`，不会超过已经提交的值
    pub fn complete_up_to(&self, queue: GfxQueueClass, value: u64) {
        let submitted = self.submitted_value(queue);
        self.fences[queue.index()].signal(value.min(submitted));
    }

    /// 完成所有已经提交的工作
    pub fn complete_all(&self) {
        for queue in GfxQueueClass::ALL {
            self.complete_up_to(queue, u64::MAX);
        }
    }

    /// 立即进入设备丢失状态，并唤醒所有等待者
    pub fn lose_device(&self) {
        let submitted = {
            let mut state = self.lock();
            state.lost = true;
            state.submitted
        };
        log::error!("headless device lost");
        for queue in GfxQueueClass::ALL {
            self.fences[queue.index()].signal(submitted[queue.index()]);
        }
    }

    /// 下一次 `submit` 返回指定错误；`DeviceLost` 会同时让设备进入丢失状态
    pub fn inject_submit_error(&self, error: GfxError) {
        self.lock().injected_error = Some(error);
    }

    pub fn set_resident(&self, resource: GfxResourceId, resident: bool) {
        let mut state = self.lock();
        if resident {
            state.non_resident.remove(&resource);
        } else {
            state.non_resident.insert(resource);
        }
    }

    /// 从设备丢失中恢复，已提交的工作视为全部完成
    pub fn recover(&self) {
        let submitted = {
            let mut state = self.lock();
            state.lost = false;
            state.submitted
        };
        for queue in GfxQueueClass::ALL {
            self.fences[queue.index()].reset(submitted[queue.index()]);
        }
    }
}

impl GfxDevice for HeadlessDevice {
    fn reset_command_allocator(&self, slot: usize, queue: GfxQueueClass) -> Result<(), GfxError> {
        let mut state = self.lock();
        if state.lost {
            return Err(GfxError::DeviceLost);
        }
        state.allocator_resets.push((slot, queue));
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        slot: usize,
        queue: GfxQueueClass,
        name: &str,
    ) -> Result<GfxCommandBuffer, GfxError> {
        let mut state = self.lock();
        if state.lost {
            return Err(GfxError::DeviceLost);
        }
        state.next_command_buffer_id += 1;
        Ok(GfxCommandBuffer::new(state.next_command_buffer_id, queue, slot, name))
    }

    fn submit(&self, submits: Vec<GfxSubmitInfo>) -> Result<(), GfxError> {
        let mut state = self.lock();
        if state.lost {
            return Err(GfxError::DeviceLost);
        }
        if let Some(error) = state.injected_error.take() {
            if error.is_device_lost() {
                state.lost = true;
            }
            log::error!("headless submit failed: {error}");
            return Err(error);
        }

        // 先整体校验，失败时不接收任何提交
        let mut submitted = state.submitted;
        for info in &submits {
            for wait in info.wait_infos() {
                if wait.value > submitted[wait.queue.index()] {
                    return Err(GfxError::SubmissionFailed {
                        queue: info.queue(),
                        reason: format!("waits on {} fence value {} which is never signaled", wait.queue, wait.value),
                    });
                }
            }
            if let Some(value) = info.signal_value() {
                let current = &mut submitted[info.queue().index()];
                if value <= *current {
                    return Err(GfxError::SubmissionFailed {
                        queue: info.queue(),
                        reason: format!("signal value {value} is not greater than {current}"),
                    });
                }
                *current = value;
            }
        }
        state.submitted = submitted;

        for info in submits {
            log::trace!(
                "headless submit: queue={}, waits=[{}], signal={:?}, command buffers=[{}]",
                info.queue(),
                info.wait_infos().iter().map(|w| format!("{}>={}", w.queue, w.value)).join(", "),
                info.signal_value(),
                info.command_buffers().iter().map(|cmd| cmd.name()).join(", ")
            );
            state.submissions.push(HeadlessSubmission {
                queue: info.queue(),
                waits: info.wait_infos().to_vec(),
                signal_value: info.signal_value(),
                command_buffers: info.into_command_buffers(),
            });
        }
        drop(state);

        if self.auto_complete {
            for queue in GfxQueueClass::ALL {
                self.fences[queue.index()].signal(submitted[queue.index()]);
            }
        }
        Ok(())
    }

    fn completed_value(&self, queue: GfxQueueClass) -> u64 {
        self.fences[queue.index()].completed_value()
    }

    fn wait_for_value(&self, queue: GfxQueueClass, value: u64, timeout: Duration) -> Result<(), GfxError> {
        let reached = self.fences[queue.index()].wait(value, timeout);
        if self.is_lost() {
            return Err(GfxError::DeviceLost);
        }
        if !reached {
            return Err(GfxError::FenceTimeout {
                queue,
                value,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GfxError> {
        let submitted = self.lock().submitted;
        for queue in GfxQueueClass::ALL {
            self.wait_for_value(queue, submitted[queue.index()], Duration::from_secs(5))?;
        }
        Ok(())
    }

    fn is_resident(&self, resource: GfxResourceId) -> bool {
        !self.lock().non_resident.contains(&resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_one(device: &HeadlessDevice, queue: GfxQueueClass, signal: u64) -> Result<(), GfxError> {
        let cmd = device.allocate_command_buffer(0, queue, "test")?;
        device.submit(vec![GfxSubmitInfo::new(queue, vec![cmd]).signal(signal)])
    }

    #[test]
    fn test_auto_complete() {
        let device = HeadlessDevice::new();
        submit_one(&device, GfxQueueClass::Graphics, 1).unwrap();
        assert_eq!(device.completed_value(GfxQueueClass::Graphics), 1);
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn test_manual_complete() {
        let device = HeadlessDevice::manual();
        submit_one(&device, GfxQueueClass::Compute, 1).unwrap();
        submit_one(&device, GfxQueueClass::Compute, 2).unwrap();
        assert_eq!(device.completed_value(GfxQueueClass::Compute), 0);

        device.complete_up_to(GfxQueueClass::Compute, 1);
        assert_eq!(device.completed_value(GfxQueueClass::Compute), 1);

        // 不会超过已提交的值
        device.complete_up_to(GfxQueueClass::Compute, 10);
        assert_eq!(device.completed_value(GfxQueueClass::Compute), 2);
    }

    #[test]
    fn test_wait_on_unsubmitted_value_is_rejected() {
        let device = HeadlessDevice::new();
        let info = GfxSubmitInfo::new(GfxQueueClass::Graphics, vec![]).wait(GfxQueueClass::Compute, 1).signal(1);
        let err = device.submit(vec![info]).unwrap_err();
        assert!(matches!(err, GfxError::SubmissionFailed { .. }));
        assert_eq!(device.submitted_value(GfxQueueClass::Graphics), 0);
    }

    #[test]
    fn test_wait_on_earlier_submit_in_same_call() {
        let device = HeadlessDevice::new();
        let compute = GfxSubmitInfo::new(GfxQueueClass::Compute, vec![]).signal(1);
        let graphics = GfxSubmitInfo::new(GfxQueueClass::Graphics, vec![]).wait(GfxQueueClass::Compute, 1).signal(1);
        device.submit(vec![compute, graphics]).unwrap();
        assert_eq!(device.submissions().len(), 2);
    }

    #[test]
    fn test_injected_device_lost() {
        let device = HeadlessDevice::new();
        device.inject_submit_error(GfxError::DeviceLost);
        assert_eq!(submit_one(&device, GfxQueueClass::Graphics, 1), Err(GfxError::DeviceLost));
        assert!(device.is_lost());
        assert_eq!(
            device.allocate_command_buffer(0, GfxQueueClass::Graphics, "x").unwrap_err(),
            GfxError::DeviceLost
        );

        device.recover();
        assert!(submit_one(&device, GfxQueueClass::Graphics, 1).is_ok());
    }

    #[test]
    fn test_wait_timeout() {
        let device = HeadlessDevice::manual();
        submit_one(&device, GfxQueueClass::Graphics, 1).unwrap();
        let err = device.wait_for_value(GfxQueueClass::Graphics, 1, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, GfxError::FenceTimeout { value: 1, .. }));
    }

    #[test]
    fn test_residency() {
        let device = HeadlessDevice::new();
        device.set_resident(GfxResourceId(4), false);
        assert!(!device.is_resident(GfxResourceId(4)));
        assert!(device.is_resident(GfxResourceId(5)));
        device.set_resident(GfxResourceId(4), true);
        assert!(device.is_resident(GfxResourceId(4)));
    }
}
