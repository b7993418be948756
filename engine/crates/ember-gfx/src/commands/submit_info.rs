use crate::{commands::command_buffer::GfxCommandBuffer, queue::GfxQueueClass};

/// 提交前需要等待的 fence 值
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GfxFenceWait {
    pub queue: GfxQueueClass,
    pub value: u64,
}

/// 一次队列提交的描述
///
/// 每个队列持有一个单调递增的 timeline fence：
/// 提交之前等待其他队列的 fence 达到指定值，执行完成后把本队列的 fence 推进到 `signal_value`。
#[derive(Clone, Debug)]
pub struct GfxSubmitInfo {
    queue: GfxQueueClass,
    command_buffers: Vec<GfxCommandBuffer>,
    wait_infos: Vec<GfxFenceWait>,
    signal_value: Option<u64>,
}

// new & init
impl GfxSubmitInfo {
    pub fn new(queue: GfxQueueClass, command_buffers: Vec<GfxCommandBuffer>) -> Self {
        Self {
            queue,
            command_buffers,
            wait_infos: vec![],
            signal_value: None,
        }
    }

    /// 同一个队列上的等待没有意义，直接忽略；重复的等待只保留最大值
    #[inline]
    pub fn wait(mut self, queue: GfxQueueClass, value: u64) -> Self {
        if queue == self.queue {
            return self;
        }
        match self.wait_infos.iter_mut().find(|w| w.queue == queue) {
            Some(existing) => existing.value = existing.value.max(value),
            None => self.wait_infos.push(GfxFenceWait { queue, value }),
        }
        self
    }

    #[inline]
    pub fn signal(mut self, value: u64) -> Self {
        self.signal_value = Some(value);
        self
    }
}

// getters
impl GfxSubmitInfo {
    #[inline]
    pub fn queue(&self) -> GfxQueueClass {
        self.queue
    }

    #[inline]
    pub fn command_buffers(&self) -> &[GfxCommandBuffer] {
        &self.command_buffers
    }

    #[inline]
    pub fn wait_infos(&self) -> &[GfxFenceWait] {
        &self.wait_infos
    }

    #[inline]
    pub fn signal_value(&self) -> Option<u64> {
        self.signal_value
    }

    #[inline]
    pub fn into_command_buffers(self) -> Vec<GfxCommandBuffer> {
        self.command_buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_merges_same_queue() {
        let info = GfxSubmitInfo::new(GfxQueueClass::Graphics, vec![])
            .wait(GfxQueueClass::Compute, 3)
            .wait(GfxQueueClass::Compute, 5)
            .wait(GfxQueueClass::Compute, 4)
            .wait(GfxQueueClass::Graphics, 9)
            .signal(10);

        assert_eq!(
            info.wait_infos(),
            &[GfxFenceWait {
                queue: GfxQueueClass::Compute,
                value: 5
            }]
        );
        assert_eq!(info.signal_value(), Some(10));
    }
}
