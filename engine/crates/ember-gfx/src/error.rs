use thiserror::Error;

use crate::queue::GfxQueueClass;

/// 设备层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GfxError {
    /// 设备丢失：所有未完成的工作都作废
    #[error("device lost")]
    DeviceLost,

    #[error("submission to {queue} queue failed: {reason}")]
    SubmissionFailed { queue: GfxQueueClass, reason: String },

    #[error("out of device memory: requested {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("timed out after {timeout_ms} ms waiting for {queue} fence to reach {value}")]
    FenceTimeout {
        queue: GfxQueueClass,
        value: u64,
        timeout_ms: u64,
    },

    #[error("command buffer {0} was not allocated by this device")]
    UnknownCommandBuffer(u64),
}

impl GfxError {
    /// 设备丢失之后只能整体重置
    #[inline]
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceLost)
    }
}
