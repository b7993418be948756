//! Ember 的 GFX 边界
//!
//! RenderGraph 通过这里定义的固定接口消费设备能力：
//!
//! - `GfxQueueClass`: 硬件队列类别（graphics / compute / copy）
//! - `GfxResourceState`: 资源的访问状态，以及到 Vulkan stage/access/layout 的映射
//! - `GfxCommandList` / `GfxCommandBuffer`: 类型化的命令录制
//! - `GfxSubmitInfo`: 带 fence wait/signal 的提交描述
//! - `GfxDevice`: 设备 trait，`HeadlessDevice` 是不依赖 GPU 的进程内实现

pub mod commands;
pub mod device;
pub mod error;
pub mod format;
pub mod headless;
pub mod queue;
pub mod resource;
pub mod state;

pub use commands::barrier::{GfxBarrier, GfxBarrierKind};
pub use commands::command_buffer::GfxCommandBuffer;
pub use commands::command_list::{GfxCommand, GfxCommandList};
pub use commands::fence::GfxTimelineFence;
pub use commands::submit_info::{GfxFenceWait, GfxSubmitInfo};
pub use device::GfxDevice;
pub use error::GfxError;
pub use format::GfxFormat;
pub use headless::{HeadlessDevice, HeadlessSubmission};
pub use queue::GfxQueueClass;
pub use resource::{GfxResourceId, GfxResourceKind};
pub use state::{GfxResourceState, GfxVkState};
