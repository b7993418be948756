//! frames-in-flight 管理

pub mod frame_counter;
pub mod frame_manager;
pub mod frame_slot;
pub mod transient_pool;

pub use frame_counter::{RgFrameCounter, RgFrameLabel};
pub use frame_manager::{RgFrameBegin, RgFrameManager};
pub use frame_slot::RgFrameSlot;
pub use transient_pool::RgTransientPool;
