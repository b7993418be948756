//! Ember 的示例 producer
//!
//! - `passes`: 阴影、SSAO、光照、bloom、tonemap、UI 以及 copy 队列上传
//! - `streaming`: 后台线程模拟纹理流式加载，驱动资源驻留状态

pub mod passes;
pub mod streaming;
