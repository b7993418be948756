//! Ember RenderGraph
//!
//! 把每帧声明式的 Pass（读写抽象资源）转换为有序、barrier 正确、多队列的命令提交，
//! 并通过 fence 在 frames-in-flight 之间同步。
//!
//! 一帧的流程：
//!
//! ```text
//! RgRenderer::begin_frame ── 等待 frame slot 空闲（backpressure）
//!        │
//!  RgFrame::declare_pass / add_pass ── 多个线程并发声明
//!        │
//!  RgFrame::submit
//!        ├─ RgDependencyGraph::build   依赖图 + 环检测
//!        ├─ RgScheduler::order          拓扑序（同队列优先）
//!        ├─ RgAliasingPlanner::plan     transient 内存别名
//!        ├─ 资源失败传播                 非驻留 / 分配失败的 Pass 及其下游被跳过
//!        ├─ RgScheduler::batch          按队列合并 batch，插入跨队列等待
//!        ├─ RgBarrierResolver::resolve  每个 access 之前的状态转换
//!        ├─ RgExecutor::record          并行录制，按调度顺序拼接
//!        └─ GfxDevice::submit           wait/signal fence
//! ```

pub mod config;
pub mod error;
pub mod frame;
mod profiling;
pub mod render_graph;
pub mod renderer;
pub mod stats;

pub use config::{RgConfig, RgTieBreak};
pub use frame::{RgFrameBegin, RgFrameCounter, RgFrameManager};
pub use error::{RgConfigError, RgDeclareError, RgExecuteError, RgFrameError, RgGraphError};
pub use render_graph::*;
pub use renderer::RgRenderer;
pub use stats::{RgFrameQuality, RgFrameReport, RgFrameStats, RgPassOutcome, RgSkipReason};
