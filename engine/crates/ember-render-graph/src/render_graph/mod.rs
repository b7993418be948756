//! 声明式渲染图
//!
//! # 核心概念
//!
//! - **RgResourceHandle**: 虚拟资源句柄，由 `RgResourceRegistry` 分配，Pass 只持有句柄
//! - **RgPassDesc / RgPass**: Pass 的队列亲和性、资源访问和录制回调
//! - **RgDependencyGraph**: 由资源访问推导出的依赖图
//! - **RgScheduler**: 拓扑序和按队列合并的 batch
//! - **RgBarrierResolver / RgAliasingPlanner**: 状态转换和 transient 内存别名
//! - **RgCompiledFrame**: 编译结果，包含执行顺序、batch、预计算的 barriers
//! - **RgFrame**: 一帧的声明入口，`submit` 完成编译、录制和提交
//!
//! # 使用示例
//!
//! ```ignore
//! let frame = renderer.begin_frame()?;
//!
//! let scratch = frame.create_transient_buffer("scratch", RgBufferDesc::new(4096))?;
//! frame.declare_pass(
//!     "cull",
//!     GfxQueueClass::Compute,
//!     vec![RgAccess::write(scratch, GfxResourceState::UnorderedAccess)],
//!     |ctx| {
//!         ctx.cmd().dispatch(64, 1, 1);
//!         Ok(())
//!     },
//! )?;
//! frame.declare_pass(
//!     "draw",
//!     GfxQueueClass::Graphics,
//!     vec![
//!         RgAccess::read(scratch, GfxResourceState::IndirectArgument),
//!         RgAccess::write(backbuffer, GfxResourceState::RenderTarget),
//!     ],
//!     |ctx| {
//!         ctx.cmd().draw(3, 1);
//!         Ok(())
//!     },
//! )?;
//!
//! let report = frame.submit()?;
//! ```
//!
//! # 模块结构
//!
//! - `resource_handle`: 句柄定义
//! - `resource` / `resource_registry`: 资源描述和注册表
//! - `pass`: Pass 声明、builder 和执行上下文
//! - `graph`: 依赖图和环检测
//! - `scheduler`: 拓扑排序和 batch
//! - `aliasing`: transient 内存别名
//! - `barrier`: 自动 barrier 计算
//! - `compiler`: 把以上步骤串成一帧的编译
//! - `executor`: 录制和命令缓冲拼接
//! - `builder`: `RgFrame`

pub mod aliasing;
pub mod barrier;
pub mod builder;
pub mod compiler;
pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;
pub mod resource_handle;
pub mod resource_registry;
pub mod scheduler;

// Re-exports
pub use aliasing::{RgAliasingPlan, RgAliasingPlanner, RgMemoryRegion, RgPlacement, RgTransientInterval};
pub use barrier::{RgBarrierResolution, RgBarrierResolver, RgPassBarriers, RgTrackedState};
pub use builder::RgFrame;
pub use compiler::{RgCompileContext, RgCompiledFrame};
pub use executor::RgRecordedPass;
pub use graph::{RgDependency, RgDependencyGraph, RgDependencyKind};
pub use pass::{RgAccess, RgAccessKind, RgPass, RgPassBuilder, RgPassContext, RgPassDesc, RgPassNode};
pub use resource::{RgBufferDesc, RgResource, RgResourceDesc, RgResourceLifetime, RgTextureDesc};
pub use resource_handle::{RgPassId, RgResourceHandle};
pub use resource_registry::RgResourceRegistry;
pub use scheduler::{RgBatch, RgBatchWait, RgScheduler};
