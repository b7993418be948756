//! RenderGraph 错误类型
//!
//! - 声明错误（`RgDeclareError`）在 `declare_pass` 时同步返回
//! - 图错误（`RgGraphError`）在编译时返回，整帧被丢弃
//! - 资源错误和设备错误不走 `Err`，汇总在 `RgFrameReport` 中

use ember_gfx::{GfxError, GfxQueueClass, GfxResourceState};
use thiserror::Error;

use crate::render_graph::resource_handle::RgResourceHandle;

/// Pass 声明阶段的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RgDeclareError {
    // ========================================================================
    // 资源
    // ========================================================================
    /// 句柄不存在，或者是已经过期的 transient 句柄
    #[error("pass '{pass}' references invalid resource handle {handle:?}")]
    InvalidHandle { pass: String, handle: RgResourceHandle },

    #[error("invalid description for resource '{resource}': {reason}")]
    InvalidDesc { resource: String, reason: String },

    #[error("pass '{pass}' accesses resource '{resource}' more than once")]
    DuplicateAccess { pass: String, resource: String },

    #[error("resource handle {0:?} is not registered")]
    UnknownResource(RgResourceHandle),

    // ========================================================================
    // 状态
    // ========================================================================
    /// 队列类别不支持该状态，例如在 copy 队列上作为 render target
    #[error("pass '{pass}' on {queue} queue requires '{resource}' in {state:?}, which the queue does not support")]
    QueueAffinityMismatch {
        pass: String,
        queue: GfxQueueClass,
        resource: String,
        state: GfxResourceState,
    },

    #[error("pass '{pass}' requires '{resource}' in {state:?}, which does not apply to this resource kind")]
    StateNotApplicable {
        pass: String,
        resource: String,
        state: GfxResourceState,
    },

    #[error("pass '{pass}' writes '{resource}' in read-only state {state:?}")]
    WriteInReadOnlyState {
        pass: String,
        resource: String,
        state: GfxResourceState,
    },

    #[error("pass '{pass}' requires '{resource}' in the undefined state")]
    UndefinedState { pass: String, resource: String },

    // ========================================================================
    // 帧
    // ========================================================================
    /// 帧已经关闭，`name` 是迟到的 Pass 或 transient 资源
    #[error("frame {frame_id} is closed; '{name}' was declared too late")]
    FrameClosed { frame_id: u64, name: String },

    #[error("pass name must not be empty")]
    EmptyPassName,
}

/// 依赖图构建错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RgGraphError {
    /// 参与环的 Pass，按声明顺序排列
    #[error("dependency cycle among passes [{}]", .passes.join(", "))]
    Cycle { passes: Vec<String> },

    #[error("pass '{pass}' reads version {version} of '{resource}', but only {available} version(s) are produced")]
    MissingVersion {
        pass: String,
        resource: String,
        version: u32,
        available: u32,
    },

    #[error("pass '{pass}' depends on unknown pass '{dependency}'")]
    UnknownDependency { pass: String, dependency: String },
}

/// `RgFrame::submit` / `RgRenderer::begin_frame` 的错误
#[derive(Error, Debug)]
pub enum RgFrameError {
    #[error("frame {frame_id} dropped: {source}")]
    Graph {
        frame_id: u64,
        #[source]
        source: RgGraphError,
    },

    /// 等待 frame slot 失败；设备丢失时所有 slot 已经被重置
    #[error("waiting for frame slot {slot} failed: {source}")]
    SlotWait {
        slot: usize,
        #[source]
        source: GfxError,
    },
}

impl RgFrameError {
    /// 被丢弃的帧里是否检测到了环
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Graph { source: RgGraphError::Cycle { .. }, .. })
    }
}

/// 配置解析错误
#[derive(Error, Debug)]
pub enum RgConfigError {
    #[error("failed to parse render graph config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("frames_in_flight must be within 1..={max}, got {value}")]
    FramesInFlight { value: usize, max: usize },

    #[error("placement_alignment must be a power of two, got {0}")]
    PlacementAlignment(u64),
}

/// Pass 回调执行时的错误
///
/// 回调失败时该 Pass 的命令被丢弃，barrier 保留。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RgExecuteError {
    #[error("resource {0:?} is not accessed by this pass")]
    NotAccessed(RgResourceHandle),

    #[error("resource {0:?} has no physical backing this frame")]
    NoPhysical(RgResourceHandle),

    #[error("{0}")]
    Failed(String),
}
