//! Pass 定义和构建器
//!
//! 两种声明方式：
//! - `RgFrame::declare_pass(name, queue, accesses, callback)`：直接给出访问列表和回调
//! - `RgPass` trait：在 `setup` 中通过 `RgPassBuilder` 声明资源依赖，在 `execute` 中录制命令
//!
//! 两者最终都变成 `RgPassNode`，调度器不区分 Pass 的具体类型。

use std::collections::{HashMap, HashSet};

use ember_gfx::{GfxCommandList, GfxQueueClass, GfxResourceId, GfxResourceState};

use crate::{
    error::{RgDeclareError, RgExecuteError},
    render_graph::{
        resource::{RgBufferDesc, RgTextureDesc},
        resource_handle::{RgPassId, RgResourceHandle},
        resource_registry::RgResourceRegistry,
    },
};

/// 访问类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgAccessKind {
    Read,
    Write,
    ReadWrite,
}

impl RgAccessKind {
    #[inline]
    pub fn reads(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[inline]
    pub fn writes(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Pass 对单个资源的一次访问
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgAccess {
    pub handle: RgResourceHandle,
    /// 访问时资源必须处于的状态
    pub state: GfxResourceState,
    pub kind: RgAccessKind,
    /// 读取指定版本：0 表示帧开始时的内容，N 表示第 N 个写入者产生的内容
    ///
    /// 为 `None` 时按照声明顺序读取最近一次写入的内容。
    pub version: Option<u32>,
}

impl RgAccess {
    #[inline]
    pub fn read(handle: RgResourceHandle, state: GfxResourceState) -> Self {
        Self {
            handle,
            state,
            kind: RgAccessKind::Read,
            version: None,
        }
    }

    #[inline]
    pub fn write(handle: RgResourceHandle, state: GfxResourceState) -> Self {
        Self {
            handle,
            state,
            kind: RgAccessKind::Write,
            version: None,
        }
    }

    #[inline]
    pub fn read_write(handle: RgResourceHandle, state: GfxResourceState) -> Self {
        Self {
            handle,
            state,
            kind: RgAccessKind::ReadWrite,
            version: None,
        }
    }

    /// 读取某个写入者产生的版本，可以引用后声明的 Pass
    #[inline]
    pub fn read_version(handle: RgResourceHandle, version: u32, state: GfxResourceState) -> Self {
        Self {
            handle,
            state,
            kind: RgAccessKind::Read,
            version: Some(version),
        }
    }
}

/// Pass 的声明数据，不包含回调
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgPassDesc {
    pub name: String,
    pub queue: GfxQueueClass,
    pub accesses: Vec<RgAccess>,
    /// 显式依赖：必须在这些 Pass 之后执行
    pub after: Vec<String>,
    /// 相对开销，仅用于同优先级 Pass 的排序
    pub cost_hint: Option<u32>,
}

// new & init & builder
impl RgPassDesc {
    pub fn new(name: impl Into<String>, queue: GfxQueueClass) -> Self {
        Self {
            name: name.into(),
            queue,
            accesses: Vec::new(),
            after: Vec::new(),
            cost_hint: None,
        }
    }

    #[inline]
    pub fn access(mut self, access: RgAccess) -> Self {
        self.accesses.push(access);
        self
    }

    #[inline]
    pub fn read(self, handle: RgResourceHandle, state: GfxResourceState) -> Self {
        self.access(RgAccess::read(handle, state))
    }

    #[inline]
    pub fn write(self, handle: RgResourceHandle, state: GfxResourceState) -> Self {
        self.access(RgAccess::write(handle, state))
    }

    #[inline]
    pub fn read_write(self, handle: RgResourceHandle, state: GfxResourceState) -> Self {
        self.access(RgAccess::read_write(handle, state))
    }

    #[inline]
    pub fn read_version(self, handle: RgResourceHandle, version: u32, state: GfxResourceState) -> Self {
        self.access(RgAccess::read_version(handle, version, state))
    }

    #[inline]
    pub fn after(mut self, pass: impl Into<String>) -> Self {
        self.after.push(pass.into());
        self
    }

    #[inline]
    pub fn cost_hint(mut self, cost: u32) -> Self {
        self.cost_hint = Some(cost);
        self
    }
}

// tools
impl RgPassDesc {
    #[inline]
    pub fn access_of(&self, handle: RgResourceHandle) -> Option<&RgAccess> {
        self.accesses.iter().find(|a| a.handle == handle)
    }

    /// 声明期校验：句柄有效、状态适用于资源类型并且被队列支持
    pub(crate) fn validate(&self, registry: &RgResourceRegistry) -> Result<(), RgDeclareError> {
        if self.name.is_empty() {
            return Err(RgDeclareError::EmptyPassName);
        }

        let mut seen = HashSet::with_capacity(self.accesses.len());
        for access in &self.accesses {
            let resource = registry.get(access.handle).ok_or_else(|| RgDeclareError::InvalidHandle {
                pass: self.name.clone(),
                handle: access.handle,
            })?;

            if !seen.insert(access.handle) {
                return Err(RgDeclareError::DuplicateAccess {
                    pass: self.name.clone(),
                    resource: resource.name.clone(),
                });
            }
            if access.state == GfxResourceState::Undefined {
                return Err(RgDeclareError::UndefinedState {
                    pass: self.name.clone(),
                    resource: resource.name.clone(),
                });
            }
            if !resource.desc.supports_state(access.state) {
                return Err(RgDeclareError::StateNotApplicable {
                    pass: self.name.clone(),
                    resource: resource.name.clone(),
                    state: access.state,
                });
            }
            if !access.state.is_supported_on(self.queue) {
                return Err(RgDeclareError::QueueAffinityMismatch {
                    pass: self.name.clone(),
                    queue: self.queue,
                    resource: resource.name.clone(),
                    state: access.state,
                });
            }
            if access.kind.writes() && access.state.is_read_only() {
                return Err(RgDeclareError::WriteInReadOnlyState {
                    pass: self.name.clone(),
                    resource: resource.name.clone(),
                    state: access.state,
                });
            }
        }
        Ok(())
    }
}

/// Pass 构建器
///
/// 在 `RgPass::setup()` 中使用，声明 Pass 的资源依赖。
pub struct RgPassBuilder<'b> {
    pub(crate) desc: RgPassDesc,
    pub(crate) registry: &'b mut RgResourceRegistry,
    pub(crate) frame_id: u64,
}

impl<'b> RgPassBuilder<'b> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueClass {
        self.desc.queue
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// 声明读取
    ///
    /// # 返回
    /// 返回相同的句柄（语义上表示读取后的引用）
    #[inline]
    pub fn read(&mut self, handle: RgResourceHandle, state: GfxResourceState) -> RgResourceHandle {
        self.desc.accesses.push(RgAccess::read(handle, state));
        handle
    }

    /// 声明写入
    #[inline]
    pub fn write(&mut self, handle: RgResourceHandle, state: GfxResourceState) -> RgResourceHandle {
        self.desc.accesses.push(RgAccess::write(handle, state));
        handle
    }

    /// 声明读写（同时读取和写入）
    ///
    /// 常用于累积操作（如 RT 累积、后处理）
    #[inline]
    pub fn read_write(&mut self, handle: RgResourceHandle, state: GfxResourceState) -> RgResourceHandle {
        self.desc.accesses.push(RgAccess::read_write(handle, state));
        handle
    }

    /// 读取第 `version` 个写入者产生的内容
    #[inline]
    pub fn read_version(&mut self, handle: RgResourceHandle, version: u32, state: GfxResourceState) -> RgResourceHandle {
        self.desc.accesses.push(RgAccess::read_version(handle, version, state));
        handle
    }

    /// 创建 transient 纹理
    ///
    /// 只在当前帧内有效，内存可能与其他生命周期不重叠的 transient 资源共享。
    pub fn create_texture(
        &mut self,
        name: impl Into<String>,
        desc: RgTextureDesc,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.registry.create_transient(name, desc.into(), self.frame_id)
    }

    /// 创建 transient 缓冲区
    pub fn create_buffer(
        &mut self,
        name: impl Into<String>,
        desc: RgBufferDesc,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.registry.create_transient(name, desc.into(), self.frame_id)
    }

    #[inline]
    pub fn after(&mut self, pass: impl Into<String>) {
        self.desc.after.push(pass.into());
    }

    #[inline]
    pub fn cost_hint(&mut self, cost: u32) {
        self.desc.cost_hint = Some(cost);
    }
}

/// Pass 执行时的上下文
///
/// 绑定到该 Pass 自己的命令列表，录制结束后按调度顺序拼接到队列的命令缓冲中。
pub struct RgPassContext<'a> {
    pub(crate) desc: &'a RgPassDesc,
    pub(crate) frame_id: u64,
    pub(crate) slot_index: usize,
    pub(crate) physical: &'a HashMap<RgResourceHandle, GfxResourceId>,
    pub(crate) cmd: GfxCommandList,
}

impl<'a> RgPassContext<'a> {
    #[inline]
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    #[inline]
    pub fn queue(&self) -> GfxQueueClass {
        self.desc.queue
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    /// 命令列表，barrier 已经在回调之前录制
    #[inline]
    pub fn cmd(&mut self) -> &mut GfxCommandList {
        &mut self.cmd
    }

    /// 获取资源的物理 id，只能查询本 Pass 声明过的资源
    pub fn physical(&self, handle: RgResourceHandle) -> Result<GfxResourceId, RgExecuteError> {
        if self.desc.access_of(handle).is_none() {
            return Err(RgExecuteError::NotAccessed(handle));
        }
        self.physical.get(&handle).copied().ok_or(RgExecuteError::NoPhysical(handle))
    }

    /// 资源在本 Pass 中所处的状态
    #[inline]
    pub fn state(&self, handle: RgResourceHandle) -> Option<GfxResourceState> {
        self.desc.access_of(handle).map(|a| a.state)
    }
}

/// RgPass trait
///
/// 定义渲染图中的一个 Pass。Producer 实现此 trait 来创建自定义 Pass。
///
/// # 示例
///
/// ```ignore
/// struct BlurPass {
///     input: RgResourceHandle,
///     output: RgResourceHandle,
/// }
///
/// impl RgPass for BlurPass {
///     fn name(&self) -> &str {
///         "blur"
///     }
///
///     fn queue(&self) -> GfxQueueClass {
///         GfxQueueClass::Compute
///     }
///
///     fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
///         builder.read(self.input, GfxResourceState::NonPixelShaderResource);
///         builder.write(self.output, GfxResourceState::UnorderedAccess);
///         Ok(())
///     }
///
///     fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
///         ctx.cmd().dispatch(120, 68, 1);
///         Ok(())
///     }
/// }
/// ```
///
/// # 线程安全
///
/// Pass 可能在 rayon 的工作线程上录制，所以必须是 `Send`。
pub trait RgPass: Send {
    fn name(&self) -> &str;

    /// 队列亲和性
    fn queue(&self) -> GfxQueueClass;

    /// 声明 Pass 的资源依赖
    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError>;

    /// 录制命令，每帧恰好调用一次
    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError>;
}

/// 类型擦除的 Pass 执行器
pub(crate) trait RgPassExecutor: Send {
    fn execute(self: Box<Self>, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError>;
}

/// 包装 `RgPass` 实现的执行器
pub(crate) struct RgPassExecutorWrapper<P: RgPass> {
    pub pass: P,
}

impl<P: RgPass> RgPassExecutor for RgPassExecutorWrapper<P> {
    fn execute(self: Box<Self>, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        self.pass.execute(ctx)
    }
}

/// 包装闭包回调的执行器
pub(crate) struct RgClosureExecutor<F> {
    pub callback: F,
}

impl<F> RgPassExecutor for RgClosureExecutor<F>
where
    F: FnOnce(&mut RgPassContext<'_>) -> Result<(), RgExecuteError> + Send,
{
    fn execute(self: Box<Self>, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        (self.callback)(ctx)
    }
}

/// Pass 节点：声明数据 + 回调
///
/// 只存在于一帧之内，录制后被丢弃。
pub struct RgPassNode<'r> {
    pub(crate) id: RgPassId,
    pub(crate) desc: RgPassDesc,
    pub(crate) executor: Box<dyn RgPassExecutor + 'r>,
}

impl RgPassNode<'_> {
    #[inline]
    pub fn id(&self) -> RgPassId {
        self.id
    }

    #[inline]
    pub fn desc(&self) -> &RgPassDesc {
        &self.desc
    }
}

#[cfg(test)]
mod tests {
    use ember_gfx::GfxFormat;

    use super::*;

    fn registry_with_texture() -> (RgResourceRegistry, RgResourceHandle, RgResourceHandle) {
        let mut registry = RgResourceRegistry::new();
        let texture = registry
            .import_texture(
                "color",
                GfxResourceId(1),
                RgTextureDesc::new_2d(16, 16, GfxFormat::Rgba8Unorm),
                GfxResourceState::Undefined,
            )
            .unwrap();
        let buffer = registry
            .import_buffer("args", GfxResourceId(2), RgBufferDesc::new(64), GfxResourceState::Common)
            .unwrap();
        (registry, texture, buffer)
    }

    #[test]
    fn test_queue_affinity_mismatch() {
        let (registry, texture, _) = registry_with_texture();
        let desc = RgPassDesc::new("upload", GfxQueueClass::Copy).write(texture, GfxResourceState::RenderTarget);
        assert!(matches!(desc.validate(&registry), Err(RgDeclareError::QueueAffinityMismatch { .. })));

        let desc = RgPassDesc::new("upload", GfxQueueClass::Copy).write(texture, GfxResourceState::CopyDest);
        assert!(desc.validate(&registry).is_ok());
    }

    #[test]
    fn test_misuse_is_rejected() {
        let (registry, texture, buffer) = registry_with_texture();

        let duplicate = RgPassDesc::new("dup", GfxQueueClass::Graphics)
            .read(texture, GfxResourceState::PixelShaderResource)
            .write(texture, GfxResourceState::RenderTarget);
        assert!(matches!(duplicate.validate(&registry), Err(RgDeclareError::DuplicateAccess { .. })));

        let read_only_write =
            RgPassDesc::new("w", GfxQueueClass::Graphics).write(texture, GfxResourceState::PixelShaderResource);
        assert!(matches!(read_only_write.validate(&registry), Err(RgDeclareError::WriteInReadOnlyState { .. })));

        let wrong_kind = RgPassDesc::new("k", GfxQueueClass::Graphics).read(buffer, GfxResourceState::DepthRead);
        assert!(matches!(wrong_kind.validate(&registry), Err(RgDeclareError::StateNotApplicable { .. })));

        let undefined = RgPassDesc::new("u", GfxQueueClass::Graphics).write(texture, GfxResourceState::Undefined);
        assert!(matches!(undefined.validate(&registry), Err(RgDeclareError::UndefinedState { .. })));

        let unnamed = RgPassDesc::new("", GfxQueueClass::Graphics);
        assert_eq!(unnamed.validate(&registry), Err(RgDeclareError::EmptyPassName));
    }

    #[test]
    fn test_stale_handle() {
        let (mut registry, _, _) = registry_with_texture();
        let transient = registry.create_transient("tmp", RgBufferDesc::new(16).into(), 0).unwrap();
        registry.purge_transients();

        let desc = RgPassDesc::new("late", GfxQueueClass::Compute).read(transient, GfxResourceState::UnorderedAccess);
        assert!(matches!(desc.validate(&registry), Err(RgDeclareError::InvalidHandle { .. })));
    }

    #[test]
    fn test_context_only_exposes_declared_resources() {
        let (_, texture, buffer) = registry_with_texture();
        let desc = RgPassDesc::new("p", GfxQueueClass::Graphics).write(texture, GfxResourceState::RenderTarget);
        let physical = HashMap::from([(texture, GfxResourceId(1)), (buffer, GfxResourceId(2))]);
        let ctx = RgPassContext {
            desc: &desc,
            frame_id: 0,
            slot_index: 0,
            physical: &physical,
            cmd: GfxCommandList::new(),
        };

        assert_eq!(ctx.physical(texture), Ok(GfxResourceId(1)));
        assert_eq!(ctx.physical(buffer), Err(RgExecuteError::NotAccessed(buffer)));
        assert_eq!(ctx.state(texture), Some(GfxResourceState::RenderTarget));
    }
}
