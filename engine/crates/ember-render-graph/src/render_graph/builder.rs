//! 一帧的声明阶段
//!
//! `RgFrame` 由 `RgRenderer::begin_frame` 创建。多个 producer 可以在不同线程上
//! 通过 `&RgFrame` 并发声明 Pass，声明只是排队，不产生任何 GPU 工作；
//! `submit` 消费 `RgFrame`，依次完成编译、录制和提交。

use std::sync::{Mutex, MutexGuard, PoisonError};

use ember_gfx::GfxQueueClass;

use crate::{
    error::{RgDeclareError, RgExecuteError, RgFrameError},
    frame::RgFrameBegin,
    render_graph::{
        pass::{
            RgAccess, RgClosureExecutor, RgPass, RgPassBuilder, RgPassContext, RgPassDesc, RgPassExecutor,
            RgPassExecutorWrapper, RgPassNode,
        },
        resource::{RgBufferDesc, RgResourceDesc, RgTextureDesc},
        resource_handle::{RgPassId, RgResourceHandle},
        resource_registry::RgResourceRegistry,
    },
    renderer::RgFrameBackend,
    stats::RgFrameReport,
};

/// 声明期间受锁保护的数据
struct RgDeclaration<'r> {
    registry: &'r mut RgResourceRegistry,
    passes: Vec<RgPassNode<'r>>,
    closed: bool,
}

/// 正在声明的一帧
pub struct RgFrame<'r> {
    begin: RgFrameBegin,
    declared: Mutex<RgDeclaration<'r>>,
    backend: RgFrameBackend<'r>,
}

// new & init
impl<'r> RgFrame<'r> {
    pub(crate) fn new(begin: RgFrameBegin, registry: &'r mut RgResourceRegistry, backend: RgFrameBackend<'r>) -> Self {
        Self {
            begin,
            declared: Mutex::new(RgDeclaration {
                registry,
                passes: Vec::new(),
                closed: false,
            }),
            backend,
        }
    }

    /// producer 的回调 panic 不会让整帧无法继续
    fn lock(&self) -> MutexGuard<'_, RgDeclaration<'r>> {
        self.declared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// getters
impl RgFrame<'_> {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.begin.frame_id
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.begin.slot_index
    }

    #[inline]
    pub fn frame_name(&self) -> &str {
        &self.begin.frame_name
    }

    pub fn pass_count(&self) -> usize {
        self.lock().passes.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

// register
impl<'r> RgFrame<'r> {
    /// 创建只在本帧有效的纹理
    pub fn create_transient_texture(
        &self,
        name: impl Into<String>,
        desc: RgTextureDesc,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.create_transient(name.into(), desc.into())
    }

    /// 创建只在本帧有效的缓冲区
    pub fn create_transient_buffer(
        &self,
        name: impl Into<String>,
        desc: RgBufferDesc,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.create_transient(name.into(), desc.into())
    }

    fn create_transient(
        &self,
        name: String,
        desc: RgResourceDesc,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        let mut declared = self.lock();
        self.check_open(&declared, &name)?;
        declared.registry.create_transient(name, desc, self.begin.frame_id)
    }

    /// 声明一个 Pass
    ///
    /// `callback` 在录制阶段被调用恰好一次，可能在 rayon 的工作线程上。
    pub fn declare_pass<F>(
        &self,
        name: impl Into<String>,
        queue: GfxQueueClass,
        accesses: Vec<RgAccess>,
        callback: F,
    ) -> Result<RgPassId, RgDeclareError>
    where
        F: FnOnce(&mut RgPassContext<'_>) -> Result<(), RgExecuteError> + Send + 'r,
    {
        let mut desc = RgPassDesc::new(name, queue);
        desc.accesses = accesses;
        self.declare(desc, callback)
    }

    /// 与 `declare_pass` 相同，但可以带显式依赖和 cost hint
    pub fn declare<F>(&self, desc: RgPassDesc, callback: F) -> Result<RgPassId, RgDeclareError>
    where
        F: FnOnce(&mut RgPassContext<'_>) -> Result<(), RgExecuteError> + Send + 'r,
    {
        let mut declared = self.lock();
        self.check_open(&declared, &desc.name)?;
        Self::push_node(&mut declared, desc, Box::new(RgClosureExecutor { callback }))
    }

    /// 添加实现了 `RgPass` 的 Pass
    ///
    /// `setup` 在锁内执行，其中创建的 transient 资源立即可用。
    pub fn add_pass<P: RgPass + 'r>(&self, mut pass: P) -> Result<RgPassId, RgDeclareError> {
        let mut declared = self.lock();
        self.check_open(&declared, pass.name())?;

        let mut builder = RgPassBuilder {
            desc: RgPassDesc::new(pass.name(), pass.queue()),
            registry: &mut *declared.registry,
            frame_id: self.begin.frame_id,
        };
        pass.setup(&mut builder)?;
        let desc = builder.desc;

        Self::push_node(&mut declared, desc, Box::new(RgPassExecutorWrapper { pass }))
    }

    /// 关闭声明，之后的声明返回 `FrameClosed`
    pub fn close(&self) {
        let mut declared = self.lock();
        if !declared.closed {
            log::debug!("{} closed with {} passes", self.begin.frame_name, declared.passes.len());
            declared.closed = true;
        }
    }

    fn check_open(&self, declared: &RgDeclaration<'_>, name: &str) -> Result<(), RgDeclareError> {
        if declared.closed {
            log::warn!("{} '{}' was declared after the frame was closed", self.begin.frame_name, name);
            return Err(RgDeclareError::FrameClosed {
                frame_id: self.begin.frame_id,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn push_node(
        declared: &mut RgDeclaration<'r>,
        desc: RgPassDesc,
        executor: Box<dyn RgPassExecutor + 'r>,
    ) -> Result<RgPassId, RgDeclareError> {
        desc.validate(&*declared.registry)?;

        let id = RgPassId(declared.passes.len());
        for access in &desc.accesses {
            if let Some(resource) = declared.registry.get_mut(access.handle) {
                resource.extend_declared_lifetime(id);
            }
        }
        log::trace!("declared pass '{}' ({:?}) on {} queue", desc.name, id, desc.queue);

        declared.passes.push(RgPassNode { id, desc, executor });
        Ok(id)
    }
}

// submit
impl<'r> RgFrame<'r> {
    /// 编译、录制并提交本帧
    ///
    /// 图错误时整帧被丢弃，返回 `Err`；资源错误和设备错误汇总在返回的报告中。
    /// 无论结果如何，本帧的 transient 句柄都会失效。
    pub fn submit(self) -> Result<RgFrameReport, RgFrameError> {
        let Self {
            begin,
            declared,
            backend,
        } = self;
        let declared = declared.into_inner().unwrap_or_else(PoisonError::into_inner);
        backend.submit(begin, declared.registry, declared.passes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ember_gfx::{GfxFormat, GfxResourceId, GfxResourceState, HeadlessDevice};

    use super::*;
    use crate::{config::RgConfig, renderer::RgRenderer};

    fn renderer() -> RgRenderer {
        RgRenderer::new(RgConfig::default(), Arc::new(HeadlessDevice::new())).unwrap()
    }

    #[test]
    fn test_declaration_after_close_is_rejected() {
        let mut renderer = renderer();
        let frame = renderer.begin_frame().unwrap();
        frame.close();

        let err = frame
            .declare_pass("late", GfxQueueClass::Graphics, vec![], |_| Ok(()))
            .unwrap_err();
        assert_eq!(
            err,
            RgDeclareError::FrameClosed {
                frame_id: 0,
                name: "late".to_string()
            }
        );
        assert!(matches!(
            frame.create_transient_buffer("late_buffer", RgBufferDesc::new(16)),
            Err(RgDeclareError::FrameClosed { .. })
        ));
        assert_eq!(frame.pass_count(), 0);
    }

    #[test]
    fn test_declare_extends_lifetime() {
        let mut renderer = renderer();
        let color = renderer
            .registry_mut()
            .import_texture(
                "color",
                GfxResourceId(1),
                RgTextureDesc::new_2d(8, 8, GfxFormat::Rgba8Unorm),
                GfxResourceState::Undefined,
            )
            .unwrap();

        let frame = renderer.begin_frame().unwrap();
        let scratch = frame.create_transient_buffer("scratch", RgBufferDesc::new(256)).unwrap();
        frame
            .declare_pass(
                "fill",
                GfxQueueClass::Compute,
                vec![RgAccess::write(scratch, GfxResourceState::UnorderedAccess)],
                |_| Ok(()),
            )
            .unwrap();
        frame
            .declare_pass(
                "draw",
                GfxQueueClass::Graphics,
                vec![
                    RgAccess::read(scratch, GfxResourceState::NonPixelShaderResource),
                    RgAccess::write(color, GfxResourceState::RenderTarget),
                ],
                |_| Ok(()),
            )
            .unwrap();

        {
            let declared = frame.lock();
            let lifetime = declared.registry.get(scratch).unwrap().declared_lifetime;
            assert_eq!(lifetime, Some((RgPassId(0), RgPassId(1))));
        }

        frame.submit().unwrap();
        assert!(!renderer.registry().contains(scratch));
        assert_eq!(renderer.registry().get(color).unwrap().declared_lifetime, None);
    }

    #[test]
    fn test_invalid_declaration_is_not_queued() {
        let mut renderer = renderer();
        let frame = renderer.begin_frame().unwrap();
        let buffer = frame.create_transient_buffer("b", RgBufferDesc::new(16)).unwrap();

        let err = frame
            .declare_pass(
                "copy_rt",
                GfxQueueClass::Copy,
                vec![RgAccess::write(buffer, GfxResourceState::UnorderedAccess)],
                |_| Ok(()),
            )
            .unwrap_err();
        assert!(matches!(err, RgDeclareError::QueueAffinityMismatch { .. }));
        assert_eq!(frame.pass_count(), 0);
    }
}
