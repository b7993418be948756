//! RenderGraph 的入口
//!
//! `RgRenderer` 持有资源注册表、frame manager 和设备，是唯一能修改资源权威状态的地方。
//! 每帧：`begin_frame` 得到 `RgFrame`，producer 声明 Pass，`RgFrame::submit` 完成提交。

use std::sync::Arc;

use ember_gfx::{GfxDevice, GfxError, GfxResourceId, GfxResourceState};
use itertools::Itertools;

use crate::{
    config::RgConfig,
    error::{RgConfigError, RgDeclareError, RgFrameError},
    frame::{RgFrameBegin, RgFrameManager},
    render_graph::{
        builder::RgFrame,
        compiler::{RgCompileContext, RgCompiledFrame},
        executor::{RgExecutor, RgRecordedPass},
        pass::RgPassNode,
        resource::{RgBufferDesc, RgTextureDesc},
        resource_handle::{RgPassId, RgResourceHandle},
        resource_registry::RgResourceRegistry,
    },
    stats::{RgFrameQuality, RgFrameReport, RgFrameStats, RgPassOutcome},
};

pub struct RgRenderer {
    config: RgConfig,
    device: Arc<dyn GfxDevice>,
    registry: RgResourceRegistry,
    frames: RgFrameManager,
    last_stats: RgFrameStats,
}

// new & init
impl RgRenderer {
    pub fn new(config: RgConfig, device: Arc<dyn GfxDevice>) -> Result<Self, RgConfigError> {
        config.validate()?;
        let frames = RgFrameManager::new(&config);

        Ok(Self {
            config,
            device,
            registry: RgResourceRegistry::new(),
            frames,
            last_stats: RgFrameStats::default(),
        })
    }
}

// destroy
impl RgRenderer {
    /// 等待所有已提交的工作完成，之后可以安全地销毁资源
    pub fn wait_idle(&mut self) -> Result<Vec<GfxResourceId>, GfxError> {
        self.device.wait_idle()?;
        let mut retired = self.frames.take_retired();
        retired.extend(self.frames.drain_deferred_releases());
        Ok(retired)
    }
}

// getters
impl RgRenderer {
    #[inline]
    pub fn config(&self) -> &RgConfig {
        &self.config
    }

    #[inline]
    pub fn device(&self) -> &Arc<dyn GfxDevice> {
        &self.device
    }

    #[inline]
    pub fn registry(&self) -> &RgResourceRegistry {
        &self.registry
    }

    /// 导入资源、更新驻留状态等
    #[inline]
    pub fn registry_mut(&mut self) -> &mut RgResourceRegistry {
        &mut self.registry
    }

    #[inline]
    pub fn frame_manager(&self) -> &RgFrameManager {
        &self.frames
    }

    /// 上一次提交的帧的统计
    #[inline]
    pub fn last_stats(&self) -> &RgFrameStats {
        &self.last_stats
    }

    #[inline]
    pub fn next_frame_id(&self) -> u64 {
        self.frames.frame_counter().frame_id()
    }
}

// register
impl RgRenderer {
    pub fn import_texture(
        &mut self,
        name: impl Into<String>,
        physical: GfxResourceId,
        desc: RgTextureDesc,
        initial_state: GfxResourceState,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.registry.import_texture(name, physical, desc, initial_state)
    }

    pub fn import_buffer(
        &mut self,
        name: impl Into<String>,
        physical: GfxResourceId,
        desc: RgBufferDesc,
        initial_state: GfxResourceState,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        self.registry.import_buffer(name, physical, desc, initial_state)
    }

    /// 释放持久资源
    ///
    /// 句柄立即失效；物理 id 在最后使用它的帧完成之后出现在 `RgFrameReport::retired_resources` 中。
    pub fn release_resource(&mut self, handle: RgResourceHandle) -> Result<(), RgDeclareError> {
        let resource = self.registry.remove(handle)?;
        if let Some(physical) = resource.physical {
            log::debug!(
                "release '{}' ({:?}), last used in frame {:?}",
                resource.name,
                physical,
                resource.last_used_frame
            );
            self.frames.defer_release(physical, resource.last_used_frame);
        }
        Ok(())
    }
}

// phase methods
impl RgRenderer {
    /// 开始新的一帧
    ///
    /// 如果 frame slot 仍在使用，阻塞直到它的 fence 完成（frames-in-flight backpressure）。
    /// 等待期间设备丢失时重置所有 slot 并返回错误，下一次调用从干净的状态开始。
    pub fn begin_frame(&mut self) -> Result<RgFrame<'_>, RgFrameError> {
        // 被丢弃而没有提交的 RgFrame 可能留下 transient 资源
        self.registry.purge_transients();
        self.registry.clear_declared_lifetimes();

        let begin = match self.frames.begin_frame(self.device.as_ref()) {
            Ok(begin) => begin,
            Err(source) => {
                let slot = self.frames.current_slot_index();
                log::error!("{} waiting for slot {} failed: {}", self.frames.frame_counter().frame_name(), slot, source);
                if source.is_device_lost() {
                    self.frames.reset_all(self.device.as_ref());
                    self.registry.reset_states();
                }
                return Err(RgFrameError::SlotWait { slot, source });
            }
        };
        log::trace!("{} begin on slot {}", begin.frame_name, begin.slot_index);

        let backend = RgFrameBackend {
            config: &self.config,
            device: self.device.as_ref(),
            frames: &mut self.frames,
            last_stats: &mut self.last_stats,
        };
        Ok(RgFrame::new(begin, &mut self.registry, backend))
    }
}

/// `RgFrame::submit` 需要的 renderer 状态
pub(crate) struct RgFrameBackend<'r> {
    pub config: &'r RgConfig,
    pub device: &'r dyn GfxDevice,
    pub frames: &'r mut RgFrameManager,
    pub last_stats: &'r mut RgFrameStats,
}

impl<'r> RgFrameBackend<'r> {
    pub fn submit(
        self,
        begin: RgFrameBegin,
        registry: &mut RgResourceRegistry,
        nodes: Vec<RgPassNode<'r>>,
    ) -> Result<RgFrameReport, RgFrameError> {
        let _span = crate::profiling::rg_span!("RgFrame::submit");

        let (descs, executors): (Vec<_>, Vec<_>) = nodes.into_iter().map(|node| (node.desc, node.executor)).unzip();

        let ctx = RgCompileContext {
            frame_id: begin.frame_id,
            registry: &*registry,
            config: self.config,
            device: self.device,
            transient_id_base: begin.transient_id_base,
        };
        let compiled = match RgCompiledFrame::compile(descs, &ctx) {
            Ok(compiled) => compiled,
            Err(source) => {
                log::error!("{} dropped: {}", begin.frame_name, source);
                registry.purge_transients();
                registry.clear_declared_lifetimes();
                self.frames.end_frame();
                return Err(RgFrameError::Graph {
                    frame_id: begin.frame_id,
                    source,
                });
            }
        };
        if self.config.dump_execution_plan {
            compiled.print_execution_plan();
        }

        let mut recorded = RgExecutor::record(&compiled, executors, begin.slot_index, self.config.parallel_recording);

        let submitted = RgExecutor::assemble(&compiled, &mut recorded, self.device, begin.slot_index, &begin.frame_name)
            .and_then(|command_buffers| {
                let _span = crate::profiling::rg_span!("GfxDevice::submit");
                let (submits, signaled) = self.frames.build_submits(&compiled, command_buffers);
                self.device.submit(submits).map(|()| signaled)
            });

        let device_error = match submitted {
            Ok(signaled) => {
                self.frames.commit_submission(&compiled, signaled);
                for (handle, state) in compiled.resolution().final_states() {
                    registry.commit_state(handle, state.current, state.last_queue, state.queue_states, begin.frame_id);
                }
                None
            }
            Err(err) => {
                log::error!("{} submission failed: {}", begin.frame_name, err);
                self.frames.reset_all(self.device);
                registry.reset_states();
                Some(err)
            }
        };

        registry.purge_transients();
        registry.clear_declared_lifetimes();

        let report = Self::report(&compiled, recorded, device_error, self.frames.take_retired());
        if report.quality != RgFrameQuality::Full {
            log::warn!("{} {:?}: {}", begin.frame_name, report.quality, report.stats);
        } else {
            log::debug!("{} {}", begin.frame_name, report.stats);
        }

        *self.last_stats = report.stats.clone();
        self.frames.end_frame();
        Ok(report)
    }

    fn report(
        compiled: &RgCompiledFrame,
        recorded: Vec<RgRecordedPass>,
        device_error: Option<GfxError>,
        retired_resources: Vec<GfxResourceId>,
    ) -> RgFrameReport {
        let dropped = device_error.is_some();

        let mut outcomes = compiled
            .passes()
            .iter()
            .enumerate()
            .map(|(index, desc)| {
                let outcome = match compiled.skip_reason(RgPassId(index)) {
                    Some(reason) => RgPassOutcome::Skipped(reason.clone()),
                    None => RgPassOutcome::Dropped,
                };
                (desc.name.clone(), outcome)
            })
            .collect_vec();
        if !dropped {
            for entry in recorded {
                outcomes[entry.pass.index()].1 = entry.outcome;
            }
        }

        let failed_pass_count = outcomes.iter().filter(|(_, o)| matches!(o, RgPassOutcome::Failed(_))).count();
        let executed_pass_count = outcomes.iter().filter(|(_, o)| o.is_executed()).count();
        let skipped_pass_count = compiled.skipped_count();

        let quality = if dropped {
            RgFrameQuality::Dropped
        } else if skipped_pass_count > 0 || failed_pass_count > 0 {
            RgFrameQuality::Degraded
        } else {
            RgFrameQuality::Full
        };

        let stats = RgFrameStats {
            frame_id: compiled.frame_id(),
            pass_count: compiled.pass_count(),
            executed_pass_count,
            skipped_pass_count,
            failed_pass_count,
            batch_count: compiled.batches().len(),
            barrier_count: compiled.resolution().barrier_count(),
            cross_queue_wait_count: compiled.cross_queue_wait_count(),
            aliased_memory_bytes: compiled.aliasing().aliased_bytes(),
            transient_pool_bytes: compiled.aliasing().pool_bytes(),
        };

        RgFrameReport {
            frame_id: compiled.frame_id(),
            quality,
            stats,
            outcomes,
            retired_resources,
            device_error,
        }
    }
}
