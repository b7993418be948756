//! 一帧的编译
//!
//! 把声明好的 Pass 依次交给依赖图、调度器、别名分配和 barrier 解析，
//! 得到可以直接录制和提交的 `RgCompiledFrame`。编译是单线程的。

use std::collections::{HashMap, HashSet};

use ash::vk;
use ember_gfx::{GfxDevice, GfxQueueClass, GfxResourceId};
use itertools::Itertools;

use crate::{
    config::RgConfig,
    error::RgGraphError,
    render_graph::{
        aliasing::{RgAliasingPlan, RgAliasingPlanner},
        barrier::{RgBarrierResolution, RgBarrierResolver, RgPassBarriers},
        graph::RgDependencyGraph,
        pass::RgPassDesc,
        resource_handle::{RgPassId, RgResourceHandle},
        resource_registry::RgResourceRegistry,
        scheduler::{RgBatch, RgScheduler},
    },
    stats::RgSkipReason,
};

/// 编译需要的外部信息
pub struct RgCompileContext<'a> {
    pub frame_id: u64,
    pub registry: &'a RgResourceRegistry,
    pub config: &'a RgConfig,
    pub device: &'a dyn GfxDevice,
    /// 本帧 transient 资源物理 id 的起点
    pub transient_id_base: u64,
}

/// 编译后的帧
///
/// 包含执行顺序、batch、预计算的 barriers 和每个资源的物理 id。
pub struct RgCompiledFrame {
    frame_id: u64,
    passes: Vec<RgPassDesc>,
    graph: RgDependencyGraph,
    order: Vec<RgPassId>,
    /// 下标为 Pass 编号
    skipped: Vec<Option<RgSkipReason>>,
    batches: Vec<RgBatch>,
    aliasing: RgAliasingPlan,
    physical: HashMap<RgResourceHandle, GfxResourceId>,
    barriers: RgBarrierResolution,
    resource_names: HashMap<RgResourceHandle, String>,
}

// compile
impl RgCompiledFrame {
    /// 编译一帧
    ///
    /// 图错误（环、缺失的版本、未知的显式依赖）返回 `Err`；
    /// 资源错误不返回 `Err`，受影响的 Pass 及其下游被标记为跳过。
    pub fn compile(passes: Vec<RgPassDesc>, ctx: &RgCompileContext<'_>) -> Result<Self, RgGraphError> {
        let _span = crate::profiling::rg_span!("RgCompiledFrame::compile");
        let registry = ctx.registry;

        let graph = RgDependencyGraph::build_named(&passes, |h| registry.name_of(h).to_string())?;

        let scheduler = RgScheduler::new(ctx.config.tie_break);
        let order = scheduler.order(&graph, &passes);

        // 非驻留资源
        let mut skipped = passes
            .iter()
            .map(|pass| {
                pass.accesses.iter().find_map(|access| {
                    let resource = registry.get(access.handle)?;
                    let resident = resource.resident && resource.physical.is_none_or(|id| ctx.device.is_resident(id));
                    (!resident).then(|| RgSkipReason::NotResident {
                        resource: resource.name.clone(),
                    })
                })
            })
            .collect_vec();
        Self::propagate_skips(&graph, &passes, &order, &mut skipped);

        // transient 内存
        let planner = RgAliasingPlanner::new(
            ctx.config.enable_aliasing,
            ctx.config.placement_alignment,
            ctx.config.transient_pool_budget,
        );
        let active = skipped.iter().map(Option::is_none).collect_vec();
        let aliasing = planner.plan(&graph, &passes, &order, &active, registry);
        if !aliasing.failed().is_empty() {
            for (index, pass) in passes.iter().enumerate() {
                if skipped[index].is_some() {
                    continue;
                }
                if let Some(access) = pass.accesses.iter().find(|a| aliasing.is_failed(a.handle)) {
                    skipped[index] = Some(RgSkipReason::AllocationFailed {
                        resource: registry.name_of(access.handle).to_string(),
                    });
                }
            }
            Self::propagate_skips(&graph, &passes, &order, &mut skipped);
        }
        let active = skipped.iter().map(Option::is_none).collect_vec();

        // 物理 id
        let mut physical = HashMap::new();
        let mut resource_names = HashMap::new();
        for access in passes.iter().flat_map(|p| p.accesses.iter()) {
            let Some(resource) = registry.get(access.handle) else {
                continue;
            };
            resource_names.entry(access.handle).or_insert_with(|| resource.name.clone());
            let id = match resource.physical {
                Some(id) => Some(id),
                None => aliasing
                    .placement(access.handle)
                    .map(|p| GfxResourceId(ctx.transient_id_base + p.ordinal as u64)),
            };
            if let Some(id) = id {
                physical.insert(access.handle, id);
            }
        }

        // 上一帧中最后由其他队列使用的持久资源
        let mut prior_frame_waits: HashMap<RgPassId, Vec<GfxQueueClass>> = HashMap::new();
        let mut seen = HashSet::new();
        for &pass in order.iter().filter(|p| active[p.index()]) {
            let queue = passes[pass.index()].queue;
            for access in &passes[pass.index()].accesses {
                if !seen.insert(access.handle) {
                    continue;
                }
                let Some(last_queue) = registry.get(access.handle).and_then(|r| r.last_queue) else {
                    continue;
                };
                if last_queue != queue {
                    prior_frame_waits.entry(pass).or_default().push(last_queue);
                }
            }
        }

        let batches = scheduler.batch(&graph, &passes, &order, &active, &prior_frame_waits);
        let barriers = RgBarrierResolver::resolve(&passes, &order, &active, registry, &physical, &aliasing);

        Ok(Self {
            frame_id: ctx.frame_id,
            passes,
            graph,
            order,
            skipped,
            batches,
            aliasing,
            physical,
            barriers,
            resource_names,
        })
    }

    /// 沿携带数据的边传播跳过状态
    ///
    /// `order` 是拓扑序，所以一次遍历就能覆盖所有传递的下游。
    fn propagate_skips(
        graph: &RgDependencyGraph,
        passes: &[RgPassDesc],
        order: &[RgPassId],
        skipped: &mut [Option<RgSkipReason>],
    ) {
        for &pass in order {
            if skipped[pass.index()].is_some() {
                continue;
            }
            if let Some(upstream) = graph
                .data_predecessors(pass)
                .into_iter()
                .find(|p| skipped[p.index()].is_some())
            {
                skipped[pass.index()] = Some(RgSkipReason::DependencySkipped {
                    pass: passes[upstream.index()].name.clone(),
                });
            }
        }
    }
}

// getters
impl RgCompiledFrame {
    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn passes(&self) -> &[RgPassDesc] {
        &self.passes
    }

    #[inline]
    pub fn pass(&self, pass: RgPassId) -> &RgPassDesc {
        &self.passes[pass.index()]
    }

    #[inline]
    pub fn graph(&self) -> &RgDependencyGraph {
        &self.graph
    }

    /// 调度顺序，包含被跳过的 Pass
    #[inline]
    pub fn order(&self) -> &[RgPassId] {
        &self.order
    }

    #[inline]
    pub fn batches(&self) -> &[RgBatch] {
        &self.batches
    }

    #[inline]
    pub fn aliasing(&self) -> &RgAliasingPlan {
        &self.aliasing
    }

    #[inline]
    pub fn physical(&self) -> &HashMap<RgResourceHandle, GfxResourceId> {
        &self.physical
    }

    #[inline]
    pub fn barriers(&self, pass: RgPassId) -> &RgPassBarriers {
        self.barriers.pass_barriers(pass)
    }

    #[inline]
    pub fn resolution(&self) -> &RgBarrierResolution {
        &self.barriers
    }

    #[inline]
    pub fn skip_reason(&self, pass: RgPassId) -> Option<&RgSkipReason> {
        self.skipped[pass.index()].as_ref()
    }

    #[inline]
    pub fn is_active(&self, pass: RgPassId) -> bool {
        self.skipped[pass.index()].is_none()
    }

    /// 按调度顺序的活跃 Pass
    pub fn active_order(&self) -> impl Iterator<Item = RgPassId> + '_ {
        self.order.iter().copied().filter(|p| self.is_active(*p))
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.iter().filter(|s| s.is_some()).count()
    }

    /// batch 之间的等待总数，包括等待上一帧
    pub fn cross_queue_wait_count(&self) -> usize {
        self.batches.iter().map(RgBatch::wait_count).sum()
    }

    fn resource_name(&self, handle: RgResourceHandle) -> &str {
        self.resource_names.get(&handle).map(String::as_str).unwrap_or("<unknown>")
    }
}

// 调试方法
impl RgCompiledFrame {
    /// 打印执行计划（用于调试）
    ///
    /// 按 batch 输出每个 Pass 的资源访问和 barrier，最后列出被跳过的 Pass。
    pub fn print_execution_plan(&self) {
        let active = self.active_order().collect_vec();

        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║              RenderGraph Execution Plan  (frame {})", self.frame_id);
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!(
            "║ Total Passes: {}  |  Batches: {}  |  Execution Order: [{}]",
            self.passes.len(),
            self.batches.len(),
            active.iter().map(|p| self.pass(*p).name.as_str()).join(" → ")
        );
        log::info!(
            "║ Transient Pool: {} KiB  |  Aliased: {} KiB",
            self.aliasing.pool_bytes() / 1024,
            self.aliasing.aliased_bytes() / 1024
        );
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for batch in &self.batches {
            log::info!("");
            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!(
                "│ Batch #{} on {} queue  |  waits: [{}]",
                batch.index,
                batch.queue,
                batch
                    .waits
                    .iter()
                    .map(|w| format!("{} #{}", w.queue, w.batch))
                    .chain(batch.prior_frame_waits.iter().map(|q| format!("{q} (previous frame)")))
                    .join(", ")
            );

            for &pass in &batch.passes {
                let desc = self.pass(pass);
                let position = active.iter().position(|p| *p == pass).map_or(0, |i| i + 1);
                log::info!("├─────────────────────────────────────────────────────────────────┤");
                log::info!("│ [{}/{}] Pass: \"{}\"", position, active.len(), desc.name);

                for access in &desc.accesses {
                    let vk_state = access.state.to_vk();
                    log::info!(
                        "│   {} \"{}\" @ {:?} (layout: {:?}, stage: {}, access: {})",
                        if access.kind.writes() { "✏️ " } else { "📖" },
                        self.resource_name(access.handle),
                        access.state,
                        vk_state.layout,
                        format_pipeline_stage(vk_state.stage),
                        format_access_flags(vk_state.access)
                    );
                }

                let barriers = self.barriers(pass);
                if barriers.has_barriers() {
                    log::info!("│ Barriers: {}", barriers.len());
                    for barrier in barriers.barriers() {
                        log::info!("│   🔒 {}", barrier);
                    }
                } else {
                    log::info!("│ No barriers required");
                }
            }
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        let skipped = self.order.iter().filter_map(|p| self.skip_reason(*p).map(|r| (*p, r))).collect_vec();
        if !skipped.is_empty() {
            log::info!("");
            log::info!("Skipped Passes:");
            for (pass, reason) in skipped {
                log::info!("  ⏭  \"{}\": {}", self.pass(pass).name, reason);
            }
        }

        log::info!("");
        log::info!("═══════════════════════ End of Execution Plan ═══════════════════════");
    }
}

const PIPELINE_STAGE_NAMES: &[(vk::PipelineStageFlags2, &str)] = &[
    (vk::PipelineStageFlags2::TOP_OF_PIPE, "TOP_OF_PIPE"),
    (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, "BOTTOM_OF_PIPE"),
    (vk::PipelineStageFlags2::DRAW_INDIRECT, "DRAW_INDIRECT"),
    (vk::PipelineStageFlags2::VERTEX_INPUT, "VERTEX_INPUT"),
    (vk::PipelineStageFlags2::VERTEX_SHADER, "VERTEX_SHADER"),
    (vk::PipelineStageFlags2::FRAGMENT_SHADER, "FRAGMENT_SHADER"),
    (vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS, "EARLY_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS, "LATE_FRAGMENT_TESTS"),
    (vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT, "COLOR_ATTACHMENT_OUTPUT"),
    (vk::PipelineStageFlags2::COMPUTE_SHADER, "COMPUTE_SHADER"),
    (vk::PipelineStageFlags2::TRANSFER, "TRANSFER"),
    (vk::PipelineStageFlags2::RESOLVE, "RESOLVE"),
    (vk::PipelineStageFlags2::ALL_COMMANDS, "ALL_COMMANDS"),
];

const ACCESS_FLAG_NAMES: &[(vk::AccessFlags2, &str)] = &[
    (vk::AccessFlags2::INDIRECT_COMMAND_READ, "INDIRECT_CMD_READ"),
    (vk::AccessFlags2::INDEX_READ, "INDEX_READ"),
    (vk::AccessFlags2::VERTEX_ATTRIBUTE_READ, "VERTEX_ATTR_READ"),
    (vk::AccessFlags2::UNIFORM_READ, "UNIFORM_READ"),
    (vk::AccessFlags2::SHADER_SAMPLED_READ, "SHADER_SAMPLED_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_READ, "STORAGE_READ"),
    (vk::AccessFlags2::SHADER_STORAGE_WRITE, "STORAGE_WRITE"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_READ, "COLOR_ATTACH_READ"),
    (vk::AccessFlags2::COLOR_ATTACHMENT_WRITE, "COLOR_ATTACH_WRITE"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ, "DEPTH_ATTACH_READ"),
    (vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE, "DEPTH_ATTACH_WRITE"),
    (vk::AccessFlags2::TRANSFER_READ, "TRANSFER_READ"),
    (vk::AccessFlags2::TRANSFER_WRITE, "TRANSFER_WRITE"),
    (vk::AccessFlags2::MEMORY_READ, "MEMORY_READ"),
    (vk::AccessFlags2::MEMORY_WRITE, "MEMORY_WRITE"),
];

/// 格式化 PipelineStageFlags2 为可读字符串
fn format_pipeline_stage(stage: vk::PipelineStageFlags2) -> String {
    let names = PIPELINE_STAGE_NAMES.iter().filter(|(flag, _)| stage.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if names.is_empty() { format!("{:?}", stage) } else { names.join(" | ") }
}

/// 格式化 AccessFlags2 为可读字符串
fn format_access_flags(access: vk::AccessFlags2) -> String {
    if access == vk::AccessFlags2::NONE {
        return "NONE".to_string();
    }
    let names = ACCESS_FLAG_NAMES.iter().filter(|(flag, _)| access.contains(*flag)).map(|(_, name)| *name).collect_vec();
    if names.is_empty() { format!("{:?}", access) } else { names.join(" | ") }
}

#[cfg(test)]
mod tests {
    use ember_gfx::{GfxFormat, GfxResourceState, HeadlessDevice};

    use super::*;
    use crate::render_graph::resource::{RgBufferDesc, RgTextureDesc};

    fn compile(registry: &RgResourceRegistry, device: &HeadlessDevice, config: &RgConfig, passes: Vec<RgPassDesc>) -> RgCompiledFrame {
        let ctx = RgCompileContext {
            frame_id: 0,
            registry,
            config,
            device,
            transient_id_base: 1 << 48,
        };
        RgCompiledFrame::compile(passes, &ctx).unwrap()
    }

    #[test]
    fn test_not_resident_skips_dependents_only() {
        let mut registry = RgResourceRegistry::new();
        let albedo = registry
            .import_texture("albedo", GfxResourceId(1), RgTextureDesc::new_2d(64, 64, GfxFormat::Rgba8Srgb), GfxResourceState::PixelShaderResource)
            .unwrap();
        let gbuffer = registry
            .create_transient("gbuffer", RgTextureDesc::new_2d(64, 64, GfxFormat::Rgba16Float).into(), 0)
            .unwrap();
        let hud = registry.create_transient("hud", RgBufferDesc::new(64).into(), 0).unwrap();
        let device = HeadlessDevice::new();
        device.set_resident(GfxResourceId(1), false);

        let compiled = compile(
            &registry,
            &device,
            &RgConfig::default(),
            vec![
                RgPassDesc::new("gbuffer", GfxQueueClass::Graphics)
                    .read(albedo, GfxResourceState::PixelShaderResource)
                    .write(gbuffer, GfxResourceState::RenderTarget),
                RgPassDesc::new("lighting", GfxQueueClass::Graphics).read(gbuffer, GfxResourceState::PixelShaderResource),
                RgPassDesc::new("hud", GfxQueueClass::Graphics).write(hud, GfxResourceState::UnorderedAccess),
            ],
        );

        assert!(matches!(compiled.skip_reason(RgPassId(0)), Some(RgSkipReason::NotResident { .. })));
        assert!(matches!(compiled.skip_reason(RgPassId(1)), Some(RgSkipReason::DependencySkipped { .. })));
        assert!(compiled.is_active(RgPassId(2)));
        assert_eq!(compiled.batches().len(), 1);
        assert_eq!(compiled.batches()[0].passes, vec![RgPassId(2)]);
        // gbuffer 没有活跃的使用者，不占用 transient 内存
        assert!(compiled.aliasing().placement(gbuffer).is_none());
    }

    #[test]
    fn test_allocation_failure() {
        let mut registry = RgResourceRegistry::new();
        let big = registry.create_transient("big", RgBufferDesc::new(4096).into(), 0).unwrap();
        let small = registry.create_transient("small", RgBufferDesc::new(16).into(), 0).unwrap();
        let config = RgConfig {
            transient_pool_budget: 1024,
            placement_alignment: 16,
            ..Default::default()
        };
        let device = HeadlessDevice::new();
        let compiled = compile(
            &registry,
            &device,
            &config,
            vec![
                RgPassDesc::new("big", GfxQueueClass::Compute).write(big, GfxResourceState::UnorderedAccess),
                RgPassDesc::new("small", GfxQueueClass::Compute).write(small, GfxResourceState::UnorderedAccess),
            ],
        );
        assert!(matches!(compiled.skip_reason(RgPassId(0)), Some(RgSkipReason::AllocationFailed { .. })));
        assert!(compiled.is_active(RgPassId(1)));
        assert_eq!(compiled.physical().get(&small), Some(&GfxResourceId((1 << 48) + 1)));
    }

    #[test]
    fn test_prior_frame_queue_handoff() {
        let mut registry = RgResourceRegistry::new();
        let history = registry
            .import_texture("history", GfxResourceId(5), RgTextureDesc::new_2d(8, 8, GfxFormat::Rgba16Float), GfxResourceState::Common)
            .unwrap();
        registry.commit_state(
            history,
            GfxResourceState::UnorderedAccess,
            Some(GfxQueueClass::Compute),
            [GfxResourceState::Common, GfxResourceState::UnorderedAccess, GfxResourceState::Common],
            0,
        );
        let device = HeadlessDevice::new();
        let compiled = compile(
            &registry,
            &device,
            &RgConfig::default(),
            vec![RgPassDesc::new("taa", GfxQueueClass::Graphics).read(history, GfxResourceState::PixelShaderResource)],
        );
        assert_eq!(compiled.batches()[0].prior_frame_waits, vec![GfxQueueClass::Compute]);
        assert_eq!(compiled.barriers(RgPassId(0)).barriers()[0].src_queue, Some(GfxQueueClass::Compute));
        assert_eq!(compiled.cross_queue_wait_count(), 1);
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_access_flags(vk::AccessFlags2::NONE), "NONE");
        assert_eq!(
            format_pipeline_stage(vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER),
            "COMPUTE_SHADER | TRANSFER"
        );
    }
}
