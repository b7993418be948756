//! Barrier 自动计算
//!
//! 按调度顺序遍历每个资源的访问，根据上一次访问留下的状态计算访问之前需要的 barrier。
//! 解析只在本地跟踪状态，提交成功之后才写回 `RgResourceRegistry`。

use std::collections::HashMap;

use ember_gfx::{GfxBarrier, GfxQueueClass, GfxResourceId, GfxResourceKind, GfxResourceState};

use crate::render_graph::{
    aliasing::RgAliasingPlan,
    pass::{RgAccess, RgPassDesc},
    resource::RgResource,
    resource_handle::{RgPassId, RgResourceHandle},
    resource_registry::RgResourceRegistry,
};

/// 资源在解析过程中的跟踪状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgTrackedState {
    pub current: GfxResourceState,
    pub queue_states: [GfxResourceState; GfxQueueClass::COUNT],
    pub last_queue: Option<GfxQueueClass>,
    /// 本帧中是否已经被访问过
    pub touched: bool,
    /// 本帧中上一次访问是否写入
    pub last_was_write: bool,
}

impl RgTrackedState {
    pub fn from_resource(resource: &RgResource) -> Self {
        Self {
            current: resource.current_state,
            queue_states: resource.queue_states,
            last_queue: resource.last_queue,
            touched: false,
            last_was_write: false,
        }
    }

    fn apply(&mut self, queue: GfxQueueClass, access: &RgAccess) {
        self.current = access.state;
        self.queue_states[queue.index()] = access.state;
        self.last_queue = Some(queue);
        self.touched = true;
        self.last_was_write = access.kind.writes();
    }
}

/// Pass 执行前需要的 barrier 集合
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RgPassBarriers {
    barriers: Vec<GfxBarrier>,
}

impl RgPassBarriers {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, barrier: GfxBarrier) {
        self.barriers.push(barrier);
    }

    #[inline]
    pub fn has_barriers(&self) -> bool {
        !self.barriers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    #[inline]
    pub fn barriers(&self) -> &[GfxBarrier] {
        &self.barriers
    }

    /// 跨队列移交的数量
    pub fn cross_queue_count(&self) -> usize {
        self.barriers.iter().filter(|b| b.is_cross_queue()).count()
    }
}

/// 一帧的解析结果
#[derive(Clone, Debug, Default)]
pub struct RgBarrierResolution {
    /// 下标为 Pass 编号；未执行的 Pass 为空
    pass_barriers: Vec<RgPassBarriers>,
    /// 本帧被访问过的资源的最终状态
    final_states: HashMap<RgResourceHandle, RgTrackedState>,
}

impl RgBarrierResolution {
    #[inline]
    pub fn pass_barriers(&self, pass: RgPassId) -> &RgPassBarriers {
        &self.pass_barriers[pass.index()]
    }

    #[inline]
    pub fn final_state(&self, handle: RgResourceHandle) -> Option<&RgTrackedState> {
        self.final_states.get(&handle)
    }

    pub fn final_states(&self) -> impl Iterator<Item = (RgResourceHandle, &RgTrackedState)> {
        self.final_states.iter().map(|(h, s)| (*h, s))
    }

    /// barrier 总数
    pub fn barrier_count(&self) -> usize {
        self.pass_barriers.iter().map(RgPassBarriers::len).sum()
    }
}

/// Barrier 计算器
///
/// 根据资源状态跟踪信息，计算每个 Pass 需要的 barriers。
pub struct RgBarrierResolver;

impl RgBarrierResolver {
    /// 按调度顺序为活跃 Pass 计算 barrier
    ///
    /// # 参数
    /// - `physical`: 每个资源在本帧的物理 id，没有物理 id 的资源不会出现在活跃 Pass 中
    /// - `aliasing`: 复用内存的 transient 资源在首次使用时需要 aliasing barrier
    pub fn resolve(
        passes: &[RgPassDesc],
        order: &[RgPassId],
        active: &[bool],
        registry: &RgResourceRegistry,
        physical: &HashMap<RgResourceHandle, GfxResourceId>,
        aliasing: &RgAliasingPlan,
    ) -> RgBarrierResolution {
        let _span = crate::profiling::rg_span!("RgBarrierResolver::resolve");

        let mut pass_barriers = vec![RgPassBarriers::new(); passes.len()];
        let mut states: HashMap<RgResourceHandle, RgTrackedState> = HashMap::new();

        for &pass in order.iter().filter(|p| active[p.index()]) {
            let desc = &passes[pass.index()];
            for access in &desc.accesses {
                let (Some(resource), Some(&id)) = (registry.get(access.handle), physical.get(&access.handle)) else {
                    log::warn!("pass '{}' accesses {:?} without physical backing", desc.name, access.handle);
                    debug_assert!(
                        false,
                        "active pass '{}' accesses {:?} without physical backing",
                        desc.name,
                        access.handle
                    );
                    continue;
                };
                let tracked = states
                    .entry(access.handle)
                    .or_insert_with(|| RgTrackedState::from_resource(resource));

                let aliased = aliasing.is_aliased(access.handle);
                if let Some(barrier) = Self::compute_barrier(id, resource.kind(), tracked, access, desc.queue, aliased) {
                    log::trace!("barrier before '{}': {}", desc.name, barrier);
                    pass_barriers[pass.index()].add(barrier);
                }
                tracked.apply(desc.queue, access);
            }
        }

        RgBarrierResolution {
            pass_barriers,
            final_states: states,
        }
    }

    /// 计算单次访问之前的 barrier
    ///
    /// - 复用内存的 transient 资源首次使用：aliasing barrier
    /// - 缓冲区首次使用且处于 Undefined / Common：隐式提升，不需要 barrier
    /// - 状态不同：状态转换，跨队列时记录源队列
    /// - 相同的只读状态：不需要 barrier
    /// - 相同的可写状态且涉及写入：保证执行顺序和可见性
    pub fn compute_barrier(
        resource: GfxResourceId,
        kind: GfxResourceKind,
        tracked: &RgTrackedState,
        access: &RgAccess,
        queue: GfxQueueClass,
        aliased: bool,
    ) -> Option<GfxBarrier> {
        if !tracked.touched {
            if aliased {
                return Some(GfxBarrier::aliasing(resource, kind, access.state));
            }
            if kind == GfxResourceKind::Buffer
                && matches!(tracked.current, GfxResourceState::Undefined | GfxResourceState::Common)
            {
                return None;
            }
        }

        let src_queue = tracked.last_queue.filter(|q| *q != queue);
        if tracked.current != access.state {
            return Some(GfxBarrier::transition(resource, kind, tracked.current, access.state).with_src_queue(src_queue));
        }

        if access.state.is_read_only() || !tracked.touched {
            return None;
        }
        if !tracked.last_was_write && !access.kind.writes() {
            return None;
        }

        let barrier = match access.state {
            GfxResourceState::UnorderedAccess => GfxBarrier::unordered_access(resource, kind),
            state => GfxBarrier::transition(resource, kind, state, state),
        };
        Some(barrier.with_src_queue(src_queue))
    }
}

#[cfg(test)]
mod tests {
    use ember_gfx::{GfxBarrierKind, GfxFormat};

    use super::*;
    use crate::render_graph::{
        aliasing::RgAliasingPlanner, graph::RgDependencyGraph, resource::RgBufferDesc, resource::RgTextureDesc,
        scheduler::RgScheduler,
    };

    struct Resolved {
        passes: Vec<RgPassDesc>,
        order: Vec<RgPassId>,
        resolution: RgBarrierResolution,
    }

    fn resolve(registry: &RgResourceRegistry, passes: Vec<RgPassDesc>) -> Resolved {
        let graph = RgDependencyGraph::build(&passes).unwrap();
        let order = RgScheduler::default().order(&graph, &passes);
        let active = vec![true; passes.len()];
        let physical = registry
            .iter()
            .enumerate()
            .map(|(i, (h, r))| (h, r.physical.unwrap_or(GfxResourceId(1000 + i as u64))))
            .collect::<HashMap<_, _>>();
        let aliasing = RgAliasingPlanner::new(false, 1, u64::MAX).plan(&graph, &passes, &order, &active, registry);
        let resolution = RgBarrierResolver::resolve(&passes, &order, &active, registry, &physical, &aliasing);
        Resolved {
            passes,
            order,
            resolution,
        }
    }

    fn texture(registry: &mut RgResourceRegistry, name: &str, id: u64, state: GfxResourceState) -> RgResourceHandle {
        registry
            .import_texture(name, GfxResourceId(id), RgTextureDesc::new_2d(32, 32, GfxFormat::Rgba8Unorm), state)
            .unwrap()
    }

    #[test]
    fn test_write_then_read_scenario() {
        let mut registry = RgResourceRegistry::new();
        let t = registry
            .create_transient("T", RgTextureDesc::new_2d(32, 32, GfxFormat::Rgba8Unorm).into(), 0)
            .unwrap();
        let u = registry.create_transient("U", RgBufferDesc::new(256).into(), 0).unwrap();
        let resolved = resolve(
            &registry,
            vec![
                RgPassDesc::new("A", GfxQueueClass::Graphics).write(t, GfxResourceState::RenderTarget),
                RgPassDesc::new("B", GfxQueueClass::Graphics).read(t, GfxResourceState::PixelShaderResource),
                RgPassDesc::new("C", GfxQueueClass::Graphics).write(u, GfxResourceState::UnorderedAccess),
            ],
        );

        let a = resolved.resolution.pass_barriers(RgPassId(0)).barriers();
        assert_eq!(a.len(), 1);
        assert_eq!((a[0].before, a[0].after), (GfxResourceState::Undefined, GfxResourceState::RenderTarget));

        let b = resolved.resolution.pass_barriers(RgPassId(1)).barriers();
        assert_eq!(b.len(), 1);
        assert_eq!((b[0].before, b[0].after), (GfxResourceState::RenderTarget, GfxResourceState::PixelShaderResource));

        assert!(resolved.resolution.pass_barriers(RgPassId(2)).is_empty());
    }

    #[test]
    fn test_consecutive_reads_are_coalesced() {
        let mut registry = RgResourceRegistry::new();
        let t = texture(&mut registry, "t", 1, GfxResourceState::PixelShaderResource);
        let resolved = resolve(
            &registry,
            vec![
                RgPassDesc::new("r0", GfxQueueClass::Graphics).read(t, GfxResourceState::PixelShaderResource),
                RgPassDesc::new("r1", GfxQueueClass::Graphics).read(t, GfxResourceState::PixelShaderResource),
            ],
        );
        assert_eq!(resolved.resolution.barrier_count(), 0);
    }

    #[test]
    fn test_uav_write_hazard() {
        let mut registry = RgResourceRegistry::new();
        let b = registry
            .import_buffer("particles", GfxResourceId(7), RgBufferDesc::new(1024), GfxResourceState::UnorderedAccess)
            .unwrap();
        let resolved = resolve(
            &registry,
            vec![
                RgPassDesc::new("simulate", GfxQueueClass::Compute).read_write(b, GfxResourceState::UnorderedAccess),
                RgPassDesc::new("compact", GfxQueueClass::Compute).read_write(b, GfxResourceState::UnorderedAccess),
            ],
        );
        assert!(resolved.resolution.pass_barriers(RgPassId(0)).is_empty());
        let compact = resolved.resolution.pass_barriers(RgPassId(1)).barriers();
        assert_eq!(compact.len(), 1);
        assert_eq!(compact[0].kind, GfxBarrierKind::UnorderedAccess);
    }

    #[test]
    fn test_cross_queue_transition_records_source_queue() {
        let mut registry = RgResourceRegistry::new();
        let t = texture(&mut registry, "ao", 3, GfxResourceState::Undefined);
        let resolved = resolve(
            &registry,
            vec![
                RgPassDesc::new("ssao", GfxQueueClass::Compute).write(t, GfxResourceState::UnorderedAccess),
                RgPassDesc::new("lighting", GfxQueueClass::Graphics).read(t, GfxResourceState::PixelShaderResource),
            ],
        );
        let barriers = resolved.resolution.pass_barriers(RgPassId(1)).barriers();
        assert_eq!(barriers[0].src_queue, Some(GfxQueueClass::Compute));

        let state = resolved.resolution.final_state(t).unwrap();
        assert_eq!(state.current, GfxResourceState::PixelShaderResource);
        assert_eq!(state.queue_states[GfxQueueClass::Compute.index()], GfxResourceState::UnorderedAccess);
        assert_eq!(state.last_queue, Some(GfxQueueClass::Graphics));
    }

    #[test]
    fn test_aliased_first_use() {
        let tracked = RgTrackedState::from_resource(&RgResource::transient(
            "t",
            RgTextureDesc::new_2d(8, 8, GfxFormat::R32Float).into(),
            0,
        ));
        let access = RgAccess::write(RgResourceHandle::default(), GfxResourceState::UnorderedAccess);
        let barrier = RgBarrierResolver::compute_barrier(
            GfxResourceId(9),
            GfxResourceKind::Texture,
            &tracked,
            &access,
            GfxQueueClass::Compute,
            true,
        )
        .unwrap();
        assert_eq!(barrier.kind, GfxBarrierKind::Aliasing);
        assert_eq!(barrier.after, GfxResourceState::UnorderedAccess);
    }

    #[test]
    fn test_states_match_every_access() {
        let mut registry = RgResourceRegistry::new();
        let color = texture(&mut registry, "color", 1, GfxResourceState::Present);
        let depth = registry
            .import_texture(
                "depth",
                GfxResourceId(2),
                RgTextureDesc::new_2d(32, 32, GfxFormat::D32Float),
                GfxResourceState::Undefined,
            )
            .unwrap();
        let staging = registry
            .import_buffer("staging", GfxResourceId(3), RgBufferDesc::new(64), GfxResourceState::Common)
            .unwrap();
        let resolved = resolve(
            &registry,
            vec![
                RgPassDesc::new("upload", GfxQueueClass::Copy).read(staging, GfxResourceState::CopySource),
                RgPassDesc::new("depth", GfxQueueClass::Graphics).write(depth, GfxResourceState::DepthWrite),
                RgPassDesc::new("opaque", GfxQueueClass::Graphics)
                    .read(depth, GfxResourceState::DepthRead)
                    .write(color, GfxResourceState::RenderTarget),
                RgPassDesc::new("post", GfxQueueClass::Compute)
                    .read(color, GfxResourceState::NonPixelShaderResource)
                    .read(depth, GfxResourceState::NonPixelShaderResource),
                RgPassDesc::new("present", GfxQueueClass::Graphics).read(color, GfxResourceState::Present),
            ],
        );

        // 按调度顺序模拟，资源在每次访问时都必须处于声明的状态
        let mut actual: HashMap<RgResourceHandle, GfxResourceState> =
            registry.iter().map(|(h, r)| (h, r.current_state)).collect();
        for pass in &resolved.order {
            let desc = &resolved.passes[pass.index()];
            let barriers = resolved.resolution.pass_barriers(*pass).barriers();
            for access in &desc.accesses {
                let id = registry.get(access.handle).unwrap().physical.unwrap();
                let state = actual.get_mut(&access.handle).unwrap();
                match barriers.iter().find(|b| b.resource == id) {
                    Some(barrier) => {
                        assert!(barrier.kind == GfxBarrierKind::Aliasing || barrier.before == *state);
                        *state = barrier.after;
                    }
                    // 缓冲区隐式提升
                    None if registry.get(access.handle).unwrap().kind() == GfxResourceKind::Buffer
                        && *state == GfxResourceState::Common =>
                    {
                        *state = access.state;
                    }
                    None => {}
                }
                assert_eq!(*state, access.state, "'{}' accesses '{}'", desc.name, registry.name_of(access.handle));
            }
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without physical backing")]
    fn test_access_without_physical_backing_fails_loudly() {
        let mut registry = RgResourceRegistry::new();
        let t = texture(&mut registry, "t", 1, GfxResourceState::Common);
        let passes = vec![RgPassDesc::new("draw", GfxQueueClass::Graphics).write(t, GfxResourceState::RenderTarget)];
        let graph = RgDependencyGraph::build(&passes).unwrap();
        let order = RgScheduler::default().order(&graph, &passes);
        let active = vec![true; passes.len()];
        let aliasing = RgAliasingPlanner::new(false, 1, u64::MAX).plan(&graph, &passes, &order, &active, &registry);

        let _ = RgBarrierResolver::resolve(&passes, &order, &active, &registry, &HashMap::new(), &aliasing);
    }
}
