//! Transient 资源的内存别名
//!
//! 以调度顺序中的位置为时间轴，计算每个 transient 资源的使用区间 [first, last]，
//! 把区间不重叠的资源放进同一块内存区域。
//!
//! 区间不重叠还不够：另一个队列上的 Pass 可能和新资源的首个使用者并发执行。
//! 所以复用一个区域时，旧资源的每个使用者要么和新资源的首个使用者在同一队列，
//! 要么在依赖图上位于它之前。

use std::collections::HashMap;

use itertools::Itertools;
use slotmap::Key;

use crate::render_graph::{
    graph::RgDependencyGraph, pass::RgPassDesc, resource_handle::RgPassId, resource_handle::RgResourceHandle,
    resource_registry::RgResourceRegistry,
};

/// 资源在本帧中的使用区间
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgTransientInterval {
    pub handle: RgResourceHandle,
    pub size: u64,
    /// 调度顺序中的位置
    pub first: usize,
    pub last: usize,
    pub first_pass: RgPassId,
    pub users: Vec<RgPassId>,
}

impl RgTransientInterval {
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

/// 资源在 transient pool 中的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgPlacement {
    pub region: usize,
    pub offset: u64,
    pub size: u64,
    /// 是否复用了之前资源的内存
    pub aliased: bool,
    /// 放置顺序，用于分配物理 id
    pub ordinal: usize,
}

/// pool 中的一块内存区域
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgMemoryRegion {
    pub offset: u64,
    pub size: u64,
    /// 按放置顺序
    pub occupants: Vec<RgResourceHandle>,
    last_end: usize,
}

/// 别名分配结果
#[derive(Clone, Debug, Default)]
pub struct RgAliasingPlan {
    intervals: HashMap<RgResourceHandle, RgTransientInterval>,
    placements: HashMap<RgResourceHandle, RgPlacement>,
    regions: Vec<RgMemoryRegion>,
    /// 超出预算、没有分配到内存的资源
    failed: Vec<RgResourceHandle>,
    pool_bytes: u64,
    aliased_bytes: u64,
}

// getters
impl RgAliasingPlan {
    #[inline]
    pub fn placement(&self, handle: RgResourceHandle) -> Option<&RgPlacement> {
        self.placements.get(&handle)
    }

    #[inline]
    pub fn interval(&self, handle: RgResourceHandle) -> Option<&RgTransientInterval> {
        self.intervals.get(&handle)
    }

    #[inline]
    pub fn regions(&self) -> &[RgMemoryRegion] {
        &self.regions
    }

    #[inline]
    pub fn failed(&self) -> &[RgResourceHandle] {
        &self.failed
    }

    #[inline]
    pub fn is_failed(&self, handle: RgResourceHandle) -> bool {
        self.failed.contains(&handle)
    }

    /// 复用了其他资源内存的资源
    #[inline]
    pub fn is_aliased(&self, handle: RgResourceHandle) -> bool {
        self.placements.get(&handle).is_some_and(|p| p.aliased)
    }

    /// pool 的总占用
    #[inline]
    pub fn pool_bytes(&self) -> u64 {
        self.pool_bytes
    }

    #[inline]
    pub fn aliased_bytes(&self) -> u64 {
        self.aliased_bytes
    }

    pub fn placements(&self) -> impl Iterator<Item = (RgResourceHandle, &RgPlacement)> {
        self.placements.iter().map(|(h, p)| (*h, p))
    }
}

/// 别名分配器
#[derive(Clone, Copy, Debug)]
pub struct RgAliasingPlanner {
    pub enable_aliasing: bool,
    pub alignment: u64,
    pub budget: u64,
}

impl RgAliasingPlanner {
    pub fn new(enable_aliasing: bool, alignment: u64, budget: u64) -> Self {
        Self {
            enable_aliasing,
            alignment: alignment.max(1),
            budget,
        }
    }

    /// 为 `order` 中活跃 Pass 使用的 transient 资源分配内存
    pub fn plan(
        &self,
        graph: &RgDependencyGraph,
        passes: &[RgPassDesc],
        order: &[RgPassId],
        active: &[bool],
        registry: &RgResourceRegistry,
    ) -> RgAliasingPlan {
        let _span = crate::profiling::rg_span!("RgAliasingPlanner::plan");

        let intervals = Self::collect_intervals(passes, order, active, registry);
        let mut plan = RgAliasingPlan::default();
        let mut pool_end = 0u64;

        let sorted = intervals
            .values()
            .sorted_by_key(|i| (i.first, i.last, i.handle.data().as_ffi()))
            .collect_vec();

        for (ordinal, interval) in sorted.into_iter().enumerate() {
            let aligned = interval.size.next_multiple_of(self.alignment);

            let reuse = if self.enable_aliasing {
                self.find_region(&plan, &intervals, interval, graph, passes)
            } else {
                None
            };

            let placement = match reuse {
                Some(region) => {
                    plan.aliased_bytes += interval.size;
                    RgPlacement {
                        region,
                        offset: plan.regions[region].offset,
                        size: interval.size,
                        aliased: true,
                        ordinal,
                    }
                }
                None => {
                    if pool_end + aligned > self.budget {
                        log::warn!(
                            "transient pool budget exceeded: {} bytes requested at offset {}, budget {}",
                            aligned,
                            pool_end,
                            self.budget
                        );
                        plan.failed.push(interval.handle);
                        continue;
                    }
                    plan.regions.push(RgMemoryRegion {
                        offset: pool_end,
                        size: aligned,
                        occupants: Vec::new(),
                        last_end: 0,
                    });
                    pool_end += aligned;
                    RgPlacement {
                        region: plan.regions.len() - 1,
                        offset: pool_end - aligned,
                        size: interval.size,
                        aliased: false,
                        ordinal,
                    }
                }
            };

            let region = &mut plan.regions[placement.region];
            region.occupants.push(interval.handle);
            region.last_end = interval.last;
            plan.placements.insert(interval.handle, placement);
        }

        plan.pool_bytes = pool_end;
        plan.intervals = intervals;
        plan
    }

    /// 遍历调度顺序，收集活跃 Pass 对 transient 资源的使用区间
    fn collect_intervals(
        passes: &[RgPassDesc],
        order: &[RgPassId],
        active: &[bool],
        registry: &RgResourceRegistry,
    ) -> HashMap<RgResourceHandle, RgTransientInterval> {
        let mut intervals: HashMap<RgResourceHandle, RgTransientInterval> = HashMap::new();
        for (position, &pass) in order.iter().enumerate().filter(|(_, p)| active[p.0]) {
            for access in &passes[pass.0].accesses {
                let Some(resource) = registry.get(access.handle).filter(|r| r.is_transient()) else {
                    continue;
                };
                let interval = intervals.entry(access.handle).or_insert_with(|| RgTransientInterval {
                    handle: access.handle,
                    size: resource.desc.size_bytes(),
                    first: position,
                    last: position,
                    first_pass: pass,
                    users: Vec::new(),
                });
                interval.last = position;
                interval.users.push(pass);
            }
        }
        intervals
    }

    /// best-fit：在可以复用的区域中选择最小的一个
    fn find_region(
        &self,
        plan: &RgAliasingPlan,
        intervals: &HashMap<RgResourceHandle, RgTransientInterval>,
        interval: &RgTransientInterval,
        graph: &RgDependencyGraph,
        passes: &[RgPassDesc],
    ) -> Option<usize> {
        let queue = passes[interval.first_pass.0].queue;
        plan.regions
            .iter()
            .enumerate()
            .filter(|(_, region)| region.size >= interval.size && region.last_end < interval.first)
            .filter(|(_, region)| {
                let Some(previous) = region.occupants.last().and_then(|h| intervals.get(h)) else {
                    return false;
                };
                previous
                    .users
                    .iter()
                    .all(|user| passes[user.0].queue == queue || graph.has_path(*user, interval.first_pass))
            })
            .min_by_key(|(index, region)| (region.size, *index))
            .map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use ember_gfx::{GfxQueueClass, GfxResourceState};

    use super::*;
    use crate::render_graph::{resource::RgBufferDesc, scheduler::RgScheduler};

    const UAV: GfxResourceState = GfxResourceState::UnorderedAccess;
    const SRV: GfxResourceState = GfxResourceState::NonPixelShaderResource;
    const KIB: u64 = 1024;

    struct Fixture {
        registry: RgResourceRegistry,
        passes: Vec<RgPassDesc>,
    }

    impl Fixture {
        fn plan(&self, planner: RgAliasingPlanner) -> RgAliasingPlan {
            let graph = RgDependencyGraph::build(&self.passes).unwrap();
            let order = RgScheduler::default().order(&graph, &self.passes);
            planner.plan(&graph, &self.passes, &order, &vec![true; self.passes.len()], &self.registry)
        }

        fn plan_in_order(&self, planner: RgAliasingPlanner, order: &[RgPassId]) -> RgAliasingPlan {
            let graph = RgDependencyGraph::build(&self.passes).unwrap();
            planner.plan(&graph, &self.passes, order, &vec![true; self.passes.len()], &self.registry)
        }
    }

    /// a 写 t0，b 读 t0 写 t1，c 读 t1 写 t2：t0 和 t2 的区间不重叠
    fn chain(queue_of_c: GfxQueueClass) -> (Fixture, Vec<RgResourceHandle>) {
        let mut registry = RgResourceRegistry::new();
        let t = (0..3)
            .map(|i| registry.create_transient(format!("t{i}"), RgBufferDesc::new(4 * KIB).into(), 0).unwrap())
            .collect_vec();
        let passes = vec![
            RgPassDesc::new("a", GfxQueueClass::Compute).write(t[0], UAV),
            RgPassDesc::new("b", GfxQueueClass::Compute).read(t[0], SRV).write(t[1], UAV),
            RgPassDesc::new("c", queue_of_c).read(t[1], SRV).write(t[2], UAV),
        ];
        (Fixture { registry, passes }, t)
    }

    #[test]
    fn test_disjoint_lifetimes_share_memory() {
        let (fixture, t) = chain(GfxQueueClass::Compute);
        let plan = fixture.plan(RgAliasingPlanner::new(true, KIB, 64 * KIB));

        assert_eq!(plan.placement(t[2]).unwrap().region, plan.placement(t[0]).unwrap().region);
        assert!(plan.is_aliased(t[2]));
        assert_eq!(plan.pool_bytes(), 8 * KIB);
        assert_eq!(plan.aliased_bytes(), 4 * KIB);
    }

    #[test]
    fn test_overlapping_placements_never_overlap_in_time() {
        let (fixture, t) = chain(GfxQueueClass::Compute);
        let plan = fixture.plan(RgAliasingPlanner::new(true, KIB, 64 * KIB));
        for (a, b) in t.iter().tuple_combinations() {
            let (pa, pb) = (plan.placement(*a).unwrap(), plan.placement(*b).unwrap());
            let memory_overlap = pa.offset < pb.offset + pb.size && pb.offset < pa.offset + pa.size;
            if memory_overlap {
                assert!(!plan.interval(*a).unwrap().overlaps(plan.interval(*b).unwrap()));
            }
        }
    }

    #[test]
    fn test_disabled_aliasing() {
        let (fixture, t) = chain(GfxQueueClass::Compute);
        let plan = fixture.plan(RgAliasingPlanner::new(false, KIB, 64 * KIB));
        assert_eq!(plan.regions().len(), 3);
        assert!(!plan.is_aliased(t[2]));
        assert_eq!(plan.aliased_bytes(), 0);
    }

    #[test]
    fn test_budget_exceeded() {
        let (fixture, t) = chain(GfxQueueClass::Compute);
        let plan = fixture.plan(RgAliasingPlanner::new(false, KIB, 8 * KIB));
        assert_eq!(plan.failed(), &[t[2]]);
        assert!(plan.placement(t[2]).is_none());
    }

    #[test]
    fn test_alignment() {
        let mut registry = RgResourceRegistry::new();
        let a = registry.create_transient("a", RgBufferDesc::new(100).into(), 0).unwrap();
        let b = registry.create_transient("b", RgBufferDesc::new(100).into(), 0).unwrap();
        let passes = vec![RgPassDesc::new("p", GfxQueueClass::Compute).write(a, UAV).write(b, UAV)];
        let plan = Fixture { registry, passes }.plan(RgAliasingPlanner::new(true, 256, KIB));

        let offsets = [plan.placement(a).unwrap().offset, plan.placement(b).unwrap().offset];
        assert!(offsets.iter().all(|o| o % 256 == 0));
        assert_eq!(plan.pool_bytes(), 512);
    }

    #[test]
    fn test_unordered_cross_queue_users_block_reuse() {
        // d 在 graphics 队列上读取 t0，和 c 之间没有依赖：即使调度顺序中 d 在 c 之前，t2 也不能复用 t0 的内存
        let (mut fixture, t) = chain(GfxQueueClass::Compute);
        fixture.passes.push(RgPassDesc::new("d", GfxQueueClass::Graphics).read(t[0], GfxResourceState::PixelShaderResource));
        let order = [RgPassId(0), RgPassId(1), RgPassId(3), RgPassId(2)];
        let plan = fixture.plan_in_order(RgAliasingPlanner::new(true, KIB, 64 * KIB), &order);
        assert!(!plan.is_aliased(t[2]));

        // 同一队列上的使用者按提交顺序执行，可以复用
        fixture.passes[3] = RgPassDesc::new("d", GfxQueueClass::Compute).read(t[0], SRV);
        let plan = fixture.plan_in_order(RgAliasingPlanner::new(true, KIB, 64 * KIB), &order);
        assert!(plan.is_aliased(t[2]));
    }
}
