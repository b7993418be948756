//! 调度
//!
//! 两个阶段：
//! 1. `order`：带优先级的 Kahn 拓扑排序。就绪集合中优先选择与上一个 Pass 同队列的 Pass，
//!    让同一队列的工作尽量连续，之后按 `RgTieBreak` 决定先后。
//! 2. `batch`：把调度顺序中连续的同队列 Pass 合并为 batch。
//!    一个 batch 被其他队列依赖后就封口，跨队列依赖通过 batch 之间的 fence 等待表达。

use std::collections::HashMap;

use ember_gfx::GfxQueueClass;
use itertools::Itertools;

use crate::{
    config::RgTieBreak,
    render_graph::{graph::RgDependencyGraph, pass::RgPassDesc, resource_handle::RgPassId},
};

/// batch 提交前需要等待的另一个 batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgBatchWait {
    pub queue: GfxQueueClass,
    /// 被等待的 batch 在本帧 batch 列表中的下标
    pub batch: usize,
}

/// 一次队列提交
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgBatch {
    pub index: usize,
    pub queue: GfxQueueClass,
    /// 按调度顺序
    pub passes: Vec<RgPassId>,
    /// 本帧内的跨队列等待，每个队列最多一个
    pub waits: Vec<RgBatchWait>,
    /// 需要等待这些队列上之前所有帧的工作完成
    ///
    /// 持久资源在上一帧中最后被其他队列使用时产生。
    pub prior_frame_waits: Vec<GfxQueueClass>,
}

impl RgBatch {
    fn new(index: usize, queue: GfxQueueClass) -> Self {
        Self {
            index,
            queue,
            passes: Vec::new(),
            waits: Vec::new(),
            prior_frame_waits: Vec::new(),
        }
    }

    /// 跨队列等待的总数
    #[inline]
    pub fn wait_count(&self) -> usize {
        self.waits.len() + self.prior_frame_waits.len()
    }
}

/// 调度器
#[derive(Clone, Copy, Debug, Default)]
pub struct RgScheduler {
    tie_break: RgTieBreak,
}

// new & init
impl RgScheduler {
    pub fn new(tie_break: RgTieBreak) -> Self {
        Self { tie_break }
    }
}

// order
impl RgScheduler {
    /// 拓扑排序
    ///
    /// 对同样的输入总是产生同样的顺序。`graph` 必须无环（`RgDependencyGraph::build` 已经保证）。
    pub fn order(&self, graph: &RgDependencyGraph, passes: &[RgPassDesc]) -> Vec<RgPassId> {
        let mut in_degrees = graph.in_degrees();
        let mut ready = in_degrees.iter().positions(|&d| d == 0).map(RgPassId).collect_vec();
        let mut order = Vec::with_capacity(passes.len());
        let mut last_queue: Option<GfxQueueClass> = None;

        while let Some(position) = ready
            .iter()
            .enumerate()
            .min_by_key(|(_, pass)| self.priority(**pass, passes, last_queue))
            .map(|(position, _)| position)
        {
            let pass = ready.swap_remove(position);
            last_queue = Some(passes[pass.0].queue);
            order.push(pass);

            for successor in graph.successors(pass) {
                let degree = &mut in_degrees[successor.0];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(successor);
                }
            }
        }

        debug_assert_eq!(order.len(), passes.len(), "dependency graph must be acyclic");
        order
    }

    /// 越小越优先：(是否切换队列, tie-break, 声明顺序)
    fn priority(&self, pass: RgPassId, passes: &[RgPassDesc], last_queue: Option<GfxQueueClass>) -> (bool, u32, usize) {
        let desc = &passes[pass.0];
        let switches_queue = last_queue.is_some_and(|queue| queue != desc.queue);
        let cost_key = match self.tie_break {
            RgTieBreak::DeclarationOrder => 0,
            RgTieBreak::CostHint => u32::MAX - desc.cost_hint.unwrap_or(0),
        };
        (switches_queue, cost_key, pass.0)
    }
}

// batch
impl RgScheduler {
    /// 按调度顺序把活跃的 Pass 分配到 batch
    ///
    /// - `active[p]` 为 false 的 Pass 不参与，也不产生等待
    /// - `prior_frame_waits`：Pass 需要等待的、上一帧中其他队列的工作
    ///
    /// batch 按创建顺序提交；等待总是指向更早创建的 batch，所以不会互相等待。
    pub fn batch(
        &self,
        graph: &RgDependencyGraph,
        passes: &[RgPassDesc],
        order: &[RgPassId],
        active: &[bool],
        prior_frame_waits: &HashMap<RgPassId, Vec<GfxQueueClass>>,
    ) -> Vec<RgBatch> {
        let mut batches: Vec<RgBatch> = Vec::new();
        let mut batch_of: Vec<Option<usize>> = vec![None; passes.len()];
        let mut sealed: Vec<bool> = Vec::new();
        let mut open: [Option<usize>; GfxQueueClass::COUNT] = [None; GfxQueueClass::COUNT];
        // waited[q][other]: 队列 q 已经等待过的 other 队列上最大的 batch 下标
        let mut waited = [[None::<usize>; GfxQueueClass::COUNT]; GfxQueueClass::COUNT];
        let mut waited_prior = [[false; GfxQueueClass::COUNT]; GfxQueueClass::COUNT];

        for &pass in order.iter().filter(|p| active[p.0]) {
            let queue = passes[pass.0].queue;

            let mut needed: Vec<RgBatchWait> = Vec::new();
            for producer in graph.predecessors(pass) {
                let Some(producer_batch) = batch_of[producer.0] else {
                    continue;
                };
                let producer_queue = batches[producer_batch].queue;
                if producer_queue == queue {
                    continue;
                }
                sealed[producer_batch] = true;
                if waited[queue.index()][producer_queue.index()].is_some_and(|w| w >= producer_batch) {
                    continue;
                }
                match needed.iter_mut().find(|w| w.queue == producer_queue) {
                    Some(wait) => wait.batch = wait.batch.max(producer_batch),
                    None => needed.push(RgBatchWait {
                        queue: producer_queue,
                        batch: producer_batch,
                    }),
                }
            }

            let prior = prior_frame_waits
                .get(&pass)
                .map(|queues| {
                    queues
                        .iter()
                        .copied()
                        .filter(|q| *q != queue && !waited_prior[queue.index()][q.index()])
                        .unique()
                        .collect_vec()
                })
                .unwrap_or_default();

            let target = match open[queue.index()] {
                Some(current) if !sealed[current] && needed.is_empty() && prior.is_empty() => current,
                _ => {
                    let index = batches.len();
                    let mut batch = RgBatch::new(index, queue);
                    batch.waits = needed.iter().copied().sorted_by_key(|w| w.queue).collect_vec();
                    batch.prior_frame_waits = prior.iter().copied().sorted().collect_vec();
                    batches.push(batch);
                    sealed.push(false);
                    open[queue.index()] = Some(index);
                    index
                }
            };

            for wait in &needed {
                let entry = &mut waited[queue.index()][wait.queue.index()];
                *entry = Some(entry.map_or(wait.batch, |w| w.max(wait.batch)));
            }
            for q in &prior {
                waited_prior[queue.index()][q.index()] = true;
            }

            batches[target].passes.push(pass);
            batch_of[pass.0] = Some(target);
        }

        batches
    }
}

#[cfg(test)]
mod tests {
    use ember_gfx::GfxResourceState;
    use slotmap::SlotMap;

    use super::*;
    use crate::render_graph::resource_handle::RgResourceHandle;

    fn handles(count: usize) -> Vec<RgResourceHandle> {
        let mut map = SlotMap::<RgResourceHandle, ()>::with_key();
        (0..count).map(|_| map.insert(())).collect()
    }

    const UAV: GfxResourceState = GfxResourceState::UnorderedAccess;
    const SRV: GfxResourceState = GfxResourceState::PixelShaderResource;
    const RT: GfxResourceState = GfxResourceState::RenderTarget;

    fn schedule(passes: &[RgPassDesc], tie_break: RgTieBreak) -> (RgDependencyGraph, Vec<RgPassId>, Vec<RgBatch>) {
        let graph = RgDependencyGraph::build(passes).unwrap();
        let scheduler = RgScheduler::new(tie_break);
        let order = scheduler.order(&graph, passes);
        let batches = scheduler.batch(&graph, passes, &order, &vec![true; passes.len()], &HashMap::new());
        (graph, order, batches)
    }

    fn names(passes: &[RgPassDesc], order: &[RgPassId]) -> Vec<String> {
        order.iter().map(|p| passes[p.0].name.clone()).collect()
    }

    #[test]
    fn test_order_respects_dependencies() {
        let h = handles(2);
        let passes = vec![
            RgPassDesc::new("late", GfxQueueClass::Graphics).read(h[0], SRV),
            RgPassDesc::new("early", GfxQueueClass::Graphics).write(h[1], RT),
            RgPassDesc::new("producer", GfxQueueClass::Graphics).write(h[0], RT),
        ];
        // late 读取的是帧开始时的内容，所以 producer 必须在 late 之后
        let (graph, order, _) = schedule(&passes, RgTieBreak::DeclarationOrder);
        for (a, b, _) in graph.edges() {
            let pa = order.iter().position(|p| *p == a).unwrap();
            let pb = order.iter().position(|p| *p == b).unwrap();
            assert!(pa < pb);
        }
        assert_eq!(names(&passes, &order), vec!["late", "early", "producer"]);
    }

    #[test]
    fn test_same_queue_is_preferred() {
        let passes = vec![
            RgPassDesc::new("g0", GfxQueueClass::Graphics),
            RgPassDesc::new("c0", GfxQueueClass::Compute),
            RgPassDesc::new("g1", GfxQueueClass::Graphics),
            RgPassDesc::new("c1", GfxQueueClass::Compute),
        ];
        let (_, order, batches) = schedule(&passes, RgTieBreak::DeclarationOrder);
        assert_eq!(names(&passes, &order), vec!["g0", "g1", "c0", "c1"]);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.waits.is_empty()));
    }

    #[test]
    fn test_cost_hint_tie_break() {
        let passes = vec![
            RgPassDesc::new("cheap", GfxQueueClass::Graphics).cost_hint(1),
            RgPassDesc::new("unknown", GfxQueueClass::Graphics),
            RgPassDesc::new("heavy", GfxQueueClass::Graphics).cost_hint(10),
        ];
        let (_, order, _) = schedule(&passes, RgTieBreak::CostHint);
        assert_eq!(names(&passes, &order), vec!["heavy", "cheap", "unknown"]);

        let (_, order, _) = schedule(&passes, RgTieBreak::DeclarationOrder);
        assert_eq!(names(&passes, &order), vec!["cheap", "unknown", "heavy"]);
    }

    #[test]
    fn test_cross_queue_wait_seals_batch() {
        // g0 -> c0 -> g1：g0 所在的 batch 被 compute 依赖后封口，g1 进入新的 batch
        let h = handles(2);
        let passes = vec![
            RgPassDesc::new("g0", GfxQueueClass::Graphics).write(h[0], UAV),
            RgPassDesc::new("c0", GfxQueueClass::Compute).read(h[0], UAV).write(h[1], UAV),
            RgPassDesc::new("g1", GfxQueueClass::Graphics).read(h[1], SRV),
        ];
        let (_, _, batches) = schedule(&passes, RgTieBreak::DeclarationOrder);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].passes, vec![RgPassId(0)]);
        assert_eq!(batches[1].queue, GfxQueueClass::Compute);
        assert_eq!(
            batches[1].waits,
            vec![RgBatchWait {
                queue: GfxQueueClass::Graphics,
                batch: 0
            }]
        );
        assert_eq!(
            batches[2].waits,
            vec![RgBatchWait {
                queue: GfxQueueClass::Compute,
                batch: 1
            }]
        );
    }

    #[test]
    fn test_satisfied_wait_is_not_repeated() {
        // c0、c1 都依赖 g0；c1 可以并入 c0 的 batch
        let h = handles(1);
        let passes = vec![
            RgPassDesc::new("g0", GfxQueueClass::Graphics).write(h[0], UAV),
            RgPassDesc::new("c0", GfxQueueClass::Compute).read(h[0], GfxResourceState::NonPixelShaderResource),
            RgPassDesc::new("c1", GfxQueueClass::Compute).read(h[0], GfxResourceState::NonPixelShaderResource),
        ];
        let (_, _, batches) = schedule(&passes, RgTieBreak::DeclarationOrder);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].passes, vec![RgPassId(1), RgPassId(2)]);
        assert_eq!(batches[1].waits.len(), 1);
    }

    #[test]
    fn test_inactive_passes_are_ignored() {
        let h = handles(1);
        let passes = vec![
            RgPassDesc::new("c0", GfxQueueClass::Compute).write(h[0], UAV),
            RgPassDesc::new("g0", GfxQueueClass::Graphics).read_write(h[0], UAV),
        ];
        let graph = RgDependencyGraph::build(&passes).unwrap();
        let scheduler = RgScheduler::default();
        let order = scheduler.order(&graph, &passes);
        let batches = scheduler.batch(&graph, &passes, &order, &[false, true], &HashMap::new());

        assert_eq!(batches.len(), 1);
        assert!(batches[0].waits.is_empty());
    }

    #[test]
    fn test_prior_frame_wait_starts_new_batch() {
        let passes = vec![RgPassDesc::new("g0", GfxQueueClass::Graphics), RgPassDesc::new("g1", GfxQueueClass::Graphics)];
        let graph = RgDependencyGraph::build(&passes).unwrap();
        let scheduler = RgScheduler::default();
        let order = scheduler.order(&graph, &passes);
        let prior = HashMap::from([(RgPassId(1), vec![GfxQueueClass::Compute])]);
        let batches = scheduler.batch(&graph, &passes, &order, &[true, true], &prior);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].prior_frame_waits, vec![GfxQueueClass::Compute]);
        assert_eq!(batches[1].wait_count(), 1);
    }
}
