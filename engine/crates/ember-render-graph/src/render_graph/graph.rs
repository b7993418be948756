//! 依赖图构建
//!
//! 分析 Pass 之间的资源依赖关系，构建 DAG 并检测环。
//!
//! 对每个资源，按声明顺序遍历访问它的 Pass：
//! - 写后读（RAW）：reader 依赖最近的 writer
//! - 写后写（WAW）：后一个 writer 依赖前一个 writer
//! - 读后写（WAR）：writer 依赖上一个版本的所有 reader
//! - 同一版本的多个 reader：同一队列、同一状态时没有依赖，可以并行；
//!   队列或状态不同时必须串行，保证状态转换不会和另一个队列上的读取并发
//!
//! 指定版本的读取（`read_version`）直接连接到产生该版本的 writer，可以引用后声明的 Pass；
//! `after(name)` 添加显式依赖。这两种方式可能形成环，环是构建错误。
//!
//! reader 之间的边在其他边全部加入之后再添加：默认按声明顺序，
//! 如果已经存在反方向的路径则不再加边，因此不会引入新的环。

use std::collections::HashMap;

use ember_gfx::{GfxQueueClass, GfxResourceState};
use itertools::Itertools;
use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};

use crate::{
    error::RgGraphError,
    render_graph::{
        pass::RgPassDesc,
        resource_handle::{RgPassId, RgResourceHandle},
    },
};

/// 依赖的来源
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgDependencyKind {
    ReadAfterWrite,
    WriteAfterWrite,
    WriteAfterRead,
    /// 同一版本的两个 reader 位于不同队列或需要不同状态
    ReadAfterRead,
    /// 由 `after(name)` 声明
    Explicit,
}

impl RgDependencyKind {
    /// 后继是否消费前驱的输出
    ///
    /// 资源失败只沿着携带数据的边传播。
    #[inline]
    pub fn carries_data(self) -> bool {
        matches!(self, Self::ReadAfterWrite | Self::Explicit)
    }
}

/// 依赖边：从 producer 到 consumer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgDependency {
    pub kind: RgDependencyKind,
    /// 产生依赖的资源，显式依赖为 `None`
    pub resource: Option<RgResourceHandle>,
}

/// 依赖图
///
/// 节点下标与 `RgPassId` 一一对应。
#[derive(Debug)]
pub struct RgDependencyGraph {
    graph: DiGraph<RgPassId, RgDependency>,
}

/// 单个资源在遍历过程中的状态
#[derive(Default)]
struct RgResourceCursor {
    last_writer: Option<usize>,
    /// 已经遇到的 writer 数量，即当前版本号
    version: u32,
    readers_since_write: Vec<usize>,
}

/// 读取同一版本的 reader
type RgVersionReaders = Vec<(usize, GfxQueueClass, GfxResourceState)>;

// build
impl RgDependencyGraph {
    /// 从声明顺序排列的 Pass 构建依赖图
    ///
    /// # 返回
    /// - `Err(Cycle)`: 参与环的 Pass 名称（按声明顺序），同样的输入总是报告同一个环
    pub fn build(passes: &[RgPassDesc]) -> Result<Self, RgGraphError> {
        Self::build_named(passes, |handle| format!("{handle:?}"))
    }

    /// 同 `build`，错误信息中使用 `resource_name` 给出的资源名称
    pub fn build_named(
        passes: &[RgPassDesc],
        resource_name: impl Fn(RgResourceHandle) -> String,
    ) -> Result<Self, RgGraphError> {
        let mut graph = DiGraph::with_capacity(passes.len(), passes.len() * 2);
        for index in 0..passes.len() {
            graph.add_node(RgPassId(index));
        }
        let mut this = Self { graph };

        // 每个资源的所有 writer，按声明顺序；第 N 个 writer 产生版本 N
        let mut writers: HashMap<RgResourceHandle, Vec<usize>> = HashMap::new();
        for (index, pass) in passes.iter().enumerate() {
            for access in pass.accesses.iter().filter(|a| a.kind.writes()) {
                writers.entry(access.handle).or_default().push(index);
            }
        }

        let mut cursors: HashMap<RgResourceHandle, RgResourceCursor> = HashMap::new();
        let mut readers: HashMap<(RgResourceHandle, u32), RgVersionReaders> = HashMap::new();
        // 需要串行的 reader 对，(先声明, 后声明, 资源)
        let mut reader_pairs: Vec<(usize, usize, RgResourceHandle)> = Vec::new();
        for (index, pass) in passes.iter().enumerate() {
            for access in &pass.accesses {
                let resource = Some(access.handle);

                let read_version = if let Some(version) = access.version {
                    let versions = writers.get(&access.handle).map(Vec::as_slice).unwrap_or_default();
                    if version > 0 {
                        let producer = versions.get(version as usize - 1).copied().ok_or_else(|| {
                            RgGraphError::MissingVersion {
                                pass: pass.name.clone(),
                                resource: resource_name(access.handle),
                                version,
                                available: versions.len() as u32,
                            }
                        })?;
                        this.add_dependency(producer, index, RgDependencyKind::ReadAfterWrite, resource);
                    }
                    // 下一个版本的 writer 必须等这次读取结束
                    if let Some(&next_writer) = versions.get(version as usize) {
                        this.add_dependency(index, next_writer, RgDependencyKind::WriteAfterRead, resource);
                    }
                    Some(version)
                } else {
                    let cursor = cursors.entry(access.handle).or_default();
                    if access.kind.reads() {
                        if let Some(writer) = cursor.last_writer {
                            this.add_dependency(writer, index, RgDependencyKind::ReadAfterWrite, resource);
                        }
                    }
                    if access.kind.writes() {
                        if let Some(writer) = cursor.last_writer {
                            this.add_dependency(writer, index, RgDependencyKind::WriteAfterWrite, resource);
                        }
                        for &reader in &cursor.readers_since_write {
                            this.add_dependency(reader, index, RgDependencyKind::WriteAfterRead, resource);
                        }
                        cursor.last_writer = Some(index);
                        cursor.version += 1;
                        cursor.readers_since_write.clear();
                        None
                    } else {
                        cursor.readers_since_write.push(index);
                        Some(cursor.version)
                    }
                };

                let Some(version) = read_version else {
                    continue;
                };
                let version_readers = readers.entry((access.handle, version)).or_default();
                for &(reader, queue, state) in version_readers.iter() {
                    if reader != index && (queue != pass.queue || state != access.state) {
                        reader_pairs.push((reader.min(index), reader.max(index), access.handle));
                    }
                }
                version_readers.push((index, pass.queue, access.state));
            }
        }

        // 显式依赖：同名 Pass 取第一个声明的
        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for (index, pass) in passes.iter().enumerate() {
            by_name.entry(pass.name.as_str()).or_insert(index);
        }
        for (index, pass) in passes.iter().enumerate() {
            for dependency in &pass.after {
                let producer = *by_name.get(dependency.as_str()).ok_or_else(|| RgGraphError::UnknownDependency {
                    pass: pass.name.clone(),
                    dependency: dependency.clone(),
                })?;
                if producer == index {
                    // 自依赖直接形成环
                    this.graph.update_edge(
                        NodeIndex::new(index),
                        NodeIndex::new(index),
                        RgDependency {
                            kind: RgDependencyKind::Explicit,
                            resource: None,
                        },
                    );
                } else {
                    this.add_dependency(producer, index, RgDependencyKind::Explicit, None);
                }
            }
        }

        reader_pairs.sort_unstable();
        reader_pairs.dedup_by_key(|(a, b, _)| (*a, *b));
        for (first, second, handle) in reader_pairs {
            if !this.has_path(RgPassId(second), RgPassId(first)) {
                this.add_dependency(first, second, RgDependencyKind::ReadAfterRead, Some(handle));
            }
        }

        if let Some(cycle) = this.find_cycle() {
            let passes = cycle.iter().map(|p| passes[p.index()].name.clone()).collect_vec();
            log::error!("render graph cycle detected: [{}]", passes.join(", "));
            return Err(RgGraphError::Cycle { passes });
        }

        Ok(this)
    }

    /// 添加依赖边，同一对 Pass 之间只保留一条边，携带数据的依赖优先
    fn add_dependency(
        &mut self,
        producer: usize,
        consumer: usize,
        kind: RgDependencyKind,
        resource: Option<RgResourceHandle>,
    ) {
        if producer == consumer {
            return;
        }
        let (a, b) = (NodeIndex::new(producer), NodeIndex::new(consumer));
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                if let Some(existing) = self.graph.edge_weight_mut(edge) {
                    if kind.carries_data() && !existing.kind.carries_data() {
                        *existing = RgDependency { kind, resource };
                    }
                }
            }
            None => {
                self.graph.add_edge(a, b, RgDependency { kind, resource });
            }
        }
    }

    /// 找到包含最小 Pass 编号的强连通分量
    fn find_cycle(&self) -> Option<Vec<RgPassId>> {
        petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
            .map(|scc| scc.into_iter().map(|n| RgPassId(n.index())).sorted().collect_vec())
            .min_by_key(|scc| scc[0])
    }
}

// getters
impl RgDependencyGraph {
    #[inline]
    pub fn pass_count(&self) -> usize {
        self.graph.node_count()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// 所有边，按 (producer, consumer) 排序
    pub fn edges(&self) -> Vec<(RgPassId, RgPassId, RgDependency)> {
        self.graph
            .edge_references()
            .map(|e| (RgPassId(e.source().index()), RgPassId(e.target().index()), *e.weight()))
            .sorted_by_key(|(a, b, _)| (*a, *b))
            .collect_vec()
    }

    pub fn dependency(&self, producer: RgPassId, consumer: RgPassId) -> Option<RgDependency> {
        self.graph
            .find_edge(NodeIndex::new(producer.0), NodeIndex::new(consumer.0))
            .and_then(|e| self.graph.edge_weight(e))
            .copied()
    }

    /// 直接依赖（前驱），按编号排序
    pub fn predecessors(&self, pass: RgPassId) -> Vec<RgPassId> {
        self.neighbors(pass, Direction::Incoming)
    }

    /// 直接后继，按编号排序
    pub fn successors(&self, pass: RgPassId) -> Vec<RgPassId> {
        self.neighbors(pass, Direction::Outgoing)
    }

    /// 消费该 Pass 输出的前驱
    pub fn data_predecessors(&self, pass: RgPassId) -> Vec<RgPassId> {
        self.graph
            .edges_directed(NodeIndex::new(pass.0), Direction::Incoming)
            .filter(|e| e.weight().kind.carries_data())
            .map(|e| RgPassId(e.source().index()))
            .sorted()
            .dedup()
            .collect_vec()
    }

    pub fn in_degrees(&self) -> Vec<usize> {
        self.graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect_vec()
    }

    /// `from` 是否（传递地）在 `to` 之前
    pub fn has_path(&self, from: RgPassId, to: RgPassId) -> bool {
        from == to || petgraph::algo::has_path_connecting(&self.graph, NodeIndex::new(from.0), NodeIndex::new(to.0), None)
    }

    fn neighbors(&self, pass: RgPassId, direction: Direction) -> Vec<RgPassId> {
        self.graph
            .neighbors_directed(NodeIndex::new(pass.0), direction)
            .map(|n| RgPassId(n.index()))
            .sorted()
            .dedup()
            .collect_vec()
    }
}
