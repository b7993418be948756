use itertools::Itertools;

use crate::{commands::barrier::GfxBarrier, resource::GfxResourceId};

/// 类型化的 GPU 命令
///
/// 不直接持有 vk handle，设备层负责翻译。
#[derive(Clone, Debug, PartialEq)]
pub enum GfxCommand {
    Barrier(Vec<GfxBarrier>),
    BeginLabel(String),
    EndLabel,
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: GfxResourceId,
        dst: GfxResourceId,
        size: u64,
    },
    CopyTexture {
        src: GfxResourceId,
        dst: GfxResourceId,
    },
    ClearColor {
        target: GfxResourceId,
        color: [f32; 4],
    },
    ClearDepth {
        target: GfxResourceId,
        depth: f32,
    },
}

/// 一段可以独立录制的命令序列
///
/// 多个 Pass 可以在不同线程中各自录制一个 `GfxCommandList`，
/// 之后按照调度顺序拼接到同一个 `GfxCommandBuffer` 中。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GfxCommandList {
    commands: Vec<GfxCommand>,
}

// new & init
impl GfxCommandList {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

// getters
impl GfxCommandList {
    #[inline]
    pub fn commands(&self) -> &[GfxCommand] {
        &self.commands
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// 所有 barrier 命令中的 barrier 总数
    pub fn barrier_count(&self) -> usize {
        self.barriers().count()
    }

    pub fn barriers(&self) -> impl Iterator<Item = &GfxBarrier> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                GfxCommand::Barrier(barriers) => Some(barriers.iter()),
                _ => None,
            })
            .flatten()
    }

    /// 所有 debug label，按录制顺序
    pub fn labels(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|cmd| match cmd {
                GfxCommand::BeginLabel(label) => Some(label.as_str()),
                _ => None,
            })
            .collect_vec()
    }
}

// 录制
impl GfxCommandList {
    /// 空的 barrier 列表不会产生命令
    pub fn barrier(&mut self, barriers: Vec<GfxBarrier>) -> &mut Self {
        if !barriers.is_empty() {
            self.commands.push(GfxCommand::Barrier(barriers));
        }
        self
    }

    pub fn begin_label(&mut self, label: impl Into<String>) -> &mut Self {
        self.commands.push(GfxCommand::BeginLabel(label.into()));
        self
    }

    pub fn end_label(&mut self) -> &mut Self {
        self.commands.push(GfxCommand::EndLabel);
        self
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> &mut Self {
        self.commands.push(GfxCommand::Draw {
            vertex_count,
            instance_count,
        });
        self
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> &mut Self {
        self.commands.push(GfxCommand::DrawIndexed {
            index_count,
            instance_count,
        });
        self
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> &mut Self {
        self.commands.push(GfxCommand::Dispatch { x, y, z });
        self
    }

    pub fn copy_buffer(&mut self, src: GfxResourceId, dst: GfxResourceId, size: u64) -> &mut Self {
        self.commands.push(GfxCommand::CopyBuffer { src, dst, size });
        self
    }

    pub fn copy_texture(&mut self, src: GfxResourceId, dst: GfxResourceId) -> &mut Self {
        self.commands.push(GfxCommand::CopyTexture { src, dst });
        self
    }

    pub fn clear_color(&mut self, target: GfxResourceId, color: [f32; 4]) -> &mut Self {
        self.commands.push(GfxCommand::ClearColor { target, color });
        self
    }

    pub fn clear_depth(&mut self, target: GfxResourceId, depth: f32) -> &mut Self {
        self.commands.push(GfxCommand::ClearDepth { target, depth });
        self
    }

    /// 把另一段命令追加到末尾
    pub fn append(&mut self, mut other: GfxCommandList) -> &mut Self {
        self.commands.append(&mut other.commands);
        self
    }
}
