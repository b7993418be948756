//! 每帧的统计数据和结果汇总
//!
//! 资源错误和设备错误不会中断实时循环，而是作为帧质量信号交给上层。

use std::fmt;

use ember_gfx::{GfxError, GfxResourceId};

/// 供诊断 UI 显示的每帧统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RgFrameStats {
    pub frame_id: u64,
    /// 声明的 Pass 总数
    pub pass_count: usize,
    pub executed_pass_count: usize,
    pub skipped_pass_count: usize,
    pub failed_pass_count: usize,
    pub batch_count: usize,
    pub barrier_count: usize,
    pub cross_queue_wait_count: usize,
    /// 被放入复用内存区域的 transient 资源大小之和
    pub aliased_memory_bytes: u64,
    /// transient pool 的峰值占用
    pub transient_pool_bytes: u64,
}

impl fmt::Display for RgFrameStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {}: passes {}/{} (skipped {}, failed {}), batches {}, barriers {}, waits {}, aliased {} KiB / pool {} KiB",
            self.frame_id,
            self.executed_pass_count,
            self.pass_count,
            self.skipped_pass_count,
            self.failed_pass_count,
            self.batch_count,
            self.barrier_count,
            self.cross_queue_wait_count,
            self.aliased_memory_bytes / 1024,
            self.transient_pool_bytes / 1024,
        )
    }
}

/// Pass 被跳过的原因
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RgSkipReason {
    /// 引用的资源当前不驻留
    NotResident { resource: String },
    /// transient 资源超出 pool 预算
    AllocationFailed { resource: String },
    /// 依赖的上游 Pass 被跳过
    DependencySkipped { pass: String },
}

impl fmt::Display for RgSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotResident { resource } => write!(f, "resource '{resource}' is not resident"),
            Self::AllocationFailed { resource } => write!(f, "transient '{resource}' could not be allocated"),
            Self::DependencySkipped { pass } => write!(f, "upstream pass '{pass}' was skipped"),
        }
    }
}

/// 单个 Pass 在这一帧的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RgPassOutcome {
    Executed,
    Skipped(RgSkipReason),
    /// 回调返回错误：命令被丢弃，barrier 保留
    Failed(String),
    /// 提交失败，整帧作废
    Dropped,
}

impl RgPassOutcome {
    #[inline]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed)
    }

    #[inline]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

/// 帧质量
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RgFrameQuality {
    /// 所有 Pass 都执行了
    Full,
    /// 部分 Pass 被跳过或失败，其余正常提交
    Degraded,
    /// 设备错误，整帧没有提交
    Dropped,
}

/// `RgFrame::submit` 的结果
#[derive(Clone, Debug)]
pub struct RgFrameReport {
    pub frame_id: u64,
    pub quality: RgFrameQuality,
    pub stats: RgFrameStats,
    /// 按声明顺序
    pub outcomes: Vec<(String, RgPassOutcome)>,
    /// 之前释放的持久资源，其最后使用的帧已经完成，可以销毁
    pub retired_resources: Vec<GfxResourceId>,
    pub device_error: Option<GfxError>,
}

impl RgFrameReport {
    /// 按名字查询 Pass 结果（同名时返回第一个）
    pub fn outcome(&self, pass: &str) -> Option<&RgPassOutcome> {
        self.outcomes.iter().find(|(name, _)| name == pass).map(|(_, outcome)| outcome)
    }

    #[inline]
    pub fn is_dropped(&self) -> bool {
        self.quality == RgFrameQuality::Dropped
    }
}
