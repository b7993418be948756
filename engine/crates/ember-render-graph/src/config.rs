use std::time::Duration;

use serde::Deserialize;

use crate::error::RgConfigError;

/// 同优先级 Pass 之间的排序策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RgTieBreak {
    /// 按声明顺序
    #[default]
    DeclarationOrder,
    /// cost hint 大的先执行，相同时按声明顺序
    CostHint,
}

/// RenderGraph 的启动配置
///
/// 由上层在启动时提供，RenderGraph 不负责持久化。
///
/// ```toml
/// frames_in_flight = 2
/// transient_pool_budget = 268435456
/// tie_break = "cost_hint"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RgConfig {
    pub frames_in_flight: usize,
    /// 每个 frame slot 的 transient 内存上限（字节）
    pub transient_pool_budget: u64,
    pub placement_alignment: u64,
    pub enable_aliasing: bool,
    /// 使用 rayon 并行录制
    pub parallel_recording: bool,
    pub tie_break: RgTieBreak,
    pub fence_timeout_ms: u64,
    /// 每帧打印执行计划
    pub dump_execution_plan: bool,
}

impl Default for RgConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            transient_pool_budget: 512 * 1024 * 1024,
            placement_alignment: 64 * 1024,
            enable_aliasing: true,
            parallel_recording: true,
            tie_break: RgTieBreak::DeclarationOrder,
            fence_timeout_ms: 5000,
            dump_execution_plan: false,
        }
    }
}

// new & init
impl RgConfig {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

    pub fn from_toml_str(text: &str) -> Result<Self, RgConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RgConfigError> {
        if !(1..=Self::MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(RgConfigError::FramesInFlight {
                value: self.frames_in_flight,
                max: Self::MAX_FRAMES_IN_FLIGHT,
            });
        }
        if !self.placement_alignment.is_power_of_two() {
            return Err(RgConfigError::PlacementAlignment(self.placement_alignment));
        }
        Ok(())
    }
}

// getters
impl RgConfig {
    #[inline]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }
}
