//! Bloom 后处理 Pass
//!
//! 在 compute 队列上从 HDR 颜色中提取高亮并模糊，结果写入 transient 纹理。

use ember_gfx::{GfxQueueClass, GfxResourceState};
use ember_render_graph::{RgDeclareError, RgExecuteError, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

pub struct BloomPass {
    /// 输入图像（光照结果）
    pub input: RgResourceHandle,
    /// 输出图像（transient）
    pub output: RgResourceHandle,

    pub extent: (u32, u32),
    /// 降采样级数
    pub mip_count: u32,
}

impl RgPass for BloomPass {
    fn name(&self) -> &str {
        "bloom"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Compute
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.input, GfxResourceState::NonPixelShaderResource);
        builder.write(self.output, GfxResourceState::UnorderedAccess);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        let (mut width, mut height) = self.extent;
        let cmd = ctx.cmd();
        // threshold + 逐级降采样
        for _ in 0..self.mip_count.max(1) {
            cmd.dispatch(width.div_ceil(8), height.div_ceil(8), 1);
            width = (width / 2).max(1);
            height = (height / 2).max(1);
        }
        // 逐级升采样并混合
        for _ in 1..self.mip_count {
            width *= 2;
            height *= 2;
            cmd.dispatch(width.div_ceil(8), height.div_ceil(8), 1);
        }
        Ok(())
    }
}
