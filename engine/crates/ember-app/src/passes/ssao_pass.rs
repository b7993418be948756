use ember_gfx::{GfxQueueClass, GfxResourceState};
use ember_render_graph::{RgDeclareError, RgExecuteError, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

/// 屏幕空间环境光遮蔽，运行在 compute 队列
pub struct SsaoPass {
    pub scene_depth: RgResourceHandle,
    /// transient，由帧内创建
    pub ssao: RgResourceHandle,

    pub extent: (u32, u32),
}

impl RgPass for SsaoPass {
    fn name(&self) -> &str {
        "ssao"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Compute
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.scene_depth, GfxResourceState::NonPixelShaderResource);
        builder.write(self.ssao, GfxResourceState::UnorderedAccess);
        builder.cost_hint(4);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        let (width, height) = self.extent;
        ctx.cmd().dispatch(width.div_ceil(8), height.div_ceil(8), 1);
        Ok(())
    }
}
