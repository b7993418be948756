use ember_gfx::{GfxQueueClass, GfxResourceState};
use ember_render_graph::{RgDeclareError, RgExecuteError, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

/// 延迟光照
///
/// 读取阴影、SSAO 和材质图集，写入 HDR 颜色。
/// 材质图集是流式加载的，未驻留时本 Pass 及其下游会被跳过。
pub struct LightingPass {
    pub shadow_atlas: RgResourceHandle,
    pub ssao: RgResourceHandle,
    pub material_atlas: RgResourceHandle,
    pub hdr_color: RgResourceHandle,
}

impl RgPass for LightingPass {
    fn name(&self) -> &str {
        "lighting"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Graphics
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.shadow_atlas, GfxResourceState::PixelShaderResource);
        builder.read(self.ssao, GfxResourceState::PixelShaderResource);
        builder.read(self.material_atlas, GfxResourceState::PixelShaderResource);
        builder.write(self.hdr_color, GfxResourceState::RenderTarget);
        builder.cost_hint(6);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        let hdr_color = ctx.physical(self.hdr_color)?;
        let cmd = ctx.cmd();
        cmd.clear_color(hdr_color, [0.0, 0.0, 0.0, 1.0]);
        // 全屏三角形
        cmd.draw(3, 1);
        Ok(())
    }
}
