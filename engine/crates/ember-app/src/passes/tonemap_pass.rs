use ember_gfx::{GfxQueueClass, GfxResourceState};
use ember_render_graph::{RgDeclareError, RgExecuteError, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

/// HDR + bloom 合成，色调映射后写入 backbuffer
pub struct TonemapPass {
    pub hdr_color: RgResourceHandle,
    pub bloom: RgResourceHandle,
    pub backbuffer: RgResourceHandle,
}

impl RgPass for TonemapPass {
    fn name(&self) -> &str {
        "tonemap"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Graphics
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.hdr_color, GfxResourceState::PixelShaderResource);
        builder.read(self.bloom, GfxResourceState::PixelShaderResource);
        builder.write(self.backbuffer, GfxResourceState::RenderTarget);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        ctx.cmd().draw(3, 1);
        Ok(())
    }
}
