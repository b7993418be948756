//! UI 叠加层
//!
//! `UiOverlayPass` 把 UI 绘制到 transient 纹理，`UiCompositePass` 把它混合到 backbuffer，
//! 最后 `PresentPass` 把 backbuffer 转换到 `Present`。

use ember_gfx::{GfxQueueClass, GfxResourceState};
use ember_render_graph::{RgDeclareError, RgExecuteError, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

pub struct UiOverlayPass {
    pub overlay: RgResourceHandle,
    /// 本帧的 UI draw call 数
    pub draw_count: u32,
}

impl RgPass for UiOverlayPass {
    fn name(&self) -> &str {
        "ui_overlay"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Graphics
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.write(self.overlay, GfxResourceState::RenderTarget);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        let overlay = ctx.physical(self.overlay)?;
        let cmd = ctx.cmd();
        cmd.clear_color(overlay, [0.0; 4]);
        for _ in 0..self.draw_count {
            cmd.draw_indexed(6, 1);
        }
        Ok(())
    }
}

pub struct UiCompositePass {
    pub overlay: RgResourceHandle,
    pub backbuffer: RgResourceHandle,
}

impl RgPass for UiCompositePass {
    fn name(&self) -> &str {
        "ui_composite"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Graphics
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.overlay, GfxResourceState::PixelShaderResource);
        builder.read_write(self.backbuffer, GfxResourceState::RenderTarget);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        ctx.cmd().draw(3, 1);
        Ok(())
    }
}

/// 只做状态转换，没有任何命令
pub struct PresentPass {
    pub backbuffer: RgResourceHandle,
}

impl RgPass for PresentPass {
    fn name(&self) -> &str {
        "present"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Graphics
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.backbuffer, GfxResourceState::Present);
        Ok(())
    }

    fn execute(&self, _ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        Ok(())
    }
}
