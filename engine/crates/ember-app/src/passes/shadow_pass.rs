use ember_gfx::{GfxQueueClass, GfxResourceState};
use ember_render_graph::{RgDeclareError, RgExecuteError, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

/// 深度 Pass：同时渲染阴影图集和场景深度
pub struct ShadowPass {
    /// 上一帧上传的实例数据
    pub instances: RgResourceHandle,
    pub shadow_atlas: RgResourceHandle,
    pub scene_depth: RgResourceHandle,

    pub instance_count: u32,
}

impl RgPass for ShadowPass {
    fn name(&self) -> &str {
        "shadow"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Graphics
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.instances, GfxResourceState::VertexBuffer);
        builder.write(self.shadow_atlas, GfxResourceState::DepthWrite);
        builder.write(self.scene_depth, GfxResourceState::DepthWrite);
        builder.cost_hint(8);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        let shadow_atlas = ctx.physical(self.shadow_atlas)?;
        let scene_depth = ctx.physical(self.scene_depth)?;

        let cmd = ctx.cmd();
        cmd.clear_depth(shadow_atlas, 1.0);
        cmd.draw_indexed(36, self.instance_count);
        cmd.clear_depth(scene_depth, 1.0);
        cmd.draw_indexed(36, self.instance_count);
        Ok(())
    }
}
