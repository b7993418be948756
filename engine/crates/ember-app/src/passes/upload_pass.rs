use ember_gfx::{GfxQueueClass, GfxResourceState};
use ember_render_graph::{RgDeclareError, RgExecuteError, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

/// 在 copy 队列上把 staging 数据拷贝到实例缓冲
///
/// 实例缓冲是双缓冲的：本帧上传的数据由下一帧的 `ShadowPass` 读取。
pub struct UploadPass {
    pub staging: RgResourceHandle,
    pub instances: RgResourceHandle,
    pub size: u64,
}

impl RgPass for UploadPass {
    fn name(&self) -> &str {
        "upload_instances"
    }

    fn queue(&self) -> GfxQueueClass {
        GfxQueueClass::Copy
    }

    fn setup(&mut self, builder: &mut RgPassBuilder<'_>) -> Result<(), RgDeclareError> {
        builder.read(self.staging, GfxResourceState::CopySource);
        builder.write(self.instances, GfxResourceState::CopyDest);
        builder.cost_hint(1);
        Ok(())
    }

    fn execute(&self, ctx: &mut RgPassContext<'_>) -> Result<(), RgExecuteError> {
        let src = ctx.physical(self.staging)?;
        let dst = ctx.physical(self.instances)?;
        ctx.cmd().copy_buffer(src, dst, self.size);
        Ok(())
    }
}
