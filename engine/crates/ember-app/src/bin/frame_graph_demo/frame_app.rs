use std::{sync::Arc, time::Duration};

use anyhow::Context;
use ember_app::{
    passes::{
        BloomPass, LightingPass, PresentPass, ShadowPass, SsaoPass, TonemapPass, UiCompositePass, UiOverlayPass,
        UploadPass,
    },
    streaming::{ResidencyStreamer, StreamRequest},
};
use ember_gfx::{GfxFormat, GfxResourceId, GfxResourceState, HeadlessDevice};
use ember_render_graph::{
    RgBufferDesc, RgConfig, RgDeclareError, RgFrameReport, RgRenderer, RgResourceHandle, RgTextureDesc,
};

const INSTANCE_COUNT: u32 = 256;
const INSTANCE_BYTES: u64 = INSTANCE_COUNT as u64 * 64;

/// 跨帧存在的场景资源
#[derive(Clone, Copy)]
struct SceneResources {
    /// 双缓冲：本帧上传到其中一个，读取另一个
    instances: [RgResourceHandle; 2],
    staging: RgResourceHandle,
    shadow_atlas: RgResourceHandle,
    scene_depth: RgResourceHandle,
    material_atlas: RgResourceHandle,
    hdr_color: RgResourceHandle,
    backbuffer: RgResourceHandle,
}

/// headless 的帧循环
///
/// 每帧由三个 producer 线程并发声明 Pass：场景链（shadow → ssao → lighting → bloom → tonemap）、
/// copy 队列上传以及 UI 叠加层；汇合之后主线程声明 UI 合成和 present。
pub struct FrameApp {
    device: Arc<HeadlessDevice>,
    renderer: RgRenderer,
    streamer: ResidencyStreamer,

    scene: SceneResources,
    extent: (u32, u32),
    next_physical_id: u64,
}

// new & init
impl FrameApp {
    pub fn new(config: RgConfig, extent: (u32, u32)) -> anyhow::Result<Self> {
        let device = Arc::new(HeadlessDevice::new());
        let renderer = RgRenderer::new(config, device.clone())?;
        let streamer = ResidencyStreamer::new().context("failed to start residency streamer")?;

        let mut app = Self {
            device,
            renderer,
            streamer,
            scene: SceneResources {
                instances: [RgResourceHandle::default(); 2],
                staging: RgResourceHandle::default(),
                shadow_atlas: RgResourceHandle::default(),
                scene_depth: RgResourceHandle::default(),
                material_atlas: RgResourceHandle::default(),
                hdr_color: RgResourceHandle::default(),
                backbuffer: RgResourceHandle::default(),
            },
            extent,
            next_physical_id: 0,
        };
        app.init_scene()?;
        Ok(app)
    }

    fn init_scene(&mut self) -> Result<(), RgDeclareError> {
        let (width, height) = self.extent;
        let instance_desc = RgBufferDesc::new(INSTANCE_BYTES);

        self.scene.instances = [
            self.import_buffer("instances_0", instance_desc)?,
            self.import_buffer("instances_1", instance_desc)?,
        ];
        self.scene.staging = self.import_buffer("instance_staging", instance_desc)?;
        self.scene.shadow_atlas = self.import_texture(
            "shadow_atlas",
            RgTextureDesc::new_2d(2048, 2048, GfxFormat::D32Float),
            GfxResourceState::DepthWrite,
        )?;
        self.scene.scene_depth = self.import_texture(
            "scene_depth",
            RgTextureDesc::new_2d(width, height, GfxFormat::D32Float),
            GfxResourceState::DepthWrite,
        )?;
        self.scene.material_atlas = self.import_texture(
            "material_atlas",
            RgTextureDesc::new_2d(4096, 4096, GfxFormat::Rgba8Srgb).with_mip_levels(13),
            GfxResourceState::Common,
        )?;
        self.import_swapchain_targets()?;

        // 材质图集在流式加载完成之前不可用
        self.renderer.registry_mut().set_resident(self.scene.material_atlas, false)?;
        self.streamer.request(StreamRequest {
            handle: self.scene.material_atlas,
            name: "material_atlas".to_string(),
            latency: Duration::from_millis(40),
        });
        Ok(())
    }

    /// 与窗口尺寸相关的资源
    fn import_swapchain_targets(&mut self) -> Result<(), RgDeclareError> {
        let (width, height) = self.extent;
        self.scene.hdr_color = self.import_texture(
            "hdr_color",
            RgTextureDesc::new_2d(width, height, GfxFormat::Rgba16Float),
            GfxResourceState::Undefined,
        )?;
        self.scene.backbuffer = self.import_texture(
            "backbuffer",
            RgTextureDesc::new_2d(width, height, GfxFormat::Bgra8Unorm),
            GfxResourceState::Present,
        )?;
        Ok(())
    }

    fn next_physical(&mut self) -> GfxResourceId {
        self.next_physical_id += 1;
        GfxResourceId(self.next_physical_id)
    }

    fn import_texture(
        &mut self,
        name: &str,
        desc: RgTextureDesc,
        state: GfxResourceState,
    ) -> Result<RgResourceHandle, RgDeclareError> {
        let physical = self.next_physical();
        self.renderer.import_texture(name, physical, desc, state)
    }

    fn import_buffer(&mut self, name: &str, desc: RgBufferDesc) -> Result<RgResourceHandle, RgDeclareError> {
        let physical = self.next_physical();
        self.renderer.import_buffer(name, physical, desc, GfxResourceState::Common)
    }
}

// getters
impl FrameApp {
    #[inline]
    pub fn renderer(&self) -> &RgRenderer {
        &self.renderer
    }

    #[inline]
    pub fn device(&self) -> &HeadlessDevice {
        &self.device
    }

    #[inline]
    pub fn pending_streams(&self) -> usize {
        self.streamer.in_flight()
    }
}

// update
impl FrameApp {
    /// 窗口尺寸变化：释放旧的 HDR / backbuffer，导入新的
    ///
    /// 旧资源的物理 id 会在最后使用它们的帧完成之后出现在帧报告中。
    pub fn resize(&mut self, extent: (u32, u32)) -> Result<(), RgDeclareError> {
        log::info!("resize {:?} -> {:?}", self.extent, extent);
        self.renderer.release_resource(self.scene.hdr_color)?;
        self.renderer.release_resource(self.scene.backbuffer)?;
        self.extent = extent;
        self.import_swapchain_targets()
    }

    fn update_residency(&mut self) -> Result<(), RgDeclareError> {
        for event in self.streamer.drain() {
            log::info!("'{}' is resident now", event.name);
            self.renderer.registry_mut().set_resident(event.handle, true)?;
        }
        Ok(())
    }
}

// phase methods
impl FrameApp {
    pub fn run_frame(&mut self) -> anyhow::Result<RgFrameReport> {
        self.update_residency()?;

        let scene = self.scene;
        let (width, height) = self.extent;
        let frame = self.renderer.begin_frame()?;
        let upload_index = (frame.frame_id() % 2) as usize;

        let ssao = frame.create_transient_texture("ssao", RgTextureDesc::new_2d(width / 2, height / 2, GfxFormat::R8Unorm))?;
        let bloom =
            frame.create_transient_texture("bloom", RgTextureDesc::new_2d(width / 2, height / 2, GfxFormat::R11G11B10Float))?;
        let overlay = frame.create_transient_texture("ui_overlay", RgTextureDesc::new_2d(width, height, GfxFormat::Rgba8Unorm))?;

        std::thread::scope(|s| -> anyhow::Result<()> {
            let scene_producer = s.spawn(|| -> Result<(), RgDeclareError> {
                frame.add_pass(ShadowPass {
                    instances: scene.instances[1 - upload_index],
                    shadow_atlas: scene.shadow_atlas,
                    scene_depth: scene.scene_depth,
                    instance_count: INSTANCE_COUNT,
                })?;
                frame.add_pass(SsaoPass {
                    scene_depth: scene.scene_depth,
                    ssao,
                    extent: (width / 2, height / 2),
                })?;
                frame.add_pass(LightingPass {
                    shadow_atlas: scene.shadow_atlas,
                    ssao,
                    material_atlas: scene.material_atlas,
                    hdr_color: scene.hdr_color,
                })?;
                frame.add_pass(BloomPass {
                    input: scene.hdr_color,
                    output: bloom,
                    extent: (width / 2, height / 2),
                    mip_count: 5,
                })?;
                frame.add_pass(TonemapPass {
                    hdr_color: scene.hdr_color,
                    bloom,
                    backbuffer: scene.backbuffer,
                })?;
                Ok(())
            });
            let upload_producer = s.spawn(|| -> Result<(), RgDeclareError> {
                frame.add_pass(UploadPass {
                    staging: scene.staging,
                    instances: scene.instances[upload_index],
                    size: INSTANCE_BYTES,
                })?;
                Ok(())
            });
            let ui_producer = s.spawn(|| -> Result<(), RgDeclareError> {
                frame.add_pass(UiOverlayPass {
                    overlay,
                    draw_count: 12,
                })?;
                Ok(())
            });

            for (name, producer) in [("scene", scene_producer), ("upload", upload_producer), ("ui", ui_producer)] {
                producer.join().map_err(|_| anyhow::anyhow!("{name} producer panicked"))??;
            }
            Ok(())
        })?;

        frame.add_pass(UiCompositePass {
            overlay,
            backbuffer: scene.backbuffer,
        })?;
        frame.add_pass(PresentPass {
            backbuffer: scene.backbuffer,
        })?;
        frame.close();

        Ok(frame.submit()?)
    }

    /// 等待所有提交完成，返回可以销毁的物理资源
    pub fn shutdown(&mut self) -> anyhow::Result<Vec<GfxResourceId>> {
        Ok(self.renderer.wait_idle()?)
    }
}
