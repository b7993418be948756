use ember_gfx::{GfxFormat, GfxQueueClass, GfxResourceId, GfxResourceKind, GfxResourceState};

use crate::{error::RgDeclareError, render_graph::resource_handle::RgPassId};

/// 纹理描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgTextureDesc {
    pub width: u32,
    pub height: u32,
    /// 数组层数
    pub array_layers: u32,
    pub mip_levels: u32,
    pub format: GfxFormat,
}

impl Default for RgTextureDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            array_layers: 1,
            mip_levels: 1,
            format: GfxFormat::Rgba8Unorm,
        }
    }
}

// new & init & builder
impl RgTextureDesc {
    /// 创建 2D 纹理描述
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: GfxFormat) -> Self {
        Self {
            width,
            height,
            format,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    #[inline]
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }
}

// tools
impl RgTextureDesc {
    /// 估算显存占用：所有 mip 和数组层的总和
    pub fn size_bytes(&self) -> u64 {
        let bpp = self.format.bytes_per_pixel();
        let mut total = 0u64;
        let (mut w, mut h) = (self.width as u64, self.height as u64);
        for _ in 0..self.mip_levels {
            total += w * h * bpp;
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        total * self.array_layers as u64
    }
}

/// 缓冲区描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RgBufferDesc {
    /// 字节数
    pub size: u64,
}

impl RgBufferDesc {
    #[inline]
    pub fn new(size: u64) -> Self {
        Self { size }
    }
}

/// 资源描述
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgResourceDesc {
    Texture(RgTextureDesc),
    Buffer(RgBufferDesc),
}

impl RgResourceDesc {
    #[inline]
    pub fn kind(&self) -> GfxResourceKind {
        match self {
            Self::Texture(_) => GfxResourceKind::Texture,
            Self::Buffer(_) => GfxResourceKind::Buffer,
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        match self {
            Self::Texture(desc) => desc.size_bytes(),
            Self::Buffer(desc) => desc.size,
        }
    }

    /// 检查状态对该类资源是否有意义
    pub fn supports_state(&self, state: GfxResourceState) -> bool {
        match self {
            Self::Texture(_) => !state.is_buffer_only(),
            Self::Buffer(_) => !state.is_texture_only(),
        }
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), RgDeclareError> {
        let invalid = |reason: &str| RgDeclareError::InvalidDesc {
            resource: name.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Texture(desc) => {
                if desc.width == 0 || desc.height == 0 {
                    return Err(invalid("texture extent must be non-zero"));
                }
                if desc.array_layers == 0 || desc.mip_levels == 0 {
                    return Err(invalid("texture needs at least one layer and one mip level"));
                }
                let max_mips = 32 - desc.width.max(desc.height).leading_zeros();
                if desc.mip_levels > max_mips {
                    return Err(invalid("too many mip levels for the texture extent"));
                }
            }
            Self::Buffer(desc) => {
                if desc.size == 0 {
                    return Err(invalid("buffer size must be non-zero"));
                }
            }
        }
        Ok(())
    }
}

impl From<RgTextureDesc> for RgResourceDesc {
    fn from(desc: RgTextureDesc) -> Self {
        Self::Texture(desc)
    }
}

impl From<RgBufferDesc> for RgResourceDesc {
    fn from(desc: RgBufferDesc) -> Self {
        Self::Buffer(desc)
    }
}

/// 资源的生命周期类别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RgResourceLifetime {
    /// 由外部导入，跨帧存在
    Persistent,
    /// 由 RenderGraph 在某一帧中创建，帧结束后移除
    Transient { frame_id: u64 },
}

/// 资源条目
#[derive(Clone, Debug)]
pub struct RgResource {
    pub name: String,
    pub desc: RgResourceDesc,
    pub lifetime: RgResourceLifetime,
    /// 导入资源的物理 id；transient 资源在编译时由 transient pool 分配
    pub physical: Option<GfxResourceId>,

    /// 导入时的状态，设备重置后回到这个状态
    pub initial_state: GfxResourceState,
    /// 每个队列上最近一次看到的状态
    pub queue_states: [GfxResourceState; GfxQueueClass::COUNT],
    /// 资源当前的实际状态
    pub current_state: GfxResourceState,
    /// 最近一次访问该资源的队列
    pub last_queue: Option<GfxQueueClass>,

    /// 由流式加载层更新
    pub resident: bool,
    /// 最近一次被提交的帧
    pub last_used_frame: Option<u64>,
    /// 当前帧内按声明顺序的首次 / 最后一次使用
    pub declared_lifetime: Option<(RgPassId, RgPassId)>,
}

// new & init
impl RgResource {
    pub fn imported(
        name: impl Into<String>,
        physical: GfxResourceId,
        desc: RgResourceDesc,
        initial_state: GfxResourceState,
    ) -> Self {
        Self {
            name: name.into(),
            desc,
            lifetime: RgResourceLifetime::Persistent,
            physical: Some(physical),
            initial_state,
            queue_states: [initial_state; GfxQueueClass::COUNT],
            current_state: initial_state,
            last_queue: None,
            resident: true,
            last_used_frame: None,
            declared_lifetime: None,
        }
    }

    pub fn transient(name: impl Into<String>, desc: RgResourceDesc, frame_id: u64) -> Self {
        Self {
            name: name.into(),
            desc,
            lifetime: RgResourceLifetime::Transient { frame_id },
            physical: None,
            initial_state: GfxResourceState::Undefined,
            queue_states: [GfxResourceState::Undefined; GfxQueueClass::COUNT],
            current_state: GfxResourceState::Undefined,
            last_queue: None,
            resident: true,
            last_used_frame: None,
            declared_lifetime: None,
        }
    }
}

// getters
impl RgResource {
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self.lifetime, RgResourceLifetime::Transient { .. })
    }

    #[inline]
    pub fn kind(&self) -> GfxResourceKind {
        self.desc.kind()
    }

    #[inline]
    pub fn state_on(&self, queue: GfxQueueClass) -> GfxResourceState {
        self.queue_states[queue.index()]
    }
}

// update
impl RgResource {
    /// 记录一次声明，扩展当前帧内的生命周期区间
    pub(crate) fn extend_declared_lifetime(&mut self, pass: RgPassId) {
        self.declared_lifetime = Some(match self.declared_lifetime {
            None => (pass, pass),
            Some((first, last)) => (first.min(pass), last.max(pass)),
        });
    }

    /// 回到导入时的状态
    pub(crate) fn reset_state(&mut self) {
        self.queue_states = [self.initial_state; GfxQueueClass::COUNT];
        self.current_state = self.initial_state;
        self.last_queue = None;
    }
}
