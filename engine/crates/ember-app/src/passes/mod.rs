//! 帧内的各个 Pass producer
//!
//! 每个 Pass 都实现 `RgPass`：`setup` 声明资源访问，`execute` 录制命令。
//! 资源句柄由外部传入，Pass 本身不持有任何 GPU 资源。

pub mod bloom_pass;
pub mod lighting_pass;
pub mod shadow_pass;
pub mod ssao_pass;
pub mod tonemap_pass;
pub mod ui_pass;
pub mod upload_pass;

pub use bloom_pass::BloomPass;
pub use lighting_pass::LightingPass;
pub use shadow_pass::ShadowPass;
pub use ssao_pass::SsaoPass;
pub use tonemap_pass::TonemapPass;
pub use ui_pass::{PresentPass, UiCompositePass, UiOverlayPass};
pub use upload_pass::UploadPass;
