//! 在 headless 设备上运行若干帧，打印每帧的统计
//!
//! 用法：`frame_graph_demo [帧数] [配置文件.toml]`

use std::{io::Write, time::Duration};

use anyhow::Context;
use ember_render_graph::{RgConfig, RgFrameQuality};

mod frame_app;

use frame_app::FrameApp;

fn init_log() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{:<5}] {}: {}",
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

fn main() -> anyhow::Result<()> {
    init_log();

    let mut args = std::env::args().skip(1);
    let frame_count = match args.next() {
        Some(arg) => arg.parse::<u64>().with_context(|| format!("invalid frame count '{arg}'"))?,
        None => 16,
    };
    let config = match args.next() {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read config '{path}'"))?;
            RgConfig::from_toml_str(&text).with_context(|| format!("invalid config '{path}'"))?
        }
        None => RgConfig::default(),
    };
    log::info!("running {} frames with {:?}", frame_count, config);

    let mut app = FrameApp::new(config, (1280, 720))?;
    let mut degraded = 0;
    for index in 0..frame_count {
        if index == frame_count / 2 {
            app.resize((1920, 1080))?;
        }

        let report = app.run_frame()?;
        if report.quality != RgFrameQuality::Full {
            degraded += 1;
        }
        for (pass, outcome) in report.outcomes.iter().filter(|(_, outcome)| !outcome.is_executed()) {
            log::info!("  {pass}: {outcome:?}");
        }
        if !report.retired_resources.is_empty() {
            log::info!("  retired: {:?}", report.retired_resources);
        }
        log::info!("{}", report.stats);

        // 模拟 CPU 侧的其他工作，给流式加载留出时间
        std::thread::sleep(Duration::from_millis(8));
    }

    let retired = app.shutdown()?;
    log::info!(
        "done: {} frames ({} degraded), {} submissions, {} streams pending, {} resources retired at shutdown",
        frame_count,
        degraded,
        app.device().submissions().len(),
        app.pending_streams(),
        retired.len()
    );
    log::info!("last frame: {}", app.renderer().last_stats());
    Ok(())
}
