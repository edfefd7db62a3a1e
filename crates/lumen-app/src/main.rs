// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_core::init_tracing;
use lumen_platform::WindowSurface;
use lumen_render::RenderSize;
use lumen_render_vk::{ApiContext, ClearValues, ContextOptions, Device};
use tracing::info;

mod config;
mod orchestrator;
mod toys;

use config::AppConfig;
use orchestrator::{FrameOrchestrator, FrameSettings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {}

fn main() -> Result<()> {
    init_tracing();
    let _args = Args::parse();
    let cfg = config::load(Path::new(config::CONFIG_FILE));
    run_app(&cfg)
}

fn run_app(cfg: &AppConfig) -> Result<()> {
    let size = RenderSize {
        width: cfg.window.width,
        height: cfg.window.height,
    };
    let mut window =
        WindowSurface::create(size, &cfg.window.title).context("window creation failed")?;

    let options = ContextOptions {
        app_name: cfg.window.title.clone(),
        validation: cfg.render.validation(),
    };
    let context = ApiContext::new(&window, &options).context("Vulkan context setup failed")?;
    let device = Device::new(&context, &window).context("device setup failed")?;
    info!("adapter: {}", device.adapter_name());

    let vertices = toys::sierpinski(cfg.scene.sierpinski_depth, &toys::base_triangle());
    let settings = FrameSettings {
        shader_base: cfg.render.shader.clone(),
        clear: ClearValues {
            color: cfg.render.clear_color,
            ..ClearValues::DEFAULT
        },
        spin_speed: cfg.scene.spin_speed,
    };
    let mut frames = FrameOrchestrator::new(&device, window.extent(), settings, &vertices)
        .context("frame setup failed")?;
    info!(
        "swap-chain: {} images, {:?}",
        frames.swap_chain().image_count(),
        frames.swap_chain().extent()
    );
    frames.run(&mut window).context("frame loop failed")?;
    Ok(())
}
