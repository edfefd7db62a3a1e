// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "lumen.toml";
pub const MAX_SIERPINSKI_DEPTH: u32 = 8;

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub scene: SceneCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WindowCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    /// Base path; `.vert.spv`, `.frag.spv`, ... are appended per stage.
    #[serde(default = "default_shader")]
    pub shader: PathBuf,
    /// Unset means "on in debug builds".
    #[serde(default)]
    pub validation: Option<bool>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            shader: default_shader(),
            validation: None,
        }
    }
}

impl RenderCfg {
    pub fn validation(&self) -> bool {
        self.validation.unwrap_or(cfg!(debug_assertions))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SceneCfg {
    #[serde(default = "default_depth")]
    pub sierpinski_depth: u32,
    /// Radians per second.
    #[serde(default = "default_spin")]
    pub spin_speed: f32,
}

impl Default for SceneCfg {
    fn default() -> Self {
        SceneCfg {
            sierpinski_depth: default_depth(),
            spin_speed: default_spin(),
        }
    }
}

fn default_width() -> u32 {
    1024
}
fn default_height() -> u32 {
    720
}
fn default_title() -> String {
    "Lumen".into()
}
fn default_clear() -> [f32; 4] {
    [0.12, 0.12, 0.16, 1.0]
}
fn default_shader() -> PathBuf {
    match option_env!("LUMEN_SHADER_DIR") {
        Some(dir) => Path::new(dir).join("simple"),
        None => PathBuf::from("shaders/simple"),
    }
}
fn default_depth() -> u32 {
    4
}
fn default_spin() -> f32 {
    1.0
}

pub fn parse(text: &str) -> Result<AppConfig, toml::de::Error> {
    let mut cfg: AppConfig = toml::from_str(text)?;
    if cfg.scene.sierpinski_depth > MAX_SIERPINSKI_DEPTH {
        warn!(
            "sierpinski_depth {} capped at {MAX_SIERPINSKI_DEPTH}",
            cfg.scene.sierpinski_depth
        );
        cfg.scene.sierpinski_depth = MAX_SIERPINSKI_DEPTH;
    }
    Ok(cfg)
}

/// Missing file → defaults; unreadable or malformed file → warning + defaults.
pub fn load(path: &Path) -> AppConfig {
    match fs::read_to_string(path) {
        Ok(text) => match parse(&text) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring {}: {e}", path.display());
                AppConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            AppConfig::default()
        }
    }
}
