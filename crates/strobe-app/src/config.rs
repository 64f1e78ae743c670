// SPDX-License-Identifier: CEPL-1.0
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use strobe_render::RenderSettings;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Clone)]
pub struct WindowCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderCfg {
    #[serde(default = "default_flash")]
    pub flash_color: [f32; 3],
    #[serde(default = "default_period")]
    pub flash_period_frames: f32,
    /// Unset waits on frame fences forever.
    #[serde(default)]
    pub fence_timeout_ms: Option<u64>,
    #[serde(default)]
    pub validation: bool,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
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

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            flash_color: default_flash(),
            flash_period_frames: default_period(),
            fence_timeout_ms: None,
            validation: false,
        }
    }
}

fn default_width() -> u32 {
    1700
}
fn default_height() -> u32 {
    900
}
fn default_title() -> String {
    "strobe".to_owned()
}
fn default_flash() -> [f32; 3] {
    [0.0, 0.0, 1.0]
}
fn default_period() -> f32 {
    120.0
}

impl RenderCfg {
    pub fn settings(&self) -> RenderSettings {
        RenderSettings {
            flash_color: self.flash_color,
            flash_period_frames: self.flash_period_frames,
            fence_timeout: self.fence_timeout_ms.map(Duration::from_millis),
            validation: self.validation,
        }
    }
}

/// `fence_timeout_ms = 0` is treated as unset (wait forever).
pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    let mut cfg = toml::from_str::<AppCfg>(text)?;
    if cfg.render.fence_timeout_ms == Some(0) {
        warn!("fence_timeout_ms = 0 ignored; frame fences wait without limit");
        cfg.render.fence_timeout_ms = None;
    }
    Ok(cfg)
}

/// Missing file → defaults. Malformed file → warning, then defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(_) => AppCfg::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!((cfg.window.width, cfg.window.height), (1700, 900));
        assert_eq!(cfg.window.title, "strobe");
        assert_eq!(cfg.render.flash_color, [0.0, 0.0, 1.0]);
        assert_eq!(cfg.render.flash_period_frames, 120.0);
        assert_eq!(cfg.render.fence_timeout_ms, None);
        assert!(!cfg.render.validation);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            title = "pulse"

            [render]
            flash_color = [1.0, 0.0, 0.0]
            fence_timeout_ms = 2000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "pulse");
        assert_eq!(cfg.window.width, 1700);
        assert_eq!(cfg.render.flash_color, [1.0, 0.0, 0.0]);
        assert_eq!(cfg.render.flash_period_frames, 120.0);

        let s = cfg.render.settings();
        assert_eq!(s.fence_timeout, Some(Duration::from_secs(2)));
        assert_eq!(s.flash_color, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn zero_fence_timeout_is_unset() {
        let cfg = parse_cfg("[render]\nfence_timeout_ms = 0").unwrap();
        assert_eq!(cfg.render.fence_timeout_ms, None);
        assert_eq!(cfg.render.settings().fence_timeout, None);
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(parse_cfg("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn unreadable_path_falls_back() {
        let cfg = load_cfg(Path::new("/nonexistent/strobe.toml"));
        assert_eq!(cfg.window.height, 900);
    }

    #[test]
    fn defaults_match_render_settings() {
        let s = RenderCfg::default().settings();
        let d = RenderSettings::default();
        assert_eq!(s.flash_color, d.flash_color);
        assert_eq!(s.flash_period_frames, d.flash_period_frames);
        assert_eq!(s.fence_timeout, d.fence_timeout);
        assert_eq!(s.validation, d.validation);
    }
}
