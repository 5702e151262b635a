// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lumen_platform::WindowProps;
use lumen_render::{DeviceCapabilities, RenderSettings, SyncPolicy, VsyncMode};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncModeCfg,
    pub frames_in_flight: usize,
    pub depth: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub fence_timeout_ms: u64,
    pub max_sync_failures: u32,
    /// Unset means on in debug builds.
    pub validation: Option<bool>,
    pub require_compute: bool,
    pub require_transfer: bool,
    pub require_anisotropy: bool,
    pub frame_marker: bool,
    /// Directory the pipeline cache is persisted in.
    pub pipeline_cache: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let settings = RenderSettings::default();
        Self {
            clear_color: settings.clear_color,
            vsync: settings.vsync,
            vsync_mode: VsyncModeCfg::Mailbox,
            frames_in_flight: settings.frames_in_flight,
            depth: settings.depth,
            vertex_shader: settings.vertex_shader,
            fragment_shader: settings.fragment_shader,
            fence_timeout_ms: settings.sync.fence_timeout.as_millis() as u64,
            max_sync_failures: settings.sync.max_sync_failures,
            validation: None,
            require_compute: false,
            require_transfer: false,
            require_anisotropy: false,
            frame_marker: false,
            pipeline_cache: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub render: RenderCfg,
    pub window: WindowProps,
}

impl RenderCfg {
    pub fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.set(DeviceCapabilities::COMPUTE, self.require_compute);
        caps.set(DeviceCapabilities::TRANSFER, self.require_transfer);
        caps.set(DeviceCapabilities::SAMPLER_ANISOTROPY, self.require_anisotropy);
        caps
    }

    pub fn to_settings(&self, app_name: &str) -> RenderSettings {
        RenderSettings {
            app_name: app_name.to_owned(),
            capabilities: self.capabilities(),
            validation: self.validation.unwrap_or(cfg!(debug_assertions)),
            frames_in_flight: self.frames_in_flight.max(1),
            clear_color: self.clear_color,
            vsync: self.vsync,
            vsync_mode: match self.vsync_mode {
                VsyncModeCfg::Fifo => VsyncMode::Fifo,
                VsyncModeCfg::Mailbox => VsyncMode::Mailbox,
            },
            depth: self.depth,
            vertex_shader: self.vertex_shader.clone(),
            fragment_shader: self.fragment_shader.clone(),
            pipeline_cache: self.pipeline_cache.clone(),
            sync: SyncPolicy {
                fence_timeout: Duration::from_millis(self.fence_timeout_ms),
                max_sync_failures: self.max_sync_failures,
            },
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing or broken config files fall back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(text) => match parse_cfg(&text) {
            Ok(cfg) => {
                info!("config: loaded {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("config: {} is invalid, using defaults: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("config: cannot read {}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!((cfg.window.width, cfg.window.height), (900, 600));
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [render]
            vsync = false
            vsync_mode = "fifo"
            frames_in_flight = 3
            depth = true
            fence_timeout_ms = 250

            [window]
            title = "demo"
            "#,
        )
        .unwrap();
        assert!(!cfg.render.vsync);
        assert_eq!(cfg.render.vsync_mode, VsyncModeCfg::Fifo);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert!(cfg.render.depth);
        assert_eq!(cfg.render.max_sync_failures, 3);
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 900);
    }

    #[test]
    fn unknown_vsync_mode_is_rejected() {
        assert!(parse_cfg("[render]\nvsync_mode = \"sometimes\"").is_err());
    }

    #[test]
    fn settings_clamp_frames_and_map_policy() {
        let cfg = parse_cfg(
            r#"
            [render]
            frames_in_flight = 0
            fence_timeout_ms = 1500
            max_sync_failures = 7
            validation = false
            require_compute = true
            require_anisotropy = true
            pipeline_cache = "cache"
            "#,
        )
        .unwrap();
        let settings = cfg.render.to_settings("lumen");
        assert_eq!(settings.frames_in_flight, 1);
        assert_eq!(settings.sync.fence_timeout, Duration::from_millis(1500));
        assert_eq!(settings.sync.max_sync_failures, 7);
        assert!(!settings.validation);
        assert_eq!(
            settings.capabilities,
            DeviceCapabilities::GRAPHICS
                | DeviceCapabilities::PRESENT
                | DeviceCapabilities::COMPUTE
                | DeviceCapabilities::SAMPLER_ANISOTROPY
        );
        assert_eq!(settings.pipeline_cache, Some(PathBuf::from("cache")));
        assert_eq!(settings.vsync_mode, VsyncMode::Mailbox);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("definitely/not/here/lumen.toml"));
        assert_eq!(cfg, AppCfg::default());
    }
}
