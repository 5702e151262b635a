// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;

use crate::frame::{SyncPolicy, DEFAULT_FRAMES_IN_FLIGHT};

bitflags! {
    /// What a physical device must offer to be picked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCapabilities: u32 {
        const GRAPHICS = 1 << 0;
        const PRESENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const TRANSFER = 1 << 3;
        const SAMPLER_ANISOTROPY = 1 << 4;
    }
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self::GRAPHICS | Self::PRESENT
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VsyncMode {
    Fifo,    // Target monitor refresh rate
    #[default]
    Mailbox, // Low latency, fps uncapped
}

/// Everything a backend needs to bring up a renderer.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub app_name: String,
    pub capabilities: DeviceCapabilities,
    pub validation: bool,
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub vsync_mode: VsyncMode,
    pub depth: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub pipeline_cache: Option<PathBuf>,
    pub sync: SyncPolicy,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "lumen".to_owned(),
            capabilities: DeviceCapabilities::default(),
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vsync: true,
            vsync_mode: VsyncMode::Mailbox,
            depth: false,
            vertex_shader: PathBuf::from("shaders/triangle.vert.spv"),
            fragment_shader: PathBuf::from("shaders/triangle.frag.spv"),
            pipeline_cache: None,
            sync: SyncPolicy {
                fence_timeout: Duration::from_secs(5),
                max_sync_failures: 3,
            },
        }
    }
}
