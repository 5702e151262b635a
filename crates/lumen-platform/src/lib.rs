// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use serde::Deserialize;
use winit::dpi::LogicalSize;
use winit::window::WindowAttributes;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowProps {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowProps {
    fn default() -> Self {
        Self {
            title: "lumen".to_owned(),
            width: 900,
            height: 600,
        }
    }
}

impl WindowProps {
    pub fn attributes(&self) -> WindowAttributes {
        WindowAttributes::default()
            .with_title(self.title.clone())
            .with_inner_size(LogicalSize::new(self.width.max(1), self.height.max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_900_by_600() {
        let props = WindowProps::default();
        assert_eq!((props.width, props.height), (900, 600));
        assert_eq!(props.title, "lumen");
    }
}
