// SPDX-License-Identifier: CEPL-1.0
use lumen_render_vk::{vk, CommandRecorder, OverlayContext, OverlayFrame, PassOverlay, VkError};
use tracing::debug;

const SLOT_COLORS: [[f32; 4]; 4] = [
    [0.90, 0.30, 0.25, 1.0],
    [0.30, 0.80, 0.35, 1.0],
    [0.25, 0.45, 0.95, 1.0],
    [0.95, 0.80, 0.20, 1.0],
];

/// Paints one square per frame slot in the top-left corner; the square of
/// the slot being recorded is lit.
#[derive(Debug)]
pub struct FrameMarker {
    size: u32,
    margin: u32,
    slots: usize,
}

impl FrameMarker {
    pub fn new(slots: usize) -> Self {
        Self {
            size: 16,
            margin: 8,
            slots: slots.max(1),
        }
    }

    fn rect(&self, index: usize) -> vk::Rect2D {
        let step = self.size + self.margin;
        vk::Rect2D {
            offset: vk::Offset2D {
                x: (self.margin + index as u32 * step) as i32,
                y: self.margin as i32,
            },
            extent: vk::Extent2D {
                width: self.size,
                height: self.size,
            },
        }
    }

    fn fits(&self, rect: vk::Rect2D, extent: vk::Extent2D) -> bool {
        rect.offset.x as u32 + rect.extent.width <= extent.width
            && rect.offset.y as u32 + rect.extent.height <= extent.height
    }
}

impl PassOverlay for FrameMarker {
    fn attach(&mut self, ctx: &OverlayContext<'_>) -> Result<(), VkError> {
        debug!(
            "frame marker: attached to {}x{} chain",
            ctx.swapchain.extent.width, ctx.swapchain.extent.height
        );
        Ok(())
    }

    fn record(&mut self, recorder: &CommandRecorder<'_>, frame: OverlayFrame) {
        for index in 0..self.slots {
            let rect = self.rect(index);
            if !self.fits(rect, frame.extent) {
                break;
            }
            let color = if index == frame.slot {
                SLOT_COLORS[index % SLOT_COLORS.len()]
            } else {
                [0.15, 0.15, 0.15, 1.0]
            };
            recorder.clear_color_rect(rect, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squares_are_laid_out_left_to_right() {
        let marker = FrameMarker::new(3);
        assert_eq!(marker.rect(0).offset, vk::Offset2D { x: 8, y: 8 });
        assert_eq!(marker.rect(2).offset, vk::Offset2D { x: 56, y: 8 });
    }

    #[test]
    fn squares_outside_the_image_are_dropped() {
        let marker = FrameMarker::new(4);
        let small = vk::Extent2D {
            width: 40,
            height: 40,
        };
        assert!(marker.fits(marker.rect(0), small));
        assert!(!marker.fits(marker.rect(1), small));
    }
}
