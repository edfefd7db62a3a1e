// SPDX-License-Identifier: CEPL-1.0
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Pixel extent of a drawable surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A minimised window reports a zero axis; nothing can be presented then.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height, 1.0 for an empty extent.
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// Anything a backend can create a presentable surface for.
pub trait RenderTarget: HasWindowHandle + HasDisplayHandle {
    fn extent(&self) -> RenderSize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_extent() {
        assert!(RenderSize::new(0, 720).is_empty());
        assert!(RenderSize::new(1024, 0).is_empty());
        assert!(!RenderSize::new(1, 1).is_empty());
    }

    #[test]
    fn aspect_ratio_of_window() {
        let size = RenderSize::new(1024, 720);
        assert!((size.aspect_ratio() - 1024.0 / 720.0).abs() < f32::EPSILON);
        assert_eq!(RenderSize::default().aspect_ratio(), 1.0);
    }
}
