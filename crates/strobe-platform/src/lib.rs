// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use winit::dpi::PhysicalSize;
use winit::window::{Window, WindowAttributes};

/// Non-resizable window with an exact physical drawable size.
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
        .with_resizable(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn zero_dimension_is_bumped_to_one() {
        let attrs = window_attributes("strobe", 0, 900);
        assert_eq!(attrs.title, "strobe");
        assert!(!attrs.resizable);
        assert_eq!(
            attrs.inner_size,
            Some(Size::Physical(PhysicalSize::new(1, 900)))
        );
    }
}
