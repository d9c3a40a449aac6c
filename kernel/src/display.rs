//! Shared 1-bit framebuffer for the 200x200 panel.
//!
//! Stored in the controller's native layout (row-major, MSB = leftmost
//! pixel, bit set = white) so the orchestrator can hand it to the driver
//! without conversion. Rotation is applied per pixel on the way in.
//! Implements `embedded_graphics_core::DrawTarget`; `BinaryColor::On` is
//! black ink.

use embedded_graphics_core::{
    Pixel,
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Size},
    pixelcolor::BinaryColor,
    primitives::Rectangle,
};

pub const WIDTH: u16 = 200;
pub const HEIGHT: u16 = 200;
pub const ROW_BYTES: usize = WIDTH as usize / 8;
pub const FRAMEBUFFER_SIZE: usize = ROW_BYTES * HEIGHT as usize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const fn from_u8(v: u8) -> Self {
        match v & 3 {
            1 => Rotation::Deg90,
            2 => Rotation::Deg180,
            3 => Rotation::Deg270,
            _ => Rotation::Deg0,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Next rotation clockwise.
    pub const fn rotated(self) -> Self {
        Self::from_u8(self.as_u8() + 1)
    }
}

pub struct Framebuffer {
    buf: [u8; FRAMEBUFFER_SIZE],
    rotation: Rotation,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framebuffer {
    pub const fn new() -> Self {
        Self {
            buf: [0xFF; FRAMEBUFFER_SIZE],
            rotation: Rotation::Deg0,
        }
    }

    pub fn clear_white(&mut self) {
        self.buf.fill(0xFF);
    }

    pub fn clear_black(&mut self) {
        self.buf.fill(0x00);
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.rotation = rotation;
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    // logical (rotated) -> physical panel coordinates
    fn to_physical(&self, x: u16, y: u16) -> (u16, u16) {
        match self.rotation {
            Rotation::Deg0 => (x, y),
            Rotation::Deg90 => (WIDTH - 1 - y, x),
            Rotation::Deg180 => (WIDTH - 1 - x, HEIGHT - 1 - y),
            Rotation::Deg270 => (y, HEIGHT - 1 - x),
        }
    }

    fn set_pixel_physical(&mut self, px: u16, py: u16, black: bool) {
        let idx = py as usize * ROW_BYTES + px as usize / 8;
        let mask = 0x80u8 >> (px % 8);
        if black {
            self.buf[idx] &= !mask;
        } else {
            self.buf[idx] |= mask;
        }
    }

    /// Logical pixel; `true` = black. Out of bounds reads as white.
    pub fn is_black(&self, x: u16, y: u16) -> bool {
        if x >= WIDTH || y >= HEIGHT {
            return false;
        }
        let (px, py) = self.to_physical(x, y);
        let idx = py as usize * ROW_BYTES + px as usize / 8;
        self.buf[idx] & (0x80u8 >> (px % 8)) == 0
    }

    pub fn set_pixel(&mut self, x: u16, y: u16, black: bool) {
        if x >= WIDTH || y >= HEIGHT {
            return;
        }
        let (px, py) = self.to_physical(x, y);
        self.set_pixel_physical(px, py, black);
    }
}

impl OriginDimensions for Framebuffer {
    // square panel: rotation never swaps the axes
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl DrawTarget for Framebuffer {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(coord, color) in pixels {
            if coord.x < 0 || coord.y < 0 || coord.x >= WIDTH as i32 || coord.y >= HEIGHT as i32 {
                continue;
            }
            self.set_pixel(coord.x as u16, coord.y as u16, color == BinaryColor::On);
        }
        Ok(())
    }

    fn fill_solid(&mut self, area: &Rectangle, color: Self::Color) -> Result<(), Self::Error> {
        let x0 = area.top_left.x.clamp(0, WIDTH as i32) as u16;
        let y0 = area.top_left.y.clamp(0, HEIGHT as i32) as u16;
        let x1 = area
            .top_left
            .x
            .saturating_add(area.size.width as i32)
            .clamp(0, WIDTH as i32) as u16;
        let y1 = area
            .top_left
            .y
            .saturating_add(area.size.height as i32)
            .clamp(0, HEIGHT as i32) as u16;

        let black = color == BinaryColor::On;
        for y in y0..y1 {
            for x in x0..x1 {
                self.set_pixel(x, y, black);
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        match color {
            BinaryColor::On => self.clear_black(),
            BinaryColor::Off => self.clear_white(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::prelude::*;
    use embedded_graphics::primitives::PrimitiveStyle;

    #[test]
    fn new_buffer_is_white() {
        let fb = Framebuffer::new();
        assert!(fb.data().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn black_pixel_clears_msb_first() {
        let mut fb = Framebuffer::new();
        fb.set_pixel(0, 0, true);
        fb.set_pixel(9, 1, true);
        assert_eq!(fb.data()[0], 0x7F);
        assert_eq!(fb.data()[ROW_BYTES + 1], 0xBF);
        assert!(fb.is_black(9, 1));
    }

    #[test]
    fn rotation_maps_corners() {
        let mut fb = Framebuffer::new();
        fb.set_rotation(Rotation::Deg90);
        fb.set_pixel(0, 0, true);
        // logical top-left lands on the physical top-right
        assert_eq!(fb.data()[ROW_BYTES - 1], 0xFE);

        fb.clear_white();
        fb.set_rotation(Rotation::Deg180);
        fb.set_pixel(0, 0, true);
        assert_eq!(fb.data()[FRAMEBUFFER_SIZE - 1], 0xFE);
    }

    #[test]
    fn fill_clips_to_bounds() {
        let mut fb = Framebuffer::new();
        Rectangle::new(Point::new(-10, 190), Size::new(30, 40))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(&mut fb)
            .unwrap();
        assert!(fb.is_black(0, 199));
        assert!(fb.is_black(19, 190));
        assert!(!fb.is_black(20, 190));
        assert!(!fb.is_black(0, 189));
    }

    #[test]
    fn rotation_cycles_through_all_four() {
        let r = Rotation::Deg270.rotated();
        assert_eq!(r, Rotation::Deg0);
        assert_eq!(Rotation::from_u8(6), Rotation::Deg180);
    }
}
