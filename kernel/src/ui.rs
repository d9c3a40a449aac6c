// Drawing helpers shared by the pages.
// All text is embedded-graphics mono fonts; the big clock digits are
// drawn as seven-segment bars so no large font has to live in flash.

use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::{Baseline, Text};

use crate::display::WIDTH;

pub const HEADER_H: u32 = 20;

/// No-alloc `fmt::Write` buffer; silently truncates on overflow.
pub struct StackFmt<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Default for StackFmt<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> StackFmt<N> {
    pub const fn new() -> Self {
        Self {
            buf: [0u8; N],
            len: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        // truncation may split a multi-byte char; keep the valid prefix
        match core::str::from_utf8(&self.buf[..self.len]) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.buf[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

impl<const N: usize> core::fmt::Write for StackFmt<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let n = bytes.len().min(N - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}

pub fn text<D>(d: &mut D, s: &str, x: i32, y: i32, font: &MonoFont<'_>) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let style = MonoTextStyle::new(font, BinaryColor::On);
    Text::with_baseline(s, Point::new(x, y), style, Baseline::Top).draw(d)?;
    Ok(())
}

/// Text horizontally centred on the panel.
pub fn text_centered<D>(d: &mut D, s: &str, y: i32, font: &MonoFont<'_>) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let char_w = font.character_size.width + font.character_spacing;
    let w = s.len() as i32 * char_w as i32;
    text(d, s, (WIDTH as i32 - w) / 2, y, font)
}

/// Inverted title bar across the top of the screen.
pub fn header<D>(d: &mut D, title: &str, font: &MonoFont<'_>) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    Rectangle::new(Point::zero(), Size::new(WIDTH as u32, HEADER_H))
        .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
        .draw(d)?;
    let style = MonoTextStyle::new(font, BinaryColor::Off);
    let y = (HEADER_H - font.character_size.height) as i32 / 2;
    Text::with_baseline(title, Point::new(4, y), style, Baseline::Top).draw(d)?;
    Ok(())
}

/// List row; the selected row is drawn inverted.
pub fn row<D>(
    d: &mut D,
    area: Rectangle,
    label: &str,
    selected: bool,
    font: &MonoFont<'_>,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let (bg, fg) = if selected {
        (BinaryColor::On, BinaryColor::Off)
    } else {
        (BinaryColor::Off, BinaryColor::On)
    };
    area.into_styled(PrimitiveStyle::with_fill(bg)).draw(d)?;
    let y = area.top_left.y + (area.size.height as i32 - font.character_size.height as i32) / 2;
    let style = MonoTextStyle::new(font, fg);
    Text::with_baseline(label, Point::new(area.top_left.x + 6, y), style, Baseline::Top).draw(d)?;
    Ok(())
}

//  aaa
// f   b
//  ggg
// e   c
//  ddd
const SEGMENTS: [u8; 10] = [
    0b011_1111, // 0: abcdef
    0b000_0110, // 1: bc
    0b101_1011, // 2: abdeg
    0b100_1111, // 3: abcdg
    0b110_0110, // 4: bcfg
    0b110_1101, // 5: acdfg
    0b111_1101, // 6: acdefg
    0b000_0111, // 7: abc
    0b111_1111, // 8
    0b110_1111, // 9: abcdfg
];

/// Seven-segment digit in a `w` x `h` cell with bars `t` thick.
pub fn seven_segment<D>(
    d: &mut D,
    digit: u8,
    origin: Point,
    w: u32,
    h: u32,
    t: u32,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let Some(&mask) = SEGMENTS.get(digit as usize) else {
        return Ok(());
    };
    let half = h / 2;
    let (x, y) = (origin.x, origin.y);
    let (wi, hi, ti, halfi) = (w as i32, h as i32, t as i32, half as i32);

    let bars = [
        (Point::new(x, y), Size::new(w, t)),                       // a
        (Point::new(x + wi - ti, y), Size::new(t, half)),          // b
        (Point::new(x + wi - ti, y + halfi), Size::new(t, h - half)), // c
        (Point::new(x, y + hi - ti), Size::new(w, t)),             // d
        (Point::new(x, y + halfi), Size::new(t, h - half)),        // e
        (Point::new(x, y), Size::new(t, half)),                    // f
        (Point::new(x, y + halfi - ti / 2), Size::new(w, t)),      // g
    ];

    let fill = PrimitiveStyle::with_fill(BinaryColor::On);
    for (i, (p, s)) in bars.iter().enumerate() {
        if mask & (1 << i) != 0 {
            Rectangle::new(*p, *s).into_styled(fill).draw(d)?;
        }
    }
    Ok(())
}

/// Simple battery glyph with a fill bar proportional to `pct`.
pub fn battery_icon<D>(d: &mut D, origin: Point, pct: u8) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let body = Size::new(24, 12);
    Rectangle::new(origin, body)
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(d)?;
    Rectangle::new(origin + Point::new(24, 3), Size::new(2, 6))
        .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
        .draw(d)?;
    let fill_w = 20 * pct.min(100) as u32 / 100;
    if fill_w > 0 {
        Rectangle::new(origin + Point::new(2, 2), Size::new(fill_w, 8))
            .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
            .draw(d)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::Framebuffer;
    use core::fmt::Write;

    #[test]
    fn stack_fmt_truncates() {
        let mut s = StackFmt::<5>::new();
        let _ = write!(s, "{}%", 1234);
        assert_eq!(s.as_str(), "1234%");
        let _ = write!(s, "more");
        assert_eq!(s.as_str(), "1234%");
    }

    #[test]
    fn one_lights_only_right_bars() {
        let mut fb = Framebuffer::new();
        seven_segment(&mut fb, 1, Point::new(10, 10), 20, 40, 4).unwrap();
        assert!(fb.is_black(28, 12)); // b
        assert!(fb.is_black(28, 45)); // c
        assert!(!fb.is_black(11, 12)); // f
        assert!(!fb.is_black(20, 10)); // a
    }

    #[test]
    fn eight_lights_every_bar() {
        let mut fb = Framebuffer::new();
        seven_segment(&mut fb, 8, Point::new(0, 0), 20, 40, 4).unwrap();
        assert!(fb.is_black(10, 0)); // a
        assert!(fb.is_black(10, 19)); // g
        assert!(fb.is_black(10, 39)); // d
        assert!(fb.is_black(1, 30)); // e
    }
}
