// Clock face, the default home page
//
// Big HH:MM in seven-segment digits, date line, battery glyph and the
// next alarm. Redraws (partial) once per minute change.

use core::fmt::Write as _;

use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_9X15};
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};

use super::{Model, Page, PageContext};
use crate::display::Framebuffer;
use crate::ui::{self, StackFmt};

const DIGIT_W: u32 = 36;
const DIGIT_H: u32 = 70;
const SEG_T: u32 = 7;
const DIGIT_GAP: i32 = 8;
const COLON_W: i32 = 16;
const TIME_Y: i32 = 40;

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

pub struct ClockPage {
    shown_minute: Option<u32>,
}

impl Default for ClockPage {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPage {
    pub const fn new() -> Self {
        Self { shown_minute: None }
    }

    fn draw_time(fb: &mut Framebuffer, hour: u8, minute: u8) {
        let total = 4 * DIGIT_W as i32 + 2 * DIGIT_GAP + COLON_W;
        let mut x = (crate::display::WIDTH as i32 - total) / 2;
        let digits = [hour / 10, hour % 10, minute / 10, minute % 10];
        for (i, d) in digits.iter().enumerate() {
            let _ = ui::seven_segment(fb, *d, Point::new(x, TIME_Y), DIGIT_W, DIGIT_H, SEG_T);
            x += DIGIT_W as i32;
            if i == 1 {
                let dot = Size::new(SEG_T, SEG_T);
                let cx = x + (COLON_W - SEG_T as i32) / 2;
                for dy in [DIGIT_H as i32 / 3, 2 * DIGIT_H as i32 / 3] {
                    let _ = Rectangle::new(Point::new(cx, TIME_Y + dy - SEG_T as i32 / 2), dot)
                        .into_styled(PrimitiveStyle::with_fill(BinaryColor::On))
                        .draw(fb);
                }
                x += COLON_W;
            } else {
                x += DIGIT_GAP;
            }
        }
    }
}

impl Page for ClockPage {
    fn on_create(&mut self, _ctx: &mut PageContext) {
        self.shown_minute = None;
    }

    fn on_tick(&mut self, model: &Model, ctx: &mut PageContext) {
        let minute = model.epoch.map(|e| e / 60);
        if minute != self.shown_minute {
            self.shown_minute = minute;
            ctx.request_redraw(false);
        }
    }

    fn draw(&self, fb: &mut Framebuffer, model: &Model, _loop_count: u32) {
        let bat = &model.battery;
        if bat.valid {
            let _ = ui::battery_icon(fb, Point::new(168, 4), bat.level);
            let mut s = StackFmt::<8>::new();
            let _ = write!(s, "{}%{}", bat.level, if bat.charging { "+" } else { "" });
            let _ = ui::text(fb, s.as_str(), 126, 5, &FONT_6X10);
        }

        let Some(now) = model.now() else {
            let _ = ui::text_centered(fb, "--:--", TIME_Y + 28, &FONT_9X15);
            let _ = ui::text_centered(fb, "clock not set", 150, &FONT_6X10);
            return;
        };

        Self::draw_time(fb, now.hour, now.minute);

        let mut date = StackFmt::<20>::new();
        let _ = write!(
            date,
            "{} {:04}-{:02}-{:02}",
            WEEKDAYS[now.weekday as usize % 7],
            now.year,
            now.month,
            now.day
        );
        let _ = ui::text_centered(fb, date.as_str(), TIME_Y + DIGIT_H as i32 + 16, &FONT_9X15);

        if let Some(at) = model.alarm.next_fire(&now) {
            let when = crate::protocol::DateTime::from_epoch(at);
            let mut s = StackFmt::<20>::new();
            let _ = write!(
                s,
                "alarm {} {:02}:{:02}",
                WEEKDAYS[when.weekday as usize % 7],
                when.hour,
                when.minute
            );
            let _ = ui::text_centered(fb, s.as_str(), 180, &FONT_6X10);
        }
    }
}
