// Battery page: voltage, level and discharge-curve capture
//
//   short Ok  start / stop curve capture
//   long Ok   drop the learned curve
//   long Up   back (default handler)

use core::fmt::Write as _;

use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_9X15};
use embedded_graphics::prelude::*;

use super::{GaugeCommand, Model, Page, PageContext};
use crate::display::Framebuffer;
use crate::drivers::input::{Click, Key, KeyEvent};
use crate::ui::{self, HEADER_H, StackFmt};

pub struct BatteryPage;

impl Default for BatteryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl BatteryPage {
    pub const fn new() -> Self {
        Self
    }
}

impl Page for BatteryPage {
    fn on_key_click(&mut self, ev: KeyEvent, ctx: &mut PageContext) -> bool {
        match (ev.key, ev.click) {
            (Key::Ok, Click::Short) => {
                ctx.gauge(GaugeCommand::ToggleCapture);
                true
            }
            (Key::Ok, Click::Long) => {
                ctx.gauge(GaugeCommand::ClearCurve);
                true
            }
            _ => false,
        }
    }

    fn draw(&self, fb: &mut Framebuffer, model: &Model, _loop_count: u32) {
        let _ = ui::header(fb, "Battery", &FONT_9X15);
        let bat = &model.battery;
        let top = HEADER_H as i32 + 12;

        if !bat.valid {
            let _ = ui::text(fb, "no sample yet", 8, top, &FONT_9X15);
        } else {
            let mut s = StackFmt::<24>::new();
            let _ = write!(s, "{}% {}.{:03} V", bat.level, bat.mv / 1000, bat.mv % 1000);
            let _ = ui::text(fb, s.as_str(), 8, top, &FONT_9X15);
            let _ = ui::battery_icon(fb, Point::new(166, top + 2), bat.level);
            if bat.charging {
                let _ = ui::text(fb, "charging", 8, top + 22, &FONT_6X10);
            }
        }

        let mut s = StackFmt::<32>::new();
        let _ = write!(
            s,
            "curve: {} ({} pts)",
            if bat.learned { "learned" } else { "default" },
            bat.curve_points
        );
        let _ = ui::text(fb, s.as_str(), 8, top + 48, &FONT_6X10);

        let status = if bat.capturing {
            "capturing - Ok to stop"
        } else {
            "Ok to capture"
        };
        let _ = ui::text(fb, status, 8, top + 66, &FONT_6X10);
        let _ = ui::text(fb, "hold Ok: clear curve", 8, top + 84, &FONT_6X10);
    }
}
