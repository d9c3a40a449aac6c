// Environment readings, second home page

use core::fmt::Write as _;

use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_9X15};
use embedded_graphics::prelude::*;

use super::{Model, Page, ReadingState, SensorKind};
use crate::display::Framebuffer;
use crate::ui::{self, HEADER_H, StackFmt};

const ROW_H: i32 = 40;
const LABEL_X: i32 = 8;
const VALUE_X: i32 = 100;

/// Placeholder for readings that never arrived or failed on the bus.
pub const PLACEHOLDER: &str = "--";

pub struct SensorsPage;

impl Default for SensorsPage {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorsPage {
    pub const fn new() -> Self {
        Self
    }

    fn label(kind: SensorKind) -> &'static str {
        match kind {
            SensorKind::Temperature => "Temp",
            SensorKind::Humidity => "Humidity",
            SensorKind::Pressure => "Pressure",
            SensorKind::Steps => "Steps",
        }
    }

    /// Formatted value with unit, or the placeholder.
    pub fn format(kind: SensorKind, state: ReadingState) -> StackFmt<16> {
        let mut s = StackFmt::new();
        let v = match state {
            ReadingState::Value(v) => v,
            ReadingState::Missing | ReadingState::Failed => {
                let _ = s.write_str(PLACEHOLDER);
                return s;
            }
        };
        let _ = match kind {
            SensorKind::Temperature => {
                let sign = if v < 0 { "-" } else { "" };
                let a = v.unsigned_abs();
                write!(s, "{}{}.{} C", sign, a / 10, a % 10)
            }
            SensorKind::Humidity => write!(s, "{}.{} %", v / 10, v.rem_euclid(10)),
            SensorKind::Pressure => write!(s, "{} hPa", v / 10),
            SensorKind::Steps => write!(s, "{}", v),
        };
        s
    }
}

impl Page for SensorsPage {
    fn draw(&self, fb: &mut Framebuffer, model: &Model, _loop_count: u32) {
        let _ = ui::header(fb, "Sensors", &FONT_9X15);
        for (i, kind) in SensorKind::ALL.iter().enumerate() {
            let y = HEADER_H as i32 + 12 + i as i32 * ROW_H;
            let _ = ui::text(fb, Self::label(*kind), LABEL_X, y + 2, &FONT_6X10);
            let value = Self::format(*kind, model.reading(*kind));
            let _ = ui::text(fb, value.as_str(), VALUE_X, y, &FONT_9X15);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_failed_show_placeholder() {
        for state in [ReadingState::Missing, ReadingState::Failed] {
            let s = SensorsPage::format(SensorKind::Humidity, state);
            assert_eq!(s.as_str(), PLACEHOLDER);
        }
    }

    #[test]
    fn values_carry_units() {
        let t = SensorsPage::format(SensorKind::Temperature, ReadingState::Value(-35));
        assert_eq!(t.as_str(), "-3.5 C");
        let p = SensorsPage::format(SensorKind::Pressure, ReadingState::Value(10_132));
        assert_eq!(p.as_str(), "1013 hPa");
        let n = SensorsPage::format(SensorKind::Steps, ReadingState::Value(4_210));
        assert_eq!(n.as_str(), "4210");
    }
}
