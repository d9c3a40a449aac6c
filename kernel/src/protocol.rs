// External configuration protocol and RTC register codec
//
// Frames arrive from the companion link (BLE write / serial) as raw
// bytes: byte 0 is the command, the rest is its payload.
//
//   0x01 SET_TIME      year-2000, month, day, weekday, hour, minute, second
//   0x02 SET_ALARM     flags (bit0 enable, bit1 repeat), minute, hour, mask
//                      mask bit7 set: bits0..6 are weekdays (bit0 = Sunday)
//                      mask bit7 clear: day of month, 0 = every day
//   0x03 START_CAPTURE battery curve capture, no payload
//   0x04 CLEAR_CURVE   drop learned battery curve, no payload
//
// The RTC (PCF85063 class) keeps time in a 7-byte BCD block starting at
// the seconds register and the alarm in a 4-byte block (minute, hour,
// day, weekday). Bit 7 of each alarm byte is AE: set = field ignored.

use core::fmt;

pub const CMD_SET_TIME: u8 = 0x01;
pub const CMD_SET_ALARM: u8 = 0x02;
pub const CMD_START_CAPTURE: u8 = 0x03;
pub const CMD_CLEAR_CURVE: u8 = 0x04;

const SET_TIME_LEN: usize = 7;
const SET_ALARM_LEN: usize = 4;

pub const TIME_REGS_LEN: usize = 7;
pub const ALARM_REGS_LEN: usize = 4;

const ALARM_DISABLED: u8 = 0x80; // AE bit
const WEEKDAY_MASK_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    Empty,
    UnknownCommand(u8),
    BadLength { command: u8, expected: u8, got: u8 },
    OutOfRange(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Empty => f.write_str("empty frame"),
            ProtocolError::UnknownCommand(c) => write!(f, "unknown command {:#04x}", c),
            ProtocolError::BadLength {
                command,
                expected,
                got,
            } => write!(
                f,
                "command {:#04x}: payload {} bytes, expected {}",
                command, got, expected
            ),
            ProtocolError::OutOfRange(field) => write!(f, "{} out of range", field),
        }
    }
}

pub fn bcd_encode(v: u8) -> u8 {
    ((v / 10) << 4) | (v % 10)
}

pub fn bcd_decode(v: u8) -> u8 {
    (v >> 4) * 10 + (v & 0x0F)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateTime {
    pub year: u16,   // full year, 2000..=2099
    pub month: u8,   // 1-12
    pub day: u8,     // 1-31
    pub weekday: u8, // 0 = Sunday
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

fn check(ok: bool, field: &'static str) -> Result<(), ProtocolError> {
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange(field))
    }
}

impl DateTime {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check((2000..=2099).contains(&self.year), "year")?;
        check((1..=12).contains(&self.month), "month")?;
        check(
            self.day >= 1 && self.day <= days_in_month(self.year, self.month),
            "day",
        )?;
        check(self.weekday < 7, "weekday")?;
        check(self.hour < 24, "hour")?;
        check(self.minute < 60, "minute")?;
        check(self.second < 60, "second")
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Seconds since 1970-01-01 00:00:00.
    pub fn to_epoch(&self) -> u32 {
        let days = days_from_civil(self.year as i32, self.month as i32, self.day as i32);
        let secs = days as i64 * 86_400
            + self.hour as i64 * 3_600
            + self.minute as i64 * 60
            + self.second as i64;
        secs.clamp(0, u32::MAX as i64) as u32
    }

    pub fn from_epoch(epoch: u32) -> Self {
        let days = (epoch / 86_400) as i32;
        let rem = epoch % 86_400;
        let (year, month, day) = civil_from_days(days);
        Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            // 1970-01-01 was a Thursday
            weekday: ((days + 4) % 7) as u8,
            hour: (rem / 3_600) as u8,
            minute: (rem / 60 % 60) as u8,
            second: (rem % 60) as u8,
        }
    }

    /// Time block as the RTC stores it: sec, min, hour, day, weekday,
    /// month, year (two digits).
    pub fn to_registers(&self) -> [u8; TIME_REGS_LEN] {
        [
            bcd_encode(self.second),
            bcd_encode(self.minute),
            bcd_encode(self.hour),
            bcd_encode(self.day),
            self.weekday & 0x07,
            bcd_encode(self.month),
            bcd_encode((self.year % 100) as u8),
        ]
    }

    /// Decode the RTC time block. Bit 7 of the seconds register is the
    /// oscillator-stop flag; a stopped clock decodes as an error.
    pub fn from_registers(regs: &[u8; TIME_REGS_LEN]) -> Result<Self, ProtocolError> {
        check(regs[0] & 0x80 == 0, "oscillator")?;
        let dt = Self {
            second: bcd_decode(regs[0] & 0x7F),
            minute: bcd_decode(regs[1] & 0x7F),
            hour: bcd_decode(regs[2] & 0x3F),
            day: bcd_decode(regs[3] & 0x3F),
            weekday: regs[4] & 0x07,
            month: bcd_decode(regs[5] & 0x1F),
            year: 2000 + bcd_decode(regs[6]) as u16,
        };
        dt.validate()?;
        Ok(dt)
    }
}

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

// proleptic Gregorian, days relative to 1970-01-01
fn days_from_civil(y: i32, m: i32, d: i32) -> i32 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m + 9) % 12; // March = 0
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(z: i32) -> (i32, i32, i32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe + era * 400 + if m <= 2 { 1 } else { 0 };
    (y, m, d)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlarmDays {
    #[default]
    EveryDay,
    DayOfMonth(u8),
    /// bit0 = Sunday .. bit6 = Saturday
    Weekdays(u8),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Alarm {
    pub enabled: bool,
    pub repeat: bool,
    pub hour: u8,
    pub minute: u8,
    pub days: AlarmDays,
}

/// Alarm registers in decoded form; `None` fields have AE set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlarmRegs {
    pub minute: Option<u8>,
    pub hour: Option<u8>,
    pub day: Option<u8>,
    pub weekday: Option<u8>,
}

impl AlarmRegs {
    pub const DISABLED: Self = Self {
        minute: None,
        hour: None,
        day: None,
        weekday: None,
    };

    pub fn encode(&self) -> [u8; ALARM_REGS_LEN] {
        let field = |v: Option<u8>| v.map_or(ALARM_DISABLED, bcd_encode);
        [
            field(self.minute),
            field(self.hour),
            field(self.day),
            self.weekday.map_or(ALARM_DISABLED, |w| w & 0x07),
        ]
    }

    pub fn decode(regs: &[u8; ALARM_REGS_LEN]) -> Self {
        let field = |r: u8, mask: u8| (r & ALARM_DISABLED == 0).then(|| bcd_decode(r & mask));
        Self {
            minute: field(regs[0], 0x7F),
            hour: field(regs[1], 0x3F),
            day: field(regs[2], 0x3F),
            weekday: (regs[3] & ALARM_DISABLED == 0).then_some(regs[3] & 0x07),
        }
    }
}

impl Alarm {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check(self.hour < 24, "alarm hour")?;
        check(self.minute < 60, "alarm minute")?;
        match self.days {
            AlarmDays::EveryDay => Ok(()),
            AlarmDays::DayOfMonth(d) => check((1..=31).contains(&d), "alarm day"),
            AlarmDays::Weekdays(mask) => check(mask != 0 && mask & 0x80 == 0, "alarm weekdays"),
        }
    }

    /// The SET_ALARM frame that decodes back to this alarm; also the
    /// persisted form.
    pub fn to_frame(&self) -> [u8; SET_ALARM_LEN + 1] {
        let flags = self.enabled as u8 | (self.repeat as u8) << 1;
        let mask = match self.days {
            AlarmDays::EveryDay => 0,
            AlarmDays::DayOfMonth(d) => d,
            AlarmDays::Weekdays(m) => WEEKDAY_MASK_FLAG | m,
        };
        [CMD_SET_ALARM, flags, self.minute, self.hour, mask]
    }

    fn fires_on(&self, day: u8, weekday: u8) -> bool {
        match self.days {
            AlarmDays::EveryDay => true,
            AlarmDays::DayOfMonth(d) => d == day,
            AlarmDays::Weekdays(mask) => mask & (1 << weekday) != 0,
        }
    }

    /// Epoch seconds of the next firing strictly after `now`, if any
    /// within the next 62 days.
    pub fn next_fire(&self, now: &DateTime) -> Option<u32> {
        if !self.enabled {
            return None;
        }
        let now_epoch = now.to_epoch();
        let midnight = now_epoch - now_epoch % 86_400;
        let offset = self.hour as u32 * 3_600 + self.minute as u32 * 60;
        (0..62u32).find_map(|i| {
            let at = midnight + i * 86_400 + offset;
            let dt = DateTime::from_epoch(at);
            (at > now_epoch && self.fires_on(dt.day, dt.weekday)).then_some(at)
        })
    }

    /// Registers to program for the next firing after `now`. The chip
    /// only matches a single weekday, so a weekday mask is reduced to the
    /// next matching day.
    pub fn next_registers(&self, now: &DateTime) -> AlarmRegs {
        let Some(at) = self.next_fire(now) else {
            return AlarmRegs::DISABLED;
        };
        let dt = DateTime::from_epoch(at);
        let (day, weekday) = match self.days {
            AlarmDays::EveryDay => (None, None),
            AlarmDays::DayOfMonth(_) => (Some(dt.day), None),
            AlarmDays::Weekdays(_) => (None, Some(dt.weekday)),
        };
        AlarmRegs {
            minute: Some(self.minute),
            hour: Some(self.hour),
            day,
            weekday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetTime(DateTime),
    SetAlarm(Alarm),
    StartCapture,
    ClearCurve,
}

impl Command {
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (&command, payload) = frame.split_first().ok_or(ProtocolError::Empty)?;
        let expect = |len: usize| {
            if payload.len() == len {
                Ok(())
            } else {
                Err(ProtocolError::BadLength {
                    command,
                    expected: len as u8,
                    got: payload.len().min(u8::MAX as usize) as u8,
                })
            }
        };

        match command {
            CMD_SET_TIME => {
                expect(SET_TIME_LEN)?;
                let dt = DateTime {
                    year: 2000 + payload[0] as u16,
                    month: payload[1],
                    day: payload[2],
                    weekday: payload[3],
                    hour: payload[4],
                    minute: payload[5],
                    second: payload[6],
                };
                dt.validate()?;
                Ok(Command::SetTime(dt))
            }
            CMD_SET_ALARM => {
                expect(SET_ALARM_LEN)?;
                let flags = payload[0];
                let mask = payload[3];
                let days = if mask & WEEKDAY_MASK_FLAG != 0 {
                    AlarmDays::Weekdays(mask & 0x7F)
                } else if mask == 0 {
                    AlarmDays::EveryDay
                } else {
                    AlarmDays::DayOfMonth(mask)
                };
                let alarm = Alarm {
                    enabled: flags & 0x01 != 0,
                    repeat: flags & 0x02 != 0,
                    minute: payload[1],
                    hour: payload[2],
                    days,
                };
                alarm.validate()?;
                Ok(Command::SetAlarm(alarm))
            }
            CMD_START_CAPTURE => {
                expect(0)?;
                Ok(Command::StartCapture)
            }
            CMD_CLEAR_CURVE => {
                expect(0)?;
                Ok(Command::ClearCurve)
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> DateTime {
        let mut d = DateTime {
            year,
            month,
            day,
            weekday: 0,
            hour,
            minute,
            second,
        };
        d.weekday = DateTime::from_epoch(d.to_epoch()).weekday;
        d
    }

    #[test]
    fn bcd_helpers() {
        assert_eq!(bcd_encode(59), 0x59);
        assert_eq!(bcd_decode(0x23), 23);
    }

    #[test]
    fn set_time_frame_decodes() {
        let cmd = Command::parse(&[0x01, 24, 2, 29, 4, 13, 45, 7]).unwrap();
        assert_eq!(
            cmd,
            Command::SetTime(DateTime {
                year: 2024,
                month: 2,
                day: 29,
                weekday: 4,
                hour: 13,
                minute: 45,
                second: 7,
            })
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert_eq!(Command::parse(&[]), Err(ProtocolError::Empty));
        assert_eq!(Command::parse(&[0x7E]), Err(ProtocolError::UnknownCommand(0x7E)));
        assert_eq!(
            Command::parse(&[0x01, 24, 2]),
            Err(ProtocolError::BadLength {
                command: 0x01,
                expected: 7,
                got: 2
            })
        );
        assert!(Command::parse(&[0x03, 0]).is_err());
        // 2023 is not a leap year
        assert_eq!(
            Command::parse(&[0x01, 23, 2, 29, 3, 0, 0, 0]),
            Err(ProtocolError::OutOfRange("day"))
        );
        assert_eq!(
            Command::parse(&[0x02, 1, 60, 7, 0]),
            Err(ProtocolError::OutOfRange("alarm minute"))
        );
    }

    #[test]
    fn alarm_mask_selects_day_kind() {
        let parse = |mask| match Command::parse(&[0x02, 0x03, 30, 6, mask]) {
            Ok(Command::SetAlarm(a)) => a,
            other => panic!("{other:?}"),
        };
        let weekdays = parse(0x80 | 0b0011_1110);
        assert!(weekdays.enabled && weekdays.repeat);
        assert_eq!(weekdays.days, AlarmDays::Weekdays(0b0011_1110));
        assert_eq!(parse(15).days, AlarmDays::DayOfMonth(15));
        assert_eq!(parse(0).days, AlarmDays::EveryDay);
    }

    #[test]
    fn time_registers_are_bcd() {
        let t = dt(2031, 12, 9, 23, 5, 59);
        let regs = t.to_registers();
        assert_eq!(regs[0], 0x59);
        assert_eq!(regs[2], 0x23);
        assert_eq!(regs[5], 0x12);
        assert_eq!(regs[6], 0x31);
        assert_eq!(DateTime::from_registers(&regs), Ok(t));
    }

    #[test]
    fn stopped_oscillator_is_an_error() {
        let mut regs = dt(2030, 1, 1, 0, 0, 0).to_registers();
        regs[0] |= 0x80;
        assert!(DateTime::from_registers(&regs).is_err());
    }

    #[test]
    fn epoch_conversion_matches_known_dates() {
        assert_eq!(dt(2000, 1, 1, 0, 0, 0).to_epoch(), 946_684_800);
        let t = DateTime::from_epoch(1_709_210_096); // 2024-02-29 12:34:56
        assert_eq!((t.year, t.month, t.day), (2024, 2, 29));
        assert_eq!((t.hour, t.minute, t.second), (12, 34, 56));
        assert_eq!(t.weekday, 4);
    }

    #[test]
    fn alarm_registers_set_ae_on_unused_fields() {
        let regs = AlarmRegs {
            minute: Some(30),
            hour: Some(7),
            day: None,
            weekday: Some(1),
        };
        let raw = regs.encode();
        assert_eq!(raw, [0x30, 0x07, 0x80, 0x01]);
        assert_eq!(AlarmRegs::decode(&raw), regs);
        assert_eq!(AlarmRegs::DISABLED.encode(), [0x80; 4]);
    }

    #[test]
    fn weekday_alarm_targets_next_matching_day() {
        // Friday 2024-03-01 08:00, alarm Mon..Fri 07:30
        let now = dt(2024, 3, 1, 8, 0, 0);
        assert_eq!(now.weekday, 5);
        let alarm = Alarm {
            enabled: true,
            repeat: true,
            hour: 7,
            minute: 30,
            days: AlarmDays::Weekdays(0b0011_1110),
        };
        let next = DateTime::from_epoch(alarm.next_fire(&now).unwrap());
        assert_eq!((next.month, next.day, next.weekday), (3, 4, 1));
        assert_eq!(alarm.next_registers(&now).weekday, Some(1));

        let off = Alarm {
            enabled: false,
            ..alarm
        };
        assert_eq!(off.next_registers(&now), AlarmRegs::DISABLED);
    }

    #[test]
    fn persisted_alarm_frame_parses_back() {
        let alarm = Alarm {
            enabled: true,
            repeat: false,
            hour: 6,
            minute: 45,
            days: AlarmDays::DayOfMonth(15),
        };
        assert_eq!(Command::parse(&alarm.to_frame()), Ok(Command::SetAlarm(alarm)));
    }
}
