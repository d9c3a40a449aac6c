// State that survives deep sleep, as a fixed 64-byte image.
//
// The firmware keeps the image in RTC fast RAM; everything else is lost
// when the chip sleeps. A bad magic, version or checksum (power loss,
// first boot, layout change) decodes to `None` and boot treats it as cold.
//
//   0..4    magic "IMRS"
//   4       version
//   5       current page id (0xFF = none)
//   6       parent page id (0xFF = none)
//   7       flags: bit0 curve capture, bit1 timer running
//   8..12   boot counter
//   12..14  captured curve samples
//   14      timer phase
//   15      timer round
//   16..20  timer phase start (epoch s)
//   20..24  timer phase end (epoch s)
//   24..28  wall clock at sleep entry (epoch s)
//   28      display rotation
//   29..31  previous battery sample (mV, 0 = none)
//   31..33  battery sample before that (mV, 0 = none)
//   33      last battery level (0xFF = none)
//   34..38  wall clock of the last battery sample (epoch s, 0 = never)
//   38..60  reserved, zero
//   60..64  FNV-1a over 0..60

use crate::drivers::storage::checksum32;

pub const RETAINED_LEN: usize = 64;
pub const NO_PAGE: u8 = 0xFF;

const MAGIC: u32 = 0x5352_4D49; // "IMRS"
const VERSION: u8 = 2;
const CHECKSUM_AT: usize = RETAINED_LEN - 4;

const NO_LEVEL: u8 = 0xFF;

const FLAG_CAPTURE: u8 = 1 << 0;
const FLAG_TIMER: u8 = 1 << 1;

/// Interval timer position, owned by the timer page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerResume {
    pub running: bool,
    pub phase: u8,
    pub round: u8,
    pub phase_start: u32,
    pub phase_end: u32,
}

/// Fuel gauge baseline: the charging heuristic and level events compare
/// against the samples taken before the sleep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaugeResume {
    /// [previous, one before]
    pub history: [Option<u16>; 2],
    pub level: Option<u8>,
    pub sample_epoch: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetainedState {
    pub boot_count: u32,
    pub current_page: u8,
    pub parent_page: u8,
    pub capturing: bool,
    pub capture_count: u16,
    pub timer: TimerResume,
    pub sleep_epoch: u32,
    pub rotation: u8,
    pub gauge: GaugeResume,
}

impl Default for RetainedState {
    fn default() -> Self {
        Self::cold()
    }
}

impl RetainedState {
    pub const fn cold() -> Self {
        Self {
            boot_count: 0,
            current_page: NO_PAGE,
            parent_page: NO_PAGE,
            capturing: false,
            capture_count: 0,
            timer: TimerResume {
                running: false,
                phase: 0,
                round: 0,
                phase_start: 0,
                phase_end: 0,
            },
            sleep_epoch: 0,
            rotation: 0,
            gauge: GaugeResume {
                history: [None; 2],
                level: None,
                sample_epoch: None,
            },
        }
    }

    pub fn encode(&self) -> [u8; RETAINED_LEN] {
        let mut b = [0u8; RETAINED_LEN];
        b[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        b[4] = VERSION;
        b[5] = self.current_page;
        b[6] = self.parent_page;
        let mut flags = 0;
        if self.capturing {
            flags |= FLAG_CAPTURE;
        }
        if self.timer.running {
            flags |= FLAG_TIMER;
        }
        b[7] = flags;
        b[8..12].copy_from_slice(&self.boot_count.to_le_bytes());
        b[12..14].copy_from_slice(&self.capture_count.to_le_bytes());
        b[14] = self.timer.phase;
        b[15] = self.timer.round;
        b[16..20].copy_from_slice(&self.timer.phase_start.to_le_bytes());
        b[20..24].copy_from_slice(&self.timer.phase_end.to_le_bytes());
        b[24..28].copy_from_slice(&self.sleep_epoch.to_le_bytes());
        b[28] = self.rotation;
        b[29..31].copy_from_slice(&self.gauge.history[0].unwrap_or(0).to_le_bytes());
        b[31..33].copy_from_slice(&self.gauge.history[1].unwrap_or(0).to_le_bytes());
        b[33] = self.gauge.level.unwrap_or(NO_LEVEL);
        b[34..38].copy_from_slice(&self.gauge.sample_epoch.unwrap_or(0).to_le_bytes());
        let sum = checksum32(&b[..CHECKSUM_AT]);
        b[CHECKSUM_AT..].copy_from_slice(&sum.to_le_bytes());
        b
    }

    /// `None` means the image is not ours: treat the boot as cold.
    pub fn decode(b: &[u8; RETAINED_LEN]) -> Option<Self> {
        let u32_at = |i: usize| u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        let mv_at = |i: usize| Some(u16::from_le_bytes([b[i], b[i + 1]])).filter(|&mv| mv != 0);
        if u32_at(0) != MAGIC || b[4] != VERSION || u32_at(CHECKSUM_AT) != checksum32(&b[..CHECKSUM_AT]) {
            return None;
        }
        Some(Self {
            boot_count: u32_at(8),
            current_page: b[5],
            parent_page: b[6],
            capturing: b[7] & FLAG_CAPTURE != 0,
            capture_count: u16::from_le_bytes([b[12], b[13]]),
            timer: TimerResume {
                running: b[7] & FLAG_TIMER != 0,
                phase: b[14],
                round: b[15],
                phase_start: u32_at(16),
                phase_end: u32_at(20),
            },
            sleep_epoch: u32_at(24),
            rotation: b[28],
            gauge: GaugeResume {
                history: [mv_at(29), mv_at(31)],
                level: Some(b[33]).filter(|&l| l != NO_LEVEL),
                sample_epoch: Some(u32_at(34)).filter(|&e| e != 0),
            },
        })
    }

    /// Decode a retained image at boot: a valid image is a warm boot, any
    /// other content starts from scratch. The boot counter is advanced.
    pub fn on_boot(b: &[u8; RETAINED_LEN]) -> (Self, bool) {
        match Self::decode(b) {
            Some(mut state) => {
                state.boot_count = state.boot_count.wrapping_add(1);
                log::info!("retained: warm boot #{}", state.boot_count);
                (state, true)
            }
            None => {
                log::info!("retained: no valid image, cold boot");
                let mut state = Self::cold();
                state.boot_count = 1;
                (state, false)
            }
        }
    }
}
