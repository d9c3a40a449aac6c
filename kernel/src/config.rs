// Device tunables with persistent storage.
// Fixed 24-byte little-endian record in the SETTINGS blob slot; unknown or
// short records fall back to defaults, every load goes through sanitize().

use embedded_storage::Storage;

use crate::drivers::storage::{BlobKey, BlobStore};
use crate::error::Result;

pub const CONFIG_RECORD_LEN: usize = 24;
const CONFIG_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub long_press_ms: u16,        // key held this long -> long click
    pub min_click_gap_ms: u16,     // shorter presses are contact bounce
    pub wait_interval_ms: u32,     // orchestrator idle wake period
    pub inactivity_timeout_s: u16, // no activity this long -> sleep check
    pub full_refresh_every: u16,   // partial refreshes before a forced full one
    pub sleep_default_s: u32,      // timer wake period when nothing else applies
    pub sleep_night_s: u32,        // timer wake period inside the night window
    pub night_start_hour: u8,      // night window [start, end) wraps midnight
    pub night_end_hour: u8,
    pub battery_critical_pct: u8, // at or below: sleep without timer wake
    pub battery_low_pct: u8,      // at or below: stretch sleep 5x
    pub battery_period_s: u16,    // fuel gauge sampling period
    pub charge_delta_mv: u16,     // rise that flags "charging"
    pub motion_wake_high: bool,   // motion INT active level
    pub menu_autoclose_s: u16,    // 0 = menus stay open
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    pub const fn defaults() -> Self {
        Self {
            long_press_ms: 400,
            min_click_gap_ms: 30,
            wait_interval_ms: 5_000,
            inactivity_timeout_s: 20,
            full_refresh_every: 60,
            sleep_default_s: 60,
            sleep_night_s: 3_600,
            night_start_hour: 23,
            night_end_hour: 7,
            battery_critical_pct: 5,
            battery_low_pct: 20,
            battery_period_s: 180,
            charge_delta_mv: 20,
            motion_wake_high: true,
            menu_autoclose_s: 15,
        }
    }

    pub fn sanitize(&mut self) {
        self.long_press_ms = self.long_press_ms.clamp(200, 3_000);
        self.min_click_gap_ms = self.min_click_gap_ms.clamp(5, self.long_press_ms / 2);
        self.wait_interval_ms = self.wait_interval_ms.clamp(1_000, 60_000);
        self.inactivity_timeout_s = self.inactivity_timeout_s.clamp(5, 3_600);
        self.full_refresh_every = self.full_refresh_every.clamp(1, 200);
        self.sleep_default_s = self.sleep_default_s.clamp(10, 86_400);
        self.sleep_night_s = self.sleep_night_s.clamp(self.sleep_default_s, 86_400);
        self.night_start_hour = self.night_start_hour.min(23);
        self.night_end_hour = self.night_end_hour.min(23);
        self.battery_low_pct = self.battery_low_pct.min(50);
        self.battery_critical_pct = self.battery_critical_pct.min(self.battery_low_pct);
        self.battery_period_s = self.battery_period_s.clamp(10, 3_600);
        self.charge_delta_mv = self.charge_delta_mv.clamp(5, 500);
        self.menu_autoclose_s = self.menu_autoclose_s.min(600);
    }

    /// True when `hour` falls inside the night window. An empty window
    /// (start == end) disables the night policy.
    pub fn is_night(&self, hour: u8) -> bool {
        let (start, end) = (self.night_start_hour, self.night_end_hour);
        if start == end {
            false
        } else if start < end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    pub fn to_bytes(&self) -> [u8; CONFIG_RECORD_LEN] {
        let mut b = [0u8; CONFIG_RECORD_LEN];
        b[0] = CONFIG_VERSION;
        b[1..3].copy_from_slice(&self.long_press_ms.to_le_bytes());
        b[3..5].copy_from_slice(&self.min_click_gap_ms.to_le_bytes());
        b[5..7].copy_from_slice(&((self.wait_interval_ms / 100) as u16).to_le_bytes());
        b[7..9].copy_from_slice(&self.inactivity_timeout_s.to_le_bytes());
        b[9..11].copy_from_slice(&self.full_refresh_every.to_le_bytes());
        b[11..13].copy_from_slice(&((self.sleep_default_s / 10) as u16).to_le_bytes());
        b[13..15].copy_from_slice(&((self.sleep_night_s / 10) as u16).to_le_bytes());
        b[15] = self.night_start_hour;
        b[16] = self.night_end_hour;
        b[17] = self.battery_critical_pct;
        b[18] = self.battery_low_pct;
        b[19..21].copy_from_slice(&self.battery_period_s.to_le_bytes());
        b[21] = (self.charge_delta_mv / 5).min(u8::MAX as u16) as u8;
        b[22] = self.motion_wake_high as u8;
        b[23] = (self.menu_autoclose_s / 5).min(u8::MAX as u16) as u8;
        b
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        if b.len() < CONFIG_RECORD_LEN || b[0] != CONFIG_VERSION {
            log::warn!("config: unknown record (len {}), using defaults", b.len());
            return Self::defaults();
        }
        let u16_at = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        let mut cfg = Self {
            long_press_ms: u16_at(1),
            min_click_gap_ms: u16_at(3),
            wait_interval_ms: u16_at(5) as u32 * 100,
            inactivity_timeout_s: u16_at(7),
            full_refresh_every: u16_at(9),
            sleep_default_s: u16_at(11) as u32 * 10,
            sleep_night_s: u16_at(13) as u32 * 10,
            night_start_hour: b[15],
            night_end_hour: b[16],
            battery_critical_pct: b[17],
            battery_low_pct: b[18],
            battery_period_s: u16_at(19),
            charge_delta_mv: b[21] as u16 * 5,
            motion_wake_high: b[22] != 0,
            menu_autoclose_s: b[23] as u16 * 5,
        };
        cfg.sanitize();
        cfg
    }

    /// Settings from flash; defaults when the slot is empty or corrupt.
    /// An empty slot, a record from another version or clamped values
    /// are written back, so the slot holds what actually runs.
    pub fn load<S: Storage>(store: &mut BlobStore<S>) -> Self {
        let mut buf = [0u8; CONFIG_RECORD_LEN];
        let (cfg, stale) = match store.read(BlobKey::Settings, &mut buf) {
            Ok(Some(len)) => {
                let cfg = Self::from_bytes(&buf[..len]);
                (cfg, buf[..len] != cfg.to_bytes())
            }
            Ok(None) => (Self::defaults(), true),
            Err(e) => {
                log::warn!("config: settings unreadable ({}), using defaults", e);
                return Self::defaults();
            }
        };
        if stale {
            log::info!("config: writing settings record");
            if let Err(e) = cfg.save(store) {
                log::warn!("config: settings not saved: {}", e);
            }
        }
        cfg
    }

    pub fn save<S: Storage>(&self, store: &mut BlobStore<S>) -> Result<()> {
        store.write(BlobKey::Settings, &self.to_bytes())
    }
}
