// Li-ion fuel gauge: voltage -> charge percentage
//
// GPIO reads the cell through a 100K/100K divider (2:1); the ADC runs
// at 11dB attenuation. A small built-in discharge curve gives the level
// until a learned curve is available. The learned curve is one battery
// voltage sample per gauge period, captured from full to empty, so
// sample i of n sits at (n-1-i)/(n-1) of the charge.
//
// Learned curve handling:
//   - first and last GUARD_SAMPLES samples are dropped (charger
//     hand-off at the top, brown-out noise at the bottom)
//   - voltages are clamped to be non-increasing over time
//   - a run of equal clamped voltages (plateau, or noise that went up)
//     collapses to one breakpoint at the run's highest percentage, so
//     the next segment spans the whole plateau band
//
// Both curves give a level that is monotone in voltage and saturates
// at 0 and 100.

use embedded_storage::Storage;

use super::storage::{BlobKey, BlobStore};
use crate::config::Config;
use crate::error::Result;
use crate::retained::GaugeResume;

const DIVIDER_MULT: u32 = 2;

/// Breakpoints at 100%, 90%, .. 0%, non-increasing.
pub const DEFAULT_CURVE: [u16; 11] = [
    4200, 4060, 3980, 3920, 3870, 3820, 3790, 3770, 3740, 3680, 3450,
];

pub const MAX_CURVE_POINTS: usize = 1000;
pub const CURVE_BLOB_LEN: usize = MAX_CURVE_POINTS * 2;
const GUARD_SAMPLES: usize = 2;
/// Learned points needed (after guards) before the learned curve is used.
pub const MIN_LEARNED_POINTS: usize = 20;

pub fn adc_to_battery_mv(adc_mv: u16, calib_offset_mv: i16) -> u16 {
    let mv = adc_mv as i32 * DIVIDER_MULT as i32 + calib_offset_mv as i32;
    mv.clamp(0, u16::MAX as i32) as u16
}

/// Linear interpolation on a curve with equal percentage bands between
/// consecutive breakpoints.
pub fn level_from_default(curve: &[u16], mv: u16) -> u8 {
    let n = curve.len();
    if n < 2 {
        return 0;
    }
    if mv >= curve[0] {
        return 100;
    }
    if mv <= curve[n - 1] {
        return 0;
    }

    let bands = (n - 1) as u32;
    for i in 0..n - 1 {
        let (hi, lo) = (curve[i] as u32, curve[i + 1] as u32);
        if (mv as u32) >= lo && hi > lo {
            // level at breakpoint i is 100 * (bands - i) / bands
            let top = 100 * (bands - i as u32);
            let frac = 100 * (mv as u32 - lo) / (hi - lo);
            let scaled = top - 100 + frac; // in units of 1/bands percent
            return ((scaled + bands / 2) / bands).min(100) as u8;
        }
    }
    0
}

/// Level from a captured discharge curve, or `None` when too few points.
pub fn level_from_learned(samples: &[u16], mv: u16) -> Option<u8> {
    if samples.len() < MIN_LEARNED_POINTS + 2 * GUARD_SAMPLES {
        return None;
    }
    let pts = &samples[GUARD_SAMPLES..samples.len() - GUARD_SAMPLES];
    let last = (pts.len() - 1) as u32;
    let pct_at = |j: usize| (100 * (last - j as u32) + last / 2) / last;

    let mut upper: Option<(u32, u32)> = None;
    let mut prev_v = u32::MAX;
    for (j, &raw) in pts.iter().enumerate() {
        let v = (raw as u32).min(prev_v);
        if v == prev_v {
            continue;
        }
        prev_v = v;
        let p = pct_at(j);

        let m = mv as u32;
        match upper {
            None if m >= v => return Some(p.min(100) as u8),
            Some((va, pa)) if m >= v => {
                let level = p + ((pa - p) * (m - v) + (va - v) / 2) / (va - v);
                return Some(level.min(100) as u8);
            }
            _ => {}
        }
        upper = Some((v, p));
    }
    Some(0)
}

/// Level changed between two consecutive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChanged {
    pub level: u8,
    pub charging: bool,
}

/// Snapshot for pages and the sleep policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryStatus {
    pub valid: bool,
    pub mv: u16,
    pub level: u8,
    pub charging: bool,
    pub capturing: bool,
    pub curve_points: u16,
    pub learned: bool,
}

pub struct FuelGauge {
    curve: [u16; MAX_CURVE_POINTS],
    curve_len: usize,
    capturing: bool,
    curve_dirty: bool,
    charge_delta_mv: u16,
    period_s: u32,
    history: [Option<u16>; 2], // [previous, one before]
    level: Option<u8>,
    mv: u16,
    charging: bool,
    sample_epoch: Option<u32>,
}

impl Default for FuelGauge {
    fn default() -> Self {
        Self::new(Config::defaults().charge_delta_mv)
    }
}

impl FuelGauge {
    pub const fn new(charge_delta_mv: u16) -> Self {
        Self {
            curve: [0; MAX_CURVE_POINTS],
            curve_len: 0,
            capturing: false,
            curve_dirty: false,
            charge_delta_mv,
            period_s: Config::defaults().battery_period_s as u32,
            history: [None; 2],
            level: None,
            mv: 0,
            charging: false,
            sample_epoch: None,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            period_s: cfg.battery_period_s as u32,
            ..Self::new(cfg.charge_delta_mv)
        }
    }

    /// A gauge period has passed since the last sample, across deep
    /// sleeps too. Without wall time every wake samples.
    pub fn sample_due(&self, epoch: Option<u32>) -> bool {
        match (self.sample_epoch, epoch) {
            (Some(last), Some(now)) => now < last || now - last >= self.period_s,
            _ => true,
        }
    }

    /// Record when the latest sample was taken.
    pub fn mark_sampled(&mut self, epoch: Option<u32>) {
        self.sample_epoch = epoch;
    }

    pub fn uses_learned_curve(&self) -> bool {
        !self.capturing && self.curve_len >= MIN_LEARNED_POINTS + 2 * GUARD_SAMPLES
    }

    pub fn voltage_to_level(&self, mv: u16) -> u8 {
        if self.uses_learned_curve()
            && let Some(level) = level_from_learned(&self.curve[..self.curve_len], mv)
        {
            return level;
        }
        level_from_default(&DEFAULT_CURVE, mv)
    }

    /// Feed one calibrated battery sample. Returns an event only when the
    /// integer level differs from the previous sample's.
    pub fn on_sample(&mut self, mv: u16) -> Option<LevelChanged> {
        let delta = self.charge_delta_mv;
        let rose = |prev: Option<u16>| prev.is_some_and(|p| mv >= p.saturating_add(delta));
        self.charging = rose(self.history[0]) || rose(self.history[1]);
        self.history = [Some(mv), self.history[0]];
        self.mv = mv;

        if self.capturing {
            self.capture(mv);
        }

        let level = self.voltage_to_level(mv);
        let previous = self.level.replace(level);
        match previous {
            Some(prev) if prev != level => {
                log::info!("battery: {}mV {}% -> {}%", mv, prev, level);
                Some(LevelChanged {
                    level,
                    charging: self.charging,
                })
            }
            _ => None,
        }
    }

    fn capture(&mut self, mv: u16) {
        if self.curve_len >= MAX_CURVE_POINTS {
            log::warn!("battery: curve full at {} points, capture stopped", self.curve_len);
            self.capturing = false;
            return;
        }
        self.curve[self.curve_len] = mv;
        self.curve_len += 1;
        self.curve_dirty = true;
    }

    /// Start a fresh capture; the previous curve is discarded.
    pub fn start_capture(&mut self) {
        log::info!("battery: curve capture started");
        self.curve_len = 0;
        self.capturing = true;
        self.curve_dirty = true;
    }

    pub fn stop_capture(&mut self) {
        if self.capturing {
            log::info!("battery: curve capture stopped at {} points", self.curve_len);
        }
        self.capturing = false;
    }

    pub fn clear_curve(&mut self) {
        log::info!("battery: learned curve cleared");
        self.curve_len = 0;
        self.capturing = false;
        self.curve_dirty = true;
    }

    /// Resume a capture that was running before deep sleep. Flash may
    /// hold points the running capture never had (an older curve, or
    /// samples that were not saved yet): only the first `count` belong
    /// to it.
    pub fn restore_capture(&mut self, capturing: bool, count: u16) {
        if capturing && self.curve_len > count as usize {
            log::warn!(
                "battery: flash curve has {} points, capture had {}",
                self.curve_len,
                count
            );
            self.curve_len = count as usize;
            self.curve_dirty = true;
        }
        self.capturing = capturing && self.curve_len < MAX_CURVE_POINTS;
    }

    /// Sample history and level for the retained image.
    pub fn resume_state(&self) -> GaugeResume {
        GaugeResume {
            history: self.history,
            level: self.level,
            sample_epoch: self.sample_epoch,
        }
    }

    /// Continue from the samples taken before deep sleep.
    pub fn restore(&mut self, resume: &GaugeResume) {
        self.history = resume.history;
        self.level = resume.level;
        self.sample_epoch = resume.sample_epoch;
        self.mv = resume.history[0].unwrap_or(0);
    }

    /// The curve changed since it was last loaded or written.
    pub fn needs_persist(&self) -> bool {
        self.curve_dirty
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn curve_len(&self) -> usize {
        self.curve_len
    }

    pub fn level(&self) -> Option<u8> {
        self.level
    }

    pub fn is_charging(&self) -> bool {
        self.charging
    }

    pub fn status(&self) -> BatteryStatus {
        BatteryStatus {
            valid: self.level.is_some(),
            mv: self.mv,
            level: self.level.unwrap_or(0),
            charging: self.charging,
            capturing: self.capturing,
            curve_points: self.curve_len as u16,
            learned: self.uses_learned_curve(),
        }
    }

    /// Load the persisted curve. A missing blob is normal and leaves the
    /// default curve in charge.
    pub fn load_curve<S: Storage>(&mut self, store: &mut BlobStore<S>) -> Result<()> {
        let mut buf = [0u8; CURVE_BLOB_LEN];
        match store.read(BlobKey::BatteryCurve, &mut buf)? {
            Some(len) => {
                self.curve_len = (len / 2).min(MAX_CURVE_POINTS);
                for (dst, src) in self.curve.iter_mut().zip(buf[..len].chunks_exact(2)) {
                    *dst = u16::from_le_bytes([src[0], src[1]]);
                }
                log::info!("battery: loaded curve, {} points", self.curve_len);
            }
            None => {
                self.curve_len = 0;
                log::info!("battery: no learned curve, using default");
            }
        }
        self.curve_dirty = false;
        Ok(())
    }

    /// Write the curve back if it changed since the last load/persist.
    pub fn persist_curve<S: Storage>(&mut self, store: &mut BlobStore<S>) -> Result<()> {
        if !self.curve_dirty {
            return Ok(());
        }
        if self.curve_len == 0 {
            store.remove(BlobKey::BatteryCurve)?;
        } else {
            let mut buf = [0u8; CURVE_BLOB_LEN];
            for (dst, v) in buf.chunks_exact_mut(2).zip(&self.curve[..self.curve_len]) {
                dst.copy_from_slice(&v.to_le_bytes());
            }
            store.write(BlobKey::BatteryCurve, &buf[..self.curve_len * 2])?;
        }
        self.curve_dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::storage::mock::RamFlash;
    use super::*;

    // linear discharge 4150 -> 3400 with a plateau in the middle
    fn learned_samples() -> Vec<u16> {
        let mut v: Vec<u16> = (0..40).map(|i| 4150 - i * 10).collect();
        v.extend([3760; 20]);
        v.extend((0..40).map(|i| 3750 - i * 9));
        v
    }

    fn gauge_with(samples: &[u16]) -> FuelGauge {
        let mut g = FuelGauge::default();
        g.curve[..samples.len()].copy_from_slice(samples);
        g.curve_len = samples.len();
        g
    }

    #[test]
    fn adc_reading_is_doubled_and_offset() {
        assert_eq!(adc_to_battery_mv(1900, 0), 3800);
        assert_eq!(adc_to_battery_mv(1900, -25), 3775);
        assert_eq!(adc_to_battery_mv(0, -25), 0);
    }

    #[test]
    fn default_curve_saturates_and_hits_breakpoints() {
        assert_eq!(level_from_default(&DEFAULT_CURVE, 4300), 100);
        assert_eq!(level_from_default(&DEFAULT_CURVE, 4200), 100);
        assert_eq!(level_from_default(&DEFAULT_CURVE, 3820), 50);
        assert_eq!(level_from_default(&DEFAULT_CURVE, 3450), 0);
        assert_eq!(level_from_default(&DEFAULT_CURVE, 3000), 0);
        assert_eq!(level_from_default(&DEFAULT_CURVE, 3845), 55);
    }

    #[test]
    fn default_curve_is_monotone() {
        let mut last = 0;
        for mv in 3000..4400u16 {
            let l = level_from_default(&DEFAULT_CURVE, mv);
            assert!(l >= last, "{mv}mV gave {l} after {last}");
            last = l;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn learned_curve_is_monotone_and_saturating() {
        let samples = learned_samples();
        let mut last = 0;
        for mv in 3000..4400u16 {
            let l = level_from_learned(&samples, mv).unwrap();
            assert!(l >= last, "{mv}mV gave {l} after {last}");
            assert!(l <= 100);
            last = l;
        }
        assert_eq!(level_from_learned(&samples, 4400), Some(100));
        assert_eq!(level_from_learned(&samples, 3000), Some(0));
    }

    #[test]
    fn plateau_spans_its_whole_band() {
        let samples = learned_samples();
        let at_plateau = level_from_learned(&samples, 3760).unwrap();
        let below = level_from_learned(&samples, 3750).unwrap();
        // the 20-sample plateau is roughly 20% of the curve
        assert!(at_plateau - below >= 15, "{at_plateau} vs {below}");
    }

    #[test]
    fn noisy_rise_does_not_break_monotonicity() {
        let mut samples: Vec<u16> = (0..30).map(|i| 4100 - i * 20).collect();
        samples[10] = 4100; // noise spike
        let mut last = 0;
        for mv in 3400..4200u16 {
            let l = level_from_learned(&samples, mv).unwrap();
            assert!(l >= last);
            last = l;
        }
    }

    #[test]
    fn short_curve_falls_back_to_default() {
        let g = gauge_with(&[4000; 10]);
        assert!(!g.uses_learned_curve());
        assert_eq!(g.voltage_to_level(3820), 50);
        assert_eq!(level_from_learned(&[4000; 10], 3900), None);
    }

    #[test]
    fn capture_in_progress_uses_default_curve() {
        let mut g = gauge_with(&learned_samples());
        assert!(g.uses_learned_curve());
        g.restore_capture(true, u16::MAX);
        assert!(!g.uses_learned_curve());
        assert_eq!(g.curve_len(), learned_samples().len());
        assert_eq!(g.voltage_to_level(3820), 50);
    }

    #[test]
    fn first_sample_is_baseline_then_changes_only() {
        let mut g = FuelGauge::default();
        let events: Vec<_> = [3700u16, 3700, 3650]
            .iter()
            .filter_map(|&mv| g.on_sample(mv))
            .collect();
        assert!(events.len() <= 1);
        assert_eq!(g.level(), Some(level_from_default(&DEFAULT_CURVE, 3650)));
    }

    #[test]
    fn rising_voltage_flags_charging() {
        let mut g = FuelGauge::new(20);
        g.on_sample(3800);
        assert!(!g.is_charging());
        g.on_sample(3810);
        assert!(!g.is_charging());
        g.on_sample(3822); // +22 over two samples
        assert!(g.is_charging());
        g.on_sample(3822);
        assert!(!g.is_charging());
    }

    #[test]
    fn capture_appends_and_persists() {
        let mut store = BlobStore::new(RamFlash::new(0x4000), 0);
        let mut g = FuelGauge::default();
        g.start_capture();
        for mv in [4100u16, 4090, 4080] {
            g.on_sample(mv);
        }
        assert_eq!(g.curve_len(), 3);
        g.persist_curve(&mut store).unwrap();

        let mut restored = FuelGauge::default();
        restored.load_curve(&mut store).unwrap();
        assert_eq!(restored.curve_len(), 3);
        assert_eq!(&restored.curve[..3], &[4100, 4090, 4080]);

        restored.clear_curve();
        restored.persist_curve(&mut store).unwrap();
        let mut empty = FuelGauge::default();
        empty.load_curve(&mut store).unwrap();
        assert_eq!(empty.curve_len(), 0);
    }

    #[test]
    fn resumed_capture_drops_points_it_never_took() {
        let mut g = gauge_with(&[4000; 30]);
        g.restore_capture(true, 0);
        assert!(g.is_capturing());
        assert_eq!(g.curve_len(), 0);
        assert!(g.needs_persist());
        g.on_sample(4150);
        assert_eq!(g.curve_len(), 1);

        let mut idle = gauge_with(&[4000; 30]);
        idle.restore_capture(false, 0);
        assert_eq!(idle.curve_len(), 30);
        assert!(!idle.needs_persist());
    }

    #[test]
    fn charging_seen_across_a_restore() {
        let mut before = FuelGauge::new(20);
        before.on_sample(3700);
        let resume = before.resume_state();

        let mut after = FuelGauge::new(20);
        after.restore(&resume);
        assert!(after.status().valid);
        assert_eq!(after.status().mv, 3700);
        after.on_sample(3760);
        assert!(after.is_charging());
    }

    #[test]
    fn level_event_after_restore() {
        let mut before = FuelGauge::default();
        before.on_sample(4200);
        let mut after = FuelGauge::default();
        after.restore(&before.resume_state());
        assert_eq!(
            after.on_sample(3820),
            Some(LevelChanged {
                level: 50,
                charging: false
            })
        );
    }

    #[test]
    fn sampling_follows_the_gauge_period() {
        let mut cfg = Config::defaults();
        cfg.battery_period_s = 180;
        let mut g = FuelGauge::from_config(&cfg);
        assert!(g.sample_due(Some(1_000)));
        g.mark_sampled(Some(1_000));
        assert!(!g.sample_due(Some(1_060)));
        assert!(!g.sample_due(Some(1_179)));
        assert!(g.sample_due(Some(1_180)));
        // clock set backwards, or unknown
        assert!(g.sample_due(Some(900)));
        assert!(g.sample_due(None));
    }
}
