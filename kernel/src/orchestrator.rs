// Display orchestration loop and deep-sleep hand-off
//
// One cooperative loop owns the framebuffer and the panel. Each step:
//   wait (redraw request or timeout, skipped on loop 1 / timer wake)
//   tick clock + menu deadline
//   inactivity / timer-wake -> ask the page manager for a sleep decision
//   draw pass if due: full on loop 1, every N partials, before sleep or
//     on request; partial otherwise
//   concrete sleep decision -> panel sleep, persist, retained snapshot,
//     Sleep
//
// Page manager and fuel gauge live in `Device`, behind one async mutex
// shared with the key and battery tasks.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;

use crate::apps::{GaugeCommand, PageManager, SleepDecision, SleepInputs};
use crate::config::Config;
use crate::display::Framebuffer;
use crate::drivers::battery::FuelGauge;
use crate::drivers::input::KeyEvent;
use crate::drivers::ssd1681::PanelSink;
use crate::error::Result;
use crate::protocol::Command;
use crate::retained::RetainedState;
use crate::wake::{ActivityTracker, RedrawRequests};

/// Wake sources armed for a deep sleep. The Ok/Up buttons and the RTC
/// alarm line (all active low) are always armed; the timer only when
/// the decision asks for one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakePlan {
    pub timer_s: Option<u32>,
    /// active level of the motion INT line
    pub motion_high: bool,
}

impl WakePlan {
    /// `None` for decisions that keep the device awake.
    pub fn for_decision(decision: SleepDecision, cfg: &Config) -> Option<Self> {
        let timer_s = match decision {
            SleepDecision::Seconds(0) | SleepDecision::NoTimerWake => None,
            SleepDecision::Seconds(s) => Some(s),
            SleepDecision::NeverSleep | SleepDecision::NoSleepNow => return None,
        };
        Some(Self {
            timer_s,
            motion_high: cfg.motion_wake_high,
        })
    }

    /// Timer, buttons, motion, alarm.
    pub fn source_count(&self) -> usize {
        3 + self.timer_s.is_some() as usize
    }
}

/// State shared by the key task, the battery task and the orchestrator.
pub struct Device {
    pub pages: PageManager,
    pub gauge: FuelGauge,
    cfg: Config,
    activity: &'static ActivityTracker,
}

pub type SharedDevice = Mutex<CriticalSectionRawMutex, Device>;

impl Device {
    pub fn new(
        cfg: &Config,
        redraw: &'static RedrawRequests,
        activity: &'static ActivityTracker,
    ) -> Self {
        Self {
            pages: PageManager::new(cfg, redraw),
            gauge: FuelGauge::from_config(cfg),
            cfg: *cfg,
            activity,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Navigation, capture and gauge state after boot. Call after the
    /// curve has been loaded from flash.
    pub fn init(&mut self, retained: Option<&RetainedState>) {
        self.pages.init(retained);
        if let Some(r) = retained {
            self.gauge.restore(&r.gauge);
            self.gauge.restore_capture(r.capturing, r.capture_count);
        }
        self.pages.set_battery(self.gauge.status());
    }

    pub fn handle_key(&mut self, ev: KeyEvent, now_ms: u64) {
        self.activity.touch(now_ms);
        log::info!("key: {} {:?}", ev.key, ev.click);
        if self.pages.handle_key(ev, now_ms) {
            self.pages.request_update(false);
        }
        self.run_gauge_commands();
    }

    fn run_gauge_commands(&mut self) {
        let mut changed = false;
        while let Some(cmd) = self.pages.take_gauge_command() {
            match cmd {
                GaugeCommand::ToggleCapture if self.gauge.is_capturing() => {
                    self.gauge.stop_capture()
                }
                GaugeCommand::ToggleCapture => self.gauge.start_capture(),
                GaugeCommand::ClearCurve => self.gauge.clear_curve(),
            }
            changed = true;
        }
        if changed {
            self.pages.set_battery(self.gauge.status());
        }
    }

    /// Apply a decoded configuration frame. RTC register writes are the
    /// board's job; this updates what the pages see.
    pub fn apply_command(&mut self, cmd: Command, now_ms: u64) -> Result<()> {
        self.activity.touch(now_ms);
        match cmd {
            Command::SetTime(dt) => {
                dt.validate()?;
                log::info!(
                    "config: time {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    dt.year, dt.month, dt.day, dt.hour, dt.minute, dt.second
                );
                self.pages.set_clock(Some(dt.to_epoch()));
            }
            Command::SetAlarm(alarm) => {
                alarm.validate()?;
                log::info!("config: alarm {:02}:{:02} {:?}", alarm.hour, alarm.minute, alarm.days);
                self.pages.set_alarm(alarm);
            }
            Command::StartCapture => self.gauge.start_capture(),
            Command::ClearCurve => self.gauge.clear_curve(),
        }
        self.pages.set_battery(self.gauge.status());
        Ok(())
    }

    /// One battery sample, taken at wall time `epoch` when known.
    pub fn on_battery_sample(&mut self, mv: u16, epoch: Option<u32>) {
        self.gauge.mark_sampled(epoch);
        match self.gauge.on_sample(mv) {
            Some(_) => self.pages.set_battery(self.gauge.status()),
            None => self.pages.model.battery = self.gauge.status(),
        }
    }

    pub fn sleep_inputs(&self) -> SleepInputs {
        SleepInputs {
            battery: self.gauge.status(),
            epoch: self.pages.model.epoch,
        }
    }

    /// Full retained image for the coming deep sleep.
    pub fn snapshot(&self, base: &RetainedState, sleep_epoch: Option<u32>) -> RetainedState {
        RetainedState {
            capturing: self.gauge.is_capturing(),
            capture_count: self.gauge.curve_len() as u16,
            sleep_epoch: sleep_epoch.unwrap_or(0),
            gauge: self.gauge.resume_state(),
            ..self.pages.snapshot(base)
        }
    }
}

/// Board services the loop needs.
#[allow(async_fn_in_trait)]
pub trait Platform {
    fn now_ms(&self) -> u64;

    /// Wall clock, `None` until the RTC has been set.
    fn epoch(&self) -> Option<u32>;

    /// The MCU came out of deep sleep through the sleep timer.
    fn woke_from_timer(&self) -> bool;

    /// Return when a redraw is requested or `timeout_ms` passes.
    async fn wait_wake(&mut self, redraw: &RedrawRequests, timeout_ms: u64);

    /// Write back device state that only lives in RAM (the learned
    /// curve) before the retained image is taken.
    async fn persist(&mut self, device: &mut Device);

    fn deep_sleep(&mut self, plan: WakePlan, retained: &RetainedState) -> !;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Idle,
    Drew { full: bool },
    Sleep(SleepDecision),
}

pub struct Orchestrator<'a, P, D> {
    platform: P,
    panel: D,
    device: &'a SharedDevice,
    redraw: &'a RedrawRequests,
    activity: &'a ActivityTracker,
    cfg: Config,
    fb: Framebuffer,
    loop_count: u32,
    last_full_loop: u32,
    partials_since_full: u32,
    last_inactivity_check: u64,
    retained: RetainedState,
}

impl<'a, P: Platform, D: PanelSink> Orchestrator<'a, P, D> {
    pub fn new(
        platform: P,
        panel: D,
        device: &'a SharedDevice,
        redraw: &'a RedrawRequests,
        activity: &'a ActivityTracker,
        cfg: &Config,
        retained: RetainedState,
    ) -> Self {
        Self {
            platform,
            panel,
            device,
            redraw,
            activity,
            cfg: *cfg,
            fb: Framebuffer::new(),
            loop_count: 0,
            last_full_loop: 0,
            partials_since_full: 0,
            last_inactivity_check: 0,
            retained,
        }
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn last_full_loop(&self) -> u32 {
        self.last_full_loop
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn panel(&self) -> &D {
        &self.panel
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    /// Image written to retained memory before the last `Sleep` outcome.
    pub fn retained(&self) -> &RetainedState {
        &self.retained
    }

    fn inactive(&mut self, now: u64) -> bool {
        let window = self.cfg.inactivity_timeout_s as u64 * 1_000;
        if now.saturating_sub(self.last_inactivity_check) < window {
            return false;
        }
        self.last_inactivity_check = now;
        self.activity.idle_for(now) >= window
    }

    /// One loop iteration.
    pub async fn step(&mut self) -> StepOutcome {
        let first = self.loop_count == 0;
        let timer_wake = first && self.platform.woke_from_timer();
        if !(first || timer_wake || self.redraw.is_pending()) {
            self.platform
                .wait_wake(self.redraw, self.cfg.wait_interval_ms as u64)
                .await;
        }

        let now = self.platform.now_ms();
        let epoch = self.platform.epoch();
        let inactive = self.inactive(now);

        let decision = {
            let mut dev = self.device.lock().await;
            dev.pages.set_clock(epoch);
            dev.pages.poll_timers(now);
            if inactive || timer_wake {
                let d = dev.pages.enter_sleep(self.loop_count, &dev.sleep_inputs());
                log::info!(
                    "orchestrator: sleep check ({}) -> {:?}",
                    if timer_wake { "timer wake" } else { "inactive" },
                    d
                );
                Some(d)
            } else {
                None
            }
        };
        let plan = decision.and_then(|d| WakePlan::for_decision(d, &self.cfg));

        let requested = self.redraw.begin_pass();
        let mut outcome = StepOutcome::Idle;
        if requested.is_some() || first || timer_wake || plan.is_some() {
            let full = first
                || self.partials_since_full + 1 >= self.cfg.full_refresh_every as u32
                || plan.is_some()
                || requested == Some(true);
            self.draw_pass(full, plan.is_some(), first).await;
            outcome = StepOutcome::Drew { full };
        } else {
            self.redraw.finish_pass();
        }

        if let (Some(d), Some(plan)) = (decision, plan) {
            if let Err(e) = self.panel.sleep().await {
                log::error!("orchestrator: panel sleep failed: {}", e);
            }
            let mut dev = self.device.lock().await;
            self.platform.persist(&mut dev).await;
            self.retained = dev.snapshot(&self.retained, epoch);
            log::info!(
                "orchestrator: deep sleep {:?}, {} wake sources",
                d,
                plan.source_count()
            );
            return StepOutcome::Sleep(d);
        }
        outcome
    }

    async fn draw_pass(&mut self, full: bool, before_sleep: bool, first: bool) {
        let pass = self.loop_count + 1;
        {
            let mut dev = self.device.lock().await;
            if before_sleep {
                dev.pages.prepare_sleep();
            }
            if first {
                self.fb.set_rotation(dev.pages.rotation());
            }
            if let Some(r) = dev.pages.take_rotation() {
                log::info!("orchestrator: rotation {:?}", r);
                self.fb.set_rotation(r);
            }
            dev.pages.draw(&mut self.fb, pass);
        }

        if let Err(e) = self.panel.show(&self.fb, full).await {
            log::error!("orchestrator: panel refresh failed: {}", e);
        }
        self.redraw.finish_pass();

        self.device.lock().await.pages.after_draw(pass);
        self.loop_count = pass;
        if full {
            self.last_full_loop = pass;
            self.partials_since_full = 0;
        } else {
            self.partials_since_full += 1;
        }
        log::debug!("orchestrator: loop {} {}", pass, if full { "full" } else { "partial" });
    }

    /// Run forever; deep sleep does not return.
    pub async fn run(mut self) -> ! {
        loop {
            if let StepOutcome::Sleep(d) = self.step().await {
                match WakePlan::for_decision(d, &self.cfg) {
                    Some(plan) => self.platform.deep_sleep(plan, &self.retained),
                    None => log::warn!("orchestrator: {:?} is not a sleep", d),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::PageId;
    use crate::apps::tests::leaked_requests;
    use crate::drivers::input::Key;
    use crate::drivers::storage::mock::RamFlash;
    use crate::drivers::storage::{BlobKey, BlobStore};
    use crate::error::Error;
    use embassy_futures::block_on;

    // 2024-03-01 14:00:00, a Friday afternoon
    const DAY_EPOCH: u32 = 1_709_301_600;

    struct MockPlatform {
        now: u64,
        epoch_base: Option<u32>,
        timer_wake: bool,
        waits: u32,
        persisted: Vec<bool>,
    }

    impl Platform for MockPlatform {
        fn now_ms(&self) -> u64 {
            self.now
        }

        fn epoch(&self) -> Option<u32> {
            self.epoch_base.map(|e| e + (self.now / 1_000) as u32)
        }

        fn woke_from_timer(&self) -> bool {
            self.timer_wake
        }

        async fn wait_wake(&mut self, redraw: &RedrawRequests, timeout_ms: u64) {
            self.waits += 1;
            if !redraw.is_pending() {
                self.now += timeout_ms;
            }
        }

        async fn persist(&mut self, device: &mut Device) {
            self.persisted.push(device.gauge.needs_persist());
        }

        fn deep_sleep(&mut self, _plan: WakePlan, _retained: &RetainedState) -> ! {
            panic!("deep sleep in test");
        }
    }

    #[derive(Default)]
    struct MockPanel {
        shows: Vec<bool>,
        sleeps: u32,
        fail: bool,
    }

    impl PanelSink for MockPanel {
        async fn show(&mut self, _fb: &Framebuffer, full: bool) -> Result<()> {
            self.shows.push(full);
            if self.fail {
                Err(Error::BusyTimeout)
            } else {
                Ok(())
            }
        }

        async fn sleep(&mut self) -> Result<()> {
            self.sleeps += 1;
            Ok(())
        }
    }

    struct Rig {
        device: &'static SharedDevice,
        redraw: &'static RedrawRequests,
        activity: &'static ActivityTracker,
    }

    fn rig(retained: Option<&RetainedState>) -> Rig {
        let redraw = leaked_requests();
        let activity: &'static ActivityTracker = Box::leak(Box::new(ActivityTracker::new()));
        let mut dev = Device::new(&Config::defaults(), redraw, activity);
        dev.init(retained);
        let device: &'static SharedDevice = Box::leak(Box::new(Mutex::new(dev)));
        Rig {
            device,
            redraw,
            activity,
        }
    }

    fn orchestrator(
        r: &Rig,
        epoch_base: Option<u32>,
    ) -> Orchestrator<'static, MockPlatform, MockPanel> {
        let platform = MockPlatform {
            now: 0,
            epoch_base,
            timer_wake: false,
            waits: 0,
            persisted: Vec::new(),
        };
        Orchestrator::new(
            platform,
            MockPanel::default(),
            r.device,
            r.redraw,
            r.activity,
            &Config::defaults(),
            RetainedState::cold(),
        )
    }

    #[test]
    fn cold_boot_draws_full_once_then_waits() {
        let r = rig(None);
        let mut o = orchestrator(&r, None);
        // keep the inactivity check out of the way
        r.activity.touch(1_000_000);

        assert_eq!(block_on(o.step()), StepOutcome::Drew { full: true });
        assert_eq!(o.platform_mut().waits, 0);
        assert_eq!(block_on(r.device.lock()).pages.current(), Some(PageId::Clock));

        assert_eq!(block_on(o.step()), StepOutcome::Idle);
        assert_eq!(o.platform_mut().now, 5_000);
        assert_eq!(o.panel().shows, [true]);

        block_on(r.device.lock()).handle_key(KeyEvent::long(Key::Down), 5_100);
        assert_eq!(block_on(o.step()), StepOutcome::Drew { full: true });
        assert_eq!(o.loop_count(), 2);
    }

    #[test]
    fn full_refresh_at_least_every_sixty_passes() {
        let r = rig(None);
        let mut o = orchestrator(&r, None);
        r.activity.touch(u64::MAX / 2);

        block_on(o.step());
        for _ in 0..59 {
            r.redraw.request(false);
            assert_eq!(block_on(o.step()), StepOutcome::Drew { full: false });
        }
        r.redraw.request(false);
        assert_eq!(block_on(o.step()), StepOutcome::Drew { full: true });
        assert_eq!(o.last_full_loop(), 61);

        for _ in 0..59 {
            r.redraw.request(false);
            assert_eq!(block_on(o.step()), StepOutcome::Drew { full: false });
        }
        r.redraw.request(false);
        assert_eq!(block_on(o.step()), StepOutcome::Drew { full: true });
        assert_eq!(o.last_full_loop(), 121);
    }

    #[test]
    fn coalesced_requests_make_one_pass() {
        let r = rig(None);
        let mut o = orchestrator(&r, None);
        r.activity.touch(u64::MAX / 2);
        block_on(o.step());
        for _ in 0..5 {
            r.redraw.request(false);
        }
        block_on(o.step());
        assert_eq!(block_on(o.step()), StepOutcome::Idle);
        assert_eq!(o.panel().shows.len(), 2);
    }

    #[test]
    fn inactivity_sleeps_with_default_duration_at_sixty_percent() {
        let r = rig(None);
        block_on(r.device.lock()).on_battery_sample(3_870, Some(DAY_EPOCH));
        let mut o = orchestrator(&r, Some(DAY_EPOCH));

        let mut outcome = StepOutcome::Idle;
        for _ in 0..10 {
            outcome = block_on(o.step());
            if matches!(outcome, StepOutcome::Sleep(_)) {
                break;
            }
        }
        let cfg = Config::defaults();
        assert_eq!(outcome, StepOutcome::Sleep(SleepDecision::Seconds(cfg.sleep_default_s)));
        assert_eq!(o.platform_mut().now, 20_000);
        // full refresh right before sleep, then the panel sleeps
        assert_eq!(o.panel().shows.last(), Some(&true));
        assert_eq!(o.panel().sleeps, 1);

        let plan = WakePlan::for_decision(SleepDecision::Seconds(cfg.sleep_default_s), &cfg);
        assert_eq!(plan.map(|p| p.source_count()), Some(4));
        assert_eq!(o.retained().current_page, PageId::Clock.as_u8());
        assert_eq!(o.retained().sleep_epoch, DAY_EPOCH + 20);
        assert_eq!(o.platform_mut().persisted, [false]);
        assert_eq!(o.retained().gauge.history, [Some(3_870), None]);
        assert_eq!(o.retained().gauge.sample_epoch, Some(DAY_EPOCH));
    }

    #[test]
    fn capture_started_before_sleep_is_written_back() {
        let r = rig(None);
        {
            let mut dev = block_on(r.device.lock());
            dev.pages.switch_page(PageId::Battery, true);
            dev.handle_key(KeyEvent::short(Key::Ok), 0);
            assert!(dev.gauge.needs_persist());
        }
        let mut o = orchestrator(&r, Some(DAY_EPOCH));
        o.platform_mut().timer_wake = true;
        assert!(matches!(block_on(o.step()), StepOutcome::Sleep(_)));
        assert_eq!(o.platform_mut().persisted, [true]);
        assert!(o.retained().capturing);
        assert_eq!(o.retained().capture_count, 0);
    }

    #[test]
    fn capture_resumes_from_its_own_points_after_wake() {
        let mut store = BlobStore::new(RamFlash::new(0x4000), 0);
        let old: Vec<u8> = [4000u16; 30].iter().flat_map(|v| v.to_le_bytes()).collect();
        store.write(BlobKey::BatteryCurve, &old).unwrap();

        let redraw = leaked_requests();
        let activity: &'static ActivityTracker = Box::leak(Box::new(ActivityTracker::new()));
        let mut before = Device::new(&Config::defaults(), redraw, activity);
        before.gauge.load_curve(&mut store).unwrap();
        before.init(None);
        before.pages.switch_page(PageId::Battery, true);
        before.handle_key(KeyEvent::short(Key::Ok), 0);
        assert_eq!(before.gauge.curve_len(), 0);
        // sleep before the curve reached flash
        let retained = before.snapshot(&RetainedState::cold(), Some(DAY_EPOCH));

        let mut after = Device::new(&Config::defaults(), redraw, activity);
        after.gauge.load_curve(&mut store).unwrap();
        after.init(Some(&retained));
        assert!(after.gauge.is_capturing());
        after.on_battery_sample(4_150, Some(DAY_EPOCH + 60));
        assert_eq!(after.gauge.curve_len(), 1);
    }

    #[test]
    fn charging_detected_on_the_first_sample_after_wake() {
        let redraw = leaked_requests();
        let activity: &'static ActivityTracker = Box::leak(Box::new(ActivityTracker::new()));
        let mut before = Device::new(&Config::defaults(), redraw, activity);
        before.init(None);
        before.on_battery_sample(3_700, Some(DAY_EPOCH));
        let retained = before.snapshot(&RetainedState::cold(), Some(DAY_EPOCH + 20));

        let mut after = Device::new(&Config::defaults(), redraw, activity);
        after.init(Some(&retained));
        assert!(after.sleep_inputs().battery.valid);
        assert!(!after.gauge.sample_due(Some(DAY_EPOCH + 60)));
        after.on_battery_sample(3_760, Some(DAY_EPOCH + 200));
        assert!(after.gauge.is_charging());
        assert!(after.sleep_inputs().battery.charging);
    }

    #[test]
    fn timer_wake_checks_sleep_on_first_loop() {
        let r = rig(None);
        let mut o = orchestrator(&r, Some(DAY_EPOCH));
        o.platform_mut().timer_wake = true;
        assert_eq!(
            block_on(o.step()),
            StepOutcome::Sleep(SleepDecision::Seconds(Config::defaults().sleep_default_s))
        );
        assert_eq!(o.panel().shows, [true]);
    }

    #[test]
    fn panel_errors_do_not_stop_the_loop() {
        let r = rig(None);
        let mut o = orchestrator(&r, None);
        r.activity.touch(u64::MAX / 2);
        o.panel.fail = true;
        assert_eq!(block_on(o.step()), StepOutcome::Drew { full: true });
        r.redraw.request(false);
        assert_eq!(block_on(o.step()), StepOutcome::Drew { full: false });
    }

    #[test]
    fn capture_toggle_reaches_the_gauge() {
        let r = rig(None);
        let mut dev = block_on(r.device.lock());
        dev.pages.switch_page(PageId::Battery, true);
        dev.handle_key(KeyEvent::short(Key::Ok), 0);
        assert!(dev.gauge.is_capturing());
        assert!(dev.pages.model.battery.capturing);
        dev.handle_key(KeyEvent::short(Key::Ok), 0);
        assert!(!dev.gauge.is_capturing());
    }

    #[test]
    fn never_sleep_keeps_device_awake() {
        assert_eq!(
            WakePlan::for_decision(SleepDecision::NeverSleep, &Config::defaults()),
            None
        );
        let plan = WakePlan::for_decision(SleepDecision::NoTimerWake, &Config::defaults());
        assert_eq!(plan.map(|p| p.timer_s), Some(None));
    }
}
