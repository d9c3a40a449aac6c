// Page trait, navigation state, menu overlay and sleep policy.
//
// Pages are concrete structs owned by the PageManager and addressed by
// PageId through `with_page!` (a match, no function pointers). Pages
// never hold a reference to the manager: they queue commands on a
// PageContext and the manager applies them once the callback returns.
//
// Key routing: open menu -> current page -> default handler.
//   long Ok   on a home page  : open the main menu
//   long Up   on a home page  : previous home page
//   long Down on a home page  : next home page
//   long Ok / long Up elsewhere: close the page

pub mod battery;
pub mod clock;
pub mod menu;
pub mod sensors;
pub mod timer;

use crate::config::Config;
use crate::display::{Framebuffer, Rotation};
use crate::drivers::battery::BatteryStatus;
use crate::drivers::input::{Click, Key, KeyEvent};
use crate::error::{Error, Result};
use crate::protocol::{Alarm, DateTime};
use crate::retained::{NO_PAGE, RetainedState};
use crate::wake::RedrawRequests;

pub use battery::BatteryPage;
pub use clock::ClockPage;
pub use menu::{MainMenu, MenuAction};
pub use sensors::SensorsPage;
pub use timer::TimerPage;

pub const PAGE_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageId {
    Clock,
    Sensors,
    Battery,
    Timer,
}

impl PageId {
    pub const ALL: [PageId; PAGE_COUNT] = [
        PageId::Clock,
        PageId::Sensors,
        PageId::Battery,
        PageId::Timer,
    ];

    /// Home pages in cycling order; the first is the default.
    pub const HOMES: [PageId; 2] = [PageId::Clock, PageId::Sensors];

    pub const fn index(self) -> usize {
        match self {
            PageId::Clock => 0,
            PageId::Sensors => 1,
            PageId::Battery => 2,
            PageId::Timer => 3,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self.index() as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            PageId::Clock => "clock",
            PageId::Sensors => "sensors",
            PageId::Battery => "battery",
            PageId::Timer => "timer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn is_home(self) -> bool {
        Self::HOMES.contains(&self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuId {
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepDecision {
    /// Sleep, waking on the timer after this many seconds (0 = no timer).
    Seconds(u32),
    /// Stay awake.
    NeverSleep,
    /// No opinion; let the next policy source decide.
    NoSleepNow,
    /// Sleep with only the button, motion and alarm wake sources.
    NoTimerWake,
}

/// What the sleep policy looks at besides the active page.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepInputs {
    pub battery: BatteryStatus,
    pub epoch: Option<u32>,
}

impl SleepInputs {
    pub fn hour(&self) -> Option<u8> {
        self.epoch.map(|e| DateTime::from_epoch(e).hour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Temperature, // tenths of a degree C
    Humidity,    // tenths of a percent
    Pressure,    // tenths of hPa
    Steps,
}

pub const SENSOR_COUNT: usize = 4;

impl SensorKind {
    pub const ALL: [SensorKind; SENSOR_COUNT] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Pressure,
        SensorKind::Steps,
    ];

    pub const fn index(self) -> usize {
        match self {
            SensorKind::Temperature => 0,
            SensorKind::Humidity => 1,
            SensorKind::Pressure => 2,
            SensorKind::Steps => 3,
        }
    }
}

/// Reading pushed by a sensor collaborator. A failed bus transaction
/// is a reading too; the page shows a placeholder for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorReading {
    Value(SensorKind, i32),
    Failed(SensorKind),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadingState {
    #[default]
    Missing,
    Failed,
    Value(i32),
}

/// Everything pages render from; updated by the tasks that own the data.
#[derive(Debug, Clone, Copy, Default)]
pub struct Model {
    pub epoch: Option<u32>,
    pub battery: BatteryStatus,
    pub alarm: Alarm,
    pub sensors: [ReadingState; SENSOR_COUNT],
}

impl Model {
    pub fn now(&self) -> Option<DateTime> {
        self.epoch.map(DateTime::from_epoch)
    }

    pub fn reading(&self, kind: SensorKind) -> ReadingState {
        self.sensors[kind.index()]
    }
}

/// Requests for the fuel gauge, which lives outside the page manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeCommand {
    ToggleCapture,
    ClearCurve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCommand {
    Switch { target: PageId, push_parent: bool },
    ClosePage,
    ShowMenu(MenuId, u8),
    CloseMenu,
    Redraw { full: bool },
    Gauge(GaugeCommand),
    Rotate,
}

const CTX_QUEUE: usize = 4;

/// Handed to page callbacks; commands run after the callback returns.
pub struct PageContext {
    now_ms: u64,
    epoch: Option<u32>,
    queue: [Option<PageCommand>; CTX_QUEUE],
    len: usize,
}

impl PageContext {
    pub fn new(now_ms: u64, epoch: Option<u32>) -> Self {
        Self {
            now_ms,
            epoch,
            queue: [None; CTX_QUEUE],
            len: 0,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    fn push(&mut self, cmd: PageCommand) {
        if self.len == CTX_QUEUE {
            log::warn!("page context full, {:?} dropped", cmd);
            return;
        }
        self.queue[self.len] = Some(cmd);
        self.len += 1;
    }

    pub fn switch_page(&mut self, target: PageId, push_parent: bool) {
        self.push(PageCommand::Switch {
            target,
            push_parent,
        });
    }

    pub fn close_page(&mut self) {
        self.push(PageCommand::ClosePage);
    }

    pub fn show_menu(&mut self, id: MenuId, arg: u8) {
        self.push(PageCommand::ShowMenu(id, arg));
    }

    pub fn close_menu(&mut self) {
        self.push(PageCommand::CloseMenu);
    }

    pub fn request_redraw(&mut self, full: bool) {
        self.push(PageCommand::Redraw { full });
    }

    pub fn gauge(&mut self, cmd: GaugeCommand) {
        self.push(PageCommand::Gauge(cmd));
    }

    pub fn rotate(&mut self) {
        self.push(PageCommand::Rotate);
    }

    pub fn commands(&self) -> impl Iterator<Item = PageCommand> + '_ {
        self.queue[..self.len].iter().flatten().copied()
    }
}

/// Page callbacks. Only `draw` is required.
pub trait Page {
    fn on_create(&mut self, _ctx: &mut PageContext) {}

    fn draw(&self, fb: &mut Framebuffer, model: &Model, loop_count: u32);

    /// Return `true` to stop propagation to the default handler.
    fn on_key_click(&mut self, _ev: KeyEvent, _ctx: &mut PageContext) -> bool {
        false
    }

    fn on_destroy(&mut self, _ctx: &mut PageContext) {}

    fn after_draw(&mut self, _loop_count: u32) {}

    /// Called when the wall clock advances while the page is shown.
    fn on_tick(&mut self, _model: &Model, _ctx: &mut PageContext) {}

    fn sleep_policy(&self, _loop_count: u32, _inputs: &SleepInputs) -> SleepDecision {
        SleepDecision::NoSleepNow
    }
}

/// Navigation view kept across deep sleep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavState {
    pub current: Option<PageId>,
    pub previous: Option<PageId>,
    pub menu: Option<MenuId>,
}

macro_rules! with_page {
    ($mgr:expr, $id:expr, |$page:ident| $body:expr) => {
        match $id {
            PageId::Clock => {
                let $page = &mut $mgr.clock;
                $body
            }
            PageId::Sensors => {
                let $page = &mut $mgr.sensors;
                $body
            }
            PageId::Battery => {
                let $page = &mut $mgr.battery;
                $body
            }
            PageId::Timer => {
                let $page = &mut $mgr.timer;
                $body
            }
        }
    };
}

// nested command application (a page opening a page that opens a page)
const MAX_COMMAND_DEPTH: u8 = 4;

pub struct PageManager {
    clock: ClockPage,
    sensors: SensorsPage,
    battery: BatteryPage,
    timer: TimerPage,
    menu: MainMenu,
    nav: NavState,
    parents: [Option<PageId>; PAGE_COUNT],
    menu_deadline: Option<u64>,
    redraw: &'static RedrawRequests,
    cfg: Config,
    rotation: Rotation,
    pending_rotation: Option<Rotation>,
    gauge_requests: [Option<GaugeCommand>; 2],
    now_ms: u64,
    pub model: Model,
}

impl PageManager {
    pub fn new(cfg: &Config, redraw: &'static RedrawRequests) -> Self {
        Self {
            clock: ClockPage::new(),
            sensors: SensorsPage::new(),
            battery: BatteryPage::new(),
            timer: TimerPage::new(),
            menu: MainMenu::new(),
            nav: NavState::default(),
            parents: [None; PAGE_COUNT],
            menu_deadline: None,
            redraw,
            cfg: *cfg,
            rotation: Rotation::Deg0,
            pending_rotation: None,
            gauge_requests: [None; 2],
            now_ms: 0,
            model: Model::default(),
        }
    }

    /// Cold boot starts on the default home page; warm boot resumes the
    /// page (and its parent) that was shown before deep sleep.
    pub fn init(&mut self, retained: Option<&RetainedState>) {
        self.nav = NavState::default();
        self.parents = [None; PAGE_COUNT];
        self.menu_deadline = None;

        let (target, parent) = match retained {
            Some(r) => {
                self.timer.restore(&r.timer);
                self.rotation = Rotation::from_u8(r.rotation);
                let target = PageId::from_u8(r.current_page).unwrap_or_else(|| {
                    if r.current_page != NO_PAGE {
                        log::warn!("nav: retained page {} unknown", r.current_page);
                    }
                    PageId::HOMES[0]
                });
                (target, PageId::from_u8(r.parent_page))
            }
            None => (PageId::HOMES[0], None),
        };

        self.switch_page(target, false);
        self.parents[target.index()] = parent.filter(|p| *p != target);
        log::info!("nav: init on {}", target.name());
    }

    pub fn nav(&self) -> NavState {
        self.nav
    }

    pub fn current(&self) -> Option<PageId> {
        self.nav.current
    }

    pub fn parent_of(&self, page: PageId) -> Option<PageId> {
        self.parents[page.index()]
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Rotation change waiting for the next draw pass.
    pub fn take_rotation(&mut self) -> Option<Rotation> {
        self.pending_rotation.take()
    }

    pub fn take_gauge_command(&mut self) -> Option<GaugeCommand> {
        let cmd = self.gauge_requests[0].take();
        self.gauge_requests[0] = self.gauge_requests[1].take();
        cmd
    }

    fn context(&self) -> PageContext {
        PageContext::new(self.now_ms, self.model.epoch)
    }

    pub fn switch_page(&mut self, target: PageId, push_parent: bool) {
        self.switch_page_at(target, push_parent, 0);
    }

    fn switch_page_at(&mut self, target: PageId, push_parent: bool, depth: u8) {
        let from = self.nav.current;
        if from == Some(target) {
            return;
        }

        let mut ctx = self.context();
        if let Some(old) = from {
            with_page!(self, old, |p| p.on_destroy(&mut ctx));
        }
        if push_parent {
            self.parents[target.index()] = from;
        }
        self.nav.previous = from;
        self.nav.current = Some(target);
        with_page!(self, target, |p| p.on_create(&mut ctx));

        log::info!(
            "nav: {} -> {}",
            from.map_or("-", PageId::name),
            target.name()
        );
        self.apply(ctx, depth);
        self.request_update(true);
    }

    pub fn switch_page_by_name(&mut self, name: &str, push_parent: bool) -> Result<()> {
        match PageId::from_name(name) {
            Some(id) => {
                self.switch_page(id, push_parent);
                Ok(())
            }
            None => {
                log::warn!("nav: no page named {:?}", name);
                Err(Error::InvalidPage(NO_PAGE))
            }
        }
    }

    /// Raw page id from an external source; unknown ids are a no-op.
    pub fn switch_page_by_id(&mut self, id: u8, push_parent: bool) -> Result<()> {
        let page = PageId::from_u8(id).ok_or_else(|| {
            log::warn!("nav: no page with id {}", id);
            Error::InvalidPage(id)
        })?;
        self.switch_page(page, push_parent);
        Ok(())
    }

    pub fn close_page(&mut self) {
        self.close_page_at(0);
    }

    fn close_page_at(&mut self, depth: u8) {
        let Some(cur) = self.nav.current else {
            return;
        };
        if let Some(parent) = self.parents[cur.index()].take() {
            self.switch_page_at(parent, false, depth);
        } else if !cur.is_home() {
            self.switch_page_at(PageId::HOMES[0], false, depth);
        } else {
            log::info!("nav: home page {} stays open", cur.name());
        }
    }

    pub fn show_menu(&mut self, id: MenuId, arg: u8) {
        if self.nav.menu.is_some() {
            self.close_menu();
        }
        match id {
            MenuId::Main => self.menu.on_create(arg),
        }
        self.nav.menu = Some(id);
        self.menu_deadline = match self.cfg.menu_autoclose_s {
            0 => None,
            s => Some(self.now_ms + s as u64 * 1_000),
        };
        log::info!("nav: menu {:?} open", id);
        self.request_update(false);
    }

    pub fn close_menu(&mut self) {
        if let Some(id) = self.nav.menu.take() {
            self.menu_deadline = None;
            log::info!("nav: menu {:?} closed", id);
            self.request_update(false);
        }
    }

    pub fn menu_open(&self) -> Option<MenuId> {
        self.nav.menu
    }

    pub fn menu_deadline(&self) -> Option<u64> {
        self.menu_deadline
    }

    /// Expire the menu auto-close deadline.
    pub fn poll_timers(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
        if self.menu_deadline.is_some_and(|d| now_ms >= d) {
            log::info!("nav: menu auto-close");
            self.close_menu();
        }
    }

    /// Wall clock update; lets the shown page react to time passing.
    pub fn set_clock(&mut self, epoch: Option<u32>) {
        self.model.epoch = epoch;
        if let Some(cur) = self.nav.current {
            let mut ctx = self.context();
            let model = self.model;
            with_page!(self, cur, |p| p.on_tick(&model, &mut ctx));
            self.apply(ctx, 0);
        }
    }

    pub fn set_battery(&mut self, status: BatteryStatus) {
        self.model.battery = status;
        if matches!(self.nav.current, Some(PageId::Clock | PageId::Battery)) {
            self.request_update(false);
        }
    }

    pub fn set_alarm(&mut self, alarm: Alarm) {
        self.model.alarm = alarm;
        if self.nav.current == Some(PageId::Clock) {
            self.request_update(false);
        }
    }

    pub fn push_sensor(&mut self, reading: SensorReading) {
        let (kind, state) = match reading {
            SensorReading::Value(kind, v) => (kind, ReadingState::Value(v)),
            SensorReading::Failed(kind) => (kind, ReadingState::Failed),
        };
        let slot = &mut self.model.sensors[kind.index()];
        if *slot != state {
            *slot = state;
            if self.nav.current == Some(PageId::Sensors) {
                self.request_update(false);
            }
        }
    }

    pub fn request_update(&self, full: bool) {
        self.redraw.request(full);
    }

    /// Route a classified key event. Returns `true` if anything used it.
    pub fn handle_key(&mut self, ev: KeyEvent, now_ms: u64) -> bool {
        self.now_ms = now_ms;

        if self.nav.menu.is_some() {
            self.menu_key(ev);
            return true;
        }

        if let Some(cur) = self.nav.current {
            let mut ctx = self.context();
            let consumed = with_page!(self, cur, |p| p.on_key_click(ev, &mut ctx));
            self.apply(ctx, 0);
            if consumed {
                return true;
            }
        }

        self.default_key(ev)
    }

    fn menu_key(&mut self, ev: KeyEvent) {
        if self.menu_deadline.is_some() {
            self.menu_deadline = Some(self.now_ms + self.cfg.menu_autoclose_s as u64 * 1_000);
        }
        match self.menu.on_key(ev) {
            MenuAction::None => {}
            MenuAction::Moved => self.request_update(false),
            MenuAction::Close => self.close_menu(),
            MenuAction::Open(page) => {
                self.close_menu();
                self.switch_page(page, true);
            }
            MenuAction::Rotate => {
                self.close_menu();
                self.queue_rotation();
            }
        }
    }

    fn default_key(&mut self, ev: KeyEvent) -> bool {
        let Some(cur) = self.nav.current else {
            return false;
        };
        if ev.click != Click::Long {
            return false;
        }

        match (ev.key, cur.is_home()) {
            (Key::Ok, true) => self.show_menu(MenuId::Main, 0),
            (Key::Up, true) => self.cycle_home(cur, false),
            (Key::Down, true) => self.cycle_home(cur, true),
            (Key::Ok | Key::Up, false) => self.close_page(),
            (Key::Down, false) => return false,
        }
        true
    }

    fn cycle_home(&mut self, cur: PageId, forward: bool) {
        let n = PageId::HOMES.len();
        let at = PageId::HOMES.iter().position(|p| *p == cur).unwrap_or(0);
        let next = if forward { (at + 1) % n } else { (at + n - 1) % n };
        self.switch_page(PageId::HOMES[next], false);
    }

    fn queue_rotation(&mut self) {
        self.rotation = self.rotation.rotated();
        self.pending_rotation = Some(self.rotation);
        self.request_update(true);
    }

    fn queue_gauge(&mut self, cmd: GaugeCommand) {
        match self.gauge_requests.iter_mut().find(|s| s.is_none()) {
            Some(slot) => *slot = Some(cmd),
            None => log::warn!("nav: gauge request {:?} dropped", cmd),
        }
    }

    fn apply(&mut self, ctx: PageContext, depth: u8) {
        if depth >= MAX_COMMAND_DEPTH {
            log::warn!("nav: command chain too deep, rest dropped");
            return;
        }
        for cmd in ctx.commands() {
            match cmd {
                PageCommand::Switch {
                    target,
                    push_parent,
                } => self.switch_page_at(target, push_parent, depth + 1),
                PageCommand::ClosePage => self.close_page_at(depth + 1),
                PageCommand::ShowMenu(id, arg) => self.show_menu(id, arg),
                PageCommand::CloseMenu => self.close_menu(),
                PageCommand::Redraw { full } => self.request_update(full),
                PageCommand::Gauge(g) => self.queue_gauge(g),
                PageCommand::Rotate => self.queue_rotation(),
            }
        }
    }

    /// Sleep duration for the coming deep sleep. The page's own policy
    /// wins unless it has no opinion; then charging, critical battery,
    /// night window, low battery, default.
    pub fn enter_sleep(&self, loop_count: u32, inputs: &SleepInputs) -> SleepDecision {
        if let Some(cur) = self.nav.current {
            let d = match cur {
                PageId::Clock => self.clock.sleep_policy(loop_count, inputs),
                PageId::Sensors => self.sensors.sleep_policy(loop_count, inputs),
                PageId::Battery => self.battery.sleep_policy(loop_count, inputs),
                PageId::Timer => self.timer.sleep_policy(loop_count, inputs),
            };
            if d != SleepDecision::NoSleepNow {
                log::debug!("sleep: {} page decides {:?}", cur.name(), d);
                return d;
            }
        }

        let cfg = &self.cfg;
        let bat = &inputs.battery;
        if bat.charging {
            SleepDecision::Seconds(cfg.sleep_default_s)
        } else if bat.valid && bat.level <= cfg.battery_critical_pct {
            SleepDecision::NoTimerWake
        } else if inputs.hour().is_some_and(|h| cfg.is_night(h)) {
            SleepDecision::Seconds(cfg.sleep_night_s)
        } else if bat.valid && bat.level <= cfg.battery_low_pct {
            SleepDecision::Seconds(cfg.sleep_default_s.saturating_mul(5))
        } else {
            SleepDecision::Seconds(cfg.sleep_default_s)
        }
    }

    /// Called right before the final pre-sleep draw.
    pub fn prepare_sleep(&mut self) {
        self.nav.menu = None;
        self.menu_deadline = None;
    }

    /// Retained view of navigation and page resume state.
    pub fn snapshot(&self, base: &RetainedState) -> RetainedState {
        let current = self.nav.current;
        RetainedState {
            current_page: current.map_or(NO_PAGE, PageId::as_u8),
            parent_page: current
                .and_then(|c| self.parents[c.index()])
                .map_or(NO_PAGE, PageId::as_u8),
            timer: self.timer.resume_state(),
            rotation: self.rotation.as_u8(),
            ..*base
        }
    }

    /// Page, then menu overlay, into a cleared framebuffer.
    pub fn draw(&self, fb: &mut Framebuffer, loop_count: u32) {
        fb.clear_white();
        if let Some(cur) = self.nav.current {
            match cur {
                PageId::Clock => self.clock.draw(fb, &self.model, loop_count),
                PageId::Sensors => self.sensors.draw(fb, &self.model, loop_count),
                PageId::Battery => self.battery.draw(fb, &self.model, loop_count),
                PageId::Timer => self.timer.draw(fb, &self.model, loop_count),
            }
        }
        if let Some(MenuId::Main) = self.nav.menu {
            self.menu.draw(fb);
        }
    }

    pub fn after_draw(&mut self, loop_count: u32) {
        if let Some(cur) = self.nav.current {
            with_page!(self, cur, |p| p.after_draw(loop_count));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn leaked_requests() -> &'static RedrawRequests {
        Box::leak(Box::new(RedrawRequests::new()))
    }

    pub fn manager() -> (PageManager, &'static RedrawRequests) {
        let r = leaked_requests();
        let mut m = PageManager::new(&Config::defaults(), r);
        m.init(None);
        (m, r)
    }

    fn status(level: u8, charging: bool) -> BatteryStatus {
        BatteryStatus {
            valid: true,
            level,
            charging,
            ..BatteryStatus::default()
        }
    }

    // 2024-03-01 at the given hour
    fn epoch_at(hour: u32) -> Option<u32> {
        Some(1_709_251_200 + hour * 3_600)
    }

    #[test]
    fn cold_init_lands_on_first_home() {
        let (m, r) = manager();
        assert_eq!(m.current(), Some(PageId::Clock));
        assert_eq!(r.begin_pass(), Some(true));
    }

    #[test]
    fn warm_init_restores_page_and_parent() {
        let r = leaked_requests();
        let mut m = PageManager::new(&Config::defaults(), r);
        let retained = RetainedState {
            current_page: PageId::Battery.as_u8(),
            parent_page: PageId::Sensors.as_u8(),
            ..RetainedState::cold()
        };
        m.init(Some(&retained));
        assert_eq!(m.current(), Some(PageId::Battery));
        m.close_page();
        assert_eq!(m.current(), Some(PageId::Sensors));
    }

    #[test]
    fn unknown_retained_page_falls_back_home() {
        let r = leaked_requests();
        let mut m = PageManager::new(&Config::defaults(), r);
        let retained = RetainedState {
            current_page: 42,
            ..RetainedState::cold()
        };
        m.init(Some(&retained));
        assert_eq!(m.current(), Some(PageId::Clock));
    }

    #[test]
    fn switching_to_current_page_is_noop() {
        let (mut m, r) = manager();
        r.begin_pass();
        m.switch_page(PageId::Clock, true);
        assert_eq!(r.begin_pass(), None);
        assert_eq!(m.nav().previous, None);
    }

    #[test]
    fn close_returns_to_parent_then_home() {
        let (mut m, _) = manager();
        m.switch_page(PageId::Sensors, false);
        m.switch_page(PageId::Timer, true);
        assert_eq!(m.parent_of(PageId::Timer), Some(PageId::Sensors));
        m.close_page();
        assert_eq!(m.current(), Some(PageId::Sensors));
        assert_eq!(m.parent_of(PageId::Timer), None);

        m.switch_page(PageId::Battery, false);
        m.close_page();
        assert_eq!(m.current(), Some(PageId::Clock));

        // home pages stay put
        m.close_page();
        assert_eq!(m.current(), Some(PageId::Clock));
    }

    #[test]
    fn unknown_names_are_ignored() {
        let (mut m, _) = manager();
        assert!(m.switch_page_by_name("weather", false).is_err());
        assert_eq!(m.current(), Some(PageId::Clock));
        m.switch_page_by_name("timer", true).unwrap();
        assert_eq!(m.current(), Some(PageId::Timer));
        assert_eq!(m.switch_page_by_id(9, false), Err(Error::InvalidPage(9)));
    }

    #[test]
    fn long_ok_opens_menu_and_menu_gets_keys_first() {
        let (mut m, _) = manager();
        assert!(m.handle_key(KeyEvent::long(Key::Ok), 1_000));
        assert_eq!(m.menu_open(), Some(MenuId::Main));
        // first entry is the battery page
        assert!(m.handle_key(KeyEvent::short(Key::Ok), 1_500));
        assert_eq!(m.menu_open(), None);
        assert_eq!(m.current(), Some(PageId::Battery));
        assert_eq!(m.parent_of(PageId::Battery), Some(PageId::Clock));
    }

    #[test]
    fn showing_a_menu_replaces_the_open_one() {
        let (mut m, _) = manager();
        m.show_menu(MenuId::Main, 0);
        m.handle_key(KeyEvent::short(Key::Down), 100);
        m.show_menu(MenuId::Main, 0);
        assert_eq!(m.menu_open(), Some(MenuId::Main));
        m.handle_key(KeyEvent::short(Key::Ok), 200);
        assert_eq!(m.current(), Some(PageId::Battery));
    }

    #[test]
    fn menu_closes_itself_after_timeout() {
        let (mut m, _) = manager();
        m.handle_key(KeyEvent::long(Key::Ok), 10_000);
        m.poll_timers(20_000);
        assert_eq!(m.menu_open(), Some(MenuId::Main));
        // a key press re-arms the deadline
        m.handle_key(KeyEvent::short(Key::Down), 20_000);
        m.poll_timers(30_000);
        assert_eq!(m.menu_open(), Some(MenuId::Main));
        m.poll_timers(35_000);
        assert_eq!(m.menu_open(), None);
    }

    #[test]
    fn long_up_down_cycle_home_pages() {
        let (mut m, _) = manager();
        m.handle_key(KeyEvent::long(Key::Down), 0);
        assert_eq!(m.current(), Some(PageId::Sensors));
        m.handle_key(KeyEvent::long(Key::Down), 0);
        assert_eq!(m.current(), Some(PageId::Clock));
        m.handle_key(KeyEvent::long(Key::Up), 0);
        assert_eq!(m.current(), Some(PageId::Sensors));
    }

    #[test]
    fn short_keys_on_home_fall_through_unused() {
        let (mut m, _) = manager();
        assert!(!m.handle_key(KeyEvent::short(Key::Down), 0));
        assert_eq!(m.current(), Some(PageId::Clock));
    }

    #[test]
    fn sleep_policy_order() {
        let (m, _) = manager();
        let cfg = Config::defaults();
        let day = |level, charging| SleepInputs {
            battery: status(level, charging),
            epoch: epoch_at(14),
        };

        assert_eq!(
            m.enter_sleep(1, &day(60, false)),
            SleepDecision::Seconds(cfg.sleep_default_s)
        );
        assert_eq!(
            m.enter_sleep(1, &day(3, true)),
            SleepDecision::Seconds(cfg.sleep_default_s)
        );
        assert_eq!(m.enter_sleep(1, &day(3, false)), SleepDecision::NoTimerWake);
        assert_eq!(
            m.enter_sleep(1, &day(15, false)),
            SleepDecision::Seconds(cfg.sleep_default_s * 5)
        );
        let night = SleepInputs {
            battery: status(15, false),
            epoch: epoch_at(23),
        };
        assert_eq!(
            m.enter_sleep(1, &night),
            SleepDecision::Seconds(cfg.sleep_night_s)
        );
    }

    #[test]
    fn unknown_battery_is_not_low() {
        let (m, _) = manager();
        let inputs = SleepInputs::default();
        assert_eq!(
            m.enter_sleep(1, &inputs),
            SleepDecision::Seconds(Config::defaults().sleep_default_s)
        );
    }

    #[test]
    fn snapshot_keeps_base_fields() {
        let (mut m, _) = manager();
        m.switch_page(PageId::Timer, true);
        let base = RetainedState {
            boot_count: 7,
            ..RetainedState::cold()
        };
        let snap = m.snapshot(&base);
        assert_eq!(snap.boot_count, 7);
        assert_eq!(snap.current_page, PageId::Timer.as_u8());
        assert_eq!(snap.parent_page, PageId::Clock.as_u8());
    }

    #[test]
    fn sensor_push_redraws_only_when_shown_and_changed() {
        let (mut m, r) = manager();
        r.begin_pass();
        m.push_sensor(SensorReading::Value(SensorKind::Steps, 10));
        assert_eq!(r.begin_pass(), None);
        m.switch_page(PageId::Sensors, false);
        r.begin_pass();
        m.push_sensor(SensorReading::Value(SensorKind::Steps, 10));
        assert_eq!(r.begin_pass(), None);
        m.push_sensor(SensorReading::Failed(SensorKind::Steps));
        assert_eq!(r.begin_pass(), Some(false));
        assert_eq!(m.model.reading(SensorKind::Steps), ReadingState::Failed);
    }

    #[test]
    fn menu_rotate_queues_rotation() {
        let (mut m, _) = manager();
        m.show_menu(MenuId::Main, 0);
        // battery, timer, rotate
        m.handle_key(KeyEvent::short(Key::Down), 0);
        m.handle_key(KeyEvent::short(Key::Down), 0);
        m.handle_key(KeyEvent::short(Key::Ok), 0);
        assert_eq!(m.take_rotation(), Some(Rotation::Deg90));
        assert_eq!(m.take_rotation(), None);
        assert_eq!(m.snapshot(&RetainedState::cold()).rotation, 1);
    }
}
