// Interval timer (work / rest rounds)
//
//   short Ok    start, or stop and reset
//   short Down  skip to the next phase
//
// Phase boundaries are wall-clock epochs, so a running timer survives
// deep sleep: the page asks to be woken exactly at the phase end.

use core::fmt::Write as _;

use embedded_graphics::mono_font::ascii::{FONT_6X10, FONT_9X15};
use embedded_graphics::prelude::*;

use super::{Model, Page, PageContext, SleepDecision, SleepInputs};
use crate::display::Framebuffer;
use crate::drivers::input::{Click, Key, KeyEvent};
use crate::retained::TimerResume;
use crate::ui::{self, HEADER_H, StackFmt};

pub const WORK_S: u32 = 25 * 60;
pub const REST_S: u32 = 5 * 60;
pub const LONG_REST_S: u32 = 15 * 60;
/// Work rounds before a long rest.
pub const ROUNDS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Work,
    Rest,
    LongRest,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Phase::Work,
            2 => Phase::Rest,
            3 => Phase::LongRest,
            _ => Phase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Phase::Idle => 0,
            Phase::Work => 1,
            Phase::Rest => 2,
            Phase::LongRest => 3,
        }
    }

    fn duration_s(self) -> u32 {
        match self {
            Phase::Idle => 0,
            Phase::Work => WORK_S,
            Phase::Rest => REST_S,
            Phase::LongRest => LONG_REST_S,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Phase::Idle => "ready",
            Phase::Work => "WORK",
            Phase::Rest => "rest",
            Phase::LongRest => "long rest",
        }
    }
}

pub struct TimerPage {
    phase: Phase,
    round: u8,
    phase_start: u32,
    phase_end: u32,
    shown_minute: Option<u32>,
}

impl Default for TimerPage {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerPage {
    pub const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            round: 0,
            phase_start: 0,
            phase_end: 0,
            shown_minute: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> u8 {
        self.round
    }

    pub fn is_running(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn restore(&mut self, r: &TimerResume) {
        if r.running {
            self.phase = Phase::from_u8(r.phase);
            self.round = r.round;
            self.phase_start = r.phase_start;
            self.phase_end = r.phase_end;
        } else {
            *self = Self::new();
        }
    }

    pub fn resume_state(&self) -> TimerResume {
        TimerResume {
            running: self.is_running(),
            phase: self.phase.as_u8(),
            round: self.round,
            phase_start: self.phase_start,
            phase_end: self.phase_end,
        }
    }

    fn enter(&mut self, phase: Phase, at: u32) {
        self.phase = phase;
        self.phase_start = at;
        self.phase_end = at + phase.duration_s();
        log::info!("timer: {} round {} until {}", phase.label(), self.round, self.phase_end);
    }

    fn start(&mut self, now: u32) {
        self.round = 1;
        self.enter(Phase::Work, now);
    }

    fn stop(&mut self) {
        *self = Self::new();
        log::info!("timer: stopped");
    }

    /// Move to the phase after the current one, starting at `at`.
    fn advance(&mut self, at: u32) {
        match self.phase {
            Phase::Idle => {}
            Phase::Work if self.round >= ROUNDS => self.enter(Phase::LongRest, at),
            Phase::Work => self.enter(Phase::Rest, at),
            Phase::Rest => {
                self.round += 1;
                self.enter(Phase::Work, at);
            }
            Phase::LongRest => {
                self.round = 1;
                self.enter(Phase::Work, at);
            }
        }
    }

    /// Catch up on phases that ended while asleep. Returns `true` if the
    /// phase changed.
    fn catch_up(&mut self, now: u32) -> bool {
        let mut changed = false;
        // bounded: a full cycle is under two hours
        for _ in 0..(2 * ROUNDS as usize + 2) {
            if !self.is_running() || now < self.phase_end {
                break;
            }
            let at = self.phase_end;
            self.advance(at);
            changed = true;
        }
        if self.is_running() && now >= self.phase_end {
            // asleep for more than a cycle; restart the current phase now
            self.enter(self.phase, now);
        }
        changed
    }

    fn remaining(&self, now: u32) -> u32 {
        self.phase_end.saturating_sub(now)
    }
}

impl Page for TimerPage {
    fn on_create(&mut self, _ctx: &mut PageContext) {
        self.shown_minute = None;
    }

    fn on_key_click(&mut self, ev: KeyEvent, ctx: &mut PageContext) -> bool {
        if ev.click != Click::Short {
            return false;
        }
        match ev.key {
            Key::Ok => {
                if self.is_running() {
                    self.stop();
                } else if let Some(now) = ctx.epoch() {
                    self.start(now);
                } else {
                    log::warn!("timer: clock not set, cannot start");
                    return true;
                }
            }
            Key::Down if self.is_running() => {
                let now = ctx.epoch().unwrap_or(self.phase_end);
                self.advance(now);
            }
            _ => return false,
        }
        ctx.request_redraw(false);
        true
    }

    fn on_tick(&mut self, model: &Model, ctx: &mut PageContext) {
        let Some(now) = model.epoch else {
            return;
        };
        if self.catch_up(now) {
            ctx.request_redraw(true);
            return;
        }
        let minute = self.is_running().then(|| self.remaining(now) / 60);
        if minute != self.shown_minute {
            self.shown_minute = minute;
            ctx.request_redraw(false);
        }
    }

    fn sleep_policy(&self, _loop_count: u32, inputs: &SleepInputs) -> SleepDecision {
        match (self.is_running(), inputs.epoch) {
            (true, Some(now)) => SleepDecision::Seconds(self.remaining(now).max(1)),
            _ => SleepDecision::NoSleepNow,
        }
    }

    fn draw(&self, fb: &mut Framebuffer, model: &Model, _loop_count: u32) {
        let _ = ui::header(fb, "Timer", &FONT_9X15);
        let top = HEADER_H as i32 + 16;

        let _ = ui::text_centered(fb, self.phase.label(), top, &FONT_9X15);
        if !self.is_running() {
            let _ = ui::text_centered(fb, "Ok to start", top + 60, &FONT_6X10);
            return;
        }

        let left = model.epoch.map_or(self.phase.duration_s(), |now| self.remaining(now));
        let mut s = StackFmt::<8>::new();
        let _ = write!(s, "{:02}:{:02}", left / 60, left % 60);
        let mins = (left / 60).min(99) as u8;
        let w = 30u32;
        let x0 = (crate::display::WIDTH as i32 - (2 * w as i32 + 8)) / 2;
        let _ = ui::seven_segment(fb, mins / 10, Point::new(x0, top + 28), w, 54, 6);
        let _ = ui::seven_segment(fb, mins % 10, Point::new(x0 + w as i32 + 8, top + 28), w, 54, 6);
        let _ = ui::text_centered(fb, "min left", top + 90, &FONT_6X10);

        let mut r = StackFmt::<16>::new();
        let _ = write!(r, "round {}/{}", self.round, ROUNDS);
        let _ = ui::text_centered(fb, r.as_str(), top + 110, &FONT_6X10);
        let _ = ui::text_centered(fb, s.as_str(), top + 126, &FONT_6X10);
    }
}
