// Board services for the display orchestrator
//
// Wall time is the RTC reading taken at boot (or at the last SET_TIME
// frame) advanced by the embassy tick; the chip is only read again when
// it is rewritten.

use core::cell::Cell;

use embassy_futures::select::select;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Instant, Timer};
use inkmate_kernel::orchestrator::{Device, Platform, WakePlan};
use inkmate_kernel::retained::RetainedState;
use inkmate_kernel::wake::RedrawRequests;

use crate::board::power;
use crate::tasks::SharedStore;

#[derive(Debug, Clone, Copy)]
struct WallClock {
    epoch: u32,
    at_ms: u64,
}

static WALL_CLOCK: Mutex<CriticalSectionRawMutex, Cell<Option<WallClock>>> =
    Mutex::new(Cell::new(None));

pub fn now_ms() -> u64 {
    Instant::now().as_millis()
}

/// Anchor wall time to `epoch` as of now.
pub fn set_wall_clock(epoch: u32) {
    let anchor = WallClock {
        epoch,
        at_ms: now_ms(),
    };
    WALL_CLOCK.lock(|c| c.set(Some(anchor)));
}

pub fn wall_clock() -> Option<u32> {
    let anchor = WALL_CLOCK.lock(|c| c.get())?;
    let elapsed = now_ms().saturating_sub(anchor.at_ms) / 1_000;
    Some(anchor.epoch.wrapping_add(elapsed as u32))
}

pub struct EspPlatform {
    timer_wake: bool,
    store: &'static SharedStore,
}

impl EspPlatform {
    pub fn new(store: &'static SharedStore) -> Self {
        Self {
            timer_wake: power::woke_from_timer(),
            store,
        }
    }
}

impl Platform for EspPlatform {
    fn now_ms(&self) -> u64 {
        now_ms()
    }

    fn epoch(&self) -> Option<u32> {
        wall_clock()
    }

    fn woke_from_timer(&self) -> bool {
        self.timer_wake
    }

    async fn wait_wake(&mut self, redraw: &RedrawRequests, timeout_ms: u64) {
        select(redraw.wait(), Timer::after_millis(timeout_ms)).await;
    }

    async fn persist(&mut self, device: &mut Device) {
        let mut store = self.store.lock().await;
        if let Err(e) = device.gauge.persist_curve(&mut *store) {
            log::warn!("sleep: curve not saved: {}", e);
        }
    }

    fn deep_sleep(&mut self, plan: WakePlan, retained: &RetainedState) -> ! {
        power::store_retained(retained);
        power::sleep_deep(plan)
    }
}
