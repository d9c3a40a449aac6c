// Redraw requests and activity tracking shared between tasks
//
// Any task (key handling, battery sampling, sensor pushes) may ask for a
// redraw; the display task owns the only consumer. Requests made before
// a pass starts collapse into that pass, requests made while the pass
// runs are dropped by `finish_pass` since the frame being drawn already
// reflects them. Critical sections guard riscv32imc (no atomic RMW).

use core::cell::Cell;

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Pending {
    requested: bool,
    full: bool,
}

/// Redraw flags plus the signal the display task sleeps on.
pub struct RedrawRequests {
    pending: Mutex<Cell<Pending>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
}

impl Default for RedrawRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl RedrawRequests {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(Cell::new(Pending {
                requested: false,
                full: false,
            })),
            wake: Signal::new(),
        }
    }

    pub fn request(&self, full: bool) {
        critical_section::with(|cs| {
            let cell = self.pending.borrow(cs);
            let p = cell.get();
            cell.set(Pending {
                requested: true,
                full: p.full || full,
            });
        });
        self.wake.signal(());
    }

    pub fn is_pending(&self) -> bool {
        critical_section::with(|cs| self.pending.borrow(cs).get().requested)
    }

    /// Claim everything requested so far for the pass about to start.
    /// Returns `Some(full)` if anything was pending.
    pub fn begin_pass(&self) -> Option<bool> {
        let p = critical_section::with(|cs| self.pending.borrow(cs).replace(Pending::default()));
        p.requested.then_some(p.full)
    }

    /// Drop requests that arrived while the pass ran.
    pub fn finish_pass(&self) {
        let dropped = critical_section::with(|cs| self.pending.borrow(cs).replace(Pending::default()));
        self.wake.reset();
        if dropped.requested {
            log::debug!("redraw: mid-pass request folded into finished pass");
        }
    }

    /// Wait until someone calls `request`. Returns immediately if a
    /// request is already pending.
    pub async fn wait(&self) {
        if self.is_pending() {
            return;
        }
        self.wake.wait().await
    }
}

/// Time of the last meaningful user or sensor event.
pub struct ActivityTracker {
    last_ms: Mutex<Cell<u64>>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub const fn new() -> Self {
        Self {
            last_ms: Mutex::new(Cell::new(0)),
        }
    }

    pub fn touch(&self, now_ms: u64) {
        critical_section::with(|cs| {
            let cell = self.last_ms.borrow(cs);
            if now_ms > cell.get() {
                cell.set(now_ms);
            }
        });
    }

    pub fn last(&self) -> u64 {
        critical_section::with(|cs| self.last_ms.borrow(cs).get())
    }

    pub fn idle_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last())
    }
}

/// Redraw requests for the display task.
pub static REDRAW: RedrawRequests = RedrawRequests::new();

/// Last user/sensor activity, for the inactivity timeout.
pub static ACTIVITY: ActivityTracker = ActivityTracker::new();

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn many_requests_make_one_pass() {
        let r = RedrawRequests::new();
        for _ in 0..10 {
            r.request(false);
        }
        assert_eq!(r.begin_pass(), Some(false));
        r.finish_pass();
        assert_eq!(r.begin_pass(), None);
    }

    #[test]
    fn any_full_request_makes_the_pass_full() {
        let r = RedrawRequests::new();
        r.request(false);
        r.request(true);
        r.request(false);
        assert_eq!(r.begin_pass(), Some(true));
    }

    #[test]
    fn mid_pass_requests_are_satisfied_by_the_pass() {
        let r = RedrawRequests::new();
        r.request(false);
        assert!(r.begin_pass().is_some());
        r.request(false); // arrives while drawing
        r.finish_pass();
        assert!(!r.is_pending());
        assert_eq!(r.begin_pass(), None);
    }

    #[test]
    fn wait_returns_when_pending() {
        let r = RedrawRequests::new();
        r.request(true);
        block_on(r.wait());
        assert!(r.is_pending());
    }

    #[test]
    fn activity_only_moves_forward() {
        let a = ActivityTracker::new();
        a.touch(5_000);
        a.touch(3_000);
        assert_eq!(a.last(), 5_000);
        assert_eq!(a.idle_for(25_000), 20_000);
        assert_eq!(a.idle_for(1_000), 0);
    }
}
