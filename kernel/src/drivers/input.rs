// Key edge classification: short click / long click
//
// The GPIO ISR only forwards (key, level) edges; this machine runs in
// the key task with the pin's interrupt masked until the edge has been
// consumed. Per press exactly one event comes out:
//
//   held < min gap               -> nothing (contact bounce)
//   long deadline passes (down)  -> Long, press marked reported
//   released, already reported   -> nothing
//   released, held >= threshold  -> Long (deadline was missed)
//   released otherwise           -> Short
//
// The long-press "timer" is a deadline owned by the machine. The task
// waits on `edge OR next_deadline()` and calls `poll_timers`; clearing
// the deadline on key-up is the cancellation.

use core::fmt;

use crate::config::Config;

pub const KEY_COUNT: usize = 3;

/// Physical buttons. Up and Ok double as deep-sleep wake sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Ok,
    Down,
}

impl Key {
    pub const ALL: [Key; KEY_COUNT] = [Key::Up, Key::Ok, Key::Down];

    pub const fn index(self) -> usize {
        match self {
            Key::Up => 0,
            Key::Ok => 1,
            Key::Down => 2,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Key::Up => "Up",
            Key::Ok => "Ok",
            Key::Down => "Down",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Click {
    Short,
    Long,
}

/// Classified key event handed to the page manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub click: Click,
}

impl KeyEvent {
    pub const fn short(key: Key) -> Self {
        Self {
            key,
            click: Click::Short,
        }
    }

    pub const fn long(key: Key) -> Self {
        Self {
            key,
            click: Click::Long,
        }
    }

    pub fn is_long(self) -> bool {
        self.click == Click::Long
    }
}

/// Raw edge as captured by the ISR: which key, and whether the (active
/// low) line read as pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEdge {
    pub key: Key,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy)]
struct KeyState {
    key: Key,
    down: bool,
    down_at: u64,
    long_deadline: Option<u64>,
    reported: bool,
}

impl KeyState {
    const fn idle(key: Key) -> Self {
        Self {
            key,
            down: false,
            down_at: 0,
            long_deadline: None,
            reported: false,
        }
    }
}

pub struct KeyMachine {
    keys: [KeyState; KEY_COUNT],
    long_press_ms: u64,
    min_click_gap_ms: u64,
}

impl KeyMachine {
    pub const fn new(long_press_ms: u64, min_click_gap_ms: u64) -> Self {
        Self {
            keys: [
                KeyState::idle(Key::Up),
                KeyState::idle(Key::Ok),
                KeyState::idle(Key::Down),
            ],
            long_press_ms,
            min_click_gap_ms,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.long_press_ms as u64, cfg.min_click_gap_ms as u64)
    }

    /// Feed one edge. Returns the classified event, if this edge ends a
    /// press that has not been reported yet.
    pub fn on_edge(&mut self, edge: KeyEdge, now_ms: u64) -> Option<KeyEvent> {
        let long_press_ms = self.long_press_ms;
        let min_gap = self.min_click_gap_ms;
        let st = &mut self.keys[edge.key.index()];

        match (st.down, edge.pressed) {
            (false, true) => {
                st.down = true;
                st.down_at = now_ms;
                st.reported = false;
                st.long_deadline = Some(now_ms + long_press_ms);
                None
            }
            (true, false) => {
                st.down = false;
                st.long_deadline = None;
                let held = now_ms.saturating_sub(st.down_at);

                if held < min_gap {
                    log::debug!("key {}: {}ms glitch dropped", st.key, held);
                    None
                } else if st.reported {
                    None
                } else if held >= long_press_ms {
                    Some(KeyEvent::long(st.key))
                } else {
                    Some(KeyEvent::short(st.key))
                }
            }
            (true, true) => {
                log::warn!("key {}: down while already down, edge dropped", st.key);
                None
            }
            (false, false) => {
                log::warn!("key {}: up while already up, edge dropped", st.key);
                None
            }
        }
    }

    /// Fire every long-press deadline that has passed. Call until it
    /// returns `None`.
    pub fn poll_timers(&mut self, now_ms: u64) -> Option<KeyEvent> {
        for st in self.keys.iter_mut() {
            match st.long_deadline {
                Some(deadline) if deadline <= now_ms => {
                    st.long_deadline = None;
                    if st.down && !st.reported {
                        st.reported = true;
                        return Some(KeyEvent::long(st.key));
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Earliest armed long-press deadline, for the task's timed wait.
    pub fn next_deadline(&self) -> Option<u64> {
        self.keys.iter().filter_map(|st| st.long_deadline).min()
    }

    pub fn is_down(&self, key: Key) -> bool {
        self.keys[key.index()].down
    }

    pub fn any_down(&self) -> bool {
        self.keys.iter().any(|st| st.down)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(key: Key) -> KeyEdge {
        KeyEdge { key, pressed: true }
    }

    fn up(key: Key) -> KeyEdge {
        KeyEdge {
            key,
            pressed: false,
        }
    }

    // press at t0, release at t1, timers polled every 10ms in between
    fn press(m: &mut KeyMachine, key: Key, t0: u64, t1: u64) -> Vec<KeyEvent> {
        let mut out = Vec::new();
        out.extend(m.on_edge(down(key), t0));
        let mut t = t0;
        while t < t1 {
            while let Some(ev) = m.poll_timers(t) {
                out.push(ev);
            }
            t += 10;
        }
        out.extend(m.on_edge(up(key), t1));
        out
    }

    #[test]
    fn every_hold_duration_yields_at_most_one_event() {
        for held in (0..1_200u64).step_by(5) {
            let mut m = KeyMachine::new(400, 30);
            let events = press(&mut m, Key::Ok, 1_000, 1_000 + held);
            if held < 30 {
                assert!(events.is_empty(), "held {held}");
            } else if held < 400 {
                assert_eq!(events, [KeyEvent::short(Key::Ok)], "held {held}");
            } else {
                assert_eq!(events, [KeyEvent::long(Key::Ok)], "held {held}");
            }
        }
    }

    #[test]
    fn held_500ms_gives_single_long_click_from_timer() {
        let mut m = KeyMachine::new(400, 30);
        assert_eq!(m.on_edge(down(Key::Down), 0), None);
        assert_eq!(m.next_deadline(), Some(400));
        assert_eq!(m.poll_timers(399), None);
        assert_eq!(m.poll_timers(400), Some(KeyEvent::long(Key::Down)));
        assert_eq!(m.poll_timers(450), None);
        assert_eq!(m.on_edge(up(Key::Down), 500), None);
    }

    #[test]
    fn missed_timer_reports_long_on_release() {
        let mut m = KeyMachine::new(400, 30);
        m.on_edge(down(Key::Up), 0);
        assert_eq!(m.on_edge(up(Key::Up), 500), Some(KeyEvent::long(Key::Up)));
        // deadline was cancelled on release
        assert_eq!(m.poll_timers(1_000), None);
        assert_eq!(m.next_deadline(), None);
    }

    #[test]
    fn stray_edges_are_ignored() {
        let mut m = KeyMachine::new(400, 30);
        assert_eq!(m.on_edge(up(Key::Ok), 10), None);
        m.on_edge(down(Key::Ok), 20);
        assert_eq!(m.on_edge(down(Key::Ok), 30), None);
        // original down timestamp is kept
        assert_eq!(m.on_edge(up(Key::Ok), 120), Some(KeyEvent::short(Key::Ok)));
        assert!(!m.any_down());
    }

    #[test]
    fn keys_are_tracked_independently() {
        let mut m = KeyMachine::new(400, 30);
        m.on_edge(down(Key::Up), 0);
        m.on_edge(down(Key::Down), 100);
        assert_eq!(m.next_deadline(), Some(400));
        assert_eq!(m.on_edge(up(Key::Down), 200), Some(KeyEvent::short(Key::Down)));
        assert_eq!(m.poll_timers(400), Some(KeyEvent::long(Key::Up)));
        assert!(m.is_down(Key::Up));
        assert!(!m.is_down(Key::Down));
    }
}
