// Embassy tasks: key edges, key classification, battery sampling,
// RTC alarm and configuration frames, motion activity
//
//   • `key_edge_task`  one per button, waits for the opposite level and
//                      pushes a raw edge into KEY_EDGES. It only re-arms
//                      after the edge is queued, so a key's down always
//                      precedes its up.
//
//   • `key_task`       owns the KeyMachine; waits on KEY_EDGES or the
//                      next long-press deadline, whichever comes first,
//                      and hands classified clicks to the device.
//
//   • `battery_task`   samples the divider once per battery_period_s of
//                      wall time (deep sleeps included) and writes the
//                      learned curve back when it changed.
//
//   • `rtc_task`       owns the I2C bus: brings the chip alarm in line
//                      with the stored one, then applies configuration
//                      frames and services the alarm INT line.
//
//   • `motion_task`    motion INT only marks activity.
//
//   • `sensor_task`    forwards readings from the sensor drivers to the
//                      page model.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_hal::gpio::Input;
use inkmate_kernel::apps::SensorReading;
use inkmate_kernel::drivers::input::{Key, KeyEdge, KeyMachine};
use inkmate_kernel::drivers::storage::BlobKey;
use inkmate_kernel::orchestrator::{Device, SharedDevice};
use inkmate_kernel::protocol::{AlarmRegs, Command, DateTime};
use inkmate_kernel::wake::ACTIVITY;
use inkmate_kernel::{Error, Result};

use crate::board::{BatterySense, Rtc, Store};
use crate::platform::{now_ms, set_wall_clock, wall_clock};

/// Raw edges in flight between the edge watchers and the key task.
/// Three keys, each with at most a down and an up pending.
pub const KEY_EDGE_CAP: usize = 8;

pub static KEY_EDGES: Channel<CriticalSectionRawMutex, KeyEdge, KEY_EDGE_CAP> = Channel::new();

/// Longest configuration frame (SET_TIME: command + 7 bytes).
pub const CONFIG_FRAME_MAX: usize = 8;

/// A configuration frame as handed over by the transport.
#[derive(Debug, Clone, Copy)]
pub struct ConfigFrame {
    len: u8,
    bytes: [u8; CONFIG_FRAME_MAX],
}

impl ConfigFrame {
    /// `None` if `data` cannot be a valid frame at all.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.is_empty() || data.len() > CONFIG_FRAME_MAX {
            return None;
        }
        let mut bytes = [0u8; CONFIG_FRAME_MAX];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            len: data.len() as u8,
            bytes,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Inbound configuration frames (companion link).
pub static CONFIG_FRAMES: Channel<CriticalSectionRawMutex, ConfigFrame, 4> = Channel::new();

/// Readings published by the sensor drivers.
pub static SENSOR_READINGS: Channel<CriticalSectionRawMutex, SensorReading, 8> = Channel::new();

pub type SharedStore = Mutex<CriticalSectionRawMutex, Store>;

// ═════════════════════════════════════════════════════════════════════════
// Keys
// ═════════════════════════════════════════════════════════════════════════

#[embassy_executor::task(pool_size = 3)]
pub async fn key_edge_task(key: Key, mut pin: Input<'static>) -> ! {
    // start as released: a key still held from a deep-sleep wake is
    // reported as a fresh press
    let mut down = false;
    loop {
        if down {
            pin.wait_for_high().await;
        } else {
            pin.wait_for_low().await;
        }
        down = !down;
        if KEY_EDGES.try_send(KeyEdge { key, pressed: down }).is_err() {
            log::warn!("keys: edge queue full, {} edge dropped", key);
        }
    }
}

#[embassy_executor::task]
pub async fn key_task(device: &'static SharedDevice) -> ! {
    let mut keys = {
        let dev = device.lock().await;
        KeyMachine::from_config(dev.config())
    };

    loop {
        let event = match keys.next_deadline() {
            Some(at) => match select(KEY_EDGES.receive(), Timer::at(Instant::from_millis(at))).await {
                Either::First(edge) => keys.on_edge(edge, now_ms()),
                Either::Second(()) => keys.poll_timers(now_ms()),
            },
            None => {
                let edge = KEY_EDGES.receive().await;
                keys.on_edge(edge, now_ms())
            }
        };

        if let Some(ev) = event {
            device.lock().await.handle_key(ev, now_ms());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Battery
// ═════════════════════════════════════════════════════════════════════════

#[embassy_executor::task]
pub async fn battery_task(
    device: &'static SharedDevice,
    store: &'static SharedStore,
    mut sense: BatterySense,
) -> ! {
    let period = device.lock().await.config().battery_period_s as u64;
    let mut ticker = Ticker::every(Duration::from_secs(period));

    loop {
        let due = device.lock().await.gauge.sample_due(wall_clock());
        if due {
            match sense.sample_mv().await {
                Ok(mv) => {
                    log::debug!("battery: {} mV", mv);
                    let mut dev = device.lock().await;
                    dev.on_battery_sample(mv, wall_clock());
                    let mut store = store.lock().await;
                    if let Err(e) = dev.gauge.persist_curve(&mut *store) {
                        log::warn!("battery: curve not saved: {}", e);
                    }
                }
                Err(e) => log::warn!("battery: sample skipped: {}", e),
            }
        } else {
            log::debug!("battery: sampled less than {}s ago", period);
        }
        ticker.next().await;
    }
}

// ═════════════════════════════════════════════════════════════════════════
// RTC: configuration frames and alarm line
// ═════════════════════════════════════════════════════════════════════════

/// Registers for the device's next alarm firing.
fn wanted_alarm(device: &Device) -> AlarmRegs {
    match wall_clock() {
        Some(epoch) => device.pages.model.alarm.next_registers(&DateTime::from_epoch(epoch)),
        None => AlarmRegs::DISABLED,
    }
}

fn arm_alarm(rtc: &mut Rtc, device: &Device) -> Result<()> {
    let regs = wanted_alarm(device);
    log::info!("rtc: alarm registers {:?}", regs);
    rtc.set_alarm(&regs)
}

/// The chip keeps its alarm across deep sleep; only rewrite it when it
/// differs from what the stored alarm asks for.
fn sync_alarm(rtc: &mut Rtc, device: &Device) -> Result<()> {
    if rtc.read_alarm()? == wanted_alarm(device) {
        log::debug!("rtc: alarm registers up to date");
        return Ok(());
    }
    arm_alarm(rtc, device)
}

async fn apply_frame(
    frame: &ConfigFrame,
    rtc: &mut Rtc,
    device: &'static SharedDevice,
    store: &'static SharedStore,
) -> Result<()> {
    let cmd = Command::parse(frame.as_slice())?;
    let mut dev = device.lock().await;
    dev.apply_command(cmd, now_ms())?;
    match cmd {
        Command::SetTime(dt) => {
            rtc.write_time(&dt)?;
            set_wall_clock(dt.to_epoch());
            arm_alarm(rtc, &dev)?;
        }
        Command::SetAlarm(alarm) => {
            store.lock().await.write(BlobKey::Alarm, &alarm.to_frame())?;
            arm_alarm(rtc, &dev)?;
        }
        Command::StartCapture | Command::ClearCurve => {
            let mut store = store.lock().await;
            dev.gauge.persist_curve(&mut *store)?;
        }
    }
    dev.pages.request_update(false);
    Ok(())
}

async fn on_alarm(
    rtc: &mut Rtc,
    device: &'static SharedDevice,
    store: &'static SharedStore,
) -> Result<()> {
    if !rtc.take_alarm_flag()? {
        log::debug!("rtc: INT low without alarm flag");
        Timer::after(Duration::from_secs(1)).await;
        return Ok(());
    }
    log::info!("rtc: alarm fired");
    ACTIVITY.touch(now_ms());
    let mut dev = device.lock().await;
    let mut alarm = dev.pages.model.alarm;
    if !alarm.repeat {
        alarm.enabled = false;
        dev.pages.set_alarm(alarm);
        store.lock().await.write(BlobKey::Alarm, &alarm.to_frame())?;
    }
    arm_alarm(rtc, &dev)?;
    dev.pages.request_update(true);
    Ok(())
}

#[embassy_executor::task]
pub async fn rtc_task(
    device: &'static SharedDevice,
    store: &'static SharedStore,
    mut rtc: Rtc,
    mut int: Input<'static>,
) -> ! {
    if let Err(e) = sync_alarm(&mut rtc, &device.lock().await) {
        log::error!("rtc: alarm check failed: {}", e);
    }
    loop {
        let result = match select(CONFIG_FRAMES.receive(), int.wait_for_low()).await {
            Either::First(frame) => apply_frame(&frame, &mut rtc, device, store).await,
            Either::Second(()) => on_alarm(&mut rtc, device, store).await,
        };
        match result {
            Ok(()) => {}
            Err(e @ Error::Protocol(_)) => log::warn!("config: frame rejected: {}", e),
            Err(e) => {
                log::error!("rtc: {}", e);
                // INT may still be asserted; don't spin on it
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Motion
// ═════════════════════════════════════════════════════════════════════════

#[embassy_executor::task]
pub async fn motion_task(mut int: Input<'static>, active_high: bool) -> ! {
    loop {
        if active_high {
            int.wait_for_rising_edge().await;
        } else {
            int.wait_for_falling_edge().await;
        }
        log::debug!("motion: activity");
        ACTIVITY.touch(now_ms());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// Sensors
// ═════════════════════════════════════════════════════════════════════════

#[embassy_executor::task]
pub async fn sensor_task(device: &'static SharedDevice) -> ! {
    loop {
        let reading = SENSOR_READINGS.receive().await;
        if let SensorReading::Failed(kind) = reading {
            log::warn!("sensors: {:?} read failed", kind);
        }
        device.lock().await.pages.push_sensor(reading);
    }
}
