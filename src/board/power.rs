// Deep sleep entry and the retained RTC-RAM image
//
// Wake lines all sit on RTC-capable pins (GPIO2..5). Buttons and the RTC
// alarm pull low; the motion line level comes from the wake plan. The
// image in RTC fast memory is never initialised by the runtime, so cold
// boots read garbage and the kernel checksum rejects it.

use core::time::Duration;

use esp_hal::gpio::RtcPinWithResistors;
use esp_hal::peripherals::{GPIO2, GPIO3, GPIO4, GPIO5, LPWR};
use esp_hal::rtc_cntl::sleep::{RtcioWakeupSource, TimerWakeupSource, WakeupLevel};
use esp_hal::rtc_cntl::{Rtc, wakeup_cause};
use esp_hal::system::SleepSource;
use inkmate_kernel::orchestrator::WakePlan;
use inkmate_kernel::retained::{RETAINED_LEN, RetainedState};

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RETAINED_IMAGE: [u8; RETAINED_LEN] = [0; RETAINED_LEN];

pub fn woke_from_timer() -> bool {
    matches!(wakeup_cause(), SleepSource::Timer)
}

pub fn load_retained() -> [u8; RETAINED_LEN] {
    // single core, read before any task is spawned
    unsafe { core::ptr::read_volatile(&raw const RETAINED_IMAGE) }
}

pub fn store_retained(state: &RetainedState) {
    let image = state.encode();
    unsafe { core::ptr::write_volatile(&raw mut RETAINED_IMAGE, image) };
}

fn level(high: bool) -> WakeupLevel {
    if high {
        WakeupLevel::High
    } else {
        WakeupLevel::Low
    }
}

/// Arm the wake sources in `plan` and power down. Does not return; the
/// next wake re-runs boot.
pub fn sleep_deep(plan: WakePlan) -> ! {
    // the drivers that owned these pins are done; sleep takes them back
    let mut rtc_int = unsafe { GPIO2::steal() };
    let mut btn_ok = unsafe { GPIO3::steal() };
    let mut btn_up = unsafe { GPIO4::steal() };
    let mut motion = unsafe { GPIO5::steal() };

    for pin in [
        &mut rtc_int as &mut dyn RtcPinWithResistors,
        &mut btn_ok,
        &mut btn_up,
    ] {
        pin.rtcio_pullup(true);
        pin.rtcio_pulldown(false);
    }
    motion.rtcio_pullup(!plan.motion_high);
    motion.rtcio_pulldown(plan.motion_high);

    let mut wake_pins: [(&mut dyn RtcPinWithResistors, WakeupLevel); 4] = [
        (&mut rtc_int, WakeupLevel::Low),
        (&mut btn_ok, WakeupLevel::Low),
        (&mut btn_up, WakeupLevel::Low),
        (&mut motion, level(plan.motion_high)),
    ];
    let rtcio = RtcioWakeupSource::new(&mut wake_pins);

    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    match plan.timer_s {
        Some(s) => {
            log::info!("power: deep sleep for {} s", s);
            let timer = TimerWakeupSource::new(Duration::from_secs(s as u64));
            rtc.sleep_deep(&[&timer, &rtcio])
        }
        None => {
            log::info!("power: deep sleep until a wake line");
            rtc.sleep_deep(&[&rtcio])
        }
    }
}
