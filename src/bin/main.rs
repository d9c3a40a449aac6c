// inkmate entry point
//
// Boot sequence: runtime -> retained image -> hardware -> settings,
// curve and alarm from flash -> RTC time -> device state -> tasks ->
// display orchestrator (never returns; it ends in deep sleep).
//
// Deep sleep wakes re-run all of this. Only the retained image tells a
// warm boot from a cold one.

#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_sync::mutex::Mutex;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::rtc_cntl::{reset_reason, wakeup_cause};
use esp_hal::system::Cpu;
use esp_hal::timer::timg::TimerGroup;
use log::{info, warn};
use static_cell::StaticCell;

use inkmate::board::{Board, power};
use inkmate::platform::{EspPlatform, set_wall_clock};
use inkmate::tasks::{self, SharedStore};
use inkmate_kernel::config::Config;
use inkmate_kernel::drivers::input::Key;
use inkmate_kernel::drivers::storage::BlobKey;
use inkmate_kernel::orchestrator::{Device, Orchestrator, SharedDevice};
use inkmate_kernel::protocol::Command;
use inkmate_kernel::retained::RetainedState;
use inkmate_kernel::wake::{ACTIVITY, REDRAW};

esp_bootloader_esp_idf::esp_app_desc!();

static DEVICE: StaticCell<SharedDevice> = StaticCell::new();
static STORE: StaticCell<SharedStore> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    esp_alloc::heap_allocator!(size: 16 * 1024);

    let timg0 = TimerGroup::new(unsafe { peripherals.TIMG0.clone_unchecked() });
    let sw_int = SoftwareInterruptControl::new(unsafe { peripherals.SW_INTERRUPT.clone_unchecked() });
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    info!(
        "booting... reset {:?}, wake {:?}",
        reset_reason(Cpu::ProCpu),
        wakeup_cause()
    );

    let (retained, warm) = RetainedState::on_boot(&power::load_retained());

    let mut board = Board::init(peripherals);
    info!("hardware initialized.");

    let cfg = Config::load(&mut board.store);

    match board.rtc.read_time() {
        Ok(now) => set_wall_clock(now.to_epoch()),
        Err(e) => warn!("rtc: no valid time ({}), clock unset", e),
    }

    let mut device = Device::new(&cfg, &REDRAW, &ACTIVITY);
    if let Err(e) = device.gauge.load_curve(&mut board.store) {
        warn!("battery: curve unreadable ({}), using default", e);
    }
    let mut frame = [0u8; 8];
    match board.store.read(BlobKey::Alarm, &mut frame) {
        Ok(Some(len)) => match Command::parse(&frame[..len]) {
            Ok(Command::SetAlarm(alarm)) => device.pages.set_alarm(alarm),
            _ => warn!("alarm: stored record invalid"),
        },
        Ok(None) => {}
        Err(e) => warn!("alarm: unreadable ({})", e),
    }
    device.init(warm.then_some(&retained));

    let device: &'static SharedDevice = DEVICE.init(Mutex::new(device));
    let Board {
        epd,
        buttons,
        rtc_int,
        motion_int,
        battery,
        rtc,
        store,
    } = board;
    let store: &'static SharedStore = STORE.init(Mutex::new(store));

    spawner.spawn(tasks::key_edge_task(Key::Ok, buttons.ok)).unwrap();
    spawner.spawn(tasks::key_edge_task(Key::Up, buttons.up)).unwrap();
    spawner.spawn(tasks::key_edge_task(Key::Down, buttons.down)).unwrap();
    spawner.spawn(tasks::key_task(device)).unwrap();
    spawner.spawn(tasks::battery_task(device, store, battery)).unwrap();
    spawner.spawn(tasks::rtc_task(device, store, rtc, rtc_int)).unwrap();
    spawner
        .spawn(tasks::motion_task(motion_int, cfg.motion_wake_high))
        .unwrap();
    spawner.spawn(tasks::sensor_task(device)).unwrap();
    info!("kernel ready.");

    Orchestrator::new(
        EspPlatform::new(store),
        epd,
        device,
        &REDRAW,
        &ACTIVITY,
        &cfg,
        retained,
    )
    .run()
    .await
}
