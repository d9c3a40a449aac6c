//! inkmate board support (ESP32-C3 + 1.54" SSD1681 panel)
//!
//! Maps physical hardware to named subsystems so tasks never touch GPIO
//! numbers. `Board::init` consumes the peripherals once at boot.

pub mod pins;
pub mod power;
pub mod rtc;

use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::{
    Blocking,
    analog::adc::{Adc, AdcCalCurve, AdcConfig, AdcPin, Attenuation},
    delay::Delay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    i2c::master::{Config as I2cConfig, I2c},
    peripherals::{ADC1, GPIO0, Peripherals},
    spi,
    time::Rate,
};
use embassy_time::Timer;
use esp_storage::FlashStorage;
use inkmate_kernel::Error;
use inkmate_kernel::drivers::battery::adc_to_battery_mv;
use inkmate_kernel::drivers::ssd1681::Ssd1681;
use inkmate_kernel::drivers::storage::BlobStore;

use self::rtc::Pcf85063;

pub const SPI_FREQ_MHZ: u32 = 20;
pub const I2C_FREQ_KHZ: u32 = 400;

/// Blob region: last 64 KiB of the 4 MiB flash, outside the app partitions.
pub const STORE_FLASH_BASE: u32 = 0x3F_0000;

pub type SpiBus = spi::master::Spi<'static, Blocking>;
pub type SpiDevice = ExclusiveDevice<SpiBus, Output<'static>, Delay>;
pub type Epd = Ssd1681<SpiDevice, Output<'static>, Output<'static>, Input<'static>, embassy_time::Delay>;
pub type I2cBus = I2c<'static, Blocking>;
pub type Rtc = Pcf85063<I2cBus>;
pub type Store = BlobStore<FlashStorage<'static>>;

/// Three front buttons, active low.
pub struct Buttons {
    pub ok: Input<'static>,
    pub up: Input<'static>,
    pub down: Input<'static>,
}

/// Divider settle time after the sense enable goes high.
pub const SENSE_SETTLE_MS: u64 = 5;

/// Battery divider on ADC1, optionally switched by an enable line.
pub struct BatterySense {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    pin: AdcPin<GPIO0<'static>, ADC1<'static>, AdcCalCurve<ADC1<'static>>>,
    enable: Option<Output<'static>>,
}

impl BatterySense {
    /// One calibrated cell voltage sample in millivolts: enable the
    /// divider, let it settle, convert, disable it again.
    pub async fn sample_mv(&mut self) -> inkmate_kernel::Result<u16> {
        if let Some(en) = self.enable.as_mut() {
            en.set_high();
            Timer::after_millis(SENSE_SETTLE_MS).await;
        }
        let adc_mv = nb::block!(self.adc.read_oneshot(&mut self.pin));
        if let Some(en) = self.enable.as_mut() {
            en.set_low();
        }
        let adc_mv = adc_mv.map_err(|_| Error::Adc)?;
        Ok(adc_to_battery_mv(adc_mv, pins::BATTERY_CALIB_OFFSET_MV))
    }
}

pub struct Board {
    pub epd: Epd,
    pub buttons: Buttons,
    pub rtc_int: Input<'static>,
    pub motion_int: Input<'static>,
    pub battery: BatterySense,
    pub rtc: Rtc,
    pub store: Store,
}

impl Board {
    pub fn init(p: Peripherals) -> Self {
        let mut adc_cfg = AdcConfig::new();
        let pin = adc_cfg.enable_pin_with_cal::<_, AdcCalCurve<ADC1>>(p.GPIO0, Attenuation::_11dB);
        // no GPIO left for a sense enable: the divider stays connected
        let battery = BatterySense {
            adc: Adc::new(p.ADC1, adc_cfg),
            pin,
            enable: None,
        };

        let pull_up = InputConfig::default().with_pull(Pull::Up);
        let buttons = Buttons {
            ok: Input::new(p.GPIO3, pull_up),
            up: Input::new(p.GPIO4, pull_up),
            down: Input::new(p.GPIO9, pull_up),
        };
        // RTC INT is open drain; the motion line is driven by the sensor
        let rtc_int = Input::new(p.GPIO2, pull_up);
        let motion_int = Input::new(p.GPIO5, InputConfig::default().with_pull(Pull::None));

        let i2c = I2c::new(p.I2C0, I2cConfig::default().with_frequency(Rate::from_khz(I2C_FREQ_KHZ)))
            .unwrap()
            .with_sda(p.GPIO19)
            .with_scl(p.GPIO20);
        let rtc = Pcf85063::new(i2c);

        let cs = Output::new(p.GPIO10, Level::High, OutputConfig::default());
        let dc = Output::new(p.GPIO8, Level::High, OutputConfig::default());
        let rst = Output::new(p.GPIO18, Level::High, OutputConfig::default());
        let busy = Input::new(p.GPIO1, InputConfig::default().with_pull(Pull::None));

        let spi_cfg = spi::master::Config::default().with_frequency(Rate::from_mhz(SPI_FREQ_MHZ));
        let spi_bus = spi::master::Spi::new(p.SPI2, spi_cfg)
            .unwrap()
            .with_sck(p.GPIO6)
            .with_mosi(p.GPIO7);
        let spi_dev = ExclusiveDevice::new(spi_bus, cs, Delay::new()).unwrap();
        let epd = Ssd1681::new(spi_dev, dc, rst, busy, embassy_time::Delay);

        let store = BlobStore::new(FlashStorage::new(p.FLASH), STORE_FLASH_BASE);

        Board {
            epd,
            buttons,
            rtc_int,
            motion_int,
            battery,
            rtc,
            store,
        }
    }
}
