//! GPIO |     Function      |      Notes
//! -----+-------------------+----------------------------------
//!  0   | ADC1 - Battery    | 1:2 divider, reads half the cell voltage
//!  1   | EPD BUSY          | High while the controller works
//!  2   | RTC INT           | Alarm, open drain, active LOW (deep-sleep wake)
//!  3   | Button OK         | Active LOW, internal pullup (deep-sleep wake)
//!  4   | Button UP         | Active LOW, internal pullup (deep-sleep wake)
//!  5   | Motion INT        | Level set in Config (deep-sleep wake)
//!  6   | SPI2 SCK          | Display clock
//!  7   | SPI2 MOSI         | Display data out
//!  8   | EPD DC            | Data/Command select (strapping, output only after boot)
//!  9   | Button DOWN       | Active LOW, BOOT strap button
//! 10   | EPD CS            | Display chip select
//! 18   | EPD RST           | Reset (active low), USB D- repurposed
//! 19   | I2C0 SDA          | RTC + sensors, USB D+ repurposed
//! 20   | I2C0 SCL          |
//! 21   | UART0 TX          | esp-println log output
//!
//! Only GPIO0..5 are RTC-capable on the C3, so every deep-sleep wake line
//! sits in that range.

// ----- E-Paper Display -----
pub const EPD_CS: u8 = 10;
pub const EPD_DC: u8 = 8;
pub const EPD_RST: u8 = 18;
pub const EPD_BUSY: u8 = 1;

// ----- SPI Bus -----
pub const SPI_SCK: u8 = 6;
pub const SPI_MOSI: u8 = 7;

// ----- Buttons -----
pub const BTN_OK: u8 = 3;
pub const BTN_UP: u8 = 4;
pub const BTN_DOWN: u8 = 9;

// ----- Interrupt lines -----
pub const RTC_INT: u8 = 2;
pub const MOTION_INT: u8 = 5;

// ----- I2C Bus (RTC, sensors) -----
pub const I2C_SDA: u8 = 19;
pub const I2C_SCL: u8 = 20;
pub const RTC_ADDR: u8 = 0x51;

// ----- Battery -----
pub const BATTERY_ADC: u8 = 0;
/// Per-board ADC calibration, added after the divider
pub const BATTERY_CALIB_OFFSET_MV: i16 = 0;
