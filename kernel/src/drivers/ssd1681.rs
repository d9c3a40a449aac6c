// SSD1681 e-paper driver (board-independent)
// 200x200 panel, 1bpp, x addressed in 8-pixel bytes.
//
// The driver caches the RAM window, the RAM address pointer and the
// refresh mode so repeated draws only put changed state on the wire.
// Streaming pixel data advances the controller's address counter, so
// the cached pointer is dropped after every RAM write; the window
// survives. Mode transitions:
//
//   Unset  -> any : hardware reset, soft reset, init (+ LUT if Partial)
//   Full  <-> Partial : soft reset, init (+ LUT if Partial)
//   any    -> sleep() : deep sleep command, back to Unset
//
// BUSY is awaited through `embedded_hal_async::digital::Wait` raced
// against a delay so a missed edge cannot hang the display task.

use embassy_futures::select::{Either, select};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiDevice;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::digital::Wait;

use crate::display::{FRAMEBUFFER_SIZE, Framebuffer, HEIGHT, ROW_BYTES, WIDTH};
use crate::error::{Error, Result};

const RESET_TIMEOUT_MS: u32 = 200;
const FULL_REFRESH_TIMEOUT_MS: u32 = 5_000;
const PARTIAL_REFRESH_TIMEOUT_MS: u32 = 1_500;

// display update control 2 sequences
const UPDATE_FULL: u8 = 0xF7; // clock + analog on, load OTP LUT, mode 1, off
const UPDATE_PARTIAL: u8 = 0xCF; // clock + analog on, RAM LUT, mode 2

mod cmd {
    pub const DRIVER_OUTPUT_CONTROL: u8 = 0x01;
    pub const GATE_VOLTAGE: u8 = 0x03;
    pub const SOURCE_VOLTAGE: u8 = 0x04;
    pub const DEEP_SLEEP: u8 = 0x10;
    pub const DATA_ENTRY_MODE: u8 = 0x11;
    pub const SW_RESET: u8 = 0x12;
    pub const TEMPERATURE_SENSOR: u8 = 0x18;
    pub const MASTER_ACTIVATION: u8 = 0x20;
    pub const DISPLAY_UPDATE_CONTROL_1: u8 = 0x21;
    pub const DISPLAY_UPDATE_CONTROL_2: u8 = 0x22;
    pub const WRITE_RAM_BW: u8 = 0x24;
    pub const WRITE_RAM_RED: u8 = 0x26; // previous image for differential update
    pub const WRITE_VCOM: u8 = 0x2C;
    pub const WRITE_LUT: u8 = 0x32;
    pub const DISPLAY_OPTION: u8 = 0x37;
    pub const BORDER_WAVEFORM: u8 = 0x3C;
    pub const END_OPTION: u8 = 0x3F;
    pub const SET_RAM_X_RANGE: u8 = 0x44;
    pub const SET_RAM_Y_RANGE: u8 = 0x45;
    pub const SET_RAM_X_COUNTER: u8 = 0x4E;
    pub const SET_RAM_Y_COUNTER: u8 = 0x4F;
}

pub const LUT_LEN: usize = 153;

// partial update waveform: VS groups, 12 timing groups, frame rate
#[rustfmt::skip]
const LUT_PARTIAL: [u8; LUT_LEN] = [
    0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x80, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x40, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x0F, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x22, 0x22, 0x22, 0x22, 0x22, 0x22, 0x00, 0x00, 0x00,
];
const LUT_END_OPTION: u8 = 0x22;
const LUT_GATE_VOLTAGE: u8 = 0x17;
const LUT_SOURCE_VOLTAGE: [u8; 3] = [0x41, 0xB0, 0x32];
const LUT_VCOM: u8 = 0x28;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PanelMode {
    /// power-on or after deep sleep; next use needs a hardware reset
    #[default]
    Unset,
    Full,
    Partial,
}

// RAM window in controller units: x in bytes, y in rows, inclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Window {
    x0: u8,
    y0: u16,
    x1: u8,
    y1: u16,
}

/// What the orchestrator needs from a panel: push a frame, power down.
#[allow(async_fn_in_trait)]
pub trait PanelSink {
    async fn show(&mut self, fb: &Framebuffer, full: bool) -> Result<()>;
    async fn sleep(&mut self) -> Result<()>;
}

pub struct Ssd1681<SPI, DC, RST, BUSY, DELAY> {
    spi: SPI,
    dc: DC,
    rst: RST,
    busy: BUSY,
    delay: DELAY,
    mode: PanelMode,
    window: Option<Window>,
    pointer: Option<(u8, u16)>,
}

impl<SPI, DC, RST, BUSY, DELAY> Ssd1681<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin + Wait,
    DELAY: DelayNs,
{
    pub fn new(spi: SPI, dc: DC, rst: RST, busy: BUSY, delay: DELAY) -> Self {
        Self {
            spi,
            dc,
            rst,
            busy,
            delay,
            mode: PanelMode::Unset,
            window: None,
            pointer: None,
        }
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    /// Bring the controller into `mode`. No-op if already there.
    pub async fn set_mode(&mut self, mode: PanelMode) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        if mode == PanelMode::Unset {
            return self.enter_deep_sleep().await;
        }

        if self.mode == PanelMode::Unset {
            self.hardware_reset().await?;
        }
        self.init_controller().await?;
        if mode == PanelMode::Partial {
            self.load_partial_lut()?;
        }

        log::debug!("epd: mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
        Ok(())
    }

    /// Set the RAM window. `x0`/`x1` are pixel columns and are widened to
    /// whole bytes; all bounds inclusive.
    pub fn set_memory_window(&mut self, x0: u16, y0: u16, x1: u16, y1: u16) -> Result<()> {
        let win = Window {
            x0: (x0 / 8) as u8,
            y0,
            x1: (x1 / 8) as u8,
            y1,
        };
        if self.window == Some(win) {
            return Ok(());
        }

        self.command(cmd::SET_RAM_X_RANGE, &[win.x0, win.x1])?;
        self.command(
            cmd::SET_RAM_Y_RANGE,
            &[
                (win.y0 & 0xFF) as u8,
                (win.y0 >> 8) as u8,
                (win.y1 & 0xFF) as u8,
                (win.y1 >> 8) as u8,
            ],
        )?;
        self.window = Some(win);
        Ok(())
    }

    pub fn set_memory_pointer(&mut self, x: u16, y: u16) -> Result<()> {
        let ptr = ((x / 8) as u8, y);
        if self.pointer == Some(ptr) {
            return Ok(());
        }

        self.command(cmd::SET_RAM_X_COUNTER, &[ptr.0])?;
        self.command(cmd::SET_RAM_Y_COUNTER, &[(y & 0xFF) as u8, (y >> 8) as u8])?;
        self.pointer = Some(ptr);
        Ok(())
    }

    /// Write the rectangle [x0, x1) x [y0, y1) of `data` into the new-image
    /// RAM. RAM is addressed in whole bytes, so x is widened to byte
    /// boundaries and `data` rows cover the widened span: from byte column
    /// `x0 / 8` up to `ceil(x1 / 8)`. The rectangle is clipped to the panel.
    pub fn draw_bitmap(&mut self, x0: u16, y0: u16, x1: u16, y1: u16, data: &[u8]) -> Result<()> {
        self.write_region(cmd::WRITE_RAM_BW, x0, y0, x1, y1, data)
    }

    /// Full-frame write to the previous-image RAM, so the next partial
    /// update diffs against what is actually on the glass.
    pub fn write_base(&mut self, data: &[u8]) -> Result<()> {
        self.write_region(cmd::WRITE_RAM_RED, 0, 0, WIDTH, HEIGHT, data)
    }

    fn write_region(
        &mut self,
        ram_cmd: u8,
        x0: u16,
        y0: u16,
        x1: u16,
        y1: u16,
        data: &[u8],
    ) -> Result<()> {
        if x0 >= x1 || y0 >= y1 || x0 >= WIDTH || y0 >= HEIGHT {
            return Ok(());
        }

        // source stride follows the requested span, not the clipped one
        let stride = (x1.div_ceil(8) - x0 / 8) as usize;

        let cx0 = x0 & !7;
        let cx1 = x1.div_ceil(8).saturating_mul(8).min(WIDTH);
        let cy1 = y1.min(HEIGHT);
        let row_len = ((cx1 - cx0) / 8) as usize;

        self.set_memory_window(cx0, y0, cx1 - 1, cy1 - 1)?;
        self.set_memory_pointer(cx0, y0)?;

        if cx0 == 0 && y0 == 0 && cx1 == WIDTH && cy1 == HEIGHT && stride == ROW_BYTES {
            let frame = data.get(..FRAMEBUFFER_SIZE).ok_or_else(|| {
                log::warn!("epd: short frame ({} bytes)", data.len());
                Error::Spi
            })?;
            self.command(ram_cmd, frame)?;
        } else {
            self.send_command(ram_cmd)?;
            for row in 0..(cy1 - y0) as usize {
                let start = row * stride;
                let Some(src) = data.get(start..start + row_len) else {
                    log::warn!("epd: bitmap ends at row {}", row);
                    break;
                };
                self.send_data(src)?;
            }
        }

        self.pointer = None;
        Ok(())
    }

    /// Kick a refresh with the waveform of the current mode.
    pub async fn refresh(&mut self, full: bool, wait: bool) -> Result<()> {
        let (control, timeout) = if full {
            (UPDATE_FULL, FULL_REFRESH_TIMEOUT_MS)
        } else {
            (UPDATE_PARTIAL, PARTIAL_REFRESH_TIMEOUT_MS)
        };
        self.command(cmd::DISPLAY_UPDATE_CONTROL_2, &[control])?;
        self.send_command(cmd::MASTER_ACTIVATION)?;
        if wait {
            self.wait_busy(timeout).await?;
        }
        Ok(())
    }

    /// Panel deep sleep. RAM content is lost; the next `set_mode` resets.
    pub async fn enter_deep_sleep(&mut self) -> Result<()> {
        if self.mode == PanelMode::Unset {
            return Ok(());
        }
        self.command(cmd::DEEP_SLEEP, &[0x01])?;
        self.mode = PanelMode::Unset;
        self.window = None;
        self.pointer = None;
        log::debug!("epd: deep sleep");
        Ok(())
    }

    async fn hardware_reset(&mut self) -> Result<()> {
        self.rst.set_high().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(10).await;
        self.rst.set_low().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(2).await;
        self.rst.set_high().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(10).await;
        self.wait_busy(RESET_TIMEOUT_MS).await
    }

    async fn init_controller(&mut self) -> Result<()> {
        self.send_command(cmd::SW_RESET)?;
        self.wait_busy(RESET_TIMEOUT_MS).await?;

        self.command(
            cmd::DRIVER_OUTPUT_CONTROL,
            &[((HEIGHT - 1) & 0xFF) as u8, ((HEIGHT - 1) >> 8) as u8, 0x00],
        )?;
        // x increment, y increment
        self.command(cmd::DATA_ENTRY_MODE, &[0x03])?;
        self.command(cmd::BORDER_WAVEFORM, &[0x05])?;
        self.command(cmd::DISPLAY_UPDATE_CONTROL_1, &[0x00, 0x80])?;
        // internal temperature sensor
        self.command(cmd::TEMPERATURE_SENSOR, &[0x80])?;

        // soft reset cleared the controller registers
        self.window = None;
        self.pointer = None;
        Ok(())
    }

    fn load_partial_lut(&mut self) -> Result<()> {
        self.command(cmd::WRITE_LUT, &LUT_PARTIAL)?;
        self.command(cmd::END_OPTION, &[LUT_END_OPTION])?;
        self.command(cmd::GATE_VOLTAGE, &[LUT_GATE_VOLTAGE])?;
        self.command(cmd::SOURCE_VOLTAGE, &LUT_SOURCE_VOLTAGE)?;
        self.command(cmd::WRITE_VCOM, &[LUT_VCOM])?;
        self.command(
            cmd::DISPLAY_OPTION,
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00],
        )?;
        self.command(cmd::BORDER_WAVEFORM, &[0x80])
    }

    async fn wait_busy(&mut self, timeout_ms: u32) -> Result<()> {
        if self.busy.is_low().map_err(|_| Error::Pin)? {
            return Ok(());
        }
        match select(self.busy.wait_for_low(), self.delay.delay_ms(timeout_ms)).await {
            Either::First(res) => res.map_err(|_| Error::Pin),
            Either::Second(()) => {
                log::error!("epd: busy for more than {}ms", timeout_ms);
                Err(Error::BusyTimeout)
            }
        }
    }

    fn command(&mut self, cmd: u8, data: &[u8]) -> Result<()> {
        self.send_command(cmd)?;
        self.send_data(data)
    }

    fn send_command(&mut self, cmd: u8) -> Result<()> {
        self.dc.set_low().map_err(|_| Error::Pin)?;
        self.spi.write(&[cmd]).map_err(|_| Error::Spi)
    }

    fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.dc.set_high().map_err(|_| Error::Pin)?;
        self.spi.write(data).map_err(|_| Error::Spi)
    }
}

impl<SPI, DC, RST, BUSY, DELAY> PanelSink for Ssd1681<SPI, DC, RST, BUSY, DELAY>
where
    SPI: SpiDevice,
    DC: OutputPin,
    RST: OutputPin,
    BUSY: InputPin + Wait,
    DELAY: DelayNs,
{
    async fn show(&mut self, fb: &Framebuffer, full: bool) -> Result<()> {
        let mode = if full {
            PanelMode::Full
        } else {
            PanelMode::Partial
        };
        self.set_mode(mode).await?;
        self.draw_bitmap(0, 0, WIDTH, HEIGHT, fb.data())?;
        self.refresh(full, true).await?;
        self.write_base(fb.data())
    }

    async fn sleep(&mut self) -> Result<()> {
        self.enter_deep_sleep().await
    }
}
