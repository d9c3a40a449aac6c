// PCF85063 real-time clock over I2C
//
// Keeps wall time through deep sleep and drives the alarm wake line
// (INT, open drain, active low). Register blocks are encoded by the
// kernel protocol codec; this file only moves bytes.

use embedded_hal::i2c::I2c;
use inkmate_kernel::protocol::{ALARM_REGS_LEN, AlarmRegs, DateTime, TIME_REGS_LEN};
use inkmate_kernel::{Error, Result};

use super::pins::RTC_ADDR;

const REG_CONTROL_2: u8 = 0x01;
const REG_SECONDS: u8 = 0x04;
const REG_SECOND_ALARM: u8 = 0x0B;
const REG_MINUTE_ALARM: u8 = 0x0C;

const CTRL2_AIE: u8 = 1 << 7; // alarm interrupt enable
const CTRL2_AF: u8 = 1 << 6; // alarm flag, write 0 to clear

const ALARM_OFF: u8 = 0x80;

pub struct Pcf85063<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> Pcf85063<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    fn read(&mut self, reg: u8, buf: &mut [u8]) -> Result<()> {
        self.i2c.write_read(RTC_ADDR, &[reg], buf).map_err(|_| Error::I2c)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.i2c.write(RTC_ADDR, data).map_err(|_| Error::I2c)
    }

    /// Current time; a stopped oscillator or garbage registers are errors.
    pub fn read_time(&mut self) -> Result<DateTime> {
        let mut regs = [0u8; TIME_REGS_LEN];
        self.read(REG_SECONDS, &mut regs)?;
        Ok(DateTime::from_registers(&regs)?)
    }

    pub fn write_time(&mut self, dt: &DateTime) -> Result<()> {
        let mut frame = [0u8; TIME_REGS_LEN + 1];
        frame[0] = REG_SECONDS;
        frame[1..].copy_from_slice(&dt.to_registers());
        self.write(&frame)
    }

    /// Program the alarm block and enable the INT output. A fully
    /// disabled block also turns the interrupt off.
    pub fn set_alarm(&mut self, regs: &AlarmRegs) -> Result<()> {
        let mut frame = [0u8; ALARM_REGS_LEN + 2];
        frame[0] = REG_SECOND_ALARM;
        frame[1] = ALARM_OFF;
        frame[2..].copy_from_slice(&regs.encode());
        self.write(&frame)?;

        let enable = *regs != AlarmRegs::DISABLED;
        let mut ctrl = [0u8; 1];
        self.read(REG_CONTROL_2, &mut ctrl)?;
        let mut c = ctrl[0] & !CTRL2_AF;
        if enable {
            c |= CTRL2_AIE;
        } else {
            c &= !CTRL2_AIE;
        }
        self.write(&[REG_CONTROL_2, c])
    }

    pub fn read_alarm(&mut self) -> Result<AlarmRegs> {
        let mut regs = [0u8; ALARM_REGS_LEN];
        self.read(REG_MINUTE_ALARM, &mut regs)?;
        Ok(AlarmRegs::decode(&regs))
    }

    /// Clear a fired alarm so INT releases. Returns whether it had fired.
    pub fn take_alarm_flag(&mut self) -> Result<bool> {
        let mut ctrl = [0u8; 1];
        self.read(REG_CONTROL_2, &mut ctrl)?;
        let fired = ctrl[0] & CTRL2_AF != 0;
        if fired {
            self.write(&[REG_CONTROL_2, ctrl[0] & !CTRL2_AF])?;
        }
        Ok(fired)
    }
}
