// Crate-wide error type. Variants stay Copy so they can cross task
// boundaries through channels and be logged from anywhere.

use core::fmt;

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// SPI transfer to the panel failed
    Spi,
    /// GPIO read/write failed
    Pin,
    /// I2C transfer to the RTC failed
    I2c,
    /// battery ADC conversion failed
    Adc,
    /// BUSY never went low within the refresh budget
    BusyTimeout,
    /// flash read/write/erase failed
    Storage,
    /// persisted blob absent (normal on first boot)
    NotFound,
    /// malformed configuration frame
    Protocol(ProtocolError),
    /// unknown page or menu id
    InvalidPage(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi => f.write_str("spi transfer failed"),
            Error::Pin => f.write_str("gpio access failed"),
            Error::I2c => f.write_str("i2c transfer failed"),
            Error::Adc => f.write_str("adc conversion failed"),
            Error::BusyTimeout => f.write_str("panel busy timeout"),
            Error::Storage => f.write_str("flash storage failed"),
            Error::NotFound => f.write_str("not found"),
            Error::Protocol(e) => write!(f, "protocol: {}", e),
            Error::InvalidPage(id) => write!(f, "invalid page id {}", id),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
