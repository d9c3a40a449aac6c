// Hardware-facing pieces that stay generic over embedded-hal traits

pub mod battery;
pub mod input;
pub mod ssd1681;
pub mod storage;
