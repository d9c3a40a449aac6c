// Persisted key/value blobs on raw flash.
//
// One fixed slot per key, SLOT_SIZE bytes each, starting at `base`:
//
//   0..4   magic "IMB1" (LE)
//   4      key
//   5      reserved (0)
//   6..8   payload length (LE)
//   8..12  FNV-1a checksum over header[0..8] + payload
//   12..   payload
//
// An erased slot (no magic) reads as absent. A slot whose magic is
// right but whose checksum fails is reported as Storage corruption
// and callers fall back to defaults.

use embedded_storage::Storage;

use crate::error::{Error, Result};

pub const SLOT_SIZE: u32 = 4096;
pub const HEADER_LEN: usize = 12;
pub const MAX_PAYLOAD: usize = SLOT_SIZE as usize - HEADER_LEN;

const BLOB_MAGIC: u32 = 0x3142_4D49; // "IMB1"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKey {
    Settings,
    BatteryCurve,
    Alarm,
}

impl BlobKey {
    const fn id(self) -> u8 {
        match self {
            BlobKey::Settings => 0,
            BlobKey::BatteryCurve => 1,
            BlobKey::Alarm => 2,
        }
    }

    pub const COUNT: u32 = 3;
}

/// Region of flash needed for every slot, for partition sizing.
pub const REGION_SIZE: u32 = SLOT_SIZE * BlobKey::COUNT;

pub struct BlobStore<S> {
    flash: S,
    base: u32,
}

impl<S: Storage> BlobStore<S> {
    pub fn new(flash: S, base: u32) -> Self {
        Self { flash, base }
    }

    fn slot_addr(&self, key: BlobKey) -> u32 {
        self.base + key.id() as u32 * SLOT_SIZE
    }

    /// Read `key` into `buf`. `Ok(None)` if nothing was ever stored.
    pub fn read(&mut self, key: BlobKey, buf: &mut [u8]) -> Result<Option<usize>> {
        let addr = self.slot_addr(key);
        let mut header = [0u8; HEADER_LEN];
        self.flash.read(addr, &mut header).map_err(|_| Error::Storage)?;

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != BLOB_MAGIC || header[4] != key.id() {
            return Ok(None);
        }

        let len = u16::from_le_bytes([header[6], header[7]]) as usize;
        if len > MAX_PAYLOAD || len > buf.len() {
            log::warn!("storage: {:?} blob of {} bytes does not fit", key, len);
            return Err(Error::Storage);
        }

        let payload = &mut buf[..len];
        self.flash
            .read(addr + HEADER_LEN as u32, payload)
            .map_err(|_| Error::Storage)?;

        let expected = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let actual = checksum32_continue(checksum32(&header[..8]), payload);
        if expected != actual {
            log::warn!("storage: {:?} checksum mismatch", key);
            return Err(Error::Storage);
        }

        Ok(Some(len))
    }

    pub fn write(&mut self, key: BlobKey, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::Storage);
        }

        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&BLOB_MAGIC.to_le_bytes());
        header[4] = key.id();
        header[6..8].copy_from_slice(&(data.len() as u16).to_le_bytes());
        let sum = checksum32_continue(checksum32(&header[..8]), data);
        header[8..12].copy_from_slice(&sum.to_le_bytes());

        let addr = self.slot_addr(key);
        // payload first, so a torn write leaves the old header invalid
        // rather than pointing at half-written data
        self.flash
            .write(addr + HEADER_LEN as u32, data)
            .map_err(|_| Error::Storage)?;
        self.flash.write(addr, &header).map_err(|_| Error::Storage)?;
        log::debug!("storage: wrote {:?} ({} bytes)", key, data.len());
        Ok(())
    }

    /// Forget `key`; subsequent reads return `Ok(None)`.
    pub fn remove(&mut self, key: BlobKey) -> Result<()> {
        let addr = self.slot_addr(key);
        self.flash
            .write(addr, &[0xFF; HEADER_LEN])
            .map_err(|_| Error::Storage)
    }

    pub fn release(self) -> S {
        self.flash
    }
}

/// FNV-1a, used for every persisted record in the crate.
pub fn checksum32(bytes: &[u8]) -> u32 {
    checksum32_continue(0x811C_9DC5, bytes)
}

fn checksum32_continue(mut hash: u32, bytes: &[u8]) -> u32 {
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

#[cfg(test)]
pub(crate) mod mock {
    use embedded_storage::{ReadStorage, Storage};

    /// Flash in RAM, erased to 0xFF.
    pub struct RamFlash {
        pub mem: Vec<u8>,
    }

    impl RamFlash {
        pub fn new(size: usize) -> Self {
            Self {
                mem: vec![0xFF; size],
            }
        }
    }

    #[derive(Debug)]
    pub struct OutOfRange;

    impl ReadStorage for RamFlash {
        type Error = OutOfRange;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), OutOfRange> {
            let start = offset as usize;
            let src = self.mem.get(start..start + bytes.len()).ok_or(OutOfRange)?;
            bytes.copy_from_slice(src);
            Ok(())
        }

        fn capacity(&self) -> usize {
            self.mem.len()
        }
    }

    impl Storage for RamFlash {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), OutOfRange> {
            let start = offset as usize;
            let dst = self.mem.get_mut(start..start + bytes.len()).ok_or(OutOfRange)?;
            dst.copy_from_slice(bytes);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RamFlash;
    use super::*;

    fn store() -> BlobStore<RamFlash> {
        BlobStore::new(RamFlash::new(REGION_SIZE as usize + 0x1000), 0x1000)
    }

    #[test]
    fn erased_flash_reads_as_absent() {
        let mut s = store();
        let mut buf = [0u8; 64];
        assert_eq!(s.read(BlobKey::BatteryCurve, &mut buf), Ok(None));
    }

    #[test]
    fn keys_use_separate_slots() {
        let mut s = store();
        s.write(BlobKey::Settings, &[1, 2, 3]).unwrap();
        s.write(BlobKey::BatteryCurve, &[9; 300]).unwrap();

        let mut buf = [0u8; 512];
        assert_eq!(s.read(BlobKey::Settings, &mut buf), Ok(Some(3)));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(s.read(BlobKey::BatteryCurve, &mut buf), Ok(Some(300)));
        assert!(buf[..300].iter().all(|&b| b == 9));
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let mut s = store();
        s.write(BlobKey::Settings, &[5; 16]).unwrap();
        let mut flash = s.release();
        flash.mem[0x1000 + HEADER_LEN + 3] ^= 0x40;

        let mut s = BlobStore::new(flash, 0x1000);
        let mut buf = [0u8; 16];
        assert_eq!(s.read(BlobKey::Settings, &mut buf), Err(Error::Storage));
    }

    #[test]
    fn removed_blob_is_absent() {
        let mut s = store();
        s.write(BlobKey::BatteryCurve, &[1, 2]).unwrap();
        s.remove(BlobKey::BatteryCurve).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(s.read(BlobKey::BatteryCurve, &mut buf), Ok(None));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let mut s = store();
        let big = vec![0u8; MAX_PAYLOAD + 1];
        assert_eq!(s.write(BlobKey::Settings, &big), Err(Error::Storage));
    }
}
