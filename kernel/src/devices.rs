/*
 * Swap device and demo file backing
 *
 * This kernel has no disk driver, so the page subsystem's swap space is
 * a fixed RAM-backed block device instead - real enough to exercise
 * eviction and fault-back-in, with none of the complexity of a real
 * storage driver. `RamFile` gives the FILE-backed mmap path something
 * to read and write without a filesystem.
 */

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use kernel_core::hw::{BlockDevice, FileHandle};
use spin::Mutex;

const SECTOR_SIZE: usize = 512;

/// Backs VM swap. Sized generously relative to the demo heap this
/// kernel actually runs - a real kernel would size this from the
/// partition table, not a constant.
pub struct RamSwap {
    sectors: Vec<[u8; SECTOR_SIZE]>,
}

impl RamSwap {
    pub fn new(sector_count: usize) -> Self {
        Self { sectors: vec![[0u8; SECTOR_SIZE]; sector_count] }
    }
}

impl BlockDevice for RamSwap {
    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn sector_count(&self) -> u64 {
        self.sectors.len() as u64
    }

    fn read(&mut self, sector: u64, buf: &mut [u8]) {
        let len = buf.len();
        buf.copy_from_slice(&self.sectors[sector as usize][..len]);
    }

    fn write(&mut self, sector: u64, buf: &[u8]) {
        self.sectors[sector as usize][..buf.len()].copy_from_slice(buf);
    }
}

/// An in-memory file FILE-backed mmap pages can read and write.
/// `reopen` clones the `Arc` so every page mapped from the same file
/// shares one buffer but keeps its own cursor, matching what a real
/// open-file-description-per-mapping scheme would do.
#[derive(Clone)]
pub struct RamFile {
    data: Arc<Mutex<Vec<u8>>>,
    cursor: u64,
}

impl RamFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: Arc::new(Mutex::new(data)), cursor: 0 }
    }
}

impl FileHandle for RamFile {
    fn reopen(&self) -> alloc::boxed::Box<dyn FileHandle> {
        alloc::boxed::Box::new(self.clone())
    }

    fn seek(&mut self, offset: u64) {
        self.cursor = offset;
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        let start = self.cursor as usize;
        if start >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.cursor += n as u64;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        let mut data = self.data.lock();
        let start = self.cursor as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        self.cursor += buf.len() as u64;
        buf.len()
    }

    fn close(&mut self) {}
}
