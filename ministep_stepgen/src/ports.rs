//! GPIO port banks driven by the generator.
//!
//! The generator writes whole port words, one per bank. [`SimPorts`] keeps
//! them in memory for simulation and tests; [`MappedPorts`] maps a register
//! file (or a `/dev/mem` window) and writes each word with a volatile store.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use ministep_common::consts::MAX_GPIO_PORTS;

/// Bytes covered by the port window: one `u32` per bank.
pub const PORT_WINDOW_LEN: usize = MAX_GPIO_PORTS * core::mem::size_of::<u32>();

/// Output side of the GPIO banks.
///
/// `write` is called from the generator tick and must not block.
pub trait PortBank: Send {
    /// Current level word of `port`.
    fn read(&self, port: u8) -> u32;

    /// Drive the whole level word of `port`.
    fn write(&mut self, port: u8, level: u32);
}

/// In-memory port banks.
#[derive(Debug, Clone, Default)]
pub struct SimPorts {
    levels: [u32; MAX_GPIO_PORTS],
    writes: u64,
}

impl SimPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of port words written so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn levels(&self) -> &[u32; MAX_GPIO_PORTS] {
        &self.levels
    }
}

impl PortBank for SimPorts {
    #[inline]
    fn read(&self, port: u8) -> u32 {
        self.levels.get(port as usize).copied().unwrap_or(0)
    }

    #[inline]
    fn write(&mut self, port: u8, level: u32) {
        if let Some(slot) = self.levels.get_mut(port as usize) {
            *slot = level;
            self.writes += 1;
        }
    }
}

/// Errors raised while mapping a port window.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("Failed to open port window {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map port window {path}: {source}")]
    Map {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Port banks backed by a shared file mapping.
#[derive(Debug)]
pub struct MappedPorts {
    map: MmapMut,
}

impl MappedPorts {
    /// Map the first [`PORT_WINDOW_LEN`] bytes of `path`, growing the file if
    /// it is shorter.
    ///
    /// # Errors
    ///
    /// `Open` if the file cannot be opened or resized, `Map` if `mmap` fails.
    pub fn open(path: &Path) -> Result<Self, PortError> {
        let display = path.display().to_string();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| PortError::Open {
                path: display.clone(),
                source,
            })?;

        let len = file
            .metadata()
            .map_err(|source| PortError::Open {
                path: display.clone(),
                source,
            })?
            .len();
        if len < PORT_WINDOW_LEN as u64 {
            file.set_len(PORT_WINDOW_LEN as u64)
                .map_err(|source| PortError::Open {
                    path: display.clone(),
                    source,
                })?;
        }

        // SAFETY: the file is at least PORT_WINDOW_LEN long and is not
        // truncated while mapped.
        let map = unsafe { MmapOptions::new().len(PORT_WINDOW_LEN).map_mut(&file) }
            .map_err(|source| PortError::Map {
                path: display.clone(),
                source,
            })?;

        let mapped_path = &display;
        info!(path = %mapped_path, len = PORT_WINDOW_LEN, "port window mapped");
        Ok(Self { map })
    }

    #[inline]
    fn word(&self, port: u8) -> Option<*const u32> {
        let offset = port as usize * core::mem::size_of::<u32>();
        (offset + core::mem::size_of::<u32>() <= self.map.len())
            .then(|| self.map[offset..].as_ptr().cast::<u32>())
    }
}

impl PortBank for MappedPorts {
    #[inline]
    fn read(&self, port: u8) -> u32 {
        match self.word(port) {
            // SAFETY: in bounds and 4-byte aligned (page-aligned base).
            Some(ptr) => unsafe { ptr.read_volatile() },
            None => 0,
        }
    }

    #[inline]
    fn write(&mut self, port: u8, level: u32) {
        let offset = port as usize * core::mem::size_of::<u32>();
        if offset + core::mem::size_of::<u32>() > self.map.len() {
            return;
        }
        let ptr = self.map[offset..].as_mut_ptr().cast::<u32>();
        // SAFETY: in bounds and 4-byte aligned (page-aligned base).
        unsafe { ptr.write_volatile(level) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_ports_ignore_out_of_range() {
        let mut ports = SimPorts::new();
        ports.write(3, 0xA5);
        ports.write(MAX_GPIO_PORTS as u8, 0xFF);
        assert_eq!(ports.read(3), 0xA5);
        assert_eq!(ports.read(MAX_GPIO_PORTS as u8), 0);
        assert_eq!(ports.writes(), 1);
    }

    #[test]
    fn mapped_ports_persist_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.bin");

        let mut ports = MappedPorts::open(&path).unwrap();
        ports.write(0, 0x1);
        ports.write(9, 0xDEAD_BEEF);
        assert_eq!(ports.read(9), 0xDEAD_BEEF);
        drop(ports);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), PORT_WINDOW_LEN);
        let word = u32::from_ne_bytes(bytes[36..40].try_into().unwrap());
        assert_eq!(word, 0xDEAD_BEEF);
    }
}
