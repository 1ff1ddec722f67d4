use std::{fs, path::Path};

use thiserror::Error;

use super::mapper::{Mapper, Mirroring};

pub const PRG_BANK_SIZE: usize = 16 * 1024;
pub const CHR_BANK_SIZE: usize = 8 * 1024;
pub const SAV_BANK_SIZE: usize = 8 * 1024;

const MAX_PRG_BANKS: usize = 128;
const MAX_CHR_BANKS: usize = 32;
const MAX_SAV_BANKS: usize = 4;

#[derive(Error, Debug)]
pub enum RomError {
    #[error("invalid iNES header, expected NES<EOF> magic")]
    BadHeader,
    #[error("inconsistent iNES header: {0}")]
    BadSize(&'static str),
    #[error("ROM truncated: expected {expected} bytes of {section}, file ended early")]
    Truncated {
        section: &'static str,
        expected: usize,
    },
    #[error("unsupported mapper {0}")]
    UnsupportedMapper(u16),
    #[error("ROM I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Parsed 16-byte iNES header, returned to the caller by `load_rom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomHeader {
    /// PRG-ROM size in 16 KiB units.
    pub prg_banks: usize,
    /// CHR-ROM size in 8 KiB units; zero means the cart carries CHR-RAM.
    pub chr_banks: usize,
    /// Battery-backed RAM size in 8 KiB units.
    pub sav_banks: usize,
    pub mapper_id: u16,
    pub mirroring: Mirroring,
    pub has_battery: bool,
    pub has_trainer: bool,
}

/// Owns PRG/CHR/SAV storage and the mapper that routes accesses into it.
/// The mapper holds bank registers only; every operation that touches ROM
/// or RAM bytes goes through here with the storage borrowed in.
pub struct Cartridge {
    header: RomHeader,
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    sav: Vec<u8>,
    sav_dirty: bool,
    mapper: Mapper,
}

impl Cartridge {
    pub fn from_file(path: &Path) -> Result<Self, RomError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RomError> {
        if bytes.len() < 16 || &bytes[0..4] != b"NES\x1A" {
            return Err(RomError::BadHeader);
        }

        let prg_banks = bytes[4] as usize;
        let chr_banks = bytes[5] as usize;
        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let sav_banks = if bytes[8] == 0 { 1 } else { bytes[8] as usize };

        if prg_banks == 0 || prg_banks > MAX_PRG_BANKS {
            return Err(RomError::BadSize("PRG bank count out of range"));
        }
        if chr_banks > MAX_CHR_BANKS {
            return Err(RomError::BadSize("CHR bank count out of range"));
        }
        if sav_banks > MAX_SAV_BANKS {
            return Err(RomError::BadSize("SAV bank count out of range"));
        }

        let mapper_id = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let four_screen = (flags6 & 0x08) != 0;
        let mirroring = if four_screen {
            Mirroring::FourScreen
        } else if (flags6 & 0x01) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let has_battery = (flags6 & 0x02) != 0;
        let has_trainer = (flags6 & 0x04) != 0;

        let header = RomHeader {
            prg_banks,
            chr_banks,
            sav_banks,
            mapper_id,
            mirroring,
            has_battery,
            has_trainer,
        };

        let mut cursor = 16usize;
        if has_trainer {
            cursor += 512;
        }

        let prg_size = prg_banks * PRG_BANK_SIZE;
        if bytes.len() < cursor + prg_size {
            return Err(RomError::Truncated {
                section: "PRG-ROM",
                expected: prg_size,
            });
        }
        let prg_rom = bytes[cursor..cursor + prg_size].to_vec();
        cursor += prg_size;

        let (chr, chr_is_ram) = if chr_banks == 0 {
            (vec![0; CHR_BANK_SIZE], true)
        } else {
            let chr_size = chr_banks * CHR_BANK_SIZE;
            if bytes.len() < cursor + chr_size {
                return Err(RomError::Truncated {
                    section: "CHR-ROM",
                    expected: chr_size,
                });
            }
            (bytes[cursor..cursor + chr_size].to_vec(), false)
        };

        let mapper = Mapper::for_header(&header)?;
        log::debug!(
            "loaded ROM: mapper {} ({}), {}x16K PRG, {}x8K CHR{}, {:?} mirroring",
            mapper_id,
            mapper.name(),
            prg_banks,
            chr_banks,
            if chr_is_ram { " (RAM)" } else { "" },
            mirroring,
        );

        Ok(Self {
            header,
            prg_rom,
            chr,
            chr_is_ram,
            sav: vec![0; sav_banks * SAV_BANK_SIZE],
            sav_dirty: false,
            mapper,
        })
    }

    pub fn header(&self) -> &RomHeader {
        &self.header
    }

    pub fn mapper_name(&self) -> &'static str {
        self.mapper.name()
    }

    pub fn cpu_read(&self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => {
                let idx = (addr as usize - 0x6000) % self.sav.len();
                self.sav[idx]
            }
            0x8000..=0xFFFF => self.mapper.cpu_read(&self.prg_rom, addr),
            _ => {
                log::trace!("read from unmapped cartridge address ${addr:04X}");
                0
            }
        }
    }

    pub fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => {
                let idx = (addr as usize - 0x6000) % self.sav.len();
                self.sav[idx] = value;
                if self.header.has_battery {
                    self.sav_dirty = true;
                }
            }
            0x8000..=0xFFFF => self.mapper.cpu_write(addr, value),
            _ => {
                log::trace!("write to unmapped cartridge address ${addr:04X}");
            }
        }
    }

    pub fn ppu_read(&self, addr: u16) -> u8 {
        self.mapper.ppu_read(&self.chr, addr)
    }

    pub fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            self.mapper.ppu_write(&mut self.chr, addr, value);
        }
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mapper.mirroring()
    }

    /// Invoked by the PPU once per visible scanline after the background
    /// fetches, while rendering is enabled.
    pub fn on_scanline(&mut self) {
        self.mapper.on_scanline();
    }

    pub fn irq_pending(&self) -> bool {
        self.mapper.irq_pending()
    }

    /// Hands the battery-backed region to the caller-owned sink iff it has
    /// been written since the last flush. Persisting is the host's concern.
    pub fn flush_save_ram<F: FnMut(&[u8])>(&mut self, mut sink: F) {
        if self.header.has_battery && self.sav_dirty {
            sink(&self.sav);
            self.sav_dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_rom(prg_banks: u8, chr_banks: u8, flags6: u8, mapper_high: u8) -> Vec<u8> {
        let mut rom = vec![
            b'N', b'E', b'S', 0x1A, prg_banks, chr_banks, flags6, mapper_high, 0, 0, 0, 0, 0, 0, 0,
            0,
        ];
        let payload = prg_banks as usize * PRG_BANK_SIZE + chr_banks as usize * CHR_BANK_SIZE;
        rom.resize(16 + payload, 0);
        rom
    }

    #[test]
    fn parses_header_fields() {
        let cart = Cartridge::from_bytes(&build_rom(2, 1, 0x03, 0x00)).unwrap();
        let header = cart.header();
        assert_eq!(header.prg_banks, 2);
        assert_eq!(header.chr_banks, 1);
        assert_eq!(header.mapper_id, 0);
        assert_eq!(header.mirroring, Mirroring::Vertical);
        assert!(header.has_battery);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut rom = build_rom(1, 1, 0, 0);
        rom[3] = 0x00;
        assert!(matches!(
            Cartridge::from_bytes(&rom),
            Err(RomError::BadHeader)
        ));
    }

    #[test]
    fn rejects_truncated_prg() {
        let mut rom = build_rom(2, 0, 0, 0);
        rom.truncate(16 + PRG_BANK_SIZE);
        assert!(matches!(
            Cartridge::from_bytes(&rom),
            Err(RomError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_unknown_mapper_id() {
        let rom = build_rom(1, 1, 0xF0, 0x00);
        assert!(matches!(
            Cartridge::from_bytes(&rom),
            Err(RomError::UnsupportedMapper(15))
        ));
    }

    #[test]
    fn zero_chr_banks_mean_chr_ram() {
        let mut cart = Cartridge::from_bytes(&build_rom(1, 0, 0, 0)).unwrap();
        cart.ppu_write(0x0123, 0xAB);
        assert_eq!(cart.ppu_read(0x0123), 0xAB);
    }

    #[test]
    fn chr_rom_ignores_ppu_writes() {
        let mut cart = Cartridge::from_bytes(&build_rom(1, 1, 0, 0)).unwrap();
        cart.ppu_write(0x0123, 0xAB);
        assert_eq!(cart.ppu_read(0x0123), 0x00);
    }

    #[test]
    fn trainer_is_skipped() {
        let mut rom = build_rom(1, 1, 0x04, 0);
        rom.splice(16..16, std::iter::repeat(0xEEu8).take(512));
        rom[16 + 512] = 0x42;
        let cart = Cartridge::from_bytes(&rom).unwrap();
        assert_eq!(cart.cpu_read(0x8000), 0x42);
    }

    #[test]
    fn save_ram_flushes_only_when_dirty() {
        let mut cart = Cartridge::from_bytes(&build_rom(1, 1, 0x02, 0)).unwrap();

        let mut flushed = 0;
        cart.flush_save_ram(|_| flushed += 1);
        assert_eq!(flushed, 0);

        cart.cpu_write(0x6000, 0x5A);
        cart.flush_save_ram(|bytes| {
            flushed += 1;
            assert_eq!(bytes[0], 0x5A);
        });
        assert_eq!(flushed, 1);

        cart.flush_save_ram(|_| flushed += 1);
        assert_eq!(flushed, 1);
    }
}
