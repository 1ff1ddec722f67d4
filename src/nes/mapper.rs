use super::cartridge::{RomError, RomHeader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    OneScreenLower,
    OneScreenUpper,
    FourScreen,
}

/// Closed set of supported memory controllers. Each variant keeps bank
/// registers and latches only; PRG/CHR bytes are borrowed in from the
/// cartridge on every access.
pub enum Mapper {
    Nrom(Nrom),
    Mmc1(Mmc1),
    Uxrom(Uxrom),
    Cnrom(Cnrom),
    Mmc3(Mmc3),
}

impl Mapper {
    pub fn for_header(header: &RomHeader) -> Result<Self, RomError> {
        Ok(match header.mapper_id {
            0 => Mapper::Nrom(Nrom::new(header)),
            1 => Mapper::Mmc1(Mmc1::new()),
            2 => Mapper::Uxrom(Uxrom::new(header)),
            3 => Mapper::Cnrom(Cnrom::new(header)),
            4 => Mapper::Mmc3(Mmc3::new(header)),
            id => return Err(RomError::UnsupportedMapper(id)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mapper::Nrom(_) => "NROM",
            Mapper::Mmc1(_) => "MMC1",
            Mapper::Uxrom(_) => "UxROM",
            Mapper::Cnrom(_) => "CNROM",
            Mapper::Mmc3(_) => "MMC3",
        }
    }

    pub fn cpu_read(&self, prg_rom: &[u8], addr: u16) -> u8 {
        match self {
            Mapper::Nrom(m) => m.cpu_read(prg_rom, addr),
            Mapper::Mmc1(m) => m.cpu_read(prg_rom, addr),
            Mapper::Uxrom(m) => m.cpu_read(prg_rom, addr),
            Mapper::Cnrom(m) => m.cpu_read(prg_rom, addr),
            Mapper::Mmc3(m) => m.cpu_read(prg_rom, addr),
        }
    }

    pub fn cpu_write(&mut self, addr: u16, value: u8) {
        match self {
            Mapper::Nrom(_) => {}
            Mapper::Mmc1(m) => m.cpu_write(addr, value),
            Mapper::Uxrom(m) => m.cpu_write(addr, value),
            Mapper::Cnrom(m) => m.cpu_write(addr, value),
            Mapper::Mmc3(m) => m.cpu_write(addr, value),
        }
    }

    pub fn ppu_read(&self, chr: &[u8], addr: u16) -> u8 {
        chr[self.chr_index(chr.len(), addr)]
    }

    pub fn ppu_write(&self, chr: &mut [u8], addr: u16, value: u8) {
        let idx = self.chr_index(chr.len(), addr);
        chr[idx] = value;
    }

    pub fn mirroring(&self) -> Mirroring {
        match self {
            Mapper::Nrom(m) => m.mirroring,
            Mapper::Mmc1(m) => m.mirroring(),
            Mapper::Uxrom(m) => m.mirroring,
            Mapper::Cnrom(m) => m.mirroring,
            Mapper::Mmc3(m) => m.mirroring(),
        }
    }

    pub fn on_scanline(&mut self) {
        if let Mapper::Mmc3(m) = self {
            m.clock_irq_counter();
        }
    }

    pub fn irq_pending(&self) -> bool {
        match self {
            Mapper::Mmc3(m) => m.irq_pending,
            _ => false,
        }
    }

    fn chr_index(&self, chr_len: usize, addr: u16) -> usize {
        let idx = match self {
            Mapper::Nrom(_) | Mapper::Uxrom(_) => (addr as usize) & 0x1FFF,
            Mapper::Mmc1(m) => m.chr_index(chr_len, addr),
            Mapper::Cnrom(m) => m.chr_index(chr_len, addr),
            Mapper::Mmc3(m) => m.chr_index(chr_len, addr),
        };
        idx % chr_len
    }
}

/// Mapper 0: fixed 16/32 KiB PRG window, fixed CHR.
pub struct Nrom {
    mirroring: Mirroring,
}

impl Nrom {
    fn new(header: &RomHeader) -> Self {
        Self {
            mirroring: header.mirroring,
        }
    }

    fn cpu_read(&self, prg_rom: &[u8], addr: u16) -> u8 {
        // A 16 KiB image appears at both $8000 and $C000.
        prg_rom[(addr as usize - 0x8000) % prg_rom.len()]
    }
}

/// Mapper 1: a serial port. Five writes of one bit each assemble a value;
/// the address of the fifth write (A14..A13) routes it to the control,
/// CHR or PRG select register.
pub struct Mmc1 {
    shift: u8,
    shift_count: u8,
    control: u8,
    chr_select: [u8; 2],
    prg_select: u8,
}

impl Mmc1 {
    fn new() -> Self {
        Self {
            shift: 0,
            shift_count: 0,
            control: 0x0C,
            chr_select: [0; 2],
            prg_select: 0,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if value & 0x80 != 0 {
            // Reset write: discard the sequence, force fix-last PRG mode.
            self.shift = 0;
            self.shift_count = 0;
            self.control |= 0x0C;
            return;
        }

        self.shift |= (value & 0x01) << self.shift_count;
        self.shift_count += 1;
        if self.shift_count < 5 {
            return;
        }

        let data = self.shift;
        self.shift = 0;
        self.shift_count = 0;
        match (addr >> 13) & 0x03 {
            0 => self.control = data,
            1 => self.chr_select[0] = data,
            2 => self.chr_select[1] = data,
            _ => self.prg_select = data & 0x0F,
        }
    }

    fn cpu_read(&self, prg_rom: &[u8], addr: u16) -> u8 {
        let banks = (prg_rom.len() / 0x4000).max(1);
        let select = self.prg_select as usize;

        // Resolve both 16 KiB windows from the PRG mode, then pick by A14.
        let (low_window, high_window) = match (self.control >> 2) & 0x03 {
            0 | 1 => (select & !1, select | 1),
            2 => (0, select),
            _ => (select, banks - 1),
        };

        let bank = if addr < 0xC000 {
            low_window
        } else {
            high_window
        };
        prg_rom[(bank % banks) * 0x4000 + (addr as usize & 0x3FFF)]
    }

    fn chr_index(&self, chr_len: usize, addr: u16) -> usize {
        let addr = addr as usize & 0x1FFF;
        let half_banks = (chr_len / 0x1000).max(1);

        let bank = if self.control & 0x10 == 0 {
            // 8 KiB mode: an even 4 KiB pair, low select bit ignored.
            (self.chr_select[0] as usize & !1) + addr / 0x1000
        } else {
            self.chr_select[addr / 0x1000] as usize
        };

        (bank % half_banks) * 0x1000 + (addr & 0x0FFF)
    }

    fn mirroring(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::OneScreenLower,
            1 => Mirroring::OneScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }
}

/// Mapper 2: switchable 16 KiB PRG at $8000, last bank fixed at $C000.
pub struct Uxrom {
    bank_select: u8,
    mirroring: Mirroring,
}

impl Uxrom {
    fn new(header: &RomHeader) -> Self {
        Self {
            bank_select: 0,
            mirroring: header.mirroring,
        }
    }

    fn cpu_read(&self, prg_rom: &[u8], addr: u16) -> u8 {
        let banks = (prg_rom.len() / 0x4000).max(1);
        let bank = if addr < 0xC000 {
            self.bank_select as usize % banks
        } else {
            banks - 1
        };
        prg_rom[bank * 0x4000 + (addr as usize & 0x3FFF)]
    }

    fn cpu_write(&mut self, _addr: u16, value: u8) {
        self.bank_select = value & 0x0F;
    }
}

/// Mapper 3: fixed PRG, 8 KiB CHR bank switch.
pub struct Cnrom {
    chr_bank: u8,
    mirroring: Mirroring,
}

impl Cnrom {
    fn new(header: &RomHeader) -> Self {
        Self {
            chr_bank: 0,
            mirroring: header.mirroring,
        }
    }

    fn cpu_read(&self, prg_rom: &[u8], addr: u16) -> u8 {
        prg_rom[(addr as usize - 0x8000) % prg_rom.len()]
    }

    fn cpu_write(&mut self, _addr: u16, value: u8) {
        self.chr_bank = value;
    }

    fn chr_index(&self, chr_len: usize, addr: u16) -> usize {
        let banks = (chr_len / 0x2000).max(1);
        (self.chr_bank as usize % banks) * 0x2000 + (addr as usize & 0x1FFF)
    }
}

/// Mapper 4: eight bank registers, PRG/CHR modes, mapper-controlled
/// mirroring and a scanline-clocked IRQ counter.
pub struct Mmc3 {
    bank_select: u8,
    bank_regs: [u8; 8],
    mirroring: Mirroring,
    four_screen: bool,

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

impl Mmc3 {
    fn new(header: &RomHeader) -> Self {
        Self {
            bank_select: 0,
            bank_regs: [0; 8],
            mirroring: header.mirroring,
            four_screen: header.mirroring == Mirroring::FourScreen,
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
        }
    }

    fn cpu_read(&self, prg_rom: &[u8], addr: u16) -> u8 {
        let banks = (prg_rom.len() / 0x2000).max(1);
        let swap = self.bank_select & 0x40 != 0;

        // Four 8 KiB windows from $8000; mode bit 6 trades the first
        // window with the fixed second-to-last bank.
        let bank = match (addr as usize >> 13) & 0x03 {
            0 if !swap => self.bank_regs[6] as usize,
            0 => banks.saturating_sub(2),
            1 => self.bank_regs[7] as usize,
            2 if !swap => banks.saturating_sub(2),
            2 => self.bank_regs[6] as usize,
            _ => banks - 1,
        };

        prg_rom[(bank % banks) * 0x2000 + (addr as usize & 0x1FFF)]
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        let even = addr & 1 == 0;
        match addr & 0x6000 {
            0x0000 => {
                if even {
                    self.bank_select = value;
                } else {
                    self.bank_regs[(self.bank_select & 0x07) as usize] = value;
                }
            }
            0x2000 => {
                if even && !self.four_screen {
                    self.mirroring = if value & 1 == 0 {
                        Mirroring::Vertical
                    } else {
                        Mirroring::Horizontal
                    };
                }
                // Odd writes configure PRG-RAM protection, not modeled.
            }
            0x4000 => {
                if even {
                    self.irq_latch = value;
                } else {
                    self.irq_reload = true;
                }
            }
            _ => {
                if even {
                    // Disabling also acknowledges; CPU interrupt service
                    // does not clear the line on its own.
                    self.irq_enabled = false;
                    self.irq_pending = false;
                } else {
                    self.irq_enabled = true;
                }
            }
        }
    }

    fn chr_index(&self, chr_len: usize, addr: u16) -> usize {
        let addr = addr as usize & 0x1FFF;
        // CHR mode bit inverts A12, swapping the 2x2 KiB and 4x1 KiB halves.
        let invert = if self.bank_select & 0x80 != 0 { 4 } else { 0 };
        let slot = (addr / 0x0400) ^ invert;

        let bank = match slot {
            0 | 1 => (self.bank_regs[0] as usize & !1) | (slot & 1),
            2 | 3 => (self.bank_regs[1] as usize & !1) | (slot & 1),
            wide => self.bank_regs[wide - 2] as usize,
        };

        let banks = (chr_len / 0x0400).max(1);
        (bank % banks) * 0x0400 + (addr & 0x03FF)
    }

    fn clock_irq_counter(&mut self) {
        if self.irq_reload || self.irq_counter == 0 {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }

        if self.irq_enabled && self.irq_counter == 0 {
            self.irq_pending = true;
        }
    }

    fn mirroring(&self) -> Mirroring {
        if self.four_screen {
            Mirroring::FourScreen
        } else {
            self.mirroring
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_banks(total_size: usize, bank_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; total_size];
        for (bank, chunk) in data.chunks_mut(bank_size).enumerate() {
            chunk.fill((bank as u8).wrapping_add(1));
        }
        data
    }

    fn make_mapper(mapper_id: u16, prg_banks: usize, chr_banks: usize) -> Mapper {
        let header = RomHeader {
            prg_banks,
            chr_banks,
            sav_banks: 1,
            mapper_id,
            mirroring: Mirroring::Horizontal,
            has_battery: false,
            has_trainer: false,
        };
        Mapper::for_header(&header).unwrap()
    }

    #[test]
    fn unknown_mapper_id_is_rejected() {
        let header = RomHeader {
            prg_banks: 1,
            chr_banks: 1,
            sav_banks: 1,
            mapper_id: 7,
            mirroring: Mirroring::Horizontal,
            has_battery: false,
            has_trainer: false,
        };
        assert!(matches!(
            Mapper::for_header(&header),
            Err(RomError::UnsupportedMapper(7))
        ));
    }

    #[test]
    fn nrom_mirrors_16k_prg() {
        let mapper = make_mapper(0, 1, 1);
        let prg = patterned_banks(0x4000, 0x4000);
        assert_eq!(mapper.cpu_read(&prg, 0x8000), 1);
        assert_eq!(mapper.cpu_read(&prg, 0xC000), 1);
    }

    #[test]
    fn uxrom_keeps_last_bank_fixed() {
        let mut mapper = make_mapper(2, 3, 1);
        let prg = patterned_banks(3 * 0x4000, 0x4000);

        mapper.cpu_write(0x8000, 1);
        assert_eq!(mapper.cpu_read(&prg, 0x8000), 2);
        assert_eq!(mapper.cpu_read(&prg, 0xC000), 3);
    }

    #[test]
    fn cnrom_switches_chr_bank() {
        let mut mapper = make_mapper(3, 2, 2);
        let chr = patterned_banks(2 * 0x2000, 0x2000);

        mapper.cpu_write(0x8000, 1);
        assert_eq!(mapper.ppu_read(&chr, 0x0000), 2);
    }

    #[test]
    fn mmc1_serial_writes_program_control() {
        let mut mapper = make_mapper(1, 4, 1);

        // Five single-bit writes commit 0b00001 to the control register.
        for bit in [1u8, 0, 0, 0, 0] {
            mapper.cpu_write(0x8000, bit);
        }
        assert_eq!(mapper.mirroring(), Mirroring::OneScreenUpper);

        // Shift register starts clean again: 0b10000 this time.
        for bit in [0u8, 0, 0, 0, 1] {
            mapper.cpu_write(0x8000, bit);
        }
        assert_eq!(mapper.mirroring(), Mirroring::OneScreenLower);
    }

    #[test]
    fn mmc1_bit7_write_resets_shift_register() {
        let mut mapper = make_mapper(1, 4, 1);

        mapper.cpu_write(0x8000, 1);
        mapper.cpu_write(0x8000, 1);
        mapper.cpu_write(0x8000, 0x80);
        // Previous partial sequence discarded; a full one still works.
        for bit in [0u8, 1, 0, 0, 0] {
            mapper.cpu_write(0x8000, bit);
        }
        assert_eq!(mapper.mirroring(), Mirroring::Vertical);
    }

    #[test]
    fn mmc1_prg_bank_switch_in_fix_last_mode() {
        let mut mapper = make_mapper(1, 4, 1);
        let prg = patterned_banks(4 * 0x4000, 0x4000);

        // Power-on control is mode 3: $8000 switchable, $C000 fixed last.
        for bit in [1u8, 0, 0, 0, 0] {
            mapper.cpu_write(0xE000, bit);
        }
        assert_eq!(mapper.cpu_read(&prg, 0x8000), 2);
        assert_eq!(mapper.cpu_read(&prg, 0xC000), 4);
    }

    #[test]
    fn mmc1_chr_4k_banks() {
        let mut mapper = make_mapper(1, 1, 2);
        let chr = patterned_banks(4 * 0x1000, 0x1000);

        // control = 0b10000: 4 KiB CHR mode.
        for bit in [0u8, 0, 0, 0, 1] {
            mapper.cpu_write(0x8000, bit);
        }
        // chr0 = 2, chr1 = 1.
        for bit in [0u8, 1, 0, 0, 0] {
            mapper.cpu_write(0xA000, bit);
        }
        for bit in [1u8, 0, 0, 0, 0] {
            mapper.cpu_write(0xC000, bit);
        }
        assert_eq!(mapper.ppu_read(&chr, 0x0000), 3);
        assert_eq!(mapper.ppu_read(&chr, 0x1000), 2);
    }

    #[test]
    fn mmc3_prg_modes_swap_fixed_window() {
        let mut mapper = make_mapper(4, 2, 1);
        let prg = patterned_banks(4 * 0x2000, 0x2000);

        mapper.cpu_write(0x8000, 0x06);
        mapper.cpu_write(0x8001, 0x00);
        assert_eq!(mapper.cpu_read(&prg, 0x8000), 1);
        assert_eq!(mapper.cpu_read(&prg, 0xC000), 3);
        assert_eq!(mapper.cpu_read(&prg, 0xE000), 4);

        mapper.cpu_write(0x8000, 0x46);
        assert_eq!(mapper.cpu_read(&prg, 0x8000), 3);
        assert_eq!(mapper.cpu_read(&prg, 0xC000), 1);
    }

    #[test]
    fn mmc3_chr_mode_inverts_windows() {
        let mut mapper = make_mapper(4, 2, 1);
        let chr = patterned_banks(8 * 0x0400, 0x0400);

        mapper.cpu_write(0x8000, 0x00);
        mapper.cpu_write(0x8001, 0x02);
        mapper.cpu_write(0x8000, 0x02);
        mapper.cpu_write(0x8001, 0x04);

        assert_eq!(mapper.ppu_read(&chr, 0x0000), 3);
        assert_eq!(mapper.ppu_read(&chr, 0x0400), 4);
        assert_eq!(mapper.ppu_read(&chr, 0x1000), 5);

        mapper.cpu_write(0x8000, 0x80);
        assert_eq!(mapper.ppu_read(&chr, 0x0000), 5);
        assert_eq!(mapper.ppu_read(&chr, 0x1000), 3);
    }

    #[test]
    fn mmc3_mirroring_register() {
        let mut mapper = make_mapper(4, 2, 1);
        assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
        mapper.cpu_write(0xA000, 0x00);
        assert_eq!(mapper.mirroring(), Mirroring::Vertical);
        mapper.cpu_write(0xA000, 0x01);
        assert_eq!(mapper.mirroring(), Mirroring::Horizontal);
    }

    #[test]
    fn mmc3_scanline_irq_counts_down() {
        let mut mapper = make_mapper(4, 2, 1);

        mapper.cpu_write(0xC000, 0x02);
        mapper.cpu_write(0xC001, 0x00);
        mapper.cpu_write(0xE001, 0x00);

        mapper.on_scanline(); // reload to 2
        mapper.on_scanline(); // 1
        assert!(!mapper.irq_pending());
        mapper.on_scanline(); // 0 -> pending
        assert!(mapper.irq_pending());

        // Only the disable register acknowledges.
        mapper.cpu_write(0xE000, 0x00);
        assert!(!mapper.irq_pending());
    }
}
