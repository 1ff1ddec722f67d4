use super::opcodes::{AddrMode, Mnemonic, OPCODE_TABLE};
use super::{
    FLAG_CARRY, FLAG_DECIMAL, FLAG_INTERRUPT, FLAG_NEGATIVE, FLAG_OVERFLOW, FLAG_ZERO, Nes,
};

/// Decoded operand of one instruction: either nothing, the accumulator,
/// an immediate byte, a resolved effective address, or a branch offset.
#[derive(Clone, Copy)]
enum Operand {
    Implied,
    Accumulator,
    Immediate(u8),
    Address(u16),
    Branch(i8),
}

impl Nes {
    /// Runs one instruction (or one stall/interrupt slot) and returns the
    /// CPU cycles it consumed.
    pub(crate) fn step_cpu(&mut self) -> u32 {
        if self.dma_cycles > 0 {
            self.dma_cycles -= 1;
            self.total_cycles += 1;
            return 1;
        }

        if self.halted {
            self.total_cycles += 1;
            return 1;
        }

        // NMI beats IRQ at the instruction boundary; IRQ is level-sensitive
        // and honored only with the interrupt-disable flag clear.
        if self.pending_nmi {
            self.pending_nmi = false;
            self.service_nmi();
            self.total_cycles += 7;
            return 7;
        }
        if !self.flag(FLAG_INTERRUPT) && self.irq_line() {
            self.external_irq = false;
            self.service_irq();
            self.total_cycles += 7;
            return 7;
        }

        let opcode_pc = self.pc;
        let opcode = self.fetch_byte();
        let info = &OPCODE_TABLE[opcode as usize];

        if info.unofficial && self.strict_opcodes {
            log::error!("invalid opcode ${opcode:02X} at ${opcode_pc:04X} in strict mode");
            self.halted = true;
            self.total_cycles += 2;
            return 2;
        }
        if info.unofficial {
            log::trace!("unofficial opcode ${opcode:02X} at ${opcode_pc:04X}");
        }

        let (operand, page_crossed) = self.decode_operand(info.mode);
        let mut cycles = info.cycles as u32;
        if page_crossed && info.page_penalty {
            cycles += 1;
        }
        cycles += self.execute_op(info.mnemonic, operand);

        self.total_cycles += cycles as u64;
        cycles
    }

    fn irq_line(&self) -> bool {
        self.external_irq
            || self.apu.irq_pending()
            || self.cart.as_ref().is_some_and(|cart| cart.irq_pending())
    }

    /// Resolves the addressing mode to an operand, reporting whether
    /// indexing crossed a page boundary.
    fn decode_operand(&mut self, mode: AddrMode) -> (Operand, bool) {
        match mode {
            AddrMode::Implied => (Operand::Implied, false),
            AddrMode::Accumulator => (Operand::Accumulator, false),
            AddrMode::Immediate => (Operand::Immediate(self.fetch_byte()), false),
            AddrMode::Relative => (Operand::Branch(self.fetch_byte() as i8), false),
            AddrMode::ZeroPage => (Operand::Address(self.fetch_byte() as u16), false),
            AddrMode::ZeroPageX => {
                let base = self.fetch_byte();
                (Operand::Address(base.wrapping_add(self.x) as u16), false)
            }
            AddrMode::ZeroPageY => {
                let base = self.fetch_byte();
                (Operand::Address(base.wrapping_add(self.y) as u16), false)
            }
            AddrMode::Absolute => (Operand::Address(self.fetch_word()), false),
            AddrMode::AbsoluteX => {
                let base = self.fetch_word();
                let addr = base.wrapping_add(self.x as u16);
                (Operand::Address(addr), (base ^ addr) & 0xFF00 != 0)
            }
            AddrMode::AbsoluteY => {
                let base = self.fetch_word();
                let addr = base.wrapping_add(self.y as u16);
                (Operand::Address(addr), (base ^ addr) & 0xFF00 != 0)
            }
            AddrMode::Indirect => {
                let ptr = self.fetch_word();
                let target = self.read_word_wrapped(ptr);
                (Operand::Address(target), false)
            }
            AddrMode::IndirectX => {
                let zp = self.fetch_byte().wrapping_add(self.x);
                let target = self.read_word_wrapped(zp as u16);
                (Operand::Address(target), false)
            }
            AddrMode::IndirectY => {
                let zp = self.fetch_byte();
                let base = self.read_word_wrapped(zp as u16);
                let addr = base.wrapping_add(self.y as u16);
                (Operand::Address(addr), (base ^ addr) & 0xFF00 != 0)
            }
        }
    }

    fn operand_value(&mut self, operand: Operand) -> u8 {
        match operand {
            Operand::Immediate(value) => value,
            Operand::Address(addr) => self.cpu_read(addr),
            Operand::Accumulator => self.a,
            _ => 0,
        }
    }

    /// Dispatches on the decoded mnemonic. Returns extra cycles beyond the
    /// table base (taken branches only).
    fn execute_op(&mut self, mnemonic: Mnemonic, operand: Operand) -> u32 {
        match mnemonic {
            Mnemonic::Lda => {
                self.a = self.operand_value(operand);
                self.set_zn(self.a);
            }
            Mnemonic::Ldx => {
                self.x = self.operand_value(operand);
                self.set_zn(self.x);
            }
            Mnemonic::Ldy => {
                self.y = self.operand_value(operand);
                self.set_zn(self.y);
            }
            Mnemonic::Sta => {
                if let Operand::Address(addr) = operand {
                    self.cpu_write(addr, self.a);
                }
            }
            Mnemonic::Stx => {
                if let Operand::Address(addr) = operand {
                    self.cpu_write(addr, self.x);
                }
            }
            Mnemonic::Sty => {
                if let Operand::Address(addr) = operand {
                    self.cpu_write(addr, self.y);
                }
            }

            Mnemonic::Adc => {
                let value = self.operand_value(operand);
                self.add_with_carry(value);
            }
            Mnemonic::Sbc => {
                // Subtraction is addition of the ones-complement, with
                // carry acting as the inverted borrow.
                let value = self.operand_value(operand);
                self.add_with_carry(!value);
            }
            Mnemonic::And => {
                self.a &= self.operand_value(operand);
                self.set_zn(self.a);
            }
            Mnemonic::Ora => {
                self.a |= self.operand_value(operand);
                self.set_zn(self.a);
            }
            Mnemonic::Eor => {
                self.a ^= self.operand_value(operand);
                self.set_zn(self.a);
            }
            Mnemonic::Cmp => {
                let value = self.operand_value(operand);
                self.compare(self.a, value);
            }
            Mnemonic::Cpx => {
                let value = self.operand_value(operand);
                self.compare(self.x, value);
            }
            Mnemonic::Cpy => {
                let value = self.operand_value(operand);
                self.compare(self.y, value);
            }
            Mnemonic::Bit => {
                let value = self.operand_value(operand);
                self.set_flag(FLAG_ZERO, self.a & value == 0);
                self.set_flag(FLAG_NEGATIVE, value & 0x80 != 0);
                self.set_flag(FLAG_OVERFLOW, value & 0x40 != 0);
            }

            Mnemonic::Asl => self.rmw(operand, |nes, v| nes.shift_left(v, false)),
            Mnemonic::Rol => self.rmw(operand, |nes, v| nes.shift_left(v, true)),
            Mnemonic::Lsr => self.rmw(operand, |nes, v| nes.shift_right(v, false)),
            Mnemonic::Ror => self.rmw(operand, |nes, v| nes.shift_right(v, true)),
            Mnemonic::Inc => self.rmw(operand, |nes, v| {
                let out = v.wrapping_add(1);
                nes.set_zn(out);
                out
            }),
            Mnemonic::Dec => self.rmw(operand, |nes, v| {
                let out = v.wrapping_sub(1);
                nes.set_zn(out);
                out
            }),

            Mnemonic::Inx => {
                self.x = self.x.wrapping_add(1);
                self.set_zn(self.x);
            }
            Mnemonic::Iny => {
                self.y = self.y.wrapping_add(1);
                self.set_zn(self.y);
            }
            Mnemonic::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.set_zn(self.x);
            }
            Mnemonic::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.set_zn(self.y);
            }

            Mnemonic::Bpl => return self.branch_on(!self.flag(FLAG_NEGATIVE), operand),
            Mnemonic::Bmi => return self.branch_on(self.flag(FLAG_NEGATIVE), operand),
            Mnemonic::Bvc => return self.branch_on(!self.flag(FLAG_OVERFLOW), operand),
            Mnemonic::Bvs => return self.branch_on(self.flag(FLAG_OVERFLOW), operand),
            Mnemonic::Bcc => return self.branch_on(!self.flag(FLAG_CARRY), operand),
            Mnemonic::Bcs => return self.branch_on(self.flag(FLAG_CARRY), operand),
            Mnemonic::Bne => return self.branch_on(!self.flag(FLAG_ZERO), operand),
            Mnemonic::Beq => return self.branch_on(self.flag(FLAG_ZERO), operand),

            Mnemonic::Jmp => {
                if let Operand::Address(addr) = operand {
                    self.pc = addr;
                }
            }
            Mnemonic::Jsr => {
                if let Operand::Address(addr) = operand {
                    self.stack_push_word(self.pc.wrapping_sub(1));
                    self.pc = addr;
                }
            }
            Mnemonic::Rts => {
                self.pc = self.stack_pull_word().wrapping_add(1);
            }
            Mnemonic::Rti => {
                self.pull_status();
                self.pc = self.stack_pull_word();
            }
            Mnemonic::Brk => {
                // The byte after the opcode is padding; the pushed return
                // address skips it.
                self.pc = self.pc.wrapping_add(1);
                self.stack_push_word(self.pc);
                self.push_status(true);
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.read_word(0xFFFE);
            }

            Mnemonic::Pha => self.stack_push(self.a),
            Mnemonic::Php => self.push_status(true),
            Mnemonic::Pla => {
                self.a = self.stack_pull();
                self.set_zn(self.a);
            }
            Mnemonic::Plp => self.pull_status(),

            Mnemonic::Clc => self.set_flag(FLAG_CARRY, false),
            Mnemonic::Sec => self.set_flag(FLAG_CARRY, true),
            Mnemonic::Cli => self.set_flag(FLAG_INTERRUPT, false),
            Mnemonic::Sei => self.set_flag(FLAG_INTERRUPT, true),
            Mnemonic::Cld => self.set_flag(FLAG_DECIMAL, false),
            Mnemonic::Sed => self.set_flag(FLAG_DECIMAL, true),
            Mnemonic::Clv => self.set_flag(FLAG_OVERFLOW, false),

            Mnemonic::Tax => {
                self.x = self.a;
                self.set_zn(self.x);
            }
            Mnemonic::Tay => {
                self.y = self.a;
                self.set_zn(self.y);
            }
            Mnemonic::Txa => {
                self.a = self.x;
                self.set_zn(self.a);
            }
            Mnemonic::Tya => {
                self.a = self.y;
                self.set_zn(self.a);
            }
            Mnemonic::Tsx => {
                self.x = self.sp;
                self.set_zn(self.x);
            }
            Mnemonic::Txs => {
                self.sp = self.x;
            }

            Mnemonic::Nop => {
                // Undocumented NOP shapes still perform their operand read.
                if let Operand::Address(addr) = operand {
                    let _ = self.cpu_read(addr);
                }
            }
            Mnemonic::Kil => {
                log::warn!("KIL opcode executed, CPU wedged at ${:04X}", self.pc);
                self.halted = true;
            }
        }
        0
    }

    fn rmw(&mut self, operand: Operand, apply: fn(&mut Self, u8) -> u8) {
        match operand {
            Operand::Accumulator => {
                self.a = apply(self, self.a);
            }
            Operand::Address(addr) => {
                let value = self.cpu_read(addr);
                let out = apply(self, value);
                self.cpu_write(addr, out);
            }
            _ => {}
        }
    }

    fn branch_on(&mut self, condition: bool, operand: Operand) -> u32 {
        let Operand::Branch(offset) = operand else {
            return 0;
        };
        if !condition {
            return 0;
        }
        let origin = self.pc;
        self.pc = origin.wrapping_add(offset as i16 as u16);
        // Taken branches cost one extra cycle, two when crossing a page.
        1 + u32::from((origin ^ self.pc) & 0xFF00 != 0)
    }

    fn compare(&mut self, lhs: u8, rhs: u8) {
        self.set_flag(FLAG_CARRY, lhs >= rhs);
        self.set_zn(lhs.wrapping_sub(rhs));
    }

    fn add_with_carry(&mut self, operand: u8) {
        let carry = u8::from(self.flag(FLAG_CARRY));
        let (partial, first_overflow) = self.a.overflowing_add(operand);
        let (sum, second_overflow) = partial.overflowing_add(carry);

        self.set_flag(FLAG_CARRY, first_overflow || second_overflow);
        // Signed overflow: both inputs agree in sign and the sum does not.
        self.set_flag(FLAG_OVERFLOW, (self.a ^ sum) & (operand ^ sum) & 0x80 != 0);

        self.a = sum;
        self.set_zn(sum);
    }

    fn shift_left(&mut self, value: u8, rotate: bool) -> u8 {
        let filler = u8::from(rotate && self.flag(FLAG_CARRY));
        self.set_flag(FLAG_CARRY, value & 0x80 != 0);
        let out = (value << 1) | filler;
        self.set_zn(out);
        out
    }

    fn shift_right(&mut self, value: u8, rotate: bool) -> u8 {
        let filler = if rotate && self.flag(FLAG_CARRY) {
            0x80
        } else {
            0
        };
        self.set_flag(FLAG_CARRY, value & 0x01 != 0);
        // The carry fills the vacated bit with OR, on both directions.
        let out = (value >> 1) | filler;
        self.set_zn(out);
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::nes::{FLAG_CARRY, FLAG_NEGATIVE, FLAG_OVERFLOW, FLAG_ZERO, Nes};

    // Builds a 16 KiB NROM image whose PRG starts with `program` and whose
    // reset vector points at $8000.
    fn boot(program: &[u8]) -> Nes {
        let mut prg = vec![0xEAu8; 0x4000];
        prg[..program.len()].copy_from_slice(program);
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;

        let mut rom = vec![b'N', b'E', b'S', 0x1A, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        rom.extend_from_slice(&prg);
        rom.extend_from_slice(&[0u8; 8 * 1024]);

        let mut nes = Nes::new();
        nes.load_rom(&rom).unwrap();
        nes
    }

    fn run_steps(nes: &mut Nes, steps: usize) {
        for _ in 0..steps {
            nes.step_cpu();
        }
    }

    #[test]
    fn reset_state_follows_hardware() {
        let nes = boot(&[]);
        let (_, _, _, p, sp, pc) = nes.cpu_registers();
        assert_eq!(sp, 0xFD);
        assert_eq!(pc, 0x8000);
        assert_ne!(p & 0x04, 0, "interrupts start disabled");
        assert_ne!(p & 0x20, 0, "U bit always reads as set");
    }

    #[test]
    fn lda_sta_roundtrip_through_ram() {
        // LDX #$05; LDA #$AA; STA $00; JMP $8006
        let mut nes = boot(&[0xA2, 0x05, 0xA9, 0xAA, 0x85, 0x00, 0x4C, 0x06, 0x80]);
        run_steps(&mut nes, 4);
        let (a, x, _, _, _, pc) = nes.cpu_registers();
        assert_eq!(nes.ram_peek(0x0000), 0xAA);
        assert_eq!(a, 0xAA);
        assert_eq!(x, 0x05);
        assert_eq!(pc, 0x8006);
    }

    #[test]
    fn asl_accumulator_flags() {
        // LDA #$80; ASL A
        let mut nes = boot(&[0xA9, 0x80, 0x0A]);
        run_steps(&mut nes, 2);
        let (a, _, _, p, _, _) = nes.cpu_registers();
        assert_eq!(a, 0x00);
        assert_ne!(p & FLAG_CARRY, 0);
        assert_ne!(p & FLAG_ZERO, 0);
        assert_eq!(p & FLAG_NEGATIVE, 0);
    }

    #[test]
    fn adc_sets_carry_and_overflow() {
        // LDA #$7F; ADC #$01 -> A=$80, V=1, C=0, N=1
        let mut nes = boot(&[0xA9, 0x7F, 0x69, 0x01]);
        run_steps(&mut nes, 2);
        let (a, _, _, p, _, _) = nes.cpu_registers();
        assert_eq!(a, 0x80);
        assert_ne!(p & FLAG_OVERFLOW, 0);
        assert_eq!(p & FLAG_CARRY, 0);
        assert_ne!(p & FLAG_NEGATIVE, 0);
    }

    #[test]
    fn adc_then_sbc_roundtrips_accumulator() {
        // SEC; LDA #$3C; CLC; ADC #$11; SEC; SBC #$11
        let mut nes = boot(&[0x38, 0xA9, 0x3C, 0x18, 0x69, 0x11, 0x38, 0xE9, 0x11]);
        run_steps(&mut nes, 6);
        let (a, _, _, p, _, _) = nes.cpu_registers();
        assert_eq!(a, 0x3C);
        assert_ne!(p & FLAG_CARRY, 0, "no borrow");
    }

    #[test]
    fn ror_shifts_carry_into_bit7() {
        // SEC; LDA #$00; ROR A -> A=$80
        let mut nes = boot(&[0x38, 0xA9, 0x00, 0x6A]);
        run_steps(&mut nes, 3);
        let (a, _, _, p, _, _) = nes.cpu_registers();
        assert_eq!(a, 0x80);
        assert_eq!(p & FLAG_CARRY, 0);
        assert_ne!(p & FLAG_NEGATIVE, 0);
    }

    #[test]
    fn indirect_jmp_wraps_within_page() {
        // LDA #$34; STA $02FF; LDA #$12; STA $0200; JMP ($02FF)
        let mut nes = boot(&[
            0xA9, 0x34, 0x8D, 0xFF, 0x02, 0xA9, 0x12, 0x8D, 0x00, 0x02, 0x6C, 0xFF, 0x02,
        ]);
        run_steps(&mut nes, 5);
        let (_, _, _, _, _, pc) = nes.cpu_registers();
        assert_eq!(pc, 0x1234);
    }

    #[test]
    fn stack_wraps_and_recovers_lifo() {
        let mut nes = boot(&[]);
        for i in 0..257u16 {
            nes.stack_push(i as u8);
        }
        let (_, _, _, _, sp, _) = nes.cpu_registers();
        assert_eq!(sp, 0xFC);
        for i in (1..257u16).rev() {
            assert_eq!(nes.stack_pull(), i as u8);
        }
    }

    #[test]
    fn plp_ignores_break_and_forces_unused() {
        // LDA #$FF; PHA; PLP
        let mut nes = boot(&[0xA9, 0xFF, 0x48, 0x28]);
        run_steps(&mut nes, 3);
        let (_, _, _, p, _, _) = nes.cpu_registers();
        assert_eq!(p & 0x10, 0, "B is not a real flag");
        assert_ne!(p & 0x20, 0);
    }

    #[test]
    fn branch_cycles_page_cross() {
        // BNE +0x70 from $8002 lands in the same page: 3 cycles.
        let mut nes = boot(&[0xA9, 0x01, 0xD0, 0x70]);
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 3);

        // Backward branch crossing into $7Fxx: 4 cycles.
        let mut nes = boot(&[0xA9, 0x01, 0xD0, 0xFA]);
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 4);
    }

    #[test]
    fn page_cross_penalty_applies_to_reads_not_stores() {
        // LDX #$01; LDA $80FF,X (crosses) vs STA $80FF,X (fixed 5)
        let mut nes = boot(&[0xA2, 0x01, 0xBD, 0xFF, 0x80, 0x9D, 0xFF, 0x80]);
        nes.step_cpu();
        assert_eq!(nes.step_cpu(), 5, "LDA abs,X pays the crossing cycle");
        assert_eq!(nes.step_cpu(), 5, "STA abs,X cost is constant");
    }

    #[test]
    fn unofficial_opcodes_run_as_sized_nops() {
        // $80 is a 2-byte NOP; the following LDA must still execute.
        let mut nes = boot(&[0x80, 0xFF, 0xA9, 0x77]);
        run_steps(&mut nes, 2);
        let (a, _, _, _, _, pc) = nes.cpu_registers();
        assert_eq!(a, 0x77);
        assert_eq!(pc, 0x8004);
    }

    #[test]
    fn strict_mode_halts_on_unofficial_opcode() {
        let mut nes = boot(&[0x80, 0xFF, 0xA9, 0x77]);
        nes.set_strict_opcodes(true);
        run_steps(&mut nes, 2);
        assert!(nes.halted());
        let (a, _, _, _, _, _) = nes.cpu_registers();
        assert_ne!(a, 0x77);
    }

    #[test]
    fn kil_wedges_the_cpu() {
        let mut nes = boot(&[0x02, 0xA9, 0x55]);
        run_steps(&mut nes, 3);
        assert!(nes.halted());
        let (a, _, _, _, _, _) = nes.cpu_registers();
        assert_eq!(a, 0x00);
    }

    #[test]
    fn brk_pushes_padded_return_address() {
        // Vector IRQ/BRK at $FFFE -> filler NOPs; BRK from $8000.
        let mut nes = boot(&[0x00, 0xFF, 0xEA]);
        nes.step_cpu();
        let (_, _, _, p, _, _) = nes.cpu_registers();
        assert_ne!(p & 0x04, 0, "BRK sets I");
        let pushed_status = nes.stack_pull();
        assert_ne!(pushed_status & 0x10, 0, "pushed copy carries B");
        // Pushed return address skips the padding operand byte.
        assert_eq!(nes.stack_pull_word(), 0x8002);
    }
}
