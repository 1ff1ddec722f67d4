#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Implied,
    Accumulator,
    Immediate,
    Relative,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
}

impl AddrMode {
    /// Operand bytes following the opcode.
    pub fn operand_len(self) -> u16 {
        match self {
            AddrMode::Implied | AddrMode::Accumulator => 0,
            AddrMode::Absolute | AddrMode::AbsoluteX | AddrMode::AbsoluteY | AddrMode::Indirect => {
                2
            }
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    /// JAM/KIL slots; executing one wedges the CPU.
    Kil,
}

/// One decode-table record. `page_penalty` marks read-shaped instructions
/// that pay an extra cycle when indexing crosses a page; `unofficial`
/// marks opcodes absent from the documented set (run as NOPs of the
/// documented length unless strict mode is on).
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub mnemonic: Mnemonic,
    pub mode: AddrMode,
    pub cycles: u8,
    pub page_penalty: bool,
    pub unofficial: bool,
}

const fn op(mnemonic: Mnemonic, mode: AddrMode, cycles: u8) -> OpInfo {
    OpInfo {
        mnemonic,
        mode,
        cycles,
        page_penalty: false,
        unofficial: false,
    }
}

/// Read instruction with a page-cross penalty cycle.
const fn opp(mnemonic: Mnemonic, mode: AddrMode, cycles: u8) -> OpInfo {
    OpInfo {
        mnemonic,
        mode,
        cycles,
        page_penalty: true,
        unofficial: false,
    }
}

/// Undocumented slot executed as a NOP of the documented shape.
const fn ill(mode: AddrMode, cycles: u8) -> OpInfo {
    OpInfo {
        mnemonic: Mnemonic::Nop,
        mode,
        cycles,
        page_penalty: false,
        unofficial: true,
    }
}

const fn illp(mode: AddrMode, cycles: u8) -> OpInfo {
    OpInfo {
        mnemonic: Mnemonic::Nop,
        mode,
        cycles,
        page_penalty: true,
        unofficial: true,
    }
}

const fn jam() -> OpInfo {
    OpInfo {
        mnemonic: Mnemonic::Kil,
        mode: AddrMode::Implied,
        cycles: 2,
        page_penalty: false,
        unofficial: true,
    }
}

use AddrMode::*;
use Mnemonic::*;

/// 256-entry decode table indexed by opcode byte: the single source of
/// truth for mnemonic, addressing mode and base cycle cost.
pub static OPCODE_TABLE: [OpInfo; 256] = [
    // 0x00
    op(Brk, Implied, 7),
    op(Ora, IndirectX, 6),
    jam(),
    ill(IndirectX, 8),
    ill(ZeroPage, 3),
    op(Ora, ZeroPage, 3),
    op(Asl, ZeroPage, 5),
    ill(ZeroPage, 5),
    op(Php, Implied, 3),
    op(Ora, Immediate, 2),
    op(Asl, Accumulator, 2),
    ill(Immediate, 2),
    ill(Absolute, 4),
    op(Ora, Absolute, 4),
    op(Asl, Absolute, 6),
    ill(Absolute, 6),
    // 0x10
    op(Bpl, Relative, 2),
    opp(Ora, IndirectY, 5),
    jam(),
    ill(IndirectY, 8),
    ill(ZeroPageX, 4),
    op(Ora, ZeroPageX, 4),
    op(Asl, ZeroPageX, 6),
    ill(ZeroPageX, 6),
    op(Clc, Implied, 2),
    opp(Ora, AbsoluteY, 4),
    ill(Implied, 2),
    ill(AbsoluteY, 7),
    illp(AbsoluteX, 4),
    opp(Ora, AbsoluteX, 4),
    op(Asl, AbsoluteX, 7),
    ill(AbsoluteX, 7),
    // 0x20
    op(Jsr, Absolute, 6),
    op(And, IndirectX, 6),
    jam(),
    ill(IndirectX, 8),
    op(Bit, ZeroPage, 3),
    op(And, ZeroPage, 3),
    op(Rol, ZeroPage, 5),
    ill(ZeroPage, 5),
    op(Plp, Implied, 4),
    op(And, Immediate, 2),
    op(Rol, Accumulator, 2),
    ill(Immediate, 2),
    op(Bit, Absolute, 4),
    op(And, Absolute, 4),
    op(Rol, Absolute, 6),
    ill(Absolute, 6),
    // 0x30
    op(Bmi, Relative, 2),
    opp(And, IndirectY, 5),
    jam(),
    ill(IndirectY, 8),
    ill(ZeroPageX, 4),
    op(And, ZeroPageX, 4),
    op(Rol, ZeroPageX, 6),
    ill(ZeroPageX, 6),
    op(Sec, Implied, 2),
    opp(And, AbsoluteY, 4),
    ill(Implied, 2),
    ill(AbsoluteY, 7),
    illp(AbsoluteX, 4),
    opp(And, AbsoluteX, 4),
    op(Rol, AbsoluteX, 7),
    ill(AbsoluteX, 7),
    // 0x40
    op(Rti, Implied, 6),
    op(Eor, IndirectX, 6),
    jam(),
    ill(IndirectX, 8),
    ill(ZeroPage, 3),
    op(Eor, ZeroPage, 3),
    op(Lsr, ZeroPage, 5),
    ill(ZeroPage, 5),
    op(Pha, Implied, 3),
    op(Eor, Immediate, 2),
    op(Lsr, Accumulator, 2),
    ill(Immediate, 2),
    op(Jmp, Absolute, 3),
    op(Eor, Absolute, 4),
    op(Lsr, Absolute, 6),
    ill(Absolute, 6),
    // 0x50
    op(Bvc, Relative, 2),
    opp(Eor, IndirectY, 5),
    jam(),
    ill(IndirectY, 8),
    ill(ZeroPageX, 4),
    op(Eor, ZeroPageX, 4),
    op(Lsr, ZeroPageX, 6),
    ill(ZeroPageX, 6),
    op(Cli, Implied, 2),
    opp(Eor, AbsoluteY, 4),
    ill(Implied, 2),
    ill(AbsoluteY, 7),
    illp(AbsoluteX, 4),
    opp(Eor, AbsoluteX, 4),
    op(Lsr, AbsoluteX, 7),
    ill(AbsoluteX, 7),
    // 0x60
    op(Rts, Implied, 6),
    op(Adc, IndirectX, 6),
    jam(),
    ill(IndirectX, 8),
    ill(ZeroPage, 3),
    op(Adc, ZeroPage, 3),
    op(Ror, ZeroPage, 5),
    ill(ZeroPage, 5),
    op(Pla, Implied, 4),
    op(Adc, Immediate, 2),
    op(Ror, Accumulator, 2),
    ill(Immediate, 2),
    op(Jmp, Indirect, 5),
    op(Adc, Absolute, 4),
    op(Ror, Absolute, 6),
    ill(Absolute, 6),
    // 0x70
    op(Bvs, Relative, 2),
    opp(Adc, IndirectY, 5),
    jam(),
    ill(IndirectY, 8),
    ill(ZeroPageX, 4),
    op(Adc, ZeroPageX, 4),
    op(Ror, ZeroPageX, 6),
    ill(ZeroPageX, 6),
    op(Sei, Implied, 2),
    opp(Adc, AbsoluteY, 4),
    ill(Implied, 2),
    ill(AbsoluteY, 7),
    illp(AbsoluteX, 4),
    opp(Adc, AbsoluteX, 4),
    op(Ror, AbsoluteX, 7),
    ill(AbsoluteX, 7),
    // 0x80
    ill(Immediate, 2),
    op(Sta, IndirectX, 6),
    ill(Immediate, 2),
    ill(IndirectX, 6),
    op(Sty, ZeroPage, 3),
    op(Sta, ZeroPage, 3),
    op(Stx, ZeroPage, 3),
    ill(ZeroPage, 3),
    op(Dey, Implied, 2),
    ill(Immediate, 2),
    op(Txa, Implied, 2),
    ill(Immediate, 2),
    op(Sty, Absolute, 4),
    op(Sta, Absolute, 4),
    op(Stx, Absolute, 4),
    ill(Absolute, 4),
    // 0x90
    op(Bcc, Relative, 2),
    op(Sta, IndirectY, 6),
    jam(),
    ill(IndirectY, 6),
    op(Sty, ZeroPageX, 4),
    op(Sta, ZeroPageX, 4),
    op(Stx, ZeroPageY, 4),
    ill(ZeroPageY, 4),
    op(Tya, Implied, 2),
    op(Sta, AbsoluteY, 5),
    op(Txs, Implied, 2),
    ill(AbsoluteY, 5),
    ill(AbsoluteX, 5),
    op(Sta, AbsoluteX, 5),
    ill(AbsoluteY, 5),
    ill(AbsoluteY, 5),
    // 0xA0
    op(Ldy, Immediate, 2),
    op(Lda, IndirectX, 6),
    op(Ldx, Immediate, 2),
    ill(IndirectX, 6),
    op(Ldy, ZeroPage, 3),
    op(Lda, ZeroPage, 3),
    op(Ldx, ZeroPage, 3),
    ill(ZeroPage, 3),
    op(Tay, Implied, 2),
    op(Lda, Immediate, 2),
    op(Tax, Implied, 2),
    ill(Immediate, 2),
    op(Ldy, Absolute, 4),
    op(Lda, Absolute, 4),
    op(Ldx, Absolute, 4),
    ill(Absolute, 4),
    // 0xB0
    op(Bcs, Relative, 2),
    opp(Lda, IndirectY, 5),
    jam(),
    illp(IndirectY, 5),
    op(Ldy, ZeroPageX, 4),
    op(Lda, ZeroPageX, 4),
    op(Ldx, ZeroPageY, 4),
    ill(ZeroPageY, 4),
    op(Clv, Implied, 2),
    opp(Lda, AbsoluteY, 4),
    op(Tsx, Implied, 2),
    illp(AbsoluteY, 4),
    opp(Ldy, AbsoluteX, 4),
    opp(Lda, AbsoluteX, 4),
    opp(Ldx, AbsoluteY, 4),
    illp(AbsoluteY, 4),
    // 0xC0
    op(Cpy, Immediate, 2),
    op(Cmp, IndirectX, 6),
    ill(Immediate, 2),
    ill(IndirectX, 8),
    op(Cpy, ZeroPage, 3),
    op(Cmp, ZeroPage, 3),
    op(Dec, ZeroPage, 5),
    ill(ZeroPage, 5),
    op(Iny, Implied, 2),
    op(Cmp, Immediate, 2),
    op(Dex, Implied, 2),
    ill(Immediate, 2),
    op(Cpy, Absolute, 4),
    op(Cmp, Absolute, 4),
    op(Dec, Absolute, 6),
    ill(Absolute, 6),
    // 0xD0
    op(Bne, Relative, 2),
    opp(Cmp, IndirectY, 5),
    jam(),
    ill(IndirectY, 8),
    ill(ZeroPageX, 4),
    op(Cmp, ZeroPageX, 4),
    op(Dec, ZeroPageX, 6),
    ill(ZeroPageX, 6),
    op(Cld, Implied, 2),
    opp(Cmp, AbsoluteY, 4),
    ill(Implied, 2),
    ill(AbsoluteY, 7),
    illp(AbsoluteX, 4),
    opp(Cmp, AbsoluteX, 4),
    op(Dec, AbsoluteX, 7),
    ill(AbsoluteX, 7),
    // 0xE0
    op(Cpx, Immediate, 2),
    op(Sbc, IndirectX, 6),
    ill(Immediate, 2),
    ill(IndirectX, 8),
    op(Cpx, ZeroPage, 3),
    op(Sbc, ZeroPage, 3),
    op(Inc, ZeroPage, 5),
    ill(ZeroPage, 5),
    op(Inx, Implied, 2),
    op(Sbc, Immediate, 2),
    op(Nop, Implied, 2),
    OpInfo {
        // 0xEB is the undocumented SBC immediate alias.
        mnemonic: Sbc,
        mode: Immediate,
        cycles: 2,
        page_penalty: false,
        unofficial: true,
    },
    op(Cpx, Absolute, 4),
    op(Sbc, Absolute, 4),
    op(Inc, Absolute, 6),
    ill(Absolute, 6),
    // 0xF0
    op(Beq, Relative, 2),
    opp(Sbc, IndirectY, 5),
    jam(),
    ill(IndirectY, 8),
    ill(ZeroPageX, 4),
    op(Sbc, ZeroPageX, 4),
    op(Inc, ZeroPageX, 6),
    ill(ZeroPageX, 6),
    op(Sed, Implied, 2),
    opp(Sbc, AbsoluteY, 4),
    ill(Implied, 2),
    ill(AbsoluteY, 7),
    illp(AbsoluteX, 4),
    opp(Sbc, AbsoluteX, 4),
    op(Inc, AbsoluteX, 7),
    ill(AbsoluteX, 7),
];
