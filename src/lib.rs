pub mod nes;

pub use nes::Nes;
pub use nes::cartridge::{RomError, RomHeader};
