//! Status register 1 bits

use bitflags::bitflags;

bitflags! {
    /// Status register 1 as returned by the read-status opcode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusRegister: u8 {
        /// Write In Progress: an internal program/erase is running
        const BUSY = 1 << 0;
        /// Write Enable Latch
        const WEL  = 1 << 1;
        /// Block Protect bit 0
        const BP0  = 1 << 2;
        /// Block Protect bit 1
        const BP1  = 1 << 3;
        /// Block Protect bit 2
        const BP2  = 1 << 4;
        /// Top/Bottom protect
        const TB   = 1 << 5;
        /// Sector/Block protect
        const SEC  = 1 << 6;
        /// Status Register Protect
        const SRP  = 1 << 7;
    }
}

impl StatusRegister {
    /// Returns true while the chip is executing a program or erase
    pub fn is_busy(self) -> bool {
        self.contains(Self::BUSY)
    }
}
