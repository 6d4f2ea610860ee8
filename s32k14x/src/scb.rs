//! Cortex-M4 system control register.
//!
//! Only the system control register (SCR) is provided, which is required to select between
//! sleep and deep sleep before executing a wait-for-interrupt instruction.

pub const SCR_ADDR: usize = 0xE000_ED10;

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SystemControl {
    #[bit(4, rw)]
    sevonpend: bool,
    /// Use deep sleep as the low power mode.
    #[bit(2, rw)]
    sleepdeep: bool,
    #[bit(1, rw)]
    sleeponexit: bool,
}

#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Registers {
    scr: SystemControl,
}

impl Registers {
    /// Create a new SCR MMIO instance at address [SCR_ADDR].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioRegisters<'static> {
        unsafe { Self::new_mmio_at(SCR_ADDR) }
    }
}
