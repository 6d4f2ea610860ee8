//! System Mode Controller (SMC) register module.

pub const SMC_BASE_ADDR: usize = 0x4007_E000;

#[bitbybit::bitenum(u2)]
#[derive(Debug, PartialEq, Eq)]
pub enum RunMode {
    Run = 0b00,
    VeryLowPowerRun = 0b10,
    HighSpeedRun = 0b11,
}

#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum StopMode {
    NormalStop = 0b000,
    VeryLowPowerStop = 0b010,
}

#[bitbybit::bitenum(u2)]
#[derive(Debug, PartialEq, Eq)]
pub enum StopOption {
    Stop1 = 0b01,
    Stop2 = 0b10,
}

/// Power mode status values as reported by the PMSTAT register.
pub mod pmstat {
    pub const RUN: u8 = 0x01;
    pub const STOP: u8 = 0x02;
    pub const VLPR: u8 = 0x04;
    pub const VLPS: u8 = 0x10;
    pub const HSRUN: u8 = 0x80;
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Parameter {
    #[bit(5, r)]
    ells2: bool,
    #[bit(3, r)]
    ells: bool,
    #[bit(0, r)]
    ehsrun: bool,
}

/// Power mode protection register. This register can only be written once after reset.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PowerModeProtection {
    /// Allow high speed run mode.
    #[bit(7, rw)]
    ahsrun: bool,
    /// Allow very low power modes.
    #[bit(5, rw)]
    avlp: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PowerModeControl {
    #[bits(5..=6, rw)]
    runm: Option<RunMode>,
    /// Very low power stop aborted.
    #[bit(3, r)]
    vlpsa: bool,
    #[bits(0..=2, rw)]
    stopm: Option<StopMode>,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct StopControl {
    #[bits(6..=7, rw)]
    stopo: Option<StopOption>,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PowerModeStatus {
    #[bits(0..=7, r)]
    pmstat: u8,
}

/// SMC register access.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Registers {
    #[mmio(PureRead)]
    verid: u32,
    #[mmio(PureRead)]
    param: Parameter,
    pmprot: PowerModeProtection,
    pmctrl: PowerModeControl,
    stopctrl: StopControl,
    #[mmio(PureRead)]
    pmstat: PowerModeStatus,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Registers>(), 0x18);

impl Registers {
    /// Create a new SMC MMIO instance at address [SMC_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioRegisters<'static> {
        unsafe { Self::new_mmio_at(SMC_BASE_ADDR) }
    }
}
