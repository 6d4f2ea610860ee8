//! LPSPI register module.
use arbitrary_int::{u2, u3, u12};

use crate::InvalidInstanceError;

pub const LPSPI_0_BASE_ADDR: usize = 0x4002_C000;
pub const LPSPI_1_BASE_ADDR: usize = 0x4002_D000;
pub const LPSPI_2_BASE_ADDR: usize = 0x4002_E000;

/// Number of LPSPI instances on the S32K14x devices.
pub const NUM_INSTANCES: usize = 3;

pub const BASE_ADDRESSES: [usize; NUM_INSTANCES] =
    [LPSPI_0_BASE_ADDR, LPSPI_1_BASE_ADDR, LPSPI_2_BASE_ADDR];

/// Offset of the transmit data register, used as the DMA destination address.
pub const TDR_OFFSET: usize = 0x64;
/// Offset of the receive data register, used as the DMA source address.
pub const RDR_OFFSET: usize = 0x74;

/// Depth of the TX and RX FIFO in words for all S32K14x LPSPI instances.
pub const FIFO_SIZE: usize = 4;

#[bitbybit::bitenum(u1, exhaustive = true)]
#[derive(Default, Debug, PartialEq, Eq)]
pub enum ClockPolarity {
    /// The inactive state of SCK is low.
    #[default]
    IdleLow = 0,
    /// The inactive state of SCK is high.
    IdleHigh = 1,
}

#[bitbybit::bitenum(u1, exhaustive = true)]
#[derive(Default, Debug, PartialEq, Eq)]
pub enum ClockPhase {
    /// Data is captured on the leading edge of SCK and changed on the following edge.
    #[default]
    CaptureLeading = 0,
    /// Data is changed on the leading edge of SCK and captured on the following edge.
    CaptureTrailing = 1,
}

/// Prescaler applied to the functional clock for all SCK related timings.
#[bitbybit::bitenum(u3, exhaustive = true)]
#[derive(Default, Debug, PartialEq, Eq)]
pub enum Prescaler {
    #[default]
    Div1 = 0b000,
    Div2 = 0b001,
    Div4 = 0b010,
    Div8 = 0b011,
    Div16 = 0b100,
    Div32 = 0b101,
    Div64 = 0b110,
    Div128 = 0b111,
}

impl Prescaler {
    pub const fn div_value(&self) -> u32 {
        match self {
            Prescaler::Div1 => 1,
            Prescaler::Div2 => 2,
            Prescaler::Div4 => 4,
            Prescaler::Div8 => 8,
            Prescaler::Div16 => 16,
            Prescaler::Div32 => 32,
            Prescaler::Div64 => 64,
            Prescaler::Div128 => 128,
        }
    }
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Version {
    #[bits(24..=31, r)]
    major: u8,
    #[bits(16..=23, r)]
    minor: u8,
    #[bits(0..=15, r)]
    feature: u16,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Parameter {
    /// RX FIFO size as a power of two.
    #[bits(8..=15, r)]
    rx_fifo: u8,
    /// TX FIFO size as a power of two.
    #[bits(0..=7, r)]
    tx_fifo: u8,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Control {
    /// Reset receive FIFO. Write only, always reads zero.
    #[bit(9, rw)]
    rrf: bool,
    /// Reset transmit FIFO. Write only, always reads zero.
    #[bit(8, rw)]
    rtf: bool,
    #[bit(3, rw)]
    dbgen: bool,
    #[bit(2, rw)]
    dozen: bool,
    /// Software reset of all internal logic except the control register.
    #[bit(1, rw)]
    rst: bool,
    /// Module enable.
    #[bit(0, rw)]
    men: bool,
}

/// Status register. All flags except the FIFO data flags and the module busy flag are cleared
/// by writing one.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Status {
    /// Module busy flag.
    #[bit(24, rw)]
    mbf: bool,
    /// Data match flag.
    #[bit(13, rw)]
    dmf: bool,
    /// Receive error flag (REF), set on RX FIFO overflow.
    #[bit(12, rw)]
    rx_error: bool,
    /// Transmit error flag (TEF), set on TX FIFO underrun in slave mode.
    #[bit(11, rw)]
    tx_error: bool,
    /// Transfer complete flag.
    #[bit(10, rw)]
    tcf: bool,
    /// Frame complete flag.
    #[bit(9, rw)]
    fcf: bool,
    /// Word complete flag.
    #[bit(8, rw)]
    wcf: bool,
    /// Receive data flag, set while the RX FIFO word count is larger than RXWATER.
    #[bit(1, rw)]
    rdf: bool,
    /// Transmit data flag, set while the TX FIFO word count is less than or equal to TXWATER.
    #[bit(0, rw)]
    tdf: bool,
}

impl Status {
    /// All write-one-to-clear flags.
    pub const ALL_W1C: Self = Self::DEFAULT
        .with_dmf(true)
        .with_rx_error(true)
        .with_tx_error(true)
        .with_tcf(true)
        .with_fcf(true)
        .with_wcf(true);
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct InterruptEnable {
    #[bit(13, rw)]
    dmie: bool,
    #[bit(12, rw)]
    reie: bool,
    #[bit(11, rw)]
    teie: bool,
    #[bit(10, rw)]
    tcie: bool,
    #[bit(9, rw)]
    fcie: bool,
    #[bit(8, rw)]
    wcie: bool,
    /// Receive data interrupt enable.
    #[bit(1, rw)]
    rdie: bool,
    /// Transmit data interrupt enable.
    #[bit(0, rw)]
    tdie: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DmaEnable {
    /// Receive data DMA enable.
    #[bit(1, rw)]
    rdde: bool,
    /// Transmit data DMA enable.
    #[bit(0, rw)]
    tdde: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Config1 {
    /// Peripheral chip select configuration. 0: PCS[3:2] are chip selects.
    #[bit(27, rw)]
    pcscfg: bool,
    /// Output config. 1: Output data is tristated when chip select is negated.
    #[bit(26, rw)]
    outcfg: bool,
    #[bits(24..=25, rw)]
    pincfg: u2,
    #[bits(16..=18, rw)]
    matcfg: u3,
    /// Chip select polarity, one bit per PCS line. 1: The PCS line is active high.
    #[bits(8..=11, rw)]
    pcspol: arbitrary_int::u4,
    /// No stall. 0: Transfers stall when the TX FIFO is empty or the RX FIFO is full.
    #[bit(3, rw)]
    nostall: bool,
    /// Automatic PCS, slave mode only.
    #[bit(2, rw)]
    autopcs: bool,
    /// Sample point. 1: Input data is sampled on the delayed SCK edge.
    #[bit(1, rw)]
    sample: bool,
    /// Master mode.
    #[bit(0, rw)]
    master: bool,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ClockConfig {
    /// SCK to PCS delay, in functional clock cycles after the prescaler, plus one.
    #[bits(24..=31, rw)]
    sckpcs: u8,
    /// PCS to SCK delay, plus one.
    #[bits(16..=23, rw)]
    pcssck: u8,
    /// Delay between transfers, plus two.
    #[bits(8..=15, rw)]
    dbt: u8,
    /// SCK divider, plus two.
    #[bits(0..=7, rw)]
    sckdiv: u8,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct FifoControl {
    /// The receive data flag is set while the RX FIFO word count is larger than this value.
    #[bits(16..=17, rw)]
    rxwater: u2,
    /// The transmit data flag is set while the TX FIFO word count is less or equal to this value.
    #[bits(0..=1, rw)]
    txwater: u2,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct FifoStatus {
    #[bits(16..=18, r)]
    rxcount: u3,
    #[bits(0..=2, r)]
    txcount: u3,
}

/// Transmit command register.
///
/// Writes to this register are queued in the TX FIFO together with the data words, so the
/// command change takes effect exactly between two frames.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct TransmitCommand {
    #[bit(31, rw)]
    cpol: ClockPolarity,
    #[bit(30, rw)]
    cpha: ClockPhase,
    #[bits(27..=29, rw)]
    prescale: Prescaler,
    /// Peripheral chip select used for the transfer.
    #[bits(24..=25, rw)]
    pcs: u2,
    /// LSB first.
    #[bit(23, rw)]
    lsbf: bool,
    /// Byte swap.
    #[bit(22, rw)]
    bysw: bool,
    /// Continuous transfer. PCS stays asserted between frames until this bit is cleared.
    #[bit(21, rw)]
    cont: bool,
    /// Continuing command. Used to change the command word inside a continuous transfer
    /// without negating PCS.
    #[bit(20, rw)]
    contc: bool,
    /// Receive data mask.
    #[bit(19, rw)]
    rxmsk: bool,
    /// Transmit data mask.
    #[bit(18, rw)]
    txmsk: bool,
    /// Transfer width, 0 for single bit transfers.
    #[bits(16..=17, rw)]
    width: u2,
    /// Frame size in bits, minus one.
    #[bits(0..=11, rw)]
    framesz: u12,
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ReceiveStatus {
    /// RX FIFO empty.
    #[bit(1, r)]
    rxempty: bool,
    /// Start of frame.
    #[bit(0, r)]
    sof: bool,
}

/// LPSPI register access.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Registers {
    #[mmio(PureRead)]
    verid: Version,
    #[mmio(PureRead)]
    param: Parameter,
    _reserved_0: [u32; 2],
    cr: Control,
    #[mmio(PureRead, Write)]
    sr: Status,
    ier: InterruptEnable,
    der: DmaEnable,
    cfgr0: u32,
    cfgr1: Config1,
    _reserved_1: [u32; 2],
    dmr0: u32,
    dmr1: u32,
    _reserved_2: [u32; 2],
    ccr: ClockConfig,
    _reserved_3: [u32; 5],
    fcr: FifoControl,
    #[mmio(PureRead)]
    fsr: FifoStatus,
    tcr: TransmitCommand,
    #[mmio(Write)]
    tdr: u32,
    _reserved_4: [u32; 2],
    #[mmio(PureRead)]
    rsr: ReceiveStatus,
    #[mmio(Read)]
    rdr: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Registers>(), 0x78);
static_assertions::const_assert_eq!(core::mem::offset_of!(Registers, tdr), TDR_OFFSET);
static_assertions::const_assert_eq!(core::mem::offset_of!(Registers, rdr), RDR_OFFSET);

impl Registers {
    /// Create a new LPSPI MMIO instance for the LPSPI with the given index.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub unsafe fn new_mmio_fixed(
        index: usize,
    ) -> Result<MmioRegisters<'static>, InvalidInstanceError> {
        if index >= NUM_INSTANCES {
            return Err(InvalidInstanceError(index));
        }
        Ok(unsafe { Self::new_mmio_at(BASE_ADDRESSES[index]) })
    }

    /// Create a new LPSPI MMIO instance for LPSPI0 at address [LPSPI_0_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// See [Self::new_mmio_fixed].
    pub const unsafe fn new_mmio_fixed_0() -> MmioRegisters<'static> {
        unsafe { Self::new_mmio_at(LPSPI_0_BASE_ADDR) }
    }

    /// Create a new LPSPI MMIO instance for LPSPI1 at address [LPSPI_1_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// See [Self::new_mmio_fixed].
    pub const unsafe fn new_mmio_fixed_1() -> MmioRegisters<'static> {
        unsafe { Self::new_mmio_at(LPSPI_1_BASE_ADDR) }
    }

    /// Create a new LPSPI MMIO instance for LPSPI2 at address [LPSPI_2_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// See [Self::new_mmio_fixed].
    pub const unsafe fn new_mmio_fixed_2() -> MmioRegisters<'static> {
        unsafe { Self::new_mmio_at(LPSPI_2_BASE_ADDR) }
    }
}
