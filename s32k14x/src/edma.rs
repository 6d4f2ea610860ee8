//! eDMA register module.
//!
//! The controller block holds the channel request and status registers, while each of the
//! 16 channels owns one 32 byte transfer control descriptor (TCD).
use arbitrary_int::{u2, u4, u5, u15};

use crate::InvalidInstanceError;

pub const EDMA_BASE_ADDR: usize = 0x4000_8000;
pub const EDMA_TCD_BASE_ADDR: usize = 0x4000_9000;
pub const TCD_SIZE: usize = 0x20;
pub const NUM_CHANNELS: usize = 16;

/// Maximum major loop iteration count if channel linking is enabled in the CITER register.
pub const MAX_LINKED_ITER_COUNT: u16 = 511;

/// Transfer size encoding of the TCD attribute register.
#[bitbybit::bitenum(u3)]
#[derive(Debug, PartialEq, Eq)]
pub enum TransferSize {
    Byte = 0b000,
    HalfWord = 0b001,
    Word = 0b010,
    Burst16 = 0b100,
    Burst32 = 0b101,
}

impl TransferSize {
    pub const fn bytes(&self) -> usize {
        match self {
            TransferSize::Byte => 1,
            TransferSize::HalfWord => 2,
            TransferSize::Word => 4,
            TransferSize::Burst16 => 16,
            TransferSize::Burst32 => 32,
        }
    }
}

#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct Control {
    /// Cancel transfer.
    #[bit(17, rw)]
    cx: bool,
    /// Error cancel transfer.
    #[bit(16, rw)]
    ecx: bool,
    /// Enable minor loop mapping.
    #[bit(7, rw)]
    emlm: bool,
    /// Continuous link mode.
    #[bit(6, rw)]
    clm: bool,
    #[bit(5, rw)]
    halt: bool,
    #[bit(4, rw)]
    hoe: bool,
    /// Enable round robin channel arbitration.
    #[bit(2, rw)]
    erca: bool,
    /// Enable debug.
    #[bit(1, rw)]
    edbg: bool,
}

#[bitbybit::bitfield(u16, default = 0x0, debug)]
pub struct TransferAttributes {
    #[bits(11..=15, rw)]
    smod: u5,
    #[bits(8..=10, rw)]
    ssize: Option<TransferSize>,
    #[bits(3..=7, rw)]
    dmod: u5,
    #[bits(0..=2, rw)]
    dsize: Option<TransferSize>,
}

/// Current and beginning major iteration count without channel linking.
#[bitbybit::bitfield(u16, default = 0x0, debug)]
pub struct MajorLoopCount {
    /// Channel linking on minor loop completion.
    #[bit(15, rw)]
    elink: bool,
    #[bits(0..=14, rw)]
    count: u15,
}

#[bitbybit::bitfield(u16, default = 0x0, debug)]
pub struct TcdControlStatus {
    /// Bandwidth control.
    #[bits(14..=15, rw)]
    bwc: u2,
    #[bits(8..=11, rw)]
    majorlinkch: u4,
    /// Channel done. Cleared by software or when the channel is restarted.
    #[bit(7, rw)]
    done: bool,
    /// Channel active.
    #[bit(6, rw)]
    active: bool,
    #[bit(5, rw)]
    majorelink: bool,
    /// Enable scatter/gather processing.
    #[bit(4, rw)]
    esg: bool,
    /// Disable request. The hardware request is cleared when the major loop completes.
    #[bit(3, rw)]
    dreq: bool,
    #[bit(2, rw)]
    inthalf: bool,
    /// Interrupt on major loop completion.
    #[bit(1, rw)]
    intmajor: bool,
    /// Explicit software start.
    #[bit(0, rw)]
    start: bool,
}

/// eDMA controller register access.
///
/// The channel management registers are byte wide. Writing the channel number sets or clears
/// the state for that channel only, which avoids read-modify-write cycles.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct Registers {
    cr: Control,
    #[mmio(PureRead)]
    es: u32,
    _reserved_0: u32,
    /// Enable request register.
    erq: u32,
    _reserved_1: u32,
    /// Enable error interrupt register.
    eei: u32,
    #[mmio(Write)]
    ceei: u8,
    #[mmio(Write)]
    seei: u8,
    /// Clear enable request.
    #[mmio(Write)]
    cerq: u8,
    /// Set enable request.
    #[mmio(Write)]
    serq: u8,
    /// Clear DONE status bit.
    #[mmio(Write)]
    cdne: u8,
    /// Set START bit.
    #[mmio(Write)]
    ssrt: u8,
    /// Clear error.
    #[mmio(Write)]
    cerr: u8,
    /// Clear interrupt request.
    #[mmio(Write)]
    cint: u8,
    _reserved_2: u32,
    /// Interrupt request register, one bit per channel, write one to clear.
    int: u32,
    _reserved_3: u32,
    /// Error register, one bit per channel, write one to clear.
    err: u32,
    _reserved_4: u32,
    #[mmio(PureRead)]
    hrs: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<Registers>(), 0x38);

impl Registers {
    /// Create a new eDMA MMIO instance at address [EDMA_BASE_ADDR].
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub const unsafe fn new_mmio_fixed() -> MmioRegisters<'static> {
        unsafe { Self::new_mmio_at(EDMA_BASE_ADDR) }
    }
}

/// Transfer control descriptor of one eDMA channel.
#[derive(derive_mmio::Mmio)]
#[repr(C)]
pub struct TransferControlDescriptor {
    saddr: u32,
    soff: i16,
    attr: TransferAttributes,
    /// Minor loop byte count.
    nbytes: u32,
    /// Source address adjustment after the last major loop iteration.
    slast: i32,
    daddr: u32,
    doff: i16,
    citer: MajorLoopCount,
    /// Destination address adjustment or scatter/gather address.
    dlast_sga: i32,
    csr: TcdControlStatus,
    biter: MajorLoopCount,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TransferControlDescriptor>(), TCD_SIZE);

impl TransferControlDescriptor {
    /// Create a new MMIO instance for the TCD of the given DMA channel.
    ///
    /// # Safety
    ///
    /// This API can be used to potentially create a driver to the same peripheral structure
    /// from multiple threads. The user must ensure that concurrent accesses are safe and do not
    /// interfere with each other.
    pub unsafe fn new_mmio_fixed(
        channel: usize,
    ) -> Result<MmioTransferControlDescriptor<'static>, InvalidInstanceError> {
        if channel >= NUM_CHANNELS {
            return Err(InvalidInstanceError(channel));
        }
        Ok(unsafe { Self::new_mmio_at(EDMA_TCD_BASE_ADDR + channel * TCD_SIZE) })
    }
}
