//! Low level register access of the SPI handler.
//!
//! The transfer engine only talks to the hardware through [LpspiRegisters] and [DmaRegisters].
//! [LpspiLowLevel] and [DmaLowLevel] implement them on top of the MMIO register blocks of the
//! [s32k14x] PAC.
use arbitrary_int::u15;
use s32k14x::{
    edma::{
        self, MajorLoopCount, TcdControlStatus, TransferAttributes, TransferControlDescriptor,
        TransferSize,
    },
    lpspi::{
        self, ClockConfig, Config1, Control, DmaEnable, FifoControl, FifoStatus, InterruptEnable,
        Status, TransmitCommand,
    },
};

use super::{DataWidth, LpspiId};

/// Register interface of one LPSPI instance.
pub trait LpspiRegisters {
    fn write_cr(&mut self, value: Control);
    fn read_sr(&mut self) -> Status;
    fn write_sr(&mut self, value: Status);
    fn write_ier(&mut self, value: InterruptEnable);
    fn write_der(&mut self, value: DmaEnable);
    fn write_cfgr1(&mut self, value: Config1);
    fn write_ccr(&mut self, value: ClockConfig);
    fn write_fcr(&mut self, value: FifoControl);
    fn read_fsr(&mut self) -> FifoStatus;
    fn write_tcr(&mut self, value: TransmitCommand);
    fn write_tdr(&mut self, value: u32);
    fn read_rdr(&mut self) -> u32;
    /// Bus address of the transmit data register.
    fn tdr_address(&self) -> usize;
    /// Bus address of the receive data register.
    fn rdr_address(&self) -> usize;
}

/// Attributes of a single eDMA major loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    pub src: usize,
    pub src_offset: i16,
    pub dst: usize,
    pub dst_offset: i16,
    pub width: DataWidth,
    /// Number of frames of the major loop.
    pub count: u16,
    /// Raise the channel interrupt when the major loop completes.
    pub interrupt: bool,
}

/// Register interface of the eDMA controller.
pub trait DmaRegisters {
    /// Configure the TCD of a channel. The hardware request is disabled automatically when the
    /// major loop completes.
    fn write_tcd(&mut self, channel: u8, tcd: &TransferDescriptor);
    /// Reload the major loop count. Source and destination addresses continue where the previous
    /// major loop stopped.
    fn write_major_count(&mut self, channel: u8, count: u16);
    fn enable_request(&mut self, channel: u8);
    fn disable_request(&mut self, channel: u8);
    fn clear_done(&mut self, channel: u8);
    fn clear_interrupt(&mut self, channel: u8);
    fn is_done(&mut self, channel: u8) -> bool;
}

/// All peripherals which are driven by the SPI handler.
pub trait SpiPeripherals {
    type Lpspi: LpspiRegisters;
    type Dma: DmaRegisters;

    fn lpspi(&mut self, instance: LpspiId) -> &mut Self::Lpspi;
    fn lpspi_and_dma(&mut self, instance: LpspiId) -> (&mut Self::Lpspi, &mut Self::Dma);
}

pub struct LpspiLowLevel {
    id: LpspiId,
    regs: lpspi::MmioRegisters<'static>,
}

impl LpspiLowLevel {
    /// Steal the LPSPI instance.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL.
    pub unsafe fn steal(id: LpspiId) -> Self {
        let regs = match id {
            LpspiId::Lpspi0 => unsafe { lpspi::Registers::new_mmio_fixed_0() },
            LpspiId::Lpspi1 => unsafe { lpspi::Registers::new_mmio_fixed_1() },
            LpspiId::Lpspi2 => unsafe { lpspi::Registers::new_mmio_fixed_2() },
        };
        Self { id, regs }
    }

    #[inline]
    pub fn id(&self) -> LpspiId {
        self.id
    }

    #[inline]
    fn base_address(&self) -> usize {
        lpspi::BASE_ADDRESSES[self.id as usize]
    }
}

impl LpspiRegisters for LpspiLowLevel {
    delegate::delegate! {
        to self.regs {
            #[inline]
            fn write_cr(&mut self, value: Control);
            #[inline]
            fn read_sr(&mut self) -> Status;
            #[inline]
            fn write_sr(&mut self, value: Status);
            #[inline]
            fn write_ier(&mut self, value: InterruptEnable);
            #[inline]
            fn write_der(&mut self, value: DmaEnable);
            #[inline]
            fn write_cfgr1(&mut self, value: Config1);
            #[inline]
            fn write_ccr(&mut self, value: ClockConfig);
            #[inline]
            fn write_fcr(&mut self, value: FifoControl);
            #[inline]
            fn read_fsr(&mut self) -> FifoStatus;
            #[inline]
            fn write_tcr(&mut self, value: TransmitCommand);
            #[inline]
            fn write_tdr(&mut self, value: u32);
            #[inline]
            fn read_rdr(&mut self) -> u32;
        }
    }

    #[inline]
    fn tdr_address(&self) -> usize {
        self.base_address() + lpspi::TDR_OFFSET
    }

    #[inline]
    fn rdr_address(&self) -> usize {
        self.base_address() + lpspi::RDR_OFFSET
    }
}

pub struct DmaLowLevel {
    regs: edma::MmioRegisters<'static>,
}

impl DmaLowLevel {
    /// Steal the eDMA controller.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL. The SPI handler only touches the
    /// channels which are assigned to it in the configuration.
    pub unsafe fn steal() -> Self {
        Self {
            regs: unsafe { edma::Registers::new_mmio_fixed() },
        }
    }

    #[inline]
    fn tcd(channel: u8) -> edma::MmioTransferControlDescriptor<'static> {
        // Safety: The channel numbers were checked by the configuration validation and every
        // channel is owned by exactly one hardware unit.
        unsafe {
            TransferControlDescriptor::new_mmio_at(
                edma::EDMA_TCD_BASE_ADDR + channel as usize * edma::TCD_SIZE,
            )
        }
    }
}

const fn transfer_size(width: DataWidth) -> TransferSize {
    match width {
        DataWidth::Bits8 => TransferSize::Byte,
        DataWidth::Bits16 => TransferSize::HalfWord,
        DataWidth::Bits32 => TransferSize::Word,
    }
}

impl DmaRegisters for DmaLowLevel {
    fn write_tcd(&mut self, channel: u8, tcd: &TransferDescriptor) {
        let mut regs = Self::tcd(channel);
        let size = transfer_size(tcd.width);
        let count = MajorLoopCount::new_with_raw_value(0).with_count(u15::new(tcd.count));
        regs.write_csr(TcdControlStatus::new_with_raw_value(0));
        regs.write_saddr(tcd.src as u32);
        regs.write_soff(tcd.src_offset);
        regs.write_attr(
            TransferAttributes::new_with_raw_value(0)
                .with_ssize(size)
                .with_dsize(size),
        );
        regs.write_nbytes(tcd.width.bytes() as u32);
        regs.write_slast(0);
        regs.write_daddr(tcd.dst as u32);
        regs.write_doff(tcd.dst_offset);
        regs.write_citer(count);
        regs.write_dlast_sga(0);
        regs.write_biter(count);
        regs.write_csr(
            TcdControlStatus::new_with_raw_value(0)
                .with_dreq(true)
                .with_intmajor(tcd.interrupt),
        );
    }

    fn write_major_count(&mut self, channel: u8, count: u16) {
        let mut regs = Self::tcd(channel);
        let count = MajorLoopCount::new_with_raw_value(0).with_count(u15::new(count));
        regs.write_citer(count);
        regs.write_biter(count);
    }

    #[inline]
    fn enable_request(&mut self, channel: u8) {
        self.regs.write_serq(channel);
    }

    #[inline]
    fn disable_request(&mut self, channel: u8) {
        self.regs.write_cerq(channel);
    }

    #[inline]
    fn clear_done(&mut self, channel: u8) {
        self.regs.write_cdne(channel);
    }

    #[inline]
    fn clear_interrupt(&mut self, channel: u8) {
        self.regs.write_cint(channel);
    }

    #[inline]
    fn is_done(&mut self, channel: u8) -> bool {
        Self::tcd(channel).read_csr().done()
    }
}

/// The LPSPI instances and the eDMA controller of the S32K14x.
pub struct Peripherals {
    lpspi: [LpspiLowLevel; lpspi::NUM_INSTANCES],
    dma: DmaLowLevel,
}

impl Peripherals {
    /// Steal all peripherals used by the SPI handler.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL. The LPSPI instances must not be
    /// used by other drivers.
    pub unsafe fn steal() -> Self {
        unsafe {
            Self {
                lpspi: [
                    LpspiLowLevel::steal(LpspiId::Lpspi0),
                    LpspiLowLevel::steal(LpspiId::Lpspi1),
                    LpspiLowLevel::steal(LpspiId::Lpspi2),
                ],
                dma: DmaLowLevel::steal(),
            }
        }
    }
}

impl SpiPeripherals for Peripherals {
    type Lpspi = LpspiLowLevel;
    type Dma = DmaLowLevel;

    #[inline]
    fn lpspi(&mut self, instance: LpspiId) -> &mut LpspiLowLevel {
        &mut self.lpspi[instance as usize]
    }

    #[inline]
    fn lpspi_and_dma(&mut self, instance: LpspiId) -> (&mut LpspiLowLevel, &mut DmaLowLevel) {
        (&mut self.lpspi[instance as usize], &mut self.dma)
    }
}
