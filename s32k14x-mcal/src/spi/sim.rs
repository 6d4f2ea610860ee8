//! Simulated LPSPI and eDMA peripherals for the unit tests.
//!
//! The LPSPI model shifts one TX FIFO entry per status register read or per [step], loops the
//! transmitted frames back into the RX FIFO and tracks the chip select line. Slave units only
//! shift when they are clocked explicitly. The eDMA model moves one frame per request and step.
use std::{collections::VecDeque, vec, vec::Vec};

use fugit::RateExtU32;
use s32k14x::lpspi::{
    self, ClockConfig, Config1, Control, DmaEnable, FifoControl, FifoStatus, InterruptEnable,
    Status as SrFlags, TransmitCommand,
};

use super::{
    ChannelConfig, ChannelId, Config, DataWidth, DeliveryLevel, DeviceId, DmaRegisters,
    ExternalDeviceConfig, FIFO_SIZE, HwUnitConfig, HwUnitId, JobConfig, JobId, LpspiId,
    LpspiRegisters, SequenceConfig, Spi, SpiPeripherals, Status, TransferDescriptor,
    TransferMode,
};
use crate::time::Microseconds;

const MAX_STEPS: usize = 100_000;

#[derive(Debug, Copy, Clone)]
enum TxEntry {
    Data(u32),
    Command(TransmitCommand),
}

fn frame_mask(cmd: TransmitCommand) -> u32 {
    let bits = cmd.framesz().value() as u32 + 1;
    if bits >= 32 {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

pub struct SimLpspi {
    id: LpspiId,
    enabled: bool,
    master: bool,
    slave_clocked: bool,
    stalled: bool,
    busy_reads: u32,
    cfgr1: Config1,
    fcr: FifoControl,
    ier: InterruptEnable,
    der: DmaEnable,
    tcr: TransmitCommand,
    tx_fifo: VecDeque<TxEntry>,
    rx_fifo: VecDeque<u32>,
    cs_asserted: bool,
    cs_asserts: usize,
    cs_deasserts: usize,
    ccr_log: Vec<u8>,
    tcr_log: Vec<TransmitCommand>,
    shifted: Vec<u32>,
    tdr_writes: usize,
    rdr_reads: usize,
}

impl SimLpspi {
    pub fn new(id: LpspiId) -> Self {
        Self {
            id,
            enabled: false,
            master: false,
            slave_clocked: false,
            stalled: false,
            busy_reads: 0,
            cfgr1: Config1::DEFAULT,
            fcr: FifoControl::DEFAULT,
            ier: InterruptEnable::DEFAULT,
            der: DmaEnable::DEFAULT,
            tcr: TransmitCommand::DEFAULT,
            tx_fifo: VecDeque::new(),
            rx_fifo: VecDeque::new(),
            cs_asserted: false,
            cs_asserts: 0,
            cs_deasserts: 0,
            ccr_log: Vec::new(),
            tcr_log: Vec::new(),
            shifted: Vec::new(),
            tdr_writes: 0,
            rdr_reads: 0,
        }
    }

    /// Shift the entry at the head of the TX FIFO.
    pub fn tick(&mut self) {
        if !self.enabled || self.stalled || !(self.master || self.slave_clocked) {
            return;
        }
        match self.tx_fifo.front().copied() {
            Some(TxEntry::Command(cmd)) => {
                self.tx_fifo.pop_front();
                if self.cs_asserted && !(cmd.contc() && self.tcr.cont()) {
                    self.deassert_cs();
                }
                self.tcr = cmd;
            }
            Some(TxEntry::Data(value)) => {
                // Without NOSTALL, the transfer stalls while the RX FIFO is full.
                if self.rx_fifo.len() >= FIFO_SIZE {
                    return;
                }
                self.tx_fifo.pop_front();
                if !self.cs_asserted {
                    self.cs_asserted = true;
                    self.cs_asserts += 1;
                }
                let value = value & frame_mask(self.tcr);
                self.shifted.push(value);
                self.rx_fifo.push_back(value);
                if !self.tcr.cont() {
                    self.deassert_cs();
                }
            }
            None => (),
        }
    }

    fn deassert_cs(&mut self) {
        if self.cs_asserted {
            self.cs_asserted = false;
            self.cs_deasserts += 1;
        }
    }

    #[inline]
    fn tdf(&self) -> bool {
        self.tx_fifo.len() <= self.fcr.txwater().value() as usize
    }

    #[inline]
    fn rdf(&self) -> bool {
        self.rx_fifo.len() > self.fcr.rxwater().value() as usize
    }

    /// Interrupt line of the instance.
    pub fn irq_pending(&self) -> bool {
        self.enabled && ((self.ier.tdie() && self.tdf()) || (self.ier.rdie() && self.rdf()))
    }

    fn tx_dma_request(&self) -> bool {
        self.enabled && self.der.tdde() && self.tdf()
    }

    fn rx_dma_request(&self) -> bool {
        self.enabled && self.der.rdde() && self.rdf()
    }

    /// Clock a slave unit from the external master.
    pub fn set_slave_clocked(&mut self, clocked: bool) {
        self.slave_clocked = clocked;
    }

    /// Stop shifting completely, for example because the SCK line is stuck.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// The module busy flag stays set for the given number of status reads.
    pub fn set_busy_reads(&mut self, reads: u32) {
        self.busy_reads = reads;
    }

    /// SCK dividers of all clock configuration writes.
    pub fn ccr_log(&self) -> &[u8] {
        &self.ccr_log
    }

    pub fn tcr_log(&self) -> &[TransmitCommand] {
        &self.tcr_log
    }

    /// Frames which were shifted out, masked to their frame size.
    pub fn shifted(&self) -> &[u32] {
        &self.shifted
    }

    pub fn tdr_writes(&self) -> usize {
        self.tdr_writes
    }

    pub fn rdr_reads(&self) -> usize {
        self.rdr_reads
    }

    pub fn cs_asserts(&self) -> usize {
        self.cs_asserts
    }

    pub fn cs_deasserts(&self) -> usize {
        self.cs_deasserts
    }

    pub fn cs_asserted(&self) -> bool {
        self.cs_asserted
    }

    pub fn tx_fifo_len(&self) -> usize {
        self.tx_fifo.len()
    }

    pub fn rx_fifo_len(&self) -> usize {
        self.rx_fifo.len()
    }

    pub fn ier(&self) -> InterruptEnable {
        self.ier
    }

    pub fn cfgr1(&self) -> Config1 {
        self.cfgr1
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn push_tx(&mut self, entry: TxEntry) {
        assert!(
            self.tx_fifo.len() < FIFO_SIZE,
            "TX FIFO overflow on {:?}",
            self.id
        );
        self.tx_fifo.push_back(entry);
    }
}

impl LpspiRegisters for SimLpspi {
    fn write_cr(&mut self, value: Control) {
        if value.rst() {
            self.tx_fifo.clear();
            self.rx_fifo.clear();
            self.cs_asserted = false;
            self.tcr = TransmitCommand::DEFAULT;
        }
        if value.rtf() {
            self.tx_fifo.clear();
        }
        if value.rrf() {
            self.rx_fifo.clear();
        }
        self.enabled = value.men();
    }

    fn read_sr(&mut self) -> SrFlags {
        self.tick();
        let mbf = if self.busy_reads > 0 {
            self.busy_reads -= 1;
            true
        } else {
            false
        };
        SrFlags::DEFAULT
            .with_tdf(self.tdf())
            .with_rdf(self.rdf())
            .with_mbf(mbf)
    }

    fn write_sr(&mut self, _value: SrFlags) {}

    fn write_ier(&mut self, value: InterruptEnable) {
        self.ier = value;
    }

    fn write_der(&mut self, value: DmaEnable) {
        self.der = value;
    }

    fn write_cfgr1(&mut self, value: Config1) {
        self.cfgr1 = value;
        self.master = value.master();
    }

    fn write_ccr(&mut self, value: ClockConfig) {
        self.ccr_log.push(value.sckdiv());
    }

    fn write_fcr(&mut self, value: FifoControl) {
        self.fcr = value;
    }

    fn read_fsr(&mut self) -> FifoStatus {
        self.tick();
        FifoStatus::new_with_raw_value(
            ((self.rx_fifo.len() as u32) << 16) | self.tx_fifo.len() as u32,
        )
    }

    fn write_tcr(&mut self, value: TransmitCommand) {
        self.tcr_log.push(value);
        self.push_tx(TxEntry::Command(value));
    }

    fn write_tdr(&mut self, value: u32) {
        self.tdr_writes += 1;
        self.push_tx(TxEntry::Data(value));
    }

    fn read_rdr(&mut self) -> u32 {
        self.rdr_reads += 1;
        self.rx_fifo.pop_front().unwrap_or(0)
    }

    fn tdr_address(&self) -> usize {
        lpspi::BASE_ADDRESSES[self.id as usize] + lpspi::TDR_OFFSET
    }

    fn rdr_address(&self) -> usize {
        lpspi::BASE_ADDRESSES[self.id as usize] + lpspi::RDR_OFFSET
    }
}

#[derive(Debug, Default, Copy, Clone)]
struct SimDmaChannel {
    tcd: Option<TransferDescriptor>,
    saddr: usize,
    daddr: usize,
    citer: u16,
    erq: bool,
    done: bool,
    int: bool,
}

impl SimDmaChannel {
    fn finish_iteration(&mut self, interrupt: bool) {
        self.citer -= 1;
        if self.citer == 0 {
            self.erq = false;
            self.done = true;
            self.int |= interrupt;
        }
    }
}

unsafe fn read_word(addr: usize, width: DataWidth) -> u32 {
    unsafe {
        match width {
            DataWidth::Bits8 => (addr as *const u8).read() as u32,
            DataWidth::Bits16 => (addr as *const u16).read_unaligned() as u32,
            DataWidth::Bits32 => (addr as *const u32).read_unaligned(),
        }
    }
}

unsafe fn write_word(addr: usize, width: DataWidth, value: u32) {
    unsafe {
        match width {
            DataWidth::Bits8 => (addr as *mut u8).write(value as u8),
            DataWidth::Bits16 => (addr as *mut u16).write_unaligned(value as u16),
            DataWidth::Bits32 => (addr as *mut u32).write_unaligned(value),
        }
    }
}

#[derive(Default)]
pub struct SimDma {
    channels: [SimDmaChannel; s32k14x::edma::NUM_CHANNELS],
    tcd_writes: usize,
}

impl SimDma {
    /// Serve one request of the TX and the RX channel of an LPSPI instance.
    pub fn step(&mut self, tx_channel: u8, rx_channel: u8, lpspi: &mut SimLpspi) {
        let ch = &mut self.channels[tx_channel as usize];
        if let Some(tcd) = ch.tcd.filter(|_| ch.erq && ch.citer > 0 && lpspi.tx_dma_request()) {
            assert_eq!(tcd.dst, lpspi.tdr_address());
            // Safety: The driver programs the addresses of its own buffers or of buffers which
            // are kept alive by the test.
            let value = unsafe { read_word(ch.saddr, tcd.width) };
            lpspi.write_tdr(value);
            ch.saddr = ch.saddr.wrapping_add_signed(tcd.src_offset as isize);
            ch.finish_iteration(tcd.interrupt);
        }
        let ch = &mut self.channels[rx_channel as usize];
        if let Some(tcd) = ch.tcd.filter(|_| ch.erq && ch.citer > 0 && lpspi.rx_dma_request()) {
            assert_eq!(tcd.src, lpspi.rdr_address());
            let value = lpspi.read_rdr();
            // Safety: See above.
            unsafe { write_word(ch.daddr, tcd.width, value) };
            ch.daddr = ch.daddr.wrapping_add_signed(tcd.dst_offset as isize);
            ch.finish_iteration(tcd.interrupt);
        }
    }

    pub fn interrupt_pending(&self, channel: u8) -> bool {
        self.channels[channel as usize].int
    }

    pub fn request_enabled(&self, channel: u8) -> bool {
        self.channels[channel as usize].erq
    }

    /// Number of programmed TCDs.
    pub fn tcd_writes(&self) -> usize {
        self.tcd_writes
    }
}

impl DmaRegisters for SimDma {
    fn write_tcd(&mut self, channel: u8, tcd: &TransferDescriptor) {
        self.tcd_writes += 1;
        let ch = &mut self.channels[channel as usize];
        ch.tcd = Some(*tcd);
        ch.saddr = tcd.src;
        ch.daddr = tcd.dst;
        ch.citer = tcd.count;
        ch.done = false;
    }

    fn write_major_count(&mut self, channel: u8, count: u16) {
        let ch = &mut self.channels[channel as usize];
        ch.citer = count;
        ch.done = false;
    }

    fn enable_request(&mut self, channel: u8) {
        self.channels[channel as usize].erq = true;
    }

    fn disable_request(&mut self, channel: u8) {
        self.channels[channel as usize].erq = false;
    }

    fn clear_done(&mut self, channel: u8) {
        self.channels[channel as usize].done = false;
    }

    fn clear_interrupt(&mut self, channel: u8) {
        self.channels[channel as usize].int = false;
    }

    fn is_done(&mut self, channel: u8) -> bool {
        self.channels[channel as usize].done
    }
}

pub struct SimPeripherals {
    pub lpspi: [SimLpspi; 3],
    pub dma: SimDma,
}

impl SimPeripherals {
    pub fn new() -> Self {
        Self {
            lpspi: [
                SimLpspi::new(LpspiId::Lpspi0),
                SimLpspi::new(LpspiId::Lpspi1),
                SimLpspi::new(LpspiId::Lpspi2),
            ],
            dma: SimDma::default(),
        }
    }
}

impl SpiPeripherals for SimPeripherals {
    type Lpspi = SimLpspi;
    type Dma = SimDma;

    fn lpspi(&mut self, instance: LpspiId) -> &mut SimLpspi {
        &mut self.lpspi[instance as usize]
    }

    fn lpspi_and_dma(&mut self, instance: LpspiId) -> (&mut SimLpspi, &mut SimDma) {
        (&mut self.lpspi[instance as usize], &mut self.dma)
    }
}

pub type SimSpi = Spi<'static, SimPeripherals>;

/// Advance the simulated hardware by one shift and run the pending handlers.
pub fn step(spi: &mut SimSpi) {
    let Some(cfg) = spi.cfg else {
        return;
    };
    for lpspi in spi.hw.lpspi.iter_mut() {
        lpspi.tick();
    }
    for unit in cfg.hw_units {
        if let TransferMode::Dma {
            tx_channel,
            rx_channel,
        } = unit.transfer
        {
            spi.hw
                .dma
                .step(tx_channel, rx_channel, &mut spi.hw.lpspi[unit.instance as usize]);
        }
    }
    for unit in cfg.hw_units {
        if spi.hw.lpspi[unit.instance as usize].irq_pending() {
            spi.on_interrupt(unit.instance);
        }
        if let TransferMode::Dma {
            tx_channel,
            rx_channel,
        } = unit.transfer
        {
            if spi.hw.dma.interrupt_pending(tx_channel) {
                spi.on_dma_tx_interrupt(unit.instance);
            }
            if spi.hw.dma.interrupt_pending(rx_channel) {
                spi.on_dma_rx_interrupt(unit.instance);
            }
        }
    }
    spi.main_function_handling();
}

/// Shift out whatever is left in the TX FIFOs, like a trailing chip select release.
pub fn settle(spi: &mut SimSpi) {
    for lpspi in spi.hw.lpspi.iter_mut() {
        for _ in 0..2 * FIFO_SIZE {
            lpspi.tick();
        }
    }
}

/// Step until the driver is idle, then settle the hardware.
pub fn run_until_idle(spi: &mut SimSpi) {
    for _ in 0..MAX_STEPS {
        if spi.status() == Status::Idle {
            settle(spi);
            return;
        }
        step(spi);
    }
    panic!("SPI handler did not become idle");
}

pub fn leak<T>(items: Vec<T>) -> &'static [T] {
    items.leak()
}

pub fn channel_ids(ids: &[u16]) -> &'static [ChannelId] {
    leak(ids.iter().map(|&id| ChannelId(id)).collect())
}

pub fn job_ids(ids: &[u16]) -> &'static [JobId] {
    leak(ids.iter().map(|&id| JobId(id)).collect())
}

pub fn device(sck_div: u8) -> ExternalDeviceConfig {
    ExternalDeviceConfig {
        sck_div,
        ..ExternalDeviceConfig::new(arbitrary_int::u2::new(0))
    }
}

pub fn job(channels: &[u16], device: u8, priority: u8) -> JobConfig<'static> {
    JobConfig {
        priority,
        ..JobConfig::new(channel_ids(channels), HwUnitId(0), DeviceId(device))
    }
}

pub fn sequence(jobs: &[u16]) -> SequenceConfig<'static> {
    SequenceConfig::new(job_ids(jobs))
}

/// Configuration with a single FIFO master unit on LPSPI0.
pub fn config(
    channels: Vec<ChannelConfig>,
    devices: Vec<ExternalDeviceConfig>,
    jobs: Vec<JobConfig<'static>>,
    sequences: Vec<SequenceConfig<'static>>,
) -> Config<'static> {
    Config {
        channels: leak(channels),
        devices: leak(devices),
        jobs: leak(jobs),
        sequences: leak(sequences),
        hw_units: leak(vec![HwUnitConfig::new_master(LpspiId::Lpspi0)]),
        level: DeliveryLevel::Async,
        concurrent_sync_transmit: true,
        core_clock: 80.MHz(),
        sync_timeout: Microseconds::from_ticks(100),
        production_error_hook: None,
    }
}

/// A leaked driver configuration.
pub struct Fixture {
    pub cfg: &'static Config<'static>,
}

impl Fixture {
    pub fn new(cfg: Config<'static>) -> Self {
        Self {
            cfg: std::boxed::Box::leak(std::boxed::Box::new(cfg)),
        }
    }

    /// Initialized driver on fresh simulated peripherals.
    pub fn spi(&self) -> SimSpi {
        let mut spi = Spi::new(SimPeripherals::new());
        spi.init(self.cfg).unwrap();
        spi
    }

    /// Sequence 0 owns job 1, sequence 1 consists of jobs 0 and 1.
    pub fn shared_jobs() -> Self {
        Self::new(config(
            vec![
                ChannelConfig::new_internal(DataWidth::Bits8, 4, 0xFF),
                ChannelConfig::new_internal(DataWidth::Bits8, 4, 0xFF),
            ],
            vec![device(2)],
            vec![job(&[0], 0, 0), job(&[1], 0, 0)],
            vec![sequence(&[1]), sequence(&[0, 1])],
        ))
    }

    /// Five single job sequences on one unit. Job `i` uses device `i` with the SCK divider
    /// `10 + i` and the priorities are 0, 3, 1, 3, 2.
    pub fn priorities() -> Self {
        let prios = [0, 3, 1, 3, 2];
        Self::new(config(
            vec![ChannelConfig::new_internal(DataWidth::Bits8, 2, 0)],
            (0..5).map(|idx| device(10 + idx)).collect(),
            (0..5).map(|idx| job(&[0], idx, prios[idx as usize])).collect(),
            (0..5).map(|idx| sequence(&[idx])).collect(),
        ))
    }

    /// One slave unit with one job of four frames.
    pub fn slave() -> Self {
        let mut cfg = config(
            vec![ChannelConfig::new_internal(DataWidth::Bits8, 4, 0)],
            vec![device(2)],
            vec![job(&[0], 0, 0)],
            vec![sequence(&[0])],
        );
        cfg.hw_units = leak(vec![HwUnitConfig {
            mode: super::HwUnitMode::Slave,
            ..HwUnitConfig::new_master(LpspiId::Lpspi0)
        }]);
        Self::new(cfg)
    }

    fn two_step_sequence(interruptible: bool) -> Self {
        let mut cfg = config(
            vec![ChannelConfig::new_internal(DataWidth::Bits8, 2, 0)],
            vec![device(10), device(11), device(12)],
            vec![job(&[0], 0, 0), job(&[0], 1, 0), job(&[0], 2, 3)],
            vec![sequence(&[0, 1]), sequence(&[2])],
        );
        let mut sequences = cfg.sequences.to_vec();
        sequences[0].interruptible = interruptible;
        cfg.sequences = leak(sequences);
        Self::new(cfg)
    }

    /// Sequence 0 runs jobs 0 and 1 with priority 0, sequence 1 runs job 2 with priority 3.
    pub fn interruptible() -> Self {
        Self::two_step_sequence(true)
    }

    pub fn non_interruptible() -> Self {
        Self::two_step_sequence(false)
    }

    /// Synchronous configuration. Sequence 0 has one job with two channels, sequence 1 has two
    /// jobs.
    pub fn sync_mixed() -> Self {
        let mut cfg = config(
            vec![
                ChannelConfig::new_internal(DataWidth::Bits8, 4, 0x11),
                ChannelConfig::new_internal(DataWidth::Bits16, 2, 0x2222),
            ],
            vec![device(2)],
            vec![job(&[0, 1], 0, 0), job(&[0], 0, 0), job(&[1], 0, 0)],
            vec![sequence(&[0]), sequence(&[1, 2])],
        );
        cfg.level = DeliveryLevel::Sync;
        Self::new(cfg)
    }

    /// Synchronous configuration with `count` single job sequences.
    pub fn many_sync_sequences(count: u16) -> Self {
        let mut cfg = config(
            vec![ChannelConfig::new_internal(DataWidth::Bits8, 1, 0)],
            vec![device(2)],
            (0..count).map(|_| job(&[0], 0, 0)).collect(),
            (0..count).map(|idx| sequence(&[idx])).collect(),
        );
        cfg.level = DeliveryLevel::Sync;
        Self::new(cfg)
    }
}
