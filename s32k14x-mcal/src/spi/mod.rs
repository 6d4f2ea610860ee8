//! # SPI handler and LPSPI driver
//!
//! Data is transferred in [channels](ChannelConfig). A [job](JobConfig) is a list of channels
//! which is transmitted on one hardware unit under one chip select window, and a
//! [sequence](SequenceConfig) is a list of jobs which is transmitted as a whole.
//!
//! Sequences can be transmitted synchronously with [Spi::sync_transmit], which busy waits until
//! the transfer is done, or asynchronously with [Spi::async_transmit]. Asynchronous jobs are
//! queued per hardware unit by priority and driven by the LPSPI and eDMA interrupts, or by
//! calling [Spi::main_function_handling] periodically in polling mode.
//!
//! ## Interrupts
//!
//! The driver is usually placed inside a `critical_section::Mutex<RefCell<..>>` static. The
//! interrupt handlers of the LPSPI instances and the eDMA channels then call
//! [Spi::on_interrupt], [Spi::on_dma_tx_interrupt] and [Spi::on_dma_rx_interrupt]. The driver
//! must not be moved while an asynchronous DMA transfer is active, because the DMA engine may
//! access the default and discard words inside the driver state.
use raw_slice::{RawBufSlice, RawBufSliceMut};

use crate::{
    VersionInfo,
    det::{self, SPI_MODULE_ID},
};

pub mod config;
pub use config::*;

pub mod ll;
pub use ll::*;

mod engine;
mod fast;
mod sched;
mod state;
mod sync;

#[cfg(test)]
mod sim;

use state::{DriverState, RxSink, TxSource};

pub const MAX_CHANNELS: usize = 64;
pub const MAX_JOBS: usize = 64;
pub const MAX_SEQUENCES: usize = 32;
pub const MAX_HW_UNITS: usize = s32k14x::lpspi::NUM_INSTANCES;
/// Size of the transmit and the receive pool for the internal buffers in bytes.
pub const IB_POOL_SIZE: usize = 1024;
pub const NUM_PRIORITIES: usize = 4;
pub const FIFO_SIZE: usize = s32k14x::lpspi::FIFO_SIZE;
/// Maximum frames per eDMA major loop. Longer channels are split into several major loops.
pub const DMA_MAX_ITER_COUNT: u16 = s32k14x::edma::MAX_LINKED_ITER_COUNT;
/// Maximum number of single job sequences handled by the synchronous fast path.
pub const OPTIMIZED_SEQ_BUFFER_SIZE: usize = 16;
/// Maximum number of channels of all sequences handled by the synchronous fast path.
pub const OPTIMIZED_CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LpspiId {
    Lpspi0 = 0,
    Lpspi1 = 1,
    Lpspi2 = 2,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Uninit,
    Idle,
    Busy,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobResult {
    Ok,
    Pending,
    Failed,
    Queued,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SequenceResult {
    Ok,
    Pending,
    Failed,
    Cancelled,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AsyncMode {
    /// Asynchronous transfers are driven by [Spi::main_function_handling].
    Polling,
    /// Asynchronous transfers are driven by the LPSPI and eDMA interrupts.
    Interrupt,
}

/// AUTOSAR service IDs of the SPI handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum ServiceId {
    Init = 0x00,
    DeInit = 0x01,
    WriteIb = 0x02,
    AsyncTransmit = 0x03,
    ReadIb = 0x04,
    SetupEb = 0x05,
    GetStatus = 0x06,
    GetJobResult = 0x07,
    GetSequenceResult = 0x08,
    GetVersionInfo = 0x09,
    SyncTransmit = 0x0A,
    GetHwUnitStatus = 0x0B,
    Cancel = 0x0C,
    SetAsyncMode = 0x0D,
    MainFunctionHandling = 0x10,
    SetHwUnitAsyncMode = 0x80,
}

/// AUTOSAR development error codes of the SPI handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum DevErrorCode {
    ParamChannel = 0x0A,
    ParamJob = 0x0B,
    ParamSeq = 0x0C,
    ParamLength = 0x0D,
    ParamUnit = 0x0E,
    ParamPointer = 0x10,
    Uninit = 0x1A,
    SeqPending = 0x2A,
    SeqInProcess = 0x3A,
    AlreadyInitialized = 0x4A,
    ParamConfig = 0x5A,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpiError {
    #[error("driver is not initialized")]
    Uninit,
    #[error("driver is already initialized")]
    AlreadyInitialized,
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid channel {0}")]
    ParamChannel(ChannelId),
    #[error("invalid job {0}")]
    ParamJob(JobId),
    #[error("invalid sequence {0}")]
    ParamSeq(SequenceId),
    #[error("invalid length {0}")]
    ParamLength(usize),
    #[error("invalid hardware unit {0}")]
    ParamUnit(HwUnitId),
    #[error("missing buffer")]
    ParamPointer,
    #[error("sequence or one of its jobs is pending")]
    SeqPending,
    #[error("hardware units of the sequence are used by a synchronous transmission")]
    SeqInProcess,
    #[error("driver or hardware unit is busy")]
    Busy,
    #[error("service is not available with the configured delivery level")]
    ServiceUnavailable,
    #[error("hardware timeout during job {0}")]
    Timeout(JobId),
}

impl SpiError {
    /// Development error code reported for this error. Runtime conditions like a busy driver
    /// or hardware timeouts are not development errors.
    pub const fn dev_error_code(&self) -> Option<DevErrorCode> {
        Some(match self {
            SpiError::Uninit => DevErrorCode::Uninit,
            SpiError::AlreadyInitialized => DevErrorCode::AlreadyInitialized,
            SpiError::Config(_) => DevErrorCode::ParamConfig,
            SpiError::ParamChannel(_) => DevErrorCode::ParamChannel,
            SpiError::ParamJob(_) => DevErrorCode::ParamJob,
            SpiError::ParamSeq(_) => DevErrorCode::ParamSeq,
            SpiError::ParamLength(_) => DevErrorCode::ParamLength,
            SpiError::ParamUnit(_) => DevErrorCode::ParamUnit,
            SpiError::ParamPointer => DevErrorCode::ParamPointer,
            SpiError::SeqPending => DevErrorCode::SeqPending,
            SpiError::SeqInProcess => DevErrorCode::SeqInProcess,
            SpiError::Busy | SpiError::ServiceUnavailable | SpiError::Timeout(_) => return None,
        })
    }
}

fn report(service: ServiceId, error: SpiError) -> SpiError {
    if let Some(code) = error.dev_error_code() {
        det::report_error(SPI_MODULE_ID, 0, service.into(), code.into());
    }
    error
}

pub(crate) fn report_production_error(cfg: &Config<'_>, error: ProductionError) {
    log::error!("SPI production error: {:?}", error);
    if let Some(hook) = cfg.production_error_hook {
        hook(error);
    }
}

/// SPI handler driver.
pub struct Spi<'a, P: SpiPeripherals> {
    hw: P,
    cfg: Option<&'a Config<'a>>,
    st: DriverState,
}

impl<'a, P: SpiPeripherals> Spi<'a, P> {
    /// Create an uninitialized driver. [Self::init] has to be called before any transfer.
    pub const fn new(hw: P) -> Self {
        Self {
            hw,
            cfg: None,
            st: DriverState::new(),
        }
    }

    pub const fn version_info() -> VersionInfo {
        VersionInfo::for_module(SPI_MODULE_ID)
    }

    /// Access to the underlying peripherals.
    #[inline]
    pub fn peripherals(&mut self) -> &mut P {
        &mut self.hw
    }

    /// Release the peripherals. The driver should be de-initialized first.
    pub fn release(self) -> P {
        self.hw
    }

    #[inline]
    fn config(&self) -> Result<&'a Config<'a>, SpiError> {
        self.cfg.ok_or(SpiError::Uninit)
    }

    pub fn init(&mut self, cfg: &'a Config<'a>) -> Result<(), SpiError> {
        self.init_inner(cfg)
            .map_err(|e| report(ServiceId::Init, e))
    }

    fn init_inner(&mut self, cfg: &'a Config<'a>) -> Result<(), SpiError> {
        if self.cfg.is_some() {
            return Err(SpiError::AlreadyInitialized);
        }
        cfg.validate()?;
        self.st.init(cfg);
        for idx in 0..cfg.hw_units.len() {
            self.hw_init(cfg, HwUnitId(idx as u8));
        }
        self.cfg = Some(cfg);
        log::debug!(
            "SPI handler initialized: {} channels, {} jobs, {} sequences, {} units",
            cfg.channels.len(),
            cfg.jobs.len(),
            cfg.sequences.len(),
            cfg.hw_units.len()
        );
        Ok(())
    }

    /// De-initialize the driver and disable all LPSPI instances. Fails while the driver is busy.
    pub fn deinit(&mut self) -> Result<(), SpiError> {
        let cfg = self.config().map_err(|e| report(ServiceId::DeInit, e))?;
        if self.st.status == Status::Busy {
            return Err(SpiError::Busy);
        }
        for idx in 0..cfg.hw_units.len() {
            self.hw_deinit(cfg, HwUnitId(idx as u8));
        }
        self.st = DriverState::new();
        self.cfg = None;
        log::debug!("SPI handler de-initialized");
        Ok(())
    }

    fn channel_config(
        cfg: &'a Config<'a>,
        channel: ChannelId,
    ) -> Result<&'a ChannelConfig, SpiError> {
        cfg.channels
            .get(channel.index())
            .ok_or(SpiError::ParamChannel(channel))
    }

    /// A channel is in use while a job transmitting it is locked by a sequence or still shifting
    /// after a cancel.
    fn channel_in_use(&self, cfg: &Config<'_>, channel: ChannelId) -> bool {
        cfg.jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.channels.contains(&channel))
            .any(|(idx, job)| {
                self.st.jobs[idx].sequence.is_some()
                    || self.st.units[job.hw_unit.index()].current == Some(JobId(idx as u16))
            })
    }

    fn check_seq(cfg: &'a Config<'a>, seq: SequenceId) -> Result<&'a SequenceConfig<'a>, SpiError> {
        cfg.sequences.get(seq.index()).ok_or(SpiError::ParamSeq(seq))
    }

    /// Write the transmit data of an internal buffer channel. With [None], the default value of
    /// the channel is transmitted.
    ///
    /// The data has to contain the frames of the full channel length, packed little endian.
    pub fn write_ib(&mut self, channel: ChannelId, data: Option<&[u8]>) -> Result<(), SpiError> {
        self.write_ib_inner(channel, data)
            .map_err(|e| report(ServiceId::WriteIb, e))
    }

    fn write_ib_inner(&mut self, channel: ChannelId, data: Option<&[u8]>) -> Result<(), SpiError> {
        let cfg = self.config()?;
        let ch_cfg = Self::channel_config(cfg, channel)?;
        let offset = match ch_cfg.buffer {
            BufferType::Internal => self
                .st
                .buffers
                .ib_offset(channel)
                .ok_or(SpiError::ParamChannel(channel))?,
            BufferType::External => return Err(SpiError::ParamChannel(channel)),
        };
        if self.channel_in_use(cfg, channel) {
            return Err(SpiError::SeqPending);
        }
        let state = &mut self.st.buffers.channels[channel.index()];
        match data {
            Some(data) => {
                let size = ch_cfg.buffer_size();
                if data.len() < size {
                    return Err(SpiError::ParamLength(data.len()));
                }
                let start = offset as usize;
                self.st.buffers.ib_tx.0[start..start + size].copy_from_slice(&data[..size]);
                state.tx = TxSource::Internal { offset };
            }
            None => state.tx = TxSource::Default,
        }
        Ok(())
    }

    /// Read the data received on an internal buffer channel.
    pub fn read_ib(&self, channel: ChannelId, data: &mut [u8]) -> Result<(), SpiError> {
        self.read_ib_inner(channel, data)
            .map_err(|e| report(ServiceId::ReadIb, e))
    }

    fn read_ib_inner(&self, channel: ChannelId, data: &mut [u8]) -> Result<(), SpiError> {
        let cfg = self.config()?;
        let ch_cfg = Self::channel_config(cfg, channel)?;
        if ch_cfg.buffer != BufferType::Internal {
            return Err(SpiError::ParamChannel(channel));
        }
        let offset = self
            .st
            .buffers
            .ib_offset(channel)
            .ok_or(SpiError::ParamChannel(channel))? as usize;
        let size = ch_cfg.buffer_size();
        if data.len() < size {
            return Err(SpiError::ParamLength(data.len()));
        }
        data[..size].copy_from_slice(&self.st.buffers.ib_rx.0[offset..offset + size]);
        Ok(())
    }

    /// Set up the buffers of an external buffer channel for the next transfers.
    ///
    /// Without a source, the default value of the channel is transmitted. Without a destination,
    /// the received data is discarded. `len` is the number of frames.
    ///
    /// # Safety
    ///
    /// The driver stores raw pointers to the passed buffers. The buffers must stay valid and must
    /// not be accessed by anything else until all transfers using this channel have completed or
    /// the buffers of the channel were replaced.
    pub unsafe fn setup_eb(
        &mut self,
        channel: ChannelId,
        src: Option<&[u8]>,
        dst: Option<&mut [u8]>,
        len: u16,
    ) -> Result<(), SpiError> {
        unsafe { self.setup_eb_inner(channel, src, dst, len) }
            .map_err(|e| report(ServiceId::SetupEb, e))
    }

    unsafe fn setup_eb_inner(
        &mut self,
        channel: ChannelId,
        src: Option<&[u8]>,
        dst: Option<&mut [u8]>,
        len: u16,
    ) -> Result<(), SpiError> {
        let cfg = self.config()?;
        let ch_cfg = Self::channel_config(cfg, channel)?;
        if ch_cfg.buffer != BufferType::External {
            return Err(SpiError::ParamChannel(channel));
        }
        if len == 0 || len > ch_cfg.max_len {
            return Err(SpiError::ParamLength(len as usize));
        }
        let size = len as usize * ch_cfg.width.bytes();
        let tx = match src {
            Some(src) if src.len() < size => return Err(SpiError::ParamLength(src.len())),
            Some(src) => {
                let mut slice = RawBufSlice::new_nulled();
                unsafe { slice.set(src) };
                TxSource::External(slice)
            }
            None => TxSource::Default,
        };
        let rx = match dst {
            Some(dst) if dst.len() < size => return Err(SpiError::ParamLength(dst.len())),
            Some(dst) => {
                let mut slice = RawBufSliceMut::new_nulled();
                unsafe { slice.set(dst) };
                RxSink::External(slice)
            }
            None => RxSink::Discard,
        };
        if self.channel_in_use(cfg, channel) {
            return Err(SpiError::SeqPending);
        }
        let state = &mut self.st.buffers.channels[channel.index()];
        state.tx = tx;
        state.rx = rx;
        state.len = len;
        Ok(())
    }

    /// Transmit a sequence and wait until it is done.
    ///
    /// Sequences with a single job which were cached at initialization use an optimized
    /// transfer path. A hardware timeout fails the current and all remaining jobs.
    pub fn sync_transmit(&mut self, seq: SequenceId) -> Result<(), SpiError> {
        self.sync_transmit_inner(seq)
            .map_err(|e| report(ServiceId::SyncTransmit, e))
    }

    /// Start the transmission of a sequence. The jobs are queued on their hardware units.
    pub fn async_transmit(&mut self, seq: SequenceId) -> Result<(), SpiError> {
        self.async_transmit_inner(seq)
            .map_err(|e| report(ServiceId::AsyncTransmit, e))
    }

    /// Cancel a pending sequence. Queued jobs are dropped. On master units, a job which is
    /// already transferred finishes normally. On slave units, the transfer is aborted.
    pub fn cancel(&mut self, seq: SequenceId) -> Result<(), SpiError> {
        let cfg = self.config().map_err(|e| report(ServiceId::Cancel, e))?;
        Self::check_seq(cfg, seq).map_err(|e| report(ServiceId::Cancel, e))?;
        self.cancel_sequence(cfg, seq);
        Ok(())
    }

    pub fn job_result(&self, job: JobId) -> Result<JobResult, SpiError> {
        let cfg = self.config().map_err(|e| report(ServiceId::GetJobResult, e))?;
        if job.index() >= cfg.jobs.len() {
            return Err(report(ServiceId::GetJobResult, SpiError::ParamJob(job)));
        }
        Ok(self.st.jobs[job.index()].result)
    }

    pub fn sequence_result(&self, seq: SequenceId) -> Result<SequenceResult, SpiError> {
        let cfg = self
            .config()
            .map_err(|e| report(ServiceId::GetSequenceResult, e))?;
        Self::check_seq(cfg, seq).map_err(|e| report(ServiceId::GetSequenceResult, e))?;
        Ok(self.st.sequences[seq.index()].result)
    }

    /// Global driver status. The driver is busy while any sequence is pending or a synchronous
    /// transmission runs.
    #[inline]
    pub fn status(&self) -> Status {
        self.st.status
    }

    pub fn hw_unit_status(&self, hw_unit: HwUnitId) -> Result<Status, SpiError> {
        let cfg = self
            .config()
            .map_err(|e| report(ServiceId::GetHwUnitStatus, e))?;
        if hw_unit.index() >= cfg.hw_units.len() {
            return Err(report(
                ServiceId::GetHwUnitStatus,
                SpiError::ParamUnit(hw_unit),
            ));
        }
        let unit = &self.st.units[hw_unit.index()];
        if self.st.sync_busy_units & (1 << hw_unit.index()) != 0 {
            return Ok(Status::Busy);
        }
        Ok(unit.status)
    }

    /// Set the asynchronous mode of all hardware units. Fails if any unit is busy.
    pub fn set_async_mode(&mut self, mode: AsyncMode) -> Result<(), SpiError> {
        self.config()
            .map_err(|e| report(ServiceId::SetAsyncMode, e))?;
        if self.st.units.iter().any(|unit| unit.status == Status::Busy) {
            return Err(SpiError::Busy);
        }
        for unit in self.st.units.iter_mut() {
            unit.async_mode = mode;
        }
        log::debug!("SPI async mode: {:?}", mode);
        Ok(())
    }

    /// Set the asynchronous mode of one hardware unit. Fails if the unit is busy.
    pub fn set_hw_unit_async_mode(
        &mut self,
        hw_unit: HwUnitId,
        mode: AsyncMode,
    ) -> Result<(), SpiError> {
        let cfg = self
            .config()
            .map_err(|e| report(ServiceId::SetHwUnitAsyncMode, e))?;
        if hw_unit.index() >= cfg.hw_units.len() {
            return Err(report(
                ServiceId::SetHwUnitAsyncMode,
                SpiError::ParamUnit(hw_unit),
            ));
        }
        let unit = self.st.unit(hw_unit);
        if unit.status == Status::Busy {
            return Err(SpiError::Busy);
        }
        unit.async_mode = mode;
        log::debug!("SPI unit {} async mode: {:?}", hw_unit, mode);
        Ok(())
    }

    /// Drive the asynchronous transfers of all units in polling mode.
    pub fn main_function_handling(&mut self) {
        let Some(cfg) = self.cfg else {
            return;
        };
        for idx in 0..self.st.units.len() {
            let unit = &self.st.units[idx];
            if unit.async_mode == AsyncMode::Polling
                && unit.status == Status::Busy
                && unit.device.job.is_some()
            {
                self.irq_poll(cfg, HwUnitId(idx as u8));
            }
        }
    }

    /// Interrupt handler of an LPSPI instance. Handles the transmit and receive data events.
    pub fn on_interrupt(&mut self, instance: LpspiId) {
        let Some(cfg) = self.cfg else {
            return;
        };
        if let Some(hw_unit) = self.st.unit_for_instance(instance) {
            self.isr_fifo(cfg, hw_unit);
        }
    }

    /// Interrupt handler of the transmit DMA channel of an LPSPI instance.
    pub fn on_dma_tx_interrupt(&mut self, instance: LpspiId) {
        let Some(cfg) = self.cfg else {
            return;
        };
        if let Some(hw_unit) = self.st.unit_for_instance(instance) {
            self.isr_dma_tx(cfg, hw_unit);
        }
    }

    /// Interrupt handler of the receive DMA channel of an LPSPI instance.
    pub fn on_dma_rx_interrupt(&mut self, instance: LpspiId) {
        let Some(cfg) = self.cfg else {
            return;
        };
        if let Some(hw_unit) = self.st.unit_for_instance(instance) {
            self.isr_dma_rx(cfg, hw_unit);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::vec;

    use super::sim::{self, Fixture, SimPeripherals};
    use super::*;

    fn external_fixture() -> Fixture {
        Fixture::new(sim::config(
            vec![
                ChannelConfig::new_internal(DataWidth::Bits16, 2, 0x1111),
                ChannelConfig::new_external(DataWidth::Bits16, 8, 0x2222),
            ],
            vec![sim::device(2)],
            vec![sim::job(&[0], 0, 0), sim::job(&[1], 0, 0)],
            vec![sim::sequence(&[0]), sim::sequence(&[1])],
        ))
    }

    #[test]
    fn uninit_driver() {
        let mut spi: Spi<'static, SimPeripherals> = Spi::new(SimPeripherals::new());
        assert_eq!(spi.status(), Status::Uninit);
        assert_eq!(spi.async_transmit(SequenceId(0)), Err(SpiError::Uninit));
        assert_eq!(spi.sync_transmit(SequenceId(0)), Err(SpiError::Uninit));
        assert_eq!(spi.write_ib(ChannelId(0), None), Err(SpiError::Uninit));
        assert_eq!(spi.job_result(JobId(0)), Err(SpiError::Uninit));
        assert_eq!(spi.cancel(SequenceId(0)), Err(SpiError::Uninit));
        assert_eq!(spi.deinit(), Err(SpiError::Uninit));
        assert_eq!(
            spi.set_async_mode(AsyncMode::Interrupt),
            Err(SpiError::Uninit)
        );
        // Without a configuration, the handlers do nothing.
        spi.main_function_handling();
        spi.on_interrupt(LpspiId::Lpspi0);
    }

    #[test]
    fn init_and_deinit() {
        let fx = Fixture::priorities();
        let mut spi = fx.spi();
        assert_eq!(spi.status(), Status::Idle);
        assert_eq!(spi.init(fx.cfg), Err(SpiError::AlreadyInitialized));
        spi.async_transmit(SequenceId(0)).unwrap();
        assert_eq!(spi.deinit(), Err(SpiError::Busy));
        sim::run_until_idle(&mut spi);
        spi.deinit().unwrap();
        assert_eq!(spi.status(), Status::Uninit);
        assert!(!spi.peripherals().lpspi[0].enabled());
        // The driver can be initialized again.
        spi.init(fx.cfg).unwrap();
        assert_eq!(spi.status(), Status::Idle);
    }

    #[test]
    fn init_rejects_invalid_config() {
        let fx = Fixture::new(Config {
            sequences: sim::leak(vec![sim::sequence(&[7])]),
            ..*Fixture::priorities().cfg
        });
        let mut spi = Spi::new(SimPeripherals::new());
        assert_eq!(
            spi.init(fx.cfg),
            Err(SpiError::Config(ConfigError::InvalidJob {
                seq: SequenceId(0),
                job: JobId(7)
            }))
        );
        assert_eq!(spi.status(), Status::Uninit);
        assert!(!spi.peripherals().lpspi[0].enabled());
    }

    #[test]
    fn invalid_ids() {
        let fx = external_fixture();
        let mut spi = fx.spi();
        assert_eq!(spi.job_result(JobId(2)), Err(SpiError::ParamJob(JobId(2))));
        assert_eq!(
            spi.sequence_result(SequenceId(2)),
            Err(SpiError::ParamSeq(SequenceId(2)))
        );
        assert_eq!(
            spi.hw_unit_status(HwUnitId(1)),
            Err(SpiError::ParamUnit(HwUnitId(1)))
        );
        assert_eq!(
            spi.set_hw_unit_async_mode(HwUnitId(1), AsyncMode::Interrupt),
            Err(SpiError::ParamUnit(HwUnitId(1)))
        );
        assert_eq!(
            spi.async_transmit(SequenceId(2)),
            Err(SpiError::ParamSeq(SequenceId(2)))
        );
        assert_eq!(
            spi.cancel(SequenceId(2)),
            Err(SpiError::ParamSeq(SequenceId(2)))
        );
        assert_eq!(
            spi.write_ib(ChannelId(2), None),
            Err(SpiError::ParamChannel(ChannelId(2)))
        );
    }

    #[test]
    fn internal_buffer_access() {
        let fx = external_fixture();
        let mut spi = fx.spi();
        assert_eq!(
            spi.write_ib(ChannelId(1), None),
            Err(SpiError::ParamChannel(ChannelId(1)))
        );
        assert_eq!(
            spi.write_ib(ChannelId(0), Some(&[1, 2, 3])),
            Err(SpiError::ParamLength(3))
        );
        let mut rx = [0; 3];
        assert_eq!(
            spi.read_ib(ChannelId(0), &mut rx),
            Err(SpiError::ParamLength(3))
        );
        assert_eq!(
            spi.read_ib(ChannelId(1), &mut [0; 4]),
            Err(SpiError::ParamChannel(ChannelId(1)))
        );

        // Without data, the default value is transmitted.
        spi.async_transmit(SequenceId(0)).unwrap();
        sim::run_until_idle(&mut spi);
        spi.write_ib(ChannelId(0), Some(&[0x01, 0x80, 0x02, 0x80]))
            .unwrap();
        spi.async_transmit(SequenceId(0)).unwrap();
        sim::run_until_idle(&mut spi);
        spi.write_ib(ChannelId(0), None).unwrap();
        spi.async_transmit(SequenceId(0)).unwrap();
        sim::run_until_idle(&mut spi);
        assert_eq!(
            spi.peripherals().lpspi[0].shifted(),
            [0x1111, 0x1111, 0x8001, 0x8002, 0x1111, 0x1111]
        );
    }

    #[test]
    fn external_buffer_setup() {
        let fx = external_fixture();
        let mut spi = fx.spi();
        let src = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let mut dst = [0; 6];
        unsafe {
            assert_eq!(
                spi.setup_eb(ChannelId(0), Some(&src[..]), None, 1),
                Err(SpiError::ParamChannel(ChannelId(0)))
            );
            assert_eq!(
                spi.setup_eb(ChannelId(1), Some(&src[..]), None, 0),
                Err(SpiError::ParamLength(0))
            );
            assert_eq!(
                spi.setup_eb(ChannelId(1), Some(&src[..]), None, 9),
                Err(SpiError::ParamLength(9))
            );
            assert_eq!(
                spi.setup_eb(ChannelId(1), Some(&src[..]), None, 4),
                Err(SpiError::ParamLength(6))
            );
            spi.setup_eb(ChannelId(1), Some(&src[..]), Some(&mut dst[..]), 3)
                .unwrap();
        }
        spi.async_transmit(SequenceId(1)).unwrap();
        sim::run_until_idle(&mut spi);
        assert_eq!(dst, src);

        // Only the length is set, the default value is transmitted and the data is discarded.
        unsafe { spi.setup_eb(ChannelId(1), None, None, 2) }.unwrap();
        spi.async_transmit(SequenceId(1)).unwrap();
        sim::run_until_idle(&mut spi);
        assert_eq!(
            spi.peripherals().lpspi[0].shifted(),
            [0x2211, 0x4433, 0x6655, 0x2222, 0x2222]
        );
        assert_eq!(dst, src);
    }

    #[test]
    fn buffers_of_pending_channels_are_kept() {
        let fx = Fixture::new(sim::config(
            vec![
                ChannelConfig::new_external(DataWidth::Bits8, 16, 0),
                ChannelConfig::new_internal(DataWidth::Bits8, 2, 0),
            ],
            vec![sim::device(2)],
            vec![sim::job(&[0], 0, 0), sim::job(&[1], 0, 0)],
            vec![sim::sequence(&[0]), sim::sequence(&[1])],
        ));
        let mut spi = fx.spi();
        let src: [u8; 16] = core::array::from_fn(|i| i as u8 + 1);
        let mut dst = [0; 16];
        let short = [0xEE; 2];
        let mut short_dst = [0; 2];
        unsafe { spi.setup_eb(ChannelId(0), Some(&src[..]), Some(&mut dst[..]), 16) }.unwrap();
        spi.write_ib(ChannelId(1), Some(&[0x55, 0x66])).unwrap();
        spi.async_transmit(SequenceId(0)).unwrap();
        spi.async_transmit(SequenceId(1)).unwrap();
        sim::step(&mut spi);
        assert_eq!(spi.job_result(JobId(0)), Ok(JobResult::Pending));
        assert_eq!(spi.job_result(JobId(1)), Ok(JobResult::Queued));

        // Job 0 is shifting the channel, job 1 is queued with its channel.
        assert_eq!(
            unsafe { spi.setup_eb(ChannelId(0), Some(&short[..]), Some(&mut short_dst[..]), 2) },
            Err(SpiError::SeqPending)
        );
        assert_eq!(
            spi.write_ib(ChannelId(1), Some(&[0x77, 0x88])),
            Err(SpiError::SeqPending)
        );
        sim::run_until_idle(&mut spi);
        assert_eq!(spi.sequence_result(SequenceId(0)), Ok(SequenceResult::Ok));
        assert_eq!(spi.sequence_result(SequenceId(1)), Ok(SequenceResult::Ok));
        assert_eq!(dst, src);
        let expected: std::vec::Vec<u32> = src
            .iter()
            .map(|&b| b as u32)
            .chain([0x55, 0x66])
            .collect();
        assert_eq!(spi.peripherals().lpspi[0].shifted(), expected.as_slice());

        unsafe { spi.setup_eb(ChannelId(0), Some(&short[..]), Some(&mut short_dst[..]), 2) }
            .unwrap();
        spi.write_ib(ChannelId(1), Some(&[0x77, 0x88])).unwrap();
        spi.async_transmit(SequenceId(0)).unwrap();
        sim::run_until_idle(&mut spi);
        assert_eq!(short_dst, short);
    }

    #[test]
    fn async_mode_switch() {
        let fx = Fixture::priorities();
        let mut spi = fx.spi();
        spi.async_transmit(SequenceId(0)).unwrap();
        assert_eq!(spi.set_async_mode(AsyncMode::Interrupt), Err(SpiError::Busy));
        assert_eq!(
            spi.set_hw_unit_async_mode(HwUnitId(0), AsyncMode::Interrupt),
            Err(SpiError::Busy)
        );
        sim::run_until_idle(&mut spi);
        spi.set_hw_unit_async_mode(HwUnitId(0), AsyncMode::Interrupt)
            .unwrap();
        spi.async_transmit(SequenceId(1)).unwrap();
        // Polling does not drive units in interrupt mode.
        spi.main_function_handling();
        assert_eq!(spi.job_result(JobId(1)), Ok(JobResult::Pending));
        sim::run_until_idle(&mut spi);
        assert_eq!(spi.job_result(JobId(1)), Ok(JobResult::Ok));
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            SpiError::SeqPending.dev_error_code(),
            Some(DevErrorCode::SeqPending)
        );
        assert_eq!(
            SpiError::ParamLength(0).dev_error_code(),
            Some(DevErrorCode::ParamLength)
        );
        assert_eq!(SpiError::Timeout(JobId(0)).dev_error_code(), None);
        assert_eq!(SpiError::Busy.dev_error_code(), None);
        assert_eq!(u8::from(DevErrorCode::AlreadyInitialized), 0x4A);
        assert_eq!(u8::from(ServiceId::SetHwUnitAsyncMode), 0x80);
    }

    #[test]
    fn version_info() {
        let info = Spi::<SimPeripherals>::version_info();
        assert_eq!(info.module_id, 83);
        assert_eq!(info.vendor_id, crate::VENDOR_ID);
    }
}
