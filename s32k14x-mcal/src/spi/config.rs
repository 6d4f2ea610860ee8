//! Configuration model of the SPI handler.
//!
//! The configuration is a set of immutable tables which are usually placed in a `static` by the
//! integrator. Channels, external devices, jobs, sequences and hardware units refer to each other
//! through their index in the respective table.
use arbitrary_int::{u2, u12};
use s32k14x::lpspi::{ClockConfig, ClockPhase, ClockPolarity, Prescaler, TransmitCommand};

use crate::time::{Hertz, Microseconds};

use super::{
    IB_POOL_SIZE, LpspiId, MAX_CHANNELS, MAX_HW_UNITS, MAX_JOBS, MAX_SEQUENCES, NUM_PRIORITIES,
};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $raw:ty) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub $raw);

        impl $name {
            #[inline]
            pub const fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Index into [Config::channels].
    ChannelId,
    u16
);
id_type!(
    /// Index into [Config::jobs].
    JobId,
    u16
);
id_type!(
    /// Index into [Config::sequences].
    SequenceId,
    u16
);
id_type!(
    /// Index into [Config::hw_units].
    HwUnitId,
    u8
);
id_type!(
    /// Index into [Config::devices].
    DeviceId,
    u8
);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataWidth {
    Bits8,
    Bits16,
    Bits32,
}

impl DataWidth {
    /// Number of buffer bytes occupied by one frame.
    #[inline]
    pub const fn bytes(&self) -> usize {
        match self {
            DataWidth::Bits8 => 1,
            DataWidth::Bits16 => 2,
            DataWidth::Bits32 => 4,
        }
    }

    #[inline]
    pub const fn bits(&self) -> u16 {
        self.bytes() as u16 * 8
    }

    /// Mask of the valid bits of a frame.
    #[inline]
    pub const fn mask(&self) -> u32 {
        match self {
            DataWidth::Bits8 => 0xFF,
            DataWidth::Bits16 => 0xFFFF,
            DataWidth::Bits32 => 0xFFFF_FFFF,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BufferType {
    /// Internal buffer, owned by the driver and accessed with `write_ib` and `read_ib`.
    Internal,
    /// External buffer, provided by the user with `setup_eb`.
    External,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum TransferStart {
    #[default]
    Msb,
    Lsb,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum CsPolarity {
    #[default]
    ActiveLow,
    ActiveHigh,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub buffer: BufferType,
    pub width: DataWidth,
    /// Transmitted for every frame if no transmit data is provided.
    pub default_value: u32,
    /// Maximum number of frames. For internal buffers, this is also the transfer length.
    pub max_len: u16,
    pub transfer_start: TransferStart,
}

/// Width and default transmit value of the frames of a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    pub width: DataWidth,
    pub default_value: u32,
}

impl FrameFormat {
    /// Transmitted frame if the channel has no transmit data.
    #[inline]
    pub const fn default_frame(&self) -> u32 {
        self.default_value & self.width.mask()
    }
}

impl ChannelConfig {
    #[inline]
    pub const fn format(&self) -> FrameFormat {
        FrameFormat {
            width: self.width,
            default_value: self.default_value,
        }
    }

    pub const fn new_internal(width: DataWidth, max_len: u16, default_value: u32) -> Self {
        Self {
            buffer: BufferType::Internal,
            width,
            default_value,
            max_len,
            transfer_start: TransferStart::Msb,
        }
    }

    pub const fn new_external(width: DataWidth, max_len: u16, default_value: u32) -> Self {
        Self {
            buffer: BufferType::External,
            width,
            default_value,
            max_len,
            transfer_start: TransferStart::Msb,
        }
    }

    /// Size of the internal buffer in bytes.
    #[inline]
    pub const fn buffer_size(&self) -> usize {
        self.max_len as usize * self.width.bytes()
    }
}

/// Transfer attributes of an external SPI device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExternalDeviceConfig {
    /// Peripheral chip select line of the LPSPI.
    pub cs: u2,
    pub cs_polarity: CsPolarity,
    /// Keep the chip select asserted for all frames of a job.
    pub continuous_cs: bool,
    pub cpol: ClockPolarity,
    pub cpha: ClockPhase,
    pub prescaler: Prescaler,
    /// SCK divider. The SCK period is `(sck_div + 2)` prescaled functional clock cycles.
    pub sck_div: u8,
    pub pcs_to_sck: u8,
    pub sck_to_pcs: u8,
    pub between_transfers: u8,
}

impl ExternalDeviceConfig {
    pub const fn new(cs: u2) -> Self {
        Self {
            cs,
            cs_polarity: CsPolarity::ActiveLow,
            continuous_cs: true,
            cpol: ClockPolarity::IdleLow,
            cpha: ClockPhase::CaptureLeading,
            prescaler: Prescaler::Div1,
            sck_div: 2,
            pcs_to_sck: 1,
            sck_to_pcs: 1,
            between_transfers: 1,
        }
    }

    #[inline]
    pub fn clock_config(&self) -> ClockConfig {
        ClockConfig::DEFAULT
            .with_sckdiv(self.sck_div)
            .with_dbt(self.between_transfers)
            .with_pcssck(self.pcs_to_sck)
            .with_sckpcs(self.sck_to_pcs)
    }

    /// Command word without the channel specific frame attributes.
    #[inline]
    pub fn command(&self) -> TransmitCommand {
        TransmitCommand::DEFAULT
            .with_cpol(self.cpol)
            .with_cpha(self.cpha)
            .with_prescale(self.prescaler)
            .with_pcs(self.cs)
    }

    /// Command word for one channel of a job.
    ///
    /// With continuous chip select, the first channel starts the continuous transfer and all
    /// following channels use the continuing command form which keeps the chip select asserted.
    pub fn channel_command(&self, channel: &ChannelConfig, first: bool) -> TransmitCommand {
        let cmd = self
            .command()
            .with_framesz(u12::new(channel.width.bits() - 1))
            .with_lsbf(channel.transfer_start == TransferStart::Lsb);
        if self.continuous_cs {
            cmd.with_cont(true).with_contc(!first)
        } else {
            cmd
        }
    }
}

pub type Notification = fn();

#[derive(Debug, Copy, Clone)]
pub struct JobConfig<'a> {
    /// Channels transmitted in this order under one chip select window.
    pub channels: &'a [ChannelId],
    pub hw_unit: HwUnitId,
    pub device: DeviceId,
    /// Priority from 0 (lowest) to 3 (highest).
    pub priority: u8,
    pub start_notification: Option<Notification>,
    pub end_notification: Option<Notification>,
}

impl<'a> JobConfig<'a> {
    pub const fn new(channels: &'a [ChannelId], hw_unit: HwUnitId, device: DeviceId) -> Self {
        Self {
            channels,
            hw_unit,
            device,
            priority: 0,
            start_notification: None,
            end_notification: None,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct SequenceConfig<'a> {
    pub jobs: &'a [JobId],
    /// Allows jobs of other sequences to be scheduled between the jobs of this sequence.
    pub interruptible: bool,
    pub end_notification: Option<Notification>,
}

impl<'a> SequenceConfig<'a> {
    pub const fn new(jobs: &'a [JobId]) -> Self {
        Self {
            jobs,
            interruptible: false,
            end_notification: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HwUnitMode {
    Master,
    Slave,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferMode {
    /// The CPU moves every frame between the buffers and the LPSPI FIFOs.
    Fifo,
    /// Two eDMA channels move the frames of asynchronous transfers.
    Dma { tx_channel: u8, rx_channel: u8 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HwUnitConfig {
    pub instance: LpspiId,
    pub mode: HwUnitMode,
    pub transfer: TransferMode,
    /// Only relevant for [DeliveryLevel::SyncAndAsync]: the unit is used for synchronous
    /// transmissions. Otherwise it is used for asynchronous transmissions.
    pub synchronous: bool,
}

impl HwUnitConfig {
    pub const fn new_master(instance: LpspiId) -> Self {
        Self {
            instance,
            mode: HwUnitMode::Master,
            transfer: TransferMode::Fifo,
            synchronous: false,
        }
    }
}

/// Services which are provided by the driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeliveryLevel {
    /// Only synchronous transmission.
    Sync = 0,
    /// Only asynchronous transmission.
    Async = 1,
    /// Both. Every hardware unit is dedicated to one of the two transmission kinds.
    SyncAndAsync = 2,
}

impl DeliveryLevel {
    #[inline]
    pub const fn supports_sync(&self) -> bool {
        !matches!(self, DeliveryLevel::Async)
    }

    #[inline]
    pub const fn supports_async(&self) -> bool {
        !matches!(self, DeliveryLevel::Sync)
    }
}

/// Hardware related errors which are reported to the production error hook.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProductionError {
    /// A synchronous transfer did not finish in time.
    HardwareTimeout { hw_unit: HwUnitId, job: JobId },
    /// A slave unit stayed busy while its transfer was cancelled.
    SlaveCancelTimeout { hw_unit: HwUnitId },
}

pub type ProductionErrorHook = fn(ProductionError);

#[derive(Debug, Copy, Clone)]
pub struct Config<'a> {
    pub channels: &'a [ChannelConfig],
    pub devices: &'a [ExternalDeviceConfig],
    pub jobs: &'a [JobConfig<'a>],
    pub sequences: &'a [SequenceConfig<'a>],
    pub hw_units: &'a [HwUnitConfig],
    pub level: DeliveryLevel,
    /// Allow synchronous transmissions on disjoint hardware units to run concurrently. If this
    /// is disabled, every synchronous transmission blocks all units.
    pub concurrent_sync_transmit: bool,
    /// Core clock, used to derive the timeout of synchronous transmissions.
    pub core_clock: Hertz,
    /// Maximum time a synchronous transmission may wait for the hardware without progress.
    pub sync_timeout: Microseconds,
    pub production_error_hook: Option<ProductionErrorHook>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("too many channels: {0}")]
    TooManyChannels(usize),
    #[error("too many jobs: {0}")]
    TooManyJobs(usize),
    #[error("too many sequences: {0}")]
    TooManySequences(usize),
    #[error("too many hardware units: {0}")]
    TooManyHwUnits(usize),
    #[error("channel {0} has a maximum length of zero")]
    ZeroLengthChannel(ChannelId),
    #[error("internal buffers exceed the buffer pool")]
    InternalBufferPoolExhausted,
    #[error("job {0} has no channels")]
    EmptyJob(JobId),
    #[error("job {job} refers to invalid channel {channel}")]
    InvalidChannel { job: JobId, channel: ChannelId },
    #[error("job {job} refers to invalid hardware unit {hw_unit}")]
    InvalidHwUnit { job: JobId, hw_unit: HwUnitId },
    #[error("job {job} refers to invalid device {device}")]
    InvalidDevice { job: JobId, device: DeviceId },
    #[error("job {job} has invalid priority {priority}")]
    InvalidPriority { job: JobId, priority: u8 },
    #[error("sequence {0} has no jobs")]
    EmptySequence(SequenceId),
    #[error("sequence {seq} refers to invalid job {job}")]
    InvalidJob { seq: SequenceId, job: JobId },
    #[error("sequence {seq} contains job {job} more than once")]
    DuplicateJob { seq: SequenceId, job: JobId },
    #[error("LPSPI instance {0:?} is used by more than one hardware unit")]
    DuplicateInstance(LpspiId),
    #[error("hardware unit {0} has an invalid DMA channel assignment")]
    InvalidDmaChannels(HwUnitId),
    #[error("DMA channel {channel} of hardware unit {hw_unit} is used by another unit")]
    SharedDmaChannel { hw_unit: HwUnitId, channel: u8 },
}

impl Config<'_> {
    /// Check all table references and capacities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channels.len() > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels(self.channels.len()));
        }
        if self.jobs.len() > MAX_JOBS {
            return Err(ConfigError::TooManyJobs(self.jobs.len()));
        }
        if self.sequences.len() > MAX_SEQUENCES {
            return Err(ConfigError::TooManySequences(self.sequences.len()));
        }
        if self.hw_units.len() > MAX_HW_UNITS {
            return Err(ConfigError::TooManyHwUnits(self.hw_units.len()));
        }
        let mut ib_size = 0;
        for (idx, channel) in self.channels.iter().enumerate() {
            if channel.max_len == 0 {
                return Err(ConfigError::ZeroLengthChannel(ChannelId(idx as u16)));
            }
            if channel.buffer == BufferType::Internal {
                ib_size += aligned_buffer_size(channel);
            }
        }
        if ib_size > IB_POOL_SIZE {
            return Err(ConfigError::InternalBufferPoolExhausted);
        }
        for (idx, unit) in self.hw_units.iter().enumerate() {
            let hw_unit = HwUnitId(idx as u8);
            if self.hw_units[..idx]
                .iter()
                .any(|other| other.instance == unit.instance)
            {
                return Err(ConfigError::DuplicateInstance(unit.instance));
            }
            if let TransferMode::Dma {
                tx_channel,
                rx_channel,
            } = unit.transfer
            {
                let num = s32k14x::edma::NUM_CHANNELS as u8;
                if tx_channel >= num || rx_channel >= num || tx_channel == rx_channel {
                    return Err(ConfigError::InvalidDmaChannels(hw_unit));
                }
                let used_before = |channel: u8| {
                    self.hw_units[..idx].iter().any(|other| match other.transfer {
                        TransferMode::Dma {
                            tx_channel,
                            rx_channel,
                        } => channel == tx_channel || channel == rx_channel,
                        TransferMode::Fifo => false,
                    })
                };
                if let Some(channel) = [tx_channel, rx_channel]
                    .into_iter()
                    .find(|&channel| used_before(channel))
                {
                    return Err(ConfigError::SharedDmaChannel { hw_unit, channel });
                }
            }
        }
        for (idx, job) in self.jobs.iter().enumerate() {
            let job_id = JobId(idx as u16);
            if job.channels.is_empty() {
                return Err(ConfigError::EmptyJob(job_id));
            }
            if let Some(&channel) = job
                .channels
                .iter()
                .find(|channel| channel.index() >= self.channels.len())
            {
                return Err(ConfigError::InvalidChannel {
                    job: job_id,
                    channel,
                });
            }
            if job.hw_unit.index() >= self.hw_units.len() {
                return Err(ConfigError::InvalidHwUnit {
                    job: job_id,
                    hw_unit: job.hw_unit,
                });
            }
            if job.device.index() >= self.devices.len() {
                return Err(ConfigError::InvalidDevice {
                    job: job_id,
                    device: job.device,
                });
            }
            if job.priority as usize >= NUM_PRIORITIES {
                return Err(ConfigError::InvalidPriority {
                    job: job_id,
                    priority: job.priority,
                });
            }
        }
        for (idx, seq) in self.sequences.iter().enumerate() {
            let seq_id = SequenceId(idx as u16);
            if seq.jobs.is_empty() {
                return Err(ConfigError::EmptySequence(seq_id));
            }
            for (pos, &job) in seq.jobs.iter().enumerate() {
                if job.index() >= self.jobs.len() {
                    return Err(ConfigError::InvalidJob { seq: seq_id, job });
                }
                if seq.jobs[..pos].contains(&job) {
                    return Err(ConfigError::DuplicateJob { seq: seq_id, job });
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn job(&self, job: JobId) -> &JobConfig<'_> {
        &self.jobs[job.index()]
    }

    #[inline]
    pub(crate) fn hw_unit_of(&self, job: JobId) -> HwUnitId {
        self.jobs[job.index()].hw_unit
    }

    /// Bit mask of all hardware units used by a sequence.
    pub(crate) fn sequence_hw_units(&self, seq: SequenceId) -> u32 {
        self.sequences[seq.index()]
            .jobs
            .iter()
            .fold(0, |mask, job| mask | (1 << self.hw_unit_of(*job).index()))
    }

    /// Bit mask with the chip select lines which are active high on the given hardware unit.
    pub(crate) fn active_high_cs_lines(&self, hw_unit: HwUnitId) -> u8 {
        self.jobs
            .iter()
            .filter(|job| job.hw_unit == hw_unit)
            .map(|job| &self.devices[job.device.index()])
            .filter(|device| device.cs_polarity == CsPolarity::ActiveHigh)
            .fold(0, |mask, device| mask | (1 << device.cs.value()))
    }
}

/// Internal buffers are placed on word boundaries, so DMA transfers of every width are aligned.
#[inline]
pub(crate) const fn aligned_buffer_size(channel: &ChannelConfig) -> usize {
    channel.buffer_size().next_multiple_of(4)
}
