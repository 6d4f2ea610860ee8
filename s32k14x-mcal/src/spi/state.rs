//! Runtime state of the SPI handler.
//!
//! All state lives in fixed capacity tables indexed by the configuration IDs. The queues of the
//! hardware units are intrusive singly linked lists through [JobState::next].
use raw_slice::{RawBufSlice, RawBufSliceMut};

use super::{
    ChannelId, Config, DataWidth, FrameFormat, HwUnitId, IB_POOL_SIZE, JobId, JobResult,
    MAX_CHANNELS, MAX_HW_UNITS, MAX_JOBS, MAX_SEQUENCES, NUM_PRIORITIES, SequenceId,
    SequenceResult, Status, config::aligned_buffer_size, fast::SequenceCache,
};
use super::{AsyncMode, BufferType, LpspiId};

/// Word aligned byte pool for the internal buffers.
#[repr(C, align(4))]
pub(crate) struct BufferPool(pub [u8; IB_POOL_SIZE]);

impl BufferPool {
    pub const fn new() -> Self {
        Self([0; IB_POOL_SIZE])
    }

    #[inline]
    pub fn address(&self, offset: u16) -> usize {
        self.0.as_ptr() as usize + offset as usize
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum TxSource {
    /// Transmit the default value of the channel.
    Default,
    Internal { offset: u16 },
    External(RawBufSlice),
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum RxSink {
    Discard,
    Internal { offset: u16 },
    External(RawBufSliceMut),
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct ChannelState {
    pub tx: TxSource,
    pub rx: RxSink,
    /// Number of frames of the next transfer.
    pub len: u16,
}

/// Channel buffers, kept apart from the scheduling state so the transfer engine can borrow them
/// next to the device state of a hardware unit.
pub(crate) struct Buffers {
    pub channels: heapless::Vec<ChannelState, MAX_CHANNELS>,
    pub ib_tx: BufferPool,
    pub ib_rx: BufferPool,
}

impl Buffers {
    pub const fn new() -> Self {
        Self {
            channels: heapless::Vec::new(),
            ib_tx: BufferPool::new(),
            ib_rx: BufferPool::new(),
        }
    }

    /// Assign the internal buffer offsets and reset all channels to their initial state.
    pub fn init(&mut self, cfg: &Config<'_>) {
        self.channels.clear();
        self.ib_tx.0.fill(0);
        self.ib_rx.0.fill(0);
        let mut offset = 0;
        for channel in cfg.channels {
            let state = match channel.buffer {
                BufferType::Internal => {
                    let state = ChannelState {
                        tx: TxSource::Default,
                        rx: RxSink::Internal {
                            offset: offset as u16,
                        },
                        len: channel.max_len,
                    };
                    offset += aligned_buffer_size(channel);
                    state
                }
                BufferType::External => ChannelState {
                    tx: TxSource::Default,
                    rx: RxSink::Discard,
                    len: channel.max_len,
                },
            };
            // Capacity and pool size were checked by the configuration validation.
            let _ = self.channels.push(state);
        }
    }

    /// Offset of the internal buffer pair of a channel.
    #[inline]
    pub fn ib_offset(&self, channel: ChannelId) -> Option<u16> {
        match self.channels[channel.index()].rx {
            RxSink::Internal { offset } => Some(offset),
            _ => None,
        }
    }

    /// Frame `idx` which is transmitted for the given channel.
    pub fn tx_frame(&self, format: FrameFormat, channel: ChannelId, idx: usize) -> u32 {
        let default = format.default_frame();
        let buf = match &self.channels[channel.index()].tx {
            TxSource::Default => return default,
            TxSource::Internal { offset } => self.ib_tx.0.get(*offset as usize..),
            // Safety: The user guarantees the buffer validity as part of the setup_eb contract.
            TxSource::External(slice) => unsafe { slice.get() },
        };
        buf.and_then(|buf| read_frame(buf, format.width, idx))
            .unwrap_or(default)
    }

    /// Store the received frame `idx` of the given channel.
    pub fn store_rx_frame(&mut self, format: FrameFormat, channel: ChannelId, idx: usize, value: u32) {
        match self.channels[channel.index()].rx {
            RxSink::Discard => (),
            RxSink::Internal { offset } => {
                if let Some(buf) = self.ib_rx.0.get_mut(offset as usize..) {
                    write_frame(buf, format.width, idx, value);
                }
            }
            RxSink::External(mut slice) => {
                // Safety: The user guarantees the buffer validity as part of the setup_eb
                // contract.
                if let Some(buf) = unsafe { slice.get_mut() } {
                    write_frame(buf, format.width, idx, value);
                }
            }
        }
    }

    /// Start address of the transmit data, or [None] if the default value is sent.
    pub fn tx_address(&self, channel: ChannelId) -> Option<usize> {
        match self.channels[channel.index()].tx {
            TxSource::Default => None,
            TxSource::Internal { offset } => Some(self.ib_tx.address(offset)),
            // Safety: Only the address is used.
            TxSource::External(slice) => unsafe { slice.get() }.map(|buf| buf.as_ptr() as usize),
        }
    }

    /// Start address of the receive buffer, or [None] if the received data is discarded.
    pub fn rx_address(&self, channel: ChannelId) -> Option<usize> {
        match self.channels[channel.index()].rx {
            RxSink::Discard => None,
            RxSink::Internal { offset } => Some(self.ib_rx.address(offset)),
            RxSink::External(mut slice) => {
                // Safety: Only the address is used.
                unsafe { slice.get_mut() }.map(|buf| buf.as_mut_ptr() as usize)
            }
        }
    }
}

/// Read frame `idx` of a little endian packed buffer. Returns [None] if the frame lies outside
/// of the buffer.
#[inline]
pub(crate) fn read_frame(buf: &[u8], width: DataWidth, idx: usize) -> Option<u32> {
    let start = idx.checked_mul(width.bytes())?;
    let bytes = buf.get(start..start.checked_add(width.bytes())?)?;
    let mut word = [0; 4];
    word[..bytes.len()].copy_from_slice(bytes);
    Some(u32::from_le_bytes(word))
}

/// Write frame `idx` of a little endian packed buffer. Frames outside of the buffer are dropped
/// and `false` is returned.
#[inline]
pub(crate) fn write_frame(buf: &mut [u8], width: DataWidth, idx: usize, value: u32) -> bool {
    let Some(start) = idx.checked_mul(width.bytes()) else {
        return false;
    };
    match buf.get_mut(start..start + width.bytes()) {
        Some(dst) => {
            dst.copy_from_slice(&value.to_le_bytes()[..width.bytes()]);
            true
        }
        None => false,
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct JobState {
    pub result: JobResult,
    /// Sequence which currently owns the job.
    pub sequence: Option<SequenceId>,
    /// Next job in the same priority queue of the hardware unit.
    pub next: Option<JobId>,
}

impl JobState {
    pub const fn new() -> Self {
        Self {
            result: JobResult::Ok,
            sequence: None,
            next: None,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct SequenceState {
    pub result: SequenceResult,
    /// Jobs which have not finished yet.
    pub remaining: u16,
    /// Position of the current job in the job list.
    pub cursor: u16,
    pub failed: bool,
    /// Bit mask of all hardware units used by the sequence.
    pub hw_units: u32,
}

impl SequenceState {
    pub const fn new(hw_units: u32) -> Self {
        Self {
            result: SequenceResult::Ok,
            remaining: 0,
            cursor: 0,
            failed: false,
            hw_units,
        }
    }
}

/// Position of a transfer inside the channel list of the active job.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct ChannelCursor {
    /// Position in the channel list of the job.
    pub pos: u16,
    pub channel: ChannelId,
    /// Frames of the channel not yet moved (FIFO) or not yet programmed (DMA).
    pub remaining: u16,
    /// Frames of the channel already moved or programmed.
    pub index: u16,
    pub done: bool,
}

impl ChannelCursor {
    pub const fn new() -> Self {
        Self {
            pos: 0,
            channel: ChannelId(0),
            remaining: 0,
            index: 0,
            done: true,
        }
    }

    pub fn start(pos: u16, channel: ChannelId, len: u16) -> Self {
        Self {
            pos,
            channel,
            remaining: len,
            index: 0,
            done: false,
        }
    }
}

/// State of the LPSPI instance which backs a hardware unit.
#[derive(Debug, Copy, Clone)]
pub(crate) struct LpspiDevice {
    pub instance: LpspiId,
    pub job: Option<JobId>,
    /// Command word of the channel which is currently written to the TX FIFO.
    pub cmd: s32k14x::lpspi::TransmitCommand,
    /// Command word which still has to be written to the TX FIFO.
    pub pending_cmd: Option<s32k14x::lpspi::TransmitCommand>,
    pub continuous: bool,
    pub tx: ChannelCursor,
    pub rx: ChannelCursor,
    /// Frames written to the TX FIFO which were not read from the RX FIFO yet.
    pub in_flight: u16,
    pub finished: bool,
    /// Source word of DMA transfers which send the default value.
    pub default_word: u32,
    /// Destination word of DMA transfers which discard the received data.
    pub discard_word: u32,
}

impl LpspiDevice {
    pub const fn new(instance: LpspiId) -> Self {
        Self {
            instance,
            job: None,
            cmd: s32k14x::lpspi::TransmitCommand::DEFAULT,
            pending_cmd: None,
            continuous: false,
            tx: ChannelCursor::new(),
            rx: ChannelCursor::new(),
            in_flight: 0,
            finished: true,
            default_word: 0,
            discard_word: 0,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct HwUnitState {
    pub status: Status,
    pub async_mode: AsyncMode,
    /// Job which currently owns the unit.
    pub current: Option<JobId>,
    pub heads: [Option<JobId>; NUM_PRIORITIES],
    pub tails: [Option<JobId>; NUM_PRIORITIES],
    /// Highest priority with a queued job, -1 if no job is queued.
    pub max_priority: i8,
    pub device: LpspiDevice,
}

impl HwUnitState {
    pub const fn new(instance: LpspiId) -> Self {
        Self {
            status: Status::Idle,
            async_mode: AsyncMode::Polling,
            current: None,
            heads: [None; NUM_PRIORITIES],
            tails: [None; NUM_PRIORITIES],
            max_priority: -1,
            device: LpspiDevice::new(instance),
        }
    }
}

pub(crate) struct DriverState {
    pub status: Status,
    pub jobs: heapless::Vec<JobState, MAX_JOBS>,
    pub sequences: heapless::Vec<SequenceState, MAX_SEQUENCES>,
    pub units: heapless::Vec<HwUnitState, MAX_HW_UNITS>,
    /// Hardware units used by running synchronous transmissions.
    pub sync_busy_units: u32,
    pub buffers: Buffers,
    pub cache: SequenceCache,
}

impl DriverState {
    pub const fn new() -> Self {
        Self {
            status: Status::Uninit,
            jobs: heapless::Vec::new(),
            sequences: heapless::Vec::new(),
            units: heapless::Vec::new(),
            sync_busy_units: 0,
            buffers: Buffers::new(),
            cache: SequenceCache::new(),
        }
    }

    /// Build all runtime tables for a validated configuration.
    pub fn init(&mut self, cfg: &Config<'_>) {
        self.jobs.clear();
        self.sequences.clear();
        self.units.clear();
        self.sync_busy_units = 0;
        for _ in cfg.jobs {
            let _ = self.jobs.push(JobState::new());
        }
        for idx in 0..cfg.sequences.len() {
            let mask = cfg.sequence_hw_units(SequenceId(idx as u16));
            let _ = self.sequences.push(SequenceState::new(mask));
        }
        for unit in cfg.hw_units {
            let _ = self.units.push(HwUnitState::new(unit.instance));
        }
        self.buffers.init(cfg);
        self.cache = SequenceCache::build(cfg);
        self.status = Status::Idle;
    }

    #[inline]
    pub fn unit(&mut self, hw_unit: HwUnitId) -> &mut HwUnitState {
        &mut self.units[hw_unit.index()]
    }

    #[inline]
    pub fn job(&mut self, job: JobId) -> &mut JobState {
        &mut self.jobs[job.index()]
    }

    #[inline]
    pub fn seq(&mut self, seq: SequenceId) -> &mut SequenceState {
        &mut self.sequences[seq.index()]
    }

    /// Hardware unit which is backed by the given LPSPI instance.
    pub fn unit_for_instance(&self, instance: LpspiId) -> Option<HwUnitId> {
        self.units
            .iter()
            .position(|unit| unit.device.instance == instance)
            .map(|idx| HwUnitId(idx as u8))
    }

    /// Recompute the global driver status.
    pub fn update_status(&mut self) {
        if self.status == Status::Uninit {
            return;
        }
        let busy = self.sync_busy_units != 0
            || self
                .sequences
                .iter()
                .any(|seq| seq.result == SequenceResult::Pending)
            || self.units.iter().any(|unit| unit.status == Status::Busy);
        self.status = if busy { Status::Busy } else { Status::Idle };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_packing_is_little_endian() {
        let mut buf = [0u8; 8];
        write_frame(&mut buf, DataWidth::Bits16, 1, 0xABCD);
        assert_eq!(buf[2..4], [0xCD, 0xAB]);
        assert_eq!(read_frame(&buf, DataWidth::Bits16, 1), Some(0xABCD));
        write_frame(&mut buf, DataWidth::Bits32, 1, 0x1234_5678);
        assert_eq!(buf[4..8], [0x78, 0x56, 0x34, 0x12]);
        write_frame(&mut buf, DataWidth::Bits8, 0, 0x1FF);
        assert_eq!(buf[0], 0xFF);
    }

    #[test]
    fn frames_outside_of_the_buffer_are_ignored() {
        let mut buf = [0u8; 3];
        assert_eq!(read_frame(&buf, DataWidth::Bits16, 1), None);
        assert_eq!(read_frame(&buf, DataWidth::Bits8, 2), Some(0));
        assert!(!write_frame(&mut buf, DataWidth::Bits16, 1, 0xFFFF));
        assert!(!write_frame(&mut buf, DataWidth::Bits32, 0, 0xFFFF_FFFF));
        assert_eq!(buf, [0; 3]);
    }

    #[test]
    fn buffer_pool_is_word_aligned() {
        let pool = BufferPool::new();
        assert_eq!(pool.address(0) % 4, 0);
    }
}
