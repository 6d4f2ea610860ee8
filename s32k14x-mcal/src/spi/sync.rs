//! Synchronous transmission.
//!
//! The CPU busy waits on the FIFO status and moves every frame itself. The same channel loop is
//! used for the general path and for the cached fast path, so both produce identical register
//! accesses.
use s32k14x::lpspi::{ClockConfig, TransmitCommand};

use super::{
    ChannelId, Config, ExternalDeviceConfig, FIFO_SIZE, FrameFormat, HwUnitId, JobId, JobResult,
    LpspiId, LpspiRegisters, Notification, ProductionError, SequenceId, SequenceResult, Spi,
    SpiError, SpiPeripherals, Status,
    engine::{CR_ENABLED, release_command, wait_tx_room},
    fast::CachedSequence,
    report_production_error,
    state::Buffers,
};
use crate::{exclusive::ExclusiveArea, time::cycles_in};

/// Estimated core clock cycles of one iteration of the busy wait loop.
const SYNC_LOOP_CYCLES: u32 = 10;

/// Number of busy wait iterations without progress before a transfer times out.
pub(super) fn timeout_ticks(cfg: &Config<'_>) -> u32 {
    (cycles_in(cfg.core_clock, cfg.sync_timeout) / SYNC_LOOP_CYCLES).max(1)
}

/// One channel of a synchronous job with all attributes the transfer loop needs.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ChannelTransfer {
    pub channel: ChannelId,
    pub format: FrameFormat,
    pub cmd: TransmitCommand,
    /// Last channel of the job. Releases a continuous chip select after the last frame.
    pub last: bool,
}

impl ChannelTransfer {
    /// Resolve the channel at position `pos` of a job with `num_channels` channels.
    pub fn resolve(
        cfg: &Config<'_>,
        device_cfg: &ExternalDeviceConfig,
        channel: ChannelId,
        pos: usize,
        num_channels: usize,
    ) -> Self {
        let ch_cfg = &cfg.channels[channel.index()];
        Self {
            channel,
            format: ch_cfg.format(),
            cmd: device_cfg.channel_command(ch_cfg, pos == 0),
            last: pos + 1 == num_channels,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct SyncTimeout;

/// Transfer all frames of one channel.
pub(crate) fn transfer_channel<L: LpspiRegisters>(
    regs: &mut L,
    buffers: &mut Buffers,
    transfer: &ChannelTransfer,
    ticks: &mut u32,
) -> Result<(), SyncTimeout> {
    let channel = transfer.channel;
    let len = buffers.channels[channel.index()].len as usize;
    if !wait_tx_room(regs, ticks) {
        return Err(SyncTimeout);
    }
    regs.write_tcr(transfer.cmd);
    let mut release_pending = transfer.last && transfer.cmd.cont();
    let mut tx = 0;
    let mut rx = 0;
    while rx < len || release_pending {
        let fsr = regs.read_fsr();
        let tx_room = FIFO_SIZE.saturating_sub(fsr.txcount().value() as usize);
        let mut progress = false;
        if tx < len && tx_room > 0 && tx - rx < FIFO_SIZE {
            regs.write_tdr(buffers.tx_frame(transfer.format, channel, tx));
            tx += 1;
            progress = true;
        } else if tx == len && release_pending && tx_room > 0 {
            regs.write_tcr(release_command(transfer.cmd));
            release_pending = false;
            progress = true;
        }
        if rx < len && fsr.rxcount().value() > 0 {
            let value = regs.read_rdr();
            buffers.store_rx_frame(transfer.format, channel, rx, value);
            rx += 1;
            progress = true;
        }
        if !progress {
            if *ticks == 0 {
                return Err(SyncTimeout);
            }
            *ticks -= 1;
        }
    }
    Ok(())
}

/// Transfer all channels of one job.
pub(crate) fn transfer_job<L: LpspiRegisters>(
    regs: &mut L,
    buffers: &mut Buffers,
    ccr: ClockConfig,
    transfers: impl Iterator<Item = ChannelTransfer>,
    ticks: &mut u32,
) -> Result<(), SyncTimeout> {
    regs.write_ccr(ccr);
    for transfer in transfers {
        transfer_channel(regs, buffers, &transfer, ticks)?;
    }
    Ok(())
}

impl<'a, P: SpiPeripherals> Spi<'a, P> {
    pub(super) fn sync_transmit_inner(&mut self, seq: SequenceId) -> Result<(), SpiError> {
        let cfg = self.config()?;
        if !cfg.level.supports_sync() {
            return Err(SpiError::ServiceUnavailable);
        }
        let seq_cfg = Self::check_seq(cfg, seq)?;
        if cfg.level == super::DeliveryLevel::SyncAndAsync
            && seq_cfg
                .jobs
                .iter()
                .any(|&job| !cfg.hw_units[cfg.hw_unit_of(job).index()].synchronous)
        {
            return Err(SpiError::ParamSeq(seq));
        }
        if self.st.sequences[seq.index()].result == SequenceResult::Pending {
            return Err(SpiError::SeqPending);
        }
        let mask = if cfg.concurrent_sync_transmit {
            self.st.sequences[seq.index()].hw_units
        } else {
            u32::MAX
        };
        {
            let _guard = ExclusiveArea::SyncTransmitEnter.enter();
            if self.st.sync_busy_units & mask != 0 {
                return Err(SpiError::SeqInProcess);
            }
            self.st.sync_busy_units |= mask;
            self.st.status = Status::Busy;
        }

        let state = self.st.seq(seq);
        state.result = SequenceResult::Pending;
        state.remaining = seq_cfg.jobs.len() as u16;
        state.cursor = 0;
        state.failed = false;
        for &job in seq_cfg.jobs {
            self.st.job(job).result = JobResult::Queued;
        }
        let failed = match self.st.cache.get(seq) {
            Some(entry) => self.sync_fast(cfg, seq, entry),
            None => self.sync_general(cfg, seq),
        };

        let state = self.st.seq(seq);
        state.result = if failed.is_some() {
            SequenceResult::Failed
        } else {
            SequenceResult::Ok
        };
        if let Some(notify) = seq_cfg.end_notification {
            notify();
        }
        {
            let _guard = ExclusiveArea::SyncTransmitExit.enter();
            self.st.sync_busy_units &= !mask;
        }
        self.st.update_status();
        match failed {
            Some(job) => Err(SpiError::Timeout(job)),
            None => Ok(()),
        }
    }

    /// Run all jobs of a sequence. Returns the job which timed out, if any.
    fn sync_general(&mut self, cfg: &'a Config<'a>, seq: SequenceId) -> Option<JobId> {
        let mut failed = None;
        for (pos, &job) in cfg.sequences[seq.index()].jobs.iter().enumerate() {
            self.st.seq(seq).cursor = pos as u16;
            let job_cfg = cfg.job(job);
            if failed.is_some() {
                // A timed out job poisons the rest of the sequence.
                self.st.job(job).result = JobResult::Failed;
            } else {
                self.st.job(job).result = JobResult::Pending;
                let device_cfg = &cfg.devices[job_cfg.device.index()];
                let num_channels = job_cfg.channels.len();
                let transfers = job_cfg.channels.iter().enumerate().map(|(pos, &channel)| {
                    ChannelTransfer::resolve(cfg, device_cfg, channel, pos, num_channels)
                });
                let instance = cfg.hw_units[job_cfg.hw_unit.index()].instance;
                let result = Self::sync_run_job(
                    &mut self.hw,
                    &mut self.st.buffers,
                    cfg,
                    instance,
                    device_cfg.clock_config(),
                    job_cfg.start_notification,
                    transfers,
                );
                if self.sync_job_result(cfg, job, job_cfg.hw_unit, instance, result) {
                    failed = Some(job);
                }
            }
            self.sync_job_done(seq, job_cfg.end_notification);
        }
        failed
    }

    /// Run the single job of a cached sequence. Returns the job if it timed out.
    ///
    /// All attributes come from the cache entry, the configuration tables are only used for the
    /// timeout and the diagnostic hooks.
    fn sync_fast(
        &mut self,
        cfg: &'a Config<'a>,
        seq: SequenceId,
        entry: CachedSequence,
    ) -> Option<JobId> {
        let job = entry.job;
        self.st.job(job).result = JobResult::Pending;
        let result = Self::sync_run_job(
            &mut self.hw,
            &mut self.st.buffers,
            cfg,
            entry.instance,
            entry.ccr,
            entry.start_notification,
            self.st.cache.channels(&entry).iter().copied(),
        );
        let failed = self.sync_job_result(cfg, job, entry.hw_unit, entry.instance, result);
        self.sync_job_done(seq, entry.end_notification);
        failed.then_some(job)
    }

    /// Transfer one job with the CPU.
    fn sync_run_job(
        hw: &mut P,
        buffers: &mut Buffers,
        cfg: &'a Config<'a>,
        instance: LpspiId,
        ccr: ClockConfig,
        start_notification: Option<Notification>,
        transfers: impl Iterator<Item = ChannelTransfer>,
    ) -> Result<(), SyncTimeout> {
        if let Some(notify) = start_notification {
            notify();
        }
        let mut ticks = timeout_ticks(cfg);
        transfer_job(hw.lpspi(instance), buffers, ccr, transfers, &mut ticks)
    }

    /// Store the result of a synchronous job. Returns true if the job failed.
    fn sync_job_result(
        &mut self,
        cfg: &'a Config<'a>,
        job: JobId,
        hw_unit: HwUnitId,
        instance: LpspiId,
        result: Result<(), SyncTimeout>,
    ) -> bool {
        let failed = result.is_err();
        if failed {
            report_production_error(cfg, ProductionError::HardwareTimeout { hw_unit, job });
            // Drop whatever is left of the aborted job.
            self.hw
                .lpspi(instance)
                .write_cr(CR_ENABLED.with_rtf(true).with_rrf(true));
        }
        self.st.job(job).result = if failed {
            JobResult::Failed
        } else {
            JobResult::Ok
        };
        failed
    }

    fn sync_job_done(&mut self, seq: SequenceId, end_notification: Option<Notification>) {
        let state = self.st.seq(seq);
        state.remaining = state.remaining.saturating_sub(1);
        if let Some(notify) = end_notification {
            notify();
        }
    }
}
