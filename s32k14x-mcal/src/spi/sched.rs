//! Job scheduling of the SPI handler.
//!
//! Every hardware unit owns one FIFO queue per priority level. The queues are intrusive lists
//! through the job state, so scheduling never allocates. A job is started immediately if its unit
//! is idle and queued otherwise.
use super::{
    Config, HwUnitId, HwUnitMode, JobId, JobResult, NUM_PRIORITIES, SequenceId, SequenceResult,
    Spi, SpiError, SpiPeripherals, Status,
    state::{HwUnitState, JobState},
};
use crate::exclusive::ExclusiveArea;

/// Highest priority level with a queued job.
fn highest_queued(unit: &HwUnitState) -> Option<usize> {
    if unit.max_priority < 0 {
        return None;
    }
    (0..=unit.max_priority as usize)
        .rev()
        .find(|&prio| unit.heads[prio].is_some())
}

fn refresh_max_priority(unit: &mut HwUnitState) {
    unit.max_priority = (0..NUM_PRIORITIES)
        .rev()
        .find(|&prio| unit.heads[prio].is_some())
        .map_or(-1, |prio| prio as i8);
}

/// Remove a job from the queue of its priority level. Does nothing if the job is not queued.
fn unqueue(unit: &mut HwUnitState, jobs: &mut [JobState], job: JobId, prio: usize) -> bool {
    let mut prev: Option<JobId> = None;
    let mut cursor = unit.heads[prio];
    while let Some(current) = cursor {
        let next = jobs[current.index()].next;
        if current == job {
            match prev {
                Some(prev) => jobs[prev.index()].next = next,
                None => unit.heads[prio] = next,
            }
            if unit.tails[prio] == Some(job) {
                unit.tails[prio] = prev;
            }
            jobs[job.index()].next = None;
            refresh_max_priority(unit);
            return true;
        }
        prev = cursor;
        cursor = next;
    }
    false
}

impl<'a, P: SpiPeripherals> Spi<'a, P> {
    pub(super) fn async_transmit_inner(&mut self, seq: SequenceId) -> Result<(), SpiError> {
        let cfg = self.config()?;
        if !cfg.level.supports_async() {
            return Err(SpiError::ServiceUnavailable);
        }
        let seq_cfg = Self::check_seq(cfg, seq)?;
        if cfg.level == super::DeliveryLevel::SyncAndAsync
            && seq_cfg
                .jobs
                .iter()
                .any(|&job| cfg.hw_units[cfg.hw_unit_of(job).index()].synchronous)
        {
            return Err(SpiError::ParamSeq(seq));
        }
        if self.st.sequences[seq.index()].result == SequenceResult::Pending {
            return Err(SpiError::SeqPending);
        }
        if !self.lock_jobs(cfg, seq) {
            return Err(SpiError::SeqPending);
        }
        let state = self.st.seq(seq);
        state.result = SequenceResult::Pending;
        state.remaining = seq_cfg.jobs.len() as u16;
        state.cursor = 0;
        state.failed = false;
        for &job in seq_cfg.jobs {
            self.st.job(job).result = JobResult::Queued;
        }
        self.st.status = Status::Busy;
        log::trace!("SPI sequence {} pending", seq);
        self.schedule_job(cfg, seq_cfg.jobs[0]);
        Ok(())
    }

    /// Lock all jobs of a sequence, or none of them.
    ///
    /// Fails if any job is owned by another pending sequence, or if its previous transfer
    /// still runs on the hardware unit.
    pub(super) fn lock_jobs(&mut self, cfg: &'a Config<'a>, seq: SequenceId) -> bool {
        let jobs = cfg.sequences[seq.index()].jobs;
        let _guard = ExclusiveArea::LockJobs.enter();
        let busy = |st: &super::state::DriverState, job: JobId| {
            st.jobs[job.index()].sequence.is_some()
                || st.units[cfg.hw_unit_of(job).index()].current == Some(job)
        };
        if let [job] = jobs {
            if busy(&self.st, *job) {
                return false;
            }
            self.st.job(*job).sequence = Some(seq);
            return true;
        }
        for (pos, &job) in jobs.iter().enumerate() {
            if busy(&self.st, job) {
                for &locked in &jobs[..pos] {
                    self.st.job(locked).sequence = None;
                }
                log::trace!("SPI sequence {}: job {} is locked", seq, job);
                return false;
            }
            self.st.job(job).sequence = Some(seq);
        }
        true
    }

    /// Start a job immediately if its hardware unit is idle, otherwise queue it.
    pub(super) fn schedule_job(&mut self, cfg: &'a Config<'a>, job: JobId) {
        let hw_unit = cfg.hw_unit_of(job);
        let prio = cfg.job(job).priority as usize;
        let start = {
            let _guard = ExclusiveArea::ScheduleJob.enter();
            let unit = &mut self.st.units[hw_unit.index()];
            if unit.status == Status::Idle {
                unit.status = Status::Busy;
                unit.current = Some(job);
                true
            } else {
                self.st.jobs[job.index()].next = None;
                match unit.tails[prio] {
                    Some(tail) => self.st.jobs[tail.index()].next = Some(job),
                    None => unit.heads[prio] = Some(job),
                }
                unit.tails[prio] = Some(job);
                if prio as i8 > unit.max_priority {
                    unit.max_priority = prio as i8;
                }
                false
            }
        };
        if start {
            self.start_job(cfg, job);
        } else {
            log::trace!("SPI unit {}: job {} queued, priority {}", hw_unit, job, prio);
        }
    }

    fn start_job(&mut self, cfg: &'a Config<'a>, job: JobId) {
        self.st.job(job).result = JobResult::Pending;
        self.job_transfer(cfg, job);
    }

    /// Start the queued job with the highest priority, or mark the unit idle.
    pub(super) fn schedule_next_job(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let next = {
            let _guard = ExclusiveArea::ScheduleNextJob.enter();
            let unit = &mut self.st.units[hw_unit.index()];
            match highest_queued(unit).and_then(|prio| unit.heads[prio].map(|job| (prio, job))) {
                Some((prio, job)) => {
                    let next = self.st.jobs[job.index()].next.take();
                    unit.heads[prio] = next;
                    if next.is_none() {
                        unit.tails[prio] = None;
                        refresh_max_priority(unit);
                    }
                    unit.current = Some(job);
                    Some(job)
                }
                None => {
                    unit.max_priority = -1;
                    unit.status = Status::Idle;
                    unit.current = None;
                    None
                }
            }
        };
        match next {
            Some(job) => self.start_job(cfg, job),
            None => log::trace!("SPI unit {} idle", hw_unit),
        }
    }

    /// Bookkeeping after a job of a pending sequence finished.
    pub(super) fn job_transfer_finished(&mut self, cfg: &'a Config<'a>, job: JobId, failed: bool) {
        let hw_unit = cfg.hw_unit_of(job);
        let (seq, next) = {
            let _guard = ExclusiveArea::JobTransferFinished.enter();
            let state = self.st.job(job);
            let Some(seq) = state.sequence.take() else {
                return;
            };
            state.result = if failed {
                JobResult::Failed
            } else {
                JobResult::Ok
            };
            let seq_state = self.st.seq(seq);
            seq_state.remaining = seq_state.remaining.saturating_sub(1);
            seq_state.failed |= failed;
            if seq_state.remaining == 0 {
                seq_state.result = if seq_state.failed {
                    SequenceResult::Failed
                } else {
                    SequenceResult::Ok
                };
                (seq, None)
            } else {
                seq_state.cursor += 1;
                let jobs = cfg.sequences[seq.index()].jobs;
                (seq, jobs.get(seq_state.cursor as usize).copied())
            }
        };
        if let Some(notify) = cfg.job(job).end_notification {
            notify();
        }
        let seq_cfg = &cfg.sequences[seq.index()];
        match next {
            None => {
                log::trace!(
                    "SPI sequence {} finished: {:?}",
                    seq,
                    self.st.sequences[seq.index()].result
                );
                if let Some(notify) = seq_cfg.end_notification {
                    notify();
                }
                self.schedule_next_job(cfg, hw_unit);
            }
            Some(next) if cfg.hw_unit_of(next) == hw_unit => {
                if seq_cfg.interruptible {
                    // Let queued jobs with a higher priority go first.
                    self.schedule_job(cfg, next);
                    self.schedule_next_job(cfg, hw_unit);
                } else {
                    self.st.unit(hw_unit).current = Some(next);
                    self.start_job(cfg, next);
                }
            }
            Some(next) => {
                self.schedule_next_job(cfg, hw_unit);
                self.schedule_job(cfg, next);
            }
        }
    }

    /// Cancel a pending sequence.
    pub(super) fn cancel_sequence(&mut self, cfg: &'a Config<'a>, seq: SequenceId) {
        if self.st.sequences[seq.index()].result != SequenceResult::Pending {
            return;
        }
        let seq_cfg = &cfg.sequences[seq.index()];
        let mut slave_units: u32 = 0;
        {
            let _guard = ExclusiveArea::UnlockRemainingJobs.enter();
            let state = self.st.seq(seq);
            state.result = SequenceResult::Cancelled;
            let cursor = state.cursor as usize;
            for &job in &seq_cfg.jobs[cursor..] {
                if self.st.jobs[job.index()].sequence != Some(seq) {
                    continue;
                }
                self.st.job(job).sequence = None;
                let hw_unit = cfg.hw_unit_of(job);
                let unit = &mut self.st.units[hw_unit.index()];
                if unit.current == Some(job) {
                    // A master finishes the transfer, a slave transfer is aborted below.
                    if cfg.hw_units[hw_unit.index()].mode == HwUnitMode::Slave {
                        slave_units |= 1 << hw_unit.index();
                    }
                    continue;
                }
                let prio = cfg.job(job).priority as usize;
                unqueue(unit, &mut self.st.jobs, job, prio);
                self.st.job(job).result = JobResult::Failed;
            }
        }
        for idx in 0..cfg.hw_units.len() {
            if slave_units & (1 << idx) != 0 {
                self.slave_cancel(cfg, HwUnitId(idx as u8));
            }
        }
        log::debug!("SPI sequence {} cancelled", seq);
        if let Some(notify) = seq_cfg.end_notification {
            notify();
        }
        self.st.update_status();
    }
}
