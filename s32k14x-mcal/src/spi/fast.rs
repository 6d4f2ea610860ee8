//! Attribute cache of the synchronous fast path.
//!
//! Sequences with a single job are resolved once at initialization: the LPSPI instance, the
//! clock configuration, the notifications and the frame format and command word of every channel
//! are precomputed, so a synchronous transmission only has to look up its cache entry. Sequences
//! which do not fit into the pools use the general path.
use s32k14x::lpspi::ClockConfig;

use super::{
    Config, HwUnitId, JobId, LpspiId, MAX_SEQUENCES, Notification, OPTIMIZED_CHANNEL_BUFFER_SIZE,
    OPTIMIZED_SEQ_BUFFER_SIZE, SequenceId, sync::ChannelTransfer,
};

#[derive(Debug, Copy, Clone)]
pub(crate) struct CachedSequence {
    pub job: JobId,
    pub hw_unit: HwUnitId,
    pub instance: LpspiId,
    pub ccr: ClockConfig,
    /// Position of the first channel in the channel pool.
    pub first_channel: u8,
    pub num_channels: u8,
    pub start_notification: Option<Notification>,
    pub end_notification: Option<Notification>,
}

pub(crate) struct SequenceCache {
    entries: heapless::Vec<CachedSequence, OPTIMIZED_SEQ_BUFFER_SIZE>,
    channels: heapless::Vec<ChannelTransfer, OPTIMIZED_CHANNEL_BUFFER_SIZE>,
    index: [Option<u8>; MAX_SEQUENCES],
}

impl SequenceCache {
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
            channels: heapless::Vec::new(),
            index: [None; MAX_SEQUENCES],
        }
    }

    pub fn build(cfg: &Config<'_>) -> Self {
        let mut cache = Self::new();
        if !cfg.level.supports_sync() {
            return cache;
        }
        for (idx, seq_cfg) in cfg.sequences.iter().enumerate() {
            let [job] = seq_cfg.jobs else {
                continue;
            };
            let job_cfg = cfg.job(*job);
            let unit_cfg = &cfg.hw_units[job_cfg.hw_unit.index()];
            if cfg.level == super::DeliveryLevel::SyncAndAsync && !unit_cfg.synchronous {
                continue;
            }
            if cache.entries.is_full()
                || cache.channels.len() + job_cfg.channels.len() > cache.channels.capacity()
            {
                log::debug!("SPI sequence {} not cached, pools are full", idx);
                continue;
            }
            let device_cfg = &cfg.devices[job_cfg.device.index()];
            let first_channel = cache.channels.len() as u8;
            let num_channels = job_cfg.channels.len();
            for (pos, &channel) in job_cfg.channels.iter().enumerate() {
                let _ = cache.channels.push(ChannelTransfer::resolve(
                    cfg,
                    device_cfg,
                    channel,
                    pos,
                    num_channels,
                ));
            }
            cache.index[idx] = Some(cache.entries.len() as u8);
            let _ = cache.entries.push(CachedSequence {
                job: *job,
                hw_unit: job_cfg.hw_unit,
                instance: unit_cfg.instance,
                ccr: device_cfg.clock_config(),
                first_channel,
                num_channels: num_channels as u8,
                start_notification: job_cfg.start_notification,
                end_notification: job_cfg.end_notification,
            });
        }
        cache
    }

    #[inline]
    pub fn get(&self, seq: SequenceId) -> Option<CachedSequence> {
        let idx = (*self.index.get(seq.index())?)?;
        self.entries.get(idx as usize).copied()
    }

    #[inline]
    pub fn channels(&self, entry: &CachedSequence) -> &[ChannelTransfer] {
        let start = entry.first_channel as usize;
        &self.channels[start..start + entry.num_channels as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use super::super::sim::Fixture;
    use super::super::*;
    use super::*;

    #[test]
    fn only_single_job_sequences_are_cached() {
        let fx = Fixture::sync_mixed();
        let cache = SequenceCache::build(fx.cfg);
        // Sequence 0 has one job with two channels, sequence 1 has two jobs.
        let entry = cache.get(SequenceId(0)).unwrap();
        assert_eq!(entry.job, JobId(0));
        assert_eq!(entry.hw_unit, HwUnitId(0));
        assert_eq!(entry.instance, LpspiId::Lpspi0);
        let formats: Vec<_> = cache
            .channels(&entry)
            .iter()
            .map(|transfer| transfer.format)
            .collect();
        assert_eq!(
            formats,
            [
                FrameFormat {
                    width: DataWidth::Bits8,
                    default_value: 0x11
                },
                FrameFormat {
                    width: DataWidth::Bits16,
                    default_value: 0x2222
                },
            ]
        );
        assert_eq!(cache.channels(&entry).len(), 2);
        assert!(cache.channels(&entry)[1].last);
        assert!(!cache.channels(&entry)[0].last);
        assert!(cache.get(SequenceId(1)).is_none());
    }

    #[test]
    fn pool_overflow_falls_back() {
        let fx = Fixture::many_sync_sequences(OPTIMIZED_SEQ_BUFFER_SIZE as u16 + 2);
        let cache = SequenceCache::build(fx.cfg);
        assert_eq!(cache.len(), OPTIMIZED_SEQ_BUFFER_SIZE);
        assert!(
            cache
                .get(SequenceId(OPTIMIZED_SEQ_BUFFER_SIZE as u16))
                .is_none()
        );
    }
}
