//! LPSPI transfer engine.
//!
//! Moves the frames of the active job of a hardware unit between the channel buffers and the
//! LPSPI FIFOs, either with the CPU inside the interrupt handlers or with two eDMA channels.
//!
//! The TX and RX side each keep a cursor into the channel list of the job. The TX cursor runs
//! ahead of the RX cursor by at most the FIFO depth. Command words are queued in the TX FIFO
//! like data words, so a command for the next channel or the chip select release takes effect
//! exactly after the last frame of the previous channel.
use arbitrary_int::{u2, u4};
use s32k14x::lpspi::{Config1, Control, DmaEnable, FifoControl, InterruptEnable, Status as SrFlags};

use super::{
    AsyncMode, ChannelConfig, Config, DMA_MAX_ITER_COUNT, DmaRegisters, ExternalDeviceConfig,
    FIFO_SIZE, HwUnitId, HwUnitMode, JobConfig, JobId, JobResult, LpspiRegisters,
    ProductionError, Spi, SpiPeripherals, TransferDescriptor, TransferMode,
    report_production_error,
    state::{Buffers, ChannelCursor, LpspiDevice},
    sync::timeout_ticks,
};

/// The transmit data flag is set while the TX FIFO holds at most this many words.
const TX_WATERMARK: u8 = 1;
/// Frames written by a master before the transmit data interrupt takes over.
const MASTER_PRIME_FRAMES: usize = 1;

pub(super) const CR_ENABLED: Control = Control::DEFAULT.with_men(true).with_dbgen(true);

/// Command word which ends a continuous transfer.
#[inline]
pub(super) fn release_command(cmd: s32k14x::lpspi::TransmitCommand) -> s32k14x::lpspi::TransmitCommand {
    cmd.with_cont(false).with_contc(false)
}

/// Move the TX cursor to the next channel of the job, or finish the TX side.
fn advance_tx(
    cfg: &Config<'_>,
    job_cfg: &JobConfig<'_>,
    device_cfg: &ExternalDeviceConfig,
    dev: &mut LpspiDevice,
    buffers: &Buffers,
) {
    let next = dev.tx.pos + 1;
    match job_cfg.channels.get(next as usize) {
        Some(&channel) => {
            let cmd = device_cfg.channel_command(&cfg.channels[channel.index()], false);
            dev.tx = ChannelCursor::start(next, channel, buffers.channels[channel.index()].len);
            dev.cmd = cmd;
            dev.pending_cmd = Some(cmd);
        }
        None => {
            dev.tx.done = true;
            if dev.continuous {
                dev.pending_cmd = Some(release_command(dev.cmd));
            }
        }
    }
}

/// Move the RX cursor to the next channel of the job, or finish the RX side.
fn advance_rx(job_cfg: &JobConfig<'_>, dev: &mut LpspiDevice, buffers: &Buffers) {
    let next = dev.rx.pos + 1;
    match job_cfg.channels.get(next as usize) {
        Some(&channel) => {
            dev.rx = ChannelCursor::start(next, channel, buffers.channels[channel.index()].len);
        }
        None => dev.rx.done = true,
    }
}

#[inline]
fn tx_finished(dev: &LpspiDevice) -> bool {
    dev.tx.done && dev.pending_cmd.is_none()
}

/// Program the TX DMA channel for the next chunk of the current TX channel.
fn dma_load_tx<L: LpspiRegisters, D: DmaRegisters>(
    ch_cfg: &ChannelConfig,
    dev: &mut LpspiDevice,
    buffers: &Buffers,
    regs: &L,
    dma: &mut D,
    dma_channel: u8,
    interrupt: bool,
) {
    let width = ch_cfg.width;
    let count = dev.tx.remaining.min(DMA_MAX_ITER_COUNT);
    let (src, src_offset) = match buffers.tx_address(dev.tx.channel) {
        Some(addr) => (
            addr + dev.tx.index as usize * width.bytes(),
            width.bytes() as i16,
        ),
        None => {
            dev.default_word = ch_cfg.default_value & width.mask();
            (core::ptr::addr_of!(dev.default_word) as usize, 0)
        }
    };
    dma.write_tcd(
        dma_channel,
        &TransferDescriptor {
            src,
            src_offset,
            dst: regs.tdr_address(),
            dst_offset: 0,
            width,
            count,
            interrupt,
        },
    );
    dev.tx.index += count;
    dev.tx.remaining -= count;
    dma.enable_request(dma_channel);
}

/// Program the RX DMA channel for the next chunk of the current RX channel.
fn dma_load_rx<L: LpspiRegisters, D: DmaRegisters>(
    ch_cfg: &ChannelConfig,
    dev: &mut LpspiDevice,
    buffers: &Buffers,
    regs: &L,
    dma: &mut D,
    dma_channel: u8,
    interrupt: bool,
) {
    let width = ch_cfg.width;
    let count = dev.rx.remaining.min(DMA_MAX_ITER_COUNT);
    let (dst, dst_offset) = match buffers.rx_address(dev.rx.channel) {
        Some(addr) => (
            addr + dev.rx.index as usize * width.bytes(),
            width.bytes() as i16,
        ),
        None => (core::ptr::addr_of_mut!(dev.discard_word) as usize, 0),
    };
    dma.write_tcd(
        dma_channel,
        &TransferDescriptor {
            src: regs.rdr_address(),
            src_offset: 0,
            dst,
            dst_offset,
            width,
            count,
            interrupt,
        },
    );
    dev.rx.index += count;
    dev.rx.remaining -= count;
    dma.enable_request(dma_channel);
}

/// Wait until the TX FIFO can take another word. Gives up when `ticks` run out.
pub(super) fn wait_tx_room<L: LpspiRegisters>(regs: &mut L, ticks: &mut u32) -> bool {
    loop {
        if (regs.read_fsr().txcount().value() as usize) < FIFO_SIZE {
            return true;
        }
        if *ticks == 0 {
            return false;
        }
        *ticks -= 1;
    }
}

impl<'a, P: SpiPeripherals> Spi<'a, P> {
    pub(super) fn hw_init(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        let cs_mask = cfg.active_high_cs_lines(hw_unit);
        let (regs, dma) = self.hw.lpspi_and_dma(unit_cfg.instance);
        regs.write_cr(Control::DEFAULT.with_rst(true));
        regs.write_cr(Control::DEFAULT.with_rtf(true).with_rrf(true));
        regs.write_ier(InterruptEnable::DEFAULT);
        regs.write_sr(SrFlags::ALL_W1C);
        regs.write_cfgr1(
            Config1::DEFAULT
                .with_master(unit_cfg.mode == HwUnitMode::Master)
                .with_pcspol(u4::new(cs_mask)),
        );
        regs.write_fcr(
            FifoControl::DEFAULT
                .with_txwater(u2::new(TX_WATERMARK))
                .with_rxwater(u2::new(0)),
        );
        match unit_cfg.transfer {
            TransferMode::Fifo => regs.write_der(DmaEnable::DEFAULT),
            TransferMode::Dma {
                tx_channel,
                rx_channel,
            } => {
                dma.disable_request(tx_channel);
                dma.disable_request(rx_channel);
                regs.write_der(DmaEnable::DEFAULT.with_tdde(true).with_rdde(true));
            }
        }
        regs.write_cr(CR_ENABLED);
        log::debug!(
            "SPI unit {} on {:?}: {:?}, {:?}",
            hw_unit,
            unit_cfg.instance,
            unit_cfg.mode,
            unit_cfg.transfer
        );
    }

    pub(super) fn hw_deinit(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        let (regs, dma) = self.hw.lpspi_and_dma(unit_cfg.instance);
        if let TransferMode::Dma {
            tx_channel,
            rx_channel,
        } = unit_cfg.transfer
        {
            dma.disable_request(tx_channel);
            dma.disable_request(rx_channel);
        }
        regs.write_ier(InterruptEnable::DEFAULT);
        regs.write_der(DmaEnable::DEFAULT);
        regs.write_cr(Control::DEFAULT.with_rst(true));
        regs.write_cr(Control::DEFAULT);
    }

    /// Start the transfer of a job on its hardware unit.
    pub(super) fn job_transfer(&mut self, cfg: &'a Config<'a>, job: JobId) {
        let job_cfg = cfg.job(job);
        let hw_unit = job_cfg.hw_unit;
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        let device_cfg = &cfg.devices[job_cfg.device.index()];
        if let Some(notify) = job_cfg.start_notification {
            notify();
        }
        let first = job_cfg.channels[0];
        let len = self.st.buffers.channels[first.index()].len;
        let cmd = device_cfg.channel_command(&cfg.channels[first.index()], true);
        let unit = &mut self.st.units[hw_unit.index()];
        let interrupt = unit.async_mode == AsyncMode::Interrupt;
        let dev = &mut unit.device;
        dev.job = Some(job);
        dev.cmd = cmd;
        dev.pending_cmd = Some(cmd);
        dev.continuous = device_cfg.continuous_cs;
        dev.tx = ChannelCursor::start(0, first, len);
        dev.rx = ChannelCursor::start(0, first, len);
        dev.in_flight = 0;
        dev.finished = false;
        log::trace!("SPI unit {}: start job {}", hw_unit, job);
        self.hw
            .lpspi(unit_cfg.instance)
            .write_ccr(device_cfg.clock_config());
        match unit_cfg.transfer {
            TransferMode::Fifo => {
                let frames = match unit_cfg.mode {
                    HwUnitMode::Master => MASTER_PRIME_FRAMES,
                    HwUnitMode::Slave => FIFO_SIZE,
                };
                self.fifo_fill(cfg, hw_unit, frames);
                if interrupt {
                    self.hw.lpspi(unit_cfg.instance).write_ier(
                        InterruptEnable::DEFAULT
                            .with_tdie(true)
                            .with_rdie(true),
                    );
                }
            }
            TransferMode::Dma {
                tx_channel,
                rx_channel,
            } => {
                let (regs, dma) = self.hw.lpspi_and_dma(unit_cfg.instance);
                let dev = &mut self.st.units[hw_unit.index()].device;
                // The TX FIFO is empty at the start of a job.
                if let Some(cmd) = dev.pending_cmd.take() {
                    regs.write_tcr(cmd);
                }
                let ch_cfg = &cfg.channels[first.index()];
                dma_load_rx(
                    ch_cfg,
                    dev,
                    &self.st.buffers,
                    regs,
                    dma,
                    rx_channel,
                    interrupt,
                );
                dma_load_tx(
                    ch_cfg,
                    dev,
                    &self.st.buffers,
                    regs,
                    dma,
                    tx_channel,
                    interrupt,
                );
            }
        }
    }

    /// Write pending command words and up to `max_frames` data frames to the TX FIFO.
    fn fifo_fill(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId, max_frames: usize) {
        let unit = &mut self.st.units[hw_unit.index()];
        let dev = &mut unit.device;
        let Some(job) = dev.job else {
            return;
        };
        let job_cfg = cfg.job(job);
        let device_cfg = &cfg.devices[job_cfg.device.index()];
        let regs = self.hw.lpspi(dev.instance);
        let mut room = FIFO_SIZE.saturating_sub(regs.read_fsr().txcount().value() as usize);
        let mut frames = 0;
        while room > 0 {
            if let Some(cmd) = dev.pending_cmd.take() {
                regs.write_tcr(cmd);
                room -= 1;
                continue;
            }
            if dev.tx.done || frames == max_frames || dev.in_flight as usize >= FIFO_SIZE {
                break;
            }
            let channel = dev.tx.channel;
            let value = self.st.buffers.tx_frame(
                cfg.channels[channel.index()].format(),
                channel,
                dev.tx.index as usize,
            );
            regs.write_tdr(value);
            dev.tx.index += 1;
            dev.tx.remaining -= 1;
            dev.in_flight += 1;
            frames += 1;
            room -= 1;
            if dev.tx.remaining == 0 {
                advance_tx(cfg, job_cfg, device_cfg, dev, &self.st.buffers);
            }
        }
    }

    /// Transmit and receive data handler of the FIFO transfer mode.
    pub(super) fn isr_fifo(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        if unit_cfg.transfer != TransferMode::Fifo {
            return;
        }
        let unit = &mut self.st.units[hw_unit.index()];
        let interrupt = unit.async_mode == AsyncMode::Interrupt;
        let dev = &mut unit.device;
        let Some(job) = dev.job else {
            return;
        };
        if dev.finished {
            return;
        }
        let job_cfg = cfg.job(job);
        let regs = self.hw.lpspi(unit_cfg.instance);

        // Drain the RX FIFO first, so the in-flight bound allows new TX frames.
        let mut rx_count = regs.read_fsr().rxcount().value();
        while rx_count > 0 {
            let value = regs.read_rdr();
            rx_count -= 1;
            dev.in_flight = dev.in_flight.saturating_sub(1);
            if dev.rx.done {
                // Slave overflow, the frame does not belong to any channel.
                continue;
            }
            let channel = dev.rx.channel;
            self.st.buffers.store_rx_frame(
                cfg.channels[channel.index()].format(),
                channel,
                dev.rx.index as usize,
                value,
            );
            dev.rx.index += 1;
            dev.rx.remaining -= 1;
            if dev.rx.remaining == 0 {
                advance_rx(job_cfg, dev, &self.st.buffers);
            }
        }

        self.fifo_fill(cfg, hw_unit, usize::MAX);

        let dev = &self.st.units[hw_unit.index()].device;
        let tx_done = tx_finished(dev);
        let rx_done = dev.rx.done;
        if tx_done && rx_done {
            self.job_complete(cfg, hw_unit, false);
        } else if tx_done && interrupt {
            self.hw
                .lpspi(unit_cfg.instance)
                .write_ier(InterruptEnable::DEFAULT.with_rdie(true));
        }
    }

    /// Completion handler of the transmit DMA channel.
    pub(super) fn isr_dma_tx(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        let TransferMode::Dma { tx_channel, .. } = unit_cfg.transfer else {
            return;
        };
        let unit = &mut self.st.units[hw_unit.index()];
        let interrupt = unit.async_mode == AsyncMode::Interrupt;
        let dev = &mut unit.device;
        let (regs, dma) = self.hw.lpspi_and_dma(unit_cfg.instance);
        dma.clear_interrupt(tx_channel);
        dma.clear_done(tx_channel);
        let Some(job) = dev.job else {
            return;
        };
        if dev.finished || dev.tx.done {
            return;
        }
        if dev.tx.remaining > 0 {
            let count = dev.tx.remaining.min(DMA_MAX_ITER_COUNT);
            dma.write_major_count(tx_channel, count);
            dev.tx.index += count;
            dev.tx.remaining -= count;
            dma.enable_request(tx_channel);
            return;
        }
        let job_cfg = cfg.job(job);
        let device_cfg = &cfg.devices[job_cfg.device.index()];
        advance_tx(cfg, job_cfg, device_cfg, dev, &self.st.buffers);
        if let Some(cmd) = dev.pending_cmd.take() {
            let mut ticks = timeout_ticks(cfg);
            if !wait_tx_room(regs, &mut ticks) {
                // The command would be lost, so the chip select or the frame size of the next
                // channel would be wrong.
                report_production_error(cfg, ProductionError::HardwareTimeout { hw_unit, job });
                self.job_complete(cfg, hw_unit, true);
                return;
            }
            regs.write_tcr(cmd);
        }
        if !dev.tx.done {
            let ch_cfg = &cfg.channels[dev.tx.channel.index()];
            dma_load_tx(
                ch_cfg,
                dev,
                &self.st.buffers,
                regs,
                dma,
                tx_channel,
                interrupt,
            );
        } else if dev.rx.done {
            self.job_complete(cfg, hw_unit, false);
        }
    }

    /// Completion handler of the receive DMA channel.
    pub(super) fn isr_dma_rx(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        let TransferMode::Dma { rx_channel, .. } = unit_cfg.transfer else {
            return;
        };
        let unit = &mut self.st.units[hw_unit.index()];
        let interrupt = unit.async_mode == AsyncMode::Interrupt;
        let dev = &mut unit.device;
        let (regs, dma) = self.hw.lpspi_and_dma(unit_cfg.instance);
        dma.clear_interrupt(rx_channel);
        dma.clear_done(rx_channel);
        let Some(job) = dev.job else {
            return;
        };
        if dev.finished || dev.rx.done {
            return;
        }
        if dev.rx.remaining > 0 {
            let count = dev.rx.remaining.min(DMA_MAX_ITER_COUNT);
            dma.write_major_count(rx_channel, count);
            dev.rx.index += count;
            dev.rx.remaining -= count;
            dma.enable_request(rx_channel);
            return;
        }
        advance_rx(cfg.job(job), dev, &self.st.buffers);
        if !dev.rx.done {
            let ch_cfg = &cfg.channels[dev.rx.channel.index()];
            dma_load_rx(
                ch_cfg,
                dev,
                &self.st.buffers,
                regs,
                dma,
                rx_channel,
                interrupt,
            );
        } else if tx_finished(dev) {
            self.job_complete(cfg, hw_unit, false);
        }
    }

    /// Poll the status flags of a hardware unit and run the matching handlers.
    pub(super) fn irq_poll(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        match unit_cfg.transfer {
            TransferMode::Fifo => {
                let sr = self.hw.lpspi(unit_cfg.instance).read_sr();
                if sr.tdf() || sr.rdf() {
                    self.isr_fifo(cfg, hw_unit);
                }
            }
            TransferMode::Dma {
                tx_channel,
                rx_channel,
            } => {
                let (_, dma) = self.hw.lpspi_and_dma(unit_cfg.instance);
                let tx_done = dma.is_done(tx_channel);
                let rx_done = dma.is_done(rx_channel);
                if tx_done {
                    self.isr_dma_tx(cfg, hw_unit);
                }
                if rx_done {
                    self.isr_dma_rx(cfg, hw_unit);
                }
            }
        }
    }

    /// Stop the hardware of a unit after its job has finished.
    fn hw_stop(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        let (regs, dma) = self.hw.lpspi_and_dma(unit_cfg.instance);
        regs.write_ier(InterruptEnable::DEFAULT);
        if let TransferMode::Dma {
            tx_channel,
            rx_channel,
        } = unit_cfg.transfer
        {
            dma.disable_request(tx_channel);
            dma.disable_request(rx_channel);
        }
    }

    /// Report the end of the job on a hardware unit. Runs exactly once per started job.
    pub(super) fn job_complete(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId, failed: bool) {
        let dev = &mut self.st.units[hw_unit.index()].device;
        let Some(job) = dev.job else {
            return;
        };
        if dev.finished {
            return;
        }
        dev.finished = true;
        self.hw_stop(cfg, hw_unit);
        let state = &self.st.jobs[job.index()];
        if state.result != JobResult::Ok && state.sequence.is_some() {
            self.job_transfer_finished(cfg, job, failed);
        } else {
            // The sequence was cancelled while the job was transferred.
            self.st.jobs[job.index()].result = if failed {
                JobResult::Failed
            } else {
                JobResult::Ok
            };
            self.schedule_next_job(cfg, hw_unit);
        }
        self.st.update_status();
    }

    /// Abort the transfer of a slave unit and force the end of its job.
    pub(super) fn slave_cancel(&mut self, cfg: &'a Config<'a>, hw_unit: HwUnitId) {
        let unit_cfg = &cfg.hw_units[hw_unit.index()];
        self.hw_stop(cfg, hw_unit);
        let regs = self.hw.lpspi(unit_cfg.instance);
        let mut ticks = timeout_ticks(cfg);
        while regs.read_sr().mbf() {
            if ticks == 0 {
                report_production_error(cfg, ProductionError::SlaveCancelTimeout { hw_unit });
                break;
            }
            ticks -= 1;
        }
        regs.write_cr(CR_ENABLED.with_rtf(true).with_rrf(true));
        log::debug!("SPI unit {}: slave transfer cancelled", hw_unit);
        self.job_complete(cfg, hw_unit, true);
    }
}
