//! # Power mode switching with the System Mode Controller (SMC)
//!
//! The S32K14x supports the run modes RUN, HSRUN and VLPR and the stop modes STOP1, STOP2 and
//! VLPS. Not every mode can be reached from every other mode:
//!
//! - HSRUN can only be entered from RUN, and only RUN can be entered from HSRUN.
//! - VLPR can only be entered from RUN.
//! - STOP1 and STOP2 can only be entered from RUN.
//! - VLPS can be entered from RUN and VLPR.
//!
//! The very low power modes and HSRUN additionally have to be allowed with the write-once
//! protection register, which is done in [Smc::new].
use s32k14x::{
    scb,
    smc::{
        self, PowerModeControl, PowerModeProtection, PowerModeStatus, RunMode, StopControl,
        StopMode, StopOption, pmstat,
    },
};

use crate::{
    VersionInfo,
    det::{self, MCU_MODULE_ID},
    time::{Hertz, Microseconds, cycles_in},
};

/// Register interface of the SMC together with the deep sleep control of the core.
pub trait SmcRegisters {
    fn write_pmprot(&mut self, value: PowerModeProtection);
    fn read_pmctrl(&mut self) -> PowerModeControl;
    fn write_pmctrl(&mut self, value: PowerModeControl);
    fn write_stopctrl(&mut self, value: StopControl);
    fn read_pmstat(&mut self) -> PowerModeStatus;
    /// Select deep sleep as the low power mode entered by [Self::wait_for_interrupt].
    fn set_sleep_deep(&mut self, enable: bool);
    fn wait_for_interrupt(&mut self);
}

pub struct SmcLowLevel {
    smc: smc::MmioRegisters<'static>,
    scb: scb::MmioRegisters<'static>,
}

impl SmcLowLevel {
    /// Steal the SMC and the system control register.
    ///
    /// # Safety
    ///
    /// Circumvents ownership and safety guarantees by the HAL.
    pub unsafe fn steal() -> Self {
        unsafe {
            Self {
                smc: smc::Registers::new_mmio_fixed(),
                scb: scb::Registers::new_mmio_fixed(),
            }
        }
    }
}

impl SmcRegisters for SmcLowLevel {
    delegate::delegate! {
        to self.smc {
            #[inline]
            fn write_pmprot(&mut self, value: PowerModeProtection);
            #[inline]
            fn read_pmctrl(&mut self) -> PowerModeControl;
            #[inline]
            fn write_pmctrl(&mut self, value: PowerModeControl);
            #[inline]
            fn write_stopctrl(&mut self, value: StopControl);
            #[inline]
            fn read_pmstat(&mut self) -> PowerModeStatus;
        }
    }

    #[inline]
    fn set_sleep_deep(&mut self, enable: bool) {
        self.scb.modify_scr(|scr| scr.with_sleepdeep(enable));
    }

    #[inline]
    fn wait_for_interrupt(&mut self) {
        #[cfg(target_arch = "arm")]
        cortex_m::asm::wfi();
        #[cfg(not(target_arch = "arm"))]
        core::hint::spin_loop();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PowerMode {
    Run,
    HighSpeedRun,
    VeryLowPowerRun,
    Stop1,
    Stop2,
    VeryLowPowerStop,
}

impl PowerMode {
    /// Decode the run mode reported by the PMSTAT register. Stop modes are never observed
    /// by running code.
    pub const fn from_status(status: u8) -> Option<Self> {
        match status {
            pmstat::RUN => Some(PowerMode::Run),
            pmstat::HSRUN => Some(PowerMode::HighSpeedRun),
            pmstat::VLPR => Some(PowerMode::VeryLowPowerRun),
            _ => None,
        }
    }

    #[inline]
    pub const fn is_stop_mode(&self) -> bool {
        matches!(
            self,
            PowerMode::Stop1 | PowerMode::Stop2 | PowerMode::VeryLowPowerStop
        )
    }

    #[inline]
    pub const fn is_very_low_power(&self) -> bool {
        matches!(
            self,
            PowerMode::VeryLowPowerRun | PowerMode::VeryLowPowerStop
        )
    }

    /// Whether the hardware supports a direct transition from `self` to `target`.
    pub const fn can_switch_to(&self, target: PowerMode) -> bool {
        match (self, target) {
            (PowerMode::Run, _) => true,
            (PowerMode::HighSpeedRun, PowerMode::Run) => true,
            (PowerMode::VeryLowPowerRun, PowerMode::Run | PowerMode::VeryLowPowerStop) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SmcConfig {
    pub allow_very_low_power: bool,
    pub allow_high_speed_run: bool,
    /// Core clock, used to convert the transition timeout into a number of status polls.
    pub core_clock: Hertz,
    /// Upper bound for the switch between two run modes.
    pub transition_timeout: Microseconds,
}

/// AUTOSAR service IDs of the power mode handling of the MCU driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum ServiceId {
    SetMode = 0x08,
    GetVersionInfo = 0x09,
}

/// AUTOSAR development error codes of the power mode handling of the MCU driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum DevErrorCode {
    ParamMode = 0x0C,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmcError {
    #[error("transition from {from:?} to {to:?} is not supported")]
    TransitionNotAllowed { from: PowerMode, to: PowerMode },
    #[error("power mode {0:?} is not allowed by the protection settings")]
    NotAllowedByProtection(PowerMode),
    #[error("unknown power mode status {0:#04x}")]
    UnknownStatus(u8),
    #[error("timeout while switching to {0:?}")]
    Timeout(PowerMode),
}

impl SmcError {
    pub const fn dev_error_code(&self) -> Option<DevErrorCode> {
        match self {
            SmcError::TransitionNotAllowed { .. } | SmcError::NotAllowedByProtection(_) => {
                Some(DevErrorCode::ParamMode)
            }
            SmcError::UnknownStatus(_) | SmcError::Timeout(_) => None,
        }
    }
}

fn report(service: ServiceId, error: SmcError) -> SmcError {
    if let Some(code) = error.dev_error_code() {
        det::report_error(MCU_MODULE_ID, 0, service.into(), code.into());
    }
    error
}

/// Power mode driver.
pub struct Smc<R: SmcRegisters> {
    regs: R,
    cfg: SmcConfig,
}

impl<R: SmcRegisters> Smc<R> {
    /// Create the driver and write the power mode protection register. The protection register
    /// can only be written once after reset, so only one driver should be created.
    pub fn new(mut regs: R, cfg: SmcConfig) -> Self {
        regs.write_pmprot(
            PowerModeProtection::DEFAULT
                .with_avlp(cfg.allow_very_low_power)
                .with_ahsrun(cfg.allow_high_speed_run),
        );
        Self { regs, cfg }
    }

    pub const fn version_info() -> VersionInfo {
        VersionInfo::for_module(MCU_MODULE_ID)
    }

    #[inline]
    pub fn config(&self) -> &SmcConfig {
        &self.cfg
    }

    /// Access to the underlying registers.
    #[inline]
    pub fn regs(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn current_mode(&mut self) -> Result<PowerMode, SmcError> {
        let status = self.regs.read_pmstat().pmstat();
        PowerMode::from_status(status).ok_or(SmcError::UnknownStatus(status))
    }

    fn allowed_by_protection(&self, mode: PowerMode) -> bool {
        if mode.is_very_low_power() {
            return self.cfg.allow_very_low_power;
        }
        mode != PowerMode::HighSpeedRun || self.cfg.allow_high_speed_run
    }

    /// Switch to the given power mode.
    ///
    /// For run modes, this function returns once the new mode is reported by the status register.
    /// For stop modes, the core enters deep sleep and this function returns after the wake-up
    /// interrupt, with the previous run mode restored by the hardware.
    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), SmcError> {
        let current = self.current_mode()?;
        if current == mode {
            return Ok(());
        }
        if !self.allowed_by_protection(mode) {
            return Err(report(
                ServiceId::SetMode,
                SmcError::NotAllowedByProtection(mode),
            ));
        }
        if !current.can_switch_to(mode) {
            return Err(report(
                ServiceId::SetMode,
                SmcError::TransitionNotAllowed {
                    from: current,
                    to: mode,
                },
            ));
        }
        log::debug!("switching power mode from {:?} to {:?}", current, mode);
        match mode {
            PowerMode::Run => self.enter_run_mode(RunMode::Run, mode, pmstat::RUN),
            PowerMode::HighSpeedRun => {
                self.enter_run_mode(RunMode::HighSpeedRun, mode, pmstat::HSRUN)
            }
            PowerMode::VeryLowPowerRun => {
                self.enter_run_mode(RunMode::VeryLowPowerRun, mode, pmstat::VLPR)
            }
            PowerMode::Stop1 => {
                self.enter_stop_mode(StopMode::NormalStop, Some(StopOption::Stop1));
                Ok(())
            }
            PowerMode::Stop2 => {
                self.enter_stop_mode(StopMode::NormalStop, Some(StopOption::Stop2));
                Ok(())
            }
            PowerMode::VeryLowPowerStop => {
                self.enter_stop_mode(StopMode::VeryLowPowerStop, None);
                Ok(())
            }
        }
    }

    fn enter_run_mode(
        &mut self,
        run_mode: RunMode,
        mode: PowerMode,
        expected: u8,
    ) -> Result<(), SmcError> {
        let ctrl = self.regs.read_pmctrl().with_runm(run_mode);
        self.regs.write_pmctrl(ctrl);
        let polls = cycles_in(self.cfg.core_clock, self.cfg.transition_timeout).max(1);
        for _ in 0..polls {
            if self.regs.read_pmstat().pmstat() == expected {
                return Ok(());
            }
        }
        log::error!("power mode {:?} not reached in time", mode);
        Err(SmcError::Timeout(mode))
    }

    fn enter_stop_mode(&mut self, stop_mode: StopMode, option: Option<StopOption>) {
        if let Some(option) = option {
            self.regs
                .write_stopctrl(StopControl::DEFAULT.with_stopo(option));
        }
        let ctrl = self.regs.read_pmctrl().with_stopm(stop_mode);
        self.regs.write_pmctrl(ctrl);
        self.regs.set_sleep_deep(true);
        // The write has to complete before the core goes to sleep.
        let ctrl = self.regs.read_pmctrl();
        self.regs.wait_for_interrupt();
        self.regs.set_sleep_deep(false);
        if stop_mode == StopMode::VeryLowPowerStop && ctrl.vlpsa() {
            log::warn!("very low power stop was aborted");
        }
    }
}
