//! # MCAL drivers for the NXP S32K14x family
//!
//! This crate contains the AUTOSAR style microcontroller abstraction layer drivers built on top of
//! the [s32k14x] peripheral access crate:
//!
//! - [spi]: SPI handler and LPSPI driver with channel, job and sequence handling, FIFO and DMA
//!   transfers, synchronous and asynchronous transmission.
//! - [smc]: Power mode switching with the System Mode Controller.
//!
//! Errors which are caused by wrong API usage are reported through the [det] module, which
//! forwards them to the [log] facade and an optional integrator hook.
#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod det;
pub mod exclusive;
pub mod smc;
pub mod spi;
pub mod time;

/// AUTOSAR vendor ID of NXP.
pub const VENDOR_ID: u16 = 43;

/// Software version of the driver suite.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub vendor_id: u16,
    pub module_id: u16,
    pub sw_major: u8,
    pub sw_minor: u8,
    pub sw_patch: u8,
}

impl VersionInfo {
    pub(crate) const fn for_module(module_id: u16) -> Self {
        Self {
            vendor_id: VENDOR_ID,
            module_id,
            sw_major: 1,
            sw_minor: 0,
            sw_patch: 0,
        }
    }
}
