//! # Peripheral Access Crate (PAC) for the NXP S32K14x family
//!
//! This crate provides the raw register blocks used by the S32K14x MCAL drivers. The register
//! blocks are declared with [derive_mmio] and the register contents with [bitbybit] bitfields,
//! so the higher level crates never have to shift or mask raw values manually.
//!
//! Only the blocks required by the MCAL drivers are provided:
//!
//! - [lpspi]: Low Power Serial Peripheral Interface (LPSPI0 to LPSPI2)
//! - [edma]: Enhanced DMA controller and its transfer control descriptors
//! - [smc]: System Mode Controller
//! - [scb]: System control register of the Cortex-M4 system control block
#![no_std]

pub mod edma;
pub mod lpspi;
pub mod scb;
pub mod smc;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid peripheral instance {0}")]
pub struct InvalidInstanceError(pub usize);
