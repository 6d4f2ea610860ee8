//! # Development error tracing
//!
//! Errors caused by wrong API usage are returned to the caller and additionally reported here.
//! Every report is logged with [log::warn!] and forwarded to the hook installed with [set_hook],
//! which allows an integrator to route the reports to a development error tracer.
use core::cell::Cell;

use critical_section::Mutex;

/// AUTOSAR module ID of the SPI handler driver.
pub const SPI_MODULE_ID: u16 = 83;
/// AUTOSAR module ID of the MCU driver, which owns the power mode handling.
pub const MCU_MODULE_ID: u16 = 101;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub module_id: u16,
    pub instance_id: u8,
    pub service_id: u8,
    pub error_id: u8,
}

pub type DetHook = fn(&ErrorReport);

static HOOK: Mutex<Cell<Option<DetHook>>> = Mutex::new(Cell::new(None));

/// Install a hook which receives all development error reports.
pub fn set_hook(hook: DetHook) {
    critical_section::with(|cs| HOOK.borrow(cs).set(Some(hook)));
}

pub fn clear_hook() {
    critical_section::with(|cs| HOOK.borrow(cs).set(None));
}

pub fn report_error(module_id: u16, instance_id: u8, service_id: u8, error_id: u8) {
    log::warn!(
        "development error: module {} instance {} service {:#04x} error {:#04x}",
        module_id,
        instance_id,
        service_id,
        error_id
    );
    let hook = critical_section::with(|cs| HOOK.borrow(cs).get());
    if let Some(hook) = hook {
        hook(&ErrorReport {
            module_id,
            instance_id,
            service_id,
            error_id,
        });
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    static LAST: AtomicU32 = AtomicU32::new(0);

    fn record(report: &ErrorReport) {
        if report.module_id == 0x7FF {
            LAST.store(
                ((report.service_id as u32) << 8) | report.error_id as u32,
                Ordering::Relaxed,
            );
        }
    }

    #[test]
    fn hook_receives_reports() {
        set_hook(record);
        report_error(0x7FF, 0, 0x03, 0x2A);
        assert_eq!(LAST.load(Ordering::Relaxed), 0x032A);
    }
}
