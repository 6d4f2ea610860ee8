//! # Time units

/// Hertz
pub type Hertz = fugit::HertzU32;
pub type Hz = Hertz;

/// MegaHertz
pub type MegaHertz = fugit::MegahertzU32;
pub type MHz = MegaHertz;

/// Microseconds
pub type Microseconds = fugit::MicrosDurationU32;

/// Number of core clock cycles which elapse during the given duration.
///
/// Saturates at [u32::MAX].
pub fn cycles_in(clock: Hertz, duration: Microseconds) -> u32 {
    let cycles = (clock.raw() as u64 * duration.ticks() as u64) / 1_000_000;
    u32::try_from(cycles).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use fugit::RateExtU32;

    use super::*;

    #[test]
    fn cycles() {
        assert_eq!(cycles_in(80.MHz(), Microseconds::from_ticks(10)), 800);
        assert_eq!(cycles_in(8.MHz(), Microseconds::from_ticks(1)), 8);
        assert_eq!(
            cycles_in(80.MHz(), Microseconds::from_ticks(u32::MAX)),
            u32::MAX
        );
    }
}
