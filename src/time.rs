//! GNSS time systems and epoch-tick arithmetic.
//!
//! `hifitime::Epoch` already carries a (seconds, attosecond-fraction) split
//! internally so it is used directly for sub-ns precision storage; this
//! module only adds the GNSS-specific pieces: per-constellation time scales,
//! the ephemeris-staleness tolerances from §3, and the `ti`-snapped epoch
//! tick used by the pipeline driver (§4.6).

use gnss::prelude::Constellation;
use hifitime::{Duration, Epoch, TimeScale, Unit};

extern crate gnss_rs as gnss;

/// Tolerance used when matching an observation epoch to a requested
/// processing tick (§4.6: `DTTOL`).
pub const DTTOL: Duration = Duration::from_milliseconds(25);

/// Returns the [TimeScale] broadcast ephemeris for this constellation is
/// expressed in, or `None` if the constellation carries no ephemeris
/// (e.g. augmentation-only SBAS without a distinct clock).
pub fn constellation_timescale(c: Constellation) -> Option<TimeScale> {
    match c {
        Constellation::GPS | Constellation::QZSS => Some(TimeScale::GPST),
        Constellation::Galileo => Some(TimeScale::GST),
        Constellation::BeiDou => Some(TimeScale::BDT),
        Constellation::Glonass => Some(TimeScale::UTC),
        c if c.is_sbas() => Some(TimeScale::GPST),
        _ => None,
    }
}

/// Maximum tolerated |t_receive - toe| before an ephemeris is considered
/// too stale to use (§3 Invariants).
pub fn max_dtoe(c: Constellation) -> Duration {
    match c {
        Constellation::Glonass => Duration::from_seconds(1800.0),
        Constellation::Galileo => Duration::from_seconds(14400.0),
        Constellation::BeiDou => Duration::from_seconds(21600.0),
        _ => Duration::from_seconds(7200.0),
    }
}

/// Reduces `tk` modulo one week so that it lies within `[-half week, +half
/// week]`, as required before evaluating the Keplerian orbit model (§4.1).
pub fn week_reduce(tk: Duration) -> Duration {
    const HALF_WEEK: f64 = 302_400.0;
    let mut s = tk.to_seconds();
    if s > HALF_WEEK {
        s -= 604_800.0;
    } else if s < -HALF_WEEK {
        s += 604_800.0;
    }
    Duration::from_seconds(s)
}

/// Snaps `t` to the nearest multiple of `interval` (in seconds) measured
/// from `origin`, returning `Some(tick)` only if `t` is within [DTTOL] of
/// that tick (§4.6).
pub fn snap_to_tick(t: Epoch, origin: Epoch, interval: Duration) -> Option<Epoch> {
    if interval <= Duration::ZERO {
        return Some(t);
    }
    let dt = (t - origin).to_seconds();
    let n = (dt / interval.to_seconds()).round();
    let tick = origin + n * interval.to_seconds() * Unit::Second;
    if (t - tick).abs() <= DTTOL {
        Some(tick)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hifitime::Epoch;

    #[test]
    fn gpst_utc_round_trip() {
        for year in 2000..2030 {
            let t = Epoch::from_gregorian_utc_at_midnight(year, 6, 15);
            let gpst = t.to_time_scale(TimeScale::GPST);
            let back = gpst.to_time_scale(TimeScale::UTC);
            let delta = (t - back).abs().to_seconds();
            assert!(delta < 1.0e-6, "round trip delta {delta} for year {year}");
        }
    }

    #[test]
    fn week_reduce_wraps_half_week() {
        let tk = Duration::from_seconds(400_000.0);
        let reduced = week_reduce(tk);
        assert!(reduced.to_seconds().abs() <= 302_400.0);
        assert!((reduced.to_seconds() - (400_000.0 - 604_800.0)).abs() < 1.0e-9);
    }

    #[test]
    fn snap_accepts_within_tolerance() {
        let origin = Epoch::from_gregorian_utc_at_midnight(2022, 9, 1);
        let interval = Duration::from_seconds(30.0);
        let t = origin + Duration::from_seconds(60.01);
        assert!(snap_to_tick(t, origin, interval).is_some());
        let t_far = origin + Duration::from_seconds(60.1);
        assert!(snap_to_tick(t_far, origin, interval).is_none());
    }

    #[test]
    fn max_dtoe_matches_spec_table() {
        assert_eq!(max_dtoe(Constellation::GPS).to_seconds(), 7200.0);
        assert_eq!(max_dtoe(Constellation::Glonass).to_seconds(), 1800.0);
        assert_eq!(max_dtoe(Constellation::Galileo).to_seconds(), 14400.0);
        assert_eq!(max_dtoe(Constellation::BeiDou).to_seconds(), 21600.0);
    }
}
