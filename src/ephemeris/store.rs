//! Read-only-after-load ephemeris store, indexed by satellite (§3
//! Ownership invariant: the nav data set is loaded once per run and never
//! mutated while epochs are being processed).

use std::collections::HashMap;

use gnss::prelude::SV;
use hifitime::Epoch;

use super::{Ephemeris, Error};
use crate::time::max_dtoe;

extern crate gnss_rs as gnss;

/// All broadcast ephemerides available for a processing run, grouped by
/// satellite and kept sorted by `toe` so lookups can binary-search.
#[derive(Debug, Clone, Default)]
pub struct NavStore {
    by_sv: HashMap<SV, Vec<Ephemeris>>,
}

impl NavStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts one ephemeris record, keeping the per-satellite list sorted
    /// by `toe`. Intended to be called only during the load phase.
    pub fn insert(&mut self, eph: Ephemeris) {
        let entries = self.by_sv.entry(eph.sv()).or_default();
        let pos = entries.partition_point(|e| e.toe() <= eph.toe());
        entries.insert(pos, eph);
    }

    pub fn len(&self) -> usize {
        self.by_sv.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the ephemeris whose `toe` is closest to `t` and within the
    /// per-constellation staleness tolerance (§3), rejecting unhealthy
    /// satellites outright.
    pub fn select(&self, sv: SV, t: Epoch) -> Result<&Ephemeris, Error> {
        let entries = self
            .by_sv
            .get(&sv)
            .ok_or(Error::EphMissing(sv, t))?;

        let tolerance = max_dtoe(sv.constellation);

        entries
            .iter()
            .filter(|e| e.healthy())
            .filter(|e| (t - e.toe()).abs() <= tolerance)
            .min_by(|a, b| {
                let da = (t - a.toe()).abs();
                let db = (t - b.toe()).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or(Error::EphMissing(sv, t))
    }

    pub fn satellites(&self) -> impl Iterator<Item = &SV> {
        self.by_sv.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::keplerian::epoch_from_gpst_week_tow;
    use crate::ephemeris::KeplerianEphemeris;
    use gnss::prelude::Constellation;

    fn eph(sv: SV, toe: Epoch) -> Ephemeris {
        Ephemeris::Keplerian(KeplerianEphemeris {
            sv,
            toe,
            toc: toe,
            toe_tow_s: 0.0,
            sqrt_a: 5153.7,
            e: 0.01,
            i0: 0.95,
            idot: 0.0,
            omega0: 0.0,
            omega_dot: 0.0,
            omega: 0.0,
            m0: 0.0,
            delta_n: 0.0,
            cuc: 0.0,
            cus: 0.0,
            crc: 0.0,
            crs: 0.0,
            cic: 0.0,
            cis: 0.0,
            af0: 0.0,
            af1: 0.0,
            af2: 0.0,
            tgd: [0.0; 6],
            ura: 0,
            health: 0,
            iode: 1,
        })
    }

    #[test]
    fn selects_closest_within_tolerance() {
        let sv = SV::new(Constellation::GPS, 12);
        let mut store = NavStore::new();
        let t0 = epoch_from_gpst_week_tow(2000, 0.0);
        store.insert(eph(sv, t0));
        store.insert(eph(sv, t0 + hifitime::Duration::from_seconds(7200.0)));

        let query = t0 + hifitime::Duration::from_seconds(7100.0);
        let selected = store.select(sv, query).expect("within tolerance");
        assert_eq!(selected.toe(), t0 + hifitime::Duration::from_seconds(7200.0));
    }

    #[test]
    fn missing_satellite_is_reported() {
        let store = NavStore::new();
        let sv = SV::new(Constellation::GPS, 1);
        let t = epoch_from_gpst_week_tow(2000, 0.0);
        assert_eq!(store.select(sv, t), Err(Error::EphMissing(sv, t)));
    }

    #[test]
    fn stale_ephemeris_is_rejected() {
        let sv = SV::new(Constellation::GPS, 1);
        let mut store = NavStore::new();
        let t0 = epoch_from_gpst_week_tow(2000, 0.0);
        store.insert(eph(sv, t0));
        let query = t0 + hifitime::Duration::from_seconds(100_000.0);
        assert_eq!(store.select(sv, query), Err(Error::EphMissing(sv, query)));
    }
}
