//! Output solution record and fix-quality status codes (§6 External
//! interfaces).

use hifitime::Epoch;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fix-quality status, matching the conventional 0-7 enumeration
/// downstream NMEA/solution formatters key off (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Status {
    #[default]
    None = 0,
    Fix = 1,
    Float = 2,
    Sbas = 3,
    Dgps = 4,
    Single = 5,
    Ppp = 6,
    Dr = 7,
}

impl Status {
    /// True for any status that represents an accepted fix (everything
    /// but [Status::None]).
    pub fn is_solved(&self) -> bool {
        !matches!(self, Status::None)
    }
}

/// One epoch's position/velocity/clock solution (§6: `solve(epoch) ->
/// Solution | Error`).
///
/// `rr` mirrors the conventional ECEF position+velocity layout (m, m/s);
/// `qr`/`qv` carry the upper-triangular covariance of each (xx, yy, zz,
/// xy, yz, zx), so a caller uninterested in the full matrix can read the
/// diagonal directly. `dtr` holds the receiver clock bias per active
/// constellation slot (s), in the order [Config::constellations] was
/// built with.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Solution {
    pub time: Epoch,
    pub rr: [f64; 6],
    pub qr: [f64; 6],
    pub qv: [f64; 6],
    pub dtr: [f64; 6],
    pub status: Status,
    pub nsats: usize,
    pub age_s: f64,
    pub ratio: f64,
}

impl Solution {
    pub fn none(time: Epoch) -> Self {
        Self {
            time,
            rr: [0.0; 6],
            qr: [0.0; 6],
            qv: [0.0; 6],
            dtr: [0.0; 6],
            status: Status::None,
            nsats: 0,
            age_s: 0.0,
            ratio: 0.0,
        }
    }

    pub fn position_ecef(&self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.rr[0], self.rr[1], self.rr[2])
    }

    pub fn velocity_ecef(&self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.rr[3], self.rr[4], self.rr[5])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_status_is_not_solved() {
        assert!(!Status::None.is_solved());
        assert!(Status::Single.is_solved());
        assert!(Status::Fix.is_solved());
    }

    #[test]
    fn status_values_match_conventional_enumeration() {
        assert_eq!(Status::None as u8, 0);
        assert_eq!(Status::Fix as u8, 1);
        assert_eq!(Status::Float as u8, 2);
        assert_eq!(Status::Sbas as u8, 3);
        assert_eq!(Status::Dgps as u8, 4);
        assert_eq!(Status::Single as u8, 5);
        assert_eq!(Status::Ppp as u8, 6);
        assert_eq!(Status::Dr as u8, 7);
    }
}
