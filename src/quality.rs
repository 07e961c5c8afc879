//! Quality routing bands.
//!
//! Every sample is routed to exactly one band based on its quality percentage.
//! Bands are half-open on the upper bound, so `50.0` belongs to `Band50_54` and
//! `69.999` to `Band68_69`. Display text and badge styling are left to callers;
//! this module only hands out the band identity.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Unspecified,
    Below50,
    Band50_54,
    Band55_59,
    Band60_64,
    Band65_67,
    Band68_69,
    Above70,
}

// Lower bounds of the numeric bands, checked from the top down.
const THRESHOLDS: [(f64, Band); 6] = [
    (70.0, Band::Above70),
    (68.0, Band::Band68_69),
    (65.0, Band::Band65_67),
    (60.0, Band::Band60_64),
    (55.0, Band::Band55_59),
    (50.0, Band::Band50_54),
];

impl Band {
    pub const ALL: [Band; 8] = [
        Band::Unspecified,
        Band::Below50,
        Band::Band50_54,
        Band::Band55_59,
        Band::Band60_64,
        Band::Band65_67,
        Band::Band68_69,
        Band::Above70,
    ];

    /// Stable machine identifier, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Unspecified => "unspecified",
            Band::Below50 => "below50",
            Band::Band50_54 => "band50_54",
            Band::Band55_59 => "band55_59",
            Band::Band60_64 => "band60_64",
            Band::Band65_67 => "band65_67",
            Band::Band68_69 => "band68_69",
            Band::Above70 => "above70",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a quality value to its band.
///
/// A missing value is `Unspecified`. NaN carries no usable measurement and is
/// treated the same way; infinities land in the outer bands.
pub fn classify(quality: Option<f64>) -> Band {
    let q = match quality {
        Some(q) if !q.is_nan() => q,
        _ => return Band::Unspecified,
    };

    THRESHOLDS
        .iter()
        .find(|(lower, _)| q >= *lower)
        .map(|(_, band)| *band)
        .unwrap_or(Band::Below50)
}
