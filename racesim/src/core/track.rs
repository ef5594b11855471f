use serde::{Deserialize, Serialize};

use super::state::Weather;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectorType {
    Slow,
    Medium,
    Fast,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Sector {
    pub sector_type: SectorType,
    pub length: f64,
}

/// DRS activation zone expressed in lap-progress fractions.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct DrsZone {
    pub start: f64,
    pub end: f64,
}

/// * `id` - Unique track identifier used by scenarios
/// * `name` - Track name
/// * `length` - (m) Length of the track
/// * `sectors` - The three sectors in driving order
/// * `drs_zones` - DRS activation zones
/// * `pit_loss` - (s) Time lost for a full pit stop (drive-through + standstill)
/// * `base_incident` - Per-tick per-car incident hazard
/// * `sc_hazard` - Per-tick track-wide hazard of an incident big enough for a
///   safety car (debris, barrier contact by a backmarker, ...)
/// * `overtake_difficulty` - How hard passing is here (Monaco high, Monza low)
/// * `abrasion` - Tire wear scaling of the surface
/// * `downforce` - How much the track rewards downforce; scales dirty air
/// * `default_weather` - Weather baseline used when the scenario has none
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub length: f64,
    pub sectors: [Sector; 3],
    pub drs_zones: Vec<DrsZone>,
    pub pit_loss: f64,
    pub base_incident: f64,
    pub sc_hazard: f64,
    pub overtake_difficulty: f64,
    pub abrasion: f64,
    pub downforce: f64,
    pub default_weather: Weather,
}

/// Shortened track record returned by the catalog listing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
    pub length: f64,
}

impl Track {
    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            length: self.length,
        }
    }

    /// Sector index (0..=2) for a given lap progress.
    pub fn sector_at(&self, lap_progress: f64) -> usize {
        let mut cumulative = 0.0;
        for (i, sector) in self.sectors.iter().enumerate() {
            cumulative += sector.length;
            if lap_progress < cumulative / self.length {
                return i;
            }
        }
        self.sectors.len() - 1
    }

    pub fn in_drs_zone(&self, lap_progress: f64) -> bool {
        self.drs_zones
            .iter()
            .any(|z| lap_progress >= z.start && lap_progress <= z.end)
    }

    /// Reference lap time (s) at the base sector speeds, unaffected by car
    /// state. Gaps are reported in race-pace seconds derived from this, so
    /// that a field crawling behind the safety car does not inflate them.
    pub fn reference_lap_time(&self) -> f64 {
        self.sectors
            .iter()
            .map(|s| s.length / (super::physics::base_speed(s.sector_type) / 3.6))
            .sum()
    }

    /// Reference speed (m/s) over a full lap.
    pub fn reference_speed(&self) -> f64 {
        self.length / self.reference_lap_time()
    }
}

#[cfg(test)]
mod tests {
    use crate::pre::catalog;

    #[test]
    fn sector_boundaries() {
        let track = catalog::get_track("monza").unwrap();
        assert_eq!(track.sector_at(0.0), 0);
        assert_eq!(track.sector_at(0.5), 1);
        assert_eq!(track.sector_at(0.99), 2);
    }

    #[test]
    fn sectors_cover_track_length() {
        for summary in catalog::list_tracks() {
            let track = catalog::get_track(&summary.id).unwrap();
            let total: f64 = track.sectors.iter().map(|s| s.length).sum();
            assert!(
                (total - track.length).abs() < 1.0,
                "{}: sectors sum to {total}, track length {}",
                track.id,
                track.length
            );
        }
    }

    #[test]
    fn reference_lap_time_plausible() {
        let track = catalog::get_track("monza").unwrap();
        let t = track.reference_lap_time();
        assert!(t > 60.0 && t < 120.0, "reference lap {t}s out of range");
    }
}
