//! Domain model for the ParkRadar sync and query engine
//!
//! Three families of types live here:
//!
//! - Region identity: [`City`], the enumerated set of supported
//!   administrative areas.
//! - Parking data: [`CanonicalLot`] (normalized feed output, no local
//!   bookkeeping) and [`ParkingLot`] (store-resident row keyed by
//!   `(city, park_id)`).
//! - Run tracking: [`SyncRun`] with its per-city [`CityOutcome`] counts
//!   and [`RunStatus`] lifecycle.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Enumerated region codes for the supported Taiwan cities and counties
///
/// The upstream feed scopes every endpoint by one of these codes, and
/// `(city, park_id)` forms the natural key of a parking lot. Codes
/// serialize as their upstream spelling (e.g. `"NewTaipei"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum City {
    Taipei,
    NewTaipei,
    Taoyuan,
    Taichung,
    Tainan,
    Kaohsiung,
    Keelung,
    Hsinchu,
    HsinchuCounty,
    MiaoliCounty,
    ChanghuaCounty,
    NantouCounty,
    YunlinCounty,
    ChiayiCounty,
    Chiayi,
    PingtungCounty,
    YilanCounty,
    HualienCounty,
    TaitungCounty,
    PenghuCounty,
    KinmenCounty,
    LienchiangCounty,
}

impl City {
    /// All supported cities, in canonical order
    ///
    /// An empty or omitted city set on a sync trigger expands to this list.
    pub const fn all() -> &'static [City] {
        use City::*;
        &[
            Taipei,
            NewTaipei,
            Taoyuan,
            Taichung,
            Tainan,
            Kaohsiung,
            Keelung,
            Hsinchu,
            HsinchuCounty,
            MiaoliCounty,
            ChanghuaCounty,
            NantouCounty,
            YunlinCounty,
            ChiayiCounty,
            Chiayi,
            PingtungCounty,
            YilanCounty,
            HualienCounty,
            TaitungCounty,
            PenghuCounty,
            KinmenCounty,
            LienchiangCounty,
        ]
    }

    /// The upstream region code for this city
    pub const fn as_str(&self) -> &'static str {
        use City::*;
        match self {
            Taipei => "Taipei",
            NewTaipei => "NewTaipei",
            Taoyuan => "Taoyuan",
            Taichung => "Taichung",
            Tainan => "Tainan",
            Kaohsiung => "Kaohsiung",
            Keelung => "Keelung",
            Hsinchu => "Hsinchu",
            HsinchuCounty => "HsinchuCounty",
            MiaoliCounty => "MiaoliCounty",
            ChanghuaCounty => "ChanghuaCounty",
            NantouCounty => "NantouCounty",
            YunlinCounty => "YunlinCounty",
            ChiayiCounty => "ChiayiCounty",
            Chiayi => "Chiayi",
            PingtungCounty => "PingtungCounty",
            YilanCounty => "YilanCounty",
            HualienCounty => "HualienCounty",
            TaitungCounty => "TaitungCounty",
            PenghuCounty => "PenghuCounty",
            KinmenCounty => "KinmenCounty",
            LienchiangCounty => "LienchiangCounty",
        }
    }

    /// Chinese display name
    pub const fn name_zh(&self) -> &'static str {
        use City::*;
        match self {
            Taipei => "臺北市",
            NewTaipei => "新北市",
            Taoyuan => "桃園市",
            Taichung => "臺中市",
            Tainan => "臺南市",
            Kaohsiung => "高雄市",
            Keelung => "基隆市",
            Hsinchu => "新竹市",
            HsinchuCounty => "新竹縣",
            MiaoliCounty => "苗栗縣",
            ChanghuaCounty => "彰化縣",
            NantouCounty => "南投縣",
            YunlinCounty => "雲林縣",
            ChiayiCounty => "嘉義縣",
            Chiayi => "嘉義市",
            PingtungCounty => "屏東縣",
            YilanCounty => "宜蘭縣",
            HualienCounty => "花蓮縣",
            TaitungCounty => "臺東縣",
            PenghuCounty => "澎湖縣",
            KinmenCounty => "金門縣",
            LienchiangCounty => "連江縣",
        }
    }

    /// English display name
    pub const fn name_en(&self) -> &'static str {
        use City::*;
        match self {
            Taipei => "Taipei City",
            NewTaipei => "New Taipei City",
            Taoyuan => "Taoyuan City",
            Taichung => "Taichung City",
            Tainan => "Tainan City",
            Kaohsiung => "Kaohsiung City",
            Keelung => "Keelung City",
            Hsinchu => "Hsinchu City",
            HsinchuCounty => "Hsinchu County",
            MiaoliCounty => "Miaoli County",
            ChanghuaCounty => "Changhua County",
            NantouCounty => "Nantou County",
            YunlinCounty => "Yunlin County",
            ChiayiCounty => "Chiayi County",
            Chiayi => "Chiayi City",
            PingtungCounty => "Pingtung County",
            YilanCounty => "Yilan County",
            HualienCounty => "Hualien County",
            TaitungCounty => "Taitung County",
            PenghuCounty => "Penghu County",
            KinmenCounty => "Kinmen County",
            LienchiangCounty => "Lienchiang County",
        }
    }
}

impl fmt::Display for City {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for City {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        City::all()
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| Error::invalid_input(format!("Unknown city code: {}", s)))
    }
}

/// Parking facility type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParkingType {
    /// Off-street facility (car park building or surface lot)
    OffStreet,
    /// On-street (roadside) parking
    OnStreet,
}

/// A validated geographic position in decimal degrees (WGS-84)
///
/// Construction goes through [`Coordinates::new`], so a value of this
/// type is always in range. A lot either has a full coordinate pair or
/// none; partial coordinates never occur.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees, -90..=90
    pub lat: f64,
    /// Longitude in decimal degrees, -180..=180
    pub lng: f64,
}

impl Coordinates {
    /// Create coordinates, validating the WGS-84 ranges
    pub fn new(lat: f64, lng: f64) -> Result<Self, Error> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(Error::invalid_input(format!("Latitude out of range: {}", lat)));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(Error::invalid_input(format!("Longitude out of range: {}", lng)));
        }
        Ok(Self { lat, lng })
    }
}

/// A normalized, validated parking record produced by a feed adapter
///
/// This carries only what the upstream asserted: no local bookkeeping
/// timestamps, no city (the fetch is already city-scoped). Absent
/// capacity means "unknown", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLot {
    /// Upstream-assigned identifier, unique within a city
    pub park_id: String,
    /// Facility name
    pub name: String,
    /// Street address, if reported
    pub address: Option<String>,
    /// Geographic position, if reported and valid
    pub coordinates: Option<Coordinates>,
    /// Total parking spaces, if reported
    pub total_spaces: Option<u32>,
    /// Currently available spaces; `None` means unknown
    pub available_spaces: Option<u32>,
    /// Free-text fare description, if reported
    pub fare_description: Option<String>,
    /// Facility type
    pub parking_type: ParkingType,
    /// Timestamp asserted by the upstream feed for this record
    pub data_updated_at: Option<DateTime<Utc>>,
}

/// One page of normalized records from a feed adapter
///
/// `dropped` counts raw records on this page that failed normalization
/// (missing identity or out-of-range coordinates) and were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    /// Normalized records on this page
    pub lots: Vec<CanonicalLot>,
    /// Raw records dropped during normalization
    pub dropped: u64,
}

/// A store-resident parking lot row
///
/// `(city, park_id)` is the natural key; it is unique and immutable once
/// created. Rows are never deleted: absence from a later successful
/// fetch leaves the row in place with its last `updated_at`, and
/// consumers infer staleness from elapsed time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingLot {
    /// Region this lot belongs to
    pub city: City,
    /// Upstream-assigned identifier, unique within `city`
    pub park_id: String,
    /// Facility name
    pub name: String,
    /// Street address, if reported
    pub address: Option<String>,
    /// Geographic position, if reported
    pub coordinates: Option<Coordinates>,
    /// Total parking spaces, if reported
    pub total_spaces: Option<u32>,
    /// Currently available spaces; `None` means unknown
    pub available_spaces: Option<u32>,
    /// Free-text fare description, if reported
    pub fare_description: Option<String>,
    /// Facility type
    pub parking_type: ParkingType,
    /// Freshness asserted by the upstream feed
    pub data_updated_at: Option<DateTime<Utc>>,
    /// When this row was first created locally
    pub created_at: DateTime<Utc>,
    /// When this row was last touched by a successful fetch
    pub updated_at: DateTime<Utc>,
}

impl ParkingLot {
    /// Build a fresh row from a normalized feed record
    pub fn from_canonical(city: City, lot: CanonicalLot, now: DateTime<Utc>) -> Self {
        Self {
            city,
            park_id: lot.park_id,
            name: lot.name,
            address: lot.address,
            coordinates: lot.coordinates,
            total_spaces: lot.total_spaces,
            available_spaces: lot.available_spaces,
            fare_description: lot.fare_description,
            parking_type: lot.parking_type,
            data_updated_at: lot.data_updated_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compare this row's feed-derived content against a normalized record
    ///
    /// Local bookkeeping (`created_at`, `updated_at`) is excluded: two
    /// rows with identical upstream content compare equal regardless of
    /// when they were touched.
    pub fn content_eq(&self, lot: &CanonicalLot) -> bool {
        self.park_id == lot.park_id
            && self.name == lot.name
            && self.address == lot.address
            && self.coordinates == lot.coordinates
            && self.total_spaces == lot.total_spaces
            && self.available_spaces == lot.available_spaces
            && self.fare_description == lot.fare_description
            && self.parking_type == lot.parking_type
            && self.data_updated_at == lot.data_updated_at
    }

    /// Apply a normalized record to this row, advancing `updated_at`
    pub fn apply(&mut self, lot: CanonicalLot, now: DateTime<Utc>) {
        self.name = lot.name;
        self.address = lot.address;
        self.coordinates = lot.coordinates;
        self.total_spaces = lot.total_spaces;
        self.available_spaces = lot.available_spaces;
        self.fare_description = lot.fare_description;
        self.parking_type = lot.parking_type;
        self.data_updated_at = lot.data_updated_at;
        self.updated_at = now;
    }
}

/// Lifecycle status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created at trigger time, not yet started
    Pending,
    /// The orchestrator is working through the requested cities
    Running,
    /// Every requested city reconciled successfully
    Succeeded,
    /// Some cities succeeded, some failed
    PartialFailure,
    /// Every requested city failed
    Failed,
}

impl RunStatus {
    /// Whether this is one of the three terminal states
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::PartialFailure | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-city outcome within a sync run
///
/// `failed` counts raw records dropped during normalization. A city-level
/// failure (fetch or reconciliation) sets `error` and leaves the counts
/// at whatever had been observed before the failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityOutcome {
    /// Rows inserted for previously unseen `(city, park_id)` keys
    pub created: u64,
    /// Rows whose content changed
    pub updated: u64,
    /// Rows touched with identical content
    pub unchanged: u64,
    /// Raw records dropped as normalization failures
    pub failed: u64,
    /// City-level error summary, if the city failed
    pub error: Option<String>,
}

impl CityOutcome {
    /// An outcome representing a city-level failure
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Whether the city completed without a city-level error
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Durable record of one synchronization run
///
/// Created `pending` at trigger time, moved to `running` when work
/// begins, and finished in exactly one terminal state. The orchestrator
/// is the sole writer; once terminal the record is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Unique run identifier
    pub run_id: String,
    /// Cities targeted by this run, in request order
    pub requested_cities: Vec<City>,
    /// Current lifecycle status
    pub status: RunStatus,
    /// When the trigger created this run
    pub created_at: DateTime<Utc>,
    /// When the orchestrator began work
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-city outcomes, populated as cities complete
    pub outcomes: BTreeMap<City, CityOutcome>,
}

impl SyncRun {
    /// Create a new run in `pending` state
    pub fn new(run_id: impl Into<String>, cities: Vec<City>, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            requested_cities: cities,
            status: RunStatus::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            outcomes: BTreeMap::new(),
        }
    }

    /// Total records created across all cities
    pub fn total_created(&self) -> u64 {
        self.outcomes.values().map(|o| o.created).sum()
    }

    /// Cities that completed without a city-level error
    pub fn succeeded_cities(&self) -> Vec<City> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_ok())
            .map(|(c, _)| *c)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn city_round_trips_through_str() {
        for city in City::all() {
            let parsed: City = city.as_str().parse().unwrap();
            assert_eq!(parsed, *city);
        }
        assert_eq!(City::all().len(), 22);
    }

    #[test]
    fn unknown_city_code_is_invalid_input() {
        let err = "Atlantis".parse::<City>().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn coordinates_reject_out_of_range() {
        assert!(Coordinates::new(25.03, 121.56).is_ok());
        assert!(Coordinates::new(91.0, 0.0).is_err());
        assert!(Coordinates::new(-91.0, 0.0).is_err());
        assert!(Coordinates::new(0.0, 180.5).is_err());
        assert!(Coordinates::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn content_eq_ignores_local_timestamps() {
        let now = Utc::now();
        let canonical = CanonicalLot {
            park_id: "TPE001".to_string(),
            name: "City Hall Garage".to_string(),
            address: None,
            coordinates: Some(Coordinates::new(25.03, 121.56).unwrap()),
            total_spaces: Some(120),
            available_spaces: Some(30),
            fare_description: None,
            parking_type: ParkingType::OffStreet,
            data_updated_at: None,
        };
        let mut row = ParkingLot::from_canonical(City::Taipei, canonical.clone(), now);
        assert!(row.content_eq(&canonical));

        // Advancing the touch timestamp does not change content equality
        row.updated_at = now + chrono::Duration::hours(1);
        assert!(row.content_eq(&canonical));

        // But a capacity change does
        let mut changed = canonical;
        changed.available_spaces = Some(29);
        assert!(!row.content_eq(&changed));
    }

    #[test]
    fn run_status_terminality() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::PartialFailure.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }
}
