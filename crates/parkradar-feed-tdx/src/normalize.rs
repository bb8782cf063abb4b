//! Normalization of raw TDX payloads into canonical records
//!
//! The upstream payload is loosely typed: names and addresses may be
//! plain strings or `{Zh_tw, En}` objects, positions may be partial,
//! and availability is reported separately keyed by `CarParkID`.
//! Everything optional stays optional; absence never becomes a
//! sentinel zero.
//!
//! A record is dropped (and counted) when its identity is missing or
//! its coordinates fail range validation. A partial position (one of
//! lat/lng missing) is treated as no position at all, keeping the
//! both-or-neither invariant.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use parkradar_core::model::{CanonicalLot, Coordinates, FeedPage, ParkingType};

/// A name/address/fare field that may be plain text or localized
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    Plain(String),
    Localized {
        #[serde(rename = "Zh_tw")]
        zh_tw: Option<String>,
        #[serde(rename = "En")]
        en: Option<String>,
    },
}

impl LocalizedText {
    /// Prefer Chinese, fall back to English; empty strings become None
    fn into_text(self) -> Option<String> {
        let text = match self {
            Self::Plain(s) => Some(s),
            Self::Localized { zh_tw, en } => {
                zh_tw.filter(|s| !s.is_empty()).or(en)
            }
        };
        text.filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPosition {
    #[serde(rename = "PositionLat")]
    pub lat: Option<f64>,
    #[serde(rename = "PositionLon")]
    pub lon: Option<f64>,
}

/// Raw car-park record from the facility endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RawCarPark {
    #[serde(rename = "CarParkID")]
    pub car_park_id: Option<String>,
    #[serde(rename = "CarParkName")]
    pub name: Option<LocalizedText>,
    #[serde(rename = "Address")]
    pub address: Option<LocalizedText>,
    #[serde(rename = "FareDescription")]
    pub fare_description: Option<LocalizedText>,
    #[serde(rename = "CarParkPosition")]
    pub position: Option<RawPosition>,
    #[serde(rename = "TotalSpaces")]
    pub total_spaces: Option<u32>,
}

/// Raw availability record from the real-time endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RawAvailability {
    #[serde(rename = "CarParkID")]
    pub car_park_id: Option<String>,
    // Upstream reports negative values when availability is unknown
    #[serde(rename = "AvailableSpaces")]
    pub available_spaces: Option<i64>,
    #[serde(rename = "DataCollectTime")]
    pub data_collect_time: Option<String>,
    #[serde(rename = "SrcUpdateTime")]
    pub src_update_time: Option<String>,
}

impl RawAvailability {
    fn available(&self) -> Option<u32> {
        self.available_spaces
            .filter(|n| *n >= 0)
            .map(|n| n.min(u32::MAX as i64) as u32)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.data_collect_time
            .as_deref()
            .or(self.src_update_time.as_deref())
            .and_then(parse_timestamp)
    }
}

/// Normalize one raw record, merging its availability
///
/// Returns `None` when the record must be dropped: missing/empty
/// identity, or a coordinate pair outside the valid WGS-84 ranges.
pub fn normalize(
    raw: RawCarPark,
    availability: &HashMap<String, RawAvailability>,
) -> Option<CanonicalLot> {
    let park_id = raw.car_park_id.filter(|id| !id.is_empty())?;

    let coordinates = match raw.position {
        Some(RawPosition {
            lat: Some(lat),
            lon: Some(lon),
        }) => match Coordinates::new(lat, lon) {
            Ok(coords) => Some(coords),
            // Out-of-range coordinates invalidate the whole record
            Err(_) => return None,
        },
        // A partial position is no position
        _ => None,
    };

    let avail = availability.get(&park_id);

    Some(CanonicalLot {
        name: raw
            .name
            .and_then(LocalizedText::into_text)
            .unwrap_or_else(|| "Unknown".to_string()),
        address: raw.address.and_then(LocalizedText::into_text),
        fare_description: raw.fare_description.and_then(LocalizedText::into_text),
        coordinates,
        total_spaces: raw.total_spaces,
        available_spaces: avail.and_then(RawAvailability::available),
        data_updated_at: avail.and_then(RawAvailability::updated_at),
        parking_type: ParkingType::OffStreet,
        park_id,
    })
}

/// Normalize a page of raw records, counting drops
pub fn normalize_page(
    raw: Vec<RawCarPark>,
    availability: &HashMap<String, RawAvailability>,
) -> FeedPage {
    let total = raw.len();
    let lots: Vec<CanonicalLot> = raw
        .into_iter()
        .filter_map(|r| normalize(r, availability))
        .collect();
    let dropped = (total - lots.len()) as u64;

    if dropped > 0 {
        debug!(dropped, "Dropped records during normalization");
    }

    FeedPage { lots, dropped }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
