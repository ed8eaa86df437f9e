//! Wire DTOs for both REST surfaces and their conversions to and from the
//! data model.
//!
//! Times travel as RFC 3339 UTC; altitudes as meters above the WGS-84
//! ellipsoid (`reference: "W84"`, `units: "M"`); distances as meters.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use dss_geo::{Footprint, GeoCircle, GeoPolygon, LatLng};
use dss_models::{
    Constraint, DssError, FootprintSource, IdentificationServiceArea, OperationalIntent,
    Subscription, UssAvailability, Volume4D,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dss_core::SubscriberToNotify;

pub const TIME_FORMAT_RFC3339: &str = "RFC3339";
pub const ALTITUDE_REFERENCE_W84: &str = "W84";
pub const UNIT_METER: &str = "M";

/// Pull the bearer token out of the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

// ---------------------------------------------------------------------------
// Shared geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePolygon {
    pub vertices: Vec<WirePoint>,
}

impl WirePolygon {
    pub fn into_polygon(self) -> GeoPolygon {
        GeoPolygon {
            vertices: self
                .vertices
                .into_iter()
                .map(|v| LatLng::new(v.lat, v.lng))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote-ID wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidVolume3D {
    pub footprint: WirePolygon,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_lo: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_hi: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidVolume4D {
    pub spatial_volume: RidVolume3D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<DateTime<Utc>>,
}

impl RidVolume4D {
    pub fn into_volume(self) -> Volume4D {
        Volume4D {
            starts_at: self.time_start,
            ends_at: self.time_end,
            altitude_lo: self.spatial_volume.altitude_lo,
            altitude_hi: self.spatial_volume.altitude_hi,
            footprint: Some(FootprintSource::Geometry(Footprint::Polygon(
                self.spatial_volume.footprint.into_polygon(),
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidIsa {
    pub id: Uuid,
    pub owner: String,
    pub flights_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<DateTime<Utc>>,
    pub version: String,
}

impl RidIsa {
    pub fn from_model(isa: &IdentificationServiceArea) -> RidIsa {
        RidIsa {
            id: isa.id,
            owner: isa.owner.0.clone(),
            flights_url: isa.url.clone(),
            time_start: isa.starts_at,
            time_end: isa.ends_at,
            version: isa.version.map(|v| v.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidSubscriptionCallbacks {
    pub identification_service_area_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidSubscription {
    pub id: Uuid,
    pub owner: String,
    pub callbacks: RidSubscriptionCallbacks,
    pub notification_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<DateTime<Utc>>,
    pub version: String,
}

impl RidSubscription {
    pub fn from_model(sub: &Subscription) -> RidSubscription {
        RidSubscription {
            id: sub.id,
            owner: sub.owner.0.clone(),
            callbacks: RidSubscriptionCallbacks {
                identification_service_area_url: sub.url.clone(),
            },
            notification_index: sub.notification_index,
            time_start: sub.starts_at,
            time_end: sub.ends_at,
            version: sub.version.map(|v| v.to_string()).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionState {
    pub subscription_id: Uuid,
    pub notification_index: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSubscriberToNotify {
    pub url: String,
    pub subscriptions: Vec<SubscriptionState>,
}

pub fn wire_subscribers(subscribers: &[SubscriberToNotify]) -> Vec<WireSubscriberToNotify> {
    subscribers
        .iter()
        .map(|s| WireSubscriberToNotify {
            url: s.url.clone(),
            subscriptions: s
                .subscriptions
                .iter()
                .map(|(id, index)| SubscriptionState {
                    subscription_id: *id,
                    notification_index: *index,
                })
                .collect(),
        })
        .collect()
}

// requests

#[derive(Debug, Clone, Deserialize)]
pub struct PutIsaRequest {
    pub extents: RidVolume4D,
    pub flights_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PutRidSubscriptionRequest {
    pub extents: RidVolume4D,
    pub callbacks: RidSubscriptionCallbacks,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchAreaQuery {
    pub area: String,
    #[serde(default)]
    pub earliest_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub latest_time: Option<DateTime<Utc>>,
}

// responses

#[derive(Debug, Serialize)]
pub struct SearchIsasResponse {
    pub service_areas: Vec<RidIsa>,
}

#[derive(Debug, Serialize)]
pub struct GetIsaResponse {
    pub service_area: RidIsa,
}

#[derive(Debug, Serialize)]
pub struct PutIsaResponse {
    pub service_area: RidIsa,
    pub subscribers: Vec<WireSubscriberToNotify>,
}

#[derive(Debug, Serialize)]
pub struct GetRidSubscriptionResponse {
    pub subscription: RidSubscription,
}

#[derive(Debug, Serialize)]
pub struct PutRidSubscriptionResponse {
    pub subscription: RidSubscription,
    pub service_areas: Vec<RidIsa>,
}

#[derive(Debug, Serialize)]
pub struct SearchRidSubscriptionsResponse {
    pub subscriptions: Vec<RidSubscription>,
}

// ---------------------------------------------------------------------------
// SCD wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdTime {
    pub value: DateTime<Utc>,
    pub format: String,
}

pub fn scd_time(t: Option<DateTime<Utc>>) -> Option<ScdTime> {
    t.map(|value| ScdTime {
        value,
        format: TIME_FORMAT_RFC3339.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdAltitude {
    pub value: f64,
    pub reference: String,
    pub units: String,
}

impl ScdAltitude {
    fn try_into_meters(self) -> Result<f64, DssError> {
        if self.units != UNIT_METER {
            return Err(DssError::BadRequest(format!(
                "unsupported altitude units: {}",
                self.units
            )));
        }
        if self.reference != ALTITUDE_REFERENCE_W84 {
            return Err(DssError::BadRequest(format!(
                "unsupported altitude reference: {}",
                self.reference
            )));
        }
        Ok(self.value)
    }
}

pub fn scd_altitude(meters: Option<f64>) -> Option<ScdAltitude> {
    meters.map(|value| ScdAltitude {
        value,
        reference: ALTITUDE_REFERENCE_W84.to_string(),
        units: UNIT_METER.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRadius {
    pub value: f64,
    pub units: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireCircle {
    pub center: WirePoint,
    pub radius: WireRadius,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdVolume3D {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_polygon: Option<WirePolygon>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outline_circle: Option<WireCircle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_lower: Option<ScdAltitude>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_upper: Option<ScdAltitude>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdVolume4D {
    pub volume: ScdVolume3D,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<ScdTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_end: Option<ScdTime>,
}

impl ScdVolume4D {
    pub fn try_into_volume(self) -> Result<Volume4D, DssError> {
        let footprint = match (self.volume.outline_polygon, self.volume.outline_circle) {
            (Some(_), Some(_)) => {
                return Err(DssError::BadRequest(
                    "both circle and polygon specified in outline geometry".to_string(),
                ))
            }
            (Some(polygon), None) => Some(FootprintSource::Geometry(Footprint::Polygon(
                polygon.into_polygon(),
            ))),
            (None, Some(circle)) => {
                if circle.radius.units != UNIT_METER {
                    return Err(DssError::BadRequest(format!(
                        "unsupported radius units: {}",
                        circle.radius.units
                    )));
                }
                Some(FootprintSource::Geometry(Footprint::Circle(GeoCircle {
                    center: LatLng::new(circle.center.lat, circle.center.lng),
                    radius_m: circle.radius.value,
                })))
            }
            (None, None) => None,
        };

        Ok(Volume4D {
            starts_at: self.time_start.map(|t| t.value),
            ends_at: self.time_end.map(|t| t.value),
            altitude_lo: self
                .volume
                .altitude_lower
                .map(|a| a.try_into_meters())
                .transpose()?,
            altitude_hi: self
                .volume
                .altitude_upper
                .map(|a| a.try_into_meters())
                .transpose()?,
            footprint,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationalIntentReference {
    pub id: Uuid,
    pub manager: String,
    pub version: i32,
    pub state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ovn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<ScdTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<ScdTime>,
    pub uss_base_url: String,
    pub subscription_id: Uuid,
}

impl OperationalIntentReference {
    pub fn from_model(op: &OperationalIntent) -> OperationalIntentReference {
        OperationalIntentReference {
            id: op.id,
            manager: op.owner.0.clone(),
            version: op.version,
            state: op.state.as_str().to_string(),
            ovn: op.ovn.as_str().to_string(),
            time_start: scd_time(op.starts_at),
            time_end: scd_time(op.ends_at),
            uss_base_url: op.url.clone(),
            subscription_id: op.subscription_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintReference {
    pub id: Uuid,
    pub manager: String,
    pub version: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ovn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<ScdTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<ScdTime>,
    pub uss_base_url: String,
}

impl ConstraintReference {
    pub fn from_model(c: &Constraint) -> ConstraintReference {
        ConstraintReference {
            id: c.id,
            manager: c.owner.0.clone(),
            version: c.version,
            ovn: c.ovn.as_str().to_string(),
            time_start: scd_time(c.starts_at),
            time_end: scd_time(c.ends_at),
            uss_base_url: c.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdSubscription {
    pub id: Uuid,
    pub version: String,
    pub notification_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<ScdTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<ScdTime>,
    pub uss_base_url: String,
    pub notify_for_operational_intents: bool,
    pub notify_for_constraints: bool,
    pub implicit_subscription: bool,
}

impl ScdSubscription {
    pub fn from_model(sub: &Subscription) -> ScdSubscription {
        ScdSubscription {
            id: sub.id,
            version: sub.version.map(|v| v.to_string()).unwrap_or_default(),
            notification_index: sub.notification_index,
            time_start: scd_time(sub.starts_at),
            time_end: scd_time(sub.ends_at),
            uss_base_url: sub.url.clone(),
            notify_for_operational_intents: sub.notify_for_operations,
            notify_for_constraints: sub.notify_for_constraints,
            implicit_subscription: sub.implicit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdSubscriberToNotify {
    pub uss_base_url: String,
    pub subscriptions: Vec<SubscriptionState>,
}

pub fn scd_subscribers(subscribers: &[SubscriberToNotify]) -> Vec<ScdSubscriberToNotify> {
    subscribers
        .iter()
        .map(|s| ScdSubscriberToNotify {
            uss_base_url: s.url.clone(),
            subscriptions: s
                .subscriptions
                .iter()
                .map(|(id, index)| SubscriptionState {
                    subscription_id: *id,
                    notification_index: *index,
                })
                .collect(),
        })
        .collect()
}

// requests

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscriptionRequest {
    pub uss_base_url: String,
    #[serde(default)]
    pub notify_for_constraints: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PutIntentRequest {
    pub extents: Vec<ScdVolume4D>,
    #[serde(default)]
    pub key: Vec<String>,
    pub state: String,
    pub uss_base_url: String,
    #[serde(default)]
    pub subscription_id: Option<Uuid>,
    #[serde(default)]
    pub new_subscription: Option<NewSubscriptionRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PutConstraintRequest {
    pub extents: Vec<ScdVolume4D>,
    pub uss_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PutScdSubscriptionRequest {
    pub extents: ScdVolume4D,
    pub uss_base_url: String,
    #[serde(default)]
    pub notify_for_operational_intents: bool,
    #[serde(default)]
    pub notify_for_constraints: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryVolumeRequest {
    pub area_of_interest: ScdVolume4D,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetAvailabilityRequest {
    pub availability: String,
    #[serde(default)]
    pub old_version: String,
}

// responses

#[derive(Debug, Serialize)]
pub struct ChangeIntentResponse {
    pub operational_intent_reference: OperationalIntentReference,
    pub subscribers: Vec<ScdSubscriberToNotify>,
}

#[derive(Debug, Serialize)]
pub struct GetIntentResponse {
    pub operational_intent_reference: OperationalIntentReference,
}

#[derive(Debug, Serialize)]
pub struct QueryIntentsResponse {
    pub operational_intent_references: Vec<OperationalIntentReference>,
}

#[derive(Debug, Serialize)]
pub struct ChangeConstraintResponse {
    pub constraint_reference: ConstraintReference,
    pub subscribers: Vec<ScdSubscriberToNotify>,
}

#[derive(Debug, Serialize)]
pub struct GetConstraintResponse {
    pub constraint_reference: ConstraintReference,
}

#[derive(Debug, Serialize)]
pub struct QueryConstraintsResponse {
    pub constraint_references: Vec<ConstraintReference>,
}

#[derive(Debug, Serialize)]
pub struct PutScdSubscriptionResponse {
    pub subscription: ScdSubscription,
}

#[derive(Debug, Serialize)]
pub struct QueryScdSubscriptionsResponse {
    pub subscriptions: Vec<ScdSubscription>,
}

#[derive(Debug, Serialize)]
pub struct UssAvailabilityStatus {
    pub uss: String,
    pub availability: String,
}

#[derive(Debug, Serialize)]
pub struct UssAvailabilityStatusResponse {
    pub status: UssAvailabilityStatus,
    pub version: String,
}

pub fn availability_response(a: &UssAvailability) -> UssAvailabilityStatusResponse {
    UssAvailabilityStatusResponse {
        status: UssAvailabilityStatus {
            uss: a.uss_id.clone(),
            availability: a.status.as_str().to_string(),
        },
        version: a.version.map(|v| v.to_string()).unwrap_or_default(),
    }
}

#[derive(Debug, Serialize)]
pub struct MakeReportResponse {
    pub report_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_models::FootprintSource as Fs;

    #[test]
    fn scd_volume_with_circle_converts_to_model() {
        let json = serde_json::json!({
            "volume": {
                "outline_circle": {
                    "center": { "lat": 48.8566, "lng": 2.3522 },
                    "radius": { "value": 400.0, "units": "M" }
                },
                "altitude_lower": { "value": 0.0, "reference": "W84", "units": "M" },
                "altitude_upper": { "value": 120.0, "reference": "W84", "units": "M" }
            },
            "time_start": { "value": "2026-05-01T10:00:00Z", "format": "RFC3339" },
            "time_end": { "value": "2026-05-01T11:00:00Z", "format": "RFC3339" }
        });
        let wire: ScdVolume4D = serde_json::from_value(json).unwrap();
        let vol = wire.try_into_volume().unwrap();
        assert_eq!(vol.altitude_lo, Some(0.0));
        assert_eq!(vol.altitude_hi, Some(120.0));
        assert!(vol.starts_at.unwrap() < vol.ends_at.unwrap());
        match vol.footprint {
            Some(Fs::Geometry(Footprint::Circle(c))) => {
                assert_eq!(c.radius_m, 400.0);
            }
            other => panic!("expected a circle footprint, got {other:?}"),
        }
    }

    #[test]
    fn scd_volume_rejects_foreign_units_and_double_geometry() {
        let feet = serde_json::json!({
            "volume": {
                "altitude_lower": { "value": 100.0, "reference": "W84", "units": "FT" }
            }
        });
        let wire: ScdVolume4D = serde_json::from_value(feet).unwrap();
        assert!(wire.try_into_volume().is_err());

        let both = serde_json::json!({
            "volume": {
                "outline_polygon": { "vertices": [
                    { "lat": 0.0, "lng": 0.0 },
                    { "lat": 0.0, "lng": 1.0 },
                    { "lat": 1.0, "lng": 0.0 }
                ]},
                "outline_circle": {
                    "center": { "lat": 0.0, "lng": 0.0 },
                    "radius": { "value": 10.0, "units": "M" }
                }
            }
        });
        let wire: ScdVolume4D = serde_json::from_value(both).unwrap();
        assert!(wire.try_into_volume().is_err());
    }

    #[test]
    fn wire_shapes_round_trip_through_json() {
        let isa = RidIsa {
            id: Uuid::new_v4(),
            owner: "uss-a".to_string(),
            flights_url: "https://uss-a.example.com/flights".to_string(),
            time_start: Some("2026-05-01T10:00:00Z".parse().unwrap()),
            time_end: Some("2026-05-01T11:00:00Z".parse().unwrap()),
            version: "2026-05-01T09:59:59.123456Z".to_string(),
        };
        let back: RidIsa =
            serde_json::from_str(&serde_json::to_string(&isa).unwrap()).unwrap();
        assert_eq!(back.id, isa.id);
        assert_eq!(back.version, isa.version);
        assert_eq!(back.time_end, isa.time_end);

        let reference = OperationalIntentReference {
            id: Uuid::new_v4(),
            manager: "uss-a".to_string(),
            version: 3,
            state: "Activated".to_string(),
            ovn: "ZmFrZS1vdm4tZm9yLXJvdW5kLXRyaXAtdGVzdGluZw==".to_string(),
            time_start: scd_time(Some("2026-05-01T10:00:00Z".parse().unwrap())),
            time_end: scd_time(Some("2026-05-01T11:00:00Z".parse().unwrap())),
            uss_base_url: "https://uss-a.example.com/scd".to_string(),
            subscription_id: Uuid::new_v4(),
        };
        let back: OperationalIntentReference =
            serde_json::from_str(&serde_json::to_string(&reference).unwrap()).unwrap();
        assert_eq!(back.ovn, reference.ovn);
        assert_eq!(back.version, 3);
        assert_eq!(back.subscription_id, reference.subscription_id);
    }
}
