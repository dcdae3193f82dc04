//! Corrected coordinates entered by the user
//!
//! The editor half stores a coordinate override in the waypoint's extension
//! slot; the stage half moves every waypoint that carries one.

use crate::utils::{haversine_distance, is_valid_coordinate, plural};
use crate::{
    Capabilities, Document, ExecutionOrder, ExtensionData, Granularity, PipelineError, Result,
    StageContext, Transformer, TransformerId, Waypoint, WaypointEditor,
};
use std::collections::BTreeMap;

pub const COORDINATE_OVERRIDE_ID: &str = "coordinate-override";

const LAT_KEY: &str = "lat";
const LON_KEY: &str = "lon";

#[derive(Default)]
pub struct CoordinateOverride;

impl CoordinateOverride {
    pub fn new() -> Self {
        Self
    }

    /// Parse `"lat,lon"` or `"lat lon"` in decimal degrees
    pub fn parse(input: &str) -> Result<(f64, f64)> {
        let parts: Vec<&str> = input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        let [lat, lon] = parts.as_slice() else {
            return Err(PipelineError::InvalidEdit(format!(
                "expected 'lat,lon', got '{input}'"
            )));
        };

        let number = |s: &str| {
            s.parse::<f64>()
                .map_err(|e| PipelineError::InvalidEdit(format!("'{s}': {e}")))
        };
        let (lat, lon) = (number(*lat)?, number(*lon)?);
        if !is_valid_coordinate(lat, lon) {
            return Err(PipelineError::InvalidEdit(format!(
                "coordinates out of range: {lat}, {lon}"
            )));
        }
        Ok((lat, lon))
    }

    /// Stored override of a waypoint, if it carries a well-formed one
    fn stored(waypoint: &Waypoint) -> Option<Result<(f64, f64)>> {
        let data = waypoint.extension(&TransformerId::new(COORDINATE_OVERRIDE_ID))?;
        let ExtensionData::Record(record) = data else {
            return Some(Err(PipelineError::InvalidEdit(
                "coordinate override is not a record".to_string(),
            )));
        };
        let (Some(lat), Some(lon)) = (record.get(LAT_KEY), record.get(LON_KEY)) else {
            return Some(Err(PipelineError::InvalidEdit(
                "coordinate override misses lat or lon".to_string(),
            )));
        };
        Some(Self::parse(&format!("{lat},{lon}")))
    }
}

impl WaypointEditor for CoordinateOverride {
    fn slot(&self) -> TransformerId {
        TransformerId::new(COORDINATE_OVERRIDE_ID)
    }

    fn edit(&self, waypoint: &mut Waypoint, input: &str) -> Result<()> {
        let (lat, lon) = Self::parse(input)?;
        let mut record = BTreeMap::new();
        record.insert(LAT_KEY.to_string(), lat.to_string());
        record.insert(LON_KEY.to_string(), lon.to_string());
        waypoint.set_extension(self.slot(), ExtensionData::Record(record));
        Ok(())
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for CoordinateOverride {
    fn id(&self) -> TransformerId {
        TransformerId::new(COORDINATE_OVERRIDE_ID)
    }

    fn title(&self) -> &str {
        "Apply corrected coordinates"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::APPLY_EDITS
    }

    fn granularity(&self) -> Granularity {
        Granularity::FileSet
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            editor: true,
            ..Default::default()
        }
    }

    fn as_editor(&self) -> Option<&dyn WaypointEditor> {
        Some(self)
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        let mut moved = 0;
        let mut seen = 0;
        for document in documents.iter_mut() {
            for waypoint in document.waypoints.iter_mut() {
                ctx.poll_cancelled(seen)?;
                seen += 1;

                match Self::stored(waypoint) {
                    None => {}
                    Some(Ok((lat, lon))) => {
                        let distance =
                            haversine_distance(waypoint.latitude, waypoint.longitude, lat, lon);
                        tracing::debug!("Moving {} by {:.0} m", waypoint.name, distance);
                        waypoint.latitude = lat;
                        waypoint.longitude = lon;
                        moved += 1;
                    }
                    Some(Err(e)) => ctx.warn(format!("Ignoring override of {}: {}", waypoint.name, e)),
                }
            }
        }

        if moved > 0 {
            ctx.info(format!(
                "Moved {} to corrected coordinates",
                plural(moved, "cache", "caches")
            ));
        }
        Ok(())
    }
}
