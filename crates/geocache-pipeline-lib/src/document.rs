//! Document model
//!
//! In-memory representation of a GPX file as seen by the pipeline: document
//! metadata, an ordered list of waypoints, the optional geocache facet and the
//! typed extension slots that stages use to stash per-waypoint state.

use crate::{Result, TransformerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use time::OffsetDateTime;

/// Prefix of the GPX `<type>` element for waypoints that carry a geocache
const GEOCACHE_TYPE_PREFIX: &str = "Geocache|";
/// Status flags appended to the geocache `<type>`
const DISABLED_FLAG: &str = "disabled";
const ARCHIVED_FLAG: &str = "archived";

/// One logical GPX file's worth of waypoints plus metadata
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Original file name, used as the document identity
    pub file_name: Option<String>,
    /// Creation or last refresh time of the whole file
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub created: Option<OffsetDateTime>,
    /// Waypoints in file order
    pub waypoints: Vec<Waypoint>,
}

/// A named point of interest, optionally carrying geocache data
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Waypoint code, e.g. `GC12345`
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub comment: Option<String>,
    pub description: Option<String>,
    pub symbol: Option<String>,
    /// Present only if the waypoint represents a geocache
    pub geocache: Option<Geocache>,
    /// Per-transformer extension slots
    #[serde(default)]
    pub extensions: BTreeMap<TransformerId, ExtensionData>,
    /// Last refresh time of this waypoint, preferred over the document time
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub refreshed: Option<OffsetDateTime>,
}

/// Geocache-specific data attached to a waypoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geocache {
    pub name: String,
    pub available: bool,
    pub archived: bool,
    pub cache_type: String,
    pub hints: Option<String>,
    pub short_description: Option<String>,
    pub long_description: Option<String>,
    pub personal_note: Option<String>,
    #[serde(default)]
    pub logs: Vec<Log>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// A single log entry of a geocache
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Log {
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub date: Option<OffsetDateTime>,
    pub kind: String,
    pub finder: String,
    pub text: String,
}

/// A geocache attribute, e.g. "dogs allowed" (inclusive) or "no dogs" (exclusive)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub inclusive: bool,
}

/// Opaque extension data stored in a waypoint slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExtensionData {
    Text(String),
    Bytes(Vec<u8>),
    Record(BTreeMap<String, String>),
}

impl Geocache {
    /// Create a geocache facet with only the required fields set
    pub fn new(name: impl Into<String>, cache_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            archived: false,
            cache_type: cache_type.into(),
            hints: None,
            short_description: None,
            long_description: None,
            personal_note: None,
            logs: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// A cache is disabled if it is temporarily unavailable or archived
    #[inline]
    pub fn is_disabled(&self) -> bool {
        !self.available || self.archived
    }
}

impl Waypoint {
    /// Create a plain waypoint
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
            comment: None,
            description: None,
            symbol: None,
            geocache: None,
            extensions: BTreeMap::new(),
            refreshed: None,
        }
    }

    /// Attach a geocache facet
    pub fn with_geocache(mut self, geocache: Geocache) -> Self {
        self.geocache = Some(geocache);
        self
    }

    /// Set the last refresh time
    pub fn with_refreshed(mut self, refreshed: OffsetDateTime) -> Self {
        self.refreshed = Some(refreshed);
        self
    }

    #[inline]
    pub fn is_geocache(&self) -> bool {
        self.geocache.is_some()
    }

    /// Case-insensitive identity used for dedup and backup lookups
    #[inline]
    pub fn code(&self) -> String {
        self.name.to_uppercase()
    }

    #[inline]
    pub fn point(&self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }

    pub fn extension(&self, id: &TransformerId) -> Option<&ExtensionData> {
        self.extensions.get(id)
    }

    pub fn set_extension(&mut self, id: TransformerId, data: ExtensionData) {
        self.extensions.insert(id, data);
    }

    pub fn remove_extension(&mut self, id: &TransformerId) -> Option<ExtensionData> {
        self.extensions.remove(id)
    }

    /// Convert from a GPX waypoint
    ///
    /// Waypoints whose `<type>` is `Geocache|<cache type>[|disabled][|archived]`
    /// get a geocache facet. For geocaches the description is the cache name.
    pub fn from_gpx(waypoint: &gpx::Waypoint) -> Self {
        let point = waypoint.point();
        let geocache = waypoint
            .type_
            .as_deref()
            .and_then(|t| t.strip_prefix(GEOCACHE_TYPE_PREFIX))
            .map(|type_| {
                let mut parts = type_.split('|');
                let cache_type = parts.next().unwrap_or_default();
                let name = waypoint
                    .description
                    .clone()
                    .or_else(|| waypoint.name.clone())
                    .unwrap_or_default();
                let mut geocache = Geocache::new(name, cache_type);
                for flag in parts {
                    match flag {
                        DISABLED_FLAG => geocache.available = false,
                        ARCHIVED_FLAG => geocache.archived = true,
                        other => tracing::debug!("Ignoring unknown geocache flag {:?}", other),
                    }
                }
                geocache
            });

        Self {
            name: waypoint.name.clone().unwrap_or_default(),
            latitude: point.y(),
            longitude: point.x(),
            comment: waypoint.comment.clone(),
            description: waypoint.description.clone(),
            symbol: waypoint.symbol.clone(),
            geocache,
            extensions: BTreeMap::new(),
            refreshed: waypoint.time.map(OffsetDateTime::from),
        }
    }

    /// Convert into a GPX waypoint; extension slots are never written
    ///
    /// A geocache always writes its name as the description.
    pub fn to_gpx(&self) -> gpx::Waypoint {
        let mut waypoint = gpx::Waypoint::new(self.point());
        waypoint.name = Some(self.name.clone());
        waypoint.comment = self.comment.clone();
        waypoint.description = self.description.clone();
        waypoint.symbol = self.symbol.clone();
        waypoint.time = self.refreshed.map(gpx::Time::from);
        if let Some(geocache) = &self.geocache {
            let mut type_ = format!("{GEOCACHE_TYPE_PREFIX}{}", geocache.cache_type);
            if !geocache.available {
                type_ = format!("{type_}|{DISABLED_FLAG}");
            }
            if geocache.archived {
                type_ = format!("{type_}|{ARCHIVED_FLAG}");
            }
            waypoint.type_ = Some(type_);
            waypoint.description = Some(geocache.name.clone());
        }
        waypoint
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Document {
    /// Create an empty document
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            created: None,
            waypoints: Vec::new(),
        }
    }

    pub fn with_created(mut self, created: OffsetDateTime) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_waypoints(mut self, waypoints: Vec<Waypoint>) -> Self {
        self.waypoints = waypoints;
        self
    }

    /// Build a document from parsed GPX data
    pub fn from_gpx(file_name: Option<String>, gpx_data: &gpx::Gpx) -> Self {
        let created = gpx_data
            .metadata
            .as_ref()
            .and_then(|m| m.time)
            .map(OffsetDateTime::from);

        Self {
            file_name,
            created,
            waypoints: gpx_data.waypoints.iter().map(Waypoint::from_gpx).collect(),
        }
    }

    /// Read a document from a GPX stream
    pub fn read_gpx<R: std::io::Read>(file_name: Option<String>, reader: R) -> Result<Self> {
        let gpx_data = gpx::read(reader)?;
        Ok(Self::from_gpx(file_name, &gpx_data))
    }

    /// Canonical GPX form of this document, independent of pipeline internals
    pub fn to_gpx(&self) -> gpx::Gpx {
        let metadata = gpx::Metadata {
            name: self.file_name.clone(),
            time: self.created.map(gpx::Time::from),
            ..Default::default()
        };

        gpx::Gpx {
            version: gpx::GpxVersion::Gpx11,
            creator: Some(env!("CARGO_PKG_NAME").to_string()),
            metadata: Some(metadata),
            waypoints: self.waypoints.iter().map(Waypoint::to_gpx).collect(),
            ..Default::default()
        }
    }

    /// Serialize the canonical GPX form
    pub fn write_gpx<W: Write>(&self, writer: W) -> Result<()> {
        gpx::write(&self.to_gpx(), writer)?;
        Ok(())
    }

    /// Number of waypoints with a geocache facet
    pub fn geocache_count(&self) -> usize {
        self.waypoints.iter().filter(|w| w.is_geocache()).count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Name used in status messages
    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("<unnamed>")
    }
}
