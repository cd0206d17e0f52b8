use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use layer_atlas_lib::importer::parse_timestamp_str;
use layer_atlas_lib::{ExportFormat, FeatureSelection, GeometryKind, LayerId, WGS84_SRID};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Layer Atlas - manage feature layers, query them spatially and exchange them as GeoJSON
pub struct Settings {
    /// Store snapshot file (defaults to the user configuration directory)
    #[clap(long, env = "LAYER_ATLAS_STORE", value_name = "FILE")]
    pub store: Option<PathBuf>,

    /// JSON configuration file
    #[clap(long, env = "LAYER_ATLAS_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory import file names are resolved against
    #[clap(long, value_name = "DIR")]
    pub import_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List layers with their feature counts
    Layers,

    /// Create an empty layer
    CreateLayer {
        name: String,

        /// Declared geometry kind (informational)
        #[clap(long, default_value = "Geometry")]
        kind: GeometryKind,

        #[clap(long, default_value_t = WGS84_SRID)]
        srid: u32,
    },

    /// Delete a layer and all its features
    DeleteLayer { layer_id: LayerId },

    /// Add one feature from a GeoJSON geometry
    AddFeature {
        layer_id: LayerId,

        /// GeoJSON geometry object or WKT, e.g. 'POINT(2.35 48.85)'
        #[clap(long)]
        geometry: String,

        /// Attributes as a JSON object
        #[clap(long)]
        properties: Option<String>,

        #[clap(long, value_parser = parse_datetime)]
        valid_from: Option<DateTime<Utc>>,

        #[clap(long, value_parser = parse_datetime)]
        valid_to: Option<DateTime<Utc>>,
    },

    /// Import a GeoJSON FeatureCollection from the import directory
    Import {
        /// File name inside the import directory
        file_name: Option<String>,

        /// Append to this existing layer
        #[clap(long, conflicts_with = "layer_name")]
        layer_id: Option<LayerId>,

        /// Name of the layer to create
        #[clap(long)]
        layer_name: Option<String>,
    },

    /// Filtered, paginated features of a layer
    Query {
        #[clap(flatten)]
        selection: SelectionArgs,

        #[clap(long)]
        page: Option<usize>,

        #[clap(long)]
        page_size: Option<usize>,
    },

    /// Clustered display items of a layer
    Clusters {
        layer_id: LayerId,

        #[clap(long)]
        zoom: Option<f64>,

        /// minLon,minLat,maxLon,maxLat
        #[clap(long)]
        bbox: Option<String>,

        #[clap(long, value_name = "METERS")]
        radius: Option<f64>,
    },

    /// Write a filtered layer to a GeoJSON or CSV file
    Export {
        #[clap(flatten)]
        selection: SelectionArgs,

        #[clap(long, default_value = "geojson")]
        format: ExportFormat,

        #[clap(long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },

    /// Count and polygon area of a filtered layer
    Stats {
        #[clap(flatten)]
        selection: SelectionArgs,
    },
}

/// Filters shared by query, export and stats
#[derive(Args, Debug, Clone, PartialEq)]
pub struct SelectionArgs {
    pub layer_id: LayerId,

    /// minLon,minLat,maxLon,maxLat
    #[clap(long)]
    pub bbox: Option<String>,

    /// intersects (default) or within
    #[clap(long)]
    pub operation: Option<String>,

    #[clap(long, value_name = "METERS")]
    pub buffer: Option<f64>,

    #[clap(long, value_parser = parse_datetime)]
    pub valid_from: Option<DateTime<Utc>>,

    #[clap(long, value_parser = parse_datetime)]
    pub valid_to: Option<DateTime<Utc>>,
}

impl From<SelectionArgs> for FeatureSelection {
    fn from(args: SelectionArgs) -> Self {
        Self {
            layer_id: args.layer_id,
            bbox: args.bbox,
            operation: args.operation,
            buffer_meters: args.buffer,
            valid_from: args.valid_from,
            valid_to: args.valid_to,
        }
    }
}

fn parse_datetime(text: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp_str(text).ok_or_else(|| format!("'{}' is not a date or date-time", text))
}

impl Settings {
    /// Parse the process arguments, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }
}
