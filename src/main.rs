//! ptxinfo
//!
//! Inspect a per-face texture file through the texture cache.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          ptxinfo                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌────────────┐  │
//! │  │    Cache     │───▶│    Reader    │───▶│  Summary   │  │
//! │  │ (limits from │    │ (header,     │    │ (text or   │  │
//! │  │  flags/env)  │    │  faces, meta)│    │  JSON)     │  │
//! │  └──────────────┘    └──────────────┘    └────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use serde::Serialize;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ptex_cache::{
    BorderMode, Cache, CacheConfig, CacheStats, Error, FaceInfo, MetaValue, Reader, ReaderStats,
    Result, Sections,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ptxinfo - Inspect per-face texture files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Texture file to inspect
    path: String,

    /// List per-face resolution, flags and adjacency
    #[arg(long)]
    faces: bool,

    /// List metadata keys and values
    #[arg(long)]
    metadata: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Maximum number of open files held by the cache
    #[arg(long, env = "PTEX_MAX_FILES", default_value = "100")]
    max_files: usize,

    /// Maximum bytes of cached texture data
    #[arg(long, env = "PTEX_MAX_MEM", default_value = "104857600")]
    max_mem: usize,

    /// Colon separated directories searched for relative paths
    #[arg(long, env = "PTEX_SEARCH_PATH", default_value = "")]
    search_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Summary
// =============================================================================

#[derive(Debug, Serialize)]
struct Summary {
    path: String,
    mesh_type: String,
    data_type: String,
    num_channels: usize,
    alpha_channel: Option<usize>,
    num_faces: u32,
    num_levels: u16,
    has_edits: bool,
    has_mip_maps: bool,
    u_border_mode: BorderMode,
    v_border_mode: BorderMode,
    sections: Sections,
    #[serde(skip_serializing_if = "Option::is_none")]
    faces: Option<Vec<FaceSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Vec<MetaEntrySummary>>,
    reader: ReaderStats,
    cache: CacheStats,
}

#[derive(Debug, Serialize)]
struct FaceSummary {
    id: u32,
    #[serde(flatten)]
    info: FaceInfo,
}

#[derive(Debug, Serialize)]
struct MetaEntrySummary {
    key: String,
    data_type: String,
    count: usize,
    value: Option<MetaValue>,
}

fn summarize(args: &Args, cache: &Cache, reader: &Reader) -> Result<Summary> {
    let faces = if args.faces {
        let faces = (0..reader.num_faces())
            .map(|id| reader.face_info(id).map(|info| FaceSummary { id, info }))
            .collect::<Result<Vec<_>>>()?;
        Some(faces)
    } else {
        None
    };

    let metadata = if args.metadata {
        let meta = reader.meta_data()?;
        let mut entries = Vec::with_capacity(meta.num_keys());
        for index in 0..meta.num_keys() {
            if let Some((key, data_type, count)) = meta.key_info(index) {
                entries.push(MetaEntrySummary {
                    key: key.to_string(),
                    data_type: data_type.to_string(),
                    count,
                    value: meta.value(key)?,
                });
            }
        }
        Some(entries)
    } else {
        None
    };

    Ok(Summary {
        path: reader.path().to_string(),
        mesh_type: reader.mesh_type().to_string(),
        data_type: reader.data_type().to_string(),
        num_channels: reader.num_channels(),
        alpha_channel: reader.alpha_channel(),
        num_faces: reader.num_faces(),
        num_levels: reader.num_levels(),
        has_edits: reader.has_edits(),
        has_mip_maps: reader.has_mip_maps(),
        u_border_mode: reader.u_border_mode(),
        v_border_mode: reader.v_border_mode(),
        sections: reader.sections(),
        faces,
        metadata,
        reader: reader.stats(),
        cache: cache.stats(),
    })
}

fn print_text(summary: &Summary) {
    println!("{}", summary.path);
    println!("  mesh type:     {}", summary.mesh_type);
    println!("  data type:     {}", summary.data_type);
    println!("  channels:      {}", summary.num_channels);
    match summary.alpha_channel {
        Some(alpha) => println!("  alpha channel: {}", alpha),
        None => println!("  alpha channel: none"),
    }
    println!("  faces:         {}", summary.num_faces);
    println!("  levels:        {}", summary.num_levels);
    println!("  mip maps:      {}", summary.has_mip_maps);
    println!("  edits:         {}", summary.has_edits);
    println!(
        "  border modes:  {:?} / {:?}",
        summary.u_border_mode, summary.v_border_mode
    );

    if let Some(faces) = &summary.faces {
        println!("faces:");
        for face in faces {
            let info = &face.info;
            let mut flags = Vec::new();
            if info.is_constant() {
                flags.push("constant");
            }
            if info.has_edits() {
                flags.push("edited");
            }
            if info.is_subface() {
                flags.push("subface");
            }
            println!(
                "  {:>6}  {:>9}  adj {:?}  {}",
                face.id,
                info.res.to_string(),
                info.adj_faces,
                flags.join(",")
            );
        }
    }

    if let Some(entries) = &summary.metadata {
        println!("metadata:");
        for entry in entries {
            let value = match &entry.value {
                Some(MetaValue::Str(s)) => format!("{:?}", s),
                Some(MetaValue::I8(v)) => format!("{:?}", v),
                Some(MetaValue::I16(v)) => format!("{:?}", v),
                Some(MetaValue::I32(v)) => format!("{:?}", v),
                Some(MetaValue::F32(v)) => format!("{:?}", v),
                Some(MetaValue::F64(v)) => format!("{:?}", v),
                None => "-".to_string(),
            };
            println!(
                "  {} ({} x{}): {}",
                entry.key, entry.data_type, entry.count, value
            );
        }
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    let config = CacheConfig {
        max_files: args.max_files,
        max_mem: args.max_mem,
        ..CacheConfig::default()
    }
    .with_search_path_str(&args.search_path);

    let cache = Cache::new(config)?;
    let reader = cache.get(&args.path).map_err(|e| {
        error!("Failed to open {}: {}", args.path, e);
        e
    })?;
    info!(path = %reader.path(), faces = reader.num_faces(), "Opened texture");

    let summary = summarize(&args, &cache, &reader)?;
    if args.json {
        let out = serde_json::to_string_pretty(&summary)
            .map_err(|e| Error::Config(format!("JSON output failed: {}", e)))?;
        println!("{}", out);
    } else {
        print_text(&summary);
    }

    reader.release();
    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
