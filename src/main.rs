use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use aruco_estimator::camera::View;
use aruco_estimator::config::LocalizerConfig;
use aruco_estimator::detection::{ArucoDetector, ArucoDictionary, MarkerId};
use aruco_estimator::geometry::Sim3;
use aruco_estimator::io::{self, ColmapProject, TagExport};
use aruco_estimator::localizer::{
    ArucoLocalizer, AxisConvention, Localization, localize_all_markers, normalization_transform,
    scale_convergence,
};

#[derive(Parser)]
#[command(name = "aruco-estimator")]
#[command(about = "Recover metric scale and a marker-centered origin for COLMAP reconstructions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scale the reconstruction to metric units using the marker size.
    Scale {
        #[command(flatten)]
        common: CommonArgs,

        /// Write the scale estimate for 2..N images to this CSV file.
        #[arg(long)]
        convergence_csv: Option<PathBuf>,
    },

    /// Move the origin to the marker center and align the axes with the marker.
    Normalize {
        #[command(flatten)]
        common: CommonArgs,

        /// Also apply the metric scale.
        #[arg(long)]
        apply_scale: bool,

        /// Export all marker positions as JSON (default: <project>/aruco_tags.json).
        #[arg(long, num_args = 0..=1)]
        export_tags: Option<Option<PathBuf>>,

        #[arg(long, value_enum)]
        axis_convention: Option<AxisConventionArg>,
    },

    /// Print how the scale estimate evolves as images are added.
    Analyze {
        #[command(flatten)]
        common: CommonArgs,

        /// Also write the table to this CSV file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// COLMAP project directory (with images/ and sparse/).
    project: PathBuf,

    /// YAML configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Marker edge length in meters.
    #[arg(long)]
    marker_size: Option<f64>,

    /// ArUco dictionary, e.g. 4x4_50 or 6x6_250.
    #[arg(long)]
    dictionary: Option<ArucoDictionary>,

    /// Use this marker instead of the most frequently detected one.
    #[arg(long)]
    target_id: Option<MarkerId>,

    /// Maximum number of detection threads.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Downscale images by this factor before detection, in (0, 1].
    #[arg(long)]
    detection_scale: Option<f64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AxisConventionArg {
    MarkerPlane,
    Nerfstudio,
}

impl From<AxisConventionArg> for AxisConvention {
    fn from(value: AxisConventionArg) -> Self {
        match value {
            AxisConventionArg::MarkerPlane => AxisConvention::MarkerPlane,
            AxisConventionArg::Nerfstudio => AxisConvention::Nerfstudio,
        }
    }
}

impl CommonArgs {
    fn config(&self) -> Result<LocalizerConfig> {
        let mut config = match &self.config {
            Some(path) => LocalizerConfig::from_yaml_file(path)?,
            None => LocalizerConfig::default(),
        };
        if let Some(v) = self.marker_size {
            config.marker_size = v;
        }
        if let Some(v) = self.dictionary {
            config.dictionary = v;
        }
        if let Some(v) = self.target_id {
            config.target_id = Some(v);
        }
        if let Some(v) = self.max_workers {
            config.max_workers = v;
        }
        if let Some(v) = self.detection_scale {
            config.detection_scale = v;
        }
        config.validate()?;
        Ok(config)
    }
}

struct Session {
    config: LocalizerConfig,
    project: ColmapProject,
    views: Vec<View>,
}

impl Session {
    fn open(common: &CommonArgs) -> Result<Self> {
        let config = common.config()?;
        let project = ColmapProject::open(&common.project, &config)?;
        let views = project.views()?;
        Ok(Self {
            config,
            project,
            views,
        })
    }

    fn localize(&self) -> Result<Localization> {
        let detector = ArucoDetector::new(self.config.dictionary, self.config.detection_scale);
        let localization = ArucoLocalizer::new(&detector, &self.views, &self.config).run()?;
        Ok(localization)
    }

    fn scale_factor(&self, localization: &Localization) -> Result<f64> {
        let s = localization
            .estimate
            .scale_factor(self.config.marker_size, self.config.min_marker_size)?;
        Ok(s)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scale {
            common,
            convergence_csv,
        } => run_scale(&common, convergence_csv.as_deref()),
        Commands::Normalize {
            common,
            apply_scale,
            export_tags,
            axis_convention,
        } => run_normalize(&common, apply_scale, export_tags, axis_convention),
        Commands::Analyze { common, output } => run_analyze(&common, output.as_deref()),
    }
}

fn run_scale(common: &CommonArgs, convergence_csv: Option<&Path>) -> Result<()> {
    let session = Session::open(common)?;
    let localization = session.localize()?;
    let scale_factor = session.scale_factor(&localization)?;

    let scaled = session.project.reconstruction.scaled(scale_factor)?;

    let out_dir = session.project.root.join("sparse_scaled");
    io::write_model(&scaled, &out_dir)?;
    io::write_scale_factor(&out_dir.join("scale_factor.txt"), scale_factor)?;
    if let Some(dense) = &scaled.dense {
        let ply_path = session.project.root.join("scaled.ply");
        io::write_ply(&ply_path, dense)?;
        info!("Wrote scaled dense cloud to {:?}", ply_path);
    }

    if let Some(path) = convergence_csv {
        let samples = scale_convergence(
            &localization.bundles,
            session.config.marker_size,
            session.config.max_condition,
            session.config.min_marker_size,
        )?;
        io::write_convergence_csv(path, &samples)?;
        info!("Wrote convergence table to {:?}", path);
    }

    println!(
        "Marker {}: measured size {:.6}, scale factor {:.6} ({} views)",
        localization.estimate.marker_id,
        localization.estimate.measured_size,
        scale_factor,
        localization.estimate.num_views
    );
    println!("Scaled model written to {:?}", out_dir);
    Ok(())
}

fn run_normalize(
    common: &CommonArgs,
    apply_scale: bool,
    export_tags: Option<Option<PathBuf>>,
    axis_convention: Option<AxisConventionArg>,
) -> Result<()> {
    let mut session = Session::open(common)?;
    if let Some(convention) = axis_convention {
        session.config.axis_convention = convention.into();
    }
    let localization = session.localize()?;

    // Scale first, then normalize using the scaled corners.
    let pre = if apply_scale {
        Sim3::scaling(session.scale_factor(&localization)?)
    } else {
        Sim3::identity()
    };
    let corners = localization.estimate.corners.map(|c| pre.transform_point(&c));
    let normalization = normalization_transform(&corners, session.config.axis_convention)?;
    let transform = normalization.compose(&pre);

    let normalized = session.project.reconstruction.normalized(&transform)?;
    let out_dir = session.project.root.join("normalized").join("sparse");
    io::write_model(&normalized, &out_dir)?;
    info!("Normalized model written to {:?}", out_dir);

    if let Some(path) = export_tags {
        let path = path.unwrap_or_else(|| session.project.root.join("aruco_tags.json"));
        let marker_size = session.config.marker_size;
        let target_id = localization.detection.marker_id;
        let mut export = TagExport::new(marker_size, target_id);
        let mat = transform.to_matrix();
        for (id, estimate) in localize_all_markers(
            &session.views,
            &localization.detection,
            session.config.max_condition,
        ) {
            export.insert_transformed(id, &estimate.corners, &mat)?;
        }
        export.write(&path)?;
        println!("Exported {} marker(s) to {:?}", export.aruco_tags.len(), path);
    }

    println!(
        "Marker {} is now the origin{}",
        localization.estimate.marker_id,
        if apply_scale { " (metric scale applied)" } else { "" }
    );
    Ok(())
}

fn run_analyze(common: &CommonArgs, output: Option<&Path>) -> Result<()> {
    let session = Session::open(common)?;
    let localization = session.localize()?;

    let samples = scale_convergence(
        &localization.bundles,
        session.config.marker_size,
        session.config.max_condition,
        session.config.min_marker_size,
    )
    .context("Failed to compute the convergence table")?;

    println!("{:>10}  {:>14}  {:>14}", "images", "marker size", "scale factor");
    for s in &samples {
        println!(
            "{:>10}  {:>14.6}  {:>14.6}",
            s.num_views, s.measured_size, s.scale_factor
        );
    }

    if let Some(path) = output {
        io::write_convergence_csv(path, &samples)?;
        info!("Wrote convergence table to {:?}", path);
    }
    Ok(())
}
