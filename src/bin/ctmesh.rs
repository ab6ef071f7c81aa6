//! Commandline utility to turn a CT slice series into an STL surface mesh.
//!
//! Reads a directory of slice images (or a 3D NIfTI file), prints the intensity
//! statistics of the volume, asks for a threshold unless one was given, runs
//! marching cubes at that threshold and writes the surface as an STL file.

use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::Level;

use ctmesh::pipeline::{self, VolumeInput};
use ctmesh::{
    CropRect, Direction, ExportOptions, ExtractOptions, IntensityStatistics, LoadOptions,
    PipelineConfig, PipelineError, PipelineResult, SeriesOptions, SeriesOrder, Spacing,
    StatisticsOptions, StlFormat, DEFAULT_SAMPLE_CAP,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Binary,
    Ascii,
}

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the input: a directory of slice images (tif, tiff, png, bmp) or a .nii/.nii.gz file
    #[arg(short, long)]
    input: PathBuf,

    /// the STL file to write; missing parent directories are created
    #[arg(short, long, default_value = "output_model.stl")]
    output: PathBuf,

    /// the intensity value to use as threshold. If not given, ctmesh prints the
    /// intensity statistics and asks for one.
    #[arg(short, long)]
    threshold: Option<f32>,

    /// binary or ASCII STL
    #[arg(short, long, value_enum, default_value_t = Format::Binary)]
    format: Format,

    /// only use slice images whose file names start with this string
    #[arg(long, default_value = "")]
    prefix: String,

    /// stack slices by the number in their file names instead of by name
    #[arg(long)]
    numeric: bool,

    /// crop every slice to the square with top-left corner X Y and side SIDE
    #[arg(long, num_args = 3, value_names = ["X", "Y", "SIDE"])]
    crop: Option<Vec<usize>>,

    /// voxel spacing as Z Y X (slice distance, row distance, column distance).
    /// Ignored for NIfTI input, which carries its own.
    #[arg(long, num_args = 3, value_names = ["Z", "Y", "X"])]
    spacing: Option<Vec<f64>>,

    /// Number for the axis to slice a NIfTI volume along:
    ///     0 -> X, 1 -> Y, 2 -> Z,
    ///     or 3 -> ctmesh will guess.
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=3))]
    axis: u8,

    /// maximum number of voxels sampled to find the most common intensity
    #[arg(long, default_value_t = DEFAULT_SAMPLE_CAP)]
    sample_cap: usize,

    /// seed for the intensity sampler, to reproduce an earlier run
    #[arg(long)]
    seed: Option<u64>,

    /// march slabs of the volume on all cores
    #[arg(long)]
    parallel: bool,

    /// the name stored in the STL file
    #[arg(long, default_value = "ctmesh")]
    name: String,

    /// print debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);
    if let Err(e) = convert(&args) {
        eprintln!("Error! {e}");
        std::process::exit(-2);
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .try_init();
}

fn build_config(args: &Args) -> PipelineResult<PipelineConfig> {
    let crop = args.crop.as_deref().and_then(|values| match *values {
        [x, y, side] => Some(CropRect::square(x, y, side)),
        _ => None,
    });
    let spacing = match args.spacing.as_deref() {
        Some(&[z, y, x]) => Spacing::new(z, y, x)?,
        _ => Spacing::unit(),
    };
    Ok(PipelineConfig {
        series: SeriesOptions {
            prefix: args.prefix.clone(),
            order: if args.numeric {
                SeriesOrder::Numeric
            } else {
                SeriesOrder::Lexicographic
            },
        },
        load: LoadOptions { crop, spacing },
        statistics: StatisticsOptions {
            sample_cap: args.sample_cap,
            seed: args.seed,
        },
        extract: ExtractOptions {
            parallel: args.parallel,
        },
        export: ExportOptions {
            format: match args.format {
                Format::Binary => StlFormat::Binary,
                Format::Ascii => StlFormat::Ascii,
            },
            name: args.name.clone(),
        },
        create_output_dir: true,
    })
}

fn convert(args: &Args) -> PipelineResult<()> {
    let config = build_config(args)?;

    let axis = Direction::from_usize(usize::from(args.axis));
    let input = VolumeInput::from_path(&args.input, axis);
    let report = pipeline::run(&config, &input, &args.output, |stats| {
        print_statistics(stats);
        match args.threshold {
            Some(threshold) => Ok(threshold),
            None => prompt_threshold(stats),
        }
    })?;

    let (depth, height, width) = report.dimensions;
    println!("Volume: {depth} slices of {width}x{height}");
    println!(
        "Mesh: {} vertices, {} faces at threshold {}",
        report.vertex_count, report.face_count, report.threshold
    );
    println!("STL file saved to {}", report.output.display());
    Ok(())
}

fn print_statistics(stats: &IntensityStatistics) {
    println!("Minimum intensity value: {}", stats.min);
    println!("Maximum intensity value: {}", stats.max);
    println!(
        "Most common intensity value: {} (from {} sampled voxels, seed {})",
        stats.mode, stats.sample_size, stats.seed
    );
}

/// Ask on stdin until a number inside the intensity range is entered.
fn prompt_threshold(stats: &IntensityStatistics) -> PipelineResult<f32> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    loop {
        print!(
            "Enter the intensity value to use as threshold (between {} and {}): ",
            stats.min, stats.max
        );
        io::stdout()
            .flush()
            .map_err(|e| PipelineError::write("stdout", e))?;

        let mut line = String::new();
        let read = input
            .read_line(&mut line)
            .map_err(|e| PipelineError::read("stdin", e))?;
        if read == 0 {
            return Err(PipelineError::malformed("stdin", "no threshold entered"));
        }
        match line.trim().parse::<f32>() {
            Ok(threshold) if (stats.min..=stats.max).contains(&threshold) => return Ok(threshold),
            Ok(threshold) => eprintln!(
                "{threshold} is outside the intensity range [{}, {}]",
                stats.min, stats.max
            ),
            Err(_) => eprintln!("'{}' is not a number", line.trim()),
        }
    }
}
