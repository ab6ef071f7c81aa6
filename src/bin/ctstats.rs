//! Commandline utility to print the intensity statistics of a CT slice series.
//!
//! Shows the minimum, maximum and most common intensity together with a text
//! histogram of the sampled voxels, to help choose a threshold for ctmesh.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use tracing::Level;

use ctmesh::pipeline::{load_input, VolumeInput};
use ctmesh::{
    compute_statistics_with, CropRect, Direction, Histogram, LoadOptions, PipelineConfig,
    PipelineResult, SeriesOptions, SeriesOrder, StatisticsOptions, DEFAULT_SAMPLE_CAP,
};

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// the input: a directory of slice images (tif, tiff, png, bmp) or a .nii/.nii.gz file
    #[arg(short, long)]
    input: PathBuf,

    /// only use slice images whose file names start with this string
    #[arg(long, default_value = "")]
    prefix: String,

    /// stack slices by the number in their file names instead of by name
    #[arg(long)]
    numeric: bool,

    /// crop every slice to the square with top-left corner X Y and side SIDE
    #[arg(long, num_args = 3, value_names = ["X", "Y", "SIDE"])]
    crop: Option<Vec<usize>>,

    /// Number for the axis to slice a NIfTI volume along:
    ///     0 -> X, 1 -> Y, 2 -> Z,
    ///     or 3 -> ctstats will guess.
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=3))]
    axis: u8,

    /// maximum number of voxels sampled to find the most common intensity
    #[arg(long, default_value_t = DEFAULT_SAMPLE_CAP)]
    sample_cap: usize,

    /// seed for the intensity sampler
    #[arg(long)]
    seed: Option<u64>,

    /// number of histogram rows to print (the 256 bins are merged to fit)
    #[arg(short, long, default_value_t = 32)]
    rows: usize,

    /// width of the longest histogram bar in characters
    #[arg(short, long, default_value_t = 60)]
    width: usize,

    /// print debug output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .try_init();

    if let Err(e) = report(&args) {
        eprintln!("Error! {e}");
        std::process::exit(-2);
    }
}

fn report(args: &Args) -> PipelineResult<()> {
    let config = PipelineConfig {
        series: SeriesOptions {
            prefix: args.prefix.clone(),
            order: if args.numeric {
                SeriesOrder::Numeric
            } else {
                SeriesOrder::Lexicographic
            },
        },
        load: LoadOptions {
            crop: args.crop.as_deref().and_then(|values| match *values {
                [x, y, side] => Some(CropRect::square(x, y, side)),
                _ => None,
            }),
            ..Default::default()
        },
        statistics: StatisticsOptions {
            sample_cap: args.sample_cap,
            seed: args.seed,
        },
        ..Default::default()
    };

    let input = VolumeInput::from_path(&args.input, Direction::from_usize(usize::from(args.axis)));
    let volume = load_input(&input, &config)?;
    let stats = compute_statistics_with(&volume, &config.statistics)?;

    let (depth, height, width) = volume.dim();
    let bit_depth = volume.bit_depth();
    match bit_depth.max_value() {
        Some(max) => {
            println!("Volume: {depth} slices of {width}x{height}, {bit_depth} (0 to {max})")
        }
        None => println!("Volume: {depth} slices of {width}x{height}, {bit_depth}"),
    }
    println!("Minimum intensity value: {}", stats.min);
    println!("Maximum intensity value: {}", stats.max);
    println!("Most common intensity value: {}", stats.mode);
    let exactness = if stats.is_exact(&volume) { "all" } else { "a sample of" };
    println!(
        "Mode taken from {exactness} {} voxels (seed {})",
        stats.sample_size, stats.seed
    );
    println!();
    print_histogram(&stats.histogram, args.rows, args.width);
    Ok(())
}

/// Merge the bins into `rows` rows and draw one bar per row.
fn print_histogram(histogram: &Histogram, rows: usize, width: usize) {
    let bins = histogram.counts.len();
    let per_row = bins.div_ceil(rows.clamp(1, bins));
    let merged: Vec<(f32, u64)> = histogram
        .counts
        .chunks(per_row)
        .enumerate()
        .map(|(row, counts)| (histogram.bin_start(row * per_row), counts.iter().sum()))
        .collect();
    let tallest = merged.iter().map(|&(_, count)| count).max().unwrap_or(0).max(1);

    for (start, count) in merged {
        let bar = (count as u128 * width as u128 / u128::from(tallest)) as usize;
        println!("{start:>12.2} | {:<width$} {count}", "#".repeat(bar));
    }
}
