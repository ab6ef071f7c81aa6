//! Commandline utility to lay the first slices of a CT series out in one image.
//!
//! The slices share one intensity range stretched to 8 bits, so the grid
//! shows at a glance what a series holds before it is meshed.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use tracing::Level;

use ctmesh::{
    montage_series, save_montage, CropRect, LoadOptions, MontageOptions, PipelineResult,
    SeriesOptions, SeriesOrder,
};

// use clap to create commandline interface
#[derive(Parser, Debug)]
#[command(author, about, version, long_about)]
struct Args {
    /// directory of slice images (tif, tiff, png, bmp)
    #[arg(short, long)]
    input: PathBuf,

    /// the montage image; the extension picks the format (png, tif, bmp)
    #[arg(short, long, default_value = "grid.png")]
    output: PathBuf,

    /// number of tile rows
    #[arg(short, long, default_value_t = 4)]
    rows: usize,

    /// number of tile columns
    #[arg(short, long, default_value_t = 4)]
    cols: usize,

    /// factor to resize every tile by (bicubic)
    #[arg(short, long, default_value_t = 1.0)]
    scale: f64,

    /// only use slice images whose file names start with this string
    #[arg(long, default_value = "")]
    prefix: String,

    /// order slices by the number in their file names instead of by name
    #[arg(long)]
    numeric: bool,

    /// crop every slice to the square with top-left corner X Y and side SIDE
    #[arg(long, num_args = 3, value_names = ["X", "Y", "SIDE"])]
    crop: Option<Vec<usize>>,

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

    if let Err(e) = render(&args) {
        eprintln!("Error! {e}");
        std::process::exit(-2);
    }
}

fn render(args: &Args) -> PipelineResult<()> {
    let series = SeriesOptions {
        prefix: args.prefix.clone(),
        order: if args.numeric {
            SeriesOrder::Numeric
        } else {
            SeriesOrder::Lexicographic
        },
    };
    let load = LoadOptions {
        crop: args.crop.as_deref().and_then(|values| match *values {
            [x, y, side] => Some(CropRect::square(x, y, side)),
            _ => None,
        }),
        ..Default::default()
    };
    let options = MontageOptions {
        rows: args.rows,
        cols: args.cols,
        scale: args.scale,
    };

    let grid = montage_series(&args.input, &series, &load, &options)?;
    save_montage(&grid, &args.output)?;
    println!(
        "Wrote {}x{} montage of {} rows and {} columns to {}",
        grid.width(),
        grid.height(),
        options.rows,
        options.cols,
        args.output.display()
    );
    Ok(())
}
