//! Quadmesh CLI - field-aligned quad remeshing.
//!
//! Usage: quadmesh -i <INPUT> -o <OUTPUT> [OPTIONS]
//!
//! Run `quadmesh --help` for available options. Set `RUST_LOG=debug` for
//! per-level solver output.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use quadmesh::algo::Progress;
use quadmesh::{Config, Remesher};

#[derive(Parser)]
#[command(name = "quadmesh")]
#[command(author, version, about = "Field-aligned quad remeshing", long_about = None)]
struct Cli {
    /// Input triangle mesh (OBJ, PLY or STL)
    #[arg(short, long)]
    input: PathBuf,

    /// Output quad mesh (OBJ or PLY)
    #[arg(short, long)]
    output: PathBuf,

    /// Target number of quads; negative infers it from the input
    #[arg(short = 'f', long, default_value = "-1", allow_negative_numbers = true)]
    faces: i64,

    /// Preserve sharp creases as feature lines
    #[arg(short = 's', long)]
    sharp: bool,

    /// Adapt the quad size to curvature
    #[arg(short = 'a', long)]
    adaptive: bool,

    /// Use min-cost flow for singularity removal
    #[arg(short = 'm', long)]
    mcf: bool,

    /// Use the constraint search for topology repair
    #[arg(short = 'S', long)]
    sat: bool,

    /// Seed for field initialization
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Use single-threaded execution (for benchmarking)
    #[arg(long)]
    sequential: bool,

    /// Hide the progress bar
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let config = Config::default()
            .with_preserve_sharp(self.sharp)
            .with_adaptive_scale(self.adaptive)
            .with_minimum_cost_flow(self.mcf)
            .with_aggressive_sat(self.sat)
            .with_seed(self.seed)
            .with_parallel(!self.sequential);
        if self.faces > 0 {
            config.with_target_faces(self.faces as usize)
        } else {
            config.with_inferred_target()
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.config();
    let progress = if cli.quiet { Progress::none() } else { create_progress() };
    let mut remesher = Remesher::new(config).with_progress(progress);

    remesher.load(&cli.input)?;
    if let Some(mesh) = remesher.input() {
        println!("Loaded: {} vertices, {} faces", mesh.num_vertices(), mesh.num_faces());
    }

    let start = Instant::now();
    remesher.initialize()?;
    let report = remesher.run()?;
    let elapsed = start.elapsed();

    println!(
        "Hierarchy: {} levels over {} faces",
        report.hierarchy_levels, report.working_faces
    );
    println!(
        "Singularities: {} orientation (index {}), {} position",
        report.orientation_singularities, report.orientation_index, report.position_singularities
    );
    println!(
        "Repair: {} -> {} invalid faces, {} quads rerouted",
        report.repair.initial_invalid, report.repair.final_invalid, report.rerouted_quads
    );
    if !report.orientation_converged || !report.position_converged {
        println!("Note: field relaxation stopped at the sweep limit");
    }
    println!(
        "Result: {} vertices, {} quads, {} irregular vertices",
        report.output_vertices, report.output_faces, report.irregular_vertices
    );
    if report.singularity_links.unlinked > 0 {
        println!(
            "Note: {} singularities have no irregular vertex nearby",
            report.singularity_links.unlinked
        );
    }

    remesher.write(&cli.output)?;
    println!("Saved: {} ({:.2?})", cli.output.display(), elapsed);

    Ok(())
}

/// Create a progress reporter that displays a progress bar on the terminal.
fn create_progress() -> Progress {
    let max_percent = Arc::new(AtomicUsize::new(0));

    Progress::new(move |current, total, message| {
        if total == 0 {
            return;
        }

        let raw_percent = if current >= total {
            100
        } else {
            ((current * 100) + (total / 2)) / total
        };

        // Solver levels and pipeline stages share the callback; only move forward.
        let previous = max_percent.fetch_max(raw_percent, Ordering::Relaxed);
        if raw_percent <= previous && raw_percent != 100 {
            return;
        }

        let bar_width = 30;
        let filled = (raw_percent * bar_width) / 100;
        let bar = "=".repeat(filled);
        let space = " ".repeat(bar_width - filled);
        eprint!("\r[{}{}] {:3}% {:<28}", bar, space, raw_percent, message);
        let _ = std::io::stderr().flush();

        if current >= total {
            eprintln!();
            max_percent.store(0, Ordering::Relaxed);
        }
    })
}
