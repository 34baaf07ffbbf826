use clap::Parser;
use laplace_fill_core::{Method, Reconstruction, RgbaImage, SampleBrush, SolverConfig};
use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::process::ExitCode;

/// Reconstruct a synthetic image from brush strokes and report convergence
#[derive(Parser, Debug)]
#[command(name = "laplace-fill-demo")]
#[command(about = "Headless Laplace fill reconstruction demo", long_about = None)]
struct Args {
    /// Solver method (jacobi, sor, cg, multigrid)
    #[arg(short, long, default_value = "multigrid")]
    method: Method,

    /// Grid side length (power of two)
    #[arg(short, long, default_value_t = 256)]
    size: usize,

    /// Number of ticks to run
    #[arg(short, long, default_value_t = 200)]
    ticks: u64,

    /// Print a report every N ticks
    #[arg(short, long, default_value_t = 20)]
    report_interval: u64,

    /// Jacobi damping weight
    #[arg(long, default_value_t = 1.0)]
    weight: f32,

    /// SOR relaxation factor, also used by the multigrid smoother
    #[arg(long, default_value_t = 1.9)]
    omega: f32,

    /// Multigrid smoothing sweeps per level
    #[arg(long, default_value_t = 2)]
    n_smooth: usize,

    /// Multigrid sweeps on the coarsest level
    #[arg(long, default_value_t = 10)]
    n_solve: usize,

    /// Multigrid coarsest level side
    #[arg(long, default_value_t = 8)]
    min_size: usize,

    /// Brush strokes applied before the first tick
    #[arg(long, default_value_t = 40)]
    strokes: usize,

    /// Samples per brush stroke
    #[arg(long, default_value_t = 10)]
    brush_count: usize,

    /// Brush spread in normalized units
    #[arg(long, default_value_t = 0.05)]
    brush_sigma: f32,

    /// Apply one extra stroke every N ticks (0 = never)
    #[arg(long, default_value_t = 0)]
    stroke_every: u64,

    /// Random seed for stroke placement
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Try the GPU backend first
    #[arg(long)]
    gpu: bool,
}

impl Args {
    fn config(&self) -> SolverConfig {
        let mut config = SolverConfig::new(self.size, self.method);
        config.jacobi.weight = self.weight;
        config.sor.omega = self.omega;
        config.multigrid.n_smooth = self.n_smooth;
        config.multigrid.n_solve = self.n_solve;
        config.multigrid.min_size = self.min_size;
        config.multigrid.omega = self.omega;
        config.prefer_gpu = self.gpu;
        config
    }
}

/// Smooth colour ramp with a bright disc, so both harmonic and sharp
/// content show up in the reconstruction
fn synthetic_image(size: usize) -> RgbaImage {
    let span = (size.max(2) - 1) as f32;
    RgbaImage::from_fn(size, size, |x, y| {
        let u = x as f32 / span;
        let v = y as f32 / span;
        let disc = ((u - 0.6).powi(2) + (v - 0.4).powi(2)).sqrt() < 0.15;
        let to_byte = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        if disc {
            [255, 240, 200, 255]
        } else {
            [to_byte(u), to_byte(v), to_byte(1.0 - 0.5 * (u + v)), 255]
        }
    })
}

fn stroke(
    recon: &mut Reconstruction,
    brush: &SampleBrush,
    rng: &mut StdRng,
    image: &RgbaImage,
) -> usize {
    let center = Vector2::new(rng.random::<f32>(), rng.random::<f32>());
    let samples = brush.scatter(rng, center, image);
    let count = samples.len();
    recon.queue_samples(samples);
    count
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();

    println!("=== Laplace Fill Demo ===\n");

    let mut recon = match Reconstruction::new(args.config()) {
        Ok(recon) => recon,
        Err(err) => {
            eprintln!("Failed to create reconstruction: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Created {}x{} reconstruction using {} ({})",
        recon.size(),
        recon.size(),
        recon.method(),
        if recon.is_gpu_accelerated() { "gpu" } else { "cpu" }
    );

    let image = synthetic_image(args.size);
    let brush = SampleBrush {
        count: args.brush_count,
        sigma: args.brush_sigma,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut queued = 0;
    for _ in 0..args.strokes {
        queued += stroke(&mut recon, &brush, &mut rng, &image);
    }
    println!("Queued {queued} samples from {} strokes\n", args.strokes);

    println!("{:>8} {:>8} {:>14} {:>14} {:>10}", "tick", "inserted", "residual", "rms", "ms");
    for tick in 0..args.ticks {
        if args.stroke_every > 0 && tick > 0 && tick % args.stroke_every == 0 {
            stroke(&mut recon, &brush, &mut rng, &image);
        }

        let report = match recon.tick() {
            Ok(report) => report,
            Err(err) => {
                eprintln!("Tick {tick} failed: {err}");
                return ExitCode::FAILURE;
            }
        };

        let last = tick + 1 == args.ticks;
        if args.report_interval > 0 && (tick % args.report_interval == 0 || last) {
            let norms = recon
                .residual_norm()
                .and_then(|norm| recon.rms_residual().map(|rms| (norm, rms)));
            match norms {
                Ok((norm, rms)) => println!(
                    "{:>8} {:>8} {:>14.6e} {:>14.6e} {:>10.3}",
                    report.tick, report.inserted, norm, rms, report.elapsed_ms
                ),
                Err(err) => {
                    eprintln!("Residual readback failed: {err}");
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    let timer = recon.timer();
    println!(
        "\n{} ticks, mean {:.3}ms, peak {:.3}ms",
        timer.frames(),
        timer.mean_frame_time_ms(),
        timer.peak_frame_time_ms()
    );
    ExitCode::SUCCESS
}
