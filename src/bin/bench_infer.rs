//! bench_infer - time raw inference through an ExecutionContext

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use rtvideo::{ExecutionContext, Timer};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Engine file to load.
    model: PathBuf,
    /// Timed iterations.
    #[arg(long, default_value_t = 100)]
    iterations: u32,
    /// Untimed iterations run first.
    #[arg(long, default_value_t = 5)]
    warmup: u32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.iterations == 0 {
        return Err(anyhow!("iterations must be >= 1"));
    }

    let mut context = ExecutionContext::on_host(&args.model);
    context.open()?;
    let input_len = context.inputs()?[0].byte_len();
    for output in context.outputs()? {
        log::info!("output {} {:?}", output.name(), output.shape());
    }
    let input = vec![0u8; input_len];

    for _ in 0..args.warmup {
        context.infer(&input)?;
    }

    let timer = Timer::new();
    for _ in 0..args.iterations {
        let span = timer.span("infer");
        context.infer(&input)?;
        span.finish();
    }
    context.close()?;

    print!("{}", timer.report());
    Ok(())
}
