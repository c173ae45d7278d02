use std::cmp;
use std::error::Error;
use std::time::Instant;

use clap::Parser;

use shmring::producer::{Producer, ProducerConfig};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmring-producer.toml")]
    config: String,
    #[clap(short = 'n', long = "items")]
    items: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let mut cfg: ProducerConfig = confy::load_path(&opts.config)?;
    if let Some(items) = opts.items {
        cfg.items = items;
    }
    let producer = &mut Producer::new(&cfg)?;
    run(producer)?;
    Ok(())
}

fn run(producer: &mut Producer) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let produced = producer.run()?;
    let duration = start.elapsed();
    println!("Producer: production done, {} items", produced);
    let iops = ((produced as f64) / (cmp::max(duration.as_millis(), 1) as f64)) * 1_000f64;
    println!(
        "{:#?}K items produced/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
    Ok(())
}
