use std::cmp;
use std::error::Error;
use std::time::Instant;

use clap::Parser;

use shmring::consumer::{Consumer, ConsumerConfig};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmring-consumer.toml")]
    config: String,
    #[clap(long = "id")]
    id: Option<u32>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let opts: Opts = Opts::parse();
    let mut cfg: ConsumerConfig = confy::load_path(&opts.config)?;
    if let Some(id) = opts.id {
        cfg.id = id;
    }
    let consumer = &mut Consumer::new(&cfg)?;
    run(consumer)?;
    Ok(())
}

fn run(consumer: &mut Consumer) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let consumed = consumer.run()?;
    let duration = start.elapsed();
    println!("Consumer {} consumed {} items", consumer.id(), consumed);
    let iops = ((consumed as f64) / (cmp::max(duration.as_millis(), 1) as f64)) * 1_000f64;
    println!(
        "{:#?}K items consumed/s. Total time: {:#?}",
        (iops / 1000f64) as u64,
        duration
    );
    Ok(())
}
