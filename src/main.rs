#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;

use stk500_sim::{Bootloader, Error, Options};

#[derive(Clone, Debug, StructOpt)]
#[structopt(
    name = "stk500-sim",
    after_help = "e.g.:  stk500-sim /dev/ttyS0\n       stk500-sim /dev/pts/0 9600"
)]
pub struct Args {
    /// Serial port (tty or pts device) to attach to
    port: Option<String>,

    /// Serial port baud rate
    #[structopt(default_value = "57600")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

fn main() -> anyhow::Result<()> {
    // Parse out arguments
    let o = Args::from_args();

    let port = match &o.port {
        Some(p) => p.clone(),
        None => {
            let _ = Args::clap().print_help();
            println!();
            return Ok(());
        }
    };

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    let shutdown = Arc::new(AtomicBool::new(false));
    let s = shutdown.clone();
    ctrlc::set_handler(move || s.store(true, Ordering::SeqCst))
        .context("installing interrupt handler")?;

    info!("Opening serial port {} at {} baud", port, o.baud);

    let mut b = Bootloader::linux(&port, o.baud, o.options)
        .with_context(|| format!("opening serial port {}", port))?
        .with_shutdown(shutdown);

    info!("Awaiting programmer");

    match b.run() {
        Ok(()) => (),
        Err(Error::Interrupted) => info!("Interrupted, closing serial port"),
        Err(e) => return Err(e).context("serial port failure"),
    }

    // Close the port
    drop(b.into_inner());

    Ok(())
}
