use clap::{App, Arg};
use thiserror::Error;
use tracing::info;

use crate::iface::{self, Interface};
use crate::prefix::{self, Family, PrefixTable};
use crate::worker;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parsing configured prefixes: {0}")]
    ConfigParse(#[from] prefix::Error),
    #[error("provisioning interface: {0}")]
    KernelControl(#[from] iface::Error),
    #[error("worker: {0}")]
    QueueIO(#[from] worker::Error),
}

pub fn run() -> Result<(), Error> {
    let (prefix_args, verbosity) = parse_args();
    init_logging(verbosity);

    let prefixes = PrefixTable::build(&prefix_args)?;
    // Leaked once at startup so every worker thread, spawned for the life
    // of the process, can borrow it without a reference-counting layer.
    let prefixes: &'static PrefixTable = Box::leak(Box::new(prefixes));

    let n_queues = worker::worker_count();
    let iface = Interface::create(n_queues)?;
    iface.bring_up()?;

    for block in prefixes.blocks() {
        let addr: &[u8] = match block.family {
            Family::V4 => &block.base[0..4],
            Family::V6 => &block.base[..],
        };
        iface.add_address(block.family, addr, block.prefix_len)?;
    }

    let index = iface.index()?;
    println!("Interface: {}", iface.name());
    println!("Index: {index}");
    println!("Threads: {n_queues}");
    info!(interface = %iface.name(), index, threads = n_queues, "started");

    // Kept alive for the rest of the function so the queue fds handed to
    // the workers stay open for as long as the threads using them run.
    let handles = worker::spawn_all(iface.queue_fds(), prefixes);

    for (cpu, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                worker::log_worker_failure(cpu, &err);
                return Err(Error::QueueIO(err));
            }
            Err(_) => panic!("worker thread {cpu} panicked"),
        }
    }

    Ok(())
}

fn parse_args() -> (Vec<String>, u8) {
    let matches = App::new("routechain")
        .arg(
            Arg::new("PREFIX")
                .takes_value(true)
                .multiple_values(true)
                .required(true)
                .help("address or CIDR block to absorb onto a synthetic hop chain"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("raise the log level (repeatable: info -> debug -> trace)"),
        )
        .about("Synthesises traceroute-hop ICMP replies for configured address blocks over a TUN interface")
        .version("0.1.0")
        .get_matches();

    let prefixes = matches
        .values_of("PREFIX")
        .expect("PREFIX is required")
        .map(str::to_string)
        .collect();
    let verbosity = matches.occurrences_of("verbose") as u8;

    (prefixes, verbosity)
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::{fmt, EnvFilter};
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}
