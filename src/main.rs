//! superstep: BSP runtime demo

use std::env;

use anyhow::Context;
use superstep::config::{Capacities, Config};
use superstep::device::LocalAddr;
use superstep::engine::{drive, BspProgram, Coordinator, Superstep};
use superstep::error::BspResult;
use superstep::host::Host;
use superstep::runtime::BspCore;

/// Registered slot receiving the left neighbour's token.
const TOKEN: LocalAddr = LocalAddr(0x100);
/// Scratch word used as put source.
const SCRATCH: LocalAddr = LocalAddr(0x200);
/// Tag width used from the second superstep on.
const TAG_SIZE: usize = 4;

/// Pass a token around the ring with puts, then answer with messages.
#[derive(Default)]
struct RingExchange {
    received: u32,
    replies: usize,
    /// Calls that failed; each is already in the mailbox.
    errors: usize,
}

impl RingExchange {
    fn check<T>(&mut self, pid: usize, what: &str, result: BspResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                log::warn!("pid {}: {} failed: {}", pid, what, err);
                self.errors += 1;
                None
            }
        }
    }
}

impl BspProgram for RingExchange {
    fn superstep(&mut self, core: &mut BspCore, step: u64) -> Superstep {
        let n = core.nprocs();
        let pid = core.pid();
        let next = (pid + 1) % n;
        let prev = (pid + n - 1) % n;

        match step {
            0 => {
                let result = core.register(TOKEN, 4);
                self.check(pid, "register", result);
                core.set_tag_size(TAG_SIZE);
                Superstep::Sync
            }
            1 => {
                let result = core.write_local_u32(SCRATCH, 1000 + pid as u32);
                if self.check(pid, "write", result).is_some() {
                    let result = core.put(next, SCRATCH, TOKEN, 0, 4);
                    self.check(pid, "put", result);
                }
                Superstep::Sync
            }
            2 => {
                let result = core.read_local_u32(TOKEN);
                self.received = self.check(pid, "read", result).unwrap_or_default();
                let tag = (pid as u32).to_le_bytes();
                let result = core.send(prev, &tag, &self.received.to_le_bytes());
                self.check(pid, "send", result);
                Superstep::Sync
            }
            _ => {
                let stats = core.queue_stats();
                let mut buf = [0u8; 4];
                loop {
                    let result = core.consume(&mut buf);
                    match self.check(pid, "consume", result) {
                        Some(Some(_)) => self.replies += 1,
                        _ => break,
                    }
                }
                println!(
                    "pid {:2}: token {} from pid {}, {} repl{} ({} bytes), {} failed call{}",
                    pid,
                    self.received,
                    prev,
                    self.replies,
                    if self.replies == 1 { "y" } else { "ies" },
                    stats.bytes,
                    self.errors,
                    if self.errors == 1 { "" } else { "s" }
                );
                Superstep::Finish
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--sample-config") {
        print!("{}", Config::sample_config());
        return Ok(());
    }

    let mut threads = false;
    let mut print_config = false;
    let mut dump = false;
    let mut nprocs = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--threads" | "-t" => threads = true,
            "--print-config" => print_config = true,
            "--dump" => dump = true,
            "--nprocs" | "-n" => {
                let value = iter.next().context("--nprocs needs a value")?;
                nprocs = Some(value.parse::<usize>().context("invalid --nprocs")?);
            }
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }

    let mut caps = Config::get().capacities()?;
    if let Some(n) = nprocs {
        caps.nprocs = n;
        caps.validate()?;
    }

    if print_config {
        print_capacities(&caps);
        return Ok(());
    }

    if threads {
        run_threads(caps)
    } else {
        run_simulated(caps, dump)
    }
}

fn run_simulated(caps: Capacities, dump: bool) -> anyhow::Result<()> {
    println!("Running ring exchange on {} simulated processes", caps.nprocs);
    println!();

    let mut engine = Coordinator::new(caps)?;
    let mut programs: Vec<RingExchange> = (0..caps.nprocs).map(|_| RingExchange::default()).collect();
    let steps = engine.run(&mut programs)?;

    println!();
    println!("{} supersteps, {} diagnostics", steps, engine.reports().len());
    for report in engine.reports() {
        println!("  {}", report);
    }

    if dump {
        println!();
        for pid in 0..engine.nprocs() {
            let memory = engine.region().core(pid)?;
            println!(
                "core {}: {} bytes written, {} bytes read",
                pid,
                memory.total_bytes_written(),
                memory.total_bytes_read()
            );
            print!("{}", memory.hexdump(TOKEN.0, 16)?);
        }
    }
    Ok(())
}

fn run_threads(caps: Capacities) -> anyhow::Result<()> {
    println!("Running ring exchange on {} threads", caps.nprocs);
    println!();

    let host = Host::new(caps)?;
    let report = host.run(|core| {
        drive(core, &mut RingExchange::default());
    })?;

    println!();
    println!(
        "{} supersteps, {} diagnostics",
        report.supersteps.first().copied().unwrap_or_default(),
        report.errors.len()
    );
    for error in &report.errors {
        println!("  {}", error);
    }
    Ok(())
}

fn print_capacities(caps: &Capacities) {
    println!("Capacities");
    println!("==========");
    println!("  processes:          {}", caps.nprocs);
    println!("  requests/process:   {}", caps.max_requests);
    println!("  payload arena:      {} bytes", caps.payload_size);
    println!("  messages/queue:     {}", caps.max_messages);
    println!("  queue arena:        {} bytes", caps.queue_payload_size);
    println!("  registered vars:    {}", caps.max_vars);
    println!("  core memory:        {} bytes", caps.core_memory_size);
    println!("  initial tag size:   {}", caps.initial_tag_size);
    println!("  debug handshake:    {}", caps.debug_handshake);
    if let Some(path) = Config::user_config_path() {
        println!();
        println!("User config: {}", path.display());
    }
}

fn print_usage() {
    println!("Usage: superstep [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -t, --threads        Run one OS thread per process");
    println!("  -n, --nprocs N       Number of processes");
    println!("      --dump           Hexdump each core's token slot after a simulated run");
    println!("      --print-config   Show effective capacities and exit");
    println!("      --sample-config  Print a sample config file and exit");
    println!("  -h, --help           Show this help");
}
