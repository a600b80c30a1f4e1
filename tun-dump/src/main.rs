#![cfg_attr(not(windows), allow(dead_code))]

use clap::Parser;
use tracing::error;

mod stats;

#[derive(Parser, Debug)]
#[command(name = "tun-dump")]
#[command(about = "Open a TUN interface and dump the packets crossing it", long_about = None)]
struct Args {
    /// Interface name to create
    #[arg(short, long, default_value = "tun0")]
    name: String,

    /// IPv4 address to assign to the interface
    #[arg(long, value_name = "ADDR")]
    ipv4: Option<std::net::Ipv4Addr>,

    /// Prefix length for --ipv4
    #[arg(long, default_value_t = 24)]
    prefix: u8,

    /// dump raw packet contents
    #[arg(short, long)]
    dump_packet: bool,

    /// print statistics at the end
    #[arg(short, long)]
    stats: bool,

    /// stop after this many packets (0 = run until interrupted)
    #[arg(short, long, default_value_t = 0)]
    count: u64,
}

fn main() {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        error!("tun-dump failed: {}", e);
        std::process::exit(1);
    }
}

#[cfg(windows)]
fn run(args: &Args) -> Result<(), String> {
    use tracing::info;
    use tun_strata::alloc::HeapAllocator;
    use tun_strata::backend::wintun::{IpHelperConfigurator, WintunBackend};
    use tun_strata::device::{DeviceError, TunDevice};

    let backend = WintunBackend::load().map_err(|e| format!("failed to load wintun: {e}"))?;
    let mut device = TunDevice::open(&backend, &args.name)
        .map_err(|e| format!("failed to open {}: {e}", args.name))?;
    info!("opened interface {}", device.name());

    if let Some(address) = args.ipv4 {
        device
            .set_ipv4_address(&IpHelperConfigurator, address, args.prefix)
            .map_err(|e| format!("failed to assign {address}/{}: {e}", args.prefix))?;
        info!("assigned {}/{} to {}", address, args.prefix, device.name());
    }

    let alloc = HeapAllocator;
    let mut stats = stats::Stats::default();
    let start = std::time::Instant::now();
    let mut processed = 0u64;

    loop {
        let packet = match device.read_packet(&alloc) {
            Ok(packet) => packet,
            Err(DeviceError::Packet(e)) => {
                stats.malformed += 1;
                error!("dropped inbound packet: {}", e);
                continue;
            }
            Err(e) => return Err(format!("read failed: {e}")),
        };
        processed += 1;
        stats.record(&packet);

        let now = chrono::Utc::now();
        println!("{} #{} {}", now.format("%H:%M:%S%.6f"), processed, packet);
        if args.dump_packet {
            println!("        {:02x?}", packet.as_bytes());
        }

        if args.count != 0 && processed >= args.count {
            break;
        }
    }

    if args.stats {
        println!("{stats}");
    }
    info!(
        "Total packets processed: {}, {:.3}K pkt/sec",
        processed,
        (processed as f64 / start.elapsed().as_secs_f64()) / 1_000.0
    );
    Ok(())
}

#[cfg(not(windows))]
fn run(args: &Args) -> Result<(), String> {
    Err(format!(
        "cannot open '{}': the wintun backend is only available on Windows",
        args.name
    ))
}
