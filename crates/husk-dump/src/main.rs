//! husk-dump - read the K701's ROM over the diagnostic bus
//!
//! Unlocks SecurityAccess, then sweeps ReadMemoryByAddress from address
//! zero: probing forward through unreadable regions on timeouts,
//! adaptively shrinking the chunk size when the ECU reports
//! `requestOutOfRange` near a boundary, and declaring the end of ROM
//! once even single-byte reads are rejected. The result lands in
//! `rom.bin` next to a `.size` file with the discovered length.
//!
//! Uses the kernel CAN_ISOTP socket; the dumper moves big blocks and the
//! kernel's flow control handles them better than a 50 ms poll loop.

use std::path::PathBuf;
use std::time::Duration;

#[cfg(target_os = "linux")]
use std::fs::File;
#[cfg(target_os = "linux")]
use std::io::Write;
#[cfg(target_os = "linux")]
use std::sync::Arc;

#[cfg(target_os = "linux")]
use anyhow::Context;
use clap::Parser;
use tracing::info;
#[cfg(target_os = "linux")]
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Starting request size; adapts down near the end of ROM.
const INITIAL_CHUNK: usize = 0x20;
const MIN_CHUNK: usize = 1;

const TESTER_PRESENT_PERIOD: Duration = Duration::from_secs(2);

/// Reads probing past the ROM boundary simply time out; keep the per
/// request deadline short.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Method {
    /// ReadMemoryByAddress sweep with boundary discovery
    Rmba,
    /// RequestUpload / TransferData block transfer (needs --size)
    Upload,
}

#[derive(Debug, Parser)]
#[command(name = "husk-dump", about = "K701 ROM dumper", version)]
struct Args {
    /// CAN interface name
    #[arg(long = "socket-can-address", default_value = "can0")]
    socket_can_address: String,

    /// Output file for the ROM image
    #[arg(long, default_value = "rom.bin")]
    output: PathBuf,

    /// SecurityAccess level to unlock before reading
    #[arg(long, default_value_t = 3)]
    security_level: u8,

    /// Transfer method
    #[arg(long, value_enum, default_value_t = Method::Rmba)]
    method: Method,

    /// ROM size in bytes; required by the upload method, which cannot
    /// discover the boundary itself
    #[arg(long)]
    size: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "husk_dump=info,husk_uds=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!(interface = %args.socket_can_address, "starting ROM dump");

    run(args).await
}

#[cfg(not(target_os = "linux"))]
async fn run(_args: Args) -> anyhow::Result<()> {
    anyhow::bail!("husk-dump requires Linux (kernel CAN_ISOTP socket)")
}

#[cfg(target_os = "linux")]
async fn run(args: Args) -> anyhow::Result<()> {
    use husk_uds::transport::kernel::KernelIsoTp;
    use husk_uds::wire::{CAN_ID_REQUEST, CAN_ID_RESPONSE};
    use husk_uds::UdsClient;

    let transport = KernelIsoTp::new(
        &args.socket_can_address,
        CAN_ID_REQUEST as u16,
        CAN_ID_RESPONSE as u16,
    )
    .with_context(|| format!("opening CAN_ISOTP on {}", args.socket_can_address))?;

    let client = Arc::new(UdsClient::new(Arc::new(transport)).with_request_timeout(READ_TIMEOUT));

    handshake(&client, args.security_level)
        .await
        .context("security handshake failed")?;

    // Keep the session alive for the whole sweep. The client's bus mutex
    // keeps this from interleaving with an in-flight read.
    let keepalive = {
        let client = client.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TESTER_PRESENT_PERIOD);
            loop {
                ticker.tick().await;
                if let Err(e) = client.tester_present().await {
                    warn!(error = %e, "tester present failed");
                }
            }
        })
    };

    let result = match args.method {
        Method::Rmba => dump_rom(&client, &args.output).await,
        Method::Upload => {
            let size = args
                .size
                .context("--size is required with the upload method")?;
            dump_rom_upload(&client, &args.output, size).await
        }
    };
    keepalive.abort();
    result
}

#[cfg(target_os = "linux")]
async fn handshake(client: &husk_uds::UdsClient, level: u8) -> anyhow::Result<()> {
    let seed = client.request_seed(level).await.context("seed request")?;
    let key = husk_ecu::generate_key(level, seed)?;

    let mut last_error = None;
    for attempt in 1..=3 {
        match client.send_key(level, key).await {
            Ok(()) => {
                info!(level, "security access granted");
                return Ok(());
            }
            Err(e) => {
                warn!(level, attempt, error = %e, "key rejected");
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
    Err(anyhow::anyhow!(
        "key rejected: {}",
        last_error.expect("at least one attempt")
    ))
}

#[cfg(target_os = "linux")]
async fn dump_rom(client: &husk_uds::UdsClient, output: &PathBuf) -> anyhow::Result<()> {
    let mut rom = File::create(output)
        .with_context(|| format!("creating {}", output.display()))?;

    let mut address: usize = 0;
    let mut chunk = INITIAL_CHUNK;
    let mut last_good: usize = 0;
    let mut rom_start_logged = false;
    let mut shrunk_near_end = false;

    loop {
        match client.read_memory_by_address(address as u32, chunk).await {
            Ok(data) if data.is_empty() => {
                // Positive but empty near a boundary; shrink and retry.
                let previous = chunk;
                chunk = shrink_chunk(chunk).max(MIN_CHUNK);
                if previous != chunk {
                    debug!(address = format!("{address:#08x}"), previous, chunk, "empty read, shrinking");
                }
                shrunk_near_end = true;
            }
            Ok(data) => {
                if !rom_start_logged {
                    info!(address = format!("{address:#08x}"), "ROM start");
                    rom_start_logged = true;
                }
                rom.write_all(&data).context("writing rom image")?;
                debug!(
                    from = format!("{address:#08x}"),
                    len = data.len(),
                    "read chunk"
                );
                last_good = address + data.len();
                address = last_good;

                // After a shrink we may be sitting on the boundary; probe
                // a single byte to confirm.
                if shrunk_near_end {
                    match client.read_memory_by_address(address as u32, MIN_CHUNK).await {
                        Ok(_) => {} // not the end yet, keep sweeping
                        Err(e) if e.is_out_of_range() || e.is_transient() => {
                            return finish(rom, output, last_good);
                        }
                        Err(e) => return Err(e).context("boundary probe"),
                    }
                }
            }
            Err(e) if e.is_out_of_range() => {
                let previous = chunk;
                chunk = shrink_chunk(chunk).max(MIN_CHUNK);
                if previous != chunk {
                    info!(
                        address = format!("{address:#08x}"),
                        previous, chunk, "out of range, shrinking chunk"
                    );
                }
                if chunk == MIN_CHUNK {
                    return finish(rom, output, last_good);
                }
                shrunk_near_end = true;
            }
            Err(e) if e.is_transient() => {
                // Nothing mapped here yet; probe forward to find the
                // first readable region.
                address += chunk;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read at {address:#08x}"));
            }
        }
    }
}

/// Pull a known-size ROM through the upload family: one RequestUpload,
/// TransferData blocks with a wrapping counter, RequestTransferExit at
/// the end.
#[cfg(target_os = "linux")]
async fn dump_rom_upload(
    client: &husk_uds::UdsClient,
    output: &PathBuf,
    size: usize,
) -> anyhow::Result<()> {
    let mut rom = File::create(output)
        .with_context(|| format!("creating {}", output.display()))?;

    let max_block = client
        .request_upload(0, size)
        .await
        .context("RequestUpload rejected")?;
    info!(size, max_block, "upload session accepted");

    let mut received: usize = 0;
    let mut counter: u8 = 1;
    while received < size {
        let (echo, data) = client
            .transfer_data_upload(counter)
            .await
            .with_context(|| format!("TransferData block {counter}"))?;
        anyhow::ensure!(
            echo == counter,
            "block counter mismatch: sent {counter}, ECU echoed {echo}"
        );
        anyhow::ensure!(!data.is_empty(), "ECU returned an empty block");

        let take = data.len().min(size - received);
        rom.write_all(&data[..take]).context("writing rom image")?;
        received += take;
        counter = counter.wrapping_add(1);
        debug!(received, size, "upload progress");
    }

    client
        .request_transfer_exit()
        .await
        .context("RequestTransferExit")?;
    finish(rom, output, received)
}

#[cfg(target_os = "linux")]
fn finish(mut rom: File, output: &PathBuf, size: usize) -> anyhow::Result<()> {
    rom.flush()?;
    info!(
        end = format!("{:#08x}", size.saturating_sub(1)),
        size,
        "ROM end reached"
    );

    let size_path = output.with_extension("size");
    let mut size_file = File::create(&size_path)?;
    writeln!(size_file, "{size}")?;
    info!(path = %output.display(), "ROM written");
    Ok(())
}

/// Halve while large, then step down by one to land exactly on the
/// boundary.
#[cfg(target_os = "linux")]
fn shrink_chunk(current: usize) -> usize {
    if current >= 0x20 {
        current / 2
    } else {
        current.saturating_sub(1)
    }
}
