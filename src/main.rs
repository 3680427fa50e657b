//! v4l2-diag binary: frame rate, integrity and driver diagnostics.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use v4l2_diag::control::{read_register_be, write_register_be};
use v4l2_diag::{
    bcrm, CameraDevice, CaptureStream, DiagError, DiagnosticsConfig, FrameDiagnostics,
    FrameTable, ReferenceFrame, ScanEvent, V4L2Device,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Frame-acquisition diagnostics for V4L2 cameras")]
struct Args {
    /// Device index (e.g., 0 for /dev/video0)
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Number of mmap capture buffers
    #[arg(long, default_value_t = 4)]
    buffers: u32,

    /// Register transfer timeout in milliseconds (0 keeps the driver default)
    #[arg(long, default_value_t = 0)]
    register_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream frames and report the delivery rate and driver counters
    Monitor {
        /// Number of frames to capture
        #[arg(short = 'n', long, default_value_t = 300)]
        frames: u32,
        /// Print a report every this many frames
        #[arg(long, default_value_t = 30)]
        every: u32,
    },
    /// Capture a reference frame and compare the following frames against it
    Scan {
        /// Number of frames to compare
        #[arg(short = 'n', long, default_value_t = 10)]
        frames: u32,
    },
    /// Read a device register
    ReadRegister {
        /// Register address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Number of bytes to read
        #[arg(short, long, default_value_t = 4)]
        bytes: usize,
        /// Convert the big-endian register value to host order
        #[arg(long)]
        big_endian: bool,
    },
    /// Write a device register
    WriteRegister {
        /// Register address (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_u32)]
        address: u32,
        /// Payload as hex digits, e.g. 0a0b
        #[arg(value_parser = parse_hex_bytes)]
        data: HexBytes,
        /// Convert the host-order value to big-endian before writing
        #[arg(long)]
        big_endian: bool,
    },
    /// Print firmware version, temperature and serial number
    Info,
}

#[derive(Debug, Clone)]
struct HexBytes(Vec<u8>);

fn parse_u32(value: &str) -> std::result::Result<u32, String> {
    let parsed = value.strip_prefix("0x").map_or_else(
        || value.parse::<u32>(),
        |hex| u32::from_str_radix(hex, 16),
    );
    parsed.map_err(|err| format!("invalid register address '{value}': {err}"))
}

fn parse_hex_bytes(value: &str) -> std::result::Result<HexBytes, String> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(format!("'{value}' must be a non-empty even number of hex digits"));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex byte in '{value}'"))
        })
        .collect::<std::result::Result<Vec<u8>, String>>()
        .map(HexBytes)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        error!(%err, "v4l2-diag failed");
        std::process::exit(1);
    }
}

fn run(args: Args) -> v4l2_diag::Result<()> {
    let config = DiagnosticsConfig {
        device_index: args.device,
        buffer_count: args.buffers,
        register_timeout: Duration::from_millis(args.register_timeout_ms),
        ..DiagnosticsConfig::default()
    };

    let control = V4L2Device::open(config.device_index)?;
    info!(
        device = %config.device_path(),
        card = %control.capabilities().card,
        driver = %control.capabilities().driver,
        "Device opened"
    );
    let diag = FrameDiagnostics::new(control, config);

    match args.command {
        Command::Monitor { frames, every } => monitor(&diag, frames, every),
        Command::Scan { frames } => scan(&diag, frames),
        Command::ReadRegister {
            address,
            bytes,
            big_endian,
        } => {
            let request = diag.register_request(address);
            let mut buffer = vec![0u8; bytes];
            if big_endian {
                read_register_be(diag.device(), &request, &mut buffer)?;
            } else {
                diag.read_device_register(&request, &mut buffer)?;
            }
            println!("0x{address:04x}: {}", to_hex(&buffer));
            Ok(())
        }
        Command::WriteRegister {
            address,
            data,
            big_endian,
        } => {
            let request = diag.register_request(address);
            if big_endian {
                write_register_be(diag.device(), &request, &data.0)?;
            } else {
                diag.write_device_register(&request, &data.0)?;
            }
            println!("0x{address:04x} <- {}", to_hex(&data.0));
            Ok(())
        }
        Command::Info => {
            let identity = bcrm::read_identity(diag.device())?;
            println!("Firmware: {}", identity.firmware);
            println!("Temperature: {}", identity.temperature);
            println!("Serial: {}", identity.serial_number);
            Ok(())
        }
    }
}

fn monitor(diag: &FrameDiagnostics<V4L2Device>, frames: u32, every: u32) -> v4l2_diag::Result<()> {
    let mut capture = V4L2Device::open(diag.config().device_index)?;
    let mut stream = capture.create_stream(diag.config().buffer_count)?;
    let mut driver_stats = true;

    diag.reset_stream();
    for n in 1..=frames {
        let frame = stream.next_frame()?;
        diag.on_frame(&frame);

        if n % every.max(1) != 0 {
            continue;
        }
        println!("Frame {}: {:.2} fps", frame.metadata.sequence, diag.query_fps());

        if driver_stats {
            match diag.query_stream_statistics() {
                Ok(stats) => println!("  Driver: {stats}"),
                Err(err @ DiagError::DeviceIo { .. }) => {
                    warn!(%err, "Stream statistics unavailable, disabling");
                    driver_stats = false;
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(())
}

fn scan(diag: &FrameDiagnostics<V4L2Device>, frames: u32) -> v4l2_diag::Result<()> {
    let mut capture = V4L2Device::open(diag.config().device_index)?;
    let mut table = FrameTable::new();
    let reference: ReferenceFrame = {
        let mut stream = capture.create_stream(diag.config().buffer_count)?;
        let reference = Arc::from(stream.next_frame()?.data);
        for row in 0..frames {
            table.insert(row, stream.next_frame()?);
        }
        reference
    };

    let mut scan = diag.start_deviation_scan(reference, Arc::new(table))?;
    for event in scan.iter() {
        match event {
            ScanEvent::Progress { row, deviation } => println!("Row {row}: {deviation}"),
            ScanEvent::Finished(summary) => println!(
                "Done: {} rows, {} identical, {} size mismatch{}",
                summary.rows_compared,
                summary.identical_rows,
                summary.incomparable_rows,
                if summary.cancelled { " (cancelled)" } else { "" }
            ),
        }
    }
    scan.join()?;
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
