use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use stdio_proxy::completion::{Completer, choice_completer, path_completer};
use stdio_proxy::logging::{LogConfig, init_logging};
use stdio_proxy::stdio::{self, ByteStream, MemoryStream, Pipe, StreamHandle, close_input};
use stdio_proxy::{ManagedWorker, OpenMode, log_timing, safe_open};
use tracing::{Level, info};

/// CLI arguments for the stdio proxy demo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides STDIO_PROXY_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run workers that each write to their own private stdout
    Workers {
        #[arg(long, default_value_t = 4)]
        count: usize,

        /// Lines each worker writes
        #[arg(long, default_value_t = 3)]
        lines: usize,
    },

    /// Print a text file from a worker whose stdout is a pipe
    Cat {
        path: PathBuf,

        /// Open mode: r, r+, w, w+, a, a+
        #[arg(long, default_value = "r")]
        mode: OpenMode,
    },

    /// Print completion candidates for a prefix
    Complete {
        prefix: String,

        /// Complete from these choices instead of the filesystem
        #[arg(long = "choice", value_name = "CHOICE")]
        choices: Vec<String>,

        #[arg(long)]
        case_sensitive: bool,
    },
}

fn run_workers(count: usize, lines: usize) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let mut workers = Vec::with_capacity(count);
    for index in 0..count {
        let private = Arc::new(MemoryStream::new());
        let handle = ManagedWorker::new()
            .name(format!("worker-{index}"))
            .stdout(private.clone())
            .spawn(move || -> io::Result<()> {
                let mut out = stdio::stdout();
                for line in 0..lines {
                    writeln!(out, "worker {index} line {line}")?;
                }
                Ok(())
            })?;
        workers.push((index, private, handle));
    }

    let mut out = stdio::stdout();
    for (index, private, handle) in workers {
        handle.join()??;
        writeln!(out, "--- worker {index} ---")?;
        out.write_all(&private.contents())?;
    }
    log_timing!(Level::INFO, "workers", started.elapsed());
    Ok(())
}

fn run_cat(path: PathBuf, mode: OpenMode) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = safe_open(&path, mode)?;
    if let Some(encoding) = file.encoding() {
        info!("{} opened as {}", path.display(), encoding.name());
    }

    let pipe = Arc::new(Pipe::new()?);
    let handle = ManagedWorker::new()
        .name("cat")
        .stdout(pipe.clone())
        .spawn(move || -> io::Result<u64> { io::copy(&mut file, &mut stdio::stdout()) })?;

    // The worker's cleanup closes the write end, which ends this loop
    let mut out = stdio::stdout();
    let mut buf = [0u8; 4096];
    loop {
        let n = ByteStream::read(pipe.input(), &mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    let copied = handle.join()??;
    close_input(&StreamHandle::from(pipe))?;
    info!("Copied {} bytes", copied);
    Ok(())
}

fn run_complete(prefix: &str, choices: Vec<String>, case_sensitive: bool) -> io::Result<()> {
    let candidates = if choices.is_empty() {
        path_completer().complete(&(), &[], prefix)
    } else {
        choice_completer(choices, case_sensitive).complete(&(), &[], prefix)
    };
    let mut out = stdio::stdout();
    for candidate in candidates {
        writeln!(out, "{candidate}")?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging with configuration from env vars and CLI args
    let log_config = LogConfig::from_env().with_overrides(args.log_level, args.log_file);
    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    // From here on every thread sees its own bindings; main keeps the real streams
    stdio::global().install_proxies();

    match args.command {
        Command::Workers { count, lines } => run_workers(count, lines)?,
        Command::Cat { path, mode } => run_cat(path, mode)?,
        Command::Complete {
            prefix,
            choices,
            case_sensitive,
        } => run_complete(&prefix, choices, case_sensitive)?,
    }

    stdio::stdout().flush()?;
    Ok(())
}
