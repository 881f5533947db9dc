mod config;
mod fanout;
mod scheduler;
mod server;

use config::ExporterConfig;
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

const LOG_FILE_NAME: &str = "md3-exporter.log";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = match config::load_config() {
        Ok(value) => value,
        Err(err) => {
            eprintln!("md3-exporter: {err}");
            std::process::exit(2);
        }
    };
    init_logging(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "md3_shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    if let Err(err) = server::run(config.clone(), shutdown_rx).await {
        error!(event = "md3_exporter_error", addr = %config.addr, error = %err);
        std::process::exit(1);
    }
}

fn init_logging(config: &ExporterConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let sink = match config.log_dir.as_deref() {
        Some(dir) => LogSink::with_file(dir).unwrap_or_else(|err| {
            eprintln!("md3-exporter: cannot open log file in {}: {err}", dir.display());
            LogSink::default()
        }),
        None => LogSink::default(),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(sink)
        .try_init();
}

/// Stdout, mirrored into `<log_dir>/md3-exporter.log` when a log directory is configured.
#[derive(Clone, Default)]
struct LogSink {
    file: Option<Arc<Mutex<File>>>,
}

impl LogSink {
    fn with_file(log_dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    fn file(&self) -> Option<MutexGuard<'_, File>> {
        self.file
            .as_ref()
            .map(|file| file.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        if let Some(mut file) = self.file() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        if let Some(mut file) = self.file() {
            let _ = file.flush();
        }
        Ok(())
    }
}
