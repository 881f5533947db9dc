use crate::config::ExporterConfig;
use crate::fanout::EventFanout;
use crate::scheduler::{lock_device, spawn_timeline, SharedDevice};
use md3_core::protocol::{
    decode_frame, encode_frame, FrameError, Outbound, Reply, Request, DEFAULT_MAX_FRAME_BYTES,
    DEVICE_NAME, ETX,
};
use md3_core::value::Value;
use md3_core::{DeviceError, Diffractometer, Timeline};
use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
enum ReadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub async fn run(config: ExporterConfig, shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let listener = TcpListener::bind(config.addr).await?;
    serve(listener, config, shutdown).await
}

pub async fn serve(
    listener: TcpListener,
    config: ExporterConfig,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let exporter = Arc::new(Exporter::new(config.clone()));

    info!(
        event = "md3_exporter_start",
        addr = %listener.local_addr()?,
        fix_initial_event_labels = config.fix_initial_event_labels
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        let exporter = exporter.clone();
                        tokio::spawn(async move {
                            exporter.handle_connection(stream, peer).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "md3_accept_error", error = %err);
                    }
                }
            }
        }
    }

    info!(event = "md3_exporter_stop");
    Ok(())
}

pub struct Exporter {
    config: ExporterConfig,
    device: SharedDevice,
    fanout: Arc<EventFanout>,
    conn_counter: AtomicU64,
}

impl Exporter {
    pub fn new(config: ExporterConfig) -> Self {
        let fanout = Arc::new(EventFanout::new());
        let mut device = Diffractometer::new(config.timings);
        device.subscribe(fanout.clone());
        Self {
            config,
            device: Arc::new(Mutex::new(device)),
            fanout,
            conn_counter: AtomicU64::new(0),
        }
    }

    fn next_conn_id(&self) -> u64 {
        self.conn_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let conn_id = self.next_conn_id();
        let (reader_half, writer_half) = stream.into_split();
        let mut reader = BufReader::new(reader_half);

        let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
        let write_timeout = self.config.write_timeout;
        let writer_task = tokio::spawn(async move {
            writer_loop(conn_id, writer_half, rx, write_timeout).await;
        });

        info!(
            event = "md3_connection_open",
            conn_id,
            peer = %peer,
            subscribers = self.fanout.len()
        );

        // Snapshot and registration happen under one lock so no change falls between them.
        {
            let device = lock_device(&self.device);
            for event in device.initial_events(self.config.fix_initial_event_labels) {
                if tx.send(Outbound::Event(event)).is_err() {
                    break;
                }
            }
            self.fanout.register(conn_id, tx.clone());
        }

        loop {
            let body = match read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES).await {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(err) => {
                    warn!(event = "md3_read_error", conn_id, error = %err);
                    break;
                }
            };
            debug!(event = "md3_frame_in", conn_id, body = %body);

            let request = match Request::parse(&body) {
                Ok(request) => request,
                Err(err) => {
                    warn!(event = "md3_unrecognized_message", conn_id, error = %err);
                    break;
                }
            };

            let kind = request.kind();
            let (reply, background) = {
                let mut device = lock_device(&self.device);
                dispatch(&mut device, request)
            };
            if let Reply::Err(message) = &reply {
                debug!(event = "md3_request_error", conn_id, kind, error = %message);
            }
            let delivered = tx.send(Outbound::Reply(reply)).is_ok();
            // Timelines outlive the connection that started them.
            if let Some(timeline) = background {
                spawn_timeline(self.device.clone(), timeline);
            }
            if !delivered {
                break;
            }
        }

        self.fanout.unregister(conn_id);
        drop(tx);
        let _ = writer_task.await;
        info!(event = "md3_connection_closed", conn_id, peer = %peer);
    }
}

/// Executes one request against the device; the timeline, if any, still has to be scheduled.
pub fn dispatch(device: &mut Diffractometer, request: Request) -> (Reply, Option<Timeline>) {
    let result = match request {
        Request::Read { name } => device
            .read(&name)
            .map(|value| (Reply::Ret(value.clone()), None)),
        Request::Write { name, value } => device
            .write_from_wire(&name, &value)
            .map(|motion| (Reply::Null, motion)),
        Request::Exec { command, args } => device
            .exec(&command, &args)
            .map(|outcome| (Reply::Ret(outcome.value), outcome.background)),
        Request::List => Ok((Reply::Ret(Value::Str(device.list_commands())), None)),
        Request::Name => Ok((Reply::Ret(Value::str(DEVICE_NAME)), None)),
    };
    result.unwrap_or_else(|err: DeviceError| {
        if matches!(err, DeviceError::UnknownAttribute { .. }) {
            warn!(event = "md3_unknown_attribute", error = %err);
        }
        (Reply::Err(err.to_string()), None)
    })
}

async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<String>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    let limit = u64::try_from(max_frame_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader)
        .take(limit)
        .read_until(ETX, &mut frame)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(decode_frame(&frame, max_frame_bytes)?))
}

async fn writer_loop(
    conn_id: u64,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    write_timeout: Duration,
) {
    while let Some(outbound) = rx.recv().await {
        let body = outbound.body();
        let frame = encode_frame(&body);
        let send = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, send).await {
            Ok(Ok(())) => {
                debug!(event = "md3_frame_out", conn_id, body = %body);
            }
            Ok(Err(err)) => {
                warn!(event = "md3_write_error", conn_id, error = %err);
                break;
            }
            Err(_) => {
                warn!(event = "md3_write_timeout", conn_id);
                break;
            }
        }
    }
}
