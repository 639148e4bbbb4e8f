//! Watch command - follow a live metric feed

use anyhow::Result;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_stream::streaming::is_known_metric;
use telemetry_stream::{
    ConnectionStatus, Sample, StreamError, StreamState, SubscriptionController,
    SubscriptionTarget,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::output::{csv_header, csv_row, OutputContext, OutputFormat, SampleRow};

const HELP: &str = "Commands: vehicle <id>, metric <name>, reconnect, disconnect, status, help, quit";

/// A line typed while watching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    Vehicle(String),
    Metric(String),
    Reconnect,
    Disconnect,
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl WatchCommand {
    pub fn parse(line: &str) -> Self {
        let mut parts = line.split_whitespace();
        let command = parts.next().map(str::to_ascii_lowercase);
        let argument = parts.next().map(String::from);

        match (command.as_deref(), argument) {
            (None, _) => Self::Empty,
            (Some("vehicle" | "v"), Some(id)) => Self::Vehicle(id),
            (Some("metric" | "m"), Some(name)) => Self::Metric(name),
            (Some("reconnect" | "r"), None) => Self::Reconnect,
            (Some("disconnect" | "d"), None) => Self::Disconnect,
            (Some("status" | "s"), None) => Self::Status,
            (Some("help" | "?"), None) => Self::Help,
            (Some("quit" | "q" | "exit"), None) => Self::Quit,
            _ => Self::Unknown(line.trim().to_string()),
        }
    }
}

/// Samples at the end of the window that have not been printed yet
///
/// `received` counts every sample accepted since the window was last cleared,
/// so a count below `printed` means the window was reset in between.
pub fn unprinted(printed: u64, received: u64, samples: &[Sample]) -> &[Sample] {
    let printed = if received < printed { 0 } else { printed };
    let fresh = usize::try_from(received - printed)
        .unwrap_or(usize::MAX)
        .min(samples.len());
    &samples[samples.len() - fresh..]
}

/// Forward lines from `reader` on a plain thread
///
/// A blocking read cannot be cancelled, so the thread is detached and never
/// holds up runtime shutdown. The channel closes at end of input.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in reader.lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// Prints only what changed between successive states
struct StatePrinter<'a> {
    ctx: &'a OutputContext,
    target: Option<SubscriptionTarget>,
    printed: u64,
    status: ConnectionStatus,
    error: Option<StreamError>,
    header_printed: bool,
}

impl<'a> StatePrinter<'a> {
    fn new(ctx: &'a OutputContext) -> Self {
        Self {
            ctx,
            target: None,
            printed: 0,
            status: ConnectionStatus::Idle,
            error: None,
            header_printed: false,
        }
    }

    fn render(&mut self, state: &StreamState) {
        if state.target != self.target {
            self.target = state.target.clone();
            self.printed = 0;
        }
        if state.status == ConnectionStatus::Connecting {
            self.printed = 0;
        }

        if state.status != self.status {
            self.status = state.status;
            self.ctx.info(&format!("[{}]", state.status));
        }

        if state.last_error != self.error {
            if let Some(error) = &state.last_error {
                self.ctx.error(&format!("Stream error: {}", error));
            }
            self.error = state.last_error.clone();
        }

        let Some(target) = &state.target else {
            return;
        };

        for sample in unprinted(self.printed, state.received, &state.samples) {
            self.print_sample(target, sample);
        }
        self.printed = state.received;
    }

    fn print_sample(&mut self, target: &SubscriptionTarget, sample: &Sample) {
        let row = SampleRow {
            timestamp: sample.timestamp.to_rfc3339(),
            vehicle: target.vehicle_id.clone(),
            metric: target.metric.clone(),
            value: sample.value,
        };

        match self.ctx.format {
            OutputFormat::Table => {
                println!("[{}] {}/{} = {}", row.timestamp, row.vehicle, row.metric, row.value);
            }
            OutputFormat::Json => {
                if let Ok(json) = serde_json::to_string(&row) {
                    println!("{}", json);
                }
            }
            OutputFormat::Csv => {
                if !self.header_printed {
                    println!("{}", csv_header(&row).join(","));
                    self.header_printed = true;
                }
                println!("{}", csv_row(&row).join(","));
            }
        }
    }
}

/// Follow a live feed until Ctrl+C, `quit`, or the controller goes away
pub async fn watch(
    controller: &SubscriptionController,
    target: SubscriptionTarget,
    ctx: &OutputContext,
) -> Result<()> {
    warn_if_unknown(&target.metric, ctx);
    ctx.info(&format!("Watching {}...", target));
    ctx.info(HELP);
    ctx.info("Press Ctrl+C to stop");

    controller.subscribe(target);

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut updates = controller.watch();
    let mut printer = StatePrinter::new(ctx);
    printer.render(&updates.borrow_and_update().clone());

    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let mut stdin_open = true;

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                printer.render(&state);
            }
            line = lines.recv(), if stdin_open => {
                match line {
                    Some(Ok(line)) => {
                        if !handle_command(controller, WatchCommand::parse(&line), ctx) {
                            break;
                        }
                    }
                    None => stdin_open = false,
                    Some(Err(e)) => {
                        ctx.warn(&format!("Stopped reading commands: {}", e));
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                // Check running flag periodically
            }
        }
    }

    ctx.info("\nStopping live stream...");
    controller.disconnect();
    ctx.success("Disconnected");

    Ok(())
}

/// Apply an interactive command; returns false to stop watching
fn handle_command(
    controller: &SubscriptionController,
    command: WatchCommand,
    ctx: &OutputContext,
) -> bool {
    let current = controller.target();
    debug!(?command, "Interactive command");

    match command {
        WatchCommand::Vehicle(vehicle_id) => {
            let metric = current.map(|t| t.metric).unwrap_or_default();
            controller.update(SubscriptionTarget::new(vehicle_id, metric));
        }
        WatchCommand::Metric(metric) => {
            warn_if_unknown(&metric, ctx);
            let vehicle_id = current.map(|t| t.vehicle_id).unwrap_or_default();
            controller.update(SubscriptionTarget::new(vehicle_id, metric));
        }
        WatchCommand::Reconnect => controller.reconnect(),
        WatchCommand::Disconnect => controller.disconnect(),
        WatchCommand::Status => {
            let state = controller.state();
            let target = state
                .target
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string());
            ctx.info(&format!(
                "{} [{}] {} sample(s){}",
                target,
                state.status,
                state.samples.len(),
                state
                    .last_error
                    .map(|e| format!(", last error: {}", e))
                    .unwrap_or_default()
            ));
        }
        WatchCommand::Help => ctx.info(HELP),
        WatchCommand::Quit => return false,
        WatchCommand::Empty => {}
        WatchCommand::Unknown(line) => ctx.warn(&format!("Unknown command: {} ({})", line, HELP)),
    }

    true
}

fn warn_if_unknown(metric: &str, ctx: &OutputContext) {
    if !is_known_metric(metric) {
        ctx.warn(&format!(
            "'{}' is not a known metric; the server may reject it",
            metric
        ));
    }
}
