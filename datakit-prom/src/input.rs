//! The prom input: initialization, the polling loop and its control handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use datakit_common::{SchemaRegistry, Tagger, current_timestamp_nanos};
use datakit_framework::{Feeder, LastError};

use crate::config::PromInputConfig;
use crate::error::{PromError, Result};
use crate::output::{DumpFile, INPUT_NAME, OutputAdapter};
use crate::scrape::{LineSplitter, ScrapePipeline};
use crate::tags::{UrlTagSet, is_loopback};
use crate::transport::{Fetcher, DIAL_TIMEOUT, TargetKind, dial_tcp};

/// Delay between initialization attempts inside [`PromInput::run`].
const INIT_RETRY: Duration = Duration::from_secs(1);

/// Capacity of the pause/resume channel.
const CONTROL_CAPACITY: usize = 8;

/// How long pause/resume wait for the channel.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputState {
    Uninitialized = 0,
    Initializing = 1,
    Idle = 2,
    Collecting = 3,
    Paused = 4,
    Terminated = 5,
}

impl InputState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => InputState::Initializing,
            2 => InputState::Idle,
            3 => InputState::Collecting,
            4 => InputState::Paused,
            5 => InputState::Terminated,
            _ => InputState::Uninitialized,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Pause,
    Resume,
}

/// One configured URL or file.
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    /// The target as configured.
    pub raw: String,
    pub kind: TargetKind,
    pub tags: UrlTagSet,
    /// Outcome of the last scrape.
    pub up: bool,
}

/// Outcome of one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub targets_ok: usize,
    pub targets_failed: usize,
    /// Points accepted by the feed, `up` gauges included.
    pub points: usize,
    pub parse_errors: usize,
}

/// Everything built by a successful `init`.
struct Runtime<F: Feeder> {
    targets: Vec<ScrapeTarget>,
    fetcher: Fetcher,
    pipeline: ScrapePipeline,
    output: OutputAdapter<F>,
    dump: Option<DumpFile>,
}

struct TargetOutcome {
    up: bool,
    points: usize,
    parse_errors: usize,
}

/// A Prometheus scraping input.
///
/// Created together with an [`InputHandle`] that pauses, resumes and stops
/// it from other tasks.
pub struct PromInput<F: Feeder> {
    config: PromInputConfig,
    feeder: Arc<F>,
    tagger: Arc<dyn Tagger>,
    state: Arc<AtomicU8>,
    control_rx: mpsc::Receiver<Control>,
    stop_rx: watch::Receiver<bool>,
    shutdown: Option<watch::Receiver<bool>>,
    runtime: Option<Runtime<F>>,
}

/// Control side of a [`PromInput`].
#[derive(Debug, Clone)]
pub struct InputHandle {
    control_tx: mpsc::Sender<Control>,
    stop_tx: Arc<watch::Sender<bool>>,
    state: Arc<AtomicU8>,
    control_timeout: Duration,
}

impl<F: Feeder> PromInput<F> {
    pub fn new(
        config: PromInputConfig,
        feeder: Arc<F>,
        tagger: Arc<dyn Tagger>,
    ) -> (Self, InputHandle) {
        let state = Arc::new(AtomicU8::new(InputState::Uninitialized as u8));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        let input = Self {
            config,
            feeder,
            tagger,
            state: state.clone(),
            control_rx,
            stop_rx,
            shutdown: None,
            runtime: None,
        };
        let handle = InputHandle {
            control_tx,
            stop_tx: Arc::new(stop_tx),
            state,
            control_timeout: CONTROL_TIMEOUT,
        };
        (input, handle)
    }

    /// Also stop when the process-wide shutdown signal flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &PromInputConfig {
        &self.config
    }

    pub fn state(&self) -> InputState {
        InputState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: InputState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Targets built by `init`, empty before.
    pub fn targets(&self) -> &[ScrapeTarget] {
        self.runtime
            .as_ref()
            .map(|rt| rt.targets.as_slice())
            .unwrap_or_default()
    }

    /// Parse targets and build filters, tags, the HTTP client and the output.
    ///
    /// Any invalid target fails the whole input.
    pub async fn init(&mut self) -> Result<()> {
        self.set_state(InputState::Initializing);
        match self.build_runtime() {
            Ok(runtime) => {
                tracing::info!(
                    source = %self.config.source,
                    targets = runtime.targets.len(),
                    dump = runtime.dump.is_some(),
                    "Prom input initialized"
                );
                self.runtime = Some(runtime);
                self.set_state(InputState::Idle);
                Ok(())
            }
            Err(e) => {
                self.set_state(InputState::Uninitialized);
                Err(e)
            }
        }
    }

    fn build_runtime(&self) -> Result<Runtime<F>> {
        let config = &self.config;
        config.validate()?;

        let schemas = if config.measurement_schemas.is_empty() {
            None
        } else {
            let mut registry = SchemaRegistry::new();
            for path in &config.measurement_schemas {
                registry.load_file(path)?;
            }
            Some(Arc::new(registry))
        };

        let global = if config.election {
            self.tagger.election_tags()
        } else {
            self.tagger.host_tags()
        };

        let mut targets = Vec::new();
        for raw in config.targets() {
            let kind = TargetKind::parse(&raw)?;

            let mut base = global.clone();
            base.extend(config.tags.clone());
            if !config.disable_host_tag {
                if let Some(host) = kind.host().filter(|h| !is_loopback(h)) {
                    base.insert("host".to_string(), host.to_string());
                }
            }

            let instance = if config.disable_instance_tag {
                None
            } else {
                kind.instance()
            };

            targets.push(ScrapeTarget {
                raw,
                kind,
                tags: UrlTagSet { base, instance },
                up: false,
            });
        }

        Ok(Runtime {
            targets,
            fetcher: Fetcher::from_config(config)?,
            pipeline: ScrapePipeline::from_config(config, schemas)?,
            output: OutputAdapter::new(
                self.feeder.clone(),
                &config.source,
                config.election,
                config.as_logging.clone(),
            ),
            dump: config
                .output
                .as_ref()
                .map(|path| DumpFile::new(path, config.max_file_size)),
        })
    }

    /// Run one collection cycle over every target, initializing first if
    /// needed.
    pub async fn collect_once(&mut self) -> Result<CycleReport> {
        if self.runtime.is_none() {
            self.init().await?;
        }
        let Some(runtime) = self.runtime.as_mut() else {
            return Err(PromError::config("input is not initialized"));
        };

        self.state
            .store(InputState::Collecting as u8, Ordering::SeqCst);
        let start = Instant::now();
        let report = match runtime.dump.clone() {
            Some(dump) => dump_cycle(runtime, &dump, &self.config).await,
            None => scrape_cycle(runtime, &self.config).await,
        };
        self.set_state(InputState::Idle);

        tracing::debug!(
            source = %self.config.source,
            ok = report.targets_ok,
            failed = report.targets_failed,
            points = report.points,
            parse_errors = report.parse_errors,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Collection cycle finished"
        );
        Ok(report)
    }

    /// Initialize (retrying every second) and collect on every interval
    /// tick until stopped.
    pub async fn run(mut self) {
        tracing::info!(source = %self.config.source, "Prom input starting");

        while self.runtime.is_none() {
            if let Err(e) = self.init().await {
                tracing::error!(source = %self.config.source, error = %e, "Init failed, retrying");
                tokio::select! {
                    biased;
                    _ = stopped(&mut self.stop_rx) => return self.terminate(),
                    _ = shutdown(&mut self.shutdown) => return self.terminate(),
                    _ = tokio::time::sleep(INIT_RETRY) => {}
                }
            }
        }

        let mut tick = tokio::time::interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut self.stop_rx) => break,
                _ = shutdown(&mut self.shutdown) => break,
                Some(control) = self.control_rx.recv() => self.apply_control(control),
                _ = tick.tick() => {
                    if self.state() == InputState::Paused {
                        tracing::debug!(source = %self.config.source, "Paused, skipping collection");
                        continue;
                    }
                    if let Err(e) = self.collect_once().await {
                        tracing::error!(source = %self.config.source, error = %e, "Collection failed");
                    }
                }
            }
        }

        self.terminate();
    }

    fn apply_control(&self, control: Control) {
        let state = match control {
            Control::Pause => InputState::Paused,
            Control::Resume => InputState::Idle,
        };
        tracing::info!(source = %self.config.source, state = ?state, "Prom input control");
        self.set_state(state);
    }

    fn terminate(&self) {
        self.set_state(InputState::Terminated);
        tracing::info!(source = %self.config.source, "Prom input exit");
    }
}

impl InputHandle {
    /// Override how long pause/resume wait before failing.
    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    pub fn state(&self) -> InputState {
        InputState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Ask the input to stop collecting.
    pub async fn pause(&self) -> Result<()> {
        if self.send(Control::Pause).await {
            Ok(())
        } else {
            Err(PromError::PauseTimeout(self.control_timeout))
        }
    }

    /// Ask a paused input to collect again.
    pub async fn resume(&self) -> Result<()> {
        if self.send(Control::Resume).await {
            Ok(())
        } else {
            Err(PromError::ResumeTimeout(self.control_timeout))
        }
    }

    /// Stop the input's loop. An in-flight fetch finishes first.
    pub fn terminate(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether the message was queued within the control timeout.
    async fn send(&self, control: Control) -> bool {
        matches!(
            tokio::time::timeout(self.control_timeout, self.control_tx.send(control)).await,
            Ok(Ok(()))
        )
    }
}

async fn scrape_cycle<F: Feeder>(runtime: &mut Runtime<F>, config: &PromInputConfig) -> CycleReport {
    let mut report = CycleReport::default();
    let mut outcomes = Vec::with_capacity(runtime.targets.len());

    for target in &runtime.targets {
        let outcome = scrape_target(runtime, target, config).await;
        if outcome.up {
            report.targets_ok += 1;
        } else {
            report.targets_failed += 1;
        }
        report.points += outcome.points;
        report.parse_errors += outcome.parse_errors;
        outcomes.push(outcome.up);
    }

    for (target, up) in runtime.targets.iter_mut().zip(outcomes) {
        target.up = up;
    }
    report
}

async fn scrape_target<F: Feeder>(
    runtime: &Runtime<F>,
    target: &ScrapeTarget,
    config: &PromInputConfig,
) -> TargetOutcome {
    let start = Instant::now();
    let scrape_start = current_timestamp_nanos();
    let pipeline = &runtime.pipeline;
    let output = &runtime.output;

    let result = if config.stream_size > 0 {
        stream_target(runtime, target, scrape_start, config.stream_size).await
    } else {
        match runtime.fetcher.fetch(&target.raw, &target.kind).await {
            Ok(body) => {
                let text = String::from_utf8_lossy(&body);
                Ok((pipeline.process(&text, &target.tags, scrape_start), 0))
            }
            Err(e) => Err((e, 0)),
        }
    };

    match result {
        Ok((mut scraped, streamed)) => {
            pipeline.attach_up(&mut scraped.points, &target.tags, true, scrape_start);
            let fed = output
                .deliver(scraped.points, start.elapsed(), config.stream_size > 0)
                .await;
            output.feeder().record_scrape(&target.raw, None);
            TargetOutcome {
                up: true,
                points: streamed + fed,
                parse_errors: scraped.parse_errors,
            }
        }
        Err((e, streamed)) => {
            report_fetch_failure(runtime, target, config, &e).await;
            let up = vec![pipeline.up_point(&target.tags, false, scrape_start)];
            let fed = output.deliver(up, start.elapsed(), false).await;
            TargetOutcome {
                up: false,
                points: streamed + fed,
                parse_errors: 0,
            }
        }
    }
}

/// Read the body chunk by chunk, flushing every `batch` points.
///
/// Returns the unflushed remainder and the number of points already fed.
async fn stream_target<F: Feeder>(
    runtime: &Runtime<F>,
    target: &ScrapeTarget,
    scrape_start: i64,
    batch: usize,
) -> std::result::Result<(crate::scrape::ScrapeResult, usize), (PromError, usize)> {
    let start = Instant::now();
    let mut fed = 0;
    let mut body = runtime
        .fetcher
        .open(&target.raw, &target.kind)
        .await
        .map_err(|e| (e, 0))?;

    let mut scrape = runtime.pipeline.stream(&target.tags, scrape_start);
    let mut splitter = LineSplitter::default();

    loop {
        let chunk = match body.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => return Err((e, fed)),
        };
        for line in splitter.push(&chunk) {
            scrape.push_line(&line);
            if scrape.pending() >= batch {
                fed += runtime
                    .output
                    .deliver(scrape.take(), start.elapsed(), true)
                    .await;
            }
        }
    }
    if let Some(line) = splitter.finish() {
        scrape.push_line(&line);
    }

    Ok((scrape.finish(), fed))
}

async fn dump_cycle<F: Feeder>(
    runtime: &Runtime<F>,
    dump: &DumpFile,
    config: &PromInputConfig,
) -> CycleReport {
    let mut report = CycleReport::default();
    if let Err(e) = dump.reset().await {
        tracing::warn!(path = %dump.path().display(), error = %e, "Failed to remove dump file");
    }

    for target in &runtime.targets {
        let body = match runtime.fetcher.fetch(&target.raw, &target.kind).await {
            Ok(body) => body,
            Err(e) => {
                report.targets_failed += 1;
                report_fetch_failure(runtime, target, config, &e).await;
                continue;
            }
        };

        match dump.append(&body).await {
            Ok(size) => {
                report.targets_ok += 1;
                runtime.output.feeder().record_scrape(&target.raw, None);
                tracing::debug!(url = %target.raw, size, "Appended body to dump file");
            }
            Err(e) => {
                report.targets_failed += 1;
                tracing::warn!(url = %target.raw, error = %e, "Dump aborted");
                runtime.output.feeder().feed_last_error(
                    LastError::new(e.error_type(), e.to_string())
                        .with_input(INPUT_NAME)
                        .with_source(&config.source)
                        .with_target(&target.raw),
                );
                if matches!(e, PromError::FileSizeExceeded { .. }) {
                    break;
                }
            }
        }
    }
    report
}

async fn report_fetch_failure<F: Feeder>(
    runtime: &Runtime<F>,
    target: &ScrapeTarget,
    config: &PromInputConfig,
    err: &PromError,
) {
    if config.ignore_req_err {
        tracing::debug!(url = %target.raw, error = %err, "Fetch failed");
    } else {
        tracing::warn!(url = %target.raw, error = %err, "Fetch failed");
    }

    if let Some((host, port)) = target.kind.host_port() {
        if dial_tcp(&host, port, DIAL_TIMEOUT).await {
            tracing::info!(url = %target.raw, host = %host, port, "Target port is reachable");
        } else {
            tracing::warn!(url = %target.raw, host = %host, port, "Target port is unreachable");
        }
    }

    let feeder = runtime.output.feeder();
    let reason = err.to_string();
    feeder.record_scrape(&target.raw, Some(&reason));
    if !config.ignore_req_err {
        feeder.feed_last_error(
            LastError::new(err.error_type(), reason)
                .with_input(INPUT_NAME)
                .with_source(&config.source)
                .with_target(&target.raw),
        );
    }
}

/// Resolves once the stop flag is set. Never resolves if the handle is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn shutdown(rx: &mut Option<watch::Receiver<bool>>) {
    match rx {
        Some(rx) => stopped(rx).await,
        None => std::future::pending().await,
    }
}
