//! The pipeline driver — ingest and egress workers around the shared
//! Sorter, with one admission gate between them.
//!
//! The ingest worker owns stdin and the engine's stdin; the egress worker
//! owns the engine's stdout and our stdout. The Sorter (which owns the
//! Joiner) is the only cross-worker state, guarded by one mutex; a Notify
//! wakes the ingest worker whenever the egress worker drains requests.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use katapipe_core::classify::handle_invalid_response;
use katapipe_core::joiner::{JoinFn, StitchFn};
use katapipe_core::{
    merge_fields, same_by, Fields, Joiner, Pair, Request, Response, Sorter, SorterConfig,
};
use katapipe_engine::EngineWriter;
use katapipe_extra::{join_pairs, stitch_successive, Enricher, ExtraMode};
use katapipe_query::{parse_json_lenient, IdGenerator, QueryCooker};

use crate::options::{Order, Settings};
use crate::progress;

/// State shared between the workers, guarded by one mutex.
pub struct Shared {
    pub sorter: Sorter,
    pub input_finished: bool,
    pub processed_queries: usize,
    pub total_queries: Option<usize>,
}

/// Where the ingest worker sends cooked engine queries.
pub enum QuerySink {
    Engine(EngineWriter),
    Stdout(tokio::io::Stdout),
}

impl QuerySink {
    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            QuerySink::Engine(writer) => writer.send_line(line).await,
            QuerySink::Stdout(out) => {
                out.write_all(line.as_bytes()).await?;
                out.write_all(b"\n").await?;
                out.flush().await
            }
        }
    }
}

pub async fn run(settings: Settings) -> Result<()> {
    let shared = Arc::new(Mutex::new(Shared {
        sorter: build_sorter(&settings),
        input_finished: false,
        processed_queries: 0,
        total_queries: None,
    }));
    let notify = Arc::new(Notify::new());
    let enricher = Enricher {
        extra: settings.extra,
        unsettledness_by_entropy: settings.unsettledness_by_entropy,
        soft_moyo: settings.soft_moyo,
    };
    let start = Instant::now();
    let progress_stop =
        (!settings.silent).then(|| progress::spawn_progress(shared.clone(), start));

    let interrupted = if settings.resume_from.is_some() {
        run_resume(&settings, &shared, &notify, enricher).await?
    } else if settings.suspend_to.is_some() {
        run_suspend(&settings, &shared, &notify).await?
    } else {
        run_engine_pipeline(&settings, &shared, &notify, enricher).await?
    };

    if let Some(stop) = progress_stop {
        let _ = stop.send(());
    }
    if !settings.silent {
        let sh = shared.lock().await;
        eprint!(
            "\r{}",
            progress::format_progress(
                &sh.sorter.count(),
                sh.processed_queries,
                sh.total_queries,
                start.elapsed(),
            )
        );
    }
    progress::finish_progress(settings.silent, interrupted);
    Ok(())
}

/// Normal operation: engine subprocess, both workers, admission gate.
async fn run_engine_pipeline(
    settings: &Settings,
    shared: &Arc<Mutex<Shared>>,
    notify: &Arc<Notify>,
    enricher: Enricher,
) -> Result<bool> {
    let (mut engine, mut writer, engine_lines) = katapipe_engine::spawn(&settings.engine_command)?;
    let mut ids = IdGenerator::new();
    if settings.netcat {
        // Cancel requests left over from a previous client of the socket.
        writer
            .send_line(&katapipe_engine::terminate_all_line(&ids.next_id()))
            .await?;
    }
    let mut sink = QuerySink::Engine(writer);

    let mut egress = tokio::spawn({
        let shared = shared.clone();
        let notify = notify.clone();
        async move { run_egress(engine_lines, shared, notify, enricher).await }
    });

    let gated = settings.max_requests.is_some();
    let interrupted = tokio::select! {
        result = async {
            run_ingest(settings, shared, notify, &mut sink, gated).await?;
            (&mut egress).await.context("egress worker panicked")?
        } => {
            if let Err(error) = result {
                warn!("pipeline stopped early: {error}");
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        egress.abort();
    }

    if let QuerySink::Engine(mut writer) = sink {
        let _ = writer.shutdown().await;
    }
    engine.kill().await;
    if interrupted && settings.netcat {
        info!("Sending terminate_all...");
        match katapipe_engine::broadcast_terminate_all(&settings.engine_command, &ids.next_id())
            .await
        {
            Ok(()) => info!("...Sent"),
            Err(error) => warn!("terminate_all broadcast failed: {error}"),
        }
    }
    Ok(interrupted)
}

/// Suspend: cook queries to stdout, then dump the pending request pool.
/// There is no egress worker, so admission is not gated.
async fn run_suspend(
    settings: &Settings,
    shared: &Arc<Mutex<Shared>>,
    notify: &Arc<Notify>,
) -> Result<bool> {
    let mut sink = QuerySink::Stdout(tokio::io::stdout());
    let interrupted = tokio::select! {
        result = run_ingest(settings, shared, notify, &mut sink, false) => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    if !interrupted {
        if let Some(path) = &settings.suspend_to {
            let dumped = shared.lock().await.sorter.dump_requests()?;
            std::fs::write(path, dumped)
                .with_context(|| format!("failed to write request dump to {}", path.display()))?;
        }
    }
    Ok(interrupted)
}

/// Resume: restore the request pool and run only the egress worker, with
/// engine responses arriving on our stdin.
async fn run_resume(
    settings: &Settings,
    shared: &Arc<Mutex<Shared>>,
    notify: &Arc<Notify>,
    enricher: Enricher,
) -> Result<bool> {
    let Some(path) = &settings.resume_from else {
        return Ok(false);
    };
    let dumped = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read request dump from {}", path.display()))?;
    {
        let mut sh = shared.lock().await;
        sh.sorter
            .undump_requests(&dumped)
            .context("invalid request dump")?;
        sh.input_finished = true;
    }
    let lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = tokio::select! {
        result = run_egress(lines, shared.clone(), notify.clone(), enricher) => {
            if let Err(error) = result {
                warn!("pipeline stopped early: {error}");
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };
    Ok(interrupted)
}

fn build_sorter(settings: &Settings) -> Sorter {
    let join = (settings.order == Order::Join).then(|| Box::new(join_pairs) as JoinFn);
    let stitch = (settings.order != Order::Arrival).then(|| {
        let extra = settings.extra;
        Box::new(move |prev: &mut Pair, curr: &Pair| {
            if extra != ExtraMode::Normal {
                stitch_successive(prev, curr);
            }
        }) as StitchFn
    });
    Sorter::new(
        SorterConfig {
            sort: settings.order != Order::Arrival,
            max_requests: settings.max_requests,
        },
        Box::new(same_by(&["id", "turnNumber"])),
        Box::new(|msg| warn!("{msg}")),
        Joiner::new(join, stitch),
    )
}

// ingest worker

async fn run_ingest(
    settings: &Settings,
    shared: &Arc<Mutex<Shared>>,
    notify: &Arc<Notify>,
    sink: &mut QuerySink,
    gated: bool,
) -> Result<()> {
    let mut cooker = QueryCooker::new(
        settings.cooker_config(),
        settings.defaults.clone(),
        settings.overrides.clone(),
    );
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut processed = 0usize;

    if !settings.sequentially {
        // Pre-read everything so progress can show a total.
        let mut input_lines = Vec::new();
        while let Some(line) = stdin.next_line().await? {
            input_lines.push(line);
        }
        shared.lock().await.total_queries = Some(input_lines.len());
        for line in &input_lines {
            cook_input_line(line, settings, &mut cooker, shared, notify, sink, gated).await?;
            processed += 1;
            shared.lock().await.processed_queries = processed;
        }
    } else {
        while let Some(line) = stdin.next_line().await? {
            cook_input_line(&line, settings, &mut cooker, shared, notify, sink, gated).await?;
            processed += 1;
            shared.lock().await.processed_queries = processed;
        }
    }

    let mut sh = shared.lock().await;
    sh.total_queries = Some(processed.max(sh.total_queries.unwrap_or(0)));
    sh.input_finished = true;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cook_input_line(
    line: &str,
    settings: &Settings,
    cooker: &mut QueryCooker,
    shared: &Arc<Mutex<Shared>>,
    notify: &Arc<Notify>,
    sink: &mut QuerySink,
    gated: bool,
) -> Result<()> {
    let line = line.trim();
    debug!("(from stdin): {line}");
    for entry in &settings.override_list {
        cooker.set_overrides(merge_fields(&[&settings.overrides, entry]));
        let mut report = |msg: &str| warn!("{msg}");
        let cooked = cooker.cook_line(line, &mut report);
        let queries: Vec<String> = cooked
            .engine_queries
            .iter()
            .map(serde_json::to_string)
            .collect::<serde_json::Result<_>>()?;

        admit_requests(shared, notify, gated, cooked.requests).await;
        for query in &queries {
            sink.send_line(query).await?;
        }
    }
    Ok(())
}

/// The admission gate: wait until the Sorter has room, then push the whole
/// query's requests under the lock.
async fn admit_requests(
    shared: &Arc<Mutex<Shared>>,
    notify: &Arc<Notify>,
    gated: bool,
    requests: Vec<Request>,
) {
    let mut requests = Some(requests);
    loop {
        // Register interest before checking, so a drain between the check
        // and the await cannot be missed.
        let notified = notify.notified();
        {
            let mut sh = shared.lock().await;
            if !gated || sh.sorter.has_room() {
                sh.sorter.push_requests(requests.take().unwrap_or_default());
                return;
            }
        }
        notified.await;
    }
}

// egress worker

async fn run_egress<R>(
    mut lines: Lines<R>,
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
    enricher: Enricher,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut stdout = tokio::io::stdout();
    // The done-check also runs on a timer: a socket peer never closes its
    // stream, so EOF alone cannot end the run.
    let mut ticker = interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if !line.is_empty() {
                            debug!("(from engine): {line}");
                            let outputs = cook_response_line(line, &shared, &enricher).await;
                            notify.notify_waiters();
                            write_outputs(&mut stdout, &outputs).await?;
                        }
                        if pipeline_done(&shared).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!("BrokenPipe in response worker: {error}");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if pipeline_done(&shared).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Classify, pair, enrich and join one engine response line. Everything
/// happens under the shared lock; the emitted outputs are written outside.
async fn cook_response_line(
    line: &str,
    shared: &Arc<Mutex<Shared>>,
    enricher: &Enricher,
) -> Vec<Fields> {
    let mut sh = shared.lock().await;
    let mut report = |msg: &str| warn!("{msg}");
    let response = Response::new(parse_json_lenient(line, &mut report));
    if handle_invalid_response(&response, &mut sh.sorter) {
        return Vec::new();
    }
    let mut pairs = sh.sorter.push_response(response);
    for pair in &mut pairs {
        enricher.cook_pair(pair);
    }
    sh.sorter.push_pairs_to_joiner(pairs)
}

async fn write_outputs(stdout: &mut tokio::io::Stdout, outputs: &[Fields]) -> Result<()> {
    for fields in outputs {
        let line = serde_json::to_string(fields)?;
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
    stdout.flush().await?;
    Ok(())
}

/// Input exhausted and every admitted request resolved.
async fn pipeline_done(shared: &Arc<Mutex<Shared>>) -> bool {
    let sh = shared.lock().await;
    sh.input_finished && !sh.sorter.has_requests()
}
