//! Progress reporting — a carriage-return-overwritten stderr line, once a
//! second, independent of pipeline correctness.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};

use katapipe_core::Counts;

use crate::driver::Shared;

/// Spawns the progress ticker. Send on (or drop) the returned channel to
/// stop it.
pub fn spawn_progress(shared: Arc<Mutex<Shared>>, start: Instant) -> watch::Sender<()> {
    let (stop_tx, mut stop_rx) = watch::channel(());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let line = {
                        let sh = shared.lock().await;
                        format_progress(
                            &sh.sorter.count(),
                            sh.processed_queries,
                            sh.total_queries,
                            start.elapsed(),
                        )
                    };
                    eprint!("\r{line}");
                    let _ = std::io::stderr().flush();
                }
                _ = stop_rx.changed() => break,
            }
        }
    });
    stop_tx
}

/// `[in Q/T] [out P%] W>P>J>D elapsed`: input progress, response progress,
/// and the waiting > pooled > to-join > done occupancy chain.
pub fn format_progress(
    counts: &Counts,
    processed: usize,
    total: Option<usize>,
    elapsed: Duration,
) -> String {
    let input = match total {
        Some(total) => format!("{processed}/{total}"),
        None => processed.to_string(),
    };
    let output = response_percent(counts, processed, total);
    format!(
        "[in {input}] [out{output} {}>{}>{}>{}] {} ... ",
        counts.waiting,
        counts.pooled,
        counts.to_join,
        counts.popped,
        elapsed_string(elapsed)
    )
}

/// Overall completion estimate. While input is still being read the
/// fraction is a guess, marked with a trailing `?`.
fn response_percent(counts: &Counts, processed: usize, total: Option<usize>) -> String {
    let Some(total) = total else {
        return String::new();
    };
    if counts.pushed == 0 || processed == 0 || total == 0 {
        return " 0%".to_string();
    }
    let responses = (counts.pushed - counts.waiting) as f64;
    let input_fraction = processed as f64 / total as f64;
    let percent = (responses / counts.pushed as f64 * input_fraction * 100.0).floor() as u64;
    let guessing = if input_fraction < 1.0 { "?" } else { "" };
    format!(" {percent}%{guessing}")
}

fn elapsed_string(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs();
    let (minutes, secs) = (seconds / 60, seconds % 60);
    let (hours, mins) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}:{mins:02}:{secs:02}")
    } else {
        format!("{mins:02}:{secs:02}")
    }
}

pub fn finish_progress(silent: bool, interrupted: bool) {
    if !silent {
        eprintln!("\n{}", if interrupted { "Interrupted." } else { "All done." });
    }
}
