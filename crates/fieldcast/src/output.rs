use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fieldcast_channel::{ConsumerStats, ProducerStats};
use fieldcast_compute::RankReport;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct RankOutput<'a> {
    kind: &'static str,
    #[serde(flatten)]
    report: &'a RankReport,
    timestamp: String,
}

pub fn print_rank_reports(reports: &[RankReport], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for report in reports {
                let out = RankOutput {
                    kind: "rank-report",
                    report,
                    timestamp: now_unix_seconds(),
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "RANK", "FRAMES", "GATHERS", "ELAPSED", "FPS", "SENT", "SEND FPS", "QUIT",
                ]);
            for report in reports {
                let channel = report.channel.unwrap_or_default();
                table.add_row(vec![
                    report.rank.to_string(),
                    report.frames.to_string(),
                    report.gathers.to_string(),
                    format!("{:.2}s", report.elapsed_secs),
                    format!("{:.1}", report.fps),
                    channel_cell(report.channel, channel.frames_sent),
                    format!("{:.1}", report.send_fps),
                    channel_cell(report.channel, channel.quit_received),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for report in reports {
                print!(
                    "{}: end time = {:.3}, frames {}, FPS {:.2}, sFPS {:.2}",
                    report.rank, report.elapsed_secs, report.frames, report.fps, report.send_fps
                );
                if let Some(channel) = report.channel {
                    print!(
                        ", sent {} (completed {}, cancelled {})",
                        channel.frames_sent, channel.sends_completed, channel.sends_cancelled
                    );
                }
                println!();
            }
        }
    }
}

fn channel_cell<T: ToString>(channel: Option<ProducerStats>, value: T) -> String {
    match channel {
        Some(_) => value.to_string(),
        None => "-".to_string(),
    }
}

/// Periodic line printed while the consumer runs.
#[derive(Serialize)]
pub struct StatusLine<'a> {
    pub state: &'a str,
    pub elapsed_secs: f64,
    /// Polls per second over the last status interval.
    pub fps: f64,
    /// Frames received per second over the last status interval.
    pub rfps: f64,
    #[serde(flatten)]
    pub stats: ConsumerStats,
}

/// Poll rate and receive rate between two snapshots taken `secs` apart.
pub fn interval_rates(previous: &ConsumerStats, current: &ConsumerStats, secs: f64) -> (f64, f64) {
    if secs <= 0.0 {
        return (0.0, 0.0);
    }
    let polls = current.polls.saturating_sub(previous.polls);
    let received = current
        .frames_received
        .saturating_sub(previous.frames_received);
    (polls as f64 / secs, received as f64 / secs)
}

pub fn print_status(status: &StatusLine<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&Tagged {
                    kind: "status",
                    body: status
                })
                .unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "[{:>7.2}s] {} {:.0} FPS, {:.0} rFPS, received={} skipped={} range={}",
                status.elapsed_secs,
                status.state,
                status.fps,
                status.rfps,
                status.stats.frames_received,
                status.stats.frames_skipped,
                sample_range(&status.stats)
            );
        }
    }
}

/// Final consumer summary.
#[derive(Serialize)]
pub struct ConsumerSummary<'a> {
    pub state: &'a str,
    pub policy: fieldcast_channel::ReceivePolicy,
    pub link_id: Option<&'a str>,
    pub elapsed_secs: f64,
    #[serde(flatten)]
    pub stats: ConsumerStats,
}

pub fn print_summary(summary: &ConsumerSummary<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&Tagged {
                    kind: "summary",
                    body: summary
                })
                .unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let stats = &summary.stats;
            let rows = [
                ("state", summary.state.to_string()),
                ("link", summary.link_id.unwrap_or("-").to_string()),
                ("elapsed", format!("{:.2}s", summary.elapsed_secs)),
                ("received", stats.frames_received.to_string()),
                ("skipped", stats.frames_skipped.to_string()),
                ("discarded", stats.frames_discarded.to_string()),
                ("polls", stats.polls.to_string()),
                ("range", sample_range(stats)),
                ("quit received", stats.quit_received.to_string()),
            ];
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in rows {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let stats = &summary.stats;
            println!(
                "state={} link={} elapsed={:.2}s received={} skipped={} discarded={} polls={} quit_received={}",
                summary.state,
                summary.link_id.unwrap_or("-"),
                summary.elapsed_secs,
                stats.frames_received,
                stats.frames_skipped,
                stats.frames_discarded,
                stats.polls,
                stats.quit_received
            );
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T: Serialize> {
    kind: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

fn sample_range(stats: &ConsumerStats) -> String {
    match (stats.min_sample, stats.max_sample) {
        (Some(min), Some(max)) => format!("{min}..{max}"),
        _ => "-".to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
