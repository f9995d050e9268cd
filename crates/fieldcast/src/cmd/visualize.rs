use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use fieldcast_channel::{ConsumerSession, RendezvousConfig};
use fieldcast_wire::Geometry;

use crate::cmd::{parse_duration, VisualizeArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS};
use crate::output::{
    interval_rates, print_status, print_summary, ConsumerSummary, OutputFormat, StatusLine,
};

pub fn run(args: VisualizeArgs, format: OutputFormat) -> CliResult<i32> {
    let tick = parse_duration(&args.tick)?;
    let status_interval = parse_duration(&args.status_interval)?;
    let duration = args.duration.as_deref().map(parse_duration).transpose()?;
    let config = match &args.descriptor_file {
        Some(path) => RendezvousConfig::with_descriptor_path(path),
        None => RendezvousConfig::default(),
    };

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut session =
        ConsumerSession::connect_or_unconnected(&config, Geometry::STANDARD, args.policy.into());
    let started = Instant::now();
    let mut last_status = started;
    let mut last_stats = session.stats();

    while running.load(Ordering::SeqCst) {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }

        let events = session
            .poll()
            .map_err(|err| channel_error("stream failed", err))?;
        if events.peer_quit {
            tracing::info!("producer ended the stream");
            if args.exit_on_quit {
                break;
            }
        }

        let since_status = last_status.elapsed();
        if since_status >= status_interval {
            let stats = session.stats();
            let (fps, rfps) = interval_rates(&last_stats, &stats, since_status.as_secs_f64());
            print_status(
                &StatusLine {
                    state: session.state().as_str(),
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    fps,
                    rfps,
                    stats,
                },
                format,
            );
            last_status = Instant::now();
            last_stats = stats;
        }

        thread::sleep(tick);
    }

    session
        .shutdown()
        .map_err(|err| channel_error("teardown failed", err))?;

    print_summary(
        &ConsumerSummary {
            state: session.state().as_str(),
            policy: session.policy(),
            link_id: session.handle().link_id(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            stats: session.stats(),
        },
        format,
    );
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| {
        CliError::new(
            crate::exit::INTERNAL,
            format!("signal handler setup failed: {err}"),
        )
    })
}
