use fieldcast_channel::RendezvousConfig;
use fieldcast_compute::ProducerConfig;
use fieldcast_wire::Geometry;

use crate::cmd::{parse_duration, ComputeArgs};
use crate::exit::{compute_error, CliResult, SUCCESS};
use crate::output::{print_rank_reports, OutputFormat};

pub fn run(args: ComputeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = producer_config(&args)?;
    let reports =
        fieldcast_compute::run(&config).map_err(|err| compute_error("compute failed", err))?;

    print_rank_reports(&reports, format);
    Ok(SUCCESS)
}

fn producer_config(args: &ComputeArgs) -> CliResult<ProducerConfig> {
    let rendezvous = args
        .open_port
        .then(|| match &args.descriptor_file {
            Some(path) => RendezvousConfig::with_descriptor_path(path),
            None => RendezvousConfig::default(),
        });

    Ok(ProducerConfig {
        workers: args.workers,
        geometry: Geometry::STANDARD,
        duration: parse_duration(&args.duration)?,
        send_interval: parse_duration(&args.send_interval)?,
        rendezvous,
        allocation: args.allocation.into(),
    })
}
