use fieldcast_channel::HandshakeConfig;
use fieldcast_wire::{Geometry, SAMPLE_BYTES, SAMPLE_SCALE};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("fieldcast {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    let handshake = HandshakeConfig::default();
    let geometry = Geometry::STANDARD;

    println!("name: fieldcast");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: {} {}",
        handshake.protocol_name, handshake.protocol_version
    );
    println!(
        "grid: {}x{} i{} scale={}",
        geometry.width,
        geometry.height,
        SAMPLE_BYTES * 8,
        SAMPLE_SCALE
    );
    println!("required_workers: {}", fieldcast_compute::REQUIRED_WORKERS);
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "target: {}",
        option_env!("FIELDCAST_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));

    Ok(SUCCESS)
}
