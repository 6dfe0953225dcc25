//! Looks up the instances of a service.
//!
//! Usage: `srv-client <service> [server] [search suffix]`
//!
//! `server` defaults to a local Consul agent (`127.0.0.1:8600`) and the search suffix to
//! `.service.consul`.

use std::{env, process};

use log::LevelFilter;
use srv_discovery::{ServiceDiscovery, CONSUL_SEARCH_SUFFIX};

fn main() {
    env_logger::Builder::new()
        .filter_module("srv_discovery", LevelFilter::Debug)
        .filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace)
        .parse_default_env()
        .init();

    let mut args = env::args().skip(1);
    let Some(service) = args.next() else {
        eprintln!("usage: srv-client <service> [server] [search suffix]");
        process::exit(2);
    };
    let server = args.next().unwrap_or_else(|| "127.0.0.1:8600".into());
    let suffix = args.next().unwrap_or_else(|| CONSUL_SEARCH_SUFFIX.into());

    let mut discovery = match ServiceDiscovery::new(&server, suffix) {
        Ok(discovery) => discovery,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    match discovery.discover_all_service_instances(&service) {
        Ok(instances) if instances.is_empty() => println!("no instances of {}", service),
        Ok(instances) => {
            for instance in instances {
                println!("{}", instance);
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}
