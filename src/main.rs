use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, Level};

use vmoc::client_interface::{ClientInterface, TcpFeed};
use vmoc::slice_registry::{SliceConfiguration, VlanConfiguration};
use vmoc::{Vmoc, VmocConfig};

#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// JSON configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Address physical switches connect to
    #[clap(long)]
    listen: Option<String>,

    /// Address of the management interface
    #[clap(long)]
    management: Option<String>,

    /// Log level: trace, debug, info, warn or error
    #[clap(long, default_value = "info")]
    log_level: Level,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the proxy (the default)
    Serve,
    /// Register a slice with a running proxy
    Register {
        slice_id: String,
        /// VLAN tag and controller URL pairs, e.g. 100 tcp:10.0.0.5:6633
        vlan_controllers: Vec<String>,
    },
    /// Unregister a slice from a running proxy
    Unregister { slice_id: String },
}

fn load_config(args: &Args) -> Result<VmocConfig> {
    let mut config = match args.config {
        Some(ref path) => VmocConfig::load(path)?,
        None => VmocConfig::default(),
    };
    if let Some(ref listen) = args.listen {
        config.switch_listen_addr = listen.clone();
    }
    if let Some(ref management) = args.management {
        config.management_addr = management.clone();
    }
    Ok(config)
}

fn slice_config(slice_id: &str, vlan_controllers: &[String]) -> Result<SliceConfiguration> {
    if vlan_controllers.len() % 2 != 0 {
        bail!("expected VLAN tag and controller URL pairs");
    }
    let vlan_configs = vlan_controllers
        .chunks(2)
        .map(|pair| -> Result<VlanConfiguration> {
            let vlan_tag = pair[0]
                .parse()
                .with_context(|| format!("bad VLAN tag {:?}", pair[0]))?;
            Ok(VlanConfiguration {
                vlan_tag,
                controller_url: Some(pair[1].clone()),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(SliceConfiguration::new(slice_id, vlan_configs))
}

/// Sends one feed message to the management interface of a running proxy.
fn send_to_vmoc(config: &VmocConfig, update: impl FnOnce(&ClientInterface<TcpFeed>)) -> Result<()> {
    let feed = TcpFeed::new(&config.management_addr, Duration::from_secs(5));
    let client = ClientInterface::new(feed, config.probe_interval());
    update(&client);
    client.tick();
    if client.pending() > 0 {
        bail!("management interface at {} unreachable", config.management_addr);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(args.log_level)
        .init();
    let config = load_config(&args)?;

    match args.command {
        None | Some(Command::Serve) => {
            let vmoc = Arc::new(Vmoc::new(config));
            if let Err(e) = vmoc.run() {
                error!("{}", e);
                return Err(e).context("vmoc stopped");
            }
        }
        Some(Command::Register {
            ref slice_id,
            ref vlan_controllers,
        }) => {
            let slice = slice_config(slice_id, vlan_controllers)?;
            send_to_vmoc(&config, |client| client.register(slice))?;
        }
        Some(Command::Unregister { ref slice_id }) => {
            send_to_vmoc(&config, |client| client.unregister(slice_id))?;
        }
    }
    Ok(())
}
