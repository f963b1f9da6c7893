// SPDX-License-Identifier: Apache-2.0 OR MIT
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use igmp_membership::lan::Lan;
use igmp_membership::logging::{Facility, Logger, Severity};
use igmp_membership::node::{EventSubscriptionManager, IgmpNode};
use igmp_membership::registry::StaticRegistry;
use igmp_membership::runtime::{NodeInput, NodeRuntime};
use igmp_membership::{log_info, log_notice, log_warning};
use igmp_membership::{Config, ControlEvent, GroupAddress, InterfaceId, MembershipNotification};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Minimum severity to log
    #[arg(long, global = true, default_value = "info")]
    log_level: Severity,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Validate a configuration file and print the resolved timers
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run routers and hosts on a simulated link in virtual time
    Simulate {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = 2)]
        routers: u8,
        #[arg(long, default_value_t = 3)]
        hosts: u8,
        #[arg(long, default_value = "239.1.1.1")]
        group: GroupAddress,
        /// Virtual seconds to run for
        #[arg(long, default_value_t = 600)]
        duration: u64,
        /// Virtual second at which every host leaves the group
        #[arg(long)]
        leave_after: Option<u64>,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Print per-node statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one node in real time on the interfaces from a config file
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Groups to join at startup, as INTERFACE_ID:GROUP
        #[arg(long = "join")]
        joins: Vec<String>,
        /// Seconds between metrics snapshots
        #[arg(long, default_value_t = 60)]
        stats_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logger = if args.json_logs {
        Logger::stderr_json()
    } else {
        Logger::stderr()
    };
    logger.set_global_level(args.log_level);

    match args.command {
        Command::CheckConfig { config } => check_config(&config),
        Command::Simulate {
            config,
            routers,
            hosts,
            group,
            duration,
            leave_after,
            seed,
            json,
        } => {
            let base = match config {
                Some(path) => load_config(&path)?,
                None => Config::default(),
            };
            let scenario = Scenario {
                routers,
                hosts,
                group,
                duration: Duration::from_secs(duration),
                leave_after: leave_after.map(Duration::from_secs),
                seed,
                json,
            };
            simulate(base, scenario, logger)
        }
        Command::Run {
            config,
            joins,
            stats_interval,
        } => run(&config, &joins, stats_interval, logger).await,
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_from_file(path)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let timers = config.timers();
    println!("{} is valid", path.display());
    println!("  enabled:                        {}", config.enabled);
    println!("  multicast forwarding:           {}", config.multicast_forwarding);
    println!("  robustness variable:            {}", timers.robustness_variable);
    println!("  query interval:                 {:?}", timers.query_interval);
    println!("  query response interval:        {:?}", timers.query_response_interval);
    println!("  group membership interval:      {:?}", timers.group_membership_interval);
    println!("  other querier present interval: {:?}", timers.other_querier_present_interval);
    println!("  startup query interval:         {:?}", timers.startup_query_interval);
    println!("  last member query interval:     {:?}", timers.last_member_query_interval);
    println!("  last member query count:        {}", timers.last_member_query_count);
    println!("  unsolicited report interval:    {:?}", timers.unsolicited_report_interval);
    for (id, spec) in config.interface_ids().into_iter().zip(&config.interfaces) {
        println!("  interface {} {} {}", id, spec.name, spec.address);
    }
    Ok(())
}

struct Scenario {
    routers: u8,
    hosts: u8,
    group: GroupAddress,
    duration: Duration,
    leave_after: Option<Duration>,
    seed: u64,
    json: bool,
}

fn simulate(base: Config, scenario: Scenario, logger: Logger) -> Result<()> {
    if scenario.routers == 0 && scenario.hosts == 0 {
        bail!("nothing to simulate: no routers and no hosts");
    }

    let mut lan = Lan::new(logger.clone()).with_seed(scenario.seed);
    for n in 0..scenario.routers {
        let config = Config {
            multicast_forwarding: true,
            ..base.clone()
        };
        lan.add_node(format!("router{}", n + 1), Ipv4Addr::new(10, 0, 0, n + 1), config)?;
    }
    let mut hosts = Vec::new();
    for n in 0..scenario.hosts {
        let config = Config {
            multicast_forwarding: false,
            ..base.clone()
        };
        let handle = lan.add_node(format!("host{}", n + 1), Ipv4Addr::new(10, 0, 1, n + 1), config)?;
        lan.join(handle, scenario.group)?;
        hosts.push(handle);
    }

    match scenario.leave_after {
        Some(leave_at) if leave_at < scenario.duration => {
            lan.run_for(leave_at)?;
            log_notice!(logger, Facility::Simulation, "All hosts leaving {}", scenario.group);
            for handle in &hosts {
                lan.leave(*handle, scenario.group)?;
            }
            lan.run_for(scenario.duration - leave_at)?;
        }
        _ => lan.run_for(scenario.duration)?,
    }

    for transmission in lan.transmissions() {
        println!("{}", transmission);
    }

    if scenario.json {
        let summary: Vec<serde_json::Value> = lan
            .handles()
            .map(|handle| {
                serde_json::json!({
                    "node": lan.name(handle),
                    "address": lan.address(handle).to_string(),
                    "stats": lan.stats(handle),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for handle in lan.handles() {
            let stats = lan.stats(handle);
            println!(
                "{:<8} {:<10} queries={} reports={} leaves={} router_groups={} host_groups={}",
                lan.name(handle),
                lan.address(handle),
                stats.queries_sent,
                stats.reports_sent,
                stats.leaves_sent,
                stats.router_groups,
                stats.host_groups
            );
        }
    }
    Ok(())
}

fn parse_join(spec: &str) -> Result<(InterfaceId, GroupAddress)> {
    let (iface, group) = spec
        .split_once(':')
        .with_context(|| format!("expected INTERFACE_ID:GROUP, got '{}'", spec))?;
    let iface: u32 = iface
        .parse()
        .with_context(|| format!("invalid interface id '{}'", iface))?;
    let group: GroupAddress = group.parse()?;
    Ok((InterfaceId(iface), group))
}

async fn run(path: &Path, joins: &[String], stats_interval: u64, logger: Logger) -> Result<()> {
    let config = load_config(path)?;
    let joins = joins
        .iter()
        .map(|spec| parse_join(spec))
        .collect::<Result<Vec<_>>>()?;

    igmp_membership::stats::describe_metrics();
    let registry = StaticRegistry::from_config(&config);
    let node = IgmpNode::new(config, registry, EventSubscriptionManager::default(), logger.clone())?;
    let mut events = node.subscribe();
    let (runtime, input_tx, mut output_rx) = NodeRuntime::new(node, logger.clone());
    let runtime = runtime.with_stats_interval("igmpd", Duration::from_secs(stats_interval));
    let task = tokio::spawn(runtime.run());

    for (interface, group) in joins {
        input_tx
            .send(NodeInput::Control(ControlEvent::GroupJoined { interface, group }))
            .await?;
    }

    let output_logger = logger.clone();
    tokio::spawn(async move {
        while let Some(packet) = output_rx.recv().await {
            log_info!(
                output_logger,
                Facility::Runtime,
                "send {} on {} to {}: {:?}",
                packet.message.type_name(),
                packet.interface,
                packet.destination,
                packet.encode()
            );
        }
    });

    tokio::spawn(log_events(events, logger.clone()));

    let node = wait_for_runtime(task, tokio::signal::ctrl_c(), input_tx, &logger).await?;
    let stats = node.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Log membership events until the node's event bus closes
async fn log_events(mut events: broadcast::Receiver<MembershipNotification>, logger: Logger) {
    loop {
        match events.recv().await {
            Ok(event) => log_notice!(logger, Facility::Router, "{:?}", event),
            Err(RecvError::Lagged(missed)) => log_warning!(
                logger,
                Facility::Router,
                "Event log lagged, {} membership events dropped",
                missed
            ),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Wait for either `shutdown` or the runtime task to finish
///
/// On shutdown the input channel is closed so the runtime drains and
/// returns its node. A runtime that stops on its own (a fatal error) ends
/// the wait immediately.
async fn wait_for_runtime<S>(
    mut task: JoinHandle<igmp_membership::Result<IgmpNode>>,
    shutdown: S,
    input_tx: mpsc::Sender<NodeInput>,
    logger: &Logger,
) -> Result<IgmpNode>
where
    S: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        result = shutdown => {
            result?;
            log_notice!(logger, Facility::Runtime, "Interrupted, shutting down");
            drop(input_tx);
            Ok(task.await??)
        }
        result = &mut task => {
            let node = result?.context("node runtime stopped")?;
            log_notice!(logger, Facility::Runtime, "Runtime stopped");
            Ok(node)
        }
    }
}
