//! `corrald capacity ...` subcommands.

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::info;

use corral_capacity::{CapacityAccountant, FitRequest};
use corral_core::{
    ClusterId, CorralConfig, OvercommitPolicy, ResourceType, ScopeId, ScopeLevel, ScopeRef,
    ThresholdPolicy,
};
use corral_state::StateStore;

use crate::print_json;

/// Narrowest of the given zone/pod/cluster wins.
#[derive(Args, Debug, Clone, Copy)]
pub struct ScopeArgs {
    #[arg(long)]
    zone: Option<u64>,
    #[arg(long)]
    pod: Option<u64>,
    #[arg(long)]
    cluster: Option<u64>,
}

impl ScopeArgs {
    fn scope(&self) -> Option<ScopeRef> {
        self.cluster
            .map(ScopeRef::cluster)
            .or(self.pod.map(ScopeRef::pod))
            .or(self.zone.map(ScopeRef::zone))
    }

    fn required(&self) -> anyhow::Result<ScopeRef> {
        self.scope().context("one of --zone, --pod or --cluster is required")
    }
}

#[derive(Subcommand)]
pub enum CapacityCommand {
    /// Rank scopes by free capacity, best first.
    Order {
        #[arg(long, default_value = "cluster")]
        level: ScopeLevel,
        #[arg(long, default_value = "cpu")]
        resource: ResourceType,
        #[command(flatten)]
        within: ScopeArgs,
        /// Rank exactly these ids instead of every scope found.
        #[arg(long, value_delimiter = ',')]
        ids: Vec<ScopeId>,
    },

    /// Clusters or pods whose aggregate free CPU and memory fit a VM.
    Fit {
        #[arg(long)]
        cpu: u64,
        #[arg(long)]
        memory: u64,
        #[command(flatten)]
        within: ScopeArgs,
        #[arg(long, default_value = "cluster")]
        level: ScopeLevel,
        #[arg(long, default_value = "cpu")]
        order_by: ResourceType,
    },

    /// Hosts, or clusters/pods containing a host, that fit a VM on their own.
    HostFit {
        #[arg(long)]
        cpu: u64,
        #[arg(long)]
        memory: u64,
        #[command(flatten)]
        within: ScopeArgs,
        #[arg(long, default_value = "host")]
        level: ScopeLevel,
    },

    /// Clusters whose projected consumption crosses the threshold.
    Crossing {
        #[arg(long)]
        resource: ResourceType,
        #[arg(long, default_value = "0")]
        requested: u64,
        #[arg(long)]
        zone: Option<u64>,
        /// Explicit trigger fraction instead of the configured one.
        #[arg(long)]
        trigger: Option<f64>,
    },

    /// Projected consumption of one cluster.
    Consumption {
        #[arg(long)]
        cluster: ClusterId,
        #[arg(long)]
        resource: ResourceType,
        #[arg(long, default_value = "0")]
        requested: u64,
    },

    /// Aggregated capacity of one zone, pod or cluster.
    Summary {
        #[arg(long)]
        resource: ResourceType,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Most consumed scopes first.
    Top {
        #[arg(long)]
        resource: ResourceType,
        #[arg(long, default_value = "cluster")]
        level: ScopeLevel,
        #[command(flatten)]
        within: ScopeArgs,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Serialize)]
struct Consumption {
    cluster: ClusterId,
    resource: ResourceType,
    requested: u64,
    consumption: f64,
    trigger: f64,
    crossing: bool,
}

pub fn run(command: CapacityCommand, store: StateStore, config: &CorralConfig) -> anyhow::Result<()> {
    let overcommit = OvercommitPolicy::from_config(&config.capacity)?;
    let thresholds = ThresholdPolicy::from_config(&config.capacity)?;
    let accountant = CapacityAccountant::new(store, overcommit, thresholds);

    match command {
        CapacityCommand::Order {
            level,
            resource,
            within,
            ids,
        } => {
            let ranking = if ids.is_empty() {
                accountant.rank_within(level, resource, within.scope())?
            } else {
                accountant.order_by_free_capacity(level, resource, &ids)?
            };
            info!(%level, %resource, count = ranking.order.len(), "ranked by free capacity");
            print_json(&ranking)
        }
        CapacityCommand::Fit {
            cpu,
            memory,
            within,
            level,
            order_by,
        } => {
            let request = FitRequest {
                cpu,
                memory,
                within: within.required()?,
                level,
                order_by,
            };
            print_json(&accountant.aggregate_capacity_for_fit(&request)?)
        }
        CapacityCommand::HostFit {
            cpu,
            memory,
            within,
            level,
        } => {
            let scope = within.required()?;
            match level {
                ScopeLevel::Host => {
                    let Some(cluster) = within.cluster else {
                        bail!("host fit needs --cluster");
                    };
                    print_json(&accountant.hosts_with_enough_capacity(cpu, memory, cluster)?)
                }
                ScopeLevel::Cluster => {
                    print_json(&accountant.clusters_with_host_capacity(cpu, memory, scope)?)
                }
                ScopeLevel::Pod => {
                    let Some(zone) = within.zone else {
                        bail!("pod host fit needs --zone");
                    };
                    print_json(&accountant.pods_with_host_capacity(cpu, memory, zone)?)
                }
                ScopeLevel::Zone => bail!("host fit level must be host, cluster or pod"),
            }
        }
        CapacityCommand::Crossing {
            resource,
            requested,
            zone,
            trigger,
        } => {
            let clusters = match trigger {
                Some(trigger) => accountant.clusters_crossing_trigger(resource, zone, trigger, requested)?,
                None => accountant.clusters_crossing_threshold(resource, zone, requested)?,
            };
            print_json(&clusters)
        }
        CapacityCommand::Consumption {
            cluster,
            resource,
            requested,
        } => {
            let consumption = accountant.find_cluster_consumption(cluster, resource, requested)?;
            let trigger = accountant.thresholds().trigger(resource, cluster);
            print_json(&Consumption {
                cluster,
                resource,
                requested,
                consumption,
                trigger,
                crossing: consumption > trigger,
            })
        }
        CapacityCommand::Summary { resource, scope } => {
            print_json(&accountant.summed_capacity(resource, scope.required()?)?)
        }
        CapacityCommand::Top {
            resource,
            level,
            within,
            limit,
        } => print_json(&accountant.top_consumers(resource, level, within.scope(), limit)?),
    }
}
