// SPDX-License-Identifier: GPL-3.0-only

//! Operator CLI around the storage-gc collector

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use storage_gc::{Collector, GcConfig, logging};
use storage_sys::RbdCli;
use storage_types::{Entity, SnapshotId, VolumeId};

/// Dependency-aware deletion of RBD volumes and snapshots
#[derive(Parser)]
#[command(name = "storage-gc-cli")]
#[command(about = "Delete or tombstone RBD volumes and snapshots", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $STORAGE_GC_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ceph cluster name override
    #[arg(long, global = true)]
    cluster: Option<String>,
    /// Ceph client id override
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete a volume, or mark it as zombie while clones still need it
    Delete {
        /// Volume identifier, e.g. lxd/container_web1
        volume: String,
        /// Fail instead of waiting when another pass holds the tree
        #[arg(long)]
        no_wait: bool,
    },
    /// Delete a snapshot, or mark it as zombie while clones still need it
    DeleteSnapshot {
        /// Snapshot identifier, e.g. lxd/image_abc@readonly
        snapshot: String,
        /// Fail instead of waiting when another pass holds the tree
        #[arg(long)]
        no_wait: bool,
    },
    /// Rename a zombie volume back to its live name
    Revive {
        /// Zombie volume identifier, e.g. lxd/zombie_image_abc
        volume: String,
    },
    /// Print the parent snapshots of a volume, nearest first
    Lineage {
        /// Volume identifier
        volume: String,
    },
    /// Decode an identifier without touching the cluster
    Parse {
        /// Volume or snapshot identifier
        identifier: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = GcConfig::resolve(cli.config.as_deref())?;
    if let Some(cluster) = cli.cluster {
        config.cluster = cluster;
    }
    if let Some(user) = cli.user {
        config.user = user;
    }

    logging::init(&config.logging);

    match cli.command {
        Commands::Parse { identifier } => {
            let entity = Entity::parse(&identifier)?;
            println!("{}", serde_json::to_string(&entity)?);
        }
        Commands::Delete { volume, no_wait } => {
            let entity = Entity::from(VolumeId::parse(&volume)?);
            report(&collector(&config)?, &entity, no_wait)?;
        }
        Commands::DeleteSnapshot { snapshot, no_wait } => {
            let entity = Entity::from(SnapshotId::parse(&snapshot)?);
            report(&collector(&config)?, &entity, no_wait)?;
        }
        Commands::Revive { volume } => {
            let volume = VolumeId::parse(&volume)?;
            let alive = collector(&config)?.revive(&volume)?;
            println!("{}", json!({ "target": volume.to_string(), "revived_as": alive.to_string() }));
        }
        Commands::Lineage { volume } => {
            let volume = VolumeId::parse(&volume)?;
            let chain: Vec<String> = collector(&config)?
                .lineage(&volume)?
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("{}", json!({ "target": volume.to_string(), "parents": chain }));
        }
    }

    Ok(())
}

/// Collector over the configured rbd client; only cluster commands need one.
fn collector(config: &GcConfig) -> Result<Collector<RbdCli>> {
    let rbd = RbdCli::new(config.rbd_settings())
        .with_context(|| format!("cannot use rbd binary {:?}", config.rbd_binary))?;
    Ok(Collector::new(rbd, &config.lock_dir))
}

fn report(collector: &Collector<RbdCli>, entity: &Entity, no_wait: bool) -> Result<()> {
    let disposal = if no_wait {
        collector.try_collect(entity)
    } else {
        collector.collect(entity)
    }
    .with_context(|| format!("failed to collect {entity}"))?;

    println!("{}", json!({ "target": entity.to_string(), "outcome": disposal }));
    Ok(())
}
