/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

//! InfiniBand fabric controller daemon.
//!
//! Bridges the Kubernetes orchestrator and the fabric's subnet manager:
//! pods scheduled onto InfiniBand networks get a unique port GUID persisted
//! into their network annotations and admitted into the network's partition;
//! deleted pods get the inverse.

use std::sync::Arc;
use std::time::Duration;

use k8s_client::{KubeOrchestrator, PodOrchestrator};
use tokio::sync::watch;

pub mod cfg;
pub mod guid;
pub mod reconcile;
pub mod watcher;

#[cfg(test)]
mod tests;

pub use cfg::Options;

/// Builds every component in the required order and runs until a shutdown
/// signal arrives.
///
/// Startup order is strict: config → orchestrator client → GUID pool
/// (including the recovery pass over existing pods) → subnet manager plugin
/// load and handshake → watcher → periodic reconcilers. Any failure on this
/// path is fatal and surfaces as a non-zero exit.
pub async fn run(options: &Options) -> eyre::Result<()> {
    let config_path = options
        .config_path
        .as_deref()
        .ok_or_else(|| eyre::eyre!("--config-path is required"))?;
    let config = cfg::DaemonConfig::load(config_path).await?;
    config.validate()?;
    tracing::info!(
        plugin = %config.plugin,
        periodic_update = config.periodic_update,
        "starting InfiniBand fabric controller"
    );

    let kube = k8s_client::connect().await?;
    let orchestrator: Arc<dyn PodOrchestrator> = Arc::new(KubeOrchestrator::new(kube.clone()));

    let pool = Arc::new(guid::GuidPool::new(&config.guid_pool)?);
    pool.init(orchestrator.as_ref()).await?;

    let sm_client = sm::load_plugin(&config.plugin, &config.sm)?;
    sm_client.validate().await?;
    tracing::info!(plugin = sm_client.name(), "subnet manager plugin validated");

    let pending = Arc::new(watcher::PendingWork::default());
    let (stop_tx, stop_rx) = watch::channel(false);

    let pod_watcher =
        watcher::Watcher::new(kube, watcher::PodEventHandler::new(pending.clone()));
    let watcher_task = tokio::spawn(pod_watcher.run(stop_rx.clone()));

    let reconciler = Arc::new(reconcile::Reconciler::new(
        orchestrator,
        pool,
        sm_client,
        pending,
        Duration::from_secs(config.periodic_update),
    ));
    let add_task = tokio::spawn(reconciler.clone().run_add(stop_rx.clone()));
    let delete_task = tokio::spawn(reconciler.run_delete(stop_rx));

    wait_for_shutdown_signal().await?;
    tracing::info!("received shutdown signal, terminating");

    // In-flight passes run to completion; the tasks observe the stop channel
    // between passes.
    let _ = stop_tx.send(true);
    let _ = tokio::join!(watcher_task, add_task, delete_task);

    Ok(())
}

async fn wait_for_shutdown_signal() -> eyre::Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }

    Ok(())
}
