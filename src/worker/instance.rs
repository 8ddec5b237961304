//! Delivery instance preparation and supervision
//!
//! An accepted assignment becomes an instance: a fresh store, a loaded
//! roster and a running endpoint. One supervision task owns all three until
//! the instance ends:
//!
//! ```text
//!   cancel ────────────▶ Cancelled ──▶ stop endpoint ──▶ close store
//!   all completed ─┐
//!   ceiling ───────┴───▶ Completed ──▶ stop endpoint ──▶ export ──ok──▶ delete file
//!                                                          └─err──▶ keep file
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};

use crate::coordinator::client::CoordinatorClient;
use crate::exam::endpoint::{DeliveryEndpoint, EndpointState};
use crate::exam::events::EventPublisher;
use crate::exam::store::{remove_store_files, DeliveryDatabase};
use crate::metrics;
use crate::models::{Assignment, InstanceStatus, InstanceSummary};

use super::runtime::WorkerError;

/// What every instance on this worker shares
#[derive(Clone)]
pub struct InstanceContext {
    pub client: Arc<CoordinatorClient>,
    pub data_dir: PathBuf,
    pub ceiling: Duration,
    pub retain_exported_stores: bool,
    pub request_logging: bool,
}

/// A delivery instance ready to be supervised
pub struct PreparedInstance {
    pub summary: InstanceSummary,
    store: Arc<DeliveryDatabase>,
    endpoint: DeliveryEndpoint,
    completion: Arc<Notify>,
}

/// How an instance ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOutcome {
    pub delivery_id: i64,
    pub status: InstanceStatus,
    pub exported: bool,
}

/// Create the store, load participants and start the endpoint on `listener`
pub fn prepare(
    assignment: &Assignment,
    listener: TcpListener,
    ctx: &InstanceContext,
) -> Result<PreparedInstance, WorkerError> {
    let delivery_id = assignment.delivery_id;

    let participants = assignment
        .participants()
        .map_err(|e| WorkerError::InvalidAssignment {
            delivery_id,
            reason: format!("bad participant list: {e}"),
        })?;

    let store = DeliveryDatabase::open(delivery_id, &ctx.data_dir)?
        .with_time_budget(assignment.duration_minutes().map(|m| m * 60));
    let loaded = match store.load_participants(&participants) {
        Ok(loaded) => loaded,
        Err(e) => {
            discard(&store);
            return Err(e.into());
        }
    };
    let store = Arc::new(store);

    let state = EndpointState::new(
        delivery_id,
        store.clone(),
        EventPublisher::new(ctx.client.clone(), delivery_id),
        assignment.questions(),
    );
    let completion = state.completion.clone();

    let endpoint = match DeliveryEndpoint::start(listener, state, ctx.request_logging) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            discard(&store);
            return Err(e.into());
        }
    };

    let summary = InstanceSummary {
        id: delivery_id,
        name: assignment.delivery_name.clone(),
        status: InstanceStatus::Starting,
        started_at: Utc::now(),
        participants: loaded,
        port: endpoint.port(),
    };

    Ok(PreparedInstance {
        summary,
        store,
        endpoint,
        completion,
    })
}

/// Resolves once the cancel flag is raised or its sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Own the instance until it ends, then export (if completed) and clean up
pub async fn supervise(
    prepared: PreparedInstance,
    mut cancel: watch::Receiver<bool>,
    status: watch::Sender<InstanceSummary>,
    ctx: InstanceContext,
) -> InstanceOutcome {
    let PreparedInstance {
        summary,
        store,
        endpoint,
        completion,
    } = prepared;
    let delivery_id = summary.id;

    status.send_modify(|s| s.status = InstanceStatus::Running);
    metrics::record_instance_started();
    tracing::info!(
        delivery_id,
        port = summary.port,
        participants = summary.participants,
        "Delivery instance running"
    );

    let final_status = tokio::select! {
        _ = cancelled(&mut cancel) => {
            tracing::info!(delivery_id, "Delivery instance cancelled");
            InstanceStatus::Cancelled
        }
        _ = completion.notified() => {
            tracing::info!(delivery_id, "Delivery instance completed by participants");
            InstanceStatus::Completed
        }
        _ = tokio::time::sleep(ctx.ceiling) => {
            tracing::warn!(delivery_id, ceiling = ?ctx.ceiling, "Delivery instance reached wall-clock ceiling");
            InstanceStatus::Completed
        }
    };

    status.send_modify(|s| s.status = final_status);
    endpoint.stop().await;

    let mut exported = false;
    if final_status == InstanceStatus::Completed {
        exported = export(&store, &ctx).await;
        if exported && !ctx.retain_exported_stores {
            discard(&store);
        }
    }

    metrics::record_instance_finished(final_status.as_str());
    tracing::info!(delivery_id, status = %final_status, exported, "Delivery instance closed");

    InstanceOutcome {
        delivery_id,
        status: final_status,
        exported,
    }
}

async fn export(store: &DeliveryDatabase, ctx: &InstanceContext) -> bool {
    let delivery_id = store.delivery_id();

    let bundle = match store.export_all() {
        Ok(bundle) => bundle,
        Err(e) => {
            metrics::record_export(false);
            tracing::error!(delivery_id, error = %e, "Failed to export delivery store");
            return false;
        }
    };

    match ctx.client.submit_final_results(&bundle).await {
        Ok(_) => {
            metrics::record_export(true);
            tracing::info!(
                delivery_id,
                participants = bundle.participants.len(),
                answers = bundle.answers.len(),
                "Final results submitted"
            );
            true
        }
        Err(e) => {
            metrics::record_export(false);
            tracing::error!(
                delivery_id,
                path = ?store.path(),
                error = %e,
                "Final results not accepted, keeping store for recovery"
            );
            false
        }
    }
}

fn discard(store: &DeliveryDatabase) {
    let Some(path) = store.path() else {
        return;
    };
    if let Err(e) = remove_store_files(path) {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove delivery store");
    }
}
