//! Ingestion loop and background jobs.
//!
//! ```text
//! serial ─► line chunks ─► FrameAssembler ─┬─► heartbeat ─► fanout
//!                                          └─► packet ─► gate? ─► dedup ─► fanout
//!                                                                       └─► alerts
//! timers: sync flush, alert dispatch, dead-man tick, link check, cache refresh
//! ```

use crate::context::GatewayContext;
use crate::dedup::Classification;
use crate::error::{GatewayError, GatewayResult};
use crate::fanout::FanoutMessage;
use crate::framing::{FrameAssembler, FrameEvent};
use crate::monitor::{link_present, LinkAlert};
use crate::packet::SensorPacket;
use crate::scheduler::{spawn_aligned, spawn_every};
use crate::transport;
use chrono::{DateTime, Local};
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// What happened to one frame event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Heartbeat forwarded to subscribers
    Heartbeat,
    /// Object that is not a sensor packet
    Invalid,
    /// Packet dropped while the ingestion gate was closed
    GateClosed,
    /// Repeated sequence number
    Duplicate,
    /// Packet buffered and forwarded
    Accepted {
        /// New sensor or updated reading
        classification: Classification,
        /// Violations recorded for it
        violations: usize,
    },
}

/// Handle one frame event received at `now`.
pub async fn handle_event(
    ctx: &GatewayContext,
    event: FrameEvent,
    now: DateTime<Local>,
) -> EventOutcome {
    let value = match event {
        FrameEvent::Heartbeat(payload) => {
            tracing::trace!(%payload, "Heartbeat");
            ctx.fanout.publish(FanoutMessage::Heartbeat(payload));
            return EventOutcome::Heartbeat;
        }
        FrameEvent::Packet(value) => value,
    };

    let packet = match SensorPacket::from_json(&value, now) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring frame");
            return EventOutcome::Invalid;
        }
    };

    if !ctx.gate.is_open() {
        tracing::debug!(address = %packet.address, "Gate closed; packet dropped");
        return EventOutcome::GateClosed;
    }

    let classification = ctx.states.lock().await.observe(&packet);
    if classification == Classification::DuplicatePacket {
        tracing::trace!(address = %packet.address, sequence = packet.sequence, "Duplicate packet");
        return EventOutcome::Duplicate;
    }

    ctx.fanout.publish(FanoutMessage::reading(&packet));

    let violations = match ctx.cache.for_alerting(&packet.address).await {
        Some(info) => ctx.alerts.lock().await.evaluate(&packet, &info, now).len(),
        None => {
            tracing::trace!(address = %packet.address, "No alerting entry for sensor");
            0
        }
    };

    EventOutcome::Accepted {
        classification,
        violations,
    }
}

/// Feed a chunk stream through the assembler until it ends or fails.
///
/// Returns the error that ended the stream, if any.
pub async fn ingest<S>(ctx: &GatewayContext, chunks: S) -> Option<GatewayError>
where
    S: Stream<Item = GatewayResult<String>>,
{
    let mut assembler = FrameAssembler::new(ctx.config.serial.heartbeat_marker.clone());
    futures::pin_mut!(chunks);
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => {
                for event in assembler.push(&chunk) {
                    handle_event(ctx, event, Local::now()).await;
                }
            }
            Err(e) => return Some(e),
        }
    }
    None
}

/// Feed one link observation to the monitor and send the resulting alert, if any.
pub async fn observe_link(ctx: &GatewayContext, present: bool, now: Instant) -> Option<LinkAlert> {
    let alert = ctx.link.lock().await.observe(present, now);
    if let Some(alert) = alert {
        let body = format!(
            "<p>{alert}.</p><p>Device: {}</p>",
            ctx.config.serial.device.display()
        );
        ctx.notify_admins(&alert.subject(), &body).await;
    }
    alert
}

/// Keep the serial link open and ingest from it forever.
pub async fn run_reader(ctx: Arc<GatewayContext>) {
    let delay = ctx.config.serial.reconnect_delay;
    loop {
        let failure = match transport::open(&ctx.config.serial) {
            Ok(chunks) => ingest(&ctx, chunks).await,
            Err(e) => Some(e),
        };
        match failure {
            Some(GatewayError::SerialFeatureDisabled) => {
                tracing::error!("Serial reader stopped: built without serial support");
                return;
            }
            Some(e) if e.is_transport() => {
                tracing::warn!(error = %e, "Serial transport failure");
                observe_link(&ctx, false, Instant::now()).await;
            }
            Some(e) => tracing::error!(error = %e, "Serial reader failed"),
            None => tracing::warn!("Serial stream ended"),
        }
        tokio::time::sleep(delay).await;
    }
}

/// Start every periodic job.
pub fn spawn_jobs(ctx: &Arc<GatewayContext>) -> Vec<JoinHandle<()>> {
    let config = &ctx.config;
    let mut handles = Vec::new();

    let c = Arc::clone(ctx);
    handles.push(spawn_every("cache-refresh", config.cache.refresh_every, move || {
        let c = Arc::clone(&c);
        async move { c.refresh_cache().await.map(|_| ()) }
    }));

    let c = Arc::clone(ctx);
    handles.push(spawn_aligned("alert-dispatch", config.alerts.dispatch_every, move |now| {
        let c = Arc::clone(&c);
        async move {
            c.dispatcher.dispatch(now).await;
            Ok(())
        }
    }));

    let c = Arc::clone(ctx);
    handles.push(spawn_aligned("dead-man", Duration::from_secs(60), move |now| {
        let c = Arc::clone(&c);
        async move { c.dead_man.tick(now).await.map(|_| ()) }
    }));

    let c = Arc::clone(ctx);
    handles.push(spawn_aligned("link-check", config.link_health.check_every, move |_| {
        let c = Arc::clone(&c);
        async move {
            let present = link_present(&c.config.serial.device);
            observe_link(&c, present, Instant::now()).await;
            Ok(())
        }
    }));

    handles
}

/// Background tasks of one [`run`]; aborted together, including the sync schedule, when
/// dropped.
struct JobSet {
    ctx: Arc<GatewayContext>,
    handles: Vec<JoinHandle<()>>,
}

impl Drop for JobSet {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.ctx.sync.stop();
        tracing::debug!("Background jobs stopped");
    }
}

/// Run the gateway: initial cache load, jobs, optional fanout listener and the reader.
///
/// Dropping the returned future stops every job it started.
pub async fn run(ctx: Arc<GatewayContext>) -> GatewayResult<()> {
    let mut jobs = JobSet {
        ctx: Arc::clone(&ctx),
        handles: Vec::new(),
    };

    match ctx.refresh_cache().await {
        Ok(count) => tracing::info!(sensors = count, "Active sensor cache loaded"),
        Err(e) => tracing::error!(error = %e, "Initial cache refresh failed"),
    }

    jobs.handles.extend(spawn_jobs(&ctx));

    if let Some(addr) = ctx.config.fanout.listen {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let fanout = ctx.fanout.clone();
        jobs.handles.push(tokio::spawn(async move {
            if let Err(e) = fanout.serve(listener).await {
                tracing::error!(error = %e, "Fanout listener stopped");
            }
        }));
    }

    run_reader(Arc::clone(&ctx)).await;
    Ok(())
}
