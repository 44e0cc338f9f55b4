//! The bitrate probe engine
//!
//! A probe runs as a single tokio task. Everything that can happen to a
//! session (stop requests, the watchdog, the optional deadline, the
//! handshake, endpoint events, candidate and statistics completions, and
//! the two ticks) is multiplexed through one biased `select!`, so session
//! state is never shared and needs no locking. Leaving the loop is the only
//! way to stop, which is what makes stop idempotent: the report is built
//! once, after the loop.

use crate::config::constants::{
    CHANNEL_LABEL, SAMPLING_PERIOD, SATURATION_TICK, WATCHDOG_TIMEOUT,
};
use crate::config::{ProbeConfig, ProbeVariant};
use crate::event::{EventStream, ProbeEvent};
use crate::negotiator::negotiate;
use crate::report::{Report, ReportBuilder, TestTiming};
use crate::sampler::{BitrateSample, BitrateSampler};
use crate::saturator::ChannelSaturator;
use crate::transport_pair::{Role, TransportPair};
use crate::warnings::{WarningMonitor, WarningTransition};
use crate::watchdog::Watchdog;
use bitprobe_core::{
    resolve_ice_stats, Clock, DataChannel, DiagnosticError, IceStatsSnapshot, PeerConnectionState,
    PeerEvent, PeerTransport, ProbeError, TokioClock,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Lifecycle of a probe session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Constructed, endpoints not yet created
    Created,
    /// Handshake in progress
    Negotiating,
    /// Channel open, pump and sampler running
    Streaming,
    /// Finished; the report has been emitted
    Stopped,
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeState::Created => "created",
            ProbeState::Negotiating => "negotiating",
            ProbeState::Streaming => "streaming",
            ProbeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Command {
    Stop,
}

/// Control handle for a running probe.
///
/// Dropping the handle stops the probe as if [`stop`](ProbeHandle::stop)
/// had been called.
#[derive(Debug)]
pub struct ProbeHandle {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ProbeState>,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Probe id, used in log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the probe to stop. Safe to call any number of times, including
    /// after the probe has already ended.
    pub fn stop(&self) {
        if self.commands.send(Command::Stop).is_err() {
            trace!("Probe {} already stopped", self.id);
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProbeState {
        *self.state.borrow()
    }

    /// Whether the probe task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Entry point for running bitrate probes
#[derive(Debug)]
pub struct BitrateProbe;

impl BitrateProbe {
    /// Start a probe on the current tokio runtime.
    ///
    /// The watchdog is armed immediately. Configuration problems are not
    /// returned here; they surface as an `Error` event followed by the
    /// final `End` event, like every other failure.
    pub fn spawn(
        transport: Arc<dyn PeerTransport>,
        config: ProbeConfig,
        variant: ProbeVariant,
    ) -> (ProbeHandle, EventStream) {
        Self::spawn_with_clock(transport, config, variant, Arc::new(TokioClock))
    }

    /// Start a probe reading time from `clock`
    pub fn spawn_with_clock(
        transport: Arc<dyn PeerTransport>,
        config: ProbeConfig,
        variant: ProbeVariant,
        clock: Arc<dyn Clock>,
    ) -> (ProbeHandle, EventStream) {
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ProbeState::Created);

        let watchdog = Watchdog::arm(WATCHDOG_TIMEOUT);
        let session = Session::new(id, config, variant, clock, events_tx, state_tx);
        info!("Starting probe {} ({})", id, session.variant.test_name);

        let task = tokio::spawn(session.run(transport, commands_rx, watchdog));

        (
            ProbeHandle {
                id,
                commands: commands_tx,
                state: state_rx,
                task,
            },
            EventStream::new(events_rx),
        )
    }
}

/// Work completing in the background of the session loop
enum Completion {
    CandidateAdded(Result<(), ProbeError>),
    StatsResolved(Result<IceStatsSnapshot, ProbeError>),
}

/// What woke the session loop
enum Wake {
    Stop,
    Watchdog,
    Deadline,
    Negotiated(Result<(), DiagnosticError>),
    Peer(Option<(Role, PeerEvent)>),
    Completed(Completion),
    Saturate,
    Sample,
}

async fn until(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(deadline) => deadline.as_mut().await,
        None => pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}

async fn settle<T>(future: &mut Option<BoxFuture<'static, T>>) -> T {
    match future {
        Some(future) => future.as_mut().await,
        None => pending().await,
    }
}

struct Session {
    id: Uuid,
    config: ProbeConfig,
    variant: ProbeVariant,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<ProbeEvent>,
    state: watch::Sender<ProbeState>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    errors: Vec<DiagnosticError>,
    samples: Vec<BitrateSample>,
    sampler: BitrateSampler,
    warnings: Option<WarningMonitor>,
    ice_stats: Option<IceStatsSnapshot>,
    stats_requested: bool,
}

/// Resources that exist once setup succeeded
struct Streams {
    pair: TransportPair,
    channel: Arc<dyn DataChannel>,
}

impl Session {
    fn new(
        id: Uuid,
        config: ProbeConfig,
        variant: ProbeVariant,
        clock: Arc<dyn Clock>,
        events: mpsc::UnboundedSender<ProbeEvent>,
        state: watch::Sender<ProbeState>,
    ) -> Self {
        let warnings = variant
            .low_bitrate_warnings
            .then(|| WarningMonitor::new(config.min_bitrate_threshold));
        Self {
            id,
            started_at: clock.now(),
            started_wall: clock.wall_clock(),
            config,
            variant,
            clock,
            events,
            state,
            errors: Vec::new(),
            samples: Vec::new(),
            sampler: BitrateSampler::new(),
            warnings,
            ice_stats: None,
            stats_requested: false,
        }
    }

    fn emit(&self, event: ProbeEvent) {
        // The consumer may have dropped its stream; the probe still finishes
        if self.events.send(event).is_err() {
            trace!("Probe {} has no event consumer", self.id);
        }
    }

    fn set_state(&self, state: ProbeState) {
        debug!("Probe {} is {}", self.id, state);
        self.state.send_replace(state);
    }

    fn record_error(&mut self, error: DiagnosticError) {
        warn!(
            "Probe {} error: {}{}",
            self.id,
            error.message,
            error
                .cause
                .as_deref()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default()
        );
        self.errors.push(error.clone());
        self.emit(ProbeEvent::Error { error });
    }

    /// Create both endpoints and the saturated channel
    fn setup(&self, transport: &dyn PeerTransport) -> Result<Streams, DiagnosticError> {
        if let Err(e) = self.config.validate() {
            return Err(match e {
                ProbeError::MissingConfiguration { .. } => {
                    DiagnosticError::new("No iceServers found")
                }
                other => DiagnosticError::with_cause("Invalid probe configuration", &other),
            });
        }

        let pair = TransportPair::open(
            transport,
            &self.config.ice_servers,
            self.variant.receiver_policy,
        )
        .map_err(|e| DiagnosticError::with_cause("Unable to create peer connection", &e))?;

        let channel = pair
            .connection(Role::Sender)
            .create_data_channel(CHANNEL_LABEL)
            .map_err(|e| DiagnosticError::with_cause("Error creating data channel", &e))?;

        Ok(Streams { pair, channel })
    }

    async fn run(
        mut self,
        transport: Arc<dyn PeerTransport>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut watchdog: Watchdog,
    ) {
        let streams = match self.setup(transport.as_ref()) {
            Ok(streams) => streams,
            Err(error) => {
                self.record_error(error);
                self.finish(None);
                return;
            }
        };

        self.set_state(ProbeState::Negotiating);
        let Streams { mut pair, channel } = streams;
        self.drive(&mut pair, channel, &mut commands, &mut watchdog)
            .await;
        self.finish(Some(&pair));
    }

    async fn drive(
        &mut self,
        pair: &mut TransportPair,
        channel: Arc<dyn DataChannel>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        watchdog: &mut Watchdog,
    ) {
        let mut deadline = self.config.duration.map(|d| Box::pin(sleep(d)));

        let sender = pair.connection(Role::Sender).clone();
        let receiver = pair.connection(Role::Receiver).clone();
        let mut negotiation: Option<BoxFuture<'static, Result<(), DiagnosticError>>> =
            Some(Box::pin(async move {
                negotiate(sender.as_ref(), receiver.as_ref()).await
            }));

        let mut pending_work: FuturesUnordered<BoxFuture<'static, Completion>> =
            FuturesUnordered::new();
        let mut peer_events_open = true;
        let mut saturator: Option<ChannelSaturator> = None;
        let mut saturation: Option<Interval> = None;
        let mut sampling: Option<Interval> = None;

        loop {
            let wake = tokio::select! {
                biased;
                _ = commands.recv() => Wake::Stop,
                _ = watchdog.expired() => Wake::Watchdog,
                _ = until(&mut deadline) => Wake::Deadline,
                result = settle(&mut negotiation) => Wake::Negotiated(result),
                event = pair.next_event(), if peer_events_open => Wake::Peer(event),
                Some(done) = pending_work.next(), if !pending_work.is_empty() => Wake::Completed(done),
                _ = tick(&mut saturation) => Wake::Saturate,
                _ = tick(&mut sampling) => Wake::Sample,
            };

            match wake {
                Wake::Stop => {
                    info!("Probe {} stop requested", self.id);
                    return;
                }
                Wake::Watchdog => {
                    self.record_error(watchdog.timeout_error());
                    return;
                }
                Wake::Deadline => {
                    info!("Probe {} reached its configured duration", self.id);
                    return;
                }
                Wake::Negotiated(result) => {
                    negotiation = None;
                    match result {
                        Ok(()) => debug!("Probe {} negotiated", self.id),
                        Err(error) => {
                            self.record_error(error);
                            return;
                        }
                    }
                }
                Wake::Peer(None) => {
                    peer_events_open = false;
                }
                Wake::Peer(Some((role, event))) => {
                    trace!("Probe {} {} event: {}", self.id, role, event.event_type());
                    match event {
                        PeerEvent::IceCandidate(candidate) => {
                            if let Some(delivery) = pair.forward_candidate(role, candidate) {
                                pending_work.push(Box::pin(async move {
                                    Completion::CandidateAdded(delivery.await)
                                }));
                            }
                        }
                        PeerEvent::ConnectionStateChanged(PeerConnectionState::Connected)
                            if role == Role::Receiver && !self.stats_requested =>
                        {
                            self.stats_requested = true;
                            let connection = pair.connection(Role::Receiver).clone();
                            pending_work.push(Box::pin(async move {
                                Completion::StatsResolved(
                                    resolve_ice_stats(connection.as_ref()).await,
                                )
                            }));
                        }
                        PeerEvent::ChannelOpened { label }
                            if role == Role::Sender && label == CHANNEL_LABEL =>
                        {
                            if saturator.is_none() {
                                info!("Probe {} channel open, streaming", self.id);
                                saturator = Some(ChannelSaturator::new(channel.clone()));
                                let mut pump = interval(SATURATION_TICK);
                                pump.set_missed_tick_behavior(MissedTickBehavior::Skip);
                                saturation = Some(pump);
                                sampling = Some(interval(SAMPLING_PERIOD));
                                self.set_state(ProbeState::Streaming);
                            }
                        }
                        PeerEvent::Message { data, .. } if role == Role::Receiver => {
                            self.sampler.record_bytes(data.len());
                        }
                        PeerEvent::ChannelClosed { label } => {
                            debug!("Probe {} {} saw channel {} close", self.id, role, label);
                        }
                        _ => {}
                    }
                }
                Wake::Completed(Completion::CandidateAdded(result)) => {
                    if let Err(e) = result {
                        self.record_error(DiagnosticError::with_cause(
                            "Unable to add candidate",
                            &e,
                        ));
                    }
                }
                Wake::Completed(Completion::StatsResolved(result)) => match result {
                    Ok(snapshot) => {
                        debug!(
                            "Probe {} resolved {} candidate stats",
                            self.id,
                            snapshot.ice_candidate_stats.len()
                        );
                        self.ice_stats = Some(snapshot);
                    }
                    Err(e) => self.record_error(DiagnosticError::with_cause(
                        "Unable to generate WebRTC stats report",
                        &e,
                    )),
                },
                Wake::Saturate => {
                    if let Some(saturator) = saturator.as_mut() {
                        if let Err(e) = saturator.pump() {
                            debug!("Probe {} pump interrupted: {}", self.id, e);
                        }
                    }
                }
                Wake::Sample => self.sample(watchdog),
            }
        }
    }

    fn sample(&mut self, watchdog: &mut Watchdog) {
        let Some(value) = self.sampler.sample(self.clock.now()) else {
            return;
        };

        debug!("Probe {} bitrate {:.3} kbps", self.id, value);
        self.samples.push(BitrateSample {
            value,
            timestamp: self.clock.wall_clock(),
        });
        self.emit(ProbeEvent::Bitrate { value });

        if value > 0.0 && watchdog.is_armed() {
            debug!("Probe {} saw data, watchdog disarmed", self.id);
            watchdog.disarm();
        }

        let transition = match self.warnings.as_mut() {
            Some(monitor) => monitor.observe(value),
            None => None,
        };
        match transition {
            Some(WarningTransition::Raised(kind)) => self.emit(ProbeEvent::Warning { kind }),
            Some(WarningTransition::Cleared(kind)) => {
                self.emit(ProbeEvent::WarningCleared { kind })
            }
            None => {}
        }
    }

    fn finish(mut self, pair: Option<&TransportPair>) {
        if let Some(pair) = pair {
            pair.close();
        }
        self.set_state(ProbeState::Stopped);

        let elapsed = self.clock.now().duration_since(self.started_at);
        let report: Report = ReportBuilder::new(
            self.variant.test_name.clone(),
            self.config.min_bitrate_threshold,
            self.variant.grade,
        )
        .errors(std::mem::take(&mut self.errors))
        .values(self.samples.iter().map(|sample| sample.value).collect())
        .ice_stats(self.ice_stats.take())
        .build(TestTiming::new(self.started_wall, elapsed));

        info!(
            "Probe {} finished after {}ms: average {:.3} kbps over {} samples, {} errors",
            self.id,
            report.test_timing.duration,
            report.average_bitrate,
            report.values.len(),
            report.errors.len()
        );
        self.emit(ProbeEvent::End { report });
    }
}
