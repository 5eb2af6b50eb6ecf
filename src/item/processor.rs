//! Upload driver with perceived-progress smoothing.
//!
//! The processor sends one process request and reports
//! `Start → Progress* → (LoadPerceived | Error | Abort)`. Alongside the real
//! transfer it runs a randomized timer that walks a perceived progress value
//! from 0 to 1 over 750–1500 ms in 25–250 ms steps. Completion is only
//! reported once the server answered AND the perceived value reached 1, so
//! fast uploads never jump straight to done. The progress handed out is the
//! smaller of the two values, or `None` when the transfer size is unknown.

use crate::infrastructure::{Channel, Runtime, TimerId, TimerTask};
use crate::transport::{Request, RequestId, Response, ResponseKind, ResponseMapping, TransportEvent};

use super::ItemId;

const PERCEIVED_DURATION_MS: std::ops::RangeInclusive<u64> = 750..=1500;
const PERCEIVED_TICK_MS: std::ops::RangeInclusive<u64> = 25..=250;

/// Processor lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    Start,
    Progress(Option<f64>),
    /// The server answered; completion may still wait for perceived progress.
    Load(String),
    /// Upload complete from the user's point of view; carries the server id.
    LoadPerceived(String),
    Error(Response),
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    /// Output is being prepared; no request yet.
    Preparing,
    Uploading(RequestId),
    /// Server answered, perceived progress still running.
    Loaded,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Perceived {
    started_at: u64,
    duration: u64,
    progress: f64,
}

/// Drives the upload of one item.
#[derive(Debug, Default)]
pub struct Processor {
    phase: Phase,
    timer: Option<TimerId>,
    perceived: Option<Perceived>,
    real: Option<f64>,
    server_id: Option<String>,
    on_load: ResponseMapping,
    on_error: ResponseMapping,
}

impl Processor {
    /// Returns whether an upload is being prepared or in flight.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Preparing | Phase::Uploading(_) | Phase::Loaded)
    }

    /// Marks the start of output preparation, before the request exists.
    pub fn prepare(&mut self, rt: &mut Runtime) {
        self.reset(rt);
        self.phase = Phase::Preparing;
    }

    /// Sends the upload.
    ///
    /// Does nothing when the processor was aborted while preparing. A missing
    /// request means the server has no process endpoint.
    pub fn process(
        &mut self,
        item: &ItemId,
        request: Option<Request>,
        mapping: (ResponseMapping, ResponseMapping),
        perceived: bool,
        rt: &mut Runtime,
    ) -> Vec<ProcessorEvent> {
        if !matches!(self.phase, Phase::Idle | Phase::Preparing) {
            tracing::debug!(%item, phase = ?self.phase, "process skipped");
            return Vec::new();
        }

        let mut events = vec![ProcessorEvent::Start];
        let Some(request) = request else {
            self.phase = Phase::Done;
            events.push(ProcessorEvent::Error(Response::error(0, "No process endpoint configured")));
            return events;
        };

        (self.on_load, self.on_error) = mapping;
        self.real = Some(0.0);
        self.phase = Phase::Uploading(rt.send(item, Channel::Processor, request));

        if perceived {
            self.perceived = Some(Perceived {
                started_at: rt.now(),
                duration: rt.random(PERCEIVED_DURATION_MS),
                progress: 0.0,
            });
            events.extend(self.tick(item, rt));
        }
        events
    }

    /// Advances perceived progress; called when the item's timer fires.
    pub fn on_tick(&mut self, item: &ItemId, rt: &mut Runtime) -> Vec<ProcessorEvent> {
        self.timer = None;
        if !matches!(self.phase, Phase::Uploading(_) | Phase::Loaded) {
            return Vec::new();
        }
        self.tick(item, rt)
    }

    fn tick(&mut self, item: &ItemId, rt: &mut Runtime) -> Vec<ProcessorEvent> {
        let Some(perceived) = self.perceived.as_mut() else {
            return Vec::new();
        };

        let runtime = rt.now().saturating_sub(perceived.started_at);
        if runtime >= perceived.duration {
            perceived.progress = 1.0;
        } else {
            perceived.progress = runtime as f64 / perceived.duration as f64;
            let delay = rt.random(PERCEIVED_TICK_MS).min(perceived.duration - runtime);
            self.timer = Some(rt.schedule(delay, TimerTask::PerceivedProgress { item: item.clone() }));
        }

        let mut events = vec![ProcessorEvent::Progress(self.progress())];
        events.extend(self.try_complete(rt));
        events
    }

    /// Handles a transport callback for the upload request.
    pub fn on_transport(&mut self, id: RequestId, event: TransportEvent, rt: &mut Runtime) -> Vec<ProcessorEvent> {
        if self.phase != Phase::Uploading(id) {
            return Vec::new();
        }

        match event {
            TransportEvent::Headers(_) => Vec::new(),
            TransportEvent::Progress {
                computable,
                loaded,
                total,
            } => {
                self.real = (computable && total > 0).then(|| (loaded as f64 / total as f64).min(1.0));
                vec![ProcessorEvent::Progress(self.progress())]
            }
            TransportEvent::Load(response) => {
                rt.finish(id);
                let Some(server_id) = self.on_load.extract(&response).filter(|found| !found.trim().is_empty()) else {
                    tracing::warn!(request = ?id, code = response.code, "upload response carried no server id");
                    self.stop_timer(rt);
                    self.phase = Phase::Done;
                    return vec![ProcessorEvent::Error(Response::error(response.code, "Missing server id"))];
                };
                self.server_id = Some(server_id.clone());
                self.real = self.real.map(|_| 1.0);
                self.phase = Phase::Loaded;

                let mut events = vec![ProcessorEvent::Load(server_id)];
                if self.perceived.is_some() {
                    events.push(ProcessorEvent::Progress(self.progress()));
                }
                events.extend(self.try_complete(rt));
                events
            }
            TransportEvent::Error(response) => {
                rt.finish(id);
                vec![self.fail(response, rt)]
            }
            TransportEvent::Timeout => {
                rt.finish(id);
                vec![self.fail(Response::error(0, "Request timed out"), rt)]
            }
            TransportEvent::Abort => {
                rt.finish(id);
                self.stop_timer(rt);
                self.phase = Phase::Done;
                vec![ProcessorEvent::Abort]
            }
        }
    }

    /// Aborts the upload. Emits a single `Abort` however often it is called.
    pub fn abort(&mut self, rt: &mut Runtime) -> Vec<ProcessorEvent> {
        self.stop_timer(rt);
        match self.phase {
            Phase::Uploading(id) => rt.abort(id),
            Phase::Preparing | Phase::Loaded => {}
            Phase::Idle | Phase::Done => return Vec::new(),
        }
        self.phase = Phase::Done;
        vec![ProcessorEvent::Abort]
    }

    /// Returns the processor to its initial state, abandoning any upload.
    pub fn reset(&mut self, rt: &mut Runtime) {
        self.stop_timer(rt);
        if let Phase::Uploading(id) = self.phase {
            rt.abort(id);
        }
        *self = Self::default();
    }

    /// Progress as shown to the user.
    #[must_use]
    pub fn progress(&self) -> Option<f64> {
        let real = self.real?;
        Some(self.perceived.map_or(real, |p| real.min(p.progress)))
    }

    fn try_complete(&mut self, rt: &mut Runtime) -> Option<ProcessorEvent> {
        let perceived_done = self.perceived.map_or(true, |p| p.progress >= 1.0);
        if self.phase != Phase::Loaded || !perceived_done {
            return None;
        }
        self.stop_timer(rt);
        self.phase = Phase::Done;
        self.server_id.clone().map(ProcessorEvent::LoadPerceived)
    }

    fn fail(&mut self, response: Response, rt: &mut Runtime) -> ProcessorEvent {
        self.stop_timer(rt);
        self.phase = Phase::Done;
        let body = self.on_error.extract(&response).unwrap_or_else(|| response.text());
        ProcessorEvent::Error(Response {
            kind: ResponseKind::Error,
            body: body.into(),
            ..response
        })
    }

    fn stop_timer(&mut self, rt: &mut Runtime) {
        if let Some(timer) = self.timer.take() {
            rt.cancel(timer);
        }
    }
}
