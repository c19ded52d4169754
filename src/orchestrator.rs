use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Local};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::HubClient;
use crate::dispatcher::DeviceCommandDispatcher;
use crate::schedule::{DEFAULT_SCHEDULE_ID, ECO_SCHEDULE_ID, ScheduleCatalog};
use crate::types::{HvacMode, ModeRequest, SystemMode, Week};
use crate::zones::ZoneDirectory;
use crate::{Error, Result};

pub const DEFAULT_MODE_ENTITY: &str = "input_select.heating_mode";

/// Owns the single global operating mode. Every transition runs under one
/// async mutex, so an HTTP-layer call racing a timer fire is serialized
/// rather than interleaved. The in-memory field is the source of truth for
/// which mode is active; the hub's selector entity only mirrors it for UI
/// display.
///
/// Cheaply cloneable; deferred-restore tasks hold a clone.
#[derive(Clone)]
pub struct ModeOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    client: HubClient,
    dispatcher: DeviceCommandDispatcher,
    zones: Arc<ZoneDirectory>,
    schedules: Arc<ScheduleCatalog>,
    mode_entity: String,
    state: Mutex<OrchestratorState>,
}

struct OrchestratorState {
    current: SystemMode,
    previous: SystemMode,
    pending: Option<PendingRestore>,
}

/// At most one deferred restore exists at a time. Cancellation is
/// check-then-act via the token: a cancelled task never fires, even if it
/// is already past its sleep.
struct PendingRestore {
    target: SystemMode,
    armed_by: SystemMode,
    fire_at: DateTime<Local>,
    cancel: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ModeInfo {
    pub current: SystemMode,
    pub previous: SystemMode,
    pub pending_restore: Option<PendingRestoreInfo>,
}

#[derive(Debug, Clone)]
pub struct PendingRestoreInfo {
    pub target: SystemMode,
    pub armed_by: SystemMode,
    pub fire_at: DateTime<Local>,
}

impl ModeOrchestrator {
    pub fn new(
        client: HubClient,
        dispatcher: DeviceCommandDispatcher,
        zones: Arc<ZoneDirectory>,
        schedules: Arc<ScheduleCatalog>,
    ) -> Self {
        Self::with_mode_entity(client, dispatcher, zones, schedules, DEFAULT_MODE_ENTITY)
    }

    pub fn with_mode_entity(
        client: HubClient,
        dispatcher: DeviceCommandDispatcher,
        zones: Arc<ZoneDirectory>,
        schedules: Arc<ScheduleCatalog>,
        mode_entity: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                dispatcher,
                zones,
                schedules,
                mode_entity: mode_entity.into(),
                state: Mutex::new(OrchestratorState {
                    current: SystemMode::Manual,
                    previous: SystemMode::Manual,
                    pending: None,
                }),
            }),
        }
    }

    pub async fn current_mode(&self) -> SystemMode {
        self.inner.state.lock().await.current
    }

    pub async fn mode_info(&self) -> ModeInfo {
        let state = self.inner.state.lock().await;
        ModeInfo {
            current: state.current,
            previous: state.previous,
            pending_restore: state.pending.as_ref().map(|p| PendingRestoreInfo {
                target: p.target,
                armed_by: p.armed_by,
                fire_at: p.fire_at,
            }),
        }
    }

    /// Apply a mode transition across all enabled zones.
    ///
    /// Fails with [`Error::AlreadySet`] when the requested mode is current
    /// and `force` is false, with zero device commands issued. On applier
    /// failure the in-memory mode rolls back to its prior value.
    pub async fn set_mode(&self, request: ModeRequest, force: bool) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        self.transition(&mut state, request, force, true).await
    }

    async fn transition(
        &self,
        state: &mut OrchestratorState,
        request: ModeRequest,
        force: bool,
        persist: bool,
    ) -> Result<()> {
        let mode = request.mode();
        if mode == state.current && !force {
            info!(%mode, "mode already set, skipping");
            return Err(Error::AlreadySet(mode));
        }

        info!(from = %state.current, to = %mode, "switching mode");
        let previous = state.current;
        state.previous = previous;
        state.current = mode;

        let outcome = match request {
            ModeRequest::Default => self.apply_schedule_mode(DEFAULT_SCHEDULE_ID).await,
            ModeRequest::Eco => self.apply_schedule_mode(ECO_SCHEDULE_ID).await,
            ModeRequest::StayHome { active_zones } => {
                self.apply_stay_home(state, active_zones.as_deref()).await
            }
            ModeRequest::Ventilation { duration } => {
                self.apply_ventilation(state, duration, previous).await
            }
            ModeRequest::Timer { restore_at } => self.apply_timer(state, restore_at).await,
            ModeRequest::Manual => self.apply_device_mode_everywhere(HvacMode::Heat).await,
            ModeRequest::Off => self.apply_device_mode_everywhere(HvacMode::Off).await,
        };

        match outcome {
            Ok(()) => {
                info!(%mode, "mode applied");
                if persist {
                    self.persist_mode(mode).await;
                }
                Ok(())
            }
            Err(e) => {
                error!(%mode, error = %e, "mode application failed, rolling back");
                state.current = previous;
                Err(e)
            }
        }
    }

    /// Default and eco: every thermostat follows the named schedule.
    async fn apply_schedule_mode(&self, schedule_id: &str) -> Result<()> {
        let schedule = self.inner.schedules.resolve(schedule_id)?;
        let week = self.inner.schedules.expand(&schedule.week);

        let mut failed = Vec::new();
        for zone in self.inner.zones.enabled_zones() {
            let mut zone_ok = true;
            for thermostat in &zone.thermostats {
                if self.inner.dispatcher.apply_schedule(thermostat, &week).await {
                    debug!(entity_id = %thermostat, schedule_id, "schedule applied");
                } else {
                    zone_ok = false;
                    failed.push(thermostat.clone());
                }
            }
            if zone_ok && !zone.thermostats.is_empty() {
                self.inner.zones.assign_schedule(&zone.id, schedule_id);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::ApplyFailed(failed))
        }
    }

    /// Stay-home: the current day runs the weekend pattern. Zones outside
    /// `active_zones` keep the plain default plan. Self-expiring at the next
    /// local midnight.
    async fn apply_stay_home(
        &self,
        state: &mut OrchestratorState,
        active_zones: Option<&[String]>,
    ) -> Result<()> {
        let schedule = self.inner.schedules.resolve(DEFAULT_SCHEDULE_ID)?;
        let today = Local::now().weekday();
        info!(day = %today, "stay-home swaps today to the weekend pattern");

        let swapped = self
            .inner
            .schedules
            .expand(&self.inner.schedules.stay_home_plan(&schedule.week, today));
        let untouched = self.inner.schedules.expand(&schedule.week);

        let mut failed = Vec::new();
        for zone in self.inner.zones.enabled_zones() {
            let active = active_zones.is_none_or(|ids| ids.iter().any(|id| *id == zone.id));
            let week: &Week = if active { &swapped } else { &untouched };
            debug!(zone = %zone.id, active, "applying stay-home plan");
            for thermostat in &zone.thermostats {
                if !self.inner.dispatcher.apply_schedule(thermostat, week).await {
                    failed.push(thermostat.clone());
                }
            }
        }
        if !failed.is_empty() {
            return Err(Error::ApplyFailed(failed));
        }

        self.arm_restore(state, SystemMode::Default, SystemMode::StayHome, next_local_midnight());
        Ok(())
    }

    /// Ventilation: everything off, then return to the regime that was
    /// interrupted, not simply the default schedule.
    async fn apply_ventilation(
        &self,
        state: &mut OrchestratorState,
        duration: Duration,
        interrupted: SystemMode,
    ) -> Result<()> {
        let delta = chrono::Duration::from_std(duration)
            .map_err(|_| Error::InvalidRequest("ventilation duration out of range".to_string()))?;

        self.apply_device_mode_everywhere(HvacMode::Off).await?;
        self.arm_restore(state, interrupted, SystemMode::Ventilation, Local::now() + delta);
        Ok(())
    }

    /// Legacy timed-off: everything off until an absolute instant, then
    /// back to the default schedule.
    async fn apply_timer(
        &self,
        state: &mut OrchestratorState,
        restore_at: DateTime<Local>,
    ) -> Result<()> {
        if restore_at <= Local::now() {
            warn!(restore_at = %restore_at, "timer restore instant is in the past");
        }
        self.apply_device_mode_everywhere(HvacMode::Off).await?;
        self.arm_restore(state, SystemMode::Default, SystemMode::Timer, restore_at);
        Ok(())
    }

    async fn apply_device_mode_everywhere(&self, mode: HvacMode) -> Result<()> {
        let mut failed = Vec::new();
        for zone in self.inner.zones.enabled_zones() {
            for thermostat in &zone.thermostats {
                if self.inner.dispatcher.set_device_mode(thermostat, mode).await {
                    debug!(entity_id = %thermostat, mode = mode.as_wire_str(), "device mode set");
                } else {
                    failed.push(thermostat.clone());
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::ApplyFailed(failed))
        }
    }

    /// Single arming path for every deferred restore. Replaces the
    /// incumbent timer, except that a pending ventilation restore is never
    /// displaced by the stay-home midnight arm: ventilation is a short
    /// interruption whose own restore re-enters the interrupted mode,
    /// re-running the stay-home applier and re-arming midnight when still
    /// applicable.
    fn arm_restore(
        &self,
        state: &mut OrchestratorState,
        target: SystemMode,
        armed_by: SystemMode,
        fire_at: DateTime<Local>,
    ) {
        if let Some(existing) = &state.pending {
            if existing.armed_by == SystemMode::Ventilation && armed_by == SystemMode::StayHome {
                debug!("ventilation restore pending, skipping midnight arm");
                return;
            }
            existing.cancel.cancel();
        }

        let cancel = CancellationToken::new();
        state.pending = Some(PendingRestore {
            target,
            armed_by,
            fire_at,
            cancel: cancel.clone(),
        });
        info!(%target, %armed_by, fire_at = %fire_at, "armed deferred restore");

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let delay = (fire_at - Local::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            orchestrator.fire_restore(target, armed_by, cancel).await;
        });
    }

    async fn fire_restore(
        &self,
        target: SystemMode,
        armed_by: SystemMode,
        cancel: CancellationToken,
    ) {
        let mut state = self.inner.state.lock().await;
        // Re-check under the lock: cancellation may have raced the sleep.
        if cancel.is_cancelled() {
            return;
        }
        // Only one un-cancelled token exists at a time, so the stored
        // pending entry is this one; the timer is spent either way.
        state.pending.take();
        if state.current != armed_by {
            debug!(%armed_by, current = %state.current, "deferred restore superseded, ignoring");
            return;
        }
        info!(%target, "deferred restore firing");
        if let Err(e) = self
            .transition(&mut state, restore_request(target), false, true)
            .await
        {
            warn!(%target, error = %e, "deferred restore failed");
        }
    }

    /// Cancel the pending timer and return to the default schedule. Valid
    /// only while a timer-driven mode (timer or ventilation) is current.
    pub async fn cancel_timer(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if !matches!(state.current, SystemMode::Timer | SystemMode::Ventilation) {
            return Err(Error::InvalidRequest("no timer-driven mode active".to_string()));
        }
        if let Some(pending) = state.pending.take() {
            pending.cancel.cancel();
        }
        self.transition(&mut state, ModeRequest::Default, false, true).await
    }

    /// Startup reconciliation, run once after the client's cache is warm.
    /// A recognized persisted mode is applied without re-persisting (no
    /// write-after-read echo); an unrecognized or absent value makes the
    /// in-memory mode authoritative and pushes it to the hub instead. The
    /// selector is never polled again after this.
    pub async fn restore_from_hub(&self) -> Result<()> {
        let snapshot = self.inner.client.snapshot();
        let mut state = self.inner.state.lock().await;

        let Some(value) = snapshot.select_value(&self.inner.mode_entity) else {
            info!(
                entity_id = %self.inner.mode_entity,
                current = %state.current,
                "mode selector missing from hub, pushing current mode"
            );
            let current = state.current;
            self.persist_mode(current).await;
            return Ok(());
        };

        match SystemMode::from_wire_str(value) {
            Some(mode) if mode == state.current => {
                info!(%mode, "hub mode matches, skipping re-apply");
                Ok(())
            }
            // Timer-driven modes have no restorable instant after a restart.
            Some(SystemMode::Timer | SystemMode::Ventilation) | None => {
                warn!(value, "persisted mode not restorable, pushing current mode");
                let current = state.current;
                self.persist_mode(current).await;
                Ok(())
            }
            Some(mode) => {
                info!(%mode, "restoring mode from hub");
                self.transition(&mut state, restore_request(mode), false, false)
                    .await
            }
        }
    }

    /// Mirror the mode into the hub's selector for UI display. Best-effort:
    /// the in-memory mode stays authoritative even when the write fails.
    async fn persist_mode(&self, mode: SystemMode) {
        if self
            .inner
            .client
            .set_select_option(&self.inner.mode_entity, mode.as_wire_str())
            .await
        {
            debug!(%mode, entity_id = %self.inner.mode_entity, "mode persisted to hub");
        } else {
            error!(%mode, entity_id = %self.inner.mode_entity, "failed to persist mode to hub");
        }
    }
}

/// Request used when a deferred restore or startup reconciliation re-enters
/// a mode. Timer-driven targets carry no instant to return to and degrade
/// to the default schedule.
fn restore_request(mode: SystemMode) -> ModeRequest {
    match mode {
        SystemMode::Default => ModeRequest::Default,
        SystemMode::StayHome => ModeRequest::StayHome { active_zones: None },
        SystemMode::Eco => ModeRequest::Eco,
        SystemMode::Manual => ModeRequest::Manual,
        SystemMode::Off => ModeRequest::Off,
        SystemMode::Timer | SystemMode::Ventilation => ModeRequest::Default,
    }
}

fn next_local_midnight() -> DateTime<Local> {
    let tomorrow = Local::now().date_naive() + Days::new(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .unwrap_or_else(|| Local::now() + chrono::Duration::hours(24))
}
