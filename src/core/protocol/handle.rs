//! Collaborator-facing handle to one appliance.
//! The engine sits behind an async mutex so operations from any number of
//! clones run one at a time. A supervisor task refreshes the appliance on
//! a fixed interval and closes the link once it has been idle. Dropping
//! the last clone stops the supervisor and disconnects.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::core::appliance::ApplianceState;
use crate::core::bluetooth::constants::DEFAULT_SCAN_INTERVAL_SECS;
use crate::core::bluetooth::transport::Transport;
use crate::core::protocol::commands::{CookProgram, Rgb};
use crate::core::protocol::engine::ProtocolEngine;
use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleOptions {
    /// Period of the background refresh.
    pub refresh_interval: Duration,
    /// Close the link after this long without traffic; `None` keeps it open.
    pub idle_timeout: Option<Duration>,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            idle_timeout: None,
        }
    }
}

pub struct DeviceHandle<T: Transport + 'static> {
    engine: Arc<Mutex<ProtocolEngine<T>>>,
    state_rx: watch::Receiver<ApplianceState>,
    cancel_token: CancellationToken,
    /// Shared by every clone; cancels `cancel_token` when the last one goes.
    _cancel_on_drop: Arc<DropGuard>,
}

impl<T: Transport + 'static> Clone for DeviceHandle<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            state_rx: self.state_rx.clone(),
            cancel_token: self.cancel_token.clone(),
            _cancel_on_drop: self._cancel_on_drop.clone(),
        }
    }
}

impl<T: Transport + 'static> DeviceHandle<T> {
    /// Runs the first-connect sequence and starts the supervisor. Setup
    /// errors are returned and no task is left behind.
    pub async fn start(
        mut engine: ProtocolEngine<T>,
        options: HandleOptions,
    ) -> Result<Self, ProtocolError> {
        engine.setup().await?;
        info!(
            "{} appliance ready, refreshing every {:?}",
            engine.device_type(),
            options.refresh_interval
        );
        Ok(Self::spawn(engine, options))
    }

    /// Wraps an engine without running setup.
    pub fn spawn(engine: ProtocolEngine<T>, options: HandleOptions) -> Self {
        let cancel_token = CancellationToken::new();
        let handle = Self {
            state_rx: engine.subscribe(),
            engine: Arc::new(Mutex::new(engine)),
            _cancel_on_drop: Arc::new(cancel_token.clone().drop_guard()),
            cancel_token,
        };

        let engine = handle.engine.clone();
        let cancel_token = handle.cancel_token.clone();
        tokio::spawn(async move {
            Self::supervise(engine, options, cancel_token).await;
        });
        handle
    }

    async fn supervise(
        engine: Arc<Mutex<ProtocolEngine<T>>>,
        options: HandleOptions,
        cancel_token: CancellationToken,
    ) {
        let mut refresh = interval_at(
            Instant::now() + options.refresh_interval,
            options.refresh_interval,
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Idle checks run at a fraction of the timeout.
        let idle_period = options
            .idle_timeout
            .map(|idle| (idle / 4).max(Duration::from_millis(100)))
            .unwrap_or(options.refresh_interval);
        let mut idle_check = interval_at(Instant::now() + idle_period, idle_period);
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Supervisor cancelled");
                    if let Err(e) = engine.lock().await.disconnect().await {
                        error!("Failed to disconnect on shutdown: {}", e);
                    }
                    break;
                }
                _ = refresh.tick() => {
                    let mut engine = engine.lock().await;
                    if let Err(e) = engine.refresh().await {
                        warn!("Periodic refresh failed, retrying next interval: {}", e);
                    }
                }
                _ = idle_check.tick(), if options.idle_timeout.is_some() => {
                    let Some(idle) = options.idle_timeout else { continue };
                    let mut engine = engine.lock().await;
                    if let Err(e) = engine.disconnect_if_idle(idle).await {
                        error!("Failed to close idle link: {}", e);
                    }
                }
            }
        }
    }

    /// Latest snapshot.
    pub fn state(&self) -> ApplianceState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ApplianceState> {
        self.state_rx.clone()
    }

    /// Calls `on_change` with every new snapshot until the handle is shut
    /// down. A slow callback only delays itself; intermediate snapshots
    /// are skipped.
    pub fn on_change<F>(&self, mut on_change: F) -> JoinHandle<()>
    where
        F: FnMut(ApplianceState) + Send + 'static,
    {
        let mut rx = self.subscribe();
        rx.borrow_and_update();
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = rx.borrow_and_update().clone();
                        on_change(snapshot);
                    }
                }
            }
        })
    }

    pub async fn turn_on(&self) -> Result<(), ProtocolError> {
        self.engine.lock().await.turn_on().await
    }

    pub async fn turn_off(&self) -> Result<(), ProtocolError> {
        self.engine.lock().await.turn_off().await
    }

    pub async fn set_temperature(&self, temperature: u8) -> Result<(), ProtocolError> {
        self.engine.lock().await.set_temperature(temperature).await
    }

    pub async fn set_fan_speed(&self, speed: u8) -> Result<(), ProtocolError> {
        self.engine.lock().await.set_fan_speed(speed).await
    }

    pub async fn set_ionization(&self, on: bool) -> Result<(), ProtocolError> {
        self.engine.lock().await.set_ionization(on).await
    }

    pub async fn set_cook_program(&self, program: CookProgram) -> Result<(), ProtocolError> {
        self.engine.lock().await.set_cook_program(program).await
    }

    pub async fn set_timer(&self, hours: u8, minutes: u8) -> Result<(), ProtocolError> {
        self.engine.lock().await.set_timer(hours, minutes).await
    }

    pub async fn set_nightlight_color(&self, color: Rgb) -> Result<(), ProtocolError> {
        self.engine.lock().await.set_nightlight_color(color).await
    }

    pub async fn set_sound(&self, enabled: bool) -> Result<(), ProtocolError> {
        self.engine.lock().await.set_sound(enabled).await
    }

    pub async fn refresh(&self) -> Result<(), ProtocolError> {
        self.engine.lock().await.refresh().await
    }

    /// Closes the link; the next operation reconnects.
    pub async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.engine.lock().await.disconnect().await
    }

    /// Stops the supervisor and every `on_change` task, then disconnects.
    pub async fn shutdown(&self) -> Result<(), ProtocolError> {
        self.cancel_token.cancel();
        self.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::protocol::auth::SecretKey;
    use crate::core::protocol::commands::opcode;
    use crate::core::protocol::device_type::DeviceType;
    use crate::core::protocol::engine::EngineOptions;
    use crate::core::protocol::testing::{MockTransport, SharedLog};

    fn engine(device_type: DeviceType) -> (ProtocolEngine<MockTransport>, SharedLog) {
        let (transport, log) = MockTransport::new(device_type);
        let engine = ProtocolEngine::new(
            transport,
            device_type,
            "test appliance",
            SecretKey::parse("00112233445566aa").unwrap(),
            EngineOptions::default(),
        );
        (engine, log)
    }

    fn count(log: &SharedLog, op: u8) -> usize {
        log.lock()
            .unwrap()
            .writes
            .iter()
            .filter(|frame| frame.command == op)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn start_runs_setup() {
        let (engine, log) = engine(DeviceType::Heater);
        let handle = DeviceHandle::start(engine, HandleOptions::default())
            .await
            .unwrap();

        assert!(handle.state().available);
        assert_eq!(count(&log, opcode::GET_VERSION), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn setup_failure_is_returned() {
        let (transport, _log) = {
            let (mut transport, log) = MockTransport::new(DeviceType::Kettle);
            transport.connect_failures = 1;
            (transport, log)
        };
        let engine = ProtocolEngine::new(
            transport,
            DeviceType::Kettle,
            "RK-M173S",
            SecretKey::parse("00112233445566aa").unwrap(),
            EngineOptions::default(),
        );

        let result = DeviceHandle::start(engine, HandleOptions::default()).await;
        assert!(matches!(
            result,
            Err(ProtocolError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_on_every_interval() {
        let (engine, log) = engine(DeviceType::Kettle);
        let options = HandleOptions {
            refresh_interval: Duration::from_secs(10),
            idle_timeout: None,
        };
        let handle = DeviceHandle::spawn(engine, options);

        tokio::time::sleep(Duration::from_secs(35)).await;

        assert_eq!(count(&log, opcode::GET_STATS_ENERGY), 3);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_errors_do_not_stop_the_supervisor() {
        let (mut transport, log) = MockTransport::new(DeviceType::Kettle);
        transport.silent.push(opcode::GET_STATS_STARTS);
        let engine = ProtocolEngine::new(
            transport,
            DeviceType::Kettle,
            "RK-M170S",
            SecretKey::parse("00112233445566aa").unwrap(),
            EngineOptions::default(),
        );
        let options = HandleOptions {
            refresh_interval: Duration::from_secs(10),
            idle_timeout: None,
        };
        let handle = DeviceHandle::spawn(engine, options);

        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(count(&log, opcode::GET_STATS_STARTS), 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_link_is_closed() {
        let (engine, log) = engine(DeviceType::Fan);
        let options = HandleOptions {
            refresh_interval: Duration::from_secs(300),
            idle_timeout: Some(Duration::from_secs(20)),
        };
        let handle = DeviceHandle::spawn(engine, options);
        handle.set_ionization(true).await.unwrap();
        assert!(handle.state().ionization);

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(log.lock().unwrap().disconnects, 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_last_clone_stops_the_supervisor() {
        let (engine, log) = engine(DeviceType::Kettle);
        let options = HandleOptions {
            refresh_interval: Duration::from_secs(10),
            idle_timeout: None,
        };
        let handle = DeviceHandle::spawn(engine, options);
        let other = handle.clone();
        handle.turn_off().await.unwrap();

        drop(handle);
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(count(&log, opcode::GET_STATS_ENERGY), 1);

        drop(other);
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count(&log, opcode::GET_STATS_ENERGY), 1);
        assert_eq!(log.lock().unwrap().disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_reconnects_after_the_link_drops() {
        let (mut transport, log) = MockTransport::new(DeviceType::Kettle);
        // the link closes after the first step of the first refresh
        transport.drop_link_after = Some(1);
        let engine = ProtocolEngine::new(
            transport,
            DeviceType::Kettle,
            "RK-M173S",
            SecretKey::parse("00112233445566aa").unwrap(),
            EngineOptions::default(),
        );
        let options = HandleOptions {
            refresh_interval: Duration::from_secs(10),
            idle_timeout: None,
        };
        let handle = DeviceHandle::spawn(engine, options);

        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(log.lock().unwrap().connects, 2);
        assert_eq!(count(&log, opcode::AUTH), 2);
        assert_eq!(count(&log, opcode::GET_STATS_STARTS), 2);
        assert!(handle.state().available);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_one_engine() {
        let (engine, log) = engine(DeviceType::Heater);
        let handle = DeviceHandle::spawn(engine, HandleOptions::default());
        let other = handle.clone();

        let (a, b) = tokio::join!(handle.turn_on(), other.turn_off());
        a.unwrap();
        b.unwrap();

        assert_eq!(count(&log, opcode::AUTH), 1);
        assert_eq!(count(&log, opcode::GET_STATUS), 2);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn on_change_sees_new_snapshots() {
        let (engine, _log) = engine(DeviceType::Heater);
        let handle = DeviceHandle::spawn(engine, HandleOptions::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_callback = seen.clone();
        let task = handle.on_change(move |state| {
            if state.status.is_on() {
                seen_by_callback.fetch_add(1, Ordering::SeqCst);
            }
        });

        handle.turn_on().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(seen.load(Ordering::SeqCst) >= 1);
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
