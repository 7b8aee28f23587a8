//! Protocol engine
//! Owns the transport, the session and the appliance state of one device.
//! Requests are strictly serialized: every request is written and then its
//! response, matched by command byte, is awaited before the next one goes
//! out. Composite operations are ordered command lists that stop at the
//! first failing step.

use std::time::Duration;

use chrono::{Local, Utc};
use log::{debug, error, info, warn};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::core::appliance::{parse_response, ApplianceState};
use crate::core::bluetooth::constants::{
    AUTH_TIMEOUT_MS, REQUEST_TIMEOUT_MS, SETUP_AUTH_ATTEMPTS, SETUP_AUTH_RETRY_DELAY_MS,
    TIMER_RETRY_ATTEMPTS,
};
use crate::core::bluetooth::transport::{NotificationStream, Transport};
use crate::core::protocol::auth::{auth_accepted, SecretKey};
use crate::core::protocol::commands::{Command, CookProgram, KettleMode, LightTarget, Rgb};
use crate::core::protocol::device_type::DeviceType;
use crate::core::protocol::frame::{self, Frame};
use crate::core::protocol::session::{LinkPhase, Session};
use crate::error::{ProtocolError, TransportError};

/// Highest fan speed the humidifier accepts.
pub const MAX_FAN_SPEED: u8 = 6;

/// Timeouts and policies of one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub request_timeout: Duration,
    pub auth_timeout: Duration,
    /// AUTH attempts made by [`ProtocolEngine::setup`].
    pub setup_auth_attempts: u32,
    pub setup_auth_retry_delay: Duration,
    /// Attempts of the timer operation before giving up.
    pub timer_attempts: u32,
    /// Backlight on/off for backlit kettles; also gates the clock sync.
    pub use_backlight: bool,
    pub timezone_offset_secs: i32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            auth_timeout: Duration::from_millis(AUTH_TIMEOUT_MS),
            setup_auth_attempts: SETUP_AUTH_ATTEMPTS,
            setup_auth_retry_delay: Duration::from_millis(SETUP_AUTH_RETRY_DELAY_MS),
            timer_attempts: TIMER_RETRY_ATTEMPTS,
            use_backlight: true,
            timezone_offset_secs: 0,
        }
    }
}

pub struct ProtocolEngine<T: Transport> {
    transport: T,
    device_type: DeviceType,
    key: SecretKey,
    options: EngineOptions,
    session: Session,
    notifications: Option<NotificationStream>,
    publisher: watch::Sender<ApplianceState>,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(
        transport: T,
        device_type: DeviceType,
        name: impl Into<String>,
        key: SecretKey,
        options: EngineOptions,
    ) -> Self {
        let (publisher, _) = watch::channel(ApplianceState::new(device_type, name));
        Self {
            transport,
            device_type,
            key,
            options,
            session: Session::new(),
            notifications: None,
            publisher,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Snapshot of the current appliance state.
    pub fn state(&self) -> ApplianceState {
        self.publisher.borrow().clone()
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ApplianceState> {
        self.publisher.subscribe()
    }

    /// Opens the link if it is down. A failed connect marks the appliance
    /// unavailable.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        if self.session.is_connected() {
            return Ok(());
        }

        info!("Connecting to {} appliance", self.device_type);
        self.session.set_phase(LinkPhase::Connecting);
        match self.transport.connect().await {
            Ok(stream) => {
                self.notifications = Some(stream);
                self.session.set_phase(LinkPhase::Authenticating);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect: {}", e);
                self.session.reset();
                self.set_available(false);
                Err(e.into())
            }
        }
    }

    /// Sends AUTH with the shared secret. On rejection or silence the
    /// session is torn down.
    pub async fn authenticate(&mut self) -> Result<(), ProtocolError> {
        self.session.set_phase(LinkPhase::Authenticating);
        let command = Command::Auth(self.key.clone());
        let payload = self.key.as_bytes().to_vec();

        let verdict = match self
            .request(&command, payload, self.options.auth_timeout)
            .await
        {
            Ok(frame) => match auth_accepted(self.device_type, &frame) {
                Ok(true) => Ok(()),
                Ok(false) => Err(ProtocolError::AuthenticationFailed(format!(
                    "appliance answered 0x{:02x}",
                    frame.payload.first().copied().unwrap_or_default()
                ))),
                Err(e) => Err(ProtocolError::AuthenticationFailed(e.to_string())),
            },
            Err(ProtocolError::RequestTimeout { timeout_ms, .. }) => Err(
                ProtocolError::AuthenticationFailed(format!("no answer within {timeout_ms} ms")),
            ),
            Err(e) => Err(e),
        };

        match verdict {
            Ok(()) => {
                info!("Authenticated with {} appliance", self.device_type);
                self.session.set_authenticated(true);
                self.session.set_phase(LinkPhase::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("Authentication failed: {}", e);
                self.teardown().await;
                Err(e)
            }
        }
    }

    /// Connects and authenticates as needed. A link that dropped since the
    /// last request is reopened.
    pub async fn ensure_ready(&mut self) -> Result<(), ProtocolError> {
        self.drain_pending();
        self.connect().await?;
        if !self.session.is_authenticated() {
            self.authenticate().await?;
        }
        Ok(())
    }

    /// Sends one command and applies its response. Commands the family
    /// does not implement succeed without touching the radio.
    pub async fn execute(&mut self, command: Command) -> Result<Option<Frame>, ProtocolError> {
        let Some(payload) = command.payload_for(self.device_type) else {
            debug!(
                "{} does not apply to {}, skipping",
                command.name(),
                self.device_type
            );
            return Ok(None);
        };

        self.ensure_ready().await?;
        self.session.set_phase(LinkPhase::Executing);
        let result = self
            .request(&command, payload, self.options.request_timeout)
            .await;
        if self.session.phase() == LinkPhase::Executing {
            self.session.set_phase(LinkPhase::Ready);
        }

        let frame = result?;
        self.apply_notification(&frame)?;
        Ok(Some(frame))
    }

    /// Closes the link. The session counter and auth flag start over.
    pub async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        if self.session.phase() == LinkPhase::Disconnected {
            return Ok(());
        }
        info!("Disconnecting from {} appliance", self.device_type);
        let result = self.transport.disconnect().await;
        self.notifications = None;
        self.session.reset();
        result.map_err(Into::into)
    }

    /// Disconnects when no request went out for at least `idle`.
    pub async fn disconnect_if_idle(&mut self, idle: Duration) -> Result<bool, ProtocolError> {
        let expired = self.session.is_connected()
            && self.session.idle_for().is_some_and(|elapsed| elapsed >= idle);
        if !expired {
            return Ok(false);
        }
        debug!("Session idle for more than {:?}", idle);
        self.disconnect().await?;
        Ok(true)
    }

    /// First connection: authenticate with retries, then backlight, clock,
    /// firmware version and status.
    pub async fn setup(&mut self) -> Result<(), ProtocolError> {
        let attempts = self.options.setup_auth_attempts.max(1);
        for attempt in 1..=attempts {
            match self.ensure_ready().await {
                Ok(()) => break,
                Err(ProtocolError::AuthenticationFailed(reason)) if attempt < attempts => {
                    warn!(
                        "Auth attempt {}/{} failed: {}, retrying",
                        attempt, attempts, reason
                    );
                    tokio::time::sleep(self.options.setup_auth_retry_delay).await;
                }
                Err(e) => {
                    error!("Setup of {} appliance failed: {}", self.device_type, e);
                    self.set_available(false);
                    return Err(e);
                }
            }
        }

        let mut steps = vec![Command::SetBacklight(self.options.use_backlight)];
        steps.extend(self.clock_sync());
        steps.extend([Command::GetVersion, Command::GetStatus]);
        self.run_steps("setup", steps).await
    }

    pub async fn turn_on(&mut self) -> Result<(), ProtocolError> {
        const OP: &str = "turn_on";
        self.prepare(OP).await?;

        let steps = if self.device_type.is_cooker() {
            vec![Command::Run, Command::GetStatus]
        } else {
            let mut steps: Vec<_> = self.stop_if_needed().into_iter().collect();
            steps.extend([
                Command::SetMode {
                    mode: KettleMode::Boil,
                    temperature: 0,
                },
                Command::Run,
                Command::GetStatus,
            ]);
            steps
        };
        self.run_steps(OP, steps).await
    }

    pub async fn turn_off(&mut self) -> Result<(), ProtocolError> {
        const OP: &str = "turn_off";
        self.prepare(OP).await?;
        self.run_steps(OP, vec![Command::Stop, Command::GetStatus])
            .await
    }

    /// Heats a kettle to `temperature` and keeps it there, or changes the
    /// temperature of the running cooker program.
    pub async fn set_temperature(&mut self, temperature: u8) -> Result<(), ProtocolError> {
        const OP: &str = "set_temperature";
        let Some(range) = self.device_type.temperature_range() else {
            debug!("{} has no thermostat", self.device_type);
            return Ok(());
        };
        if !range.contains(&temperature) {
            return Err(ProtocolError::InvalidArgument(format!(
                "temperature {temperature} outside {}..={}",
                range.start(),
                range.end()
            )));
        }
        self.prepare(OP).await?;

        let steps = if self.device_type.is_cooker() {
            vec![Command::SetTemperature(temperature), Command::GetStatus]
        } else {
            let mut steps: Vec<_> = self.stop_if_needed().into_iter().collect();
            steps.extend([
                Command::SetMode {
                    mode: KettleMode::Heat,
                    temperature,
                },
                Command::Run,
                Command::GetStatus,
            ]);
            steps
        };
        self.run_steps(OP, steps).await
    }

    /// Speed 0 switches the fan off.
    pub async fn set_fan_speed(&mut self, speed: u8) -> Result<(), ProtocolError> {
        const OP: &str = "set_fan_speed";
        if speed > MAX_FAN_SPEED {
            return Err(ProtocolError::InvalidArgument(format!(
                "fan speed {speed} above {MAX_FAN_SPEED}"
            )));
        }
        if self.device_type != DeviceType::Fan {
            debug!("{} has no fan", self.device_type);
            return Ok(());
        }
        if speed == 0 {
            return self.turn_off().await;
        }
        self.prepare(OP).await?;

        let mut steps = vec![Command::SetFanSpeed(speed), Command::ApplySpeed];
        if self.state().status.is_off() {
            steps.push(Command::Run);
        }
        steps.push(Command::GetStatus);
        self.run_steps(OP, steps).await
    }

    pub async fn set_ionization(&mut self, on: bool) -> Result<(), ProtocolError> {
        const OP: &str = "set_ionization";
        self.prepare(OP).await?;
        self.run_steps(OP, vec![Command::SetIonization(on), Command::GetStatus])
            .await
    }

    /// Loads a multicooker program and starts it.
    pub async fn set_cook_program(&mut self, program: CookProgram) -> Result<(), ProtocolError> {
        const OP: &str = "set_cook_program";
        program.validate()?;
        self.prepare(OP).await?;

        let mut steps: Vec<_> = self.stop_if_needed().into_iter().collect();
        steps.extend([
            Command::SetCookProgram(program),
            Command::Run,
            Command::GetStatus,
        ]);
        self.run_steps(OP, steps).await
    }

    /// Changes the remaining time of the running cooker program. The whole
    /// operation is retried up to `timer_attempts` times.
    pub async fn set_timer(&mut self, hours: u8, minutes: u8) -> Result<(), ProtocolError> {
        const OP: &str = "set_timer";
        if hours > 23 || minutes > 59 {
            return Err(ProtocolError::InvalidArgument(format!(
                "timer {hours}:{minutes:02} out of range"
            )));
        }

        let attempts = self.options.timer_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match self.prepare(OP).await {
                Ok(()) => {
                    self.run_steps(
                        OP,
                        vec![Command::SetCookerTimer { hours, minutes }, Command::GetStatus],
                    )
                    .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!("{} attempt {}/{} failed: {}", OP, attempt, attempts, e);
                    attempt += 1;
                }
                Err(e) => {
                    error!("{} failed after {} attempts", OP, attempts);
                    return Err(e);
                }
            }
        }
    }

    /// Switches a backlit kettle to nightlight mode in the given colour.
    pub async fn set_nightlight_color(&mut self, color: Rgb) -> Result<(), ProtocolError> {
        const OP: &str = "set_nightlight_color";
        if !self.device_type.has_backlight() {
            debug!("{} has no nightlight", self.device_type);
            return Ok(());
        }
        self.prepare(OP).await?;

        let mut steps: Vec<_> = self.stop_if_needed().into_iter().collect();
        steps.extend([
            Command::SetColor {
                target: LightTarget::Nightlight,
                color,
            },
            Command::GetColor(LightTarget::Nightlight),
            Command::SetMode {
                mode: KettleMode::Nightlight,
                temperature: 0,
            },
            Command::Run,
            Command::GetStatus,
        ]);
        self.run_steps(OP, steps).await
    }

    pub async fn set_sound(&mut self, enabled: bool) -> Result<(), ProtocolError> {
        const OP: &str = "set_sound";
        self.prepare(OP).await?;
        self.run_steps(OP, vec![Command::SetSound(enabled)]).await
    }

    /// Periodic sync: clock, status and usage statistics.
    pub async fn refresh(&mut self) -> Result<(), ProtocolError> {
        const OP: &str = "refresh";
        self.prepare(OP).await?;

        let mut steps: Vec<_> = self.clock_sync().into_iter().collect();
        steps.extend([
            Command::GetStatus,
            Command::GetStatsEnergy,
            Command::GetStatsStarts,
        ]);
        self.run_steps(OP, steps).await
    }

    async fn prepare(&mut self, operation: &'static str) -> Result<(), ProtocolError> {
        self.ensure_ready()
            .await
            .map_err(|source| ProtocolError::OperationAborted {
                operation,
                step: 0,
                source: Box::new(source),
            })
    }

    /// Runs `steps` in order; the first failure aborts the rest. Steps are
    /// numbered from 1, step 0 being connect and authenticate.
    async fn run_steps(
        &mut self,
        operation: &'static str,
        steps: Vec<Command>,
    ) -> Result<(), ProtocolError> {
        debug!("{} with {} steps", operation, steps.len());
        for (index, command) in steps.into_iter().enumerate() {
            let step = index + 1;
            let name = command.name();
            if let Err(source) = self.execute(command).await {
                warn!("{} aborted at step {} ({}): {}", operation, step, name, source);
                return Err(ProtocolError::OperationAborted {
                    operation,
                    step,
                    source: Box::new(source),
                });
            }
        }

        self.publisher.send_modify(|state| {
            state.last_sync = Some(Local::now());
            state.available = true;
        });
        Ok(())
    }

    fn stop_if_needed(&self) -> Option<Command> {
        let status = self.state().status;
        let running = if self.device_type.stop_required_unless_off() {
            !status.is_off()
        } else {
            status.is_on()
        };
        running.then_some(Command::Stop)
    }

    fn clock_sync(&self) -> Option<Command> {
        if self.device_type.clock_sync_requires_backlight() && !self.options.use_backlight {
            return None;
        }
        let epoch = u32::try_from(Utc::now().timestamp()).ok()?;
        Some(Command::SetTime {
            epoch,
            tz_offset_secs: self.options.timezone_offset_secs,
        })
    }

    /// Writes one frame and waits for the notification with the same
    /// command byte.
    async fn request(
        &mut self,
        command: &Command,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Frame, ProtocolError> {
        self.drain_pending();
        if !self.session.is_connected() {
            return Err(ProtocolError::Disconnected);
        }

        let sequence = self.session.next_sequence();
        let bytes = frame::encode(sequence, command.opcode(), &payload)?;
        debug!("-> {} {:02x?}", command.name(), bytes);
        self.session.touch();
        if let Err(e) = self.transport.write(&bytes).await {
            if e == TransportError::NotConnected {
                self.link_lost();
            }
            return Err(e.into());
        }

        self.await_response(command.opcode(), timeout).await
    }

    async fn await_response(&mut self, command: u8, timeout: Duration) -> Result<Frame, ProtocolError> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(stream) = self.notifications.as_mut() else {
                return Err(ProtocolError::Disconnected);
            };
            let received = tokio::time::timeout_at(deadline, stream.recv()).await;
            let bytes = match received {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    self.link_lost();
                    return Err(ProtocolError::Disconnected);
                }
                Err(_) => {
                    return Err(ProtocolError::RequestTimeout {
                        command,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            };

            match Frame::decode(&bytes) {
                Ok(frame) if frame.command == command => {
                    debug!("<- {}", frame);
                    return Ok(frame);
                }
                Ok(frame) => {
                    debug!("<- {} (unsolicited)", frame);
                    if let Err(e) = self.apply_notification(&frame) {
                        warn!("Ignoring unsolicited notification: {}", e);
                    }
                }
                Err(e) => warn!("Dropping notification {:02x?}: {}", bytes, e),
            }
        }
    }

    /// Applies notifications that arrived between requests so a stale one
    /// cannot be taken for the next response. A closed channel means the
    /// link dropped and the session is reset.
    fn drain_pending(&mut self) {
        let mut pending = Vec::new();
        let mut closed = false;
        if let Some(stream) = self.notifications.as_mut() {
            loop {
                match stream.try_recv() {
                    Ok(bytes) => pending.push(bytes),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }
        for bytes in pending {
            match Frame::decode(&bytes) {
                Ok(frame) => {
                    if let Err(e) = self.apply_notification(&frame) {
                        warn!("Ignoring stale notification: {}", e);
                    }
                }
                Err(e) => warn!("Dropping notification {:02x?}: {}", bytes, e),
            }
        }
        if closed {
            self.link_lost();
        }
    }

    fn link_lost(&mut self) {
        warn!("Link to {} appliance lost", self.device_type);
        self.notifications = None;
        self.session.reset();
    }

    /// Parses a frame and publishes the resulting state as one snapshot.
    fn apply_notification(&mut self, frame: &Frame) -> Result<(), ProtocolError> {
        if let Some(update) = parse_response(self.device_type, frame)? {
            self.publisher.send_modify(|state| state.apply(update));
        }
        Ok(())
    }

    fn set_available(&self, available: bool) {
        self.publisher.send_if_modified(|state| {
            let changed = state.available != available;
            state.available = available;
            changed
        });
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!("Disconnect after failed auth failed: {}", e);
        }
        self.notifications = None;
        self.session.reset();
    }
}
