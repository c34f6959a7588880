//! Bus session client.
//!
//! Drives the whole program: claim a well-known name, listen for the daemon's
//! `NameLost` signal, release the name after a delay, and stop the event loop
//! once the signal arrives.
//!
//! The loop is a single `tokio::select!` over the release timer, the signal
//! stream and an interrupt future, so callbacks never run concurrently.
//!
//! # Usage
//!
//! ```ignore
//! let diagnostics: Arc<dyn Diagnostics> = Arc::new(TracingDiagnostics);
//! let exit = run_client(ZbusNameBus::connect(None), &config, diagnostics, ctrl_c).await;
//! std::process::exit(exit.code().into());
//! ```

use crate::bus::{BusError, LostNames, NameBus, NameFlags, ReleaseReply, RequestReply};
use crate::config::{AcquisitionPolicy, Config};
use crate::diagnostics::Diagnostics;
use futures_util::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Sleep;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to acquire name {name}: {source}")]
    Acquisition { name: String, source: BusError },

    #[error("Name {0} is already owned by another connection")]
    NameTaken(String),

    #[error("{0}")]
    Subscribe(#[source] BusError),
}

/// Ownership of the claimed name as far as this process knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameState {
    Unclaimed,
    Owned,
    Queued,
    OwnedByOther,
    Released,
}

/// Why the event loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The daemon reported the name as lost.
    NameLost(String),
    /// The interrupt future completed first.
    Interrupted,
    /// The signal stream ended, usually because the connection dropped.
    Disconnected,
}

/// Process-level result of a client run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    Completed,
    ConnectFailed,
    AcquisitionFailed,
    SetupFailed,
    Disconnected,
    Interrupted,
}

impl ClientExit {
    /// Exit status reported to the shell.
    pub fn code(self) -> u8 {
        match self {
            ClientExit::Completed => 0,
            ClientExit::ConnectFailed | ClientExit::SetupFailed | ClientExit::Disconnected => 1,
            ClientExit::AcquisitionFailed => 2,
            ClientExit::Interrupted => 130,
        }
    }
}

/// One-shot release callback.
///
/// Holds only what the release needs. `fire` consumes the timer, so it cannot
/// run twice.
pub struct ReleaseTimer<B> {
    bus: Arc<B>,
    name: String,
    delay: Duration,
    diagnostics: Arc<dyn Diagnostics>,
}

impl<B: NameBus> ReleaseTimer<B> {
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Release the name and report the outcome.
    pub async fn fire(self) -> Result<ReleaseReply, BusError> {
        let name = &self.name;
        let result = self.bus.release_name(name).await;

        match &result {
            Ok(ReleaseReply::Released) => self
                .diagnostics
                .info(&format!("Name {} was released successfully", name)),
            Ok(ReleaseReply::NotOwner) => self
                .diagnostics
                .warn(&format!("Name {} is not owned by this app!", name)),
            Ok(ReleaseReply::NonExistent) => self
                .diagnostics
                .warn(&format!("Name {} does not exist!", name)),
            Err(e) => match e.detail() {
                None => self.diagnostics.warn(
                    "Something fishy. The release call failed but reported no error detail!",
                ),
                Some(detail) => {
                    self.diagnostics
                        .error(&format!("Could not release name {}: {}", name, detail));
                    self.diagnostics.warn("This program may not terminate...");
                }
            },
        }

        result
    }
}

/// Session state for one claimed name on one connection.
pub struct BusSession<B> {
    bus: Arc<B>,
    name: String,
    state: NameState,
    diagnostics: Arc<dyn Diagnostics>,
    subscription: Option<LostNames>,
    release: Option<ReleaseTimer<B>>,
}

impl<B: NameBus> BusSession<B> {
    pub fn new(bus: Arc<B>, name: impl Into<String>, diagnostics: Arc<dyn Diagnostics>) -> Self {
        Self {
            bus,
            name: name.into(),
            state: NameState::Unclaimed,
            diagnostics,
            subscription: None,
            release: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> NameState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Request the name from the daemon.
    ///
    /// Under [`AcquisitionPolicy::Tolerate`] a failed request is logged and
    /// the session carries on; under [`AcquisitionPolicy::Fatal`] it is
    /// returned as an error, as is an `Exists` reply.
    pub async fn acquire(
        &mut self,
        flags: NameFlags,
        policy: AcquisitionPolicy,
    ) -> Result<NameState, SessionError> {
        match self.bus.request_name(&self.name, flags).await {
            Ok(reply) => {
                debug!("RequestName {} -> {}", self.name, reply);
                self.state = match reply {
                    RequestReply::PrimaryOwner => {
                        self.diagnostics
                            .info(&format!("We now own the name {}!", self.name));
                        NameState::Owned
                    }
                    RequestReply::InQueue => {
                        self.diagnostics
                            .info("We are standing in queue for our name!");
                        NameState::Queued
                    }
                    RequestReply::Exists => {
                        self.diagnostics
                            .warn(":-( The name we asked for already exists!");
                        NameState::OwnedByOther
                    }
                    RequestReply::AlreadyOwner => {
                        self.diagnostics.info("Eh? We already own this name!");
                        NameState::Owned
                    }
                };

                if self.state == NameState::OwnedByOther && policy == AcquisitionPolicy::Fatal {
                    return Err(SessionError::NameTaken(self.name.clone()));
                }
                Ok(self.state)
            }
            Err(e) => {
                self.diagnostics.error(&format!(
                    "Couldn't acquire name {} for our connection: {}",
                    self.name, e
                ));
                match policy {
                    AcquisitionPolicy::Tolerate => {
                        self.diagnostics
                            .warn("This program may not terminate as a result of this error!");
                        Ok(self.state)
                    }
                    AcquisitionPolicy::Fatal => Err(SessionError::Acquisition {
                        name: self.name.clone(),
                        source: e,
                    }),
                }
            }
        }
    }

    /// Install the `NameLost` listener. It stays until [`shutdown`](Self::shutdown).
    pub async fn subscribe_name_lost(&mut self) -> Result<(), SessionError> {
        let stream = self
            .bus
            .subscribe_name_lost()
            .await
            .map_err(SessionError::Subscribe)?;
        self.subscription = Some(stream);
        Ok(())
    }

    /// Arm the one-shot release timer. It starts counting when [`run`](Self::run) is entered.
    pub fn schedule_release(&mut self, delay: Duration) {
        self.release = Some(ReleaseTimer {
            bus: Arc::clone(&self.bus),
            name: self.name.clone(),
            delay,
            diagnostics: Arc::clone(&self.diagnostics),
        });
    }

    /// Run the event loop until `NameLost` arrives, the interrupt completes,
    /// or the signal stream closes.
    pub async fn run<I>(&mut self, interrupt: I) -> RunOutcome
    where
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        let mut timer: Option<Pin<Box<Sleep>>> = self
            .release
            .as_ref()
            .map(|release| Box::pin(tokio::time::sleep(release.delay())));

        loop {
            let event = tokio::select! {
                _ = wait_timer(&mut timer) => LoopEvent::ReleaseDue,
                lost = next_lost(&mut self.subscription) => match lost {
                    Some(name) => LoopEvent::NameLost(name),
                    None => LoopEvent::StreamClosed,
                },
                _ = &mut interrupt => LoopEvent::Interrupted,
            };

            match event {
                LoopEvent::ReleaseDue => {
                    timer = None;
                    if let Some(release) = self.release.take() {
                        match release.fire().await {
                            Ok(ReleaseReply::Released) => self.state = NameState::Released,
                            Ok(ReleaseReply::NonExistent) => self.state = NameState::Unclaimed,
                            Ok(ReleaseReply::NotOwner) | Err(_) => {}
                        }
                    }
                }
                LoopEvent::NameLost(name) => {
                    debug!("NameLost received for '{}'", name);
                    self.on_name_lost();
                    return RunOutcome::NameLost(name);
                }
                LoopEvent::StreamClosed => {
                    self.diagnostics
                        .error("NameLost subscription closed; the bus connection is gone");
                    return RunOutcome::Disconnected;
                }
                LoopEvent::Interrupted => {
                    info!("Interrupted before the name was lost");
                    return RunOutcome::Interrupted;
                }
            }
        }
    }

    fn on_name_lost(&mut self) {
        self.diagnostics.notice("!!! We lost our Name !!!");
        if self.release.is_some() {
            // Lost before our own release ran: someone replaced us.
            self.state = NameState::OwnedByOther;
        } else {
            self.state = NameState::Released;
        }
    }

    /// Drop the signal proxy. The connection stays open until process exit.
    pub fn shutdown(&mut self) {
        if self.subscription.take().is_some() {
            debug!("NameLost subscription released");
        }
        self.release = None;
    }
}

enum LoopEvent {
    ReleaseDue,
    NameLost(String),
    StreamClosed,
    Interrupted,
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_lost(subscription: &mut Option<LostNames>) -> Option<String> {
    match subscription {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Connect, claim, subscribe, schedule the release, and run to completion.
///
/// A failed `connect` is reported and ends the run before any bus call.
pub async fn run_client<B, C, I>(
    connect: C,
    config: &Config,
    diagnostics: Arc<dyn Diagnostics>,
    interrupt: I,
) -> ClientExit
where
    B: NameBus,
    C: Future<Output = Result<B, BusError>>,
    I: Future<Output = ()>,
{
    let bus = match connect.await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            diagnostics.error(&format!("Failed to connect to Session bus: {}", e));
            return ClientExit::ConnectFailed;
        }
    };

    let mut session = BusSession::new(bus, config.bus.name.clone(), Arc::clone(&diagnostics));

    if let Err(e) = session
        .acquire(config.bus.flags(), config.acquisition.policy)
        .await
    {
        diagnostics.error(&e.to_string());
        return ClientExit::AcquisitionFailed;
    }

    if let Err(e) = session.subscribe_name_lost().await {
        diagnostics.error(&e.to_string());
        return ClientExit::SetupFailed;
    }

    session.schedule_release(config.timing.release_after());

    let outcome = session.run(interrupt).await;
    session.shutdown();

    match outcome {
        RunOutcome::NameLost(_) => ClientExit::Completed,
        RunOutcome::Interrupted => ClientExit::Interrupted,
        RunOutcome::Disconnected => ClientExit::Disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{MemoryDiagnostics, Severity};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const NAME: &str = "org.DBusTest.SignalTest";

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Request(String, NameFlags),
        Release(String, Instant),
        Subscribe,
    }

    /// In-memory bus daemon stand-in.
    struct FakeBus {
        request_reply: Result<RequestReply, BusError>,
        release_reply: Result<ReleaseReply, BusError>,
        /// Emit NameLost when a release succeeds
        emit_on_release: bool,
        calls: Mutex<Vec<Call>>,
        lost_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    }

    impl FakeBus {
        fn new(
            request_reply: Result<RequestReply, BusError>,
            release_reply: Result<ReleaseReply, BusError>,
        ) -> Self {
            Self {
                emit_on_release: matches!(request_reply, Ok(RequestReply::PrimaryOwner))
                    && matches!(release_reply, Ok(ReleaseReply::Released)),
                request_reply,
                release_reply,
                calls: Mutex::new(Vec::new()),
                lost_tx: Mutex::new(None),
            }
        }

        fn owner() -> Self {
            Self::new(Ok(RequestReply::PrimaryOwner), Ok(ReleaseReply::Released))
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn release_times(&self) -> Vec<Instant> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Release(_, at) => Some(at),
                    _ => None,
                })
                .collect()
        }

        /// Deliver a NameLost as if another connection took the name.
        fn emit_lost(&self, name: &str) {
            if let Some(tx) = self.lost_tx.lock().unwrap().as_ref() {
                let _ = tx.send(name.to_string());
            }
        }

        /// Close the signal stream as if the connection dropped.
        fn disconnect(&self) {
            self.lost_tx.lock().unwrap().take();
        }
    }

    #[async_trait]
    impl NameBus for FakeBus {
        async fn request_name(
            &self,
            name: &str,
            flags: NameFlags,
        ) -> Result<RequestReply, BusError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Request(name.to_string(), flags));
            self.request_reply.clone()
        }

        async fn release_name(&self, name: &str) -> Result<ReleaseReply, BusError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Release(name.to_string(), Instant::now()));
            if self.emit_on_release {
                self.emit_lost(name);
            }
            self.release_reply.clone()
        }

        async fn subscribe_name_lost(&self) -> Result<LostNames, BusError> {
            self.calls.lock().unwrap().push(Call::Subscribe);
            let (tx, rx) = mpsc::unbounded_channel();
            *self.lost_tx.lock().unwrap() = Some(tx);
            Ok(futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|name| (name, rx))
            })
            .boxed())
        }
    }

    fn session(bus: &Arc<FakeBus>) -> (BusSession<FakeBus>, Arc<MemoryDiagnostics>) {
        let diagnostics = Arc::new(MemoryDiagnostics::default());
        let session = BusSession::new(Arc::clone(bus), NAME, diagnostics.clone());
        (session, diagnostics)
    }

    fn never() -> impl Future<Output = ()> {
        std::future::pending()
    }

    fn after(secs: u64) -> impl Future<Output = ()> {
        tokio::time::sleep(Duration::from_secs(secs))
    }

    fn connected(bus: FakeBus) -> impl Future<Output = Result<FakeBus, BusError>> {
        std::future::ready(Ok(bus))
    }

    // ===================
    // Acquisition
    // ===================

    #[tokio::test]
    async fn test_acquire_primary_owner() {
        let bus = Arc::new(FakeBus::owner());
        let (mut session, diag) = session(&bus);

        let state = session
            .acquire(NameFlags::ALLOW_REPLACEMENT, AcquisitionPolicy::Tolerate)
            .await
            .unwrap();

        assert_eq!(state, NameState::Owned);
        assert!(diag.contains("We now own the name org.DBusTest.SignalTest!"));
        assert_eq!(
            bus.calls(),
            vec![Call::Request(NAME.into(), NameFlags::ALLOW_REPLACEMENT)]
        );
    }

    #[tokio::test]
    async fn test_acquire_in_queue() {
        let bus = Arc::new(FakeBus::new(
            Ok(RequestReply::InQueue),
            Ok(ReleaseReply::Released),
        ));
        let (mut session, diag) = session(&bus);

        let state = session
            .acquire(NameFlags::ALLOW_REPLACEMENT, AcquisitionPolicy::Tolerate)
            .await
            .unwrap();

        assert_eq!(state, NameState::Queued);
        assert!(diag.contains("standing in queue"));
    }

    #[tokio::test]
    async fn test_acquire_exists_is_informational_when_tolerated() {
        let bus = Arc::new(FakeBus::new(
            Ok(RequestReply::Exists),
            Ok(ReleaseReply::NotOwner),
        ));
        let (mut session, diag) = session(&bus);

        let state = session
            .acquire(NameFlags::default(), AcquisitionPolicy::Tolerate)
            .await
            .unwrap();

        assert_eq!(state, NameState::OwnedByOther);
        assert!(diag.contains("already exists"));
    }

    #[tokio::test]
    async fn test_acquire_already_owner() {
        let bus = Arc::new(FakeBus::new(
            Ok(RequestReply::AlreadyOwner),
            Ok(ReleaseReply::Released),
        ));
        let (mut session, diag) = session(&bus);

        let state = session
            .acquire(NameFlags::ALLOW_REPLACEMENT, AcquisitionPolicy::Tolerate)
            .await
            .unwrap();

        assert_eq!(state, NameState::Owned);
        assert!(diag.contains("We already own this name"));
    }

    #[tokio::test]
    async fn test_acquire_failure_tolerated_logs_and_continues() {
        let bus = Arc::new(FakeBus::new(
            Err(BusError::Call(Some("Connection is not allowed to own".into()))),
            Ok(ReleaseReply::NonExistent),
        ));
        let (mut session, diag) = session(&bus);

        let state = session
            .acquire(NameFlags::ALLOW_REPLACEMENT, AcquisitionPolicy::Tolerate)
            .await
            .unwrap();

        assert_eq!(state, NameState::Unclaimed);
        let lines = diag.lines();
        assert_eq!(lines[0].0, Severity::Error);
        assert!(lines[0].1.contains("Couldn't acquire name org.DBusTest.SignalTest"));
        assert!(lines[0].1.contains("not allowed to own"));
        assert!(lines[1].1.contains("may not terminate"));
    }

    #[tokio::test]
    async fn test_acquire_failure_fatal_returns_error() {
        let bus = Arc::new(FakeBus::new(
            Err(BusError::Call(Some("denied".into()))),
            Ok(ReleaseReply::NonExistent),
        ));
        let (mut session, _diag) = session(&bus);

        let err = session
            .acquire(NameFlags::ALLOW_REPLACEMENT, AcquisitionPolicy::Fatal)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Acquisition { .. }));
    }

    #[tokio::test]
    async fn test_acquire_exists_fatal_returns_error() {
        let bus = Arc::new(FakeBus::new(
            Ok(RequestReply::Exists),
            Ok(ReleaseReply::NotOwner),
        ));
        let (mut session, _diag) = session(&bus);

        let err = session
            .acquire(NameFlags::default(), AcquisitionPolicy::Fatal)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NameTaken(_)));
    }

    // ===================
    // Release timer
    // ===================

    #[tokio::test]
    async fn test_release_timer_reports_each_reply() {
        let cases = [
            (Ok(ReleaseReply::Released), "was released successfully"),
            (Ok(ReleaseReply::NotOwner), "is not owned by this app!"),
            (Ok(ReleaseReply::NonExistent), "does not exist!"),
        ];

        for (reply, expected) in cases {
            let bus = Arc::new(FakeBus::new(Ok(RequestReply::PrimaryOwner), reply));
            let (mut session, diag) = session(&bus);
            session.schedule_release(Duration::from_millis(10));
            let timer = session.release.take().unwrap();
            assert_eq!(timer.delay(), Duration::from_millis(10));
            timer.fire().await.ok();
            assert!(diag.contains(expected), "missing {expected:?}");
        }
    }

    #[tokio::test]
    async fn test_release_failure_without_detail_is_flagged() {
        let bus = Arc::new(FakeBus::new(
            Ok(RequestReply::PrimaryOwner),
            Err(BusError::Call(None)),
        ));
        let (mut session, diag) = session(&bus);
        session.schedule_release(Duration::ZERO);

        let result = session.release.take().unwrap().fire().await;

        assert_eq!(result, Err(BusError::Call(None)));
        assert!(diag.contains("Something fishy"));
        assert!(!diag.contains("Could not release"));
    }

    #[tokio::test]
    async fn test_release_failure_with_detail_warns_about_hang() {
        let bus = Arc::new(FakeBus::new(
            Ok(RequestReply::PrimaryOwner),
            Err(BusError::Call(Some("Disconnected".into()))),
        ));
        let (mut session, diag) = session(&bus);
        session.schedule_release(Duration::ZERO);

        session.release.take().unwrap().fire().await.ok();

        assert!(diag.contains("Could not release name org.DBusTest.SignalTest: Disconnected"));
        assert!(diag.contains("This program may not terminate..."));
        assert!(!diag.contains("Something fishy"));
    }

    // ===================
    // Event loop
    // ===================

    #[tokio::test(start_paused = true)]
    async fn test_release_fires_once_after_delay_then_name_lost() {
        let bus = Arc::new(FakeBus::owner());
        let (mut session, _diag) = session(&bus);
        session
            .acquire(NameFlags::ALLOW_REPLACEMENT, AcquisitionPolicy::Tolerate)
            .await
            .unwrap();
        session.subscribe_name_lost().await.unwrap();
        session.schedule_release(Duration::from_millis(1000));

        let start = Instant::now();
        let outcome = session.run(never()).await;

        assert_eq!(outcome, RunOutcome::NameLost(NAME.into()));
        assert_eq!(session.state(), NameState::Released);

        let releases = bus.release_times();
        assert_eq!(releases.len(), 1);
        assert!(releases[0] - start >= Duration::from_millis(1000));
        // Loop exits right after the signal, no extra delay.
        assert!(Instant::now() - releases[0] < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_never_fires_twice() {
        // Release succeeds on paper, but no NameLost ever comes back.
        let bus = Arc::new(FakeBus::new(
            Ok(RequestReply::InQueue),
            Ok(ReleaseReply::Released),
        ));
        let (mut session, _diag) = session(&bus);
        session.subscribe_name_lost().await.unwrap();
        session.schedule_release(Duration::from_millis(1000));

        let outcome = session.run(after(3600)).await;

        assert_eq!(outcome, RunOutcome::Interrupted);
        assert_eq!(bus.release_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_lost_before_release_means_replaced() {
        let bus = Arc::new(FakeBus::owner());
        let (mut session, diag) = session(&bus);
        session
            .acquire(NameFlags::ALLOW_REPLACEMENT, AcquisitionPolicy::Tolerate)
            .await
            .unwrap();
        session.subscribe_name_lost().await.unwrap();
        session.schedule_release(Duration::from_millis(1000));
        bus.emit_lost(NAME);

        let outcome = session.run(never()).await;

        assert_eq!(outcome, RunOutcome::NameLost(NAME.into()));
        assert_eq!(session.state(), NameState::OwnedByOther);
        assert!(bus.release_times().is_empty());
        assert!(diag.contains("!!! We lost our Name !!!"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_ends_loop() {
        let bus = Arc::new(FakeBus::owner());
        let (mut session, diag) = session(&bus);
        session.subscribe_name_lost().await.unwrap();
        bus.disconnect();

        let outcome = session.run(never()).await;

        assert_eq!(outcome, RunOutcome::Disconnected);
        assert!(diag.contains("subscription closed"));
    }

    #[tokio::test]
    async fn test_shutdown_drops_subscription() {
        let bus = Arc::new(FakeBus::owner());
        let (mut session, _diag) = session(&bus);
        session.subscribe_name_lost().await.unwrap();
        assert!(session.is_subscribed());

        session.shutdown();

        assert!(!session.is_subscribed());
    }

    // ===================
    // Full client run
    // ===================

    #[tokio::test(start_paused = true)]
    async fn test_client_end_to_end_ordering() {
        let diag = Arc::new(MemoryDiagnostics::default());
        let exit = run_client(
            connected(FakeBus::owner()),
            &Config::default(),
            diag.clone(),
            never(),
        )
        .await;

        assert_eq!(exit, ClientExit::Completed);
        assert_eq!(exit.code(), 0);

        let owned = diag.position("We now own the name").unwrap();
        let released = diag.position("released successfully").unwrap();
        let lost = diag.position("We lost our Name").unwrap();
        assert!(owned < released);
        assert!(released < lost);
        assert_eq!(lost, diag.lines().len() - 1);
        assert_eq!(diag.lines()[lost].0, Severity::Notice);
    }

    #[tokio::test]
    async fn test_client_connect_failure_exits_one() {
        let diag = Arc::new(MemoryDiagnostics::default());
        let exit = run_client(
            std::future::ready(Err::<FakeBus, _>(BusError::Connect(
                "No such file or directory".into(),
            ))),
            &Config::default(),
            diag.clone(),
            never(),
        )
        .await;

        assert_eq!(exit, ClientExit::ConnectFailed);
        assert_eq!(exit.code(), 1);
        assert_eq!(diag.lines().len(), 1);
        assert!(diag.contains("Failed to connect to Session bus: No such file"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_tolerated_failure_needs_interrupt() {
        let diag = Arc::new(MemoryDiagnostics::default());
        let exit = run_client(
            connected(FakeBus::new(
                Err(BusError::Call(Some("denied".into()))),
                Ok(ReleaseReply::NonExistent),
            )),
            &Config::default(),
            diag.clone(),
            after(600),
        )
        .await;

        assert_eq!(exit, ClientExit::Interrupted);
        assert_eq!(exit.code(), 130);
        assert!(diag.contains("does not exist!"));
        assert!(!diag.contains("We lost our Name"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_fatal_failure_exits_immediately() {
        let mut config = Config::default();
        config.acquisition.policy = AcquisitionPolicy::Fatal;
        let bus = Arc::new(FakeBus::new(
            Err(BusError::Call(Some("denied".into()))),
            Ok(ReleaseReply::NonExistent),
        ));

        let diag = Arc::new(MemoryDiagnostics::default());
        let start = Instant::now();
        let exit = run_client(
            std::future::ready(Ok::<_, BusError>(ArcBus(Arc::clone(&bus)))),
            &config,
            diag.clone(),
            never(),
        )
        .await;

        assert_eq!(exit, ClientExit::AcquisitionFailed);
        assert_eq!(exit.code(), 2);
        assert_eq!(Instant::now(), start);
        assert_eq!(bus.calls().len(), 1);
        assert!(!diag.contains("may not terminate"));
    }

    /// Shares a `FakeBus` with the test after `run_client` takes ownership.
    struct ArcBus(Arc<FakeBus>);

    #[async_trait]
    impl NameBus for ArcBus {
        async fn request_name(
            &self,
            name: &str,
            flags: NameFlags,
        ) -> Result<RequestReply, BusError> {
            self.0.request_name(name, flags).await
        }

        async fn release_name(&self, name: &str) -> Result<ReleaseReply, BusError> {
            self.0.release_name(name).await
        }

        async fn subscribe_name_lost(&self) -> Result<LostNames, BusError> {
            self.0.subscribe_name_lost().await
        }
    }
}
