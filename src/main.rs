use anyhow::Result;
use remote_led_sync::domain::models::{AdapterState, AppEvent, LocalInput, MessageSeverity};
use remote_led_sync::domain::settings::{Backend, Settings, SettingsService};
use remote_led_sync::infrastructure::bluetooth::{
    CoordinatorChannels, LoopbackAir, SessionConfig, SessionCoordinator,
};
use remote_led_sync::infrastructure::hardware::{
    build_output, spawn_console_input, ConsoleRoutes, LogOutput,
};
use remote_led_sync::infrastructure::logging::init_logger;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const LOCAL_ADDRESS: &str = "02:00:00:00:00:01";
const SIMULATED_PEER_ADDRESS: &str = "02:00:00:00:00:02";

#[tokio::main]
async fn main() -> Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!(
        "Starting Remote LED sync as '{}', looking for '{}'",
        settings.local_name, settings.peer_name
    );
    debug!("Settings loaded from {}", settings_service.path().display());

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(log_app_events(event_rx));

    match settings.backend {
        Backend::Loopback => run_loopback(settings, event_tx).await,
        Backend::WinRt => run_winrt(settings, event_tx).await,
    }
}

async fn log_app_events(mut events: mpsc::UnboundedReceiver<AppEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            AppEvent::ConnectionStatus(state) => info!("Connection: {:?}", state),
            AppEvent::ToggleChanged { value, origin } => {
                info!("Toggle is now {} ({:?})", value, origin)
            }
            AppEvent::SubscribersChanged(count) => info!("{} subscriber(s)", count),
            AppEvent::LogMessage(msg) => match msg.severity {
                MessageSeverity::Error => error!("{}", msg.message),
                MessageSeverity::Warning => warn!("{}", msg.message),
                _ => debug!("{}", msg.message),
            },
        }
    }
}

/// Both devices in one process: ours plus a simulated peer with the names
/// swapped, joined by a loopback air.
async fn run_loopback(settings: Settings, event_tx: mpsc::UnboundedSender<AppEvent>) -> Result<()> {
    let air = LoopbackAir::new();
    let (radio, radio_rx) = air.attach(&settings.local_name, LOCAL_ADDRESS);
    let (peer_radio, peer_radio_rx) = air.attach(&settings.peer_name, SIMULATED_PEER_ADDRESS);

    let peer_config = SessionConfig {
        local_name: settings.peer_name.clone(),
        peer_name: settings.local_name.clone(),
        ..SessionConfig::from(&settings)
    };
    let (peer_event_tx, mut peer_event_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = peer_event_rx.recv().await {
            debug!("[peer] {:?}", event);
        }
    });
    let (peer_input_tx, peer_input_rx) = mpsc::unbounded_channel();
    let (peer_adapter_tx, peer_adapter_rx) = mpsc::unbounded_channel();
    let peer = SessionCoordinator::new(
        peer_config,
        peer_radio,
        Box::new(LogOutput),
        peer_event_tx,
    );
    let _ = peer_adapter_tx.send(AdapterState::Enabled);
    let peer_task = tokio::spawn(peer.run(CoordinatorChannels {
        radio: peer_radio_rx,
        adapter: peer_adapter_rx,
        input: peer_input_rx,
    }));

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (adapter_tx, adapter_rx) = mpsc::unbounded_channel();
    let _ = adapter_tx.send(AdapterState::Enabled);

    let local_address = radio.address().clone();
    let power_air = air.clone();
    spawn_console_input(ConsoleRoutes {
        local: input_tx,
        adapter: Box::new(move |state| {
            power_air.set_powered(&local_address, state == AdapterState::Enabled);
            let _ = adapter_tx.send(state);
        }),
        peer: Some(peer_input_tx.clone()),
    });
    info!("Commands: t(oggle), press, release, on, off, peer, q(uit)");

    let coordinator = SessionCoordinator::new(
        SessionConfig::from(&settings),
        radio,
        build_output(&settings.output),
        event_tx,
    );
    coordinator
        .run(CoordinatorChannels {
            radio: radio_rx,
            adapter: adapter_rx,
            input: input_rx,
        })
        .await;

    let _ = peer_input_tx.send(LocalInput::Shutdown);
    peer_task.await?;
    info!("Stopped");
    Ok(())
}

#[cfg(windows)]
async fn run_winrt(settings: Settings, event_tx: mpsc::UnboundedSender<AppEvent>) -> Result<()> {
    use remote_led_sync::infrastructure::bluetooth::winrt::WinRtRadio;
    use remote_led_sync::infrastructure::bluetooth::{RadioEvent, RadioHandle};

    let (radio_tx, radio_rx) = mpsc::unbounded_channel::<RadioEvent>();
    let radio: RadioHandle = WinRtRadio::new(radio_tx);

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (adapter_tx, adapter_rx) = mpsc::unbounded_channel();
    let _ = adapter_tx.send(AdapterState::Enabled);

    spawn_console_input(ConsoleRoutes {
        local: input_tx,
        adapter: Box::new(move |state| {
            let _ = adapter_tx.send(state);
        }),
        peer: None,
    });
    info!("Commands: t(oggle), press, release, on, off, q(uit)");

    SessionCoordinator::new(
        SessionConfig::from(&settings),
        radio,
        build_output(&settings.output),
        event_tx,
    )
    .run(CoordinatorChannels {
        radio: radio_rx,
        adapter: adapter_rx,
        input: input_rx,
    })
    .await;

    info!("Stopped");
    Ok(())
}

#[cfg(not(windows))]
async fn run_winrt(_settings: Settings, _event_tx: mpsc::UnboundedSender<AppEvent>) -> Result<()> {
    anyhow::bail!("the winrt backend is only available on Windows; set \"backend\": \"loopback\"")
}
