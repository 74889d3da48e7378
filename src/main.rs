use anyhow::Result;
use global_hotkey::GlobalHotKeyEvent;
use std::sync::Arc;

use voicekey::config::{data_dir, ConfigStore};
use voicekey::history::HistoryLog;
use voicekey::hotkey::{HotkeyEvent, HotkeyManager};
use voicekey::models::{models_dir, ModelDownloader};
use voicekey::pipeline::{Pipeline, PipelineStages};
use voicekey::service::AppService;
use voicekey::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config_store = Arc::new(ConfigStore::load()?);
    telemetry::init(true)?;
    tracing::info!("voicekey starting");

    let config = config_store.get();

    let history = Arc::new(HistoryLog::open_default()?);
    let downloader = Arc::new(ModelDownloader::new(models_dir()?));

    let cache_dir = data_dir()?.join("cache");
    let (pipeline, handle) = Pipeline::new(
        Arc::clone(&config_store),
        Arc::clone(&history),
        PipelineStages::production(cache_dir),
    );
    let pipeline_task = tokio::task::spawn_blocking(move || pipeline.run());

    // The settings UI layer drives the pipeline through this facade; headless
    // runs use it for the startup dependency report
    let service = AppService::new(
        Arc::clone(&config_store),
        history,
        downloader,
        handle.clone(),
    );
    let deps = service.check_dependencies();
    if !deps.sox || !deps.whisper {
        tracing::warn!(
            sox = deps.sox,
            whisper = deps.whisper,
            now_playing = deps.now_playing,
            "missing external tools; install them from the settings panel"
        );
    }
    if config.use_ollama && !service.is_ollama_running() {
        tracing::warn!("ollama enabled but not running; cleanup will be skipped");
    }

    let hotkey_manager = HotkeyManager::new(&config.hotkey)?;
    tracing::info!(
        "hotkey ready: {:?} + {:?} (changes take effect after restart)",
        config.hotkey.modifiers,
        config.hotkey.keys
    );

    // Main event loop: stays responsive to hotkey events while recording and
    // processing run on the pipeline task
    let receiver = GlobalHotKeyEvent::receiver();
    loop {
        if let Ok(event) = receiver.try_recv() {
            match hotkey_manager.handle_event(event) {
                Some(HotkeyEvent::Pressed) => handle.press(),
                Some(HotkeyEvent::Released) => handle.release(),
                None => {}
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            () = tokio::time::sleep(tokio::time::Duration::from_millis(10)) => {
                // Poll interval (10ms to avoid busy-waiting)
            }
        }
    }

    handle.shutdown();
    pipeline_task.await?;

    Ok(())
}
