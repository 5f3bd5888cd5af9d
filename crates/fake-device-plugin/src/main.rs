use anyhow::Result;
use clap::Parser;
use fake_device_plugin::config::Cli;
use fake_device_plugin::fatal;
use fake_device_plugin::FakeDevicePlugin;
use fake_device_plugin::PluginConfig;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init();

    tracing::info!("Starting fake device plugin {}", &**version::VERSION);

    let mut plugin = FakeDevicePlugin::new(PluginConfig::from(&cli));
    if let Err(e) = plugin.start().await {
        // the plugin is either fully serving or not running at all
        fatal::terminate(plugin.resource_name(), format!("{e:?}"));
    }

    wait_for_shutdown_signal().await?;

    plugin.stop().await.map_err(|e| anyhow::anyhow!("{e:?}"))?;
    tracing::info!("fake device plugin stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    }
    Ok(())
}
