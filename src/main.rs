use anyhow::Result;
use fuseguard::config::Config;
use fuseguard::controller::LoadBalancerController;
use fuseguard::device::{ChargerRegistry, MeterRegistry};
use fuseguard::simulation::SimulatedPlant;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate()?;
    fuseguard::logging::init_logging(&config.logging)?;

    info!("Fuseguard {} starting up", env!("APP_VERSION"));

    let mut chargers = ChargerRegistry::new();
    let mut meters = MeterRegistry::new();
    SimulatedPlant::from_config(&config.simulation).register(&mut chargers, &mut meters);

    let charger = chargers.bind(&config.charger_device)?;
    let meter = meters.bind(&config.meter_device)?;
    let mut controller = LoadBalancerController::new(config.balancer.clone(), meter, charger)?;
    let shutdown = controller.shutdown_handle();

    // Events are already logged by the bus; forward them as JSON for tooling
    let mut events = controller.events().stream();
    let event_task = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => debug!(event = %json, "balancer event"),
                    Err(e) => error!("Failed to serialize event: {}", e),
                },
                Err(e) => warn!("Event stream lagged: {}", e),
            }
        }
    });

    let runner = tokio::spawn(async move { controller.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping after the current tick");
    shutdown.shutdown();

    let outcome = runner.await?;
    event_task.abort();
    match outcome {
        Ok(()) => {
            info!("Load balancer shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Load balancer failed with error: {}", e);
            Err(anyhow::anyhow!("Load balancer error: {}", e))
        }
    }
}
