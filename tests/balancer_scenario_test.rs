use fuseguard::config::Config;
use fuseguard::controller::{ControllerStatus, LoadBalancerController};
use fuseguard::device::{ChargerRegistry, MeterRegistry};
use fuseguard::events::ChangeReason;
use fuseguard::simulation::SimulatedPlant;
use fuseguard::types::{CommandTarget, OvercurrentMode, Phase};

fn bound_controller(config: &Config) -> (SimulatedPlant, LoadBalancerController) {
    let plant = SimulatedPlant::from_config(&config.simulation);
    let mut chargers = ChargerRegistry::new();
    let mut meters = MeterRegistry::new();
    plant.register(&mut chargers, &mut meters);

    let charger = chargers.bind(&config.charger_device).unwrap();
    let meter = meters.bind(&config.meter_device).unwrap();
    let controller = LoadBalancerController::new(config.balancer.clone(), meter, charger).unwrap();
    (plant, controller)
}

#[tokio::test]
async fn quiet_household_lets_car_take_the_headroom() {
    let config = Config::default();
    let (plant, mut controller) = bound_controller(&config);

    // Car found at 16 A: the session starts with whatever L1 leaves free
    let first = controller.tick().await.unwrap();
    assert_eq!(first.commands.len(), 1);
    assert_eq!(first.commands[0].target, CommandTarget::All);
    assert_eq!(first.commands[0].amps, 19);
    assert_eq!(first.status, ControllerStatus::MonitoringLoads);

    for _ in 0..2 {
        let report = controller.tick().await.unwrap();
        assert!(report.commands.is_empty());
        assert!(report.deferred.is_empty());
    }
    assert_eq!(plant.charger.commands().len(), 1);
    assert_eq!(plant.charger.limit(Phase::L1), 19);
    assert_eq!(controller.snapshot().total_ticks, 3);
}

#[tokio::test]
async fn conservative_site_sheds_synced_charger_load() {
    let mut config = Config::default();
    config.balancer.mode = OvercurrentMode::Conservative;
    let (plant, mut controller) = bound_controller(&config);
    let mut events = controller.events().subscribe();

    // 12 A of household load plus 16 A of car on a 25 A fuse
    plant.meter.set_load(Phase::L1, 12.0 * 230.0);

    let report = controller.tick().await.unwrap();
    assert_eq!(report.commands.len(), 1);
    assert_eq!(report.commands[0].target, CommandTarget::All);
    assert_eq!(report.commands[0].amps, 13);
    for phase in Phase::ALL {
        assert_eq!(plant.charger.limit(phase), 13);
    }

    let event = events.try_recv().unwrap();
    let change = event.as_limit_change().unwrap();
    assert_eq!(change.phase, None);
    assert_eq!(change.previous_limit, 16);
    assert_eq!(change.new_limit, 13);
    assert_eq!(change.reason, ChangeReason::ConservativeLimit);

    // Load now sits exactly at the rating; nothing further to do
    let report = controller.tick().await.unwrap();
    assert!(report.commands.is_empty());
    assert_eq!(plant.charger.commands().len(), 1);
}

#[tokio::test]
async fn unplugged_car_gets_no_commands() {
    let mut config = Config::default();
    config.balancer.mode = OvercurrentMode::Conservative;
    config.simulation.car_connected = false;
    let (plant, mut controller) = bound_controller(&config);

    plant.meter.set_load(Phase::L2, 30.0 * 230.0);
    let report = controller.tick().await.unwrap();

    assert!(report.commands.is_empty());
    assert!(report.suppressed);
    assert_eq!(controller.status(), ControllerStatus::AwaitingCharger);
    assert!(plant.charger.commands().is_empty());
}

#[tokio::test]
async fn unsupported_device_record_is_rejected() {
    let mut config = Config::default();
    config.charger_device.identifiers[0].domain = "zaptec".to_string();

    let plant = SimulatedPlant::from_config(&config.simulation);
    let mut chargers = ChargerRegistry::new();
    let mut meters = MeterRegistry::new();
    plant.register(&mut chargers, &mut meters);

    assert!(chargers.identify(&config.charger_device).is_none());
    let err = chargers.bind(&config.charger_device).err().unwrap();
    assert!(err.is_fatal());
    assert!(format!("{}", err).contains("Unsupported device"));
}
