//! ---
//! vdash_section: "15-testing-qa-runbook"
//! vdash_subsection: "integration-tests"
//! vdash_type: "source"
//! vdash_scope: "code"
//! vdash_description: "Simulated telematics service behaviour."
//! vdash_version: "v0.1.0"
//! vdash_owner: "tbd"
//! ---
use anyhow::Result;
use vdash_common::config::{SimulationConfig, VehicleConfig};
use vdash_remote::{
    ClimateState, ControlOperation, Domain, RemoteVehicleClient, RequestEvent, RequestStatus,
    SimulatedVehicle, TemperatureUnit,
};

fn simulation(config: SimulationConfig) -> SimulatedVehicle {
    SimulatedVehicle::from_config(&VehicleConfig::default(), &config).unwrap()
}

#[tokio::test]
async fn injected_requests_stay_until_driven() -> Result<()> {
    let sim = simulation(SimulationConfig::default());
    let id = sim.inject_request(ControlOperation::Stop, RequestStatus::InProgress);
    for _ in 0..5 {
        sim.fetch(&Domain::default_set(), false).await?;
    }
    assert_eq!(sim.pending_requests().len(), 1);

    let mut rx = sim.subscribe_requests();
    assert!(sim.set_request_status(&id, RequestStatus::FailIgnitionOn));
    match rx.recv().await? {
        RequestEvent::StatusChanged(request) => {
            assert_eq!(request.id, id);
            assert_eq!(request.status, RequestStatus::FailIgnitionOn);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!sim.set_request_status("missing", RequestStatus::Successful));
    Ok(())
}

#[tokio::test]
async fn outcome_override_leaves_climate_untouched() -> Result<()> {
    let sim = simulation(SimulationConfig {
        steps_to_outcome: 0,
        ..SimulationConfig::default()
    });
    sim.set_outcome(Some(RequestStatus::FailBatteryLow));
    sim.write_climate_operation(ControlOperation::Start).await?;
    let mut rx = sim.subscribe_requests();

    sim.fetch(&[Domain::Climatisation], false).await?;
    sim.fetch(&[Domain::Climatisation], false).await?;

    let mut terminal = None;
    while let Ok(event) = rx.try_recv() {
        if let RequestEvent::StatusChanged(request) = event {
            terminal = Some(request.status);
        }
    }
    assert_eq!(terminal, Some(RequestStatus::FailBatteryLow));
    assert_eq!(sim.climate_state(), ClimateState::Off);
    assert_eq!(sim.operation_writes(), vec![ControlOperation::Start]);
    Ok(())
}

#[tokio::test]
async fn seeded_failures_are_reproducible() -> Result<()> {
    let config = SimulationConfig {
        seed: 7,
        transport_failure_rate: 0.5,
        ..SimulationConfig::default()
    };
    let first = simulation(config.clone());
    let second = simulation(config);
    let mut a = Vec::new();
    let mut b = Vec::new();
    for _ in 0..16 {
        a.push(first.fetch(&[Domain::All], true).await.is_ok());
        b.push(second.fetch(&[Domain::All], true).await.is_ok());
    }
    assert_eq!(a, b);
    Ok(())
}

#[tokio::test]
async fn configuration_selects_initial_state_and_unit() -> Result<()> {
    let sim = simulation(SimulationConfig {
        initial_climate_state: "Cooling".into(),
        kelvin_only: true,
        climate_capable: false,
        ..SimulationConfig::default()
    });
    assert_eq!(sim.climate_state(), ClimateState::Cooling);
    assert_eq!(sim.temperature_unit(), TemperatureUnit::Kelvin);
    assert!(!sim.climate_control_capable());
    assert!(sim
        .write_climate_operation(ControlOperation::Stop)
        .await
        .is_err());
    Ok(())
}
