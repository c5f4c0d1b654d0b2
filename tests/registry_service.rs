use benchlink::channel::Endpoint;
use benchlink::config::CoreConfig;
use benchlink::registry::{
    RegistryClient, RegistryEvent, RegistryServer, ServiceRegistration,
};
use std::time::Duration;

fn test_config(sweep: Duration) -> CoreConfig {
    CoreConfig {
        sweep_interval: sweep,
        connect_timeout: Duration::from_secs(1),
        request_timeout: Duration::from_secs(2),
        ..CoreConfig::default()
    }
}

async fn start_registry(sweep: Duration) -> (RegistryServer, RegistryClient, CoreConfig) {
    let config = test_config(sweep);
    let server = RegistryServer::start_at(("127.0.0.1", 0), &config)
        .await
        .unwrap();
    let client = RegistryClient::for_endpoint(server.endpoint(), config.timeouts());
    (server, client, config)
}

#[tokio::test(flavor = "multi_thread")]
async fn register_lookup_deregister_over_the_wire() {
    let (_server, client, _config) = start_registry(Duration::from_millis(200)).await;

    let id = client
        .register(&ServiceRegistration::new(
            "STORAGE",
            "10.0.0.5",
            4000,
            Duration::from_secs(10),
        ))
        .await
        .unwrap();

    let record = client.lookup("STORAGE").await.unwrap();
    assert_eq!(record.service_id, id);
    assert_eq!(record.endpoint(), Endpoint::new("10.0.0.5", 4000));

    let listed = client.list().await.unwrap();
    assert_eq!(listed.len(), 1);

    client.deregister(id).await.unwrap();
    let err = client.lookup("STORAGE").await.unwrap_err();
    assert!(matches!(
        err,
        benchlink::error::RegistryError::NotFound(t) if t == "STORAGE"
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn renew_of_unknown_id_is_typed() {
    let (_server, client, _config) = start_registry(Duration::from_millis(200)).await;

    let stranger = uuid::Uuid::new_v4();
    let err = client.renew(stranger).await.unwrap_err();
    assert!(matches!(
        err,
        benchlink::error::RegistryError::UnknownRegistration(id) if id == stranger
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_registrations_are_rejected() {
    let (_server, client, _config) = start_registry(Duration::from_millis(200)).await;

    let err = client
        .register(&ServiceRegistration::new(
            "STORAGE",
            "",
            4000,
            Duration::from_secs(10),
        ))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        benchlink::error::RegistryError::InvalidRecord(_)
    ));
}

// Register with ttl=1s and never renew: lookup succeeds at first, and
// after the ttl plus one sweep interval it reports the service
// unavailable.
#[tokio::test(flavor = "multi_thread")]
async fn a_lease_lapses_without_renewal() {
    let (server, client, _config) = start_registry(Duration::from_millis(100)).await;
    let mut events = server.subscribe();

    let id = client
        .register(&ServiceRegistration::new(
            "SM",
            "10.0.0.5",
            4000,
            Duration::from_secs(1),
        ))
        .await
        .unwrap();
    assert!(client.lookup("SM").await.is_ok());

    tokio::time::sleep(Duration::from_millis(1400)).await;

    let err = client.lookup("SM").await.unwrap_err();
    assert!(matches!(err, benchlink::error::RegistryError::NotFound(_)));

    // The sweep announced the eviction.
    let mut saw_expiry = false;
    while let Ok(event) = events.try_recv() {
        if let RegistryEvent::Expired(record) = event {
            assert_eq!(record.service_id, id);
            saw_expiry = true;
        }
    }
    assert!(saw_expiry, "expected an expiry event from the sweep");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_maintained_lease_survives_its_ttl() {
    let (_server, client, _config) = start_registry(Duration::from_millis(100)).await;

    let registration =
        ServiceRegistration::new("CONFMAN", "127.0.0.1", 4001, Duration::from_secs(1));
    let handle = client
        .register_and_maintain(registration, Duration::from_millis(250))
        .await;
    let original = handle.service_id().unwrap();

    // Well past the ttl; renewals are keeping the lease alive.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let record = client.lookup("CONFMAN").await.unwrap();
    assert_eq!(record.service_id, original);

    handle.deregister().await.unwrap();
    assert!(client.lookup("CONFMAN").await.is_err());
}

// Self-healing: evict the lease server-side while the client keeps
// renewing. The next renewal fails with UnknownRegistration and the
// maintenance loop re-registers under a fresh id within one interval.
#[tokio::test(flavor = "multi_thread")]
async fn an_evicted_client_re_registers_itself() {
    let (server, client, _config) = start_registry(Duration::from_millis(100)).await;

    let registration =
        ServiceRegistration::new("HEXAPOD", "127.0.0.1", 4002, Duration::from_secs(5));
    let handle = client
        .register_and_maintain(registration, Duration::from_millis(200))
        .await;
    let original = handle.service_id().unwrap();

    // Simulate a server-side eviction the client did not cause.
    server.store().deregister(original).unwrap();

    let mut healed = None;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        match handle.service_id() {
            Some(id) if id != original => {
                healed = Some(id);
                break;
            }
            _ => {}
        }
    }

    let fresh = healed.expect("lease was not re-registered after eviction");
    let record = client.lookup("HEXAPOD").await.unwrap();
    assert_eq!(record.service_id, fresh);

    handle.deregister().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn health_and_info_report_the_server_state() {
    let (_server, client, _config) = start_registry(Duration::from_millis(200)).await;

    assert!(client.health().await);

    client
        .register(&ServiceRegistration::new(
            "STORAGE",
            "10.0.0.5",
            4000,
            Duration::from_secs(10),
        ))
        .await
        .unwrap();

    let info = client.info().await.unwrap();
    assert_eq!(info["status"], "ok");
    assert_eq!(info["registrations"], 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn an_unreachable_registry_is_a_channel_error() {
    let config = test_config(Duration::from_millis(200));
    // Nothing listens here.
    let client = RegistryClient::for_endpoint(Endpoint::new("127.0.0.1", 1), config.timeouts());

    let err = client
        .register(&ServiceRegistration::new(
            "STORAGE",
            "10.0.0.5",
            4000,
            Duration::from_secs(10),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, benchlink::error::RegistryError::Channel(_)));
}
