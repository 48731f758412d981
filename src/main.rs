use region_replicas::{
    try_create_region_server, ConsistencyRouter, HostIdentity, InMemoryLocationStore, KeyRange, LocalStoreFiles,
    LocalTransport, ReadRequest, RegionId, RegionInfo, RegionReplicaOptions, RegionServerConfig, ReplicaDescriptor,
    ReplicaId, SequenceId,
};
use slog::Drain;
use std::error::Error;
use std::sync::Arc;
use tokio::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = create_root_logger_for_stdout();
    let root = std::env::temp_dir().join(format!("region-replicas-{}", std::process::id()));
    let file_system = Arc::new(LocalStoreFiles::new(&root));
    let location_store = Arc::new(InMemoryLocationStore::new());

    let mut servers = Vec::new();
    for (i, name) in ["rs-primary", "rs-secondary"].iter().enumerate() {
        let server = try_create_region_server(RegionServerConfig {
            host: HostIdentity::new(*name, 16020 + i as u16, chrono::Utc::now().timestamp_millis()),
            info_logger: logger.clone(),
            file_system: file_system.clone(),
            location_store: location_store.clone(),
            options: RegionReplicaOptions {
                refresh_interval: Some(Duration::from_millis(500)),
                ..RegionReplicaOptions::default()
            },
        })?;
        servers.push(server);
    }

    let transport = Arc::new(LocalTransport::new());
    for server in servers.iter() {
        transport.add_host(server.replicas().clone());
    }
    let router = ConsistencyRouter::new(logger.clone(), servers[0].registry().clone(), transport);

    let primary_descriptor = ReplicaDescriptor {
        region: RegionInfo {
            table: "demo".to_string(),
            key_range: KeyRange::unbounded(),
            region_id: RegionId::new(1),
        },
        replica_id: ReplicaId::PRIMARY,
        families: vec!["info".to_string()],
        open_sequence_id: SequenceId::new(0),
    };
    let primary = servers[0].open_replica(primary_descriptor.clone()).await?;
    servers[1]
        .open_replica(primary_descriptor.with_replica_id(ReplicaId::new(1)))
        .await?;

    for i in 0..1000 {
        primary.put("info", i.to_string(), i.to_string())?;
    }
    primary.flush().await?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let request = ReadRequest::timeline(RegionId::new(1), "info", "42").with_replica_id(ReplicaId::new(1));
    let response = router.read(&request).await?;
    slog::info!(logger, "Read '42' from secondary: {:?}", response);

    let request = ReadRequest::strong(RegionId::new(1), "info", "1042");
    let response = router.read(&request).await?;
    slog::info!(logger, "Read '1042' from primary: {:?}", response);

    for server in servers.iter() {
        server.shutdown().await;
    }
    std::fs::remove_dir_all(&root)?;

    Ok(())
}

fn create_root_logger_for_stdout() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
