//! End-to-end discovery against a live MGR cluster

use std::sync::Arc;

use crate::{get_mgr_config, skip_if_not_enabled};
use athena_discovery::coordination::{CoordinationStore, CronScheduler, MemoryStore};
use athena_discovery::discovery::{
    ConfigError, ConnectOptions, DataSourceEndpoint, ResolverConfig, TickOutcome,
};
use athena_discovery::pool::MysqlExecutor;
use athena_discovery::{DiscoveryError, DiscoveryManager, GroupConfig};

fn manager(store: Arc<MemoryStore>) -> DiscoveryManager {
    DiscoveryManager::new(
        Arc::new(MysqlExecutor::default()),
        store,
        Arc::new(CronScheduler::new()),
        "it-instance",
        ResolverConfig::default(),
    )
}

fn group_config(group_name: &str) -> GroupConfig {
    // Ticks are driven by hand
    GroupConfig::new(group_name).with_cron("0 0 0 1 1 ?")
}

#[tokio::test]
async fn test_resolves_current_primary() {
    skip_if_not_enabled!();

    let config = get_mgr_config();
    let group_name = config.group_name();
    let manager = manager(Arc::new(MemoryStore::new("mgr-elasticjob")));
    let endpoints = config.endpoints();

    manager
        .register_group(group_config(&group_name), endpoints.clone())
        .await
        .expect("Live group should pass validation");

    let outcome = manager.refresh(&group_name).await.unwrap();
    let TickOutcome::Resolved { primary, .. } = outcome else {
        panic!("Expected a resolved primary, got {:?}", outcome);
    };

    let expected = config.primary_address().unwrap().unwrap();
    let endpoint = endpoints.iter().find(|e| e.id() == primary).unwrap();
    assert!(endpoint.is_target(&expected), "{} is not {}", endpoint.id(), expected);
    assert_eq!(manager.current_primary(&group_name), Some(primary));
    assert!(manager.topology(&group_name).unwrap().unavailable.is_empty());

    manager.deregister_group(&group_name).await.unwrap();
}

#[tokio::test]
async fn test_job_record_is_persisted() {
    skip_if_not_enabled!();

    let config = get_mgr_config();
    let group_name = config.group_name();
    let store = Arc::new(MemoryStore::new("mgr-elasticjob"));
    let manager = manager(store.clone());

    manager
        .register_group(GroupConfig::new(&group_name), config.endpoints())
        .await
        .unwrap();

    let yaml = store
        .get(&format!("/MGR-{}/config", group_name))
        .await
        .unwrap()
        .expect("Job record should be persisted");
    assert!(yaml.starts_with("cron: 0/5 * * * * ?\n"));
    assert!(yaml.contains(&format!("jobName: MGR-{}\n", group_name)));

    manager.deregister_group(&group_name).await.unwrap();
}

#[tokio::test]
async fn test_wrong_group_name_is_rejected() {
    skip_if_not_enabled!();

    let config = get_mgr_config();
    let manager = manager(Arc::new(MemoryStore::new("mgr-elasticjob")));

    let err = manager
        .register_group(
            group_config("00000000-0000-0000-0000-000000000000"),
            config.endpoints(),
        )
        .await
        .expect_err("Foreign group name should be rejected");
    assert!(matches!(
        err,
        DiscoveryError::Config(ConfigError::GroupNameMismatch { .. })
    ));
}

#[tokio::test]
async fn test_unreachable_member_is_tolerated() {
    skip_if_not_enabled!();

    let config = get_mgr_config();
    let group_name = config.group_name();
    let manager = manager(Arc::new(MemoryStore::new("mgr-elasticjob")));

    // Port 1 never answers; it goes first so validation has to skip it
    let mut endpoints = vec![DataSourceEndpoint::new(
        "ds_dead",
        ConnectOptions {
            host: "127.0.0.1".to_string(),
            port: 1,
            user: config.user.clone(),
            password: config.password.clone(),
            database: None,
        },
    )];
    endpoints.extend(config.endpoints());

    manager
        .register_group(group_config(&group_name), endpoints)
        .await
        .expect("One unreachable member should not fail validation");
    let outcome = manager.refresh(&group_name).await.unwrap();
    assert!(matches!(outcome, TickOutcome::Resolved { .. }), "{:?}", outcome);
    assert!(manager
        .topology(&group_name)
        .unwrap()
        .unavailable
        .contains("ds_dead"));

    manager.deregister_group(&group_name).await.unwrap();
}
