//! Wire executor and probe tests against live MGR members

use crate::{get_mgr_config, skip_if_not_enabled};
use athena_discovery::discovery::{NodeProbe, ProbeErrorKind, PRIMARY_MEMBER};
use athena_discovery::pool::{MysqlExecutor, SqlExecutor};

#[tokio::test]
async fn test_snapshot_of_every_member() {
    skip_if_not_enabled!();

    let config = get_mgr_config();
    let group_name = config.group_name();
    let executor = MysqlExecutor::default();

    for endpoint in config.endpoints() {
        let snapshot = NodeProbe::snapshot(&executor, &endpoint)
            .await
            .expect("Probe of a live member should succeed");
        assert!(snapshot.plugin_active, "{} has MGR inactive", endpoint.id());
        assert!(snapshot.member_count >= 1);
        assert_eq!(snapshot.group_name, group_name);
        assert!(snapshot.single_primary, "{} is not single-primary", endpoint.id());
    }
}

#[tokio::test]
async fn test_primary_member_matches_membership_view() {
    skip_if_not_enabled!();

    let config = get_mgr_config();
    let expected = config
        .primary_address()
        .expect("Membership query should succeed")
        .expect("Group should have a primary");

    let executor = MysqlExecutor::default();
    let endpoints = config.endpoints();
    let reported = NodeProbe::primary_member(&executor, &endpoints[0])
        .await
        .expect("Primary member query should succeed")
        .expect("Member should know the primary");
    assert!(reported.same_member(&expected), "{} != {}", reported, expected);
}

#[tokio::test]
async fn test_connection_is_reused() {
    skip_if_not_enabled!();

    let config = get_mgr_config();
    let executor = MysqlExecutor::default();
    let endpoint = &config.endpoints()[0];

    for _ in 0..5 {
        executor
            .query(endpoint, PRIMARY_MEMBER)
            .await
            .expect("Query should succeed");
    }
    assert_eq!(executor.len(), 1);
}

#[tokio::test]
async fn test_wrong_password_is_permission_denied() {
    skip_if_not_enabled!();

    let mut config = get_mgr_config();
    config.password = format!("{}-wrong", config.password);
    let executor = MysqlExecutor::default();

    let err = executor
        .query(&config.endpoints()[0], "SELECT 1")
        .await
        .expect_err("Login with a wrong password should fail");
    assert_eq!(err.kind(), ProbeErrorKind::PermissionDenied);
}
