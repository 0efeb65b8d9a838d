//! Tests for the route table

use std::sync::Arc;

use api_gateway::config::{Config, RouteConfig};
use api_gateway::proxy::backend::Backend;
use api_gateway::routes::{Route, RouteTable, has_dot_segments};

fn table() -> RouteTable {
    RouteTable::from_config(&Config::default()).unwrap()
}

#[test]
fn test_default_routes_resolve_to_their_services() {
    let table = table();

    let users = table.resolve("/api/users/42").unwrap();
    assert_eq!(users.backend.name, "user-service");
    assert_eq!(users.backend.url, "http://localhost:8001");
    assert!(!users.require_auth);

    let profile = table.resolve("/api/profile").unwrap();
    assert_eq!(profile.backend.name, "user-service");
    assert!(profile.require_auth);

    assert_eq!(table.resolve("/api/products").unwrap().backend.name, "product-service");
    assert!(table.resolve("/api/orders/1/items").unwrap().require_auth);
}

#[test]
fn test_unknown_paths_do_not_resolve() {
    let table = table();

    assert!(table.resolve("/").is_none());
    assert!(table.resolve("/api").is_none());
    assert!(table.resolve("/api/usersettings").is_none());
    assert!(table.resolve("/other/api/users").is_none());
}

#[test]
fn test_resolution_is_repeatable() {
    let table = table();

    let first = table.resolve("/api/orders/9").unwrap().prefix.clone();
    for _ in 0..100 {
        let route = table.resolve("/api/orders/9").unwrap();
        assert_eq!(route.prefix, first);
        assert_eq!(route.backend.name, "order-service");
    }
    assert_eq!(table.routes().len(), 4);
}

#[test]
fn test_longer_prefix_wins_regardless_of_order() {
    let general = Arc::new(Backend::new("general", "http://localhost:9001").unwrap());
    let admin = Arc::new(Backend::new("admin", "http://localhost:9002").unwrap());
    let table = RouteTable::new(
        vec![
            Route {
                prefix: "/api".into(),
                backend: Arc::clone(&general),
                require_auth: false,
            },
            Route {
                prefix: "/api/admin".into(),
                backend: Arc::clone(&admin),
                require_auth: true,
            },
        ],
        vec![general, admin],
    );

    assert_eq!(table.resolve("/api/admin/users").unwrap().backend.name, "admin");
    assert_eq!(table.resolve("/api/other").unwrap().backend.name, "general");
}

#[test]
fn test_route_referring_to_unknown_service_is_rejected() {
    let mut config = Config::default();
    config.routes.push(RouteConfig {
        prefix: "/api/payments".into(),
        service: "payment-service".into(),
        require_auth: true,
    });

    assert!(RouteTable::from_config(&config).is_err());
}

#[test]
fn test_duplicate_prefix_is_rejected() {
    let mut config = Config::default();
    config.routes.push(RouteConfig {
        prefix: "/api/users".into(),
        service: "order-service".into(),
        require_auth: false,
    });

    assert!(RouteTable::from_config(&config).is_err());
}

#[test]
fn test_describe_reports_auth_flags() {
    let info = table().describe();

    assert!(info
        .iter()
        .any(|r| r.prefix == "/api/profile" && r.service == "user-service" && r.auth));
    assert!(info
        .iter()
        .any(|r| r.prefix == "/api/products" && r.service == "product-service" && !r.auth));
}

#[test]
fn test_dot_segments_are_detected() {
    assert!(has_dot_segments("/api/users/../profile"));
    assert!(has_dot_segments("/api/users/./42"));
    assert!(has_dot_segments("/api/users/%2e%2e/profile"));
    assert!(has_dot_segments("/api/users/.%2E"));
    assert!(has_dot_segments("/api/users/.."));

    assert!(!has_dot_segments("/api/users/42"));
    assert!(!has_dot_segments("/api/users/..hidden"));
    assert!(!has_dot_segments("/api/products/v1.2"));
}
