use std::collections::HashMap;
use std::time::Duration;

use api_gateway::config::Config;

fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
    let env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn test_config_defaults() {
    let cfg = load(&[]).unwrap();

    assert_eq!(cfg.server.listen_addr, "0.0.0.0:8000");
    assert_eq!(cfg.services.user, "http://localhost:8001");
    assert_eq!(cfg.services.product, "http://localhost:8002");
    assert_eq!(cfg.services.order, "http://localhost:8003");
    assert_eq!(cfg.rate_limit.limit, 100);
    assert_eq!(cfg.rate_limit.window(), Duration::from_secs(60));
    assert_eq!(cfg.proxy.request_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.health.timeout(), Duration::from_secs(5));
    assert_eq!(cfg.routes.len(), 4);
}

#[test]
fn test_config_env_overrides() {
    let cfg = load(&[
        ("USER_SERVICE_URL", "http://users.internal:9000"),
        ("JWT_SECRET", "s3cret"),
        ("GATEWAY_PORT", "9090"),
        ("RATE_LIMIT_REQUESTS", "5"),
        ("RATE_LIMIT_WINDOW_SECS", "10"),
    ])
    .unwrap();

    assert_eq!(cfg.services.user, "http://users.internal:9000");
    assert_eq!(cfg.services.product, "http://localhost:8002");
    assert_eq!(cfg.auth.jwt_secret, "s3cret");
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:9090");
    assert_eq!(cfg.rate_limit.limit, 5);
    assert_eq!(cfg.rate_limit.window_secs, 10);
}

#[test]
fn test_config_listen_wins_over_port() {
    let cfg = load(&[("GATEWAY_PORT", "9090"), ("LISTEN", "127.0.0.1:3000")]).unwrap();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:3000");
}

#[test]
fn test_config_empty_values_are_ignored() {
    let cfg = load(&[("JWT_SECRET", ""), ("ORDER_SERVICE_URL", "")]).unwrap();

    assert_eq!(cfg.services.order, "http://localhost:8003");
    assert!(!cfg.auth.jwt_secret.is_empty());
}

#[test]
fn test_config_rejects_bad_values() {
    assert!(load(&[("GATEWAY_PORT", "eighty")]).is_err());
    assert!(load(&[("RATE_LIMIT_REQUESTS", "0")]).is_err());
    assert!(load(&[("RATE_LIMIT_WINDOW_SECS", "-1")]).is_err());
    assert!(load(&[("PRODUCT_SERVICE_URL", "not a url")]).is_err());
    assert!(load(&[("PRODUCT_SERVICE_URL", "https://products:8443")]).is_err());
}

#[test]
fn test_config_from_yaml() {
    let cfg = Config::from_yaml_str(
        r#"
server:
  listen_addr: "127.0.0.1:8100"
rate_limit:
  limit: 20
routes:
  - prefix: /api/catalog
    service: product-service
  - prefix: /api/checkout
    service: order-service
    require_auth: true
"#,
    )
    .unwrap();
    cfg.validate().unwrap();

    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8100");
    assert_eq!(cfg.rate_limit.limit, 20);
    assert_eq!(cfg.rate_limit.window_secs, 60);
    assert_eq!(cfg.routes.len(), 2);
    assert!(!cfg.routes[0].require_auth);
    assert!(cfg.routes[1].require_auth);
}

#[test]
fn test_config_yaml_route_validation() {
    let unknown = Config::from_yaml_str(
        "routes:\n  - prefix: /api/pay\n    service: payment-service\n",
    )
    .unwrap();
    assert!(unknown.validate().is_err());

    let trailing = Config::from_yaml_str(
        "routes:\n  - prefix: /api/users/\n    service: user-service\n",
    )
    .unwrap();
    assert!(trailing.validate().is_err());
}

#[test]
fn test_config_file_from_env_path() {
    let path = std::env::temp_dir().join(format!("gateway-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "auth:\n  jwt_secret: from-file\nhealth:\n  timeout_secs: 2\n").unwrap();

    let cfg = load(&[("GATEWAY_CONFIG", path.to_str().unwrap())]).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(cfg.auth.jwt_secret, "from-file");
    assert_eq!(cfg.health.timeout_secs, 2);
    assert_eq!(cfg.proxy.connect_timeout_secs, 5);
}

#[test]
fn test_config_debug_hides_secret() {
    let cfg = load(&[("JWT_SECRET", "very-secret-value")]).unwrap();

    assert!(!format!("{cfg:?}").contains("very-secret-value"));
}

#[test]
fn test_config_load_reads_process_env() {
    unsafe {
        std::env::set_var("RATE_LIMIT_REQUESTS", "7");
    }
    let cfg = Config::load().unwrap();
    unsafe {
        std::env::remove_var("RATE_LIMIT_REQUESTS");
    }

    assert_eq!(cfg.rate_limit.limit, 7);
}
