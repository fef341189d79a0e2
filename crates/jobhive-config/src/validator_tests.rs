use super::*;

fn valid_config() -> Config {
    let mut config = Config::default();
    config.storage.daily_stats_ttl_secs = 8 * 86_400;
    config
}

#[test]
fn test_validate_default_config() {
    let result = ConfigValidator::validate(&Config::default());
    assert!(result.is_valid());
}

#[test]
fn test_default_daily_ttl_warns_about_timeline() {
    let result = ConfigValidator::validate(&Config::default());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.path == "storage.daily_stats_ttl_secs"));

    let result = ConfigValidator::validate(&valid_config());
    assert!(result.warnings.is_empty());
}

#[test]
fn test_empty_namespace() {
    let mut config = valid_config();
    config.storage.namespace = String::new();

    let result = ConfigValidator::validate(&config);
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "storage.namespace"));
}

#[test]
fn test_invalid_redis_url() {
    let mut config = valid_config();
    config.storage.redis_url = "http://localhost:6379".to_string();

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "storage.redis_url"));
}

#[test]
fn test_tls_redis_url_accepted() {
    let mut config = valid_config();
    config.storage.redis_url = "rediss://cache.internal:6380/0".to_string();

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
}

#[test]
fn test_backoff_bounds() {
    let mut config = valid_config();
    config.retry.initial_backoff_ms = 500;
    config.retry.max_backoff_ms = 100;
    config.retry.multiplier = 0.5;

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "retry.max_backoff_ms"));
    assert!(result.errors.iter().any(|e| e.path == "retry.multiplier"));
}

#[test]
fn test_non_finite_multiplier_rejected() {
    for multiplier in [f64::INFINITY, f64::NAN] {
        let mut config = valid_config();
        config.retry.multiplier = multiplier;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "retry.multiplier"
            && e.message.contains("finite")));
    }
}

#[test]
fn test_multiplier_inf_from_toml_rejected() {
    let config: Config = toml::from_str("[retry]\nmultiplier = inf\n").unwrap();
    assert!(config.retry.multiplier.is_infinite());
    assert!(!ConfigValidator::validate(&config).is_valid());
}

#[test]
fn test_zero_backoff_warns() {
    let mut config = valid_config();
    config.retry.initial_backoff_ms = 0;

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.path == "retry.initial_backoff_ms"));
}

#[test]
fn test_zero_max_attempts() {
    let mut config = valid_config();
    config.retry.max_attempts = Some(0);

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "retry.max_attempts"));
}

#[test]
fn test_zero_concurrency() {
    let mut config = valid_config();
    config.server.concurrency = 0;

    let result = ConfigValidator::validate(&config);
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "server.concurrency"));
}

#[test]
fn test_high_concurrency_warns() {
    let mut config = valid_config();
    config.server.concurrency = 1000;

    let result = ConfigValidator::validate(&config);
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "server.concurrency"));
}

#[test]
fn test_empty_queue_and_name() {
    let mut config = valid_config();
    config.server.queue = String::new();
    config.server.name = Some(String::new());

    let result = ConfigValidator::validate(&config);
    assert!(result.errors.iter().any(|e| e.path == "server.queue"));
    assert!(result.errors.iter().any(|e| e.path == "server.name"));
}
