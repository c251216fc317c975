//! Semantic validation for configuration values.

use regex::Regex;

use crate::config::model::{AppConfig, DeliveryConfig, GlobalConfig};

use super::{ValidationIssue, ValidationResult};

/// Placeholders understood by artifact name templates.
const TEMPLATE_PLACEHOLDERS: &[&str] = &["{label}", "{profile}", "{name}", "{ext}"];

/// Validates semantic correctness of configuration values.
pub fn validate(config: &AppConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_global(&config.global, &mut result);
    validate_delivery(&config.delivery, &mut result);

    match url::Url::parse(&config.remote.api_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            if url.host_str().is_none() {
                result.add(ValidationIssue::error("remote.api_url", "API URL has no host"));
            }
        }
        Ok(url) => result.add(ValidationIssue::error(
            "remote.api_url",
            format!("Unsupported URL scheme: '{}'", url.scheme()),
        )),
        Err(e) => result.add(
            ValidationIssue::error("remote.api_url", format!("Invalid URL: {}", e))
                .with_suggestion("For example: https://api.pandastream.com/v2"),
        ),
    }

    if config.remote.timeout_seconds == 0 {
        result.add(ValidationIssue::error(
            "remote.timeout_seconds",
            "Request timeout must be at least 1 second",
        ));
    }

    if config.remote.get_retries > 5 {
        result.add(
            ValidationIssue::warning(
                "remote.get_retries",
                format!("{} GET retries may hammer a struggling service", config.remote.get_retries),
            )
            .with_suggestion("One retry covers transient network blips"),
        );
    }

    if config.transcoding.poll_interval_seconds == 0 {
        result.add(ValidationIssue::error(
            "transcoding.poll_interval_seconds",
            "Poll interval must be at least 1 second",
        ));
    }

    if config.webhook.enabled {
        if config.webhook.port == 0 {
            result.add(ValidationIssue::error("webhook.port", "Webhook port cannot be 0 when enabled"));
        }
        if let Some(public_url) = config.webhook.public_url.as_deref().filter(|u| !u.trim().is_empty()) {
            if url::Url::parse(public_url).is_err() {
                result.add(ValidationIssue::error(
                    "webhook.public_url",
                    format!("Invalid URL: '{}'", public_url),
                ));
            }
        }
    }

    if config.storage.local_base_url.trim().is_empty() {
        result.add(ValidationIssue::warning(
            "storage.local_base_url",
            "Local files will have no downloadable URL",
        ));
    }

    result
}

fn validate_global(global: &GlobalConfig, result: &mut ValidationResult) {
    // Validate log level
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&global.log_level.as_str()) {
        result.add(
            ValidationIssue::error("global.log_level", format!("Invalid log level: '{}'", global.log_level))
                .with_suggestion(format!("Valid levels: {}", valid_levels.join(", "))),
        );
    }

    // Validate Redis port
    if global.redis.port == 0 {
        result.add(ValidationIssue::error(
            "global.redis.port",
            "Redis port cannot be 0",
        ));
    }

    if global.retry.max_attempts == 0 {
        result.add(ValidationIssue::error(
            "global.retry.max_attempts",
            "At least one attempt is required",
        ));
    }

    if global.lock.ttl_seconds == 0 {
        result.add(ValidationIssue::error(
            "global.lock.ttl_seconds",
            "Lock TTL must be at least 1 second",
        ));
    } else if global.lock.ttl_seconds < global.lock.wait_seconds {
        result.add(
            ValidationIssue::warning(
                "global.lock.ttl_seconds",
                "Lock TTL is shorter than the lock wait; a slow holder may lose its lock",
            )
            .with_suggestion("Keep ttl_seconds at or above wait_seconds"),
        );
    }

    if global.lock.poll_interval_ms == 0 {
        result.add(ValidationIssue::error(
            "global.lock.poll_interval_ms",
            "Lock poll interval must be at least 1ms",
        ));
    }

    // Validate Prometheus port
    if global.prometheus.enabled && global.prometheus.port == 0 {
        result.add(ValidationIssue::error(
            "global.prometheus.port",
            "Prometheus port cannot be 0 when enabled",
        ));
    }
}

fn validate_delivery(delivery: &DeliveryConfig, result: &mut ValidationResult) {
    let domains = [
        ("delivery.cloudfront_download_domain", &delivery.cloudfront_download_domain),
        ("delivery.cloudfront_streaming_domain", &delivery.cloudfront_streaming_domain),
    ];
    for (path, domain) in domains {
        let domain = domain.trim_matches(|c| c == ' ' || c == '/');
        if domain.is_empty() {
            continue;
        }
        if !is_valid_domain(domain) {
            let mut issue = ValidationIssue::error(path, format!("Invalid domain: '{}'", domain));
            if domain.contains("://") {
                issue = issue.with_suggestion("Give the bare domain without a scheme, e.g. d111.cloudfront.net");
            }
            result.add(issue);
        }
    }

    let templates = [
        ("delivery.video_name_template", &delivery.video_name_template),
        ("delivery.encoding_name_template", &delivery.encoding_name_template),
    ];
    for (path, template) in templates {
        if !template.contains("{name}") {
            result.add(
                ValidationIssue::warning(path, "Template does not include the source name")
                    .with_suggestion(format!("Available placeholders: {}", TEMPLATE_PLACEHOLDERS.join(", "))),
            );
        }
    }
}

/// Checks a host name, allowing an optional port.
fn is_valid_domain(domain: &str) -> bool {
    let pattern = Regex::new(
        r"^([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}(:[0-9]{1,5})?$",
    );
    match pattern {
        Ok(re) => re.is_match(domain),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra: &str) -> AppConfig {
        let yaml = format!(
            "global: {{redis: {{}}}}\nremote: {{cloud_id: c, access_key: a, secret_key: s}}\n{}",
            extra
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let result = validate(&config(""));
        assert!(result.is_valid(), "{:?}", result.errors().collect::<Vec<_>>());
    }

    #[test]
    fn domains_must_be_bare_host_names() {
        assert!(is_valid_domain("d111.cloudfront.net"));
        assert!(is_valid_domain("cdn.example.com:8080"));
        assert!(!is_valid_domain("http://d111.cloudfront.net"));
        assert!(!is_valid_domain("no_underscores.example.com"));

        let result = validate(&config(
            "delivery: {cloudfront_download_domain: 'http://d111.cloudfront.net'}\n",
        ));
        assert!(result.has_issue_at("delivery.cloudfront_download_domain"));
    }

    #[test]
    fn api_url_must_be_http() {
        let mut c = config("");
        c.remote.api_url = "ftp://x".to_string();
        assert!(validate(&c).has_issue_at("remote.api_url"));

        c.remote.api_url = "not a url".to_string();
        assert!(!validate(&c).is_valid());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let result = validate(&config("transcoding: {poll_interval_seconds: 0}\n"));
        assert!(result.has_issue_at("transcoding.poll_interval_seconds"));
    }
}
