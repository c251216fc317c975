//! Schema validation for configuration structure.

use crate::config::model::AppConfig;
use crate::profiles::parse_profile_names;
use super::{ValidationIssue, ValidationResult};

/// Validates the configuration schema (required fields, structure).
pub fn validate(config: &AppConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    // Credentials are only required once submissions are allowed.
    let credentials = [
        ("remote.cloud_id", &config.remote.cloud_id),
        ("remote.access_key", &config.remote.access_key),
        ("remote.secret_key", &config.remote.secret_key),
    ];
    for (path, value) in credentials {
        if value.trim().is_empty() {
            let issue = if config.transcoding.enabled {
                ValidationIssue::error(path, "Credential is required when transcoding is enabled")
            } else {
                ValidationIssue::warning(path, "Credential is empty; remote calls will fail")
            };
            result.add(issue.with_suggestion("Copy it from the transcoding service's account page"));
        }
    }

    if config.remote.api_url.trim().is_empty() {
        result.add(ValidationIssue::error("remote.api_url", "API URL is required"));
    }

    if config.transcoding.enabled && parse_profile_names(&config.transcoding.encoding_profiles).is_empty() {
        result.add(
            ValidationIssue::error(
                "transcoding.encoding_profiles",
                "At least one default profile name is required when transcoding is enabled",
            )
            .with_suggestion("For example: encoding_profiles: \"h264, webm\""),
        );
    }

    if config.global.redis.host.trim().is_empty() {
        result.add(ValidationIssue::error("global.redis.host", "Redis host is required"));
    }

    if let Some(discord) = &config.global.notifications.discord {
        if discord.webhook_url.trim().is_empty() {
            result.add(ValidationIssue::error(
                "global.notifications.discord.webhook_url",
                "Webhook URL is required when Discord notifications are configured",
            ));
        }
    }

    if config.webhook.enabled && config.webhook.public_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
        result.add(
            ValidationIssue::warning(
                "webhook.public_url",
                "No public URL set; submissions will not register a callback",
            )
            .with_suggestion("Set it to the externally reachable address of this server"),
        );
    }

    result
}
