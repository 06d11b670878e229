//! Lazy validation of per-service config blocks.
//!
//! Service config is an arbitrary key/value map at parse time. Only when a
//! service is about to be launched is the map checked, and only against the
//! key set of its template when that template is one we recognize. Unknown
//! templates pass through untouched.

use crate::error::{BenchError, Result};
use crate::manifest::ServiceSpec;

/// What we know about a template's config surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateSchema {
    /// Template with a known key set; unrecognized keys are rejected.
    Recognized(&'static [&'static str]),
    /// Anything else: the config map is passed through as-is.
    Opaque,
}

const POSTGRES_KEYS: &[&str] = &[
    "port",
    "database",
    "user",
    "password",
    "max_connections",
    "shared_buffers",
];
const REDIS_KEYS: &[&str] = &["port", "password", "maxmemory", "appendonly"];
const NGINX_KEYS: &[&str] = &["port", "upstreams", "config_file"];
const KAFKA_KEYS: &[&str] = &["port", "partitions", "replication_factor", "retention_hours"];

pub fn schema_for(template_name: &str) -> TemplateSchema {
    match template_name {
        "postgres" => TemplateSchema::Recognized(POSTGRES_KEYS),
        "redis" => TemplateSchema::Recognized(REDIS_KEYS),
        "nginx" => TemplateSchema::Recognized(NGINX_KEYS),
        "kafka" => TemplateSchema::Recognized(KAFKA_KEYS),
        _ => TemplateSchema::Opaque,
    }
}

/// Validate a service's config block against its template schema.
/// Called by the launcher right before the service is started.
pub fn validate_service_config(name: &str, spec: &ServiceSpec) -> Result<()> {
    let TemplateSchema::Recognized(known) = schema_for(spec.template_name()) else {
        return Ok(());
    };

    let issues: Vec<String> = spec
        .config
        .keys()
        .filter(|key| !known.contains(&key.as_str()))
        .map(|key| {
            format!(
                "service '{}': unknown config key '{}' for template '{}'",
                name,
                key,
                spec.template_name()
            )
        })
        .collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(BenchError::Validation { issues })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn spec(template: &str, keys: &[&str]) -> ServiceSpec {
        let mut config = IndexMap::new();
        for key in keys {
            config.insert(
                key.to_string(),
                serde_yaml_bw::Value::from("x".to_string()),
            );
        }
        ServiceSpec {
            template: template.to_string(),
            config,
            depends_on: Vec::new(),
            healthcheck: None,
            resources: None,
        }
    }

    #[test]
    fn recognized_template_rejects_unknown_keys() {
        let bad = spec("postgres@15", &["port", "flavor"]);
        let err = validate_service_config("db", &bad).unwrap_err();
        assert!(err.to_string().contains("flavor"));
    }

    #[test]
    fn recognized_template_accepts_known_keys() {
        let good = spec("redis@7", &["port", "maxmemory"]);
        assert!(validate_service_config("cache", &good).is_ok());
    }

    #[test]
    fn unknown_template_is_opaque_passthrough() {
        let custom = spec("my-custom-api@2.1", &["whatever", "goes"]);
        assert_eq!(schema_for("my-custom-api"), TemplateSchema::Opaque);
        assert!(validate_service_config("api", &custom).is_ok());
    }
}
