use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// Service configuration, read from `~/.contactlink/config.json` when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Defaults to `~/.contactlink/contactlink.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port: default_port(),
            db_path: None,
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Body of `POST /identify`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    /// Clients send phone numbers both as strings and as bare JSON numbers.
    #[serde(default, deserialize_with = "string_or_number")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    /// Email with blank values treated as absent.
    pub fn email(&self) -> Option<&str> {
        non_blank(self.email.as_deref())
    }

    /// Phone number with blank values treated as absent.
    pub fn phone_number(&self) -> Option<&str> {
        non_blank(self.phone_number.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PhoneVisitor;

    impl<'de> Visitor<'de> for PhoneVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a phone number as a string or an integer")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(self)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_option(PhoneVisitor)
}

/// Consolidated view of one identity cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub primary_contact_id: i64,
    /// Primary's email first, then secondaries' in store order, deduplicated.
    pub emails: Vec<String>,
    /// Primary's phone first, then secondaries' in store order, deduplicated.
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<i64>,
}

/// Body of a successful `POST /identify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ClusterView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_numeric_phone() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": "a@x.com", "phoneNumber": 123456}"#).unwrap();
        assert_eq!(req.email(), Some("a@x.com"));
        assert_eq!(req.phone_number(), Some("123456"));
    }

    #[test]
    fn test_request_null_and_missing_fields() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": null, "phoneNumber": null}"#).unwrap();
        assert_eq!(req.email(), None);
        assert_eq!(req.phone_number(), None);

        let req: IdentifyRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.email(), None);
        assert_eq!(req.phone_number(), None);
    }

    #[test]
    fn test_blank_values_count_as_absent() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": "  ", "phoneNumber": ""}"#).unwrap();
        assert_eq!(req.email(), None);
        assert_eq!(req.phone_number(), None);
    }

    #[test]
    fn test_request_values_are_not_trimmed() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": " a@x.com "}"#).unwrap();
        assert_eq!(req.email(), Some(" a@x.com "));
    }

    #[test]
    fn test_request_rejects_fractional_phone() {
        let result: Result<IdentifyRequest, _> =
            serde_json::from_str(r#"{"phoneNumber": 12.5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_cluster_view_wire_shape() {
        let view = ClusterView {
            primary_contact_id: 1,
            emails: vec!["a@x.com".into()],
            phone_numbers: vec!["111".into()],
            secondary_contact_ids: vec![2],
        };
        let json = serde_json::to_value(IdentifyResponse { contact: view }).unwrap();
        assert_eq!(json["contact"]["primaryContactId"], 1);
        assert_eq!(json["contact"]["phoneNumbers"][0], "111");
        assert_eq!(json["contact"]["secondaryContactIds"][0], 2);
    }

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert!(config.db_path.is_none());
        assert_eq!(config.log_filter, "info");
    }
}
