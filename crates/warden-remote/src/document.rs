//! Wire format of the per-device daily document

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use warden_api::{AppLimit, PolicySnapshot, UsageReport};
use warden_util::{parse_day_key, AppId, DeviceId};

use crate::{RemoteDocument, RemoteError, RemoteResult};

/// Collection holding the per-device daily documents
pub const USAGE_COLLECTION: &str = "usage";

/// Key of the document for `device` on local day `day` (`YYYY-MM-DD`)
pub fn document_key(device: &DeviceId, day: &str) -> String {
    format!("{}_{}", device.as_str(), day)
}

/// Day component of a document key, if it has one
pub fn day_from_key(key: &str) -> Option<&str> {
    key.rsplit_once('_')
        .map(|(_, day)| day)
        .filter(|day| parse_day_key(day).is_some())
}

/// The document as the parent's UI writes it.
///
/// Minute fields are numbers; older clients wrote fractional minutes, which
/// are truncated to whole minutes on parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageDocument {
    pub blocked_apps: Vec<String>,
    pub app_usages: Vec<AppUsageEntry>,
    pub total_usage_time: f64,
    pub total_time_limit: f64,
    /// Written by the parent's UI. Older clients wrote epoch numbers, so the
    /// raw value is kept and only an RFC 3339 string is honoured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Value>,
}

impl UsageDocument {
    /// The writer's own timestamp, if it is a valid RFC 3339 string
    pub fn writer_time(&self) -> Option<DateTime<Local>> {
        let raw = self.updated_at.as_ref()?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Local))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppUsageEntry {
    pub package_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    pub time_limit: f64,
    pub usage_time: f64,
}

fn minutes(key: &str, field: &str, value: f64) -> RemoteResult<u32> {
    if !value.is_finite() || value < 0.0 {
        return Err(RemoteError::invalid(
            key,
            format!("{field} must be a non-negative number, got {value}"),
        ));
    }
    // `as` saturates at u32::MAX
    Ok(value.trunc() as u32)
}

/// Validate a remote document into a policy snapshot
pub fn parse_policy(doc: &RemoteDocument) -> RemoteResult<PolicySnapshot> {
    let key = doc.key.as_str();
    let wire: UsageDocument = serde_json::from_value(doc.body.clone())
        .map_err(|e| RemoteError::invalid(key, e.to_string()))?;

    // `updatedAt` wins over the store's own timestamp when it is readable
    let source_time = match wire.writer_time() {
        Some(written) => written,
        None => {
            if let Some(raw) = &wire.updated_at {
                debug!(key, updated_at = %raw, "Unreadable updatedAt; using store time");
            }
            doc.update_time
        }
    };

    let mut blocked_apps = HashSet::new();
    for name in &wire.blocked_apps {
        let app_id = AppId::new(name);
        if app_id.is_empty() {
            return Err(RemoteError::invalid(key, "blockedApps contains an empty entry"));
        }
        blocked_apps.insert(app_id);
    }

    let mut app_limits = HashMap::new();
    for (index, entry) in wire.app_usages.iter().enumerate() {
        let app_id = AppId::new(&entry.package_name);
        if app_id.is_empty() {
            return Err(RemoteError::invalid(
                key,
                format!("appUsages[{index}] has an empty packageName"),
            ));
        }
        let limit = AppLimit::new(
            minutes(key, "timeLimit", entry.time_limit)?,
            minutes(key, "usageTime", entry.usage_time)?,
        );
        if app_limits.insert(app_id.clone(), limit).is_some() {
            return Err(RemoteError::invalid(
                key,
                format!("appUsages lists {app_id} more than once"),
            ));
        }
    }

    Ok(PolicySnapshot {
        blocked_apps,
        app_limits,
        total_limit_minutes: minutes(key, "totalTimeLimit", wire.total_time_limit)?,
        total_used_minutes: minutes(key, "totalUsageTime", wire.total_usage_time)?,
        source_time: Some(source_time),
        day: day_from_key(key).map(str::to_string),
    })
}

/// Merge a usage report into a document body in place.
///
/// Existing `appUsages` entries get their `usageTime` replaced and keep every
/// other field; apps not yet listed are appended. `totalUsageTime` is set.
/// Nothing else in the document is touched.
pub fn merge_usage_into(key: &str, body: &mut Value, report: &UsageReport) -> RemoteResult<()> {
    if body.is_null() {
        *body = Value::Object(Map::new());
    }
    let doc = body
        .as_object_mut()
        .ok_or_else(|| RemoteError::invalid(key, "document is not an object"))?;

    let usages = doc
        .entry("appUsages")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| RemoteError::invalid(key, "appUsages is not an array"))?;

    for app in &report.apps {
        let existing = usages.iter_mut().find(|entry| {
            entry
                .get("packageName")
                .and_then(Value::as_str)
                .is_some_and(|name| AppId::new(name) == app.app_id)
        });

        match existing.and_then(Value::as_object_mut) {
            Some(entry) => {
                entry.insert("usageTime".into(), json!(app.minutes));
            }
            None => usages.push(json!({
                "packageName": app.app_id.as_str(),
                "appName": app.app_id.as_str(),
                "timeLimit": 0,
                "usageTime": app.minutes,
            })),
        }
    }

    doc.insert("totalUsageTime".into(), json!(report.total_minutes));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_api::AppUsageMinutes;

    fn doc(key: &str, body: Value) -> RemoteDocument {
        RemoteDocument {
            key: key.into(),
            update_time: warden_util::now(),
            body,
        }
    }

    #[test]
    fn test_document_key() {
        let key = document_key(&DeviceId::new("kid-tablet"), "2024-03-01");
        assert_eq!(key, "kid-tablet_2024-03-01");
        assert_eq!(day_from_key(&key), Some("2024-03-01"));
        assert_eq!(day_from_key("kid-tablet"), None);
        assert_eq!(day_from_key("kid_tablet"), None);
    }

    #[test]
    fn test_parse_full_document() {
        let d = doc(
            "dev_2024-03-01",
            json!({
                "blockedApps": ["com.Game.X ", "com.video.y"],
                "appUsages": [
                    {"packageName": "com.chat.z", "appName": "Chat", "timeLimit": 30, "usageTime": 31}
                ],
                "totalUsageTime": 100,
                "totalTimeLimit": 120,
                "someUiField": true
            }),
        );

        let snapshot = parse_policy(&d).unwrap();
        assert!(snapshot.is_blocked(&AppId::new("com.game.x")));
        assert!(snapshot.is_blocked(&AppId::new("com.video.y")));
        assert_eq!(
            snapshot.limit_for(&AppId::new("com.chat.z")),
            Some(&AppLimit::new(30, 31))
        );
        assert_eq!(snapshot.total_limit_minutes, 120);
        assert_eq!(snapshot.total_used_minutes, 100);
        assert_eq!(snapshot.source_time, Some(d.update_time));
        assert_eq!(snapshot.day.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn test_parse_empty_document() {
        let snapshot = parse_policy(&doc("dev_2024-03-01", json!({}))).unwrap();
        assert!(snapshot.blocked_apps.is_empty());
        assert!(snapshot.app_limits.is_empty());
        assert_eq!(snapshot.total_limit_minutes, 0);
    }

    #[test]
    fn test_fractional_minutes_truncate() {
        let d = doc(
            "dev_2024-03-01",
            json!({"appUsages": [{"packageName": "a", "timeLimit": 10, "usageTime": 10.9}]}),
        );
        let snapshot = parse_policy(&d).unwrap();
        assert_eq!(snapshot.limit_for(&AppId::new("a")).unwrap().used_minutes, 10);
    }

    #[test]
    fn test_rejects_negative_minutes() {
        let d = doc("dev_2024-03-01", json!({"totalTimeLimit": -5}));
        assert!(matches!(parse_policy(&d), Err(RemoteError::Invalid { .. })));

        let d = doc(
            "dev_2024-03-01",
            json!({"appUsages": [{"packageName": "a", "timeLimit": 10, "usageTime": -1}]}),
        );
        assert!(matches!(parse_policy(&d), Err(RemoteError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_empty_and_duplicate_packages() {
        let d = doc(
            "dev_2024-03-01",
            json!({"appUsages": [{"packageName": "  ", "timeLimit": 10}]}),
        );
        assert!(matches!(parse_policy(&d), Err(RemoteError::Invalid { .. })));

        let d = doc(
            "dev_2024-03-01",
            json!({"appUsages": [
                {"packageName": "com.a", "timeLimit": 10},
                {"packageName": "COM.A", "timeLimit": 20}
            ]}),
        );
        assert!(matches!(parse_policy(&d), Err(RemoteError::Invalid { .. })));

        let d = doc("dev_2024-03-01", json!({"blockedApps": [""]}));
        assert!(matches!(parse_policy(&d), Err(RemoteError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_wrong_types() {
        let d = doc("dev_2024-03-01", json!({"blockedApps": "com.a"}));
        assert!(matches!(parse_policy(&d), Err(RemoteError::Invalid { .. })));
    }

    #[test]
    fn test_updated_at_sets_source_time() {
        let d = doc(
            "dev_2024-03-01",
            json!({"blockedApps": ["com.game.x"], "updatedAt": "2024-03-01T09:30:00+00:00"}),
        );
        let snapshot = parse_policy(&d).unwrap();
        let expected = DateTime::parse_from_rfc3339("2024-03-01T09:30:00+00:00")
            .unwrap()
            .with_timezone(&Local);
        assert_eq!(snapshot.source_time, Some(expected));
    }

    #[test]
    fn test_unreadable_updated_at_falls_back_to_store_time() {
        for updated_at in [json!(1717000000), json!("yesterday"), json!(null)] {
            let d = doc(
                "dev_2024-03-01",
                json!({"blockedApps": ["com.game.x"], "updatedAt": updated_at}),
            );
            let snapshot = parse_policy(&d).unwrap();
            assert!(snapshot.is_blocked(&AppId::new("com.game.x")));
            assert_eq!(snapshot.source_time, Some(d.update_time));
        }
    }

    #[test]
    fn test_merge_preserves_ui_fields() {
        let mut body = json!({
            "blockedApps": ["com.video.y"],
            "appUsages": [
                {"packageName": "com.game.x", "appName": "Game", "timeLimit": 30, "usageTime": 5}
            ],
            "totalTimeLimit": 120,
            "totalUsageTime": 5
        });
        let report = UsageReport {
            day: "2024-03-01".into(),
            apps: vec![
                AppUsageMinutes { app_id: AppId::new("com.game.x"), minutes: 12 },
                AppUsageMinutes { app_id: AppId::new("com.chat.z"), minutes: 3 },
            ],
            total_minutes: 15,
        };

        merge_usage_into("dev_2024-03-01", &mut body, &report).unwrap();

        assert_eq!(body["blockedApps"], json!(["com.video.y"]));
        assert_eq!(body["totalTimeLimit"], json!(120));
        assert_eq!(body["totalUsageTime"], json!(15));

        let usages = body["appUsages"].as_array().unwrap();
        assert_eq!(usages.len(), 2);
        assert_eq!(usages[0]["appName"], json!("Game"));
        assert_eq!(usages[0]["timeLimit"], json!(30));
        assert_eq!(usages[0]["usageTime"], json!(12));
        assert_eq!(usages[1]["packageName"], json!("com.chat.z"));
        assert_eq!(usages[1]["timeLimit"], json!(0));
        assert_eq!(usages[1]["usageTime"], json!(3));
    }

    #[test]
    fn test_merge_into_missing_document() {
        let mut body = Value::Null;
        let report = UsageReport {
            day: "2024-03-01".into(),
            apps: vec![AppUsageMinutes { app_id: AppId::new("com.a"), minutes: 1 }],
            total_minutes: 1,
        };
        merge_usage_into("k", &mut body, &report).unwrap();
        assert_eq!(body["totalUsageTime"], json!(1));
        assert_eq!(body["appUsages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_merge_rejects_non_object() {
        let mut body = json!([1, 2]);
        let report = UsageReport::default();
        assert!(merge_usage_into("k", &mut body, &report).is_err());
    }
}
