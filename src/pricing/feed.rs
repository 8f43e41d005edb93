use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Public AWS on-demand pricing feeds, oldest first so that newer feeds
/// override on key collisions.
pub const DEFAULT_FEED_URLS: &[&str] = &[
    "http://aws.amazon.com/ec2/pricing/pricing-on-demand-instances.json",
    "http://a0.awsstatic.com/pricing/1/ec2/mswin-od.min.js",
    "http://a0.awsstatic.com/pricing/1/ec2/linux-od.min.js",
];

/// The feed's region identifiers differ from the canonical AWS region ids
/// used everywhere else; this table maps them over.
const FEED_REGION_MAP: &[(&str, &str)] = &[
    ("us-east", "us-east-1"),
    ("us-west-2", "us-west-2"),
    ("us-west", "us-west-1"),
    ("eu-ireland", "eu-west-1"),
    ("apac-sin", "ap-southeast-1"),
    ("apac-tokyo", "ap-northeast-1"),
    ("apac-syd", "ap-southeast-2"),
    ("sa-east-1", "sa-east-1"),
];

/// Fetches the remote pricing feeds and flattens them into price-table
/// entries.
///
/// The feeds are a best-effort enrichment of the operator-supplied
/// baseline, never a hard dependency: every failure degrades to whatever
/// was gathered so far.
pub struct FeedClient {
    http: reqwest::Client,
}

impl FeedClient {
    /// Creates a feed client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client for pricing feed")?;

        Ok(Self { http })
    }

    /// Fetches and flattens all configured feed URLs.
    ///
    /// Each URL degrades independently: a failure is logged and its entries
    /// are skipped, entries from other URLs are kept.
    pub async fn fetch_overlay(&self, urls: &[String]) -> Vec<(String, f64)> {
        let mut overlay = Vec::new();

        for url in urls {
            match self.fetch_url(url).await {
                Ok(mut entries) => {
                    info!(url = %url, entries = entries.len(), "fetched pricing feed");
                    overlay.append(&mut entries);
                }
                Err(e) => {
                    warn!(
                        url = %url,
                        error = %format!("{e:#}"),
                        "could not read pricing feed, continuing with baseline prices",
                    );
                }
            }
        }

        overlay
    }

    async fn fetch_url(&self, url: &str) -> Result<Vec<(String, f64)>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status {status} from {url}");
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("reading response from {url}"))?;

        let json = strip_jsonp(&body);
        let doc: Value = serde_json::from_str(json)
            .with_context(|| format!("parsing pricing feed from {url}"))?;

        // The generic "os" platform marker means Windows only in the
        // Windows-specific feed.
        flatten_feed(&doc, url.contains("mswin-"))
    }
}

/// Strips the JSONP envelope some feeds are wrapped in: a leading comment
/// block, a `callback(` call wrapper and the trailing `);`.
fn strip_jsonp(body: &str) -> &str {
    let mut text = body.trim();

    if let Some(rest) = text.strip_prefix("/*") {
        if let Some(end) = rest.find("*/") {
            text = rest[end + 2..].trim_start();
        }
    }

    if let Some(rest) = text.strip_prefix("callback(") {
        text = rest.trim_end();
        if let Some(inner) = text.strip_suffix(");") {
            text = inner;
        }
    }

    text
}

/// Flattens the feed's region → instance family → size → priced variant
/// nesting into flat `cost.{region}.{size}.{platform}` entries.
fn flatten_feed(doc: &Value, windows_feed: bool) -> Result<Vec<(String, f64)>> {
    let regions = doc
        .pointer("/config/regions")
        .and_then(Value::as_array)
        .context("pricing feed has no config.regions array")?;

    let mut entries = Vec::new();

    for region_entry in regions {
        let feed_region = region_entry
            .get("region")
            .and_then(Value::as_str)
            .context("pricing feed region entry has no region name")?;

        let region = map_feed_region(feed_region)
            .with_context(|| format!("no mapping for pricing feed region {feed_region:?}"))?;

        let instance_types = region_entry
            .get("instanceTypes")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for instance_type in instance_types {
            let sizes = instance_type
                .get("sizes")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for size_entry in sizes {
                let Some(size) = size_entry.get("size").and_then(Value::as_str) else {
                    continue;
                };

                let columns = size_entry
                    .get("valueColumns")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                for column in columns {
                    let Some(name) = column.get("name").and_then(Value::as_str) else {
                        continue;
                    };
                    let Some(price) = column.pointer("/prices/USD").and_then(Value::as_str) else {
                        continue;
                    };

                    let platform = normalize_platform(name, windows_feed);

                    // Variants without on-demand pricing carry "N/A".
                    let Ok(cost) = price.parse::<f64>() else {
                        debug!(region, size, platform, price, "skipping unpriced feed variant");
                        continue;
                    };

                    entries.push((format!("cost.{region}.{size}.{platform}"), cost));
                }
            }
        }
    }

    Ok(entries)
}

fn map_feed_region(feed_region: &str) -> Option<&'static str> {
    FEED_REGION_MAP
        .iter()
        .find(|(feed, _)| *feed == feed_region)
        .map(|(_, canonical)| *canonical)
}

/// Normalizes the feed's platform markers to the canonical price-key
/// tokens.
fn normalize_platform(name: &str, windows_feed: bool) -> &'static str {
    match name {
        "mswin" => "windows",
        "os" if windows_feed => "windows",
        "os" => "linux",
        "linux" => "linux",
        "windows" => "windows",
        _ => {
            if windows_feed {
                "windows"
            } else {
                "linux"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FEED: &str = r#"{
        "config": {
            "regions": [
                {
                    "region": "us-east",
                    "instanceTypes": [
                        {
                            "type": "generalCurrentGen",
                            "sizes": [
                                {
                                    "size": "m1.small",
                                    "valueColumns": [
                                        {"name": "linux", "prices": {"USD": "0.060"}},
                                        {"name": "mswin", "prices": {"USD": "0.091"}}
                                    ]
                                },
                                {
                                    "size": "m3.medium",
                                    "valueColumns": [
                                        {"name": "linux", "prices": {"USD": "N/A"}}
                                    ]
                                }
                            ]
                        }
                    ]
                },
                {
                    "region": "eu-ireland",
                    "instanceTypes": [
                        {
                            "sizes": [
                                {
                                    "size": "t1.micro",
                                    "valueColumns": [
                                        {"name": "os", "prices": {"USD": "0.020"}}
                                    ]
                                }
                            ]
                        }
                    ]
                }
            ]
        }
    }"#;

    #[test]
    fn test_strip_jsonp_comment_and_callback() {
        let body = "/*\n * Copyright notice\n */\ncallback({\"config\":{}});";
        assert_eq!(strip_jsonp(body), "{\"config\":{}}");
    }

    #[test]
    fn test_strip_jsonp_plain_json_passes_through() {
        assert_eq!(strip_jsonp("{\"config\":{}}"), "{\"config\":{}}");
    }

    #[test]
    fn test_strip_jsonp_callback_without_comment() {
        assert_eq!(strip_jsonp("callback({});"), "{}");
    }

    #[test]
    fn test_flatten_feed_maps_regions_and_platforms() {
        let doc: Value = serde_json::from_str(SAMPLE_FEED).expect("valid sample");
        let entries = flatten_feed(&doc, false).expect("flattens");

        assert!(entries.contains(&("cost.us-east-1.m1.small.linux".to_string(), 0.060)));
        assert!(entries.contains(&("cost.us-east-1.m1.small.windows".to_string(), 0.091)));
        // Ambiguous "os" marker resolves to linux outside the Windows feed.
        assert!(entries.contains(&("cost.eu-west-1.t1.micro.linux".to_string(), 0.020)));
    }

    #[test]
    fn test_flatten_feed_windows_feed_disambiguates_os_marker() {
        let doc: Value = serde_json::from_str(SAMPLE_FEED).expect("valid sample");
        let entries = flatten_feed(&doc, true).expect("flattens");

        assert!(entries.contains(&("cost.eu-west-1.t1.micro.windows".to_string(), 0.020)));
    }

    #[test]
    fn test_flatten_feed_skips_unpriced_variants() {
        let doc: Value = serde_json::from_str(SAMPLE_FEED).expect("valid sample");
        let entries = flatten_feed(&doc, false).expect("flattens");

        assert!(!entries
            .iter()
            .any(|(key, _)| key.starts_with("cost.us-east-1.m3.medium")));
    }

    #[test]
    fn test_flatten_feed_unknown_region_fails() {
        let doc: Value = serde_json::from_str(
            r#"{"config": {"regions": [{"region": "moon-base-1", "instanceTypes": []}]}}"#,
        )
        .expect("valid json");

        let err = flatten_feed(&doc, false).expect_err("unmapped region");
        assert!(err.to_string().contains("moon-base-1"));
    }

    #[test]
    fn test_flatten_feed_missing_config_fails() {
        let doc: Value = serde_json::from_str("{}").expect("valid json");
        assert!(flatten_feed(&doc, false).is_err());
    }

    #[test]
    fn test_map_feed_region() {
        assert_eq!(map_feed_region("us-east"), Some("us-east-1"));
        assert_eq!(map_feed_region("apac-syd"), Some("ap-southeast-2"));
        assert_eq!(map_feed_region("us-east-1"), None);
    }
}
