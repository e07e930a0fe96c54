use std::net::IpAddr;

use indicatif::HumanBytes;
use reqwest::{header, Client};
use tokio::net::lookup_host;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::plan::PartRange;

/// A download as the orchestrator sees it for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub url: String,
    /// Merge name of the final file.
    pub output_name: String,
    /// `None` when the server did not report a length.
    pub total_length: Option<u64>,
    pub segment_count: usize,
    pub resumable: bool,
    /// Ascending byte order; index is the segment's identity.
    pub ranges: Vec<PartRange>,
}

impl DownloadTask {
    /// Bytes still to transfer across all ranges, when known.
    pub fn remaining_bytes(&self) -> Option<u64> {
        self.ranges
            .iter()
            .map(|r| r.expected_len(self.total_length))
            .sum()
    }
}

pub fn size_report(total_length: Option<u64>) -> String {
    match total_length {
        Some(len) => format!("{}", HumanBytes(len)),
        None => "not specified".to_string(),
    }
}

async fn resolve_ipv4(url: &Url) -> Result<Vec<IpAddr>> {
    let host = url.host_str().unwrap_or_default().to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let addrs = lookup_host((host.trim_matches(|c| c == '[' || c == ']'), port))
        .await
        .map_err(|source| Error::Resolve {
            host: host.clone(),
            source,
        })?;
    Ok(addrs.map(|a| a.ip()).filter(IpAddr::is_ipv4).collect())
}

/// Issues one GET against `url` and decides how the download can be split.
///
/// Only the response head is read. Without `Accept-Ranges: bytes` or without a
/// `Content-Length`, the task falls back to a single non-resumable segment.
pub async fn probe(
    client: &Client,
    url: &str,
    requested_segments: usize,
    output_name: &str,
) -> Result<DownloadTask> {
    let parsed = Url::parse(url).map_err(|source| Error::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let ips = resolve_ipv4(&parsed).await?;
    let shown: Vec<String> = ips.iter().map(ToString::to_string).collect();
    info!(url, ips = %shown.join(" | "), "resolved download host");

    let response = client.get(url).send().await.map_err(|source| Error::Probe {
        url: url.to_string(),
        source,
    })?;
    if !response.status().is_success() {
        return Err(Error::ProbeStatus {
            url: url.to_string(),
            status: response.status(),
        });
    }

    let headers = response.headers();
    let accepts_ranges = headers
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    let total_length = match headers.get(header::CONTENT_LENGTH) {
        None => None,
        Some(value) => {
            let raw = value.to_str().unwrap_or_default().trim().to_string();
            Some(
                raw.parse::<u64>()
                    .map_err(|_| Error::InvalidContentLength {
                        url: url.to_string(),
                        value: raw.clone(),
                    })?,
            )
        }
    };
    drop(response);

    let mut segment_count = requested_segments;
    let mut resumable = true;
    if !accepts_ranges {
        warn!(url, "server does not accept byte ranges, using a single segment");
        segment_count = 1;
        resumable = false;
    }
    match total_length {
        None => {
            warn!(url, "Content-Length is not set, using a single segment");
            segment_count = 1;
            resumable = false;
        }
        // Never plan more segments than there are bytes.
        Some(len) if segment_count > 1 => {
            segment_count = segment_count.min(len.max(1) as usize);
        }
        Some(_) => {}
    }

    debug!(url, segment_count, resumable, "probe finished");
    info!(url, size = %size_report(total_length), segments = segment_count, "download size");

    Ok(DownloadTask {
        url: url.to_string(),
        output_name: output_name.to_string(),
        total_length,
        segment_count,
        resumable,
        ranges: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_report_handles_unknown_length() {
        assert_eq!(size_report(None), "not specified");
        assert_eq!(size_report(Some(1024)), "1.00 KiB");
    }

    #[test]
    fn remaining_bytes_sums_ranges() {
        let part = |from, to| PartRange {
            url: "http://example.com/f".into(),
            path: "/tmp/f.part".into(),
            from,
            to,
        };
        let task = DownloadTask {
            url: "http://example.com/f".into(),
            output_name: "f".into(),
            total_length: Some(10),
            segment_count: 2,
            resumable: true,
            ranges: vec![part(2, 4), part(7, 10)],
        };
        assert_eq!(task.remaining_bytes(), Some(6));
    }

    #[tokio::test]
    async fn invalid_url_is_a_probe_error() {
        let client = Client::new();
        let err = probe(&client, "not a url", 4, "x").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Probe);
    }
}
