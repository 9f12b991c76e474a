use crate::config::{normalize_url, NodeSelection};
use crate::error::ProbeError;
use serde::Serialize;

/// Largest response body the vendor downloads per node, in bytes
pub const MAX_DOWNLOAD_BYTES: u64 = 1_048_576;

/// One HTTP probe request as submitted to the probe service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeRequest {
    /// Correlates asynchronous responses with this session
    pub txnid: u64,
    pub nodetype: Vec<u32>,
    pub num: u32,
    #[serde(rename = "TestType")]
    pub test_type: String,
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "TimeOut")]
    pub timeout_seconds: u64,
    #[serde(rename = "Request")]
    pub method: String,
    #[serde(rename = "NoCache")]
    pub no_cache: bool,
    #[serde(rename = "type")]
    pub kind: u32,
    pub isps: Vec<u32>,
    pub areas: Vec<u32>,
    pub pro_ids: Vec<u32>,
    #[serde(rename = "MaxDown")]
    pub max_down: u64,
    #[serde(rename = "AutoDecompress")]
    pub auto_decompress: bool,
    #[serde(rename = "GetMD5")]
    pub get_md5: bool,
    #[serde(rename = "FollowLocation")]
    pub follow_location: u32,
    #[serde(rename = "Speed")]
    pub speed: u32,
    #[serde(rename = "Trace")]
    pub trace: bool,
}

impl ProbeRequest {
    /// Build a GET probe of `url` over the selected nodes
    pub fn http_get(url: &str, txnid: u64, nodes: &NodeSelection, timeout_seconds: u64) -> Self {
        Self {
            txnid,
            nodetype: nodes.nodetype.clone(),
            num: nodes.num,
            test_type: "HTTP".to_string(),
            url: normalize_url(url),
            timeout_seconds,
            method: "GET".to_string(),
            no_cache: true,
            kind: 1,
            isps: nodes.isps.clone(),
            areas: nodes.areas.clone(),
            pro_ids: nodes.pro_ids.clone(),
            max_down: MAX_DOWNLOAD_BYTES,
            auto_decompress: true,
            get_md5: true,
            follow_location: 2,
            speed: 0,
            trace: false,
        }
    }

    /// Serialize into the single text frame sent after connecting
    pub fn to_message(&self) -> Result<String, ProbeError> {
        serde_json::to_string(self).map_err(|e| ProbeError::SendFailure(e.to_string()))
    }
}
