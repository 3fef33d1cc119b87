//! Raw flow records
//!
//! A `RawFlow` is one completed (or flushed) network flow as delivered by the
//! flow source: the 5-tuple identifiers plus the CICFlowMeter statistics for
//! the flow. The schema is closed — `deny_unknown_fields` rejects records with
//! keys we do not know about at the source boundary.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Canonical feature ordering for the pipeline. `RawFlow::feature_values`
/// emits values in exactly this order, and a classifier model artifact must
/// declare the same list to be loadable.
pub const FEATURE_NAMES: &[&str] = &[
    "dst_port",
    "flow_duration",
    "total_fwd_packets",
    "total_bwd_packets",
    "total_len_fwd_packets",
    "total_len_bwd_packets",
    "fwd_packet_len_max",
    "fwd_packet_len_min",
    "fwd_packet_len_mean",
    "fwd_packet_len_std",
    "bwd_packet_len_max",
    "bwd_packet_len_min",
    "bwd_packet_len_mean",
    "bwd_packet_len_std",
    "flow_bytes_per_sec",
    "flow_packets_per_sec",
    "flow_iat_mean",
    "flow_iat_std",
    "flow_iat_max",
    "flow_iat_min",
    "fwd_iat_total",
    "fwd_iat_mean",
    "fwd_iat_std",
    "fwd_iat_max",
    "fwd_iat_min",
    "bwd_iat_total",
    "bwd_iat_mean",
    "bwd_iat_std",
    "bwd_iat_max",
    "bwd_iat_min",
    "fwd_psh_flags",
    "bwd_psh_flags",
    "fwd_urg_flags",
    "bwd_urg_flags",
    "fwd_header_len",
    "bwd_header_len",
    "fwd_packets_per_sec",
    "bwd_packets_per_sec",
    "packet_len_min",
    "packet_len_max",
    "packet_len_mean",
    "packet_len_std",
    "packet_len_variance",
    "fin_flag_count",
    "syn_flag_count",
    "rst_flag_count",
    "psh_flag_count",
    "ack_flag_count",
    "urg_flag_count",
    "cwe_flag_count",
    "ece_flag_count",
    "down_up_ratio",
    "avg_packet_size",
    "avg_fwd_segment_size",
    "avg_bwd_segment_size",
    "fwd_avg_bytes_per_bulk",
    "fwd_avg_packets_per_bulk",
    "fwd_avg_bulk_rate",
    "bwd_avg_bytes_per_bulk",
    "bwd_avg_packets_per_bulk",
    "bwd_avg_bulk_rate",
    "subflow_fwd_packets",
    "subflow_fwd_bytes",
    "subflow_bwd_packets",
    "subflow_bwd_bytes",
    "init_win_bytes_fwd",
    "init_win_bytes_bwd",
    "act_data_pkt_fwd",
    "min_seg_size_fwd",
    "active_mean",
    "active_std",
    "active_max",
    "active_min",
    "idle_mean",
    "idle_std",
    "idle_max",
    "idle_min",
];

/// Number of features in the canonical vector.
pub const NUM_FEATURES: usize = FEATURE_NAMES.len();

/// Flow 5-tuple identifiers, carried unchanged through every stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    /// IP protocol number (6 = TCP, 17 = UDP)
    pub protocol: u8,
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}/{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

/// One raw flow record from the flow source.
///
/// Field names follow the CICFlowMeter CSV headers (serde renames); internal
/// names are the canonical snake_case forms in [`FEATURE_NAMES`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFlow {
    #[serde(rename = "Source IP")]
    pub src_ip: IpAddr,
    #[serde(rename = "Source Port")]
    pub src_port: u16,
    #[serde(rename = "Destination IP")]
    pub dst_ip: IpAddr,
    #[serde(rename = "Destination Port")]
    pub dst_port: u16,
    #[serde(rename = "Protocol")]
    pub protocol: u8,

    #[serde(rename = "Flow Duration")]
    pub flow_duration: f64,
    #[serde(rename = "Total Fwd Packets")]
    pub total_fwd_packets: f64,
    #[serde(rename = "Total Backward Packets")]
    pub total_bwd_packets: f64,
    #[serde(rename = "Total Length of Fwd Packets")]
    pub total_len_fwd_packets: f64,
    #[serde(rename = "Total Length of Bwd Packets")]
    pub total_len_bwd_packets: f64,
    #[serde(rename = "Fwd Packet Length Max")]
    pub fwd_packet_len_max: f64,
    #[serde(rename = "Fwd Packet Length Min")]
    pub fwd_packet_len_min: f64,
    #[serde(rename = "Fwd Packet Length Mean")]
    pub fwd_packet_len_mean: f64,
    #[serde(rename = "Fwd Packet Length Std")]
    pub fwd_packet_len_std: f64,
    #[serde(rename = "Bwd Packet Length Max")]
    pub bwd_packet_len_max: f64,
    #[serde(rename = "Bwd Packet Length Min")]
    pub bwd_packet_len_min: f64,
    #[serde(rename = "Bwd Packet Length Mean")]
    pub bwd_packet_len_mean: f64,
    #[serde(rename = "Bwd Packet Length Std")]
    pub bwd_packet_len_std: f64,
    #[serde(rename = "Flow Bytes/s")]
    pub flow_bytes_per_sec: f64,
    #[serde(rename = "Flow Packets/s")]
    pub flow_packets_per_sec: f64,
    #[serde(rename = "Flow IAT Mean")]
    pub flow_iat_mean: f64,
    #[serde(rename = "Flow IAT Std")]
    pub flow_iat_std: f64,
    #[serde(rename = "Flow IAT Max")]
    pub flow_iat_max: f64,
    #[serde(rename = "Flow IAT Min")]
    pub flow_iat_min: f64,
    #[serde(rename = "Fwd IAT Total")]
    pub fwd_iat_total: f64,
    #[serde(rename = "Fwd IAT Mean")]
    pub fwd_iat_mean: f64,
    #[serde(rename = "Fwd IAT Std")]
    pub fwd_iat_std: f64,
    #[serde(rename = "Fwd IAT Max")]
    pub fwd_iat_max: f64,
    #[serde(rename = "Fwd IAT Min")]
    pub fwd_iat_min: f64,
    #[serde(rename = "Bwd IAT Total")]
    pub bwd_iat_total: f64,
    #[serde(rename = "Bwd IAT Mean")]
    pub bwd_iat_mean: f64,
    #[serde(rename = "Bwd IAT Std")]
    pub bwd_iat_std: f64,
    #[serde(rename = "Bwd IAT Max")]
    pub bwd_iat_max: f64,
    #[serde(rename = "Bwd IAT Min")]
    pub bwd_iat_min: f64,
    #[serde(rename = "Fwd PSH Flags")]
    pub fwd_psh_flags: f64,
    #[serde(rename = "Bwd PSH Flags")]
    pub bwd_psh_flags: f64,
    #[serde(rename = "Fwd URG Flags")]
    pub fwd_urg_flags: f64,
    #[serde(rename = "Bwd URG Flags")]
    pub bwd_urg_flags: f64,
    #[serde(rename = "Fwd Header Length")]
    pub fwd_header_len: f64,
    #[serde(rename = "Bwd Header Length")]
    pub bwd_header_len: f64,
    #[serde(rename = "Fwd Packets/s")]
    pub fwd_packets_per_sec: f64,
    #[serde(rename = "Bwd Packets/s")]
    pub bwd_packets_per_sec: f64,
    #[serde(rename = "Min Packet Length")]
    pub packet_len_min: f64,
    #[serde(rename = "Max Packet Length")]
    pub packet_len_max: f64,
    #[serde(rename = "Packet Length Mean")]
    pub packet_len_mean: f64,
    #[serde(rename = "Packet Length Std")]
    pub packet_len_std: f64,
    #[serde(rename = "Packet Length Variance")]
    pub packet_len_variance: f64,
    #[serde(rename = "FIN Flag Count")]
    pub fin_flag_count: f64,
    #[serde(rename = "SYN Flag Count")]
    pub syn_flag_count: f64,
    #[serde(rename = "RST Flag Count")]
    pub rst_flag_count: f64,
    #[serde(rename = "PSH Flag Count")]
    pub psh_flag_count: f64,
    #[serde(rename = "ACK Flag Count")]
    pub ack_flag_count: f64,
    #[serde(rename = "URG Flag Count")]
    pub urg_flag_count: f64,
    #[serde(rename = "CWE Flag Count")]
    pub cwe_flag_count: f64,
    #[serde(rename = "ECE Flag Count")]
    pub ece_flag_count: f64,
    #[serde(rename = "Down/Up Ratio")]
    pub down_up_ratio: f64,
    #[serde(rename = "Average Packet Size")]
    pub avg_packet_size: f64,
    #[serde(rename = "Avg Fwd Segment Size")]
    pub avg_fwd_segment_size: f64,
    #[serde(rename = "Avg Bwd Segment Size")]
    pub avg_bwd_segment_size: f64,
    #[serde(rename = "Fwd Avg Bytes/Bulk")]
    pub fwd_avg_bytes_per_bulk: f64,
    #[serde(rename = "Fwd Avg Packets/Bulk")]
    pub fwd_avg_packets_per_bulk: f64,
    #[serde(rename = "Fwd Avg Bulk Rate")]
    pub fwd_avg_bulk_rate: f64,
    #[serde(rename = "Bwd Avg Bytes/Bulk")]
    pub bwd_avg_bytes_per_bulk: f64,
    #[serde(rename = "Bwd Avg Packets/Bulk")]
    pub bwd_avg_packets_per_bulk: f64,
    #[serde(rename = "Bwd Avg Bulk Rate")]
    pub bwd_avg_bulk_rate: f64,
    #[serde(rename = "Subflow Fwd Packets")]
    pub subflow_fwd_packets: f64,
    #[serde(rename = "Subflow Fwd Bytes")]
    pub subflow_fwd_bytes: f64,
    #[serde(rename = "Subflow Bwd Packets")]
    pub subflow_bwd_packets: f64,
    #[serde(rename = "Subflow Bwd Bytes")]
    pub subflow_bwd_bytes: f64,
    #[serde(rename = "Init_Win_bytes_forward")]
    pub init_win_bytes_fwd: f64,
    #[serde(rename = "Init_Win_bytes_backward")]
    pub init_win_bytes_bwd: f64,
    #[serde(rename = "act_data_pkt_fwd")]
    pub act_data_pkt_fwd: f64,
    #[serde(rename = "min_seg_size_forward")]
    pub min_seg_size_fwd: f64,
    #[serde(rename = "Active Mean")]
    pub active_mean: f64,
    #[serde(rename = "Active Std")]
    pub active_std: f64,
    #[serde(rename = "Active Max")]
    pub active_max: f64,
    #[serde(rename = "Active Min")]
    pub active_min: f64,
    #[serde(rename = "Idle Mean")]
    pub idle_mean: f64,
    #[serde(rename = "Idle Std")]
    pub idle_std: f64,
    #[serde(rename = "Idle Max")]
    pub idle_max: f64,
    #[serde(rename = "Idle Min")]
    pub idle_min: f64,

    /// Ground-truth label, present in recorded datasets only.
    #[serde(rename = "Label", default)]
    pub label: Option<String>,
}

impl RawFlow {
    /// The 5-tuple identifiers of this flow.
    pub fn id(&self) -> FlowId {
        FlowId {
            src_ip: self.src_ip,
            src_port: self.src_port,
            dst_ip: self.dst_ip,
            dst_port: self.dst_port,
            protocol: self.protocol,
        }
    }

    /// Feature values in canonical [`FEATURE_NAMES`] order. Non-finite values
    /// pass through here untouched; coercion is the preprocessor's job.
    pub fn feature_values(&self) -> Vec<f64> {
        vec![
            self.dst_port as f64,
            self.flow_duration,
            self.total_fwd_packets,
            self.total_bwd_packets,
            self.total_len_fwd_packets,
            self.total_len_bwd_packets,
            self.fwd_packet_len_max,
            self.fwd_packet_len_min,
            self.fwd_packet_len_mean,
            self.fwd_packet_len_std,
            self.bwd_packet_len_max,
            self.bwd_packet_len_min,
            self.bwd_packet_len_mean,
            self.bwd_packet_len_std,
            self.flow_bytes_per_sec,
            self.flow_packets_per_sec,
            self.flow_iat_mean,
            self.flow_iat_std,
            self.flow_iat_max,
            self.flow_iat_min,
            self.fwd_iat_total,
            self.fwd_iat_mean,
            self.fwd_iat_std,
            self.fwd_iat_max,
            self.fwd_iat_min,
            self.bwd_iat_total,
            self.bwd_iat_mean,
            self.bwd_iat_std,
            self.bwd_iat_max,
            self.bwd_iat_min,
            self.fwd_psh_flags,
            self.bwd_psh_flags,
            self.fwd_urg_flags,
            self.bwd_urg_flags,
            self.fwd_header_len,
            self.bwd_header_len,
            self.fwd_packets_per_sec,
            self.bwd_packets_per_sec,
            self.packet_len_min,
            self.packet_len_max,
            self.packet_len_mean,
            self.packet_len_std,
            self.packet_len_variance,
            self.fin_flag_count,
            self.syn_flag_count,
            self.rst_flag_count,
            self.psh_flag_count,
            self.ack_flag_count,
            self.urg_flag_count,
            self.cwe_flag_count,
            self.ece_flag_count,
            self.down_up_ratio,
            self.avg_packet_size,
            self.avg_fwd_segment_size,
            self.avg_bwd_segment_size,
            self.fwd_avg_bytes_per_bulk,
            self.fwd_avg_packets_per_bulk,
            self.fwd_avg_bulk_rate,
            self.bwd_avg_bytes_per_bulk,
            self.bwd_avg_packets_per_bulk,
            self.bwd_avg_bulk_rate,
            self.subflow_fwd_packets,
            self.subflow_fwd_bytes,
            self.subflow_bwd_packets,
            self.subflow_bwd_bytes,
            self.init_win_bytes_fwd,
            self.init_win_bytes_bwd,
            self.act_data_pkt_fwd,
            self.min_seg_size_fwd,
            self.active_mean,
            self.active_std,
            self.active_max,
            self.active_min,
            self.idle_mean,
            self.idle_std,
            self.idle_max,
            self.idle_min,
        ]
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// A zeroed flow with the given source port, for tests across the crate.
    pub fn flow_with_port(src_port: u16, label: Option<&str>) -> RawFlow {
        let mut flow: RawFlow =
            serde_json::from_value(zeroed_json(src_port)).expect("zeroed flow deserializes");
        flow.label = label.map(String::from);
        flow
    }

    pub fn zeroed_json(src_port: u16) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("Source IP".into(), "10.0.0.1".into());
        map.insert("Source Port".into(), src_port.into());
        map.insert("Destination IP".into(), "192.168.1.10".into());
        map.insert("Destination Port".into(), 443.into());
        map.insert("Protocol".into(), 6.into());
        for name in RENAMED_FEATURE_HEADERS {
            map.insert((*name).into(), 0.0.into());
        }
        serde_json::Value::Object(map)
    }

    /// External header names for the non-identifier features, canonical order.
    pub const RENAMED_FEATURE_HEADERS: &[&str] = &[
        "Flow Duration",
        "Total Fwd Packets",
        "Total Backward Packets",
        "Total Length of Fwd Packets",
        "Total Length of Bwd Packets",
        "Fwd Packet Length Max",
        "Fwd Packet Length Min",
        "Fwd Packet Length Mean",
        "Fwd Packet Length Std",
        "Bwd Packet Length Max",
        "Bwd Packet Length Min",
        "Bwd Packet Length Mean",
        "Bwd Packet Length Std",
        "Flow Bytes/s",
        "Flow Packets/s",
        "Flow IAT Mean",
        "Flow IAT Std",
        "Flow IAT Max",
        "Flow IAT Min",
        "Fwd IAT Total",
        "Fwd IAT Mean",
        "Fwd IAT Std",
        "Fwd IAT Max",
        "Fwd IAT Min",
        "Bwd IAT Total",
        "Bwd IAT Mean",
        "Bwd IAT Std",
        "Bwd IAT Max",
        "Bwd IAT Min",
        "Fwd PSH Flags",
        "Bwd PSH Flags",
        "Fwd URG Flags",
        "Bwd URG Flags",
        "Fwd Header Length",
        "Bwd Header Length",
        "Fwd Packets/s",
        "Bwd Packets/s",
        "Min Packet Length",
        "Max Packet Length",
        "Packet Length Mean",
        "Packet Length Std",
        "Packet Length Variance",
        "FIN Flag Count",
        "SYN Flag Count",
        "RST Flag Count",
        "PSH Flag Count",
        "ACK Flag Count",
        "URG Flag Count",
        "CWE Flag Count",
        "ECE Flag Count",
        "Down/Up Ratio",
        "Average Packet Size",
        "Avg Fwd Segment Size",
        "Avg Bwd Segment Size",
        "Fwd Avg Bytes/Bulk",
        "Fwd Avg Packets/Bulk",
        "Fwd Avg Bulk Rate",
        "Bwd Avg Bytes/Bulk",
        "Bwd Avg Packets/Bulk",
        "Bwd Avg Bulk Rate",
        "Subflow Fwd Packets",
        "Subflow Fwd Bytes",
        "Subflow Bwd Packets",
        "Subflow Bwd Bytes",
        "Init_Win_bytes_forward",
        "Init_Win_bytes_backward",
        "act_data_pkt_fwd",
        "min_seg_size_forward",
        "Active Mean",
        "Active Std",
        "Active Max",
        "Active Min",
        "Idle Mean",
        "Idle Std",
        "Idle Max",
        "Idle Min",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_matches_canonical_order() {
        let flow = testutil::flow_with_port(1234, None);
        let values = flow.feature_values();
        assert_eq!(values.len(), NUM_FEATURES);
        // dst_port is the first canonical feature
        assert_eq!(values[0], 443.0);
        assert_eq!(FEATURE_NAMES[0], "dst_port");
        // Renamed headers cover every non-identifier feature
        assert_eq!(testutil::RENAMED_FEATURE_HEADERS.len(), NUM_FEATURES - 1);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut flow = serde_json::to_value(testutil::flow_with_port(1, None)).unwrap();
        flow.as_object_mut()
            .unwrap()
            .insert("Mystery Column".into(), 1.0.into());
        let parsed: Result<RawFlow, _> = serde_json::from_value(flow);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_label_optional() {
        let labeled = testutil::flow_with_port(1, Some("DoS"));
        assert_eq!(labeled.label.as_deref(), Some("DoS"));
        let unlabeled = testutil::flow_with_port(1, None);
        assert!(unlabeled.label.is_none());
    }

    #[test]
    fn test_flow_id_display() {
        let flow = testutil::flow_with_port(5555, None);
        assert_eq!(flow.id().to_string(), "10.0.0.1:5555 -> 192.168.1.10:443/6");
    }
}
