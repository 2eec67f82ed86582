pub mod client;
pub mod entitlement;
pub mod types;

pub use client::{GraphScanClient, HttpGraphScanClient, OfflineGraphScanClient, ServerDetails};
pub use entitlement::{
    APPLICABILITY_FEATURE_ID, CURATION_FEATURE_ID, EntitlementClient, HttpEntitlementClient,
};
pub use types::{Component, Cve, Finding, ScanResponse, Severity, attach_impact_paths};
