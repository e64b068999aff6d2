//! Certificate authority module.
//!
//! This module derives the identities a cluster needs from its plan and
//! decides, run by run, which of them must be issued or re-issued. The
//! material itself is produced through the automation backend.

mod identity;
mod authority;

pub use identity::{
    ADMIN_NAME, API_SERVER_NAME, AUTHORITY_NAME, IdentityKind, IdentityRequest,
    SERVICE_ACCOUNT_NAME, first_service_ip, identity_requests,
};
pub use authority::{
    CertificateAuthority, IdentityManifest, IssuanceDecision, IssuancePlan, IssuanceSummary,
    MANIFEST_FILE, ManifestEntry, plan_issuance,
};
