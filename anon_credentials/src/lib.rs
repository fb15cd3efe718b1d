#![allow(clippy::type_complexity)]

//! Anonymous attribute credentials over BLS12-381.
//!
//! A claim is a JSON-like document with a credential type (`ctype`) and nested contents. It is flattened into
//! typed [`Attribute`]s with escaped dotted names. An attester signs the attributes together with a secret of the
//! claimer and a revocation element using BBS+, without learning the secret. The claimer then discloses any
//! subset of attributes to a verifier with a zero knowledge proof, optionally proving that the credential was not
//! revoked.
//!
//! Provides
//! - encoding of claims into attributes and back, see [`attribute`] and [`escaping`].
//! - the attestation protocol, see [`AttesterKeypair::initiate_attestation`], [`Claimer::request_attestation`],
//!   [`AttesterKeypair::attest_claim`] and [`ClaimerSession::build_credential`].
//! - revocation with a positive accumulator whose states are signed, indexed and timestamped, see [`revocation`].
//! - presentations of one credential or combined presentations of several credentials of the same claimer, see
//!   [`presentation`].
//!
//! Cryptographic failures during verification are reported as `false`, malformed inputs as [`CredentialError`].
//!
//! [`Attribute`]: crate::attribute::Attribute
//! [`AttesterKeypair::initiate_attestation`]: crate::setup::AttesterKeypair
//! [`AttesterKeypair::attest_claim`]: crate::setup::AttesterKeypair
//! [`Claimer::request_attestation`]: crate::attestation::Claimer::request_attestation
//! [`ClaimerSession::build_credential`]: crate::attestation::ClaimerSession::build_credential
//! [`CredentialError`]: crate::error::CredentialError

pub mod attestation;
pub mod attribute;
pub mod claim;
pub mod error;
pub mod escaping;
pub mod presentation;
pub mod revocation;
pub mod setup;
pub mod util;

pub mod prelude {
    pub use crate::{
        attestation::{
            AttestationRequest, AttestedClaim, AttesterSession, Claimer, ClaimerSession, Credential,
            IssueSignature, StartSessionMsg,
        },
        attribute::{reconstruct_claim, sort_and_deduplicate, Attribute, AttributeType},
        claim::{Claim, ClaimValue},
        error::CredentialError,
        escaping::{escape, escaped_split, unescape},
        presentation::{
            build_combined_presentation, build_presentation, request_combined_presentation,
            request_presentation, verify_combined_presentation, verify_presentation,
            CombinedPresentationRequest, CombinedPresentationResponse, CombinedVerifierSession,
            PartialPresentation, PartialPresentationRequest, PresentationRequest, PresentationResponse,
            VerifierSession,
        },
        revocation::{
            check_freshness, FreshnessPolicy, NonRevocationWitness, RevocationEvent, RevocationUpdate,
            SignedAccumulator,
        },
        setup::{AttesterKeypair, AttesterPublicKey, AttesterSecretKey, SystemParams},
    };
}
