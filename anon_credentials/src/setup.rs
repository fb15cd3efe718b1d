//! System parameters and the keys of an attester.
//!
//! An attester owns two BBS+ key pairs and one accumulator key pair. The credential key signs `capacity + 2`
//! messages (the claimer secret, `capacity` attribute slots and the revocation element). The accumulator
//! signing key signs the 3 messages describing an accumulator state so that claimers and verifiers can trust
//! accumulator values they did not compute themselves.

use crate::error::CredentialError;
use ark_bls12_381::{Bls12_381, Fr, G1Affine};
use ark_std::rand::RngCore;
use bbs_plus::prelude::{KeypairG2, PublicKeyG2, SecretKey, SignatureParamsG1};
use blake2::Blake2b512;
use chrono::{DateTime, Utc};
use dock_crypto_utils::serde_utils::ArkObjectBytes;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use vb_accumulator::{
    prelude::MembershipProvingKey,
    setup::{
        Keypair as AccumKeypair, PublicKey as AccumPublicKey, SecretKey as AccumSecretKey,
        SetupParams as AccumParams,
    },
};

/// Number of messages signed per accumulator state: hash of the value, index and timestamp.
pub const ACCUMULATOR_MESSAGE_COUNT: u32 = 3;

/// Largest number of attribute slots a credential key can have
pub const MAX_CAPACITY: u32 = 1 << 16;

/// Parameters shared by every party of a deployment. The label seeds the derivation of all public generators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemParams {
    pub label: Vec<u8>,
    /// Byte length of the random context of sessions and presentation requests
    pub context_len: usize,
    /// Byte length of the random nonce of sessions and presentation requests
    pub nonce_len: usize,
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            label: b"anon-credentials".to_vec(),
            context_len: 32,
            nonce_len: 32,
        }
    }
}

impl SystemParams {
    fn labelled(&self, suffix: &[u8]) -> Vec<u8> {
        let mut l = self.label.clone();
        l.push(b'/');
        l.extend_from_slice(suffix);
        l
    }

    /// BBS+ generators for a credential holding up to `capacity` attributes.
    pub fn credential_params(
        &self,
        capacity: u32,
    ) -> Result<SignatureParamsG1<Bls12_381>, CredentialError> {
        if capacity > MAX_CAPACITY {
            return Err(CredentialError::CapacityTooLarge(capacity));
        }
        Ok(SignatureParamsG1::<Bls12_381>::new::<Blake2b512>(
            &self.labelled(b"credential"),
            capacity + 2,
        ))
    }

    pub fn accumulator_params(&self) -> AccumParams<Bls12_381> {
        AccumParams::<Bls12_381>::new::<Blake2b512>(&self.labelled(b"accumulator"))
    }

    pub fn membership_proving_key(&self) -> MembershipProvingKey<G1Affine> {
        MembershipProvingKey::<G1Affine>::new::<Blake2b512>(&self.labelled(b"membership"))
    }

    pub fn accumulator_signature_params(&self) -> SignatureParamsG1<Bls12_381> {
        SignatureParamsG1::<Bls12_381>::new::<Blake2b512>(
            &self.labelled(b"accumulator-signature"),
            ACCUMULATOR_MESSAGE_COUNT,
        )
    }
}

/// Public half of the revocation key. Everything needed to check accumulator signatures, update witnesses and
/// verify membership proofs.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevocationPublicKey {
    #[serde_as(as = "ArkObjectBytes")]
    pub accumulator_params: AccumParams<Bls12_381>,
    #[serde_as(as = "ArkObjectBytes")]
    pub accumulator_public_key: AccumPublicKey<Bls12_381>,
    #[serde_as(as = "ArkObjectBytes")]
    pub proving_key: MembershipProvingKey<G1Affine>,
    #[serde_as(as = "ArkObjectBytes")]
    pub signature_params: SignatureParamsG1<Bls12_381>,
    #[serde_as(as = "ArkObjectBytes")]
    pub signing_public_key: PublicKeyG2<Bls12_381>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevocationSecretKey {
    /// Removes elements from the accumulator and computes membership witnesses
    #[serde_as(as = "ArkObjectBytes")]
    pub accumulator: AccumSecretKey<Fr>,
    /// Signs accumulator states
    #[serde_as(as = "ArkObjectBytes")]
    pub signing: SecretKey<Fr>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttesterPublicKey {
    /// Maximum number of attributes a credential of this key can hold
    pub capacity: u32,
    pub expiry: DateTime<Utc>,
    #[serde_as(as = "ArkObjectBytes")]
    pub signature_params: SignatureParamsG1<Bls12_381>,
    #[serde_as(as = "ArkObjectBytes")]
    pub public_key: PublicKeyG2<Bls12_381>,
    pub revocation: RevocationPublicKey,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttesterSecretKey {
    #[serde_as(as = "ArkObjectBytes")]
    pub signing: SecretKey<Fr>,
    pub revocation: RevocationSecretKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttesterKeypair {
    pub secret_key: AttesterSecretKey,
    pub public_key: AttesterPublicKey,
}

impl AttesterKeypair {
    /// Create all keys of an attester whose credentials hold up to `capacity` attributes and which stops
    /// attesting after `expiry`.
    pub fn new<R: RngCore>(
        rng: &mut R,
        system: &SystemParams,
        capacity: u32,
        expiry: DateTime<Utc>,
    ) -> Result<Self, CredentialError> {
        let signature_params = system.credential_params(capacity)?;
        let credential_keypair = KeypairG2::<Bls12_381>::generate_using_rng(rng, &signature_params);

        let accumulator_params = system.accumulator_params();
        let accumulator_keypair =
            AccumKeypair::<Bls12_381>::generate_using_rng(rng, &accumulator_params);
        let accumulator_signature_params = system.accumulator_signature_params();
        let accumulator_signing_keypair =
            KeypairG2::<Bls12_381>::generate_using_rng(rng, &accumulator_signature_params);

        let revocation = RevocationPublicKey {
            accumulator_params,
            accumulator_public_key: accumulator_keypair.public_key.clone(),
            proving_key: system.membership_proving_key(),
            signature_params: accumulator_signature_params,
            signing_public_key: accumulator_signing_keypair.public_key.clone(),
        };
        Ok(Self {
            secret_key: AttesterSecretKey {
                signing: credential_keypair.secret_key.clone(),
                revocation: RevocationSecretKey {
                    accumulator: accumulator_keypair.secret_key.clone(),
                    signing: accumulator_signing_keypair.secret_key.clone(),
                },
            },
            public_key: AttesterPublicKey {
                capacity,
                expiry,
                signature_params,
                public_key: credential_keypair.public_key.clone(),
                revocation,
            },
        })
    }
}

impl AttesterPublicKey {
    /// Number of messages in a credential of this key
    pub fn message_count(&self) -> usize {
        (self.capacity as usize).saturating_add(2)
    }

    /// Index of the message holding the revocation element
    pub fn revocation_index(&self) -> usize {
        (self.capacity as usize).saturating_add(1)
    }

    pub fn is_expired(&self, now: &DateTime<Utc>) -> bool {
        self.expiry < *now
    }

    /// Check that the capacity is in range and the generators match it
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.capacity > MAX_CAPACITY {
            return Err(CredentialError::CapacityTooLarge(self.capacity));
        }
        if self.signature_params.h.len() != self.message_count() {
            return Err(CredentialError::UnequalLengths(
                self.message_count(),
                self.signature_params.h.len(),
            ));
        }
        Ok(())
    }
}
