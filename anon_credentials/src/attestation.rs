//! Issuance of a credential over a claim.
//!
//! The protocol has three messages:
//! 1. The attester sends a random context and nonce ([`StartSessionMsg`]).
//! 2. The claimer commits to its secret under the generators of message 0 and proves knowledge of the opening,
//!    bound to the context and nonce. It sends the commitment, the proof and the claim in the clear
//!    ([`AttestationRequest`]).
//! 3. The attester checks the proof, encodes the claim into attributes, creates a revocation witness and signs
//!    all messages except the secret blindly ([`IssueSignature`]).
//!
//! The claimer then unblinds the signature into a [`Credential`] and keeps it together with the claim as an
//! [`AttestedClaim`].

use crate::{
    attribute::{attributes_to_messages, Attribute},
    claim::Claim,
    error::CredentialError,
    revocation::{
        create_accumulator, issue_witness, refresh_witness, revoke, NonRevocationWitness,
        RevocationUpdate,
    },
    setup::{AttesterKeypair, AttesterPublicKey, SystemParams},
    util::random_bytes,
};
use ark_bls12_381::{Bls12_381, Fr, G1Affine};
use ark_ff::{PrimeField, Zero};
use ark_std::{
    collections::BTreeMap,
    end_timer,
    rand::RngCore,
    start_timer, UniformRand,
};
use bbs_plus::prelude::SignatureG1;
use blake2::Blake2b512;
use chrono::{DateTime, Utc};
use core::fmt;
use dock_crypto_utils::serde_utils::ArkObjectBytes;
use proof_system::{
    prelude::{MetaStatements, Proof, Witness, Witnesses},
    proof_spec::ProofSpec,
    statement::{ped_comm::PedersenCommitment, Statements},
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// The long term secret of a claimer. Signed at message index 0 of all its credentials.
#[serde_as]
#[derive(Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Claimer {
    #[serde_as(as = "ArkObjectBytes")]
    secret: Fr,
}

/// Kept by the attester between sending the start message and attesting. Consumed by
/// [`AttesterKeypair::attest_claim`].
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttesterSession {
    pub context: Vec<u8>,
    pub nonce: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionMsg {
    pub context: Vec<u8>,
    pub nonce: Vec<u8>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttestationRequest {
    /// Commitment to the claimer secret
    #[serde_as(as = "ArkObjectBytes")]
    pub commitment: G1Affine,
    /// Proof of knowledge of the opening of `commitment`
    #[serde_as(as = "ArkObjectBytes")]
    pub proof: Proof<Bls12_381>,
    pub claim: Claim,
}

/// Kept by the claimer until the signature arrives
#[serde_as]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimerSession {
    claim: Claim,
    #[serde_as(as = "ArkObjectBytes")]
    secret: Fr,
    #[serde_as(as = "ArkObjectBytes")]
    blinding: Fr,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueSignature {
    /// Signature that still has to be unblinded with the blinding of the commitment
    #[serde_as(as = "ArkObjectBytes")]
    pub signature: SignatureG1<Bls12_381>,
    pub witness: NonRevocationWitness,
}

#[serde_as]
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde_as(as = "ArkObjectBytes")]
    pub signature: SignatureG1<Bls12_381>,
    #[serde_as(as = "ArkObjectBytes")]
    pub(crate) secret: Fr,
    pub non_revocation_witness: NonRevocationWitness,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttestedClaim {
    pub credential: Credential,
    pub claim: Claim,
}

impl fmt::Debug for Claimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claimer")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for ClaimerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimerSession")
            .field("claim", &self.claim)
            .field("secret", &"[REDACTED]")
            .field("blinding", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("signature", &self.signature)
            .field("secret", &"[REDACTED]")
            .field("non_revocation_witness", &self.non_revocation_witness)
            .finish()
    }
}

impl Drop for ClaimerSession {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.blinding.zeroize();
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Messages signed for a credential: the secret, the attribute hashes, zero padding up to the capacity and the
/// revocation element.
pub(crate) fn credential_messages(
    pk: &AttesterPublicKey,
    secret: Fr,
    attributes: &[Attribute],
    element: Fr,
) -> Result<Vec<Fr>, CredentialError> {
    let capacity = pk.capacity as usize;
    if attributes.len() > capacity {
        return Err(CredentialError::TooManyAttributes(
            attributes.len(),
            capacity,
        ));
    }
    let mut messages = Vec::with_capacity(pk.message_count());
    messages.push(secret);
    messages.append(&mut attributes_to_messages(attributes));
    messages.resize(capacity + 1, Fr::zero());
    messages.push(element);
    Ok(messages)
}

/// Statement that the commitment opens to the claimer secret under the generators of message 0
fn commitment_statements(
    pk: &AttesterPublicKey,
    commitment: G1Affine,
) -> Result<Statements<Bls12_381>, CredentialError> {
    pk.validate()?;
    let bases = vec![pk.signature_params.h_0, pk.signature_params.h[0]];
    let mut statements = Statements::<Bls12_381>::new();
    statements.add(PedersenCommitment::new_statement_from_params(
        bases, commitment,
    ));
    Ok(statements)
}

impl Claimer {
    pub fn new<R: RngCore>(rng: &mut R) -> Self {
        Self {
            secret: Fr::rand(rng),
        }
    }

    /// Derive the secret from a BIP-39 mnemonic and an optional password
    pub fn from_mnemonic(phrase: &str, password: &str) -> Result<Self, CredentialError> {
        let mnemonic = bip39::Mnemonic::parse(phrase)
            .map_err(|e| CredentialError::InvalidMnemonic(e.to_string()))?;
        let seed = Zeroizing::new(mnemonic.to_seed(password));
        Ok(Self {
            secret: Fr::from_be_bytes_mod_order(&seed[..]),
        })
    }

    /// Commit to the secret and prove knowledge of it, bound to the context and nonce of `start`
    pub fn request_attestation<R: RngCore>(
        &self,
        rng: &mut R,
        attester_pk: &AttesterPublicKey,
        start: &StartSessionMsg,
        claim: Claim,
    ) -> Result<(ClaimerSession, AttestationRequest), CredentialError> {
        claim.validate()?;
        let blinding = Fr::rand(rng);
        let mut committed = BTreeMap::new();
        committed.insert(0, &self.secret);
        let commitment = attester_pk
            .signature_params
            .commit_to_messages(committed, &blinding)?;

        let spec = ProofSpec::new(
            commitment_statements(attester_pk, commitment)?,
            MetaStatements::new(),
            vec![],
            Some(start.context.clone()),
        );
        let mut witnesses = Witnesses::new();
        witnesses.add(Witness::PedersenCommitment(vec![blinding, self.secret]));
        let proof = Proof::new::<R, Blake2b512>(
            rng,
            spec,
            witnesses,
            Some(start.nonce.clone()),
            Default::default(),
        )?
        .0;

        let session = ClaimerSession {
            claim: claim.clone(),
            secret: self.secret,
            blinding,
        };
        Ok((
            session,
            AttestationRequest {
                commitment,
                proof,
                claim,
            },
        ))
    }
}

impl ClaimerSession {
    /// Unblind the signature, check it against the claim and the witness and build the credential
    pub fn build_credential(
        mut self,
        attester_pk: &AttesterPublicKey,
        issued: IssueSignature,
    ) -> Result<AttestedClaim, CredentialError> {
        let claim = core::mem::take(&mut self.claim);
        let signature = issued.signature.unblind(&self.blinding);
        let messages = credential_messages(
            attester_pk,
            self.secret,
            &claim.to_attributes()?,
            issued.witness.element,
        )?;
        signature
            .verify(
                &messages,
                attester_pk.public_key.clone(),
                attester_pk.signature_params.clone(),
            )
            .map_err(|_| CredentialError::InvalidSignature)?;
        issued.witness.verify(&attester_pk.revocation)?;
        tracing::debug!(index = issued.witness.index(), "built credential");
        Ok(AttestedClaim {
            credential: Credential {
                signature,
                secret: self.secret,
                non_revocation_witness: issued.witness,
            },
            claim,
        })
    }
}

impl AttesterKeypair {
    pub fn initiate_attestation<R: RngCore>(
        &self,
        rng: &mut R,
        system: &SystemParams,
    ) -> (AttesterSession, StartSessionMsg) {
        let context = random_bytes(rng, system.context_len);
        let nonce = random_bytes(rng, system.nonce_len);
        tracing::debug!("started attestation session");
        (
            AttesterSession {
                context: context.clone(),
                nonce: nonce.clone(),
            },
            StartSessionMsg { context, nonce },
        )
    }

    /// Sign the claim of `request` for the committed secret. Returns the blinded signature for the claimer and
    /// the witness, which the attester needs to revoke the credential later.
    pub fn attest_claim<R: RngCore>(
        &self,
        rng: &mut R,
        session: AttesterSession,
        request: &AttestationRequest,
        update: &RevocationUpdate,
    ) -> Result<(IssueSignature, NonRevocationWitness), CredentialError> {
        let pk = &self.public_key;
        if pk.is_expired(&Utc::now()) {
            return Err(CredentialError::KeyExpired);
        }
        request.claim.validate()?;

        let spec = ProofSpec::new(
            commitment_statements(pk, request.commitment)?,
            MetaStatements::new(),
            vec![],
            Some(session.context),
        );
        if let Err(e) = request.proof.clone().verify::<R, Blake2b512>(
            rng,
            spec,
            Some(session.nonce),
            Default::default(),
        ) {
            tracing::warn!(error = ?e, "commitment proof did not verify");
            return Err(CredentialError::InvalidCommitmentProof);
        }

        let attributes = request.claim.to_attributes()?;
        if attributes.len() > pk.capacity as usize {
            return Err(CredentialError::TooManyAttributes(
                attributes.len(),
                pk.capacity as usize,
            ));
        }

        let timer = start_timer!(|| format!("Signing {} attributes", attributes.len()));
        let witness = issue_witness(
            rng,
            &self.secret_key.revocation,
            &pk.revocation,
            &update.signed_accumulator,
        )?;
        // The secret is the placeholder here, the commitment stands in for it
        let messages = credential_messages(pk, Fr::zero(), &attributes, witness.element)?;
        let uncommitted = messages
            .iter()
            .enumerate()
            .skip(1)
            .collect::<BTreeMap<_, _>>();
        let signature = SignatureG1::<Bls12_381>::new_with_committed_messages(
            rng,
            &request.commitment,
            uncommitted,
            &self.secret_key.signing,
            &pk.signature_params,
        )?;
        end_timer!(timer);

        tracing::debug!(attributes = attributes.len(), "attested claim");
        Ok((
            IssueSignature {
                signature,
                witness: witness.clone(),
            },
            witness,
        ))
    }

    /// Create the accumulator credentials of this attester are issued against
    pub fn create_accumulator<R: RngCore>(
        &self,
        rng: &mut R,
        timestamp: DateTime<Utc>,
    ) -> Result<RevocationUpdate, CredentialError> {
        create_accumulator(
            rng,
            &self.secret_key.revocation,
            &self.public_key.revocation,
            timestamp,
        )
    }

    pub fn revoke<R: RngCore>(
        &self,
        rng: &mut R,
        update: &RevocationUpdate,
        witnesses: &[&NonRevocationWitness],
        timestamp: DateTime<Utc>,
    ) -> Result<RevocationUpdate, CredentialError> {
        revoke(
            rng,
            &self.secret_key.revocation,
            &self.public_key.revocation,
            update,
            witnesses,
            timestamp,
        )
    }
}

impl Credential {
    pub fn witness(&self) -> &NonRevocationWitness {
        &self.non_revocation_witness
    }
}

impl AttestedClaim {
    /// All signed messages of the credential
    pub(crate) fn messages(
        &self,
        pk: &AttesterPublicKey,
    ) -> Result<Vec<Fr>, CredentialError> {
        credential_messages(
            pk,
            self.credential.secret,
            &self.claim.to_attributes()?,
            self.credential.non_revocation_witness.element,
        )
    }

    /// Bring the non-revocation witness up to date with `update`. The credential is left untouched on error.
    pub fn update(
        &mut self,
        attester_pk: &AttesterPublicKey,
        update: &RevocationUpdate,
    ) -> Result<(), CredentialError> {
        let refreshed = refresh_witness(
            &attester_pk.revocation,
            &self.credential.non_revocation_witness,
            update,
        )?;
        self.credential.non_revocation_witness = refreshed;
        Ok(())
    }
}
