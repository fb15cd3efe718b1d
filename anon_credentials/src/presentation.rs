//! Selective disclosure of attributes from one or several credentials.
//!
//! A presentation is a single [`Proof`] of the composite proof system. Each credential contributes a proof of
//! knowledge of its BBS+ signature that reveals the requested attributes and, when non-revocation is required,
//! a proof of membership of its revocation element in the accumulator its witness is valid for. The membership
//! is tied to the signature by a witness equality with the message at the revocation index.
//!
//! A combined presentation proves all credentials in one proof under one context and nonce, and additionally
//! proves that all credentials carry the same claimer secret. Proofs created separately do not verify as a
//! combined presentation since their challenges were not derived from the combined statements.

use crate::{
    attestation::AttestedClaim,
    attribute::{attribute_indices, reconstruct_claim, select_attributes, sort_and_deduplicate, Attribute},
    claim::Claim,
    error::CredentialError,
    revocation::{check_freshness, FreshnessPolicy, SignedAccumulator},
    setup::{AttesterPublicKey, SystemParams},
    util::random_bytes,
};
use ark_bls12_381::{Bls12_381, Fr};
use ark_std::{
    collections::{BTreeMap, BTreeSet},
    end_timer,
    rand::RngCore,
    start_timer,
};
use blake2::Blake2b512;
use dock_crypto_utils::serde_utils::ArkObjectBytes;
use proof_system::{
    prelude::{EqualWitnesses, MetaStatements, Proof, WitnessRef, Witnesses},
    proof_spec::ProofSpec,
    statement::{
        accumulator::VBAccumulatorMembership,
        bbs_plus::{PoKBBSSignatureG1Prover, PoKBBSSignatureG1Verifier},
        Statement, Statements,
    },
    witness::{Membership as MembershipWit, PoKBBSSignatureG1 as PoKBBSSignatureG1Wit},
};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// What a verifier wants to see from one credential
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPresentationRequest {
    pub requested_attributes: Vec<String>,
    pub require_non_revocation_proof: bool,
    /// Only considered when a non-revocation proof is required
    pub freshness: FreshnessPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationRequest {
    pub partial_request: PartialPresentationRequest,
    pub context: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Kept by the verifier to check the response to the [`PresentationRequest`] it sent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierSession {
    pub partial_request: PartialPresentationRequest,
    pub context: Vec<u8>,
    pub nonce: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedPresentationRequest {
    pub partial_requests: Vec<PartialPresentationRequest>,
    pub context: Vec<u8>,
    pub nonce: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedVerifierSession {
    pub partial_requests: Vec<PartialPresentationRequest>,
    pub context: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// What a presentation discloses about one credential
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialPresentation {
    /// Disclosed attributes keyed by their signing index
    pub attributes: BTreeMap<usize, Attribute>,
    /// Accumulator the non-revocation proof was created against
    pub accumulator: Option<SignedAccumulator>,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresentationResponse {
    #[serde_as(as = "ArkObjectBytes")]
    pub proof: Proof<Bls12_381>,
    pub partial: PartialPresentation,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombinedPresentationResponse {
    #[serde_as(as = "ArkObjectBytes")]
    pub proof: Proof<Bls12_381>,
    pub partials: Vec<PartialPresentation>,
}

impl PartialPresentationRequest {
    pub fn new<I, S>(
        requested_attributes: I,
        require_non_revocation_proof: bool,
        freshness: FreshnessPolicy,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requested_attributes: requested_attributes.into_iter().map(Into::into).collect(),
            require_non_revocation_proof,
            freshness,
        }
    }
}

fn new_context_and_nonce<R: RngCore>(rng: &mut R, system: &SystemParams) -> (Vec<u8>, Vec<u8>) {
    (
        random_bytes(rng, system.context_len),
        random_bytes(rng, system.nonce_len),
    )
}

pub fn request_presentation<R, I, S>(
    rng: &mut R,
    system: &SystemParams,
    requested_attributes: I,
    require_non_revocation_proof: bool,
    freshness: FreshnessPolicy,
) -> (VerifierSession, PresentationRequest)
where
    R: RngCore,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let partial_request = PartialPresentationRequest::new(
        requested_attributes,
        require_non_revocation_proof,
        freshness,
    );
    let (context, nonce) = new_context_and_nonce(rng, system);
    (
        VerifierSession {
            partial_request: partial_request.clone(),
            context: context.clone(),
            nonce: nonce.clone(),
        },
        PresentationRequest {
            partial_request,
            context,
            nonce,
        },
    )
}

/// One context and nonce shared by all partial requests
pub fn request_combined_presentation<R: RngCore>(
    rng: &mut R,
    system: &SystemParams,
    partial_requests: Vec<PartialPresentationRequest>,
) -> (CombinedVerifierSession, CombinedPresentationRequest) {
    let (context, nonce) = new_context_and_nonce(rng, system);
    (
        CombinedVerifierSession {
            partial_requests: partial_requests.clone(),
            context: context.clone(),
            nonce: nonce.clone(),
        },
        CombinedPresentationRequest {
            partial_requests,
            context,
            nonce,
        },
    )
}

pub fn build_presentation<R: RngCore>(
    rng: &mut R,
    attester_pk: &AttesterPublicKey,
    attested_claim: &AttestedClaim,
    request: &PresentationRequest,
) -> Result<PresentationResponse, CredentialError> {
    let (proof, mut partials) = prove(
        rng,
        &[(attester_pk, attested_claim, &request.partial_request)],
        &request.context,
        &request.nonce,
    )?;
    let partial = partials.pop().ok_or(CredentialError::EmptyRequest)?;
    Ok(PresentationResponse { proof, partial })
}

/// `attester_pks[i]` is the key that issued `attested_claims[i]`, which answers `request.partial_requests[i]`
pub fn build_combined_presentation<R: RngCore>(
    rng: &mut R,
    attester_pks: &[&AttesterPublicKey],
    attested_claims: &[&AttestedClaim],
    request: &CombinedPresentationRequest,
) -> Result<CombinedPresentationResponse, CredentialError> {
    let count = request.partial_requests.len();
    if count == 0 {
        return Err(CredentialError::EmptyRequest);
    }
    if attester_pks.len() != count {
        return Err(CredentialError::UnequalLengths(count, attester_pks.len()));
    }
    if attested_claims.len() != count {
        return Err(CredentialError::UnequalLengths(count, attested_claims.len()));
    }
    let secret = &attested_claims[0].credential.secret;
    if let Some(i) = attested_claims
        .iter()
        .position(|c| c.credential.secret != *secret)
    {
        return Err(CredentialError::SecretMismatch(i));
    }

    let slots = attester_pks
        .iter()
        .zip(attested_claims.iter())
        .zip(request.partial_requests.iter())
        .map(|((pk, claim), req)| (*pk, *claim, req))
        .collect::<Vec<_>>();
    let (proof, partials) = prove(rng, &slots, &request.context, &request.nonce)?;
    Ok(CombinedPresentationResponse { proof, partials })
}

/// Verify a presentation. Returns `false` without a claim when the proof does not verify, the disclosed
/// attributes differ from the requested ones or the accumulator is not fresh enough. Errors only on malformed
/// input.
pub fn verify_presentation<R: RngCore>(
    rng: &mut R,
    attester_pk: &AttesterPublicKey,
    latest_accumulator: Option<&SignedAccumulator>,
    response: &PresentationResponse,
    session: &VerifierSession,
) -> Result<(bool, Option<Claim>), CredentialError> {
    let (verified, mut claims) = verify(
        rng,
        &[(
            attester_pk,
            latest_accumulator,
            &response.partial,
            &session.partial_request,
        )],
        &response.proof,
        &session.context,
        &session.nonce,
    )?;
    Ok((verified, claims.pop()))
}

/// Verify a combined presentation. Fails as a whole when any credential fails.
pub fn verify_combined_presentation<R: RngCore>(
    rng: &mut R,
    attester_pks: &[&AttesterPublicKey],
    latest_accumulators: &[Option<&SignedAccumulator>],
    response: &CombinedPresentationResponse,
    session: &CombinedVerifierSession,
) -> Result<(bool, Vec<Claim>), CredentialError> {
    let count = session.partial_requests.len();
    if count == 0 {
        return Err(CredentialError::EmptyRequest);
    }
    for len in [
        attester_pks.len(),
        latest_accumulators.len(),
        response.partials.len(),
    ] {
        if len != count {
            return Err(CredentialError::UnequalLengths(count, len));
        }
    }
    let slots = attester_pks
        .iter()
        .zip(latest_accumulators.iter())
        .zip(response.partials.iter())
        .zip(session.partial_requests.iter())
        .map(|(((pk, latest), partial), req)| (*pk, *latest, partial, req))
        .collect::<Vec<_>>();
    verify(
        rng,
        &slots,
        &response.proof,
        &session.context,
        &session.nonce,
    )
}

fn membership_statement(
    pk: &AttesterPublicKey,
    accumulator: &SignedAccumulator,
) -> Statement<Bls12_381> {
    VBAccumulatorMembership::new_statement_from_params(
        pk.revocation.accumulator_params.clone(),
        pk.revocation.accumulator_public_key.clone(),
        pk.revocation.proving_key.clone(),
        accumulator.accumulator,
    )
}

/// The accumulator member is the only witness of a membership statement, so it is at index 0
fn revocation_equality(
    pk: &AttesterPublicKey,
    signature_statement: usize,
    membership_statement: usize,
) -> EqualWitnesses {
    EqualWitnesses(
        [
            (signature_statement, pk.revocation_index()),
            (membership_statement, 0),
        ]
        .into_iter()
        .collect::<BTreeSet<WitnessRef>>(),
    )
}

fn prove<R: RngCore>(
    rng: &mut R,
    slots: &[(&AttesterPublicKey, &AttestedClaim, &PartialPresentationRequest)],
    context: &[u8],
    nonce: &[u8],
) -> Result<(Proof<Bls12_381>, Vec<PartialPresentation>), CredentialError> {
    let mut statements = Statements::<Bls12_381>::new();
    let mut meta_statements = MetaStatements::new();
    let mut witnesses = Witnesses::<Bls12_381>::new();
    let mut partials = Vec::with_capacity(slots.len());
    let mut secrets = BTreeSet::<WitnessRef>::new();

    for (pk, attested, request) in slots {
        if request.requested_attributes.is_empty() {
            return Err(CredentialError::EmptyRequest);
        }
        pk.validate()?;
        let attributes = attested.claim.to_attributes()?;
        let indices = attribute_indices(&request.requested_attributes, &attributes)?;
        let revealed_indices = indices.iter().copied().collect::<BTreeSet<_>>();
        let (revealed, unrevealed): (BTreeMap<usize, Fr>, BTreeMap<usize, Fr>) = attested
            .messages(pk)?
            .into_iter()
            .enumerate()
            .partition(|(i, _)| revealed_indices.contains(i));

        let signature_statement = statements.add(PoKBBSSignatureG1Prover::new_statement_from_params(
            pk.signature_params.clone(),
            revealed,
        ));
        witnesses.add(PoKBBSSignatureG1Wit::new_as_witness(
            attested.credential.signature.clone(),
            unrevealed,
        ));
        secrets.insert((signature_statement, 0));

        let accumulator = if request.require_non_revocation_proof {
            let witness = attested.credential.witness();
            witness.verify(&pk.revocation)?;
            let accumulator_statement =
                statements.add(membership_statement(pk, &witness.signed_accumulator));
            witnesses.add(MembershipWit::new_as_witness(
                witness.element,
                witness.witness.clone(),
            ));
            meta_statements.add_witness_equality(revocation_equality(
                pk,
                signature_statement,
                accumulator_statement,
            ));
            Some(witness.signed_accumulator.clone())
        } else {
            None
        };

        partials.push(PartialPresentation {
            attributes: select_attributes(&indices, &attributes)?,
            accumulator,
        });
    }
    if secrets.len() > 1 {
        meta_statements.add_witness_equality(EqualWitnesses(secrets));
    }

    let spec = ProofSpec::new(statements, meta_statements, vec![], Some(context.to_vec()));
    spec.validate()?;
    let timer = start_timer!(|| format!("Proving {} credentials", slots.len()));
    let proof = Proof::new::<R, Blake2b512>(
        rng,
        spec,
        witnesses,
        Some(nonce.to_vec()),
        Default::default(),
    )?
    .0;
    end_timer!(timer);
    Ok((proof, partials))
}

fn verify<R: RngCore>(
    rng: &mut R,
    slots: &[(
        &AttesterPublicKey,
        Option<&SignedAccumulator>,
        &PartialPresentation,
        &PartialPresentationRequest,
    )],
    proof: &Proof<Bls12_381>,
    context: &[u8],
    nonce: &[u8],
) -> Result<(bool, Vec<Claim>), CredentialError> {
    let mut statements = Statements::<Bls12_381>::new();
    let mut meta_statements = MetaStatements::new();
    let mut secrets = BTreeSet::<WitnessRef>::new();
    let mut consistent = true;

    for (pk, _, partial, request) in slots {
        if request.requested_attributes.is_empty() {
            return Err(CredentialError::EmptyRequest);
        }
        pk.validate()?;
        let mut revealed = BTreeMap::new();
        for (&i, attribute) in &partial.attributes {
            if i == 0 || i > pk.capacity as usize {
                return Err(CredentialError::InvalidAttributeIndex(i));
            }
            revealed.insert(i, attribute.to_message());
        }

        let (requested, _) = sort_and_deduplicate(&request.requested_attributes);
        let mut disclosed = partial
            .attributes
            .values()
            .map(|a| a.name.clone())
            .collect::<Vec<_>>();
        disclosed.sort();
        if requested != disclosed {
            tracing::warn!(?requested, ?disclosed, "disclosed attributes differ from the requested");
            consistent = false;
        }

        let signature_statement =
            statements.add(PoKBBSSignatureG1Verifier::new_statement_from_params(
                pk.signature_params.clone(),
                pk.public_key.clone(),
                revealed,
            ));
        secrets.insert((signature_statement, 0));

        if request.require_non_revocation_proof {
            match &partial.accumulator {
                Some(accumulator) => {
                    let accumulator_statement =
                        statements.add(membership_statement(pk, accumulator));
                    meta_statements.add_witness_equality(revocation_equality(
                        pk,
                        signature_statement,
                        accumulator_statement,
                    ));
                }
                None => {
                    tracing::warn!("non-revocation proof required but no accumulator given");
                    consistent = false;
                }
            }
        }
    }
    if !consistent {
        return Ok((false, vec![]));
    }
    if secrets.len() > 1 {
        meta_statements.add_witness_equality(EqualWitnesses(secrets));
    }

    let spec = ProofSpec::new(statements, meta_statements, vec![], Some(context.to_vec()));
    let timer = start_timer!(|| format!("Verifying {} credentials", slots.len()));
    let result = proof.clone().verify::<R, Blake2b512>(
        rng,
        spec,
        Some(nonce.to_vec()),
        Default::default(),
    );
    end_timer!(timer);
    if let Err(e) = result {
        tracing::warn!(error = ?e, "presentation proof did not verify");
        return Ok((false, vec![]));
    }

    for (i, (pk, latest, partial, request)) in slots.iter().enumerate() {
        if !request.require_non_revocation_proof {
            continue;
        }
        let fresh = partial.accumulator.as_ref().map_or(false, |accumulator| {
            check_freshness(&pk.revocation, accumulator, *latest, &request.freshness)
        });
        if !fresh {
            tracing::warn!(credential = i, "accumulator of presentation is not fresh");
            return Ok((false, vec![]));
        }
    }

    let claims = slots
        .iter()
        .map(|(_, _, partial, _)| reconstruct_claim(&partial.attributes))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((true, claims))
}
