//! Revocation with a positive VB accumulator.
//!
//! Every credential carries a random element that the attester never adds explicitly. All elements are members
//! of the accumulator until they are removed. Each accumulator state is signed by the attester together with a
//! running index and a timestamp, so claimers and verifiers can judge how recent a state is. Revoking `k`
//! credentials produces `k` [`RevocationEvent`]s, each carrying the accumulator after the removal and the hash of
//! the state it was applied to. Claimers replay the events in order to move their witnesses forward, events of
//! consecutive updates can be concatenated.

use crate::{
    error::CredentialError,
    setup::{RevocationPublicKey, RevocationSecretKey},
};
use ark_bls12_381::{Bls12_381, Fr, G1Affine};
use ark_serialize::CanonicalSerialize;
use ark_std::{end_timer, rand::RngCore, start_timer, UniformRand};
use bbs_plus::prelude::SignatureG1;
use blake2::Blake2b512;
use chrono::{DateTime, Timelike, Utc};
use digest::Digest;
use dock_crypto_utils::{hashing_utils::field_elem_from_try_and_incr, serde_utils::ArkObjectBytes};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use vb_accumulator::{
    positive::{Accumulator, PositiveAccumulator},
    witness::MembershipWitness,
};

/// An accumulator value signed by the attester
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedAccumulator {
    #[serde_as(as = "ArkObjectBytes")]
    pub accumulator: G1Affine,
    /// Number of elements removed since creation
    pub index: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde_as(as = "ArkObjectBytes")]
    pub signature: SignatureG1<Bls12_381>,
}

/// Removal of one element
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevocationEvent {
    pub index: u64,
    #[serde_as(as = "ArkObjectBytes")]
    pub element: Fr,
    /// Accumulator value after the removal
    #[serde_as(as = "ArkObjectBytes")]
    pub accumulator: G1Affine,
    /// Hash of the state the removal was applied to
    #[serde(with = "hex::serde")]
    pub parent_hash: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RevocationUpdate {
    pub signed_accumulator: SignedAccumulator,
    /// Empty when the accumulator was just created
    pub events: Vec<RevocationEvent>,
}

/// Proves that the credential element was not removed from the accumulator in `signed_accumulator`
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NonRevocationWitness {
    #[serde_as(as = "ArkObjectBytes")]
    pub element: Fr,
    #[serde_as(as = "ArkObjectBytes")]
    pub witness: MembershipWitness<G1Affine>,
    pub signed_accumulator: SignedAccumulator,
}

/// How recent the accumulator a presentation was made against must be
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessPolicy {
    /// The accumulator index must be at least this
    MinIndex(u64),
    /// The accumulator must have been signed at or after this time, unless it is still the latest one
    UpdatedAfter(DateTime<Utc>),
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::MinIndex(0)
    }
}

fn hash_to_bytes(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Blake2b512::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().to_vec()
}

fn point_bytes(p: &G1Affine) -> Result<Vec<u8>, CredentialError> {
    let mut bytes = vec![];
    p.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}

/// Blake2b-512 over the accumulator value and the number of removals that led to it
pub fn state_hash(accumulator: &G1Affine, index: u64) -> Result<Vec<u8>, CredentialError> {
    Ok(hash_to_bytes(&[
        &point_bytes(accumulator)?,
        &index.to_be_bytes(),
    ]))
}

impl SignedAccumulator {
    fn messages(
        accumulator: &G1Affine,
        index: u64,
        timestamp: &DateTime<Utc>,
    ) -> Result<[Fr; 3], CredentialError> {
        Ok([
            field_elem_from_try_and_incr::<Fr, Blake2b512>(&point_bytes(accumulator)?),
            Fr::from(index),
            Fr::from(timestamp.timestamp()),
        ])
    }

    /// Sign an accumulator state. Sub second precision of `timestamp` is dropped.
    pub fn new<R: RngCore>(
        rng: &mut R,
        accumulator: G1Affine,
        index: u64,
        timestamp: DateTime<Utc>,
        sk: &RevocationSecretKey,
        pk: &RevocationPublicKey,
    ) -> Result<Self, CredentialError> {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);
        let messages = Self::messages(&accumulator, index, &timestamp)?;
        let signature =
            SignatureG1::<Bls12_381>::new(rng, &messages, &sk.signing, &pk.signature_params)?;
        Ok(Self {
            accumulator,
            index,
            timestamp,
            signature,
        })
    }

    pub fn verify(&self, pk: &RevocationPublicKey) -> Result<(), CredentialError> {
        let messages = Self::messages(&self.accumulator, self.index, &self.timestamp)?;
        self.signature
            .verify(
                &messages,
                pk.signing_public_key.clone(),
                pk.signature_params.clone(),
            )
            .map_err(|_| CredentialError::InvalidAccumulatorSignature)
    }

    pub fn is_valid(&self, pk: &RevocationPublicKey) -> bool {
        self.verify(pk).is_ok()
    }

    pub fn positive_accumulator(&self) -> PositiveAccumulator<G1Affine> {
        PositiveAccumulator::from_value(self.accumulator)
    }

    /// Hash of the state described by the accumulator, see [`state_hash`]
    pub fn state_hash(&self) -> Result<Vec<u8>, CredentialError> {
        state_hash(&self.accumulator, self.index)
    }
}

impl RevocationEvent {
    /// Hash of the state after this removal
    pub fn state_hash(&self) -> Result<Vec<u8>, CredentialError> {
        state_hash(&self.accumulator, self.index)
    }
}

impl NonRevocationWitness {
    /// Index of the accumulator the witness is valid for
    pub fn index(&self) -> u64 {
        self.signed_accumulator.index
    }

    /// Check the accumulator signature and the membership of the element
    pub fn verify(&self, pk: &RevocationPublicKey) -> Result<(), CredentialError> {
        self.signed_accumulator.verify(pk)?;
        if self.signed_accumulator.positive_accumulator().verify_membership(
            &self.element,
            &self.witness,
            &pk.accumulator_public_key,
            &pk.accumulator_params,
        ) {
            Ok(())
        } else {
            Err(CredentialError::InvalidWitness)
        }
    }
}

/// Create an accumulator from which nothing was removed yet
pub fn create_accumulator<R: RngCore>(
    rng: &mut R,
    sk: &RevocationSecretKey,
    pk: &RevocationPublicKey,
    timestamp: DateTime<Utc>,
) -> Result<RevocationUpdate, CredentialError> {
    let accumulator = PositiveAccumulator::<G1Affine>::initialize(&pk.accumulator_params);
    let signed_accumulator =
        SignedAccumulator::new(rng, *accumulator.value(), 0, timestamp, sk, pk)?;
    tracing::debug!(timestamp = %signed_accumulator.timestamp, "created accumulator");
    Ok(RevocationUpdate {
        signed_accumulator,
        events: vec![],
    })
}

/// Remove the elements of `witnesses` from the accumulator of `update`, one event per witness
pub fn revoke<R: RngCore>(
    rng: &mut R,
    sk: &RevocationSecretKey,
    pk: &RevocationPublicKey,
    update: &RevocationUpdate,
    witnesses: &[&NonRevocationWitness],
    timestamp: DateTime<Utc>,
) -> Result<RevocationUpdate, CredentialError> {
    if witnesses.is_empty() {
        return Err(CredentialError::NothingToRevoke);
    }
    update.signed_accumulator.verify(pk)?;

    let mut accumulator = update.signed_accumulator.positive_accumulator();
    let mut index = update.signed_accumulator.index;
    let mut parent_hash = update.signed_accumulator.state_hash()?;
    let mut events = Vec::with_capacity(witnesses.len());
    for w in witnesses {
        index += 1;
        let new_value = accumulator.compute_new_post_remove(&w.element, &sk.accumulator);
        let event = RevocationEvent {
            index,
            element: w.element,
            accumulator: new_value,
            parent_hash,
        };
        parent_hash = event.state_hash()?;
        events.push(event);
        accumulator = PositiveAccumulator::from_value(new_value);
    }

    let signed_accumulator =
        SignedAccumulator::new(rng, *accumulator.value(), index, timestamp, sk, pk)?;
    tracing::info!(
        revoked = events.len(),
        index = signed_accumulator.index,
        "revoked credentials"
    );
    Ok(RevocationUpdate {
        signed_accumulator,
        events,
    })
}

/// Witness for a fresh random element, valid for `signed_accumulator`
pub fn issue_witness<R: RngCore>(
    rng: &mut R,
    sk: &RevocationSecretKey,
    pk: &RevocationPublicKey,
    signed_accumulator: &SignedAccumulator,
) -> Result<NonRevocationWitness, CredentialError> {
    signed_accumulator.verify(pk)?;
    let element = Fr::rand(rng);
    let witness = signed_accumulator
        .positive_accumulator()
        .compute_membership_witness(&element, &sk.accumulator);
    Ok(NonRevocationWitness {
        element,
        witness,
        signed_accumulator: signed_accumulator.clone(),
    })
}

/// Move `witness` forward to the accumulator of `update` by replaying the events it has not seen. Returns the
/// witness unchanged when the update is not newer than the witness.
pub fn refresh_witness(
    pk: &RevocationPublicKey,
    witness: &NonRevocationWitness,
    update: &RevocationUpdate,
) -> Result<NonRevocationWitness, CredentialError> {
    witness.verify(pk)?;
    update.signed_accumulator.verify(pk)?;

    let current = witness.index();
    let target = update.signed_accumulator.index;
    if target <= current {
        return Ok(witness.clone());
    }

    let skipped = update.events.iter().take_while(|e| e.index <= current).count();
    let (seen, new_events) = update.events.split_at(skipped);
    match new_events.first() {
        Some(first) if first.index == current + 1 => (),
        Some(first) => return Err(CredentialError::WitnessTooOld(current, first.index)),
        None => return Err(CredentialError::WitnessTooOld(current, target)),
    }

    let timer = start_timer!(|| format!("Replaying {} events", new_events.len()));
    let mut parent_hash = match seen.last() {
        Some(e) => e.state_hash()?,
        None => witness.signed_accumulator.state_hash()?,
    };
    let mut expected_index = current + 1;
    let mut membership = witness.witness.clone();
    let mut accumulator = witness.signed_accumulator.accumulator;
    for event in new_events {
        if event.index != expected_index || event.parent_hash != parent_hash {
            return Err(CredentialError::BrokenEventChain(event.index));
        }
        if event.element == witness.element {
            return Err(CredentialError::WitnessRevoked);
        }
        membership =
            membership.update_after_removal(&witness.element, &event.element, &event.accumulator)?;
        accumulator = event.accumulator;
        parent_hash = event.state_hash()?;
        expected_index += 1;
    }
    end_timer!(timer);

    if expected_index - 1 != target || accumulator != update.signed_accumulator.accumulator {
        return Err(CredentialError::AccumulatorMismatch);
    }
    let refreshed = NonRevocationWitness {
        element: witness.element,
        witness: membership,
        signed_accumulator: update.signed_accumulator.clone(),
    };
    refreshed.verify(pk)?;
    tracing::debug!(from = current, to = target, "refreshed witness");
    Ok(refreshed)
}

/// Decide whether the accumulator a presentation was made against is recent enough. `latest` is the newest
/// signed accumulator the verifier knows of.
pub fn check_freshness(
    pk: &RevocationPublicKey,
    proof_accumulator: &SignedAccumulator,
    latest: Option<&SignedAccumulator>,
    policy: &FreshnessPolicy,
) -> bool {
    if let Err(e) = proof_accumulator.verify(pk) {
        tracing::warn!(error = ?e, "accumulator of presentation not signed by attester");
        return false;
    }
    match policy {
        FreshnessPolicy::MinIndex(min) => proof_accumulator.index >= *min,
        FreshnessPolicy::UpdatedAfter(threshold) => {
            if proof_accumulator.timestamp >= *threshold {
                return true;
            }
            // An old accumulator is fine as long as nothing was revoked since
            match latest {
                Some(latest) => {
                    latest.is_valid(pk)
                        && latest.index == proof_accumulator.index
                        && latest.accumulator == proof_accumulator.accumulator
                }
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{AttesterKeypair, SystemParams};
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use chrono::Duration;

    fn setup(rng: &mut StdRng) -> (RevocationSecretKey, RevocationPublicKey) {
        let keys = AttesterKeypair::new(
            rng,
            &SystemParams::default(),
            1,
            Utc::now() + Duration::days(1),
        )
        .unwrap();
        (keys.secret_key.revocation, keys.public_key.revocation)
    }

    #[test]
    fn signed_accumulator() {
        let mut rng = StdRng::seed_from_u64(0u64);
        let (sk, pk) = setup(&mut rng);
        let (_, other_pk) = setup(&mut rng);
        let now = Utc::now();
        let update = create_accumulator(&mut rng, &sk, &pk, now).unwrap();
        assert!(update.events.is_empty());

        let signed = &update.signed_accumulator;
        assert_eq!(signed.index, 0);
        assert_eq!(signed.timestamp.timestamp(), now.timestamp());
        assert_eq!(signed.timestamp.nanosecond(), 0);
        signed.verify(&pk).unwrap();
        assert!(!signed.is_valid(&other_pk));

        // A new accumulator starts at the initial value of the parameters
        let initial = PositiveAccumulator::<G1Affine>::initialize(&pk.accumulator_params);
        assert_eq!(signed.positive_accumulator().value(), initial.value());

        let mut tampered = signed.clone();
        tampered.index = 1;
        assert!(matches!(
            tampered.verify(&pk),
            Err(CredentialError::InvalidAccumulatorSignature)
        ));
        let mut tampered = signed.clone();
        tampered.timestamp = tampered.timestamp + Duration::seconds(1);
        assert!(!tampered.is_valid(&pk));

        let ser = serde_json::to_string(&update).unwrap();
        let deser = serde_json::from_str::<RevocationUpdate>(&ser).unwrap();
        assert_eq!(deser, update);
        deser.signed_accumulator.verify(&pk).unwrap();
    }

    #[test]
    fn revoke_and_refresh() {
        let mut rng = StdRng::seed_from_u64(0u64);
        let (sk, pk) = setup(&mut rng);
        let now = Utc::now();
        let update = create_accumulator(&mut rng, &sk, &pk, now).unwrap();

        let witnesses = (0..4)
            .map(|_| issue_witness(&mut rng, &sk, &pk, &update.signed_accumulator).unwrap())
            .collect::<Vec<_>>();
        for w in &witnesses {
            w.verify(&pk).unwrap();
        }

        assert!(matches!(
            revoke(&mut rng, &sk, &pk, &update, &[], now),
            Err(CredentialError::NothingToRevoke)
        ));

        let update_1 = revoke(&mut rng, &sk, &pk, &update, &[&witnesses[1]], now).unwrap();
        assert_eq!(update_1.signed_accumulator.index, 1);
        assert_eq!(update_1.events.len(), 1);
        assert_eq!(update_1.events[0].index, 1);
        assert_eq!(
            update_1.events[0].parent_hash,
            update.signed_accumulator.state_hash().unwrap()
        );

        let update_2 = revoke(
            &mut rng,
            &sk,
            &pk,
            &update_1,
            &[&witnesses[2], &witnesses[3]],
            now + Duration::minutes(1),
        )
        .unwrap();
        assert_eq!(update_2.signed_accumulator.index, 3);
        assert_eq!(
            update_2.events.iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(
            update_2.events[1].parent_hash,
            update_2.events[0].state_hash().unwrap()
        );

        // A revoked witness cannot be refreshed, the others can
        assert!(matches!(
            refresh_witness(&pk, &witnesses[1], &update_1),
            Err(CredentialError::WitnessRevoked)
        ));
        let w0_1 = refresh_witness(&pk, &witnesses[0], &update_1).unwrap();
        assert_eq!(w0_1.index(), 1);
        let w2_1 = refresh_witness(&pk, &witnesses[2], &update_1).unwrap();
        assert!(matches!(
            refresh_witness(&pk, &w2_1, &update_2),
            Err(CredentialError::WitnessRevoked)
        ));
        let w0_2 = refresh_witness(&pk, &w0_1, &update_2).unwrap();
        assert_eq!(w0_2.index(), 3);
        w0_2.verify(&pk).unwrap();

        // The old witness no longer verifies against the new accumulator
        assert!(!update_2.signed_accumulator.positive_accumulator().verify_membership(
            &witnesses[0].element,
            &witnesses[0].witness,
            &pk.accumulator_public_key,
            &pk.accumulator_params
        ));

        // Refreshing with an update that is not newer changes nothing
        assert_eq!(refresh_witness(&pk, &w0_2, &update_2).unwrap(), w0_2);
        assert_eq!(refresh_witness(&pk, &w0_2, &update_1).unwrap(), w0_2);

        // Events 2 and 3 are not enough for a witness at index 0
        assert!(matches!(
            refresh_witness(&pk, &witnesses[0], &update_2),
            Err(CredentialError::WitnessTooOld(0, 2))
        ));
    }

    #[test]
    fn refresh_skips_seen_events() {
        let mut rng = StdRng::seed_from_u64(1u64);
        let (sk, pk) = setup(&mut rng);
        let now = Utc::now();
        let update = create_accumulator(&mut rng, &sk, &pk, now).unwrap();
        let witnesses = (0..3)
            .map(|_| issue_witness(&mut rng, &sk, &pk, &update.signed_accumulator).unwrap())
            .collect::<Vec<_>>();
        let update_2 = revoke(
            &mut rng,
            &sk,
            &pk,
            &update,
            &[&witnesses[1], &witnesses[2]],
            now,
        )
        .unwrap();

        // Build a witness at index 1 by hand from the first event
        let first = &update_2.events[0];
        let update_1 = RevocationUpdate {
            signed_accumulator: SignedAccumulator::new(
                &mut rng,
                first.accumulator,
                1,
                now,
                &sk,
                &pk,
            )
            .unwrap(),
            events: vec![first.clone()],
        };
        let w0_1 = refresh_witness(&pk, &witnesses[0], &update_1).unwrap();
        let w0_2 = refresh_witness(&pk, &w0_1, &update_2).unwrap();
        assert_eq!(w0_2, refresh_witness(&pk, &witnesses[0], &update_2).unwrap());
    }

    #[test]
    fn refresh_rejects_tampered_updates() {
        let mut rng = StdRng::seed_from_u64(2u64);
        let (sk, pk) = setup(&mut rng);
        let now = Utc::now();
        let update = create_accumulator(&mut rng, &sk, &pk, now).unwrap();
        let witnesses = (0..3)
            .map(|_| issue_witness(&mut rng, &sk, &pk, &update.signed_accumulator).unwrap())
            .collect::<Vec<_>>();
        let update_2 = revoke(
            &mut rng,
            &sk,
            &pk,
            &update,
            &[&witnesses[1], &witnesses[2]],
            now,
        )
        .unwrap();

        let mut dropped = update_2.clone();
        dropped.events.remove(1);
        assert!(matches!(
            refresh_witness(&pk, &witnesses[0], &dropped),
            Err(CredentialError::AccumulatorMismatch)
        ));

        let mut unchained = update_2.clone();
        unchained.events[1].parent_hash = vec![0; 64];
        assert!(matches!(
            refresh_witness(&pk, &witnesses[0], &unchained),
            Err(CredentialError::BrokenEventChain(2))
        ));

        let mut reordered = update_2.clone();
        reordered.events.swap(0, 1);
        assert!(refresh_witness(&pk, &witnesses[0], &reordered).is_err());

        let mut resigned = update_2.clone();
        resigned.signed_accumulator.index = 5;
        assert!(matches!(
            refresh_witness(&pk, &witnesses[0], &resigned),
            Err(CredentialError::InvalidAccumulatorSignature)
        ));

        let mut broken_witness = witnesses[0].clone();
        broken_witness.element = Fr::rand(&mut rng);
        assert!(matches!(
            refresh_witness(&pk, &broken_witness, &update_2),
            Err(CredentialError::InvalidWitness)
        ));
    }

    #[test]
    fn freshness() {
        let mut rng = StdRng::seed_from_u64(3u64);
        let (sk, pk) = setup(&mut rng);
        let (other_sk, other_pk) = setup(&mut rng);
        let t0 = Utc::now() - Duration::days(2);
        let t1 = Utc::now() - Duration::days(1);

        let update = create_accumulator(&mut rng, &sk, &pk, t0).unwrap();
        let w = issue_witness(&mut rng, &sk, &pk, &update.signed_accumulator).unwrap();
        let update_1 = revoke(&mut rng, &sk, &pk, &update, &[&w], t1).unwrap();
        let acc_0 = &update.signed_accumulator;
        let acc_1 = &update_1.signed_accumulator;

        assert!(check_freshness(&pk, acc_0, None, &FreshnessPolicy::MinIndex(0)));
        assert!(!check_freshness(&pk, acc_0, None, &FreshnessPolicy::MinIndex(1)));
        assert!(check_freshness(&pk, acc_1, None, &FreshnessPolicy::MinIndex(1)));
        assert!(check_freshness(&pk, acc_1, None, &FreshnessPolicy::default()));

        let between = FreshnessPolicy::UpdatedAfter(t0 + Duration::hours(12));
        assert!(check_freshness(&pk, acc_1, None, &between));
        assert!(!check_freshness(&pk, acc_0, None, &between));
        // Old, but nothing newer exists
        assert!(check_freshness(&pk, acc_0, Some(acc_0), &between));
        // Old and superseded
        assert!(!check_freshness(&pk, acc_0, Some(acc_1), &between));

        let future = FreshnessPolicy::UpdatedAfter(Utc::now() + Duration::days(1));
        assert!(check_freshness(&pk, acc_1, Some(acc_1), &future));
        assert!(!check_freshness(&pk, acc_1, None, &future));

        // Accumulators of another attester never count
        let foreign = create_accumulator(&mut rng, &other_sk, &other_pk, Utc::now()).unwrap();
        assert!(!check_freshness(
            &pk,
            &foreign.signed_accumulator,
            None,
            &FreshnessPolicy::MinIndex(0)
        ));
        assert!(!check_freshness(&pk, acc_0, Some(&foreign.signed_accumulator), &future));

        let ser = serde_json::to_string(&between).unwrap();
        assert_eq!(serde_json::from_str::<FreshnessPolicy>(&ser).unwrap(), between);
    }
}
