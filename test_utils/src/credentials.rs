use anon_credentials::prelude::{
    AttestedClaim, AttesterKeypair, Claim, Claimer, NonRevocationWitness, RevocationUpdate,
    SystemParams,
};
use ark_std::rand::RngCore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

/// Time the accumulators of tests are created at
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Keys of an attester that expire in a day, together with its new accumulator
pub fn attester_setup<R: RngCore>(
    rng: &mut R,
    capacity: u32,
) -> (SystemParams, AttesterKeypair, RevocationUpdate) {
    let system = SystemParams::default();
    let keypair =
        AttesterKeypair::new(rng, &system, capacity, Utc::now() + Duration::days(1)).unwrap();
    let update = keypair.create_accumulator(rng, start_time()).unwrap();
    (system, keypair, update)
}

/// A claim with 7 attributes of all common types
pub fn sample_claim() -> Claim {
    Claim::try_from(json!({
        "ctype": "0x5366521b1cf4497cfe5f17663a7387a87bb8f2c4295d7c40f3140e7ee6afc41b",
        "contents": {
            "name": "Alice",
            "age": 29,
            "verified": true,
            "address": {
                "city": "Berlin",
                "zip.code": "10115"
            },
            "languages": ["de", "en"]
        }
    }))
    .unwrap()
}

/// Run the attestation protocol. Returns the claimer's credential and the attester's copy of its witness.
pub fn issue<R: RngCore>(
    rng: &mut R,
    system: &SystemParams,
    keypair: &AttesterKeypair,
    update: &RevocationUpdate,
    claimer: &Claimer,
    claim: Claim,
) -> (AttestedClaim, NonRevocationWitness) {
    let (attester_session, start) = keypair.initiate_attestation(rng, system);
    let (claimer_session, request) = claimer
        .request_attestation(rng, &keypair.public_key, &start, claim)
        .unwrap();
    let (issued, witness) = keypair
        .attest_claim(rng, attester_session, &request, update)
        .unwrap();
    let attested = claimer_session
        .build_credential(&keypair.public_key, issued)
        .unwrap();
    (attested, witness)
}
