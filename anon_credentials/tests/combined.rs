use anon_credentials::prelude::{
    build_combined_presentation, build_presentation, request_combined_presentation,
    verify_combined_presentation, AttestedClaim, AttesterKeypair, Claim, Claimer,
    CombinedPresentationResponse, CredentialError, FreshnessPolicy, PartialPresentationRequest,
    PresentationRequest, RevocationUpdate, SystemParams,
};
use ark_std::rand::{rngs::StdRng, SeedableRng};
use chrono::Duration;
use serde_json::json;
use test_utils::credentials::{attester_setup, issue, sample_claim, start_time};

struct Issuer {
    system: SystemParams,
    keypair: AttesterKeypair,
    update: RevocationUpdate,
}

fn issuer(rng: &mut StdRng, capacity: u32) -> Issuer {
    let (system, keypair, update) = attester_setup(rng, capacity);
    Issuer {
        system,
        keypair,
        update,
    }
}

fn degree_claim() -> Claim {
    Claim::try_from(json!({
        "ctype": "0x11",
        "contents": {"degree": "MSc", "university": "TU Berlin", "year": 2018}
    }))
    .unwrap()
}

fn partial(names: &[&str], require_non_revocation_proof: bool) -> PartialPresentationRequest {
    PartialPresentationRequest::new(
        names.iter().copied(),
        require_non_revocation_proof,
        FreshnessPolicy::default(),
    )
}

/// Two credentials of the same claimer from two attesters
fn setup(rng: &mut StdRng) -> (Issuer, Issuer, AttestedClaim, AttestedClaim) {
    let id_issuer = issuer(rng, 8);
    let degree_issuer = issuer(rng, 4);
    let claimer = Claimer::new(rng);
    let (id, _) = issue(
        rng,
        &id_issuer.system,
        &id_issuer.keypair,
        &id_issuer.update,
        &claimer,
        sample_claim(),
    );
    let (degree, _) = issue(
        rng,
        &degree_issuer.system,
        &degree_issuer.keypair,
        &degree_issuer.update,
        &claimer,
        degree_claim(),
    );
    (id_issuer, degree_issuer, id, degree)
}

#[test]
fn combine_credentials_of_two_attesters() {
    let mut rng = StdRng::seed_from_u64(0u64);
    let (id_issuer, degree_issuer, id, degree) = setup(&mut rng);
    let pks = [&id_issuer.keypair.public_key, &degree_issuer.keypair.public_key];

    let (session, request) = request_combined_presentation(
        &mut rng,
        &id_issuer.system,
        vec![
            partial(&["contents.name"], true),
            partial(&["contents.degree", "contents.year"], false),
        ],
    );
    let response = build_combined_presentation(&mut rng, &pks, &[&id, &degree], &request).unwrap();
    assert_eq!(response.partials.len(), 2);
    assert!(response.partials[0].accumulator.is_some());
    assert!(response.partials[1].accumulator.is_none());

    let (verified, claims) =
        verify_combined_presentation(&mut rng, &pks, &[None, None], &response, &session).unwrap();
    assert!(verified);
    assert_eq!(
        claims,
        vec![
            Claim::try_from(json!({"contents": {"name": "Alice"}})).unwrap(),
            Claim::try_from(json!({"contents": {"degree": "MSc", "year": 2018}})).unwrap(),
        ]
    );

    // Keys in the wrong order
    let swapped = [pks[1], pks[0]];
    assert!(
        !verify_combined_presentation(&mut rng, &swapped, &[None, None], &response, &session)
            .unwrap()
            .0
    );

    // Replayed to another verifier
    let (other_session, _) = request_combined_presentation(
        &mut rng,
        &id_issuer.system,
        session.partial_requests.clone(),
    );
    assert!(
        !verify_combined_presentation(&mut rng, &pks, &[None, None], &response, &other_session)
            .unwrap()
            .0
    );
}

#[test]
fn separate_proofs_cannot_be_combined() {
    let mut rng = StdRng::seed_from_u64(0u64);
    let (id_issuer, degree_issuer, id, degree) = setup(&mut rng);
    let pks = [&id_issuer.keypair.public_key, &degree_issuer.keypair.public_key];
    let (session, request) = request_combined_presentation(
        &mut rng,
        &id_issuer.system,
        vec![
            partial(&["contents.name"], true),
            partial(&["contents.degree"], true),
        ],
    );

    // Each credential proven on its own under the context and nonce of the combined request
    let single = |rng: &mut StdRng, i: usize, attested: &AttestedClaim| {
        build_presentation(
            rng,
            pks[i],
            attested,
            &PresentationRequest {
                partial_request: request.partial_requests[i].clone(),
                context: request.context.clone(),
                nonce: request.nonce.clone(),
            },
        )
        .unwrap()
    };
    let first = single(&mut rng, 0, &id);
    let second = single(&mut rng, 1, &degree);

    let mut proof = first.proof.clone();
    proof
        .statement_proofs
        .extend(second.proof.statement_proofs.iter().cloned());
    let mixed = CombinedPresentationResponse {
        proof,
        partials: vec![first.partial.clone(), second.partial.clone()],
    };
    let (verified, claims) =
        verify_combined_presentation(&mut rng, &pks, &[None, None], &mixed, &session).unwrap();
    assert!(!verified);
    assert!(claims.is_empty());

    // The genuine combination verifies
    let response = build_combined_presentation(&mut rng, &pks, &[&id, &degree], &request).unwrap();
    assert!(
        verify_combined_presentation(&mut rng, &pks, &[None, None], &response, &session)
            .unwrap()
            .0
    );
}

#[test]
fn credentials_must_share_the_claimer_secret() {
    let mut rng = StdRng::seed_from_u64(0u64);
    let (id_issuer, degree_issuer, id, _) = setup(&mut rng);
    let other_claimer = Claimer::new(&mut rng);
    let (foreign_degree, _) = issue(
        &mut rng,
        &degree_issuer.system,
        &degree_issuer.keypair,
        &degree_issuer.update,
        &other_claimer,
        degree_claim(),
    );
    let pks = [&id_issuer.keypair.public_key, &degree_issuer.keypair.public_key];
    let (_, request) = request_combined_presentation(
        &mut rng,
        &id_issuer.system,
        vec![partial(&["contents.name"], false), partial(&["contents.degree"], false)],
    );
    assert!(matches!(
        build_combined_presentation(&mut rng, &pks, &[&id, &foreign_degree], &request),
        Err(CredentialError::SecretMismatch(1))
    ));
}

#[test]
fn revoking_one_credential_fails_the_combination() {
    let mut rng = StdRng::seed_from_u64(0u64);
    let id_issuer = issuer(&mut rng, 8);
    let degree_issuer = issuer(&mut rng, 4);
    let claimer = Claimer::new(&mut rng);
    let (mut id, _) = issue(
        &mut rng,
        &id_issuer.system,
        &id_issuer.keypair,
        &id_issuer.update,
        &claimer,
        sample_claim(),
    );
    let (mut degree, degree_witness) = issue(
        &mut rng,
        &degree_issuer.system,
        &degree_issuer.keypair,
        &degree_issuer.update,
        &claimer,
        degree_claim(),
    );
    let pks = [&id_issuer.keypair.public_key, &degree_issuer.keypair.public_key];
    let at_least_one = FreshnessPolicy::MinIndex(1);
    let partial_requests = vec![
        PartialPresentationRequest::new(["contents.name"], true, FreshnessPolicy::default()),
        PartialPresentationRequest::new(["contents.degree"], true, at_least_one),
    ];

    let degree_update = degree_issuer
        .keypair
        .revoke(
            &mut rng,
            &degree_issuer.update,
            &[&degree_witness],
            start_time() + Duration::hours(1),
        )
        .unwrap();
    let latest = [
        Some(&id_issuer.update.signed_accumulator),
        Some(&degree_update.signed_accumulator),
    ];
    id.update(&id_issuer.keypair.public_key, &id_issuer.update)
        .unwrap();
    assert!(matches!(
        degree.update(&degree_issuer.keypair.public_key, &degree_update),
        Err(CredentialError::WitnessRevoked)
    ));

    let (session, request) =
        request_combined_presentation(&mut rng, &id_issuer.system, partial_requests.clone());
    let response = build_combined_presentation(&mut rng, &pks, &[&id, &degree], &request).unwrap();
    let (verified, claims) =
        verify_combined_presentation(&mut rng, &pks, &latest, &response, &session).unwrap();
    assert!(!verified);
    assert!(claims.is_empty());

    // Without the freshness requirement on the revoked credential the stale proof is accepted
    let mut lenient = partial_requests;
    lenient[1].freshness = FreshnessPolicy::default();
    let (session, request) = request_combined_presentation(&mut rng, &id_issuer.system, lenient);
    let response = build_combined_presentation(&mut rng, &pks, &[&id, &degree], &request).unwrap();
    assert!(
        verify_combined_presentation(&mut rng, &pks, &latest, &response, &session)
            .unwrap()
            .0
    );
}

#[test]
fn malformed_combined_inputs() {
    let mut rng = StdRng::seed_from_u64(0u64);
    let (id_issuer, degree_issuer, id, degree) = setup(&mut rng);
    let pks = [&id_issuer.keypair.public_key, &degree_issuer.keypair.public_key];

    let (empty_session, empty_request) =
        request_combined_presentation(&mut rng, &id_issuer.system, vec![]);
    assert!(matches!(
        build_combined_presentation(&mut rng, &pks, &[&id, &degree], &empty_request),
        Err(CredentialError::EmptyRequest)
    ));

    let (session, request) = request_combined_presentation(
        &mut rng,
        &id_issuer.system,
        vec![partial(&["contents.name"], false), partial(&[], false)],
    );
    assert!(matches!(
        build_combined_presentation(&mut rng, &pks, &[&id, &degree], &request),
        Err(CredentialError::EmptyRequest)
    ));
    assert!(matches!(
        build_combined_presentation(&mut rng, &pks[..1], &[&id, &degree], &request),
        Err(CredentialError::UnequalLengths(2, 1))
    ));
    assert!(matches!(
        build_combined_presentation(&mut rng, &pks, &[&id], &request),
        Err(CredentialError::UnequalLengths(2, 1))
    ));

    let (session_ok, request_ok) = request_combined_presentation(
        &mut rng,
        &id_issuer.system,
        vec![partial(&["contents.name"], false), partial(&["contents.year"], false)],
    );
    let response = build_combined_presentation(&mut rng, &pks, &[&id, &degree], &request_ok).unwrap();
    assert!(matches!(
        verify_combined_presentation(&mut rng, &pks, &[None], &response, &session_ok),
        Err(CredentialError::UnequalLengths(2, 1))
    ));
    assert!(matches!(
        verify_combined_presentation(&mut rng, &pks, &[None, None], &response, &empty_session),
        Err(CredentialError::EmptyRequest)
    ));
    assert!(matches!(
        verify_combined_presentation(&mut rng, &pks, &[None, None], &response, &session),
        Err(CredentialError::EmptyRequest)
    ));
}
