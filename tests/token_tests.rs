use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use conduit_gate::auth::{Claims, MAX_TOKEN_TTL, TokenIssuer, TokenVerifier, VerificationError};
use jsonwebtoken::{EncodingKey, Header, encode};
use std::time::Duration;
use uuid::Uuid;

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";
const OTHER_SECRET: &str = "a-completely-different-secret";
const TEST_USER_ID: Uuid = Uuid::from_u128(1);

fn sign(secret: &str, iat: i64, exp: i64) -> String {
    let claims = Claims {
        sub: TEST_USER_ID,
        username: "jake".to_string(),
        iat,
        exp,
    };
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), &claims, &key).unwrap()
}

fn verifier() -> TokenVerifier {
    TokenVerifier::new(TEST_JWT_SECRET.as_bytes())
}

// --- Tests ---

#[test]
fn test_valid_token_yields_claimed_subject() {
    let now = Utc::now().timestamp();
    let token = sign(TEST_JWT_SECRET, now, now + 3600);

    let identity = verifier().verify(&token).unwrap();

    assert_eq!(identity.user_id, TEST_USER_ID);
    assert_eq!(identity.username, "jake");
    assert_eq!(identity.expires_at.timestamp(), now + 3600);
}

#[test]
fn test_expired_token_is_expired() {
    let now = Utc::now().timestamp();
    let token = sign(TEST_JWT_SECRET, now - 7200, now - 3600);

    assert_eq!(verifier().verify(&token), Err(VerificationError::Expired));
}

#[test]
fn test_expired_token_is_expired_even_with_bad_signature() {
    let now = Utc::now().timestamp();
    let token = sign(OTHER_SECRET, now - 7200, now - 3600);

    assert_eq!(verifier().verify(&token), Err(VerificationError::Expired));
}

#[test]
fn test_token_expires_exactly_at_exp() {
    let exp = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let token = sign(TEST_JWT_SECRET, exp.timestamp() - 60, exp.timestamp());

    let just_before = exp - ChronoDuration::seconds(1);
    assert!(verifier().verify_at(&token, just_before).is_ok());
    assert_eq!(
        verifier().verify_at(&token, exp),
        Err(VerificationError::Expired)
    );
}

#[test]
fn test_wrong_secret_is_invalid_signature() {
    let now = Utc::now().timestamp();
    let token = sign(OTHER_SECRET, now, now + 3600);

    assert_eq!(
        verifier().verify(&token),
        Err(VerificationError::InvalidSignature)
    );
}

#[test]
fn test_tampered_payload_is_invalid_signature() {
    let now = Utc::now().timestamp();
    let token = sign(TEST_JWT_SECRET, now, now + 3600);
    let other = sign(TEST_JWT_SECRET, now, now + 7200);

    // Header and signature of one token around the payload of another.
    let parts: Vec<&str> = token.split('.').collect();
    let other_parts: Vec<&str> = other.split('.').collect();
    let forged = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

    assert_eq!(
        verifier().verify(&forged),
        Err(VerificationError::InvalidSignature)
    );
}

#[test]
fn test_garbage_is_malformed() {
    for token in ["", "not-a-jwt", "a.b.c", "Bearer xyz"] {
        assert_eq!(
            verifier().verify(token),
            Err(VerificationError::MalformedToken),
            "token {token:?}"
        );
    }
}

#[test]
fn test_missing_exp_claim_is_malformed() {
    #[derive(serde::Serialize)]
    struct NoExp {
        sub: Uuid,
        username: String,
        iat: i64,
    }
    let claims = NoExp {
        sub: TEST_USER_ID,
        username: "jake".to_string(),
        iat: Utc::now().timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap();

    assert_eq!(
        verifier().verify(&token),
        Err(VerificationError::MalformedToken)
    );
}

#[test]
fn test_issued_token_round_trips_through_verifier() {
    let issuer = TokenIssuer::new(TEST_JWT_SECRET.as_bytes(), Duration::from_secs(600));
    let now = Utc::now();

    let token = issuer.issue_at(TEST_USER_ID, "jake", now).unwrap();
    let identity = verifier().verify_at(&token, now).unwrap();

    assert_eq!(identity.user_id, TEST_USER_ID);
    assert_eq!(identity.expires_at.timestamp(), now.timestamp() + 600);
    assert_eq!(
        verifier().verify_at(&token, now + ChronoDuration::seconds(600)),
        Err(VerificationError::Expired)
    );
}

#[test]
fn test_oversized_ttl_is_clamped_not_wrapped() {
    let issuer = TokenIssuer::new(TEST_JWT_SECRET.as_bytes(), Duration::from_secs(u64::MAX));
    let now = Utc::now();

    let token = issuer.issue_at(TEST_USER_ID, "jake", now).unwrap();
    let identity = verifier().verify_at(&token, now).unwrap();

    assert_eq!(
        identity.expires_at.timestamp(),
        now.timestamp() + MAX_TOKEN_TTL.as_secs() as i64
    );
}
