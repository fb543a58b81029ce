// Credential derivation tests

use anyhow::Result;
use speechgate::credential::{self, derive_key, open, IV_LEN, LICENSE_KEY_PHRASE};
use speechgate::{CredentialError, CredentialMode, CredentialPolicy, EncryptedTriple};

const FIXTURE_IV: [u8; IV_LEN] = [7, 1, 4, 2, 8, 5, 7, 1, 4, 2, 8, 5];

#[test]
fn test_key_is_sha256_of_phrase() {
    assert_eq!(
        hex::encode(derive_key("abc")),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn test_open_matches_gcm_reference_vectors() -> Result<()> {
    let key = [0u8; 32];
    let iv = [0u8; IV_LEN];

    // AES-256-GCM, zero key and IV, one zero block
    let plain = open(
        &key,
        &iv,
        &hex::decode("d0d1c8a799996bf0265b98b5d48ab919")?,
        &hex::decode("cea7403d4d606b6e074ec5d3baf39d18")?,
    )?;
    assert_eq!(plain, vec![0u8; 16]);

    // Same key and IV, empty plaintext
    let empty = open(&key, &iv, &hex::decode("530f8afbc74536b9a963b4f1c4cb738b")?, &[])?;
    assert!(empty.is_empty());
    Ok(())
}

#[test]
fn test_derive_recovers_sealed_secret() -> Result<()> {
    let triple = credential::seal_with_iv("api-speech-key", LICENSE_KEY_PHRASE, FIXTURE_IV)?;
    assert_eq!(triple.iv, FIXTURE_IV.to_vec());
    assert_eq!(triple.auth_tag.len(), 16);
    assert_eq!(triple.cipher_text.len(), "api-speech-key".len());

    let first = triple.derive(LICENSE_KEY_PHRASE)?;
    let second = credential::derive(LICENSE_KEY_PHRASE, &triple.auth_tag, &triple.iv, &triple.cipher_text)?;
    assert_eq!(first.expose(), "api-speech-key");
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_seal_uses_fresh_iv() -> Result<()> {
    let a = credential::seal("api-speech-key", "phrase")?;
    let b = credential::seal("api-speech-key", "phrase")?;
    assert_ne!(a.iv, b.iv);
    assert_eq!(a.derive("phrase")?, b.derive("phrase")?);
    Ok(())
}

#[test]
fn test_any_flipped_bit_fails_authentication() -> Result<()> {
    let triple = credential::seal_with_iv("api-speech-key", "phrase", FIXTURE_IV)?;

    let mut tag = triple.clone();
    tag.auth_tag[15] ^= 0x80;
    let mut iv = triple.clone();
    iv.iv[0] ^= 0x01;
    let mut body = triple.clone();
    body.cipher_text[3] ^= 0x10;

    for tampered in [tag, iv, body] {
        assert_eq!(tampered.derive("phrase"), Err(CredentialError::AuthenticationFailed));
    }
    Ok(())
}

#[test]
fn test_wrong_phrase_fails_authentication() -> Result<()> {
    let triple = credential::seal_with_iv("api-speech-key", "phrase", FIXTURE_IV)?;
    assert_eq!(triple.derive("Phrase"), Err(CredentialError::AuthenticationFailed));
    assert_eq!(triple.derive(""), Err(CredentialError::AuthenticationFailed));
    Ok(())
}

#[test]
fn test_malformed_lengths_are_rejected() {
    let short_iv = EncryptedTriple::new(vec![0; 16], vec![0; 8], vec![1, 2, 3]);
    assert!(matches!(short_iv.derive("phrase"), Err(CredentialError::MalformedInput(_))));

    let short_tag = EncryptedTriple::new(vec![0; 4], vec![0; IV_LEN], vec![1, 2, 3]);
    assert!(matches!(short_tag.derive("phrase"), Err(CredentialError::MalformedInput(_))));
}

#[test]
fn test_gated_mode_checks_phrase_first() {
    // Material is garbage; the phrase check must fire before any decryption.
    let policy = CredentialPolicy::new(CredentialMode::GatedEncryptedTriple {
        triple: EncryptedTriple::new(vec![1], vec![2], vec![3]),
        key_phrase: "guess".to_string(),
        expected_key_phrase: LICENSE_KEY_PHRASE.to_string(),
    });
    assert_eq!(policy.resolve().unwrap_err(), CredentialError::InvalidKeyPhrase);
}

#[test]
fn test_gated_mode_with_matching_phrase() -> Result<()> {
    let triple = credential::seal_with_iv("api-speech-key", LICENSE_KEY_PHRASE, FIXTURE_IV)?;
    let policy = CredentialPolicy::new(CredentialMode::GatedEncryptedTriple {
        triple,
        key_phrase: LICENSE_KEY_PHRASE.to_string(),
        expected_key_phrase: LICENSE_KEY_PHRASE.to_string(),
    });

    let credential = policy.resolve()?;
    assert_eq!(credential.secret.expose(), "api-speech-key");
    assert!(credential.encrypted.is_none());
    Ok(())
}

#[test]
fn test_plain_and_forwarding_policies() -> Result<()> {
    let plain = CredentialPolicy::new(CredentialMode::PlainKey("api-speech-key".to_string())).forwarding_triple();
    let resolved = plain.resolve()?;
    assert_eq!(resolved.secret.expose(), "api-speech-key");
    // Nothing to forward in plain mode
    assert!(resolved.encrypted.is_none());

    let empty = CredentialPolicy::new(CredentialMode::PlainKey(String::new()));
    assert!(matches!(empty.resolve(), Err(CredentialError::MalformedInput(_))));

    let triple = credential::seal_with_iv("api-speech-key", "phrase", FIXTURE_IV)?;
    let forwarding = CredentialPolicy::new(CredentialMode::EncryptedTriple {
        triple: triple.clone(),
        key_phrase: "phrase".to_string(),
    })
    .forwarding_triple();
    let resolved = forwarding.resolve()?;
    assert_eq!(resolved.secret.expose(), "api-speech-key");
    assert_eq!(resolved.encrypted, Some(triple));
    Ok(())
}

#[test]
fn test_debug_output_never_contains_secret() -> Result<()> {
    let triple = credential::seal_with_iv("api-speech-key", "phrase", FIXTURE_IV)?;
    let credential = CredentialPolicy::new(CredentialMode::EncryptedTriple {
        triple,
        key_phrase: "phrase".to_string(),
    })
    .resolve()?;

    let rendered = format!("{credential:?}");
    assert!(!rendered.contains("api-speech-key"));
    assert!(rendered.contains("<redacted>"));
    Ok(())
}

#[test]
fn test_base64_triple_decrypts() -> Result<()> {
    use base64::Engine;

    let triple = credential::seal_with_iv("api-speech-key", "phrase", FIXTURE_IV)?;
    let b64 = base64::engine::general_purpose::STANDARD;
    let decoded = EncryptedTriple::from_base64(
        &b64.encode(&triple.auth_tag),
        &b64.encode(&triple.iv),
        &b64.encode(&triple.cipher_text),
    )?;

    assert_eq!(decoded.derive("phrase")?.expose(), "api-speech-key");
    Ok(())
}
