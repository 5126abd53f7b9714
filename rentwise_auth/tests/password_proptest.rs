/// Property-based tests for the credential verifier using proptest
///
/// These tests check hashing, verification and the strength policy across
/// randomly generated passwords.
use rentwise_auth::auth::{
    AuthError, CredentialVerifier, PasswordConfig, PasswordRule, validate_password_strength,
};
use proptest::prelude::*;

fn cheap_verifier() -> CredentialVerifier {
    CredentialVerifier::new(PasswordConfig {
        pepper: None,
        memory_kib: 256,
        iterations: 1,
        parallelism: 1,
    })
}

// Strategy to generate a password satisfying every rule
fn strong_password_strategy() -> impl Strategy<Value = String> {
    ("[A-Z]{2}", "[a-z]{6,20}", "[0-9]{2}", "[!@#%^&*?~-]{2}")
        .prop_map(|(upper, lower, digits, special)| format!("{lower}{upper}{special}{digits}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_verify_accepts_only_the_hashed_password(
        password in "\\PC{1,40}",
        other in "\\PC{1,40}",
    ) {
        let verifier = cheap_verifier();
        let stored = verifier.hash_password(&password).unwrap();

        prop_assert!(verifier.verify_password(&password, &stored).unwrap());
        if other != password {
            prop_assert!(!verifier.verify_password(&other, &stored).unwrap());
        }
    }

    #[test]
    fn test_strong_passwords_pass(password in strong_password_strategy()) {
        prop_assert!(validate_password_strength(&password).is_ok());
    }

    #[test]
    fn test_lowercase_only_reports_every_missing_class(password in "[a-z]{1,30}") {
        let Err(AuthError::Validation(err)) = validate_password_strength(&password) else {
            panic!("lowercase-only password should fail validation");
        };

        prop_assert!(err.contains(PasswordRule::MissingUppercase));
        prop_assert!(err.contains(PasswordRule::MissingDigit));
        prop_assert!(err.contains(PasswordRule::MissingSpecial));
        prop_assert!(!err.contains(PasswordRule::MissingLowercase));
        prop_assert_eq!(
            err.contains(PasswordRule::TooShort { min_length: 12 }),
            password.len() < 12
        );
    }
}
