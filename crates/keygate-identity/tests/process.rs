//! Principal-name derivation and the credential-process output contract.

use keygate_identity::caller::principal_from_arn;
use keygate_identity::{CredentialProcessOutput, Credentials};

#[test]
fn principal_name_is_the_last_arn_path_component() {
    assert_eq!(principal_from_arn("arn:aws:iam::123456789012:user/alice"), "alice");
    assert_eq!(
        principal_from_arn("arn:aws:sts::123456789012:assumed-role/Admin/alice"),
        "alice"
    );
    assert_eq!(
        principal_from_arn("arn:aws:iam::123456789012:user/team/nested/bob"),
        "bob"
    );
    // Degenerate ARN with no path still yields something stable.
    assert_eq!(principal_from_arn("root"), "root");
}

#[test]
fn credential_process_output_uses_the_fixed_field_names() {
    let creds = Credentials {
        access_key_id: "ASIAEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
        session_token: Some("token".to_string()),
        expiration: Some("2026-03-02T11:00:00Z".parse().unwrap()),
    };

    let output = CredentialProcessOutput::from(&creds);
    let value = serde_json::to_value(&output).unwrap();

    assert_eq!(value["Version"], 1);
    assert_eq!(value["AccessKeyId"], "ASIAEXAMPLE");
    assert_eq!(value["SecretAccessKey"], "secret");
    assert_eq!(value["SessionToken"], "token");
    assert_eq!(value["Expiration"], "2026-03-02T11:00:00Z");
}

#[test]
fn token_and_expiration_are_omitted_when_absent() {
    let creds = Credentials {
        access_key_id: "AKIAEXAMPLE".to_string(),
        secret_access_key: "secret".to_string(),
        session_token: None,
        expiration: None,
    };

    let value = serde_json::to_value(CredentialProcessOutput::from(&creds)).unwrap();
    assert!(value.get("SessionToken").is_none());
    assert!(value.get("Expiration").is_none());
    assert_eq!(value["Version"], 1);
}
