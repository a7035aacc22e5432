//! Record and certificate fixtures

use crate::core_store::{CertificateVerifier, ChannelMessage, ChannelRecord};

const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const END: &str = "-----END CERTIFICATE-----";

fn field<'a>(pem: &'a str, key: &str) -> Option<&'a str> {
    pem.lines()
        .filter_map(|line| line.trim().strip_prefix(key)?.strip_prefix('='))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Root certificate in the fixture format
pub fn root_pem(subject: &str) -> String {
    format!("{}\nsubject={}\n{}\n", BEGIN, subject, END)
}

/// User certificate for `nickname`, issued by the root named `issuer`
pub fn user_cert(nickname: &str, issuer: &str) -> String {
    format!("{}\nnickname={}\nissuer={}\n{}\n", BEGIN, nickname, issuer, END)
}

/// Verifier over the fixture format: a certificate chains to a root when
/// its `issuer` equals the root's `subject`
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeVerifier;

impl CertificateVerifier for FakeVerifier {
    fn verify_chain(&self, pem: &str, root_pems: &[String]) -> bool {
        if !pem.trim_start().starts_with(BEGIN) {
            return false;
        }
        let Some(issuer) = field(pem, "issuer") else {
            return false;
        };
        root_pems.iter().any(|root| field(root, "subject") == Some(issuer))
    }

    fn nickname(&self, pem: &str) -> Option<String> {
        field(pem, "nickname").map(str::to_string)
    }
}

/// Channel message with the given id
pub fn message(id: &str, channel_address: &str) -> ChannelMessage {
    ChannelMessage {
        id: id.to_string(),
        message_type: 1,
        message: format!("message {}", id),
        created_at: 1_700_000_000,
        channel_address: channel_address.to_string(),
        signature: String::new(),
        pub_key: String::new(),
    }
}

/// Directory record for `address`
pub fn channel(address: &str) -> ChannelRecord {
    ChannelRecord::new(address, address)
        .with_description(format!("{} channel", address))
        .with_timestamp(1_700_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_verifier() {
        let roots = vec![root_pem("root")];
        assert!(FakeVerifier.verify_chain(&user_cert("alice", "root"), &roots));
        assert!(!FakeVerifier.verify_chain(&user_cert("alice", "other"), &roots));
        assert!(!FakeVerifier.verify_chain("nickname=alice\nissuer=root", &roots));
        assert_eq!(FakeVerifier.nickname(&user_cert("Alice", "root")), Some("Alice".to_string()));
        assert_eq!(FakeVerifier.nickname(&root_pem("root")), None);
    }
}
