//! OpenSSL-style cipher list expressions over the provider's suites.
//!
//! Tokens are separated by `:`, `,` or spaces and applied left to right:
//! `X` appends matching suites, `-X` removes them, `!X` removes them for
//! good and `+X` moves them to the end. `X` is a class keyword or a suite
//! name in IANA (`TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`), rustls
//! (`TLS13_AES_128_GCM_SHA256`) or OpenSSL (`ECDHE-RSA-AES128-GCM-SHA256`)
//! spelling.

use rustls::SupportedCipherSuite;

use crate::error::{NetError, NetResult};

/// Everything the provider offers.
pub const ALL_CIPHERS: &str = "ALL";

/// Used when verified trust is required and no list was configured.
pub const HARDENED_CIPHERS: &str = "HIGH:!aNULL:!eNULL:!EXPORT:!RC4:!MD5:!DES:!3DES";

/// OpenSSL names for the suites rustls implements.
const OPENSSL_NAMES: &[(&str, &str)] = &[
    ("TLS13_AES_256_GCM_SHA384", "TLS_AES_256_GCM_SHA384"),
    ("TLS13_AES_128_GCM_SHA256", "TLS_AES_128_GCM_SHA256"),
    ("TLS13_CHACHA20_POLY1305_SHA256", "TLS_CHACHA20_POLY1305_SHA256"),
    ("TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384", "ECDHE-ECDSA-AES256-GCM-SHA384"),
    ("TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256", "ECDHE-ECDSA-AES128-GCM-SHA256"),
    ("TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256", "ECDHE-ECDSA-CHACHA20-POLY1305"),
    ("TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384", "ECDHE-RSA-AES256-GCM-SHA384"),
    ("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256", "ECDHE-RSA-AES128-GCM-SHA256"),
    ("TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256", "ECDHE-RSA-CHACHA20-POLY1305"),
];

/// Classes no suite of this TLS engine belongs to.
const NEVER_OFFERED: &[&str] = &[
    "aNULL", "eNULL", "NULL", "EXPORT", "EXP", "LOW", "MEDIUM", "RC4", "MD5", "DES", "3DES", "ADH",
    "AECDH", "SSLv3", "SSLv2", "TLSv1", "TLSv1.1", "PSK", "SRP", "CAMELLIA", "SEED", "IDEA",
];

/// The suite's rustls name, e.g. `TLS13_AES_128_GCM_SHA256`.
pub fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

fn is_tls13(suite: &SupportedCipherSuite) -> bool {
    matches!(suite, SupportedCipherSuite::Tls13(_))
}

fn matches(token: &str, suite: &SupportedCipherSuite) -> bool {
    let name = suite_name(suite);
    match token {
        "ALL" | "HIGH" | "DEFAULT" | "COMPLEMENTOFDEFAULT" => true,
        "TLSv1.3" => is_tls13(suite),
        "TLSv1.2" => !is_tls13(suite),
        "ECDHE" | "EECDH" | "kEECDH" | "kECDHE" => !is_tls13(suite) && name.contains("ECDHE"),
        "ECDSA" | "aECDSA" => name.contains("ECDSA"),
        "RSA" | "aRSA" => name.contains("_RSA_"),
        "AESGCM" => name.contains("GCM"),
        "AES" => name.contains("AES"),
        "AES128" => name.contains("AES_128"),
        "AES256" => name.contains("AES_256"),
        "CHACHA20" => name.contains("CHACHA20"),
        "SHA256" => name.ends_with("SHA256"),
        "SHA384" => name.ends_with("SHA384"),
        _ if NEVER_OFFERED.contains(&token) => false,
        _ => {
            name.eq_ignore_ascii_case(token)
                || name.replacen("TLS13_", "TLS_", 1).eq_ignore_ascii_case(token)
                || OPENSSL_NAMES
                    .iter()
                    .any(|(rustls_name, openssl)| *rustls_name == name && openssl.eq_ignore_ascii_case(token))
        }
    }
}

fn is_known(token: &str, available: &[SupportedCipherSuite]) -> bool {
    NEVER_OFFERED.contains(&token) || available.iter().any(|suite| matches(token, suite))
}

/// Select suites from `available` according to `expression`.
///
/// Unknown tokens are ignored. An expression selecting nothing fails.
pub fn select(expression: &str, available: &[SupportedCipherSuite]) -> NetResult<Vec<SupportedCipherSuite>> {
    let mut selected: Vec<SupportedCipherSuite> = Vec::new();
    let mut banned: Vec<SupportedCipherSuite> = Vec::new();

    for raw in expression.split([':', ',', ' ']).filter(|t| !t.is_empty()) {
        let (op, token) = match raw.as_bytes()[0] {
            b'!' | b'-' | b'+' => (raw.as_bytes()[0], &raw[1..]),
            _ => (b'=', raw),
        };
        if !is_known(token, available) {
            tracing::debug!(token, "Ignoring unknown cipher token");
            continue;
        }
        let matching: Vec<SupportedCipherSuite> =
            available.iter().copied().filter(|suite| matches(token, suite)).collect();

        match op {
            b'!' => {
                selected.retain(|suite| !matching.contains(suite));
                banned.extend(matching);
            }
            b'-' => selected.retain(|suite| !matching.contains(suite)),
            b'+' => {
                let (moved, kept): (Vec<_>, Vec<_>) =
                    selected.into_iter().partition(|suite| matching.contains(suite));
                selected = kept;
                selected.extend(moved);
            }
            _ => {
                for suite in matching {
                    if !selected.contains(&suite) && !banned.contains(&suite) {
                        selected.push(suite);
                    }
                }
            }
        }
    }

    if selected.is_empty() {
        return Err(NetError::Initialization(format!(
            "cipher list '{}' selects no cipher suite",
            expression
        )));
    }
    Ok(selected)
}
