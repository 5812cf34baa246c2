use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use subtle::ConstantTimeEq;

/// Fields that make up a Click sign string, in wire order.
#[derive(Clone, Copy, Debug)]
pub struct ClickSignInput<'a> {
    pub click_trans_id: &'a str,
    pub service_id: &'a str,
    pub merchant_trans_id: &'a str,
    /// Present on Complete only.
    pub merchant_prepare_id: Option<&'a str>,
    /// Raw wire text; reformatting would change the digest.
    pub amount: &'a str,
    pub action: &'a str,
    pub sign_time: &'a str,
}

// key: signature-payme -> Basic auth against the merchant credentials
pub fn verify_payme_basic_auth(headers: &HeaderMap, login: &str, merchant_key: &str) -> bool {
    let Some(value) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))
    else {
        return false;
    };
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Some(separator) = decoded.iter().position(|byte| *byte == b':') else {
        return false;
    };
    let (given_login, given_key) = (&decoded[..separator], &decoded[separator + 1..]);

    (given_login.ct_eq(login.as_bytes()) & given_key.ct_eq(merchant_key.as_bytes())).into()
}

// key: signature-click -> md5 over the concatenated sign fields
pub fn click_sign(input: &ClickSignInput<'_>, secret_key: &str) -> String {
    let mut material = String::new();
    material.push_str(input.click_trans_id);
    material.push_str(input.service_id);
    material.push_str(secret_key);
    material.push_str(input.merchant_trans_id);
    if let Some(prepare_id) = input.merchant_prepare_id {
        material.push_str(prepare_id);
    }
    material.push_str(input.amount);
    material.push_str(input.action);
    material.push_str(input.sign_time);
    hex::encode(md5::compute(material.as_bytes()).0)
}

pub fn verify_click_sign(input: &ClickSignInput<'_>, secret_key: &str, provided: &str) -> bool {
    let expected = click_sign(input, secret_key);
    let provided = provided.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(credentials: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode(credentials));
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).expect("header"));
        headers
    }

    #[test]
    fn payme_basic_auth_accepts_configured_pair() {
        assert!(verify_payme_basic_auth(
            &basic("Paycom:secret-key"),
            "Paycom",
            "secret-key"
        ));
    }

    #[test]
    fn payme_basic_auth_rejects_wrong_login_or_key() {
        assert!(!verify_payme_basic_auth(&basic("Other:secret-key"), "Paycom", "secret-key"));
        assert!(!verify_payme_basic_auth(&basic("Paycom:wrong"), "Paycom", "secret-key"));
        assert!(!verify_payme_basic_auth(&basic("Paycom"), "Paycom", "secret-key"));
        assert!(!verify_payme_basic_auth(&HeaderMap::new(), "Paycom", "secret-key"));
    }

    #[test]
    fn payme_basic_auth_rejects_prefixes_and_extensions_of_the_key() {
        assert!(!verify_payme_basic_auth(&basic("Paycom:secret"), "Paycom", "secret-key"));
        assert!(!verify_payme_basic_auth(
            &basic("Paycom:secret-key-extra"),
            "Paycom",
            "secret-key"
        ));
        assert!(!verify_payme_basic_auth(&basic("Paycom:"), "Paycom", "secret-key"));
        assert!(!verify_payme_basic_auth(&basic("Pay:secret-key"), "Paycom", "secret-key"));
    }

    #[test]
    fn click_sign_rejects_truncated_digest() {
        let input = ClickSignInput {
            click_trans_id: "1",
            service_id: "2",
            merchant_trans_id: "BP",
            merchant_prepare_id: None,
            amount: "500",
            action: "0",
            sign_time: "t",
        };
        let sign = click_sign(&input, "k");
        assert!(verify_click_sign(&input, "k", &format!("  {sign} ")));
        assert!(!verify_click_sign(&input, "k", &sign[..31]));
        assert!(!verify_click_sign(&input, "k", ""));
    }

    #[test]
    fn key_may_contain_colons() {
        assert!(verify_payme_basic_auth(&basic("Paycom:a:b:c"), "Paycom", "a:b:c"));
    }

    #[test]
    fn click_sign_covers_prepare_id_on_complete() {
        let prepare = ClickSignInput {
            click_trans_id: "1001",
            service_id: "777",
            merchant_trans_id: "BP240101120000ABCD",
            merchant_prepare_id: None,
            amount: "500.00",
            action: "0",
            sign_time: "2024-01-01 12:00:00",
        };
        let expected = format!(
            "{:x}",
            md5::compute("1001777secretBP240101120000ABCD500.0002024-01-01 12:00:00")
        );
        assert_eq!(click_sign(&prepare, "secret"), expected);
        assert!(verify_click_sign(&prepare, "secret", &expected.to_uppercase()));

        let complete = ClickSignInput {
            merchant_prepare_id: Some("5"),
            action: "1",
            ..prepare
        };
        assert_ne!(click_sign(&complete, "secret"), expected);
        assert!(!verify_click_sign(&complete, "secret", &expected));
    }

    #[test]
    fn click_sign_uses_raw_amount_text() {
        let base = ClickSignInput {
            click_trans_id: "1",
            service_id: "2",
            merchant_trans_id: "BP",
            merchant_prepare_id: None,
            amount: "500",
            action: "0",
            sign_time: "t",
        };
        let padded = ClickSignInput {
            amount: "500.00",
            ..base
        };
        assert_ne!(click_sign(&base, "k"), click_sign(&padded, "k"));
    }
}
