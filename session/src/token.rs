//! Commissioner token flow (CCM).
//!
//! In CCM mode the commissioner fetches a signed COM_TOK from the domain
//! registrar and attaches it to subsequent petitions. A token set locally is
//! accepted only if its signer certificate chains to the configured trust
//! anchor.

use std::sync::Arc;
use std::time::Duration;

use ciborium::Value;
use tracing::info;
use x509_parser::certificate::X509Certificate;
use x509_parser::pem::parse_x509_pem;

use meshcop_wire::coap::{Code, Message};
use meshcop_wire::{uri, Error, Result};

use crate::coap::CoapEndpoint;
use crate::controller::SessionController;
use crate::transport::Connection;

/// Request a signed commissioner token from the registrar over an
/// established (certificate) session.
pub async fn request_token(
    conn: Arc<dyn Connection>,
    commissioner_id: &str,
    domain_name: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let claims = Value::Map(vec![
        (
            Value::Text("id".to_string()),
            Value::Text(commissioner_id.to_string()),
        ),
        (
            Value::Text("domain".to_string()),
            Value::Text(domain_name.to_string()),
        ),
    ]);
    let mut payload = Vec::new();
    ciborium::into_writer(&claims, &mut payload)
        .map_err(|err| Error::internal(format!("token request encoding failed: {err}")))?;

    let (endpoint, _requests) = CoapEndpoint::new(conn);
    let request = Message::request(true, Code::POST, uri::TOKEN_REQUEST).with_payload(payload);
    let response = endpoint.request(request, timeout).await;
    endpoint.close().await;
    let response = response?;
    if !response.code.is_success() {
        return Err(Error::rejected(format!(
            "COM_TOK.req answered {}",
            response.code
        )));
    }
    if response.payload.is_empty() {
        return Err(Error::security("registrar returned an empty token"));
    }
    info!("received {}-byte commissioner token", response.payload.len());
    Ok(response.payload.to_vec())
}

fn parse_pem_certificate(pem: &[u8]) -> Result<x509_parser::pem::Pem> {
    let (_rest, parsed) =
        parse_x509_pem(pem).map_err(|err| Error::security(format!("bad PEM: {err}")))?;
    Ok(parsed)
}

/// Validate a signed token against the signer certificate and trust anchor.
///
/// The token must be a COSE_Sign1 structure, and the signer certificate must
/// be inside its validity window and carry a signature made by the anchor.
pub fn verify_token(token: &[u8], signer_cert_pem: &[u8], trust_anchor_pem: &[u8]) -> Result<()> {
    // Structural check: COSE_Sign1 is a 4-element CBOR array
    // [protected, unprotected, payload, signature].
    let value: Value = ciborium::from_reader(token)
        .map_err(|_| Error::security("token is not valid CBOR"))?;
    let elements = match value {
        Value::Array(elements) if elements.len() == 4 => elements,
        Value::Tag(_, inner) => match *inner {
            Value::Array(elements) if elements.len() == 4 => elements,
            _ => return Err(Error::security("token is not a COSE_Sign1 structure")),
        },
        _ => return Err(Error::security("token is not a COSE_Sign1 structure")),
    };
    if !matches!(elements[3], Value::Bytes(_)) {
        return Err(Error::security("token carries no signature"));
    }

    let signer_pem = parse_pem_certificate(signer_cert_pem)?;
    let signer: X509Certificate = signer_pem
        .parse_x509()
        .map_err(|err| Error::security(format!("bad signer certificate: {err}")))?;
    let anchor_pem = parse_pem_certificate(trust_anchor_pem)?;
    let anchor: X509Certificate = anchor_pem
        .parse_x509()
        .map_err(|err| Error::security(format!("bad trust anchor: {err}")))?;

    if !signer.validity().is_valid() {
        return Err(Error::security("signer certificate expired or not yet valid"));
    }
    if signer.issuer() != anchor.subject() {
        return Err(Error::security(
            "signer certificate was not issued by the trust anchor",
        ));
    }
    signer
        .verify_signature(Some(anchor.public_key()))
        .map_err(|_| Error::security("signer certificate signature check failed"))?;
    Ok(())
}

impl SessionController {
    /// Run COM_TOK.req against the registrar and retain the signed token for
    /// subsequent petitions.
    pub async fn request_token(
        &self,
        registrar: Arc<dyn Connection>,
        domain_name: &str,
    ) -> Result<Vec<u8>> {
        if !self.is_ccm_mode() {
            return Err(Error::invalid_state("token flow requires CCM mode"));
        }
        let token = request_token(
            registrar,
            &self.commissioner_id(),
            domain_name,
            self.timeout(),
        )
        .await?;
        self.store_signed_token(token.clone());
        Ok(token)
    }

    /// Validate and install an externally provided signed token.
    pub fn set_token(
        &self,
        token: Vec<u8>,
        signer_cert_pem: &[u8],
        trust_anchor_pem: &[u8],
    ) -> Result<()> {
        if !self.is_ccm_mode() {
            return Err(Error::invalid_state("token flow requires CCM mode"));
        }
        verify_token(&token, signer_cert_pem, trust_anchor_pem)?;
        self.store_signed_token(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PairConnection;

    fn cose_sign1(payload: &[u8]) -> Vec<u8> {
        let value = Value::Array(vec![
            Value::Bytes(vec![0xA0]),
            Value::Map(vec![]),
            Value::Bytes(payload.to_vec()),
            Value::Bytes(vec![0x55; 64]),
        ]);
        let mut out = Vec::new();
        ciborium::into_writer(&value, &mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn test_request_token_roundtrip() {
        let (a, b) = PairConnection::pair();
        let token = cose_sign1(b"claims");
        let served = token.clone();
        let (registrar, mut requests) = CoapEndpoint::new(Arc::new(b));
        tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            assert_eq!(request.uri_path(), uri::TOKEN_REQUEST);
            // The request claims decode as a CBOR map.
            let claims: Value = ciborium::from_reader(request.payload.as_ref()).unwrap();
            assert!(matches!(claims, Value::Map(_)));
            registrar
                .respond(&request, Code::CHANGED, served.clone())
                .await
                .unwrap();
        });

        let got = request_token(
            Arc::new(a),
            "test-commissioner",
            "TestDomain",
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(got, token);
    }

    #[test]
    fn test_verify_rejects_non_cose_token() {
        let err = verify_token(b"\x01\x02\x03", b"", b"").unwrap_err();
        assert_eq!(err.kind(), meshcop_wire::ErrorKind::Security);
    }

    #[test]
    fn test_verify_rejects_wrong_arity() {
        let value = Value::Array(vec![Value::Bytes(vec![]), Value::Map(vec![])]);
        let mut token = Vec::new();
        ciborium::into_writer(&value, &mut token).unwrap();
        let err = verify_token(&token, b"", b"").unwrap_err();
        assert_eq!(err.kind(), meshcop_wire::ErrorKind::Security);
    }
}
