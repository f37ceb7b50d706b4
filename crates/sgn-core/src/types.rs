use serde::{Deserialize, Serialize};
use sgn_crypto::sealed::base64_bytes;
use sgn_crypto::SessionKey;

/// A paired channel with one peer. The key comes from the pairing handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub key: SessionKey,
}

impl Session {
    pub fn new(id: impl Into<String>, name: impl Into<String>, key: SessionKey) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            key,
        }
    }
}

/// An inbound ask for a signature over `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub unix_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Request {
    /// Whether the request's timestamp is within `tolerance` seconds of `now`,
    /// in either direction.
    pub fn is_fresh(&self, now: u64, tolerance: u64) -> bool {
        now.abs_diff(self.unix_seconds) <= tolerance
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub approved: bool,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBody {
    #[serde(default, with = "option_base64", skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn signed(request_id: &str, signature: Vec<u8>, fingerprint: String) -> Self {
        Self {
            request_id: request_id.to_string(),
            approved: true,
            body: ResponseBody {
                signature: Some(signature),
                public_key_fingerprint: Some(fingerprint),
                error: None,
            },
        }
    }

    /// Unsigned response carrying an error message.
    pub fn error(request_id: &str, message: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            approved: false,
            body: ResponseBody {
                error: Some(message.to_string()),
                ..Default::default()
            },
        }
    }
}

/// The local user's published identity as peers see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub email: Option<String>,
    /// Lowercase hex SHA-256 of the wire-format public key.
    pub fingerprint: String,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
}

mod option_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => sgn_crypto::sealed::base64_bytes::serialize(bytes, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        use base64::Engine;
        match Option::<String>::deserialize(d)? {
            Some(text) => base64::engine::general_purpose::STANDARD
                .decode(text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_freshness_window() {
        let req = Request {
            id: "r".into(),
            unix_seconds: 1_000,
            command: None,
            data: vec![1],
        };
        assert!(req.is_fresh(1_000, 120));
        assert!(req.is_fresh(1_120, 120));
        assert!(req.is_fresh(880, 120));
        assert!(!req.is_fresh(1_121, 120));
        assert!(!req.is_fresh(879, 120));
    }

    #[test]
    fn test_request_json_shape() {
        let req = Request {
            id: "r1".into(),
            unix_seconds: 7,
            command: Some("git push".into()),
            data: b"hi".to_vec(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["data"], "aGk=");
        assert_eq!(json["command"], "git push");
    }

    #[test]
    fn test_response_body_omits_empty_fields() {
        let resp = Response::error("r1", "rejected");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["body"]["error"], "rejected");
        assert!(json["body"].get("signature").is_none());

        let back: Response = serde_json::from_value(json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn test_signed_response_round_trip() {
        let resp = Response::signed("r2", vec![9; 64], "ab".repeat(32));
        let text = serde_json::to_string(&resp).unwrap();
        let back: Response = serde_json::from_str(&text).unwrap();
        assert_eq!(back.body.signature, Some(vec![9; 64]));
        assert!(back.approved);
    }
}
