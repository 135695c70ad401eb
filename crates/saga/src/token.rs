//! Payment method tokens.

use serde::{Deserialize, Serialize};

use crate::error::SagaError;

const PREFIX: &str = "tok_";
const MAX_BODY_LEN: usize = 128;

/// An opaque payment method reference issued by the gateway.
///
/// Well-formed tokens are `tok_` followed by 1 to 128 ASCII letters, digits,
/// `_` or `-`. The value is redacted from `Debug` and `Display` output.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentToken(String);

impl PaymentToken {
    pub fn parse(raw: &str) -> Result<Self, SagaError> {
        let body = raw
            .strip_prefix(PREFIX)
            .ok_or_else(|| SagaError::InvalidToken(format!("must start with {PREFIX:?}")))?;

        if body.is_empty() || body.len() > MAX_BODY_LEN {
            return Err(SagaError::InvalidToken(format!(
                "body must be 1 to {MAX_BODY_LEN} characters"
            )));
        }

        if !body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(SagaError::InvalidToken(
                "body may only contain ASCII letters, digits, '_' and '-'".to_string(),
            ));
        }

        Ok(Self(raw.to_string()))
    }

    /// The raw token, for handing to the gateway.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for PaymentToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentToken({self})")
    }
}

impl std::fmt::Display for PaymentToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{PREFIX}***")
    }
}

impl TryFrom<String> for PaymentToken {
    type Error = SagaError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<PaymentToken> for String {
    fn from(token: PaymentToken) -> Self {
        token.0
    }
}
