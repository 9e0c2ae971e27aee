//! Authenticity check for inbound gateway callbacks.
//!
//! The gateway signs each transaction notification with a shared-secret
//! HMAC over a canonical field ordering. Nothing from a callback may be
//! trusted — not even to locate an order — until the signature checks out.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Transport-independent form of a gateway transaction notification.
/// The controller layer normalizes both the POST body and the GET query
/// variants into this shape before anything else looks at it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionNotification {
    /// Gateway transaction id
    pub transaction_id: i64,
    pub success: bool,
    /// Minor currency units
    pub amount_cents: i64,
    pub currency: String,
    /// Creation timestamp exactly as delivered; it is part of the signed
    /// material and must not be reformatted.
    pub created_at: String,
    /// Gateway order reference from intention-creation time
    pub order_ref: String,
    pub buyer_email: String,
    /// Hex-encoded signature tag supplied by the sender
    pub hmac: Option<String>,
}

impl TransactionNotification {
    /// Canonical concatenation the sender signs: transaction id, amount,
    /// creation timestamp, currency, order reference, success flag.
    /// Booleans render as "true"/"false"; integers without any formatting.
    pub fn signable(&self) -> String {
        format!(
            "{}{}{}{}{}{}",
            self.transaction_id,
            self.amount_cents,
            self.created_at,
            self.currency,
            self.order_ref,
            self.success
        )
    }
}

/// Verifies callback signatures with the configured shared secret.
#[derive(Clone)]
pub struct CallbackVerifier {
    hmac_secret: String,
}

impl CallbackVerifier {
    pub fn new(hmac_secret: impl Into<String>) -> Self {
        Self {
            hmac_secret: hmac_secret.into(),
        }
    }

    /// Returns whether the notification's signature matches. Never errors;
    /// a missing or mismatched tag is `false`. The computed tag is not
    /// logged and never reaches a response.
    pub fn verify(&self, notification: &TransactionNotification) -> bool {
        let Some(supplied) = notification.hmac.as_deref() else {
            warn!(
                transaction_id = notification.transaction_id,
                "Callback carried no signature"
            );
            return false;
        };

        let mut mac = match HmacSha256::new_from_slice(self.hmac_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(e) => {
                warn!(error = %e, "HMAC key rejected");
                return false;
            }
        };
        mac.update(notification.signable().as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        let matches = constant_time_eq(&expected, &supplied.to_ascii_lowercase());
        if !matches {
            warn!(
                transaction_id = notification.transaction_id,
                order_ref = %notification.order_ref,
                "Callback signature mismatch"
            );
        }
        matches
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
