use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// Opaque per-client identity (cookie-carried, not authenticated).
///
/// Generated once per client on first contact and persisted in a long-lived
/// cookie. Collision-improbable random value, never enforced unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Purchasable credit pack sizes.
pub const CREDIT_PACKS: [u32; 3] = [500, 1000, 2000];

/// Allow-listed credit pack (500, 1000, or 2000 credits).
///
/// Guaranteed valid by construction: holding a `CreditPack` proves the size
/// is one of [`CREDIT_PACKS`]. Use `CreditPack::try_from(500)` to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CreditPack(u32);

impl CreditPack {
    #[must_use]
    pub fn credits(self) -> u32 {
        self.0
    }

    /// Price in cents: half a cent per credit (500 credits for $2.50).
    #[must_use]
    pub fn price_cents(self) -> u32 {
        self.0 / 2
    }
}

impl std::fmt::Display for CreditPack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for CreditPack {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if CREDIT_PACKS.contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidPack(value))
        }
    }
}

impl From<CreditPack> for u32 {
    fn from(pack: CreditPack) -> Self {
        pack.0
    }
}
