//! Purchasable level catalog.
//!
//! The level set is fixed; prices are minor currency units (piastres) and
//! never floating point. Content metadata for the levels lives with the
//! content service; only the purchasable surface is described here.

use once_cell::sync::Lazy;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use strum::{Display, EnumString, IntoEnumIterator};

use crate::errors::ServiceError;

/// A purchasable course level.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Display,
    EnumString,
    Serialize,
    Deserialize,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Level {
    #[sea_orm(string_value = "LEVEL_A1")]
    LevelA1,
    #[sea_orm(string_value = "LEVEL_A2")]
    LevelA2,
    #[sea_orm(string_value = "LEVEL_B1")]
    LevelB1,
    #[sea_orm(string_value = "LEVEL_B2")]
    LevelB2,
    #[sea_orm(string_value = "LEVEL_C1")]
    LevelC1,
    #[sea_orm(string_value = "LEVEL_C2")]
    LevelC2,
}

impl Level {
    /// Parses a client-supplied level key, rejecting anything outside the
    /// known set before it reaches the ledger or the gateway.
    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        Self::from_str(raw).map_err(|_| ServiceError::InvalidProduct(raw.to_string()))
    }
}

/// Catalog entry for one level.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct CatalogEntry {
    pub level: Level,
    /// Price in minor currency units
    #[schema(example = 40000)]
    pub price_cents: i64,
    pub description: &'static str,
}

fn pricing(level: Level) -> (i64, &'static str) {
    match level {
        Level::LevelA1 => (40_000, "Beginner I"),
        Level::LevelA2 => (40_000, "Beginner II"),
        Level::LevelB1 => (55_000, "Intermediate I"),
        Level::LevelB2 => (55_000, "Intermediate II"),
        Level::LevelC1 => (70_000, "Advanced I"),
        Level::LevelC2 => (70_000, "Advanced II"),
    }
}

static CATALOG: Lazy<HashMap<Level, CatalogEntry>> = Lazy::new(|| {
    Level::iter()
        .map(|level| {
            let (price_cents, description) = pricing(level);
            (
                level,
                CatalogEntry {
                    level,
                    price_cents,
                    description,
                },
            )
        })
        .collect()
});

/// Looks up the catalog entry for a level.
pub fn lookup(level: Level) -> &'static CatalogEntry {
    &CATALOG[&level]
}
