pub mod callback;
pub mod entitlements;
pub mod gateway;
pub mod orders;
