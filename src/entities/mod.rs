pub mod entitlement;
pub mod order;
pub mod user;
