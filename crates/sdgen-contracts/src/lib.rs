pub mod events;
pub mod ledger;
pub mod models;
pub mod plan;
pub mod presets;
pub mod sidecar;
