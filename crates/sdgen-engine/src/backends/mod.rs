pub mod dryrun;
pub mod hf;
