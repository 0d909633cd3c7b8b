pub mod claim;

pub use claim::{ClaimRecord, ClaimUpdate, Quote, claim_number, format_claim_id};
