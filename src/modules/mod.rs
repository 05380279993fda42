pub mod murojaah;
pub mod recommendation;
pub mod schedule;
