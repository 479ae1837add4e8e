pub mod lookup;
pub mod status;
