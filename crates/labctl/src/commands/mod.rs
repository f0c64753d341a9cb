pub mod alerts;
pub mod replay;
