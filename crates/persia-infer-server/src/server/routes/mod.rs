pub mod default;
pub mod predictions;
