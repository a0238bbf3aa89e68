pub mod account;
pub mod audit;
pub mod center;
pub mod ticket;
